//! Connection hijacking.
//!
//! An exec/attach start request is sent as an HTTP/1.1 upgrade. Once the
//! engine answers, the socket stops speaking HTTP and carries raw frames in
//! both directions:
//!
//! ```text
//! client ── POST /exec/{id}/start, Upgrade: tcp ──▶ engine
//! client ◀── HTTP/1.1 101 UPGRADE + leftover bytes ── engine
//! client ◀═══════ frames / tty text ═══════▶ engine
//! ```

pub mod connection;
pub mod handshake;
pub mod session;
pub mod state;

pub use connection::{
    ConnectionReader, ConnectionWriter, Connector, RawConnection, TcpConnector, UnixConnector,
    connector_for,
};
pub use handshake::{HandshakeResult, UpgradeRequest, read_http11_headers};
pub use session::{ExecSession, SessionOptions, SessionOutput, establish_session};
pub use state::SessionState;
