//! Dockline - container engine API client.
//!
//! The core of the crate is the engine's streaming protocol: de-multiplexing
//! stdout/stderr frames, hijacking a connection for interactive exec and
//! attach sessions, and driving those sessions. Endpoint facades on
//! [`DockerClient`] (exec, containers, images, volumes, networks, system) are
//! thin wrappers around it.
//!
//! ```no_run
//! use dockline::{ClientOptions, DockerClient, ExecCreateOptions, ExecStartOptions};
//! use futures::StreamExt;
//!
//! # async fn run() -> dockline::DocklineResult<()> {
//! let client = DockerClient::new(ClientOptions::default())?;
//! let exec_id = client
//!     .exec()
//!     .create("web", &ExecCreateOptions::new("sh").tty(true).interactive())
//!     .await?;
//! let session = client.exec().start_interactive(&exec_id, ExecStartOptions::default()).await?;
//!
//! let Some(mut output) = session.incoming() else {
//!     return Ok(());
//! };
//! session.send_text("echo hello\n").await?;
//! while let Some(line) = output.next().await {
//!     println!("{}", line);
//! }
//! session.close().await;
//! # Ok(())
//! # }
//! ```

pub mod api;
pub mod client;
pub mod hijack;
pub mod stream;
pub mod util;

pub use api::{
    AttachOptions, ContainersApi, EventsOptions, ExecApi, ExecCreateOptions, ExecStartOptions,
    Filters, ImagesApi, LogsOptions, NetworksApi, SystemApi, VolumesApi,
};
pub use client::{ClientOptions, DockerClient};
pub use hijack::{
    Connector, ExecSession, HandshakeResult, RawConnection, SessionOptions, SessionOutput,
    SessionState, UpgradeRequest, establish_session, read_http11_headers,
};
pub use stream::{JsonLines, LogLine, LogLines, StreamKind, decode_log_lines};

// Re-export shared types
pub use dockline_shared::{DocklineError, DocklineResult, Transport};
