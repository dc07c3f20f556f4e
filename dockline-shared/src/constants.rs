//! Wire-level constants of the engine API.
//!
//! These values are fixed by the engine's HTTP API and framing format.

/// Engine API constants
pub mod api {
    /// API version used as the path prefix (`/v1.51/...`).
    pub const VERSION: &str = "1.51";

    /// Default `Host` header. The engine ignores it on a Unix socket, but
    /// HTTP/1.1 requires one.
    pub const DEFAULT_HOST: &str = "docker";

    /// Default engine socket.
    pub const DEFAULT_SOCKET_PATH: &str = "/var/run/docker.sock";

    /// Environment variable selecting the engine endpoint.
    pub const DOCKER_HOST_ENV: &str = "DOCKER_HOST";

    /// Default whole-call timeout of a log read, in seconds.
    pub const LOGS_TIMEOUT_SECS: u64 = 100;
}

/// Multiplexed stdout/stderr framing
pub mod frame {
    /// Size of a frame header: type byte, 3 reserved bytes, u32 BE length.
    pub const HEADER_LEN: usize = 8;

    /// Stream selector for stdin (echoed on stdout).
    pub const STREAM_STDIN: u8 = 0;

    /// Stream selector for stdout.
    pub const STREAM_STDOUT: u8 = 1;

    /// Stream selector for stderr.
    pub const STREAM_STDERR: u8 = 2;
}

/// Connection hijacking (HTTP/1.1 upgrade)
pub mod hijack {
    /// Terminator of an HTTP header block.
    pub const HEADER_TERMINATOR: &[u8] = b"\r\n\r\n";

    /// Read chunk size while accumulating response headers.
    pub const READ_CHUNK: usize = 8 * 1024;

    /// Largest accepted response header block.
    pub const MAX_HEADER_BYTES: usize = 64 * 1024;

    /// Value of the `Upgrade` header sent by the engine CLI.
    pub const UPGRADE_PROTOCOL: &str = "tcp";

    /// Status codes that mean the connection was hijacked.
    ///
    /// Some engine versions answer `200 OK` instead of `101 Switching Protocols`.
    pub const ACCEPTED_STATUS: [u16; 2] = [101, 200];

    /// Default capacity of the decoded-frame channel of a session.
    pub const DEFAULT_INCOMING_CAPACITY: usize = 64;
}
