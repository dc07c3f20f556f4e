//! Raw connection management.
//!
//! A [`RawConnection`] is an owned duplex byte stream to the engine with
//! independent read and write halves. [`Connector`]s open them.

use async_trait::async_trait;
use dockline_shared::{DocklineError, DocklineResult, Transport};
use std::io;
use std::path::{Path, PathBuf};
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt, ReadBuf};

/// Read half of a raw connection.
pub type ConnectionReader = Box<dyn AsyncRead + Send + Unpin>;

/// Write half of a raw connection.
pub type ConnectionWriter = Box<dyn AsyncWrite + Send + Unpin>;

/// Owned duplex byte stream to the engine.
///
/// Dropping it releases both directions and the OS handle. [`close`](Self::close)
/// additionally shuts down the write direction so the peer sees EOF.
pub struct RawConnection {
    reader: ConnectionReader,
    writer: ConnectionWriter,
}

impl RawConnection {
    /// Wrap a duplex stream, splitting it into halves.
    pub fn new<S>(stream: S) -> Self
    where
        S: AsyncRead + AsyncWrite + Send + 'static,
    {
        let (reader, writer) = tokio::io::split(stream);
        Self::from_parts(Box::new(reader), Box::new(writer))
    }

    /// Build from separately owned halves.
    pub fn from_parts(reader: ConnectionReader, writer: ConnectionWriter) -> Self {
        Self { reader, writer }
    }

    /// Write all of `bytes` to the write half.
    pub async fn write_fully(&mut self, bytes: &[u8]) -> io::Result<()> {
        self.writer.write_all(bytes).await
    }

    pub async fn flush(&mut self) -> io::Result<()> {
        self.writer.flush().await
    }

    /// Mutable access to the read half.
    pub fn reader(&mut self) -> &mut ConnectionReader {
        &mut self.reader
    }

    pub fn into_parts(self) -> (ConnectionReader, ConnectionWriter) {
        (self.reader, self.writer)
    }

    /// Shut down the write direction and release the connection.
    pub async fn close(mut self) -> io::Result<()> {
        self.writer.shutdown().await
    }

    /// Close, downgrading failures to a log line.
    pub(crate) async fn close_quietly(self) {
        if let Err(e) = self.close().await {
            tracing::warn!(error = %e, "Failed to close raw connection");
        }
    }
}

impl AsyncRead for RawConnection {
    fn poll_read(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        Pin::new(&mut self.reader).poll_read(cx, buf)
    }
}

impl AsyncWrite for RawConnection {
    fn poll_write(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        Pin::new(&mut self.writer).poll_write(cx, buf)
    }

    fn poll_flush(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.writer).poll_flush(cx)
    }

    fn poll_shutdown(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.writer).poll_shutdown(cx)
    }
}

/// Opens raw connections to the engine.
///
/// Every call returns a fresh, exclusively owned connection.
#[async_trait]
pub trait Connector: Send + Sync {
    async fn connect(&self) -> DocklineResult<RawConnection>;
}

/// Connector for a Unix domain socket.
#[derive(Clone, Debug)]
pub struct UnixConnector {
    socket_path: PathBuf,
}

impl UnixConnector {
    pub fn new(socket_path: impl Into<PathBuf>) -> Self {
        Self {
            socket_path: socket_path.into(),
        }
    }

    pub fn socket_path(&self) -> &Path {
        &self.socket_path
    }
}

#[async_trait]
impl Connector for UnixConnector {
    async fn connect(&self) -> DocklineResult<RawConnection> {
        tracing::trace!("Connecting via Unix: {}", self.socket_path.display());
        let stream = tokio::net::UnixStream::connect(&self.socket_path)
            .await
            .map_err(|e| {
                DocklineError::Connection(format!(
                    "failed to connect to {}: {}",
                    self.socket_path.display(),
                    e
                ))
            })?;
        Ok(RawConnection::new(stream))
    }
}

/// Connector for plain TCP.
#[derive(Clone, Debug)]
pub struct TcpConnector {
    host: String,
    port: u16,
}

impl TcpConnector {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }
}

#[async_trait]
impl Connector for TcpConnector {
    async fn connect(&self) -> DocklineResult<RawConnection> {
        tracing::trace!("Connecting via TCP: {}:{}", self.host, self.port);
        let stream = tokio::net::TcpStream::connect((self.host.as_str(), self.port))
            .await
            .map_err(|e| {
                DocklineError::Connection(format!(
                    "failed to connect to {}:{}: {}",
                    self.host, self.port, e
                ))
            })?;
        stream.set_nodelay(true)?;
        Ok(RawConnection::new(stream))
    }
}

/// Build the connector matching a transport.
pub fn connector_for(transport: &Transport) -> Arc<dyn Connector> {
    match transport {
        Transport::Unix { socket_path } => Arc::new(UnixConnector::new(socket_path.clone())),
        Transport::Tcp { host, port } => Arc::new(TcpConnector::new(host.clone(), *port)),
    }
}
