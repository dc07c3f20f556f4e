//! Hijacked interactive session.
//!
//! Performs the upgrade handshake over a raw connection and turns the result
//! into an [`ExecSession`]: decoded output flows in through a background pump,
//! raw bytes flow out through [`ExecSession::send`].

use super::connection::{ConnectionWriter, Connector, RawConnection};
use super::handshake::{HandshakeResult, UpgradeRequest, read_http11_headers};
use super::state::SessionState;
use crate::stream::{LogLine, LogLines, decode_log_lines};
use dockline_shared::constants::hijack as hijack_const;
use dockline_shared::{DocklineError, DocklineResult};
use futures::{Stream, StreamExt};
use parking_lot::Mutex;
use std::io::Cursor;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tokio_util::sync::CancellationToken;

/// Options for establishing a session.
#[derive(Clone, Debug)]
pub struct SessionOptions {
    /// Raw tty text instead of multiplexed frames.
    pub tty: bool,

    /// Decoded lines buffered ahead of the consumer before the pump waits.
    pub incoming_capacity: usize,
}

impl Default for SessionOptions {
    fn default() -> Self {
        Self {
            tty: false,
            incoming_capacity: hijack_const::DEFAULT_INCOMING_CAPACITY,
        }
    }
}

impl SessionOptions {
    pub fn tty(tty: bool) -> Self {
        Self {
            tty,
            ..Default::default()
        }
    }
}

/// Open a connection, hijack it with `request`, and wrap it in a session.
///
/// No retries. On any failure after the connection is open, the connection is
/// closed before the error is returned; close failures are only logged.
pub async fn establish_session(
    connector: &dyn Connector,
    request: &UpgradeRequest,
    options: SessionOptions,
) -> DocklineResult<ExecSession> {
    let mut state = SessionState::Connecting;
    tracing::debug!(
        method = %request.method(),
        target = %request.target(),
        "Establishing hijacked session"
    );

    // A malformed head is refused before any connection is opened.
    let head = request.encode_head()?;
    let mut conn = connector.connect().await?;

    let handshake = match hijack(&mut conn, &head, request.body_bytes(), &mut state).await {
        Ok(handshake) => handshake,
        Err(e) => {
            transition(&mut state, SessionState::Failed);
            tracing::debug!(error = %e, "Hijack failed");
            conn.close_quietly().await;
            return Err(e);
        }
    };

    if !handshake.is_upgraded() {
        transition(&mut state, SessionState::Failed);
        tracing::debug!(status = handshake.status, "Engine refused hijack");
        conn.close_quietly().await;
        return Err(DocklineError::Handshake {
            status: handshake.status,
        });
    }

    transition(&mut state, SessionState::Established);
    Ok(ExecSession::start(conn, handshake.leftover, options))
}

async fn hijack(
    conn: &mut RawConnection,
    head: &[u8],
    body: Option<&[u8]>,
    state: &mut SessionState,
) -> DocklineResult<HandshakeResult> {
    // The whole request goes out before the first read.
    conn.write_fully(head).await?;
    if let Some(body) = body {
        conn.write_fully(body).await?;
    }
    conn.flush().await?;
    tracing::debug!(
        "Sent upgrade request:\n{}",
        String::from_utf8_lossy(head).trim_end()
    );

    transition(state, SessionState::Handshaking);
    read_http11_headers(conn.reader()).await
}

fn transition(state: &mut SessionState, next: SessionState) {
    debug_assert!(
        state.can_transition_to(next),
        "invalid session transition {} -> {}",
        state,
        next
    );
    tracing::trace!(from = %state, to = %next, "Session state");
    *state = next;
}

/// State shared between a session handle and its output pump.
struct SessionShared {
    id: String,
    state: Mutex<SessionState>,
    writer: tokio::sync::Mutex<Option<ConnectionWriter>>,
    cancel: CancellationToken,
}

impl SessionShared {
    /// Mark the session closed, cancel any pending send or read, and shut
    /// down the write half. Repeated calls only log once.
    async fn release(&self, reason: &'static str) {
        let was_open = std::mem::replace(&mut *self.state.lock(), SessionState::Closed)
            != SessionState::Closed;
        self.cancel.cancel();
        self.shutdown_writer().await;
        if was_open {
            tracing::debug!(session_id = %self.id, reason, "Session closed");
        }
    }

    async fn shutdown_writer(&self) {
        // A pending send gives up the lock once the token is cancelled.
        let writer = self.writer.lock().await.take();
        if let Some(mut writer) = writer
            && let Err(e) = writer.shutdown().await
        {
            tracing::warn!(session_id = %self.id, error = %e, "Failed to shut down session writer");
        }
    }
}

/// One live bidirectional exec/attach stream.
///
/// Exclusively owns its connection. Output is read by a background pump and
/// handed out through [`incoming`](Self::incoming); input is written directly
/// by [`send`](Self::send). The two directions never block each other, so one
/// task can drain output while another sends.
///
/// The session closes itself when the engine ends the output stream. Dropping
/// the output stream does not close the session. Dropping the session without
/// calling [`close`](Self::close) releases the connection.
pub struct ExecSession {
    shared: Arc<SessionShared>,
    tty: bool,
    incoming: Mutex<Option<SessionOutput>>,
}

impl ExecSession {
    /// Take over an upgraded connection. `leftover` is replayed ahead of the
    /// live read half.
    pub(crate) fn start(conn: RawConnection, leftover: Vec<u8>, options: SessionOptions) -> Self {
        let id = ulid::Ulid::new().to_string();
        let (reader, writer) = conn.into_parts();
        let reader = Cursor::new(leftover).chain(reader);

        let shared = Arc::new(SessionShared {
            id,
            state: Mutex::new(SessionState::Established),
            writer: tokio::sync::Mutex::new(Some(writer)),
            cancel: CancellationToken::new(),
        });
        let (tx, rx) = mpsc::channel(options.incoming_capacity.max(1));
        spawn_pump(
            Arc::clone(&shared),
            decode_log_lines(reader, options.tty),
            tx,
        );

        tracing::debug!(session_id = %shared.id, tty = options.tty, "Session established");

        Self {
            shared,
            tty: options.tty,
            incoming: Mutex::new(Some(SessionOutput::new(rx))),
        }
    }

    pub fn id(&self) -> &str {
        &self.shared.id
    }

    /// Whether output is raw tty text rather than multiplexed frames.
    pub fn is_tty(&self) -> bool {
        self.tty
    }

    pub fn state(&self) -> SessionState {
        *self.shared.state.lock()
    }

    /// True after [`close`](Self::close), or once the engine ended the stream.
    pub fn is_closed(&self) -> bool {
        self.state() == SessionState::Closed
    }

    /// Take the output stream (can only be taken once).
    pub fn incoming(&self) -> Option<SessionOutput> {
        self.incoming.lock().take()
    }

    /// Write raw bytes to the session and flush.
    ///
    /// A send blocked on a peer that is not reading gives up as soon as the
    /// session is closed.
    ///
    /// # Errors
    ///
    /// - [`DocklineError::SessionClosed`] once the session is closed
    /// - [`DocklineError::Io`] if the write or flush fails; the session stays
    ///   open and the caller decides whether to close it
    pub async fn send(&self, bytes: &[u8]) -> DocklineResult<()> {
        let shared = &self.shared;
        let mut guard = tokio::select! {
            _ = shared.cancel.cancelled() => return Err(DocklineError::SessionClosed),
            guard = shared.writer.lock() => guard,
        };
        let writer = guard.as_mut().ok_or(DocklineError::SessionClosed)?;

        tracing::trace!(session_id = %shared.id, len = bytes.len(), "Sending bytes");
        tokio::select! {
            _ = shared.cancel.cancelled() => Err(DocklineError::SessionClosed),
            written = async {
                writer.write_all(bytes).await?;
                writer.flush().await
            } => written.map_err(Into::into),
        }
    }

    /// Write UTF-8 text to the session.
    pub async fn send_text(&self, text: &str) -> DocklineResult<()> {
        self.send(text.as_bytes()).await
    }

    /// Release the connection in both directions.
    ///
    /// Safe to call repeatedly, and after the peer has gone away. Shutdown
    /// failures are logged and otherwise ignored.
    pub async fn close(&self) {
        self.shared.release("closed by caller").await;
    }
}

impl Drop for ExecSession {
    fn drop(&mut self) {
        let mut state = self.shared.state.lock();
        if *state != SessionState::Closed {
            *state = SessionState::Closed;
            tracing::debug!(
                session_id = %self.shared.id,
                "Session dropped without close, releasing connection"
            );
        }
        drop(state);
        // The pump shuts down the write half once it sees the token.
        self.shared.cancel.cancel();
    }
}

impl std::fmt::Debug for ExecSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "ExecSession({})", self.shared.id)
    }
}

/// Decoded output of a session (read-only, single consumer).
pub struct SessionOutput {
    inner: ReceiverStream<LogLine>,
}

impl SessionOutput {
    fn new(receiver: mpsc::Receiver<LogLine>) -> Self {
        Self {
            inner: ReceiverStream::new(receiver),
        }
    }
}

impl Stream for SessionOutput {
    type Item = LogLine;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        Pin::new(&mut self.inner).poll_next(cx)
    }
}

/// Why the pump stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum PumpExit {
    EndOfStream,
    Cancelled,
    ConsumerGone,
}

/// Drive the decoder into the bounded output channel.
///
/// End of stream and cancellation release the session; a dropped consumer
/// only stops reading. The read half is dropped with the task.
fn spawn_pump(shared: Arc<SessionShared>, mut lines: LogLines, tx: mpsc::Sender<LogLine>) {
    tokio::spawn(async move {
        let mut line_count = 0u64;
        let exit = loop {
            let line = tokio::select! {
                _ = shared.cancel.cancelled() => break PumpExit::Cancelled,
                next = lines.next() => match next {
                    Some(line) => line,
                    None => break PumpExit::EndOfStream,
                },
            };

            line_count += 1;
            tracing::trace!(
                session_id = %shared.id,
                kind = line.kind.as_str(),
                line = ?line.line,
                "Session received"
            );

            tokio::select! {
                _ = shared.cancel.cancelled() => break PumpExit::Cancelled,
                sent = tx.send(line) => {
                    if sent.is_err() {
                        break PumpExit::ConsumerGone;
                    }
                }
            }
        };
        tracing::debug!(session_id = %shared.id, line_count, ?exit, "Session output ended");

        match exit {
            PumpExit::EndOfStream => shared.release("engine closed the stream").await,
            PumpExit::Cancelled => shared.release("cancelled").await,
            PumpExit::ConsumerGone => {}
        }
    });
}

// Compile-time assertions to ensure ExecSession can be shared between the
// reading and writing tasks.
const _: () = {
    const fn assert_send_sync<T: Send + Sync>() {}
    let _ = assert_send_sync::<ExecSession>;
};

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stream::FrameHeader;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;
    use tokio::io::{AsyncRead, AsyncReadExt, DuplexStream, ReadBuf};

    /// Hands out one pre-made duplex connection.
    struct DuplexConnector {
        conn: Mutex<Option<RawConnection>>,
    }

    impl DuplexConnector {
        fn pair() -> (Self, DuplexStream) {
            Self::with_buffer(4096)
        }

        fn with_buffer(max_buf_size: usize) -> (Self, DuplexStream) {
            let (client, server) = tokio::io::duplex(max_buf_size);
            (Self::holding(RawConnection::new(client)), server)
        }

        /// Like [`pair`](Self::pair), also counting bytes the client reads.
        fn counting() -> (Self, DuplexStream, Arc<AtomicUsize>) {
            let (client, server) = tokio::io::duplex(64 * 1024);
            let (reader, writer) = tokio::io::split(client);
            let consumed = Arc::new(AtomicUsize::new(0));
            let reader = CountingReader {
                inner: reader,
                consumed: Arc::clone(&consumed),
            };
            let conn = RawConnection::from_parts(Box::new(reader), Box::new(writer));
            (Self::holding(conn), server, consumed)
        }

        fn holding(conn: RawConnection) -> Self {
            Self {
                conn: Mutex::new(Some(conn)),
            }
        }
    }

    #[async_trait]
    impl Connector for DuplexConnector {
        async fn connect(&self) -> DocklineResult<RawConnection> {
            self.conn
                .lock()
                .take()
                .ok_or_else(|| DocklineError::Connection("already connected".to_string()))
        }
    }

    struct CountingReader<R> {
        inner: R,
        consumed: Arc<AtomicUsize>,
    }

    impl<R: AsyncRead + Unpin> AsyncRead for CountingReader<R> {
        fn poll_read(
            mut self: Pin<&mut Self>,
            cx: &mut Context<'_>,
            buf: &mut ReadBuf<'_>,
        ) -> Poll<std::io::Result<()>> {
            let before = buf.filled().len();
            let polled = Pin::new(&mut self.inner).poll_read(cx, buf);
            let read = buf.filled().len() - before;
            self.consumed.fetch_add(read, Ordering::SeqCst);
            polled
        }
    }

    fn request() -> UpgradeRequest {
        UpgradeRequest::new(hyper::Method::POST, "/exec/e1/start", "docker")
            .body(br#"{"Detach":false,"Tty":true}"#.to_vec())
    }

    async fn read_request_head(server: &mut DuplexStream) -> String {
        let mut acc = Vec::new();
        let mut byte = [0u8; 1];
        while !acc.ends_with(b"\r\n\r\n") {
            server.read_exact(&mut byte).await.unwrap();
            acc.push(byte[0]);
        }
        String::from_utf8(acc).unwrap()
    }

    #[tokio::test]
    async fn test_request_written_before_response_read() {
        let (connector, mut server) = DuplexConnector::pair();
        let engine = tokio::spawn(async move {
            let head = read_request_head(&mut server).await;
            let mut body = vec![0u8; 27];
            server.read_exact(&mut body).await.unwrap();
            server
                .write_all(b"HTTP/1.1 101 UPGRADE\r\n\r\nhi\n")
                .await
                .unwrap();
            (head, body, server)
        });

        let session = establish_session(&connector, &request(), SessionOptions::tty(true))
            .await
            .unwrap();
        let (head, body, _server) = engine.await.unwrap();

        assert!(head.starts_with("POST /exec/e1/start HTTP/1.1\r\n"));
        assert!(head.contains("Connection: Upgrade\r\n"));
        assert!(head.contains("Upgrade: tcp\r\n"));
        assert!(head.contains("Content-Length: 27\r\n"));
        assert_eq!(body, br#"{"Detach":false,"Tty":true}"#);

        let mut incoming = session.incoming().unwrap();
        assert_eq!(incoming.next().await, Some(LogLine::unknown("hi")));
        session.close().await;
    }

    #[tokio::test]
    async fn test_connect_failure_surfaces_verbatim() {
        let (connector, _server) = DuplexConnector::pair();
        connector.conn.lock().take();

        let err = establish_session(&connector, &request(), SessionOptions::default())
            .await
            .unwrap_err();
        assert!(err.is_connection());
        assert!(err.to_string().contains("already connected"));
    }

    #[tokio::test]
    async fn test_refused_handshake_closes_connection() {
        let (connector, mut server) = DuplexConnector::pair();
        let engine = tokio::spawn(async move {
            read_request_head(&mut server).await;
            let mut body = vec![0u8; 27];
            server.read_exact(&mut body).await.unwrap();
            server
                .write_all(b"HTTP/1.1 409 Conflict\r\n\r\n")
                .await
                .unwrap();
            let mut rest = Vec::new();
            server.read_to_end(&mut rest).await.unwrap();
            rest
        });

        let err = establish_session(&connector, &request(), SessionOptions::default())
            .await
            .unwrap_err();
        assert_eq!(err.status(), Some(409));

        let rest = tokio::time::timeout(Duration::from_secs(5), engine)
            .await
            .expect("connection was not closed")
            .unwrap();
        assert!(rest.is_empty());
    }

    #[tokio::test]
    async fn test_send_after_close_is_typed_error() {
        let (connector, mut server) = DuplexConnector::pair();
        tokio::spawn(async move {
            read_request_head(&mut server).await;
            let mut body = vec![0u8; 27];
            server.read_exact(&mut body).await.unwrap();
            server.write_all(b"HTTP/1.1 200 OK\r\n\r\n").await.unwrap();
            let mut sink = Vec::new();
            let _ = server.read_to_end(&mut sink).await;
        });

        let session = establish_session(&connector, &request(), SessionOptions::default())
            .await
            .unwrap();
        session.send_text("ls\n").await.unwrap();

        session.close().await;
        session.close().await;
        assert!(session.is_closed());
        assert!(matches!(
            session.send(b"x").await,
            Err(DocklineError::SessionClosed)
        ));
    }

    #[tokio::test]
    async fn test_incoming_can_only_be_taken_once() {
        let (connector, mut server) = DuplexConnector::pair();
        tokio::spawn(async move {
            read_request_head(&mut server).await;
            let mut body = vec![0u8; 27];
            server.read_exact(&mut body).await.unwrap();
            server.write_all(b"HTTP/1.1 101 UPGRADE\r\n\r\n").await.unwrap();
        });

        let session = establish_session(&connector, &request(), SessionOptions::default())
            .await
            .unwrap();
        assert!(session.incoming().is_some());
        assert!(session.incoming().is_none());
    }

    #[tokio::test]
    async fn test_dropped_output_keeps_session_open() {
        let (connector, mut server) = DuplexConnector::pair();
        let engine = tokio::spawn(async move {
            read_request_head(&mut server).await;
            let mut body = vec![0u8; 27];
            server.read_exact(&mut body).await.unwrap();
            server.write_all(b"HTTP/1.1 101 UPGRADE\r\n\r\n").await.unwrap();
            let mut received = [0u8; 4];
            server.read_exact(&mut received).await.unwrap();
            (received, server)
        });

        let session = establish_session(&connector, &request(), SessionOptions::default())
            .await
            .unwrap();
        drop(session.incoming());

        session.send(b"echo").await.unwrap();
        let (received, _server) = engine.await.unwrap();
        assert_eq!(&received, b"echo");
        assert!(session.state().is_established());
    }

    /// Reads the upgrade request and answers 101, handing back the server end.
    async fn accept_upgrade(mut server: DuplexStream) -> DuplexStream {
        read_request_head(&mut server).await;
        let mut body = vec![0u8; 27];
        server.read_exact(&mut body).await.unwrap();
        server.write_all(b"HTTP/1.1 101 UPGRADE\r\n\r\n").await.unwrap();
        server
    }

    #[tokio::test]
    async fn test_close_does_not_wait_for_blocked_send() {
        let (connector, server) = DuplexConnector::with_buffer(16);
        let engine = tokio::spawn(accept_upgrade(server));

        let session = Arc::new(
            establish_session(&connector, &request(), SessionOptions::default())
                .await
                .unwrap(),
        );
        // Held but never read, so input backs up.
        let _server = engine.await.unwrap();

        let sender = Arc::clone(&session);
        let send = tokio::spawn(async move { sender.send(&[0u8; 1024]).await });
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(!send.is_finished());

        tokio::time::timeout(Duration::from_secs(2), session.close())
            .await
            .expect("close waited for the blocked send");
        let sent = tokio::time::timeout(Duration::from_secs(2), send)
            .await
            .unwrap()
            .unwrap();
        assert!(matches!(sent, Err(DocklineError::SessionClosed)));
        assert!(session.is_closed());
    }

    #[tokio::test]
    async fn test_engine_eof_closes_session() {
        let (connector, server) = DuplexConnector::pair();
        let engine = tokio::spawn(async move {
            let mut server = accept_upgrade(server).await;
            server.write_all(b"bye\n").await.unwrap();
        });

        let session = establish_session(&connector, &request(), SessionOptions::tty(true))
            .await
            .unwrap();
        engine.await.unwrap();

        let lines: Vec<_> = session.incoming().unwrap().collect().await;
        assert_eq!(lines, vec![LogLine::unknown("bye")]);
        assert_eq!(session.state(), SessionState::Closed);
        assert!(matches!(
            session.send_text("x").await,
            Err(DocklineError::SessionClosed)
        ));

        session.close().await;
        assert!(session.is_closed());
    }

    #[tokio::test]
    async fn test_idle_consumer_suspends_pump() {
        const FRAMES: usize = 32;
        let (connector, server, consumed) = DuplexConnector::counting();
        let engine = tokio::spawn(accept_upgrade(server));

        let session = establish_session(
            &connector,
            &request(),
            SessionOptions {
                tty: false,
                incoming_capacity: 1,
            },
        )
        .await
        .unwrap();
        let mut server = engine.await.unwrap();
        let baseline = consumed.load(Ordering::SeqCst);

        let mut frames = Vec::new();
        for i in 0..FRAMES {
            frames.extend(frame(1, format!("line {:02}", i).as_bytes()));
        }
        let frame_len = frames.len() / FRAMES;
        server.write_all(&frames).await.unwrap();

        tokio::time::sleep(Duration::from_millis(100)).await;
        let decoded = (consumed.load(Ordering::SeqCst) - baseline) / frame_len;
        // One line in the channel, one waiting to be sent, one of slack.
        assert!(decoded <= 3, "pump decoded {} frames ahead of an idle consumer", decoded);

        let lines: Vec<_> = tokio::time::timeout(
            Duration::from_secs(5),
            session.incoming().unwrap().take(FRAMES).collect(),
        )
        .await
        .unwrap();
        assert_eq!(lines.len(), FRAMES);
        assert_eq!(lines[0], LogLine::stdout("line 00"));
        assert_eq!(lines[FRAMES - 1], LogLine::stdout("line 31"));
        session.close().await;
    }

    #[tokio::test]
    async fn test_malformed_head_refused_before_connect() {
        let (connector, _server) = DuplexConnector::pair();
        let request = request().header("X-Note", "a\r\nInjected: 1");

        let err = establish_session(&connector, &request, SessionOptions::default())
            .await
            .unwrap_err();
        assert!(matches!(err, DocklineError::InvalidArgument(_)));
        assert!(connector.conn.lock().is_some());
    }

    fn frame(selector: u8, payload: &[u8]) -> Vec<u8> {
        let mut bytes = FrameHeader::new(selector, payload.len() as u32)
            .encode()
            .to_vec();
        bytes.extend_from_slice(payload);
        bytes
    }
}
