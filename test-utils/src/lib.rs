//! Test utilities for dockline.
//!
//! [`StubEngine`] is a scripted engine on a Unix socket. Each accepted
//! connection takes the next [`StubReply`] from the script, records the
//! request, replays the reply, then keeps reading until the client closes its
//! side. Bytes the client sends after the request (session input) are recorded
//! as well.

use dockline_shared::Transport;
use dockline_shared::constants::frame as frame_const;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use tempfile::TempDir;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{UnixListener, UnixStream};
use tokio::task::JoinHandle;

// ============================================================================
// Replies
// ============================================================================

/// What the stub sends back on one connection.
#[derive(Clone, Debug, Default)]
pub struct StubReply {
    chunks: Vec<Vec<u8>>,
    chunk_delay: Duration,
    close_after: bool,
}

impl StubReply {
    /// Send `bytes` in one write.
    pub fn raw(bytes: impl Into<Vec<u8>>) -> Self {
        Self {
            chunks: vec![bytes.into()],
            ..Default::default()
        }
    }

    /// Send each chunk in its own write, pausing briefly in between so the
    /// client sees them as separate reads.
    pub fn chunks<I, B>(chunks: I) -> Self
    where
        I: IntoIterator<Item = B>,
        B: Into<Vec<u8>>,
    {
        Self {
            chunks: chunks.into_iter().map(Into::into).collect(),
            chunk_delay: Duration::from_millis(10),
            close_after: false,
        }
    }

    /// Complete HTTP response with a `Content-Length` body.
    pub fn http(status: u16, content_type: &str, body: impl AsRef<[u8]>) -> Self {
        let body = body.as_ref();
        let mut bytes = format!(
            "HTTP/1.1 {} {}\r\nContent-Type: {}\r\nContent-Length: {}\r\n\r\n",
            status,
            reason(status),
            content_type,
            body.len()
        )
        .into_bytes();
        bytes.extend_from_slice(body);
        Self::raw(bytes)
    }

    pub fn json(status: u16, body: &str) -> Self {
        Self::http(status, "application/json", body)
    }

    /// HTTP response whose body runs until the stub closes the connection.
    pub fn streaming(status: u16, content_type: &str, body: impl Into<Vec<u8>>) -> Self {
        let head = format!(
            "HTTP/1.1 {} {}\r\nContent-Type: {}\r\nConnection: close\r\n\r\n",
            status,
            reason(status),
            content_type
        );
        Self::chunks([head.into_bytes(), body.into()]).close_after()
    }

    /// Shut down the write side once the reply is sent.
    pub fn close_after(mut self) -> Self {
        self.close_after = true;
        self
    }
}

fn reason(status: u16) -> &'static str {
    match status {
        101 => "UPGRADED",
        200 => "OK",
        201 => "Created",
        204 => "No Content",
        400 => "Bad Request",
        404 => "Not Found",
        409 => "Conflict",
        500 => "Internal Server Error",
        _ => "Unknown",
    }
}

/// Encode one multiplexed output frame.
pub fn frame(selector: u8, payload: &[u8]) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(frame_const::HEADER_LEN + payload.len());
    bytes.push(selector);
    bytes.extend_from_slice(&[0, 0, 0]);
    bytes.extend_from_slice(&(payload.len() as u32).to_be_bytes());
    bytes.extend_from_slice(payload);
    bytes
}

// ============================================================================
// Recorded traffic
// ============================================================================

/// One request as the stub received it.
#[derive(Clone, Debug, Default)]
pub struct RecordedRequest {
    /// Request line and headers, including the terminating blank line.
    pub head: String,
    pub body: Vec<u8>,
    /// Everything the client wrote after the request.
    pub input: Vec<u8>,
}

impl RecordedRequest {
    pub fn request_line(&self) -> &str {
        self.head.lines().next().unwrap_or_default()
    }

    pub fn method(&self) -> &str {
        self.request_line().split(' ').next().unwrap_or_default()
    }

    pub fn target(&self) -> &str {
        self.request_line().split(' ').nth(1).unwrap_or_default()
    }

    /// Header value by case-insensitive name.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.head.lines().skip(1).find_map(|line| {
            let (key, value) = line.split_once(':')?;
            key.trim()
                .eq_ignore_ascii_case(name)
                .then_some(value.trim())
        })
    }

    pub fn body_text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }
}

#[derive(Default)]
struct Shared {
    replies: Mutex<VecDeque<StubReply>>,
    requests: Mutex<Vec<RecordedRequest>>,
    connections: AtomicUsize,
    client_closes: AtomicUsize,
}

impl Shared {
    fn append_input(&self, index: usize, bytes: &[u8]) {
        if let Some(request) = self.requests.lock().get_mut(index) {
            request.input.extend_from_slice(bytes);
        }
    }
}

// ============================================================================
// Stub engine
// ============================================================================

/// Scripted engine listening on a Unix socket in a temporary directory.
pub struct StubEngine {
    _dir: TempDir,
    socket_path: PathBuf,
    shared: Arc<Shared>,
    accept_task: JoinHandle<()>,
}

impl StubEngine {
    /// Bind a new socket and serve `replies`, one per connection, in order.
    ///
    /// Connections beyond the script get no reply.
    pub async fn start<I>(replies: I) -> std::io::Result<Self>
    where
        I: IntoIterator<Item = StubReply>,
    {
        let dir = tempfile::tempdir()?;
        let socket_path = dir.path().join("engine.sock");
        let listener = UnixListener::bind(&socket_path)?;

        let shared = Arc::new(Shared {
            replies: Mutex::new(replies.into_iter().collect()),
            ..Default::default()
        });

        let accept_shared = Arc::clone(&shared);
        let accept_task = tokio::spawn(async move {
            while let Ok((stream, _)) = listener.accept().await {
                accept_shared.connections.fetch_add(1, Ordering::SeqCst);
                let reply = accept_shared.replies.lock().pop_front();
                tokio::spawn(serve(stream, reply, Arc::clone(&accept_shared)));
            }
        });

        Ok(Self {
            _dir: dir,
            socket_path,
            shared,
            accept_task,
        })
    }

    pub fn socket_path(&self) -> &Path {
        &self.socket_path
    }

    pub fn transport(&self) -> Transport {
        Transport::unix(&self.socket_path)
    }

    /// Requests received so far, in arrival order.
    pub fn requests(&self) -> Vec<RecordedRequest> {
        self.shared.requests.lock().clone()
    }

    pub fn connections(&self) -> usize {
        self.shared.connections.load(Ordering::SeqCst)
    }

    /// Connections whose client side has been closed.
    pub fn client_closes(&self) -> usize {
        self.shared.client_closes.load(Ordering::SeqCst)
    }

    /// Wait until at least `count` client closes were seen.
    pub async fn wait_for_client_close(&self, count: usize, timeout: Duration) -> bool {
        self.wait_until(timeout, || self.client_closes() >= count).await
    }

    /// Wait until the client has sent at least `len` input bytes on the
    /// connection that carried request `index`.
    pub async fn wait_for_input(&self, index: usize, len: usize, timeout: Duration) -> Vec<u8> {
        self.wait_until(timeout, || {
            self.shared
                .requests
                .lock()
                .get(index)
                .is_some_and(|r| r.input.len() >= len)
        })
        .await;
        self.shared
            .requests
            .lock()
            .get(index)
            .map(|r| r.input.clone())
            .unwrap_or_default()
    }

    async fn wait_until(&self, timeout: Duration, condition: impl Fn() -> bool) -> bool {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            if condition() {
                return true;
            }
            if tokio::time::Instant::now() >= deadline {
                return false;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    }
}

impl Drop for StubEngine {
    fn drop(&mut self) {
        self.accept_task.abort();
    }
}

async fn serve(mut stream: UnixStream, reply: Option<StubReply>, shared: Arc<Shared>) {
    let mut buf = Vec::new();
    let mut chunk = [0u8; 4096];

    let head_end = loop {
        if let Some(pos) = buf.windows(4).position(|w| w == b"\r\n\r\n") {
            break pos + 4;
        }
        match stream.read(&mut chunk).await {
            Ok(0) | Err(_) => {
                shared.client_closes.fetch_add(1, Ordering::SeqCst);
                return;
            }
            Ok(n) => buf.extend_from_slice(&chunk[..n]),
        }
    };

    let head = String::from_utf8_lossy(&buf[..head_end]).into_owned();
    let content_length = head
        .lines()
        .filter_map(|line| line.split_once(':'))
        .find(|(key, _)| key.trim().eq_ignore_ascii_case("content-length"))
        .and_then(|(_, value)| value.trim().parse::<usize>().ok())
        .unwrap_or(0);

    while buf.len() < head_end + content_length {
        match stream.read(&mut chunk).await {
            Ok(0) | Err(_) => break,
            Ok(n) => buf.extend_from_slice(&chunk[..n]),
        }
    }
    let body_end = (head_end + content_length).min(buf.len());

    let index = {
        let mut requests = shared.requests.lock();
        requests.push(RecordedRequest {
            head,
            body: buf[head_end..body_end].to_vec(),
            input: buf[body_end..].to_vec(),
        });
        requests.len() - 1
    };

    if let Some(reply) = reply {
        for bytes in &reply.chunks {
            if stream.write_all(bytes).await.is_err() {
                break;
            }
            let _ = stream.flush().await;
            if !reply.chunk_delay.is_zero() {
                tokio::time::sleep(reply.chunk_delay).await;
            }
        }
        if reply.close_after {
            let _ = stream.shutdown().await;
        }
    }

    loop {
        match stream.read(&mut chunk).await {
            Ok(0) | Err(_) => break,
            Ok(n) => shared.append_input(index, &chunk[..n]),
        }
    }
    shared.client_closes.fetch_add(1, Ordering::SeqCst);
}
