//! Log frame decoding.
//!
//! Turns the engine's output byte stream into [`LogLine`] values. Two framings
//! exist on the wire:
//!
//! ```text
//! non-tty: [selector u8][reserved u8 x3][length u32 BE][payload ...] repeated
//! tty:     raw text, newline-delimited (stdout and stderr merged by the pty)
//! ```
//!
//! The wire format has no end-of-stream marker other than connection close,
//! so every way of running out of bytes ends the stream silently.

use dockline_shared::constants::frame as frame_const;
use futures::stream::{Stream, StreamExt};
use std::pin::Pin;
use std::task::{Context, Poll};
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncReadExt, BufReader};

/// Which output stream a line came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StreamKind {
    Stdout,
    Stderr,
    /// Unknown selector, or tty mode where the streams are merged.
    Unknown,
}

impl StreamKind {
    /// Map a frame selector byte to a stream kind.
    ///
    /// Selector 0 (stdin) is echoed on stdout by the engine.
    pub fn from_selector(selector: u8) -> Self {
        match selector {
            frame_const::STREAM_STDIN | frame_const::STREAM_STDOUT => StreamKind::Stdout,
            frame_const::STREAM_STDERR => StreamKind::Stderr,
            _ => StreamKind::Unknown,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            StreamKind::Stdout => "stdout",
            StreamKind::Stderr => "stderr",
            StreamKind::Unknown => "unknown",
        }
    }
}

/// One decoded unit of output: a frame payload, or one tty text line.
///
/// The text is not necessarily newline-terminated. Payloads are decoded as
/// UTF-8 lossily, so invalid sequences become U+FFFD.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogLine {
    pub kind: StreamKind,
    pub line: String,
}

impl LogLine {
    pub fn new(kind: StreamKind, line: impl Into<String>) -> Self {
        Self {
            kind,
            line: line.into(),
        }
    }

    pub fn stdout(line: impl Into<String>) -> Self {
        Self::new(StreamKind::Stdout, line)
    }

    pub fn stderr(line: impl Into<String>) -> Self {
        Self::new(StreamKind::Stderr, line)
    }

    pub fn unknown(line: impl Into<String>) -> Self {
        Self::new(StreamKind::Unknown, line)
    }
}

impl std::fmt::Display for LogLine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.line)
    }
}

/// Header of one multiplexed frame.
///
/// Reserved bytes 1..4 are neither validated nor kept.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameHeader {
    pub selector: u8,
    pub len: u32,
}

impl FrameHeader {
    pub fn new(selector: u8, len: u32) -> Self {
        Self { selector, len }
    }

    pub fn parse(bytes: &[u8; frame_const::HEADER_LEN]) -> Self {
        Self {
            selector: bytes[0],
            len: u32::from_be_bytes([bytes[4], bytes[5], bytes[6], bytes[7]]),
        }
    }

    pub fn encode(&self) -> [u8; frame_const::HEADER_LEN] {
        let len = self.len.to_be_bytes();
        [self.selector, 0, 0, 0, len[0], len[1], len[2], len[3]]
    }

    pub fn kind(&self) -> StreamKind {
        StreamKind::from_selector(self.selector)
    }
}

/// Lazy, single-pass sequence of decoded log lines.
///
/// Ends when the underlying reader reaches EOF, errors, or is cut mid-frame.
/// Cannot be restarted.
pub struct LogLines {
    inner: Pin<Box<dyn Stream<Item = LogLine> + Send>>,
}

impl LogLines {
    pub(crate) fn from_stream(stream: impl Stream<Item = LogLine> + Send + 'static) -> Self {
        Self {
            inner: Box::pin(stream),
        }
    }

    /// End the stream once `timeout` has elapsed, whatever its progress.
    ///
    /// The deadline covers the whole call, not each frame. Must be called
    /// inside a tokio runtime.
    pub fn with_deadline(self, timeout: Duration) -> Self {
        Self::from_stream(self.inner.take_until(tokio::time::sleep(timeout)))
    }
}

impl Stream for LogLines {
    type Item = LogLine;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.inner.as_mut().poll_next(cx)
    }
}

/// Decode `reader` into log lines using the framing selected by `tty`.
pub fn decode_log_lines<R>(reader: R, tty: bool) -> LogLines
where
    R: AsyncRead + Send + 'static,
{
    if tty {
        decode_tty(reader)
    } else {
        decode_multiplexed(reader)
    }
}

fn decode_multiplexed<R>(reader: R) -> LogLines
where
    R: AsyncRead + Send + 'static,
{
    use async_stream::stream;

    let stream = stream! {
        let mut reader = Box::pin(reader);
        let mut raw = [0u8; frame_const::HEADER_LEN];
        loop {
            if reader.read_exact(&mut raw).await.is_err() {
                break;
            }
            let header = FrameHeader::parse(&raw);

            // Grows with the bytes actually received instead of trusting the
            // declared length for the allocation.
            let expected = u64::from(header.len);
            let mut payload = Vec::new();
            match (&mut reader).take(expected).read_to_end(&mut payload).await {
                Ok(n) if n as u64 == expected => {}
                _ => break,
            }

            tracing::trace!(selector = header.selector, len = header.len, "Decoded frame");
            yield LogLine::new(header.kind(), String::from_utf8_lossy(&payload).into_owned());
        }
    };

    LogLines::from_stream(stream)
}

fn decode_tty<R>(reader: R) -> LogLines
where
    R: AsyncRead + Send + 'static,
{
    use async_stream::stream;

    let stream = stream! {
        let mut reader = BufReader::new(Box::pin(reader));
        let mut buf = Vec::new();
        loop {
            buf.clear();
            match reader.read_until(b'\n', &mut buf).await {
                Ok(0) | Err(_) => break,
                Ok(_) => {
                    if buf.last() == Some(&b'\n') {
                        buf.pop();
                        if buf.last() == Some(&b'\r') {
                            buf.pop();
                        }
                    }
                    yield LogLine::unknown(String::from_utf8_lossy(&buf).into_owned());
                }
            }
        }
    };

    LogLines::from_stream(stream)
}
