//! HTTP/1.1 upgrade handshake.
//!
//! Builds the upgrade request head and reads the engine's response head off a
//! raw stream, keeping any bytes that arrived past the header terminator.

use dockline_shared::constants::hijack as hijack_const;
use dockline_shared::{DocklineError, DocklineResult};
use hyper::Method;
use serde::Serialize;
use tokio::io::{AsyncRead, AsyncReadExt};

/// Outcome of reading the upgrade response head.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HandshakeResult {
    /// HTTP status code of the response.
    pub status: u16,

    /// Bytes read past `\r\n\r\n`. They are the start of the upgraded stream
    /// and must be consumed before any further reads.
    pub leftover: Vec<u8>,
}

impl HandshakeResult {
    /// True when the engine handed over the raw connection.
    pub fn is_upgraded(&self) -> bool {
        hijack_const::ACCEPTED_STATUS.contains(&self.status)
    }
}

/// Request that asks the engine to hijack the connection.
#[derive(Debug, Clone)]
pub struct UpgradeRequest {
    method: Method,
    path: String,
    query: Vec<(String, String)>,
    headers: Vec<(String, String)>,
    body: Option<Vec<u8>>,
}

impl UpgradeRequest {
    /// Create a request with the headers every hijack needs.
    pub fn new(method: Method, path: impl Into<String>, host: &str) -> Self {
        Self {
            method,
            path: path.into(),
            query: Vec::new(),
            headers: Vec::new(),
            body: None,
        }
        .header("Host", host)
        .header("Connection", "Upgrade")
        .header("Upgrade", hijack_const::UPGRADE_PROTOCOL)
    }

    /// Append a query parameter.
    pub fn query(mut self, key: impl Into<String>, value: impl ToString) -> Self {
        self.query.push((key.into(), value.to_string()));
        self
    }

    /// Set a header, replacing any existing one with the same name.
    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        let name = name.into();
        let value = value.into();
        match self
            .headers
            .iter_mut()
            .find(|(existing, _)| existing.eq_ignore_ascii_case(&name))
        {
            Some(slot) => slot.1 = value,
            None => self.headers.push((name, value)),
        }
        self
    }

    /// Attach a raw body. Defaults `Content-Type` to JSON when unset.
    pub fn body(mut self, body: impl Into<Vec<u8>>) -> Self {
        self.body = Some(body.into());
        if self.header_value("Content-Type").is_none() {
            self = self.header("Content-Type", "application/json");
        }
        self
    }

    /// Attach a JSON-encoded body.
    pub fn json_body<T: Serialize>(self, value: &T) -> DocklineResult<Self> {
        Ok(self.body(serde_json::to_vec(value)?))
    }

    pub fn method(&self) -> &Method {
        &self.method
    }

    pub fn header_value(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(existing, _)| existing.eq_ignore_ascii_case(name))
            .map(|(_, value)| value.as_str())
    }

    pub fn body_bytes(&self) -> Option<&[u8]> {
        self.body.as_deref()
    }

    /// Request target: path plus form-encoded query string.
    pub fn target(&self) -> String {
        encode_target(&self.path, &self.query)
    }

    /// Encode the request line and headers, terminated by an empty line.
    ///
    /// `Content-Length` always reflects the attached body.
    ///
    /// # Errors
    ///
    /// [`DocklineError::InvalidArgument`] if the path or any header name or
    /// value contains CR or LF.
    pub fn encode_head(&self) -> DocklineResult<Vec<u8>> {
        check_head_field("request path", &self.path)?;
        let mut head = format!("{} {} HTTP/1.1\r\n", self.method, self.target());
        for (name, value) in &self.headers {
            check_head_field("header name", name)?;
            check_head_field("header value", value)?;
            if name.eq_ignore_ascii_case("Content-Length") {
                continue;
            }
            head.push_str(&format!("{}: {}\r\n", name, value));
        }
        if let Some(body) = &self.body {
            head.push_str(&format!("Content-Length: {}\r\n", body.len()));
        }
        head.push_str("\r\n");
        Ok(head.into_bytes())
    }
}

fn check_head_field(what: &str, field: &str) -> DocklineResult<()> {
    if field.contains(['\r', '\n']) {
        return Err(DocklineError::InvalidArgument(format!(
            "{} contains a line break: {:?}",
            what, field
        )));
    }
    Ok(())
}

/// Join a path and form-encoded query pairs into a request target.
pub(crate) fn encode_target(path: &str, query: &[(String, String)]) -> String {
    if query.is_empty() {
        return path.to_string();
    }
    let query = query
        .iter()
        .map(|(k, v)| format!("{}={}", urlencoding::encode(k), urlencoding::encode(v)))
        .collect::<Vec<_>>()
        .join("&");
    format!("{}?{}", path, query)
}

/// Read an HTTP/1.1 response head from `reader`.
///
/// Reads arbitrary-size chunks and rescans the whole buffer for the header
/// terminator after each one; response heads are small.
pub async fn read_http11_headers<R>(reader: &mut R) -> DocklineResult<HandshakeResult>
where
    R: AsyncRead + Unpin + ?Sized,
{
    let mut chunk = vec![0u8; hijack_const::READ_CHUNK];
    let mut acc: Vec<u8> = Vec::with_capacity(hijack_const::READ_CHUNK);

    loop {
        let n = reader.read(&mut chunk).await?;
        if n == 0 {
            return Err(DocklineError::Protocol(
                "EOF while reading HTTP headers".to_string(),
            ));
        }
        acc.extend_from_slice(&chunk[..n]);

        if let Some(end) = find_header_end(&acc) {
            let leftover = acc.split_off(end + hijack_const::HEADER_TERMINATOR.len());
            let head = String::from_utf8_lossy(&acc);
            tracing::debug!("Response headers: {}", head.trim_end());

            let status = parse_status_line(&head)?;
            return Ok(HandshakeResult { status, leftover });
        }

        if acc.len() > hijack_const::MAX_HEADER_BYTES {
            return Err(DocklineError::Protocol(format!(
                "HTTP response head exceeds {} bytes",
                hijack_const::MAX_HEADER_BYTES
            )));
        }
    }
}

fn find_header_end(buf: &[u8]) -> Option<usize> {
    buf.windows(hijack_const::HEADER_TERMINATOR.len())
        .position(|window| window == hijack_const::HEADER_TERMINATOR)
}

/// Status code is the second space-separated token of the first line.
fn parse_status_line(head: &str) -> DocklineResult<u16> {
    let status_line = head.lines().next().unwrap_or_default();
    status_line
        .split(' ')
        .nth(1)
        .and_then(|token| token.parse::<u16>().ok())
        .ok_or_else(|| DocklineError::Protocol(format!("bad HTTP status line: {}", status_line)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use std::collections::VecDeque;
    use std::pin::Pin;
    use std::task::{Context, Poll};
    use tokio::io::ReadBuf;

    /// Hands out one scripted chunk per read.
    struct ChunkedReader {
        chunks: VecDeque<Vec<u8>>,
    }

    impl AsyncRead for ChunkedReader {
        fn poll_read(
            mut self: Pin<&mut Self>,
            _cx: &mut Context<'_>,
            buf: &mut ReadBuf<'_>,
        ) -> Poll<std::io::Result<()>> {
            if let Some(mut chunk) = self.chunks.pop_front() {
                let n = chunk.len().min(buf.remaining());
                buf.put_slice(&chunk[..n]);
                if n < chunk.len() {
                    self.chunks.push_front(chunk.split_off(n));
                }
            }
            Poll::Ready(Ok(()))
        }
    }

    #[test]
    fn test_encode_head_with_body() {
        let request = UpgradeRequest::new(Method::POST, "/v1.51/exec/abc/start", "docker")
            .body(br#"{"Detach":false}"#.to_vec());
        let head = String::from_utf8(request.encode_head().unwrap()).unwrap();
        assert_eq!(
            head,
            "POST /v1.51/exec/abc/start HTTP/1.1\r\n\
             Host: docker\r\n\
             Connection: Upgrade\r\n\
             Upgrade: tcp\r\n\
             Content-Type: application/json\r\n\
             Content-Length: 16\r\n\
             \r\n"
        );
    }

    #[test]
    fn test_encode_head_without_body_has_no_length() {
        let request = UpgradeRequest::new(Method::POST, "/containers/c1/attach", "docker")
            .query("stream", 1)
            .query("stdin", true);
        let head = String::from_utf8(request.encode_head().unwrap()).unwrap();
        assert!(head.starts_with("POST /containers/c1/attach?stream=1&stdin=true HTTP/1.1\r\n"));
        assert!(!head.contains("Content-Length"));
        assert!(!head.contains("Content-Type"));
        assert!(head.ends_with("\r\n\r\n"));
    }

    #[test]
    fn test_header_replaces_case_insensitively() {
        let request = UpgradeRequest::new(Method::GET, "/", "docker")
            .header("host", "engine")
            .header("content-length", "999")
            .body(b"ab".to_vec());
        let head = String::from_utf8(request.encode_head().unwrap()).unwrap();
        assert!(head.contains("Host: engine\r\n"));
        assert!(!head.contains("Host: docker"));
        assert!(head.contains("Content-Length: 2\r\n"));
        assert!(!head.contains("999"));
    }

    #[rstest::rstest]
    #[case("X-Note", "a\r\nInjected: 1")]
    #[case("X-Note", "trailing\n")]
    #[case("X-Bad\r\nName", "v")]
    fn test_line_breaks_in_headers_rejected(#[case] name: &str, #[case] value: &str) {
        let request =
            UpgradeRequest::new(Method::POST, "/exec/e1/start", "docker").header(name, value);
        let err = request.encode_head().unwrap_err();
        assert!(matches!(err, DocklineError::InvalidArgument(_)));
    }

    #[test]
    fn test_line_break_in_host_rejected() {
        let request = UpgradeRequest::new(Method::GET, "/_ping", "docker\r\n\r\nGET /evil");
        assert!(matches!(
            request.encode_head(),
            Err(DocklineError::InvalidArgument(_))
        ));
    }

    #[test]
    fn test_query_is_encoded() {
        let request = UpgradeRequest::new(Method::GET, "/events", "docker")
            .query("filters", r#"{"type":["container"]}"#);
        assert_eq!(
            request.target(),
            "/events?filters=%7B%22type%22%3A%5B%22container%22%5D%7D"
        );
    }

    #[tokio::test]
    async fn test_leftover_after_split_header() {
        let mut reader = tokio_test::io::Builder::new()
            .read(b"HTTP/1.1 101 UPGRADE\r\nX: ")
            .read(b"y\r\n\r\nhello")
            .build();
        let result = read_http11_headers(&mut reader).await.unwrap();
        assert_eq!(result.status, 101);
        assert!(result.is_upgraded());
        assert_eq!(result.leftover, b"hello");
    }

    #[tokio::test]
    async fn test_terminator_split_across_reads() {
        let mut reader = tokio_test::io::Builder::new()
            .read(b"HTTP/1.1 200 OK\r\n\r")
            .read(b"\nabc")
            .build();
        let result = read_http11_headers(&mut reader).await.unwrap();
        assert_eq!(result.status, 200);
        assert_eq!(result.leftover, b"abc");
    }

    #[tokio::test]
    async fn test_eof_before_terminator_is_protocol_error() {
        let mut reader = tokio_test::io::Builder::new()
            .read(b"HTTP/1.1 101 UPGRADE\r\n")
            .build();
        let err = read_http11_headers(&mut reader).await.unwrap_err();
        assert!(matches!(err, DocklineError::Protocol(_)));
        assert!(err.to_string().contains("EOF"));
    }

    #[tokio::test]
    async fn test_non_numeric_status_is_protocol_error() {
        let mut reader = tokio_test::io::Builder::new()
            .read(b"HTTP/1.1 abc Weird\r\n\r\n")
            .build();
        let err = read_http11_headers(&mut reader).await.unwrap_err();
        assert!(err.to_string().contains("bad HTTP status line"));
    }

    #[tokio::test]
    async fn test_error_status_is_parsed_not_rejected() {
        let mut reader = tokio_test::io::Builder::new()
            .read(b"HTTP/1.1 404 Not Found\r\nContent-Length: 0\r\n\r\n")
            .build();
        let result = read_http11_headers(&mut reader).await.unwrap();
        assert_eq!(result.status, 404);
        assert!(!result.is_upgraded());
        assert!(result.leftover.is_empty());
    }

    #[tokio::test]
    async fn test_oversized_head_is_rejected() {
        let mut reader = ChunkedReader {
            chunks: std::iter::repeat_n(vec![b'x'; 4096], 32).collect(),
        };
        let err = read_http11_headers(&mut reader).await.unwrap_err();
        assert!(err.to_string().contains("exceeds"));
    }

    proptest! {
        #[test]
        fn prop_leftover_preserved_for_any_split(
            leftover in prop::collection::vec(any::<u8>(), 0..256),
            split in 0usize..512,
        ) {
            let mut wire = b"HTTP/1.1 101 UPGRADE\r\n\
                Content-Type: application/vnd.docker.raw-stream\r\n\r\n"
                .to_vec();
            wire.extend_from_slice(&leftover);
            let split = split % (wire.len() + 1);
            let tail = wire.split_off(split);
            let mut reader = ChunkedReader {
                chunks: [wire, tail].into_iter().filter(|c| !c.is_empty()).collect(),
            };

            // Bytes past the head come back as leftover or stay unread, in order.
            let (result, rest) = futures::executor::block_on(async {
                let result = read_http11_headers(&mut reader).await.unwrap();
                let mut rest = Vec::new();
                reader.read_to_end(&mut rest).await.unwrap();
                (result, rest)
            });
            prop_assert_eq!(result.status, 101);
            prop_assert_eq!([result.leftover, rest].concat(), leftover);
        }

        #[test]
        fn prop_single_read_keeps_whole_leftover(
            leftover in prop::collection::vec(any::<u8>(), 0..256),
        ) {
            let mut wire = b"HTTP/1.1 200 OK\r\n\r\n".to_vec();
            wire.extend_from_slice(&leftover);
            let mut reader = ChunkedReader {
                chunks: [wire].into_iter().collect(),
            };

            let result = futures::executor::block_on(read_http11_headers(&mut reader)).unwrap();
            prop_assert_eq!(result.leftover, leftover);
        }
    }
}
