//! Newline-delimited JSON streams (stats, events).
//!
//! These endpoints are loosely structured: a malformed line is skipped and the
//! stream continues, rather than failing the whole subscription.

use futures::stream::Stream;
use std::pin::Pin;
use std::task::{Context, Poll};
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};

/// Lazy, single-pass sequence of JSON documents, one per line.
pub struct JsonLines {
    inner: Pin<Box<dyn Stream<Item = serde_json::Value> + Send>>,
}

impl Stream for JsonLines {
    type Item = serde_json::Value;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.inner.as_mut().poll_next(cx)
    }
}

/// Decode `reader` as newline-delimited JSON.
///
/// Blank lines are ignored. Lines that fail to parse are logged and skipped.
pub fn decode_json_lines<R>(reader: R) -> JsonLines
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
                Ok(0) => break,
                Ok(_) => {}
                Err(e) => {
                    tracing::debug!(error = %e, "JSON line stream read failed, ending");
                    break;
                }
            }

            let line = buf.trim_ascii();
            if line.is_empty() {
                continue;
            }
            match serde_json::from_slice::<serde_json::Value>(line) {
                Ok(value) => yield value,
                Err(e) => {
                    tracing::debug!(error = %e, "Skipping malformed JSON line");
                }
            }
        }
    };

    JsonLines {
        inner: Box::pin(stream),
    }
}
