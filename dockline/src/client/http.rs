//! Ordinary request/response calls.
//!
//! Each call opens its own connection through the client's [`Connector`] and
//! speaks plain HTTP/1.1 over it with hyper. Hijacked sessions never share
//! these connections.

use crate::hijack::Connector;
use crate::hijack::UpgradeRequest;
use crate::hijack::handshake::encode_target;
use dockline_shared::{DocklineError, DocklineResult};
use futures::stream::{BoxStream, StreamExt, TryStreamExt};
use http_body_util::{BodyExt, BodyStream, Full};
use hyper::body::{Bytes, Incoming};
use hyper::header::{CONTENT_TYPE, HOST};
use hyper::{Method, Request, Response, StatusCode};
use hyper_util::rt::TokioIo;
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::sync::Arc;
use tokio_util::io::StreamReader;

/// Byte stream over a response body.
pub type BodyReader = StreamReader<BoxStream<'static, std::io::Result<Bytes>>, Bytes>;

/// One ordinary API call. The path is relative to the versioned API root.
#[derive(Debug, Clone)]
pub struct ApiRequest {
    method: Method,
    path: String,
    query: Vec<(String, String)>,
    body: Option<Vec<u8>>,
}

impl ApiRequest {
    pub fn new(method: Method, path: impl Into<String>) -> Self {
        Self {
            method,
            path: path.into(),
            query: Vec::new(),
            body: None,
        }
    }

    pub fn get(path: impl Into<String>) -> Self {
        Self::new(Method::GET, path)
    }

    pub fn post(path: impl Into<String>) -> Self {
        Self::new(Method::POST, path)
    }

    pub fn query(mut self, key: impl Into<String>, value: impl ToString) -> Self {
        self.query.push((key.into(), value.to_string()));
        self
    }

    /// Append a query parameter only when `value` is set.
    pub fn query_opt<V: ToString>(self, key: impl Into<String>, value: Option<V>) -> Self {
        match value {
            Some(value) => self.query(key, value),
            None => self,
        }
    }

    pub fn json_body<T: Serialize>(mut self, value: &T) -> DocklineResult<Self> {
        self.body = Some(serde_json::to_vec(value)?);
        Ok(self)
    }

    pub fn method(&self) -> &Method {
        &self.method
    }

    /// Request target under `/v{api_version}`.
    pub fn target(&self, api_version: &str) -> String {
        encode_target(&format!("/v{}{}", api_version, self.path), &self.query)
    }
}

/// Fully collected response.
#[derive(Debug, Clone)]
pub struct ApiResponse {
    pub status: u16,
    pub body: Bytes,
}

impl ApiResponse {
    pub fn json<T: DeserializeOwned>(&self) -> DocklineResult<T> {
        Ok(serde_json::from_slice(&self.body)?)
    }

    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }
}

/// HTTP/1.1 client over raw engine connections.
#[derive(Clone)]
pub struct HttpClient {
    connector: Arc<dyn Connector>,
    api_version: String,
    host: String,
}

impl HttpClient {
    pub fn new(
        connector: Arc<dyn Connector>,
        api_version: impl Into<String>,
        host: impl Into<String>,
    ) -> Self {
        Self {
            connector,
            api_version: api_version.into(),
            host: host.into(),
        }
    }

    pub fn connector(&self) -> &dyn Connector {
        self.connector.as_ref()
    }

    pub fn api_version(&self) -> &str {
        &self.api_version
    }

    /// Start an upgrade request for `path` under the versioned API root.
    pub fn upgrade(&self, method: Method, path: &str) -> UpgradeRequest {
        UpgradeRequest::new(method, format!("/v{}{}", self.api_version, path), &self.host)
    }

    /// Send `request` and collect the whole response body.
    ///
    /// # Errors
    ///
    /// [`DocklineError::Api`] for any non-2xx status.
    pub async fn send(&self, request: ApiRequest) -> DocklineResult<ApiResponse> {
        let response = self.dispatch(request).await?;
        let status = response.status();
        let body = collect(response).await?;
        if !status.is_success() {
            return Err(api_error(status, &body));
        }
        Ok(ApiResponse {
            status: status.as_u16(),
            body,
        })
    }

    /// Send `request` and return the response body as a byte stream.
    ///
    /// The status is checked before the body is handed out; error bodies are
    /// collected into [`DocklineError::Api`].
    pub async fn stream(&self, request: ApiRequest) -> DocklineResult<BodyReader> {
        let response = self.dispatch(request).await?;
        let status = response.status();
        if !status.is_success() {
            let body = collect(response).await?;
            return Err(api_error(status, &body));
        }

        let body = BodyStream::new(response.into_body())
            .try_filter_map(|frame| async move { Ok(frame.into_data().ok()) })
            .map_err(std::io::Error::other)
            .boxed();
        Ok(StreamReader::new(body))
    }

    async fn dispatch(&self, request: ApiRequest) -> DocklineResult<Response<Incoming>> {
        let conn = self.connector.connect().await?;
        let (mut sender, connection) = hyper::client::conn::http1::handshake(TokioIo::new(conn))
            .await
            .map_err(|e| DocklineError::Connection(format!("HTTP handshake failed: {}", e)))?;

        tokio::spawn(async move {
            if let Err(e) = connection.await {
                tracing::debug!(error = %e, "API connection closed");
            }
        });

        let target = request.target(&self.api_version);
        let mut builder = Request::builder()
            .method(request.method.clone())
            .uri(&target)
            .header(HOST, &self.host);
        if request.body.is_some() {
            builder = builder.header(CONTENT_TYPE, "application/json");
        }
        let http_request = builder
            .body(Full::new(Bytes::from(request.body.unwrap_or_default())))
            .map_err(|e| {
                DocklineError::InvalidArgument(format!("invalid request {}: {}", target, e))
            })?;

        tracing::debug!(method = %request.method, target = %target, "Sending API request");
        let response = sender
            .send_request(http_request)
            .await
            .map_err(|e| {
                DocklineError::Connection(format!("{} {} failed: {}", request.method, target, e))
            })?;
        tracing::debug!(status = response.status().as_u16(), target = %target, "API response");
        Ok(response)
    }
}

async fn collect(response: Response<Incoming>) -> DocklineResult<Bytes> {
    Ok(response
        .into_body()
        .collect()
        .await
        .map_err(|e| DocklineError::Connection(format!("failed to read response body: {}", e)))?
        .to_bytes())
}

/// Map an error response to [`DocklineError::Api`], preferring the engine's
/// `{"message": ...}` text over the raw body.
pub(crate) fn api_error(status: StatusCode, body: &[u8]) -> DocklineError {
    #[derive(serde::Deserialize)]
    struct ErrorBody {
        message: String,
    }

    let message = serde_json::from_slice::<ErrorBody>(body)
        .map(|err| err.message)
        .unwrap_or_else(|_| String::from_utf8_lossy(body).trim().to_string());
    DocklineError::Api {
        status: status.as_u16(),
        message,
    }
}
