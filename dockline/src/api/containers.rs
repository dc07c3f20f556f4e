//! Container endpoints: lifecycle, logs, attach, stats.

use super::{IdResponse, check_tty_size, path_id};
use crate::client::{ApiRequest, DockerClient};
use crate::hijack::{ExecSession, SessionOptions, establish_session};
use crate::stream::{JsonLines, LogLines, decode_json_lines, decode_log_lines};
use dockline_shared::DocklineResult;
use dockline_shared::constants::api as api_const;
use hyper::Method;
use serde::Serialize;
use std::time::Duration;

/// Parameters of a log read.
#[derive(Clone, Debug)]
pub struct LogsOptions {
    /// Keep the stream open for new output.
    pub follow: bool,
    pub stdout: bool,
    pub stderr: bool,
    /// Prefix every line with an RFC 3339 timestamp.
    pub timestamps: bool,
    /// Number of lines from the end, or `"all"`.
    pub tail: Option<String>,
    /// Unix timestamp lower bound.
    pub since: Option<i64>,
    /// Unix timestamp upper bound.
    pub until: Option<i64>,
    /// Whole-call deadline after which the stream ends. `None` waits forever.
    pub timeout: Option<Duration>,
}

impl Default for LogsOptions {
    fn default() -> Self {
        Self {
            follow: false,
            stdout: true,
            stderr: true,
            timestamps: false,
            tail: None,
            since: None,
            until: None,
            timeout: Some(Duration::from_secs(api_const::LOGS_TIMEOUT_SECS)),
        }
    }
}

impl LogsOptions {
    pub fn follow(mut self, follow: bool) -> Self {
        self.follow = follow;
        self
    }

    pub fn tail(mut self, tail: impl ToString) -> Self {
        self.tail = Some(tail.to_string());
        self
    }

    pub fn timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }
}

/// Which streams to attach to.
#[derive(Clone, Debug)]
pub struct AttachOptions {
    pub stdin: bool,
    pub stdout: bool,
    pub stderr: bool,
    /// Replay output produced before the attach.
    pub logs: bool,
    /// Key sequence that detaches, e.g. `ctrl-p,ctrl-q`.
    pub detach_keys: Option<String>,
}

impl Default for AttachOptions {
    fn default() -> Self {
        Self {
            stdin: true,
            stdout: true,
            stderr: true,
            logs: false,
            detach_keys: None,
        }
    }
}

/// Container endpoints.
pub struct ContainersApi<'a> {
    client: &'a DockerClient,
}

impl<'a> ContainersApi<'a> {
    pub(crate) fn new(client: &'a DockerClient) -> Self {
        Self { client }
    }

    /// List containers; stopped ones only when `all` is set.
    pub async fn list(&self, all: bool) -> DocklineResult<Vec<serde_json::Value>> {
        self.client
            .http()
            .send(ApiRequest::get("/containers/json").query("all", all))
            .await?
            .json()
    }

    pub async fn inspect(&self, id: &str) -> DocklineResult<serde_json::Value> {
        let id = path_id("container", id)?;
        self.client
            .http()
            .send(ApiRequest::get(format!("/containers/{}/json", id)))
            .await?
            .json()
    }

    /// Whether the container was created with a tty. Decides how its output
    /// is framed.
    pub async fn is_tty(&self, id: &str) -> DocklineResult<bool> {
        let info = self.inspect(id).await?;
        Ok(info
            .pointer("/Config/Tty")
            .and_then(serde_json::Value::as_bool)
            .unwrap_or(false))
    }

    /// Create a container from an engine container config document and
    /// return its id.
    pub async fn create<T: Serialize>(
        &self,
        name: Option<&str>,
        config: &T,
    ) -> DocklineResult<String> {
        let request = ApiRequest::post("/containers/create")
            .query_opt("name", name)
            .json_body(config)?;
        let created: IdResponse = self.client.http().send(request).await?.json()?;
        tracing::debug!(container = %created.id, "Created container");
        Ok(created.id)
    }

    pub async fn start(&self, id: &str) -> DocklineResult<()> {
        self.lifecycle(id, "start").await
    }

    /// Stop a container, killing it after `timeout_secs` if given.
    pub async fn stop(&self, id: &str, timeout_secs: Option<u32>) -> DocklineResult<()> {
        let id = path_id("container", id)?;
        let request =
            ApiRequest::post(format!("/containers/{}/stop", id)).query_opt("t", timeout_secs);
        self.client.http().send(request).await?;
        Ok(())
    }

    /// Restart a container, killing it after `timeout_secs` if given.
    pub async fn restart(&self, id: &str, timeout_secs: Option<u32>) -> DocklineResult<()> {
        let id = path_id("container", id)?;
        let request =
            ApiRequest::post(format!("/containers/{}/restart", id)).query_opt("t", timeout_secs);
        self.client.http().send(request).await?;
        Ok(())
    }

    /// Send a signal to the container's main process. The engine defaults to
    /// `SIGKILL`.
    pub async fn kill(&self, id: &str, signal: Option<&str>) -> DocklineResult<()> {
        let id = path_id("container", id)?;
        let request =
            ApiRequest::post(format!("/containers/{}/kill", id)).query_opt("signal", signal);
        self.client.http().send(request).await?;
        Ok(())
    }

    pub async fn pause(&self, id: &str) -> DocklineResult<()> {
        self.lifecycle(id, "pause").await
    }

    pub async fn unpause(&self, id: &str) -> DocklineResult<()> {
        self.lifecycle(id, "unpause").await
    }

    pub async fn remove(&self, id: &str, force: bool) -> DocklineResult<()> {
        let id = path_id("container", id)?;
        let request =
            ApiRequest::new(Method::DELETE, format!("/containers/{}", id)).query("force", force);
        self.client.http().send(request).await?;
        Ok(())
    }

    /// Bodiless `POST /containers/{id}/{action}`.
    async fn lifecycle(&self, id: &str, action: &str) -> DocklineResult<()> {
        let id = path_id("container", id)?;
        self.client
            .http()
            .send(ApiRequest::post(format!("/containers/{}/{}", id, action)))
            .await?;
        tracing::debug!(container = %id, action, "Container lifecycle call");
        Ok(())
    }

    /// Block until the container stops and return its exit code.
    pub async fn wait(&self, id: &str) -> DocklineResult<i64> {
        let id = path_id("container", id)?;
        let response: serde_json::Value = self
            .client
            .http()
            .send(ApiRequest::post(format!("/containers/{}/wait", id)))
            .await?
            .json()?;
        Ok(response
            .get("StatusCode")
            .and_then(serde_json::Value::as_i64)
            .unwrap_or_default())
    }

    /// Read container logs.
    ///
    /// Looks up the container's tty flag first to pick the framing. The
    /// returned stream ends at EOF, on a read error, or when the timeout
    /// elapses.
    pub async fn logs(&self, id: &str, options: LogsOptions) -> DocklineResult<LogLines> {
        let tty = self.is_tty(id).await?;
        let id = path_id("container", id)?;
        let request = ApiRequest::get(format!("/containers/{}/logs", id))
            .query("follow", options.follow)
            .query("timestamps", options.timestamps)
            .query("stdout", options.stdout)
            .query("stderr", options.stderr)
            .query_opt("until", options.until)
            .query_opt("since", options.since)
            .query_opt("tail", options.tail.as_deref());

        let reader = self.client.http().stream(request).await?;
        tracing::debug!(container = %id, tty, follow = options.follow, "Reading container logs");
        let lines = decode_log_lines(reader, tty);
        Ok(match options.timeout {
            Some(timeout) => lines.with_deadline(timeout),
            None => lines,
        })
    }

    /// Attach to a running container's streams over a hijacked connection.
    pub async fn attach(
        &self,
        id: &str,
        options: AttachOptions,
    ) -> DocklineResult<ExecSession> {
        let tty = self.is_tty(id).await?;
        let id = path_id("container", id)?;

        let http = self.client.http();
        let mut request = http
            .upgrade(Method::POST, &format!("/containers/{}/attach", id))
            .query("stream", 1)
            .query("stdin", options.stdin)
            .query("stdout", options.stdout)
            .query("stderr", options.stderr)
            .query("logs", options.logs);
        if let Some(keys) = &options.detach_keys {
            request = request.query("detachKeys", keys);
        }

        let session = establish_session(
            http.connector(),
            &request,
            SessionOptions {
                tty,
                incoming_capacity: self.client.options().incoming_capacity,
            },
        )
        .await?;
        tracing::debug!(container = %id, session_id = %session.id(), tty, "Container attached");
        Ok(session)
    }

    /// Resize the container's tty.
    pub async fn resize(&self, id: &str, height: u16, width: u16) -> DocklineResult<()> {
        let id = path_id("container", id)?;
        check_tty_size(height, width)?;
        let request = ApiRequest::post(format!("/containers/{}/resize", id))
            .query("h", height)
            .query("w", width);
        self.client.http().send(request).await?;
        Ok(())
    }

    /// Resource usage samples, one JSON document per line.
    ///
    /// With `one_shot` the engine sends a single sample and closes the stream.
    pub async fn stats(&self, id: &str, one_shot: bool) -> DocklineResult<JsonLines> {
        let id = path_id("container", id)?;
        let request = ApiRequest::get(format!("/containers/{}/stats", id))
            .query("stream", !one_shot)
            .query("one-shot", one_shot);
        let reader = self.client.http().stream(request).await?;
        Ok(decode_json_lines(reader))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_logs_defaults() {
        let options = LogsOptions::default();
        assert!(options.stdout && options.stderr);
        assert!(!options.follow);
        assert_eq!(options.timeout, Some(Duration::from_secs(100)));
    }

    #[test]
    fn test_logs_builder() {
        let options = LogsOptions::default().follow(true).tail(10).timeout(None);
        assert!(options.follow);
        assert_eq!(options.tail.as_deref(), Some("10"));
        assert!(options.timeout.is_none());
    }

    #[test]
    fn test_attach_defaults_to_all_streams() {
        let options = AttachOptions::default();
        assert!(options.stdin && options.stdout && options.stderr);
        assert!(!options.logs);
    }
}
