//! Exec instances: create, start, inspect, resize.

use super::{IdResponse, check_tty_size, path_id};
use crate::client::{ApiRequest, DockerClient};
use crate::hijack::{ExecSession, SessionOptions, establish_session};
use dockline_shared::{DocklineError, DocklineResult};
use hyper::Method;
use serde::Serialize;

/// Command to run inside a container.
///
/// Serialized as the engine's exec create body.
#[derive(Clone, Debug, Default, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct ExecCreateOptions {
    pub cmd: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub env: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub working_dir: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user: Option<String>,
    pub attach_stdin: bool,
    pub attach_stdout: bool,
    pub attach_stderr: bool,
    pub tty: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub console_size: Option<[u16; 2]>,
    pub privileged: bool,
}

impl ExecCreateOptions {
    /// Command with stdout and stderr attached.
    pub fn new(command: impl Into<String>) -> Self {
        Self {
            cmd: vec![command.into()],
            attach_stdout: true,
            attach_stderr: true,
            ..Default::default()
        }
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.cmd.push(arg.into());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.cmd.extend(args.into_iter().map(Into::into));
        self
    }

    /// Add a `KEY=value` environment entry.
    pub fn env(mut self, key: impl Into<String>, val: impl Into<String>) -> Self {
        self.env
            .get_or_insert_with(Vec::new)
            .push(format!("{}={}", key.into(), val.into()));
        self
    }

    pub fn working_dir(mut self, dir: impl Into<String>) -> Self {
        self.working_dir = Some(dir.into());
        self
    }

    pub fn user(mut self, user: impl Into<String>) -> Self {
        self.user = Some(user.into());
        self
    }

    /// Allocate a pty. Output then arrives as raw text, not frames.
    pub fn tty(mut self, enable: bool) -> Self {
        self.tty = enable;
        self
    }

    /// Attach stdin so the session can send input.
    pub fn interactive(mut self) -> Self {
        self.attach_stdin = true;
        self
    }

    pub fn console_size(mut self, height: u16, width: u16) -> Self {
        self.console_size = Some([height, width]);
        self
    }
}

/// How to start an interactive exec.
#[derive(Clone, Debug)]
pub struct ExecStartOptions {
    /// Must match the `Tty` the exec was created with.
    pub tty: bool,

    /// Initial terminal size as (height, width).
    pub console_size: Option<(u16, u16)>,
}

impl Default for ExecStartOptions {
    fn default() -> Self {
        Self {
            tty: true,
            console_size: None,
        }
    }
}

#[derive(Serialize)]
#[serde(rename_all = "PascalCase")]
struct ExecStartBody {
    detach: bool,
    tty: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    console_size: Option<[u16; 2]>,
}

/// Exec endpoints.
pub struct ExecApi<'a> {
    client: &'a DockerClient,
}

impl<'a> ExecApi<'a> {
    pub(crate) fn new(client: &'a DockerClient) -> Self {
        Self { client }
    }

    /// Create an exec instance in `container`, returning its id.
    pub async fn create(
        &self,
        container: &str,
        options: &ExecCreateOptions,
    ) -> DocklineResult<String> {
        if options.cmd.is_empty() {
            return Err(DocklineError::InvalidArgument(
                "exec command must not be empty".into(),
            ));
        }
        let container = path_id("container", container)?;
        let request =
            ApiRequest::post(format!("/containers/{}/exec", container)).json_body(options)?;
        let created: IdResponse = self.client.http().send(request).await?.json()?;
        tracing::debug!(container = %container, exec_id = %created.id, "Created exec");
        Ok(created.id)
    }

    /// Start an exec and return without attaching to it.
    pub async fn start_detached(&self, id: &str) -> DocklineResult<()> {
        let id = path_id("exec", id)?;
        let body = ExecStartBody {
            detach: true,
            tty: false,
            console_size: None,
        };
        let request = ApiRequest::post(format!("/exec/{}/start", id)).json_body(&body)?;
        self.client.http().send(request).await?;
        Ok(())
    }

    /// Start an exec over a hijacked connection.
    pub async fn start_interactive(
        &self,
        id: &str,
        options: ExecStartOptions,
    ) -> DocklineResult<ExecSession> {
        let id = path_id("exec", id)?;
        if let Some((height, width)) = options.console_size {
            check_tty_size(height, width)?;
        }
        let body = ExecStartBody {
            detach: false,
            tty: options.tty,
            console_size: options.console_size.map(|(h, w)| [h, w]),
        };

        let http = self.client.http();
        let request = http
            .upgrade(Method::POST, &format!("/exec/{}/start", id))
            .json_body(&body)?;
        let session = establish_session(
            http.connector(),
            &request,
            SessionOptions {
                tty: options.tty,
                incoming_capacity: self.client.options().incoming_capacity,
            },
        )
        .await?;
        tracing::debug!(exec_id = %id, session_id = %session.id(), "Exec attached");
        Ok(session)
    }

    pub async fn inspect(&self, id: &str) -> DocklineResult<serde_json::Value> {
        let id = path_id("exec", id)?;
        self.client
            .http()
            .send(ApiRequest::get(format!("/exec/{}/json", id)))
            .await?
            .json()
    }

    /// Resize the exec's pty. Only valid for execs created with a tty.
    pub async fn resize(&self, id: &str, height: u16, width: u16) -> DocklineResult<()> {
        let id = path_id("exec", id)?;
        check_tty_size(height, width)?;
        let request = ApiRequest::post(format!("/exec/{}/resize", id))
            .query("h", height)
            .query("w", width);
        self.client.http().send(request).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_create_body_uses_engine_field_names() {
        let options = ExecCreateOptions::new("sh")
            .args(["-c", "echo hi"])
            .env("TERM", "xterm")
            .working_dir("/work")
            .tty(true)
            .interactive();
        assert_eq!(
            serde_json::to_value(&options).unwrap(),
            json!({
                "Cmd": ["sh", "-c", "echo hi"],
                "Env": ["TERM=xterm"],
                "WorkingDir": "/work",
                "AttachStdin": true,
                "AttachStdout": true,
                "AttachStderr": true,
                "Tty": true,
                "Privileged": false,
            })
        );
    }

    #[test]
    fn test_interactive_start_body() {
        let body = ExecStartBody {
            detach: false,
            tty: true,
            console_size: Some([24, 80]),
        };
        assert_eq!(
            serde_json::to_string(&body).unwrap(),
            r#"{"Detach":false,"Tty":true,"ConsoleSize":[24,80]}"#
        );
    }

    #[test]
    fn test_start_defaults_to_tty() {
        let options = ExecStartOptions::default();
        assert!(options.tty);
        assert!(options.console_size.is_none());
    }
}
