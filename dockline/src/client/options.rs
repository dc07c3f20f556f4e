//! Client configuration.

use dockline_shared::constants::{api as api_const, hijack as hijack_const};
use dockline_shared::{DocklineError, DocklineResult, Transport};
use serde::{Deserialize, Serialize};

/// Configuration for [`DockerClient`](super::DockerClient).
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClientOptions {
    /// Where the engine listens.
    ///
    /// Default: `unix:///var/run/docker.sock`
    #[serde(default)]
    pub transport: Transport,

    /// API version prefixed to every path (`/v{api_version}/...`).
    #[serde(default = "default_api_version")]
    pub api_version: String,

    /// `Host` header sent on every request. The engine does not check it on
    /// a Unix socket.
    #[serde(default = "default_host_header")]
    pub host_header: String,

    /// Decoded lines buffered per session before the reader waits for the
    /// consumer.
    #[serde(default = "default_incoming_capacity")]
    pub incoming_capacity: usize,
}

fn default_api_version() -> String {
    api_const::VERSION.to_string()
}

fn default_host_header() -> String {
    api_const::DEFAULT_HOST.to_string()
}

fn default_incoming_capacity() -> usize {
    hijack_const::DEFAULT_INCOMING_CAPACITY
}

impl Default for ClientOptions {
    fn default() -> Self {
        Self {
            transport: Transport::default(),
            api_version: default_api_version(),
            host_header: default_host_header(),
            incoming_capacity: default_incoming_capacity(),
        }
    }
}

impl ClientOptions {
    /// Options for a Unix socket at `socket_path`, defaults otherwise.
    pub fn unix(socket_path: impl Into<std::path::PathBuf>) -> Self {
        Self {
            transport: Transport::unix(socket_path),
            ..Default::default()
        }
    }

    /// Defaults, with the transport taken from `DOCKER_HOST` when set.
    pub fn from_env() -> DocklineResult<Self> {
        Self::from_docker_host(std::env::var(api_const::DOCKER_HOST_ENV).ok().as_deref())
    }

    fn from_docker_host(docker_host: Option<&str>) -> DocklineResult<Self> {
        let mut options = Self::default();
        if let Some(uri) = docker_host.map(str::trim).filter(|uri| !uri.is_empty()) {
            options.transport = Transport::from_uri(uri).map_err(|e| {
                DocklineError::Config(format!("{}: {}", api_const::DOCKER_HOST_ENV, e))
            })?;
        }
        Ok(options)
    }

    /// Check values that would otherwise fail on first use.
    pub fn validate(&self) -> DocklineResult<()> {
        if self.api_version.is_empty() {
            return Err(DocklineError::Config("api_version must not be empty".into()));
        }
        if self.host_header.is_empty() {
            return Err(DocklineError::Config("host_header must not be empty".into()));
        }
        if self.incoming_capacity == 0 {
            return Err(DocklineError::Config(
                "incoming_capacity must be at least 1".into(),
            ));
        }
        Ok(())
    }
}
