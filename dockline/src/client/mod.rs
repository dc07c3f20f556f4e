//! Engine client entry point.

pub mod http;
pub mod options;

pub use http::{ApiRequest, ApiResponse, BodyReader, HttpClient};
pub use options::ClientOptions;

use crate::api::{ContainersApi, ExecApi, ImagesApi, NetworksApi, SystemApi, VolumesApi};
use crate::hijack::{Connector, connector_for};
use dockline_shared::DocklineResult;
use std::sync::Arc;

/// Client for the engine API.
///
/// Cheap to clone; clones share the connector. Every call opens its own
/// connection, so one client can serve any number of concurrent sessions and
/// requests.
#[derive(Clone)]
pub struct DockerClient {
    options: ClientOptions,
    http: HttpClient,
}

impl DockerClient {
    /// Create a client for the transport in `options`.
    pub fn new(options: ClientOptions) -> DocklineResult<Self> {
        let connector = connector_for(&options.transport);
        Self::with_connector(options, connector)
    }

    /// Create a client that opens connections through `connector`.
    pub fn with_connector(
        options: ClientOptions,
        connector: Arc<dyn Connector>,
    ) -> DocklineResult<Self> {
        options.validate()?;
        tracing::debug!(
            transport = %options.transport,
            api_version = %options.api_version,
            "Created engine client"
        );
        let http = HttpClient::new(
            connector,
            options.api_version.clone(),
            options.host_header.clone(),
        );
        Ok(Self { options, http })
    }

    /// Client configured from `DOCKER_HOST`, defaults otherwise.
    pub fn from_env() -> DocklineResult<Self> {
        Self::new(ClientOptions::from_env()?)
    }

    pub fn options(&self) -> &ClientOptions {
        &self.options
    }

    /// Low-level request access for endpoints without a facade.
    pub fn http(&self) -> &HttpClient {
        &self.http
    }

    pub fn exec(&self) -> ExecApi<'_> {
        ExecApi::new(self)
    }

    pub fn containers(&self) -> ContainersApi<'_> {
        ContainersApi::new(self)
    }

    pub fn images(&self) -> ImagesApi<'_> {
        ImagesApi::new(self)
    }

    pub fn volumes(&self) -> VolumesApi<'_> {
        VolumesApi::new(self)
    }

    pub fn networks(&self) -> NetworksApi<'_> {
        NetworksApi::new(self)
    }

    pub fn system(&self) -> SystemApi<'_> {
        SystemApi::new(self)
    }
}

impl std::fmt::Debug for DockerClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DockerClient")
            .field("transport", &self.options.transport)
            .field("api_version", &self.options.api_version)
            .finish()
    }
}
