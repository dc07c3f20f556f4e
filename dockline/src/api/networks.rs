//! Network endpoints.

use super::{Filters, IdResponse, path_id, with_filters};
use crate::client::{ApiRequest, DockerClient};
use dockline_shared::DocklineResult;
use hyper::Method;
use serde::Serialize;

/// Body of connect and disconnect calls.
#[derive(Serialize)]
#[serde(rename_all = "PascalCase")]
struct AttachmentBody<'a> {
    container: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    force: Option<bool>,
}

/// Network endpoints.
pub struct NetworksApi<'a> {
    client: &'a DockerClient,
}

impl<'a> NetworksApi<'a> {
    pub(crate) fn new(client: &'a DockerClient) -> Self {
        Self { client }
    }

    pub async fn list(&self, filters: &Filters) -> DocklineResult<Vec<serde_json::Value>> {
        let request = with_filters(ApiRequest::get("/networks"), filters)?;
        self.client.http().send(request).await?.json()
    }

    pub async fn inspect(&self, id: &str, verbose: bool) -> DocklineResult<serde_json::Value> {
        let id = path_id("network", id)?;
        let request = ApiRequest::get(format!("/networks/{}", id)).query("verbose", verbose);
        self.client.http().send(request).await?.json()
    }

    /// Create a network from an engine network config document and return
    /// its id.
    pub async fn create<T: Serialize>(&self, config: &T) -> DocklineResult<String> {
        let request = ApiRequest::post("/networks/create").json_body(config)?;
        let created: IdResponse = self.client.http().send(request).await?.json()?;
        tracing::debug!(network = %created.id, "Created network");
        Ok(created.id)
    }

    pub async fn remove(&self, id: &str) -> DocklineResult<()> {
        let id = path_id("network", id)?;
        self.client
            .http()
            .send(ApiRequest::new(Method::DELETE, format!("/networks/{}", id)))
            .await?;
        Ok(())
    }

    pub async fn connect(&self, id: &str, container: &str) -> DocklineResult<()> {
        let id = path_id("network", id)?;
        path_id("container", container)?;
        let body = AttachmentBody {
            container,
            force: None,
        };
        let request = ApiRequest::post(format!("/networks/{}/connect", id)).json_body(&body)?;
        self.client.http().send(request).await?;
        Ok(())
    }

    pub async fn disconnect(&self, id: &str, container: &str, force: bool) -> DocklineResult<()> {
        let id = path_id("network", id)?;
        path_id("container", container)?;
        let body = AttachmentBody {
            container,
            force: Some(force),
        };
        let request = ApiRequest::post(format!("/networks/{}/disconnect", id)).json_body(&body)?;
        self.client.http().send(request).await?;
        Ok(())
    }

    /// Delete unused networks.
    pub async fn prune(&self, filters: &Filters) -> DocklineResult<serde_json::Value> {
        let request = with_filters(ApiRequest::post("/networks/prune"), filters)?;
        self.client.http().send(request).await?.json()
    }
}
