//! Volume endpoints.

use super::{Filters, path_id, with_filters};
use crate::client::{ApiRequest, DockerClient};
use dockline_shared::DocklineResult;
use hyper::Method;
use serde::Serialize;

/// Volume endpoints.
pub struct VolumesApi<'a> {
    client: &'a DockerClient,
}

impl<'a> VolumesApi<'a> {
    pub(crate) fn new(client: &'a DockerClient) -> Self {
        Self { client }
    }

    /// List volumes. The engine wraps them as `{"Volumes": [...], "Warnings": [...]}`.
    pub async fn list(&self, filters: &Filters) -> DocklineResult<serde_json::Value> {
        let request = with_filters(ApiRequest::get("/volumes"), filters)?;
        self.client.http().send(request).await?.json()
    }

    /// Create a volume from an engine volume config document.
    pub async fn create<T: Serialize>(&self, config: &T) -> DocklineResult<serde_json::Value> {
        let request = ApiRequest::post("/volumes/create").json_body(config)?;
        self.client.http().send(request).await?.json()
    }

    pub async fn inspect(&self, name: &str) -> DocklineResult<serde_json::Value> {
        let name = path_id("volume", name)?;
        self.client
            .http()
            .send(ApiRequest::get(format!("/volumes/{}", name)))
            .await?
            .json()
    }

    pub async fn remove(&self, name: &str, force: bool) -> DocklineResult<()> {
        let name = path_id("volume", name)?;
        let request =
            ApiRequest::new(Method::DELETE, format!("/volumes/{}", name)).query("force", force);
        self.client.http().send(request).await?;
        Ok(())
    }

    /// Delete unused volumes.
    pub async fn prune(&self, filters: &Filters) -> DocklineResult<serde_json::Value> {
        let request = with_filters(ApiRequest::post("/volumes/prune"), filters)?;
        self.client.http().send(request).await?.json()
    }
}
