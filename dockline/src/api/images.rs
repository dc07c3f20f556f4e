//! Image endpoints.

use super::{Filters, path_id, with_filters};
use crate::client::{ApiRequest, DockerClient};
use crate::stream::{JsonLines, decode_json_lines};
use dockline_shared::DocklineResult;
use hyper::Method;

/// Image endpoints.
pub struct ImagesApi<'a> {
    client: &'a DockerClient,
}

impl<'a> ImagesApi<'a> {
    pub(crate) fn new(client: &'a DockerClient) -> Self {
        Self { client }
    }

    /// List images; intermediate layers only when `all` is set.
    pub async fn list(
        &self,
        all: bool,
        filters: &Filters,
    ) -> DocklineResult<Vec<serde_json::Value>> {
        let request = with_filters(ApiRequest::get("/images/json").query("all", all), filters)?;
        self.client.http().send(request).await?.json()
    }

    /// Pull `image` from its registry.
    ///
    /// The engine reports progress as one JSON document per line and the pull
    /// is done when the stream ends. A failure part way through arrives as a
    /// document with an `error` field, not as an error status.
    pub async fn pull(&self, image: &str, tag: Option<&str>) -> DocklineResult<JsonLines> {
        path_id("image", image)?;
        let request = ApiRequest::post("/images/create")
            .query("fromImage", image)
            .query_opt("tag", tag);
        let reader = self.client.http().stream(request).await?;
        tracing::debug!(image, tag, "Pulling image");
        Ok(decode_json_lines(reader))
    }

    pub async fn inspect(&self, name: &str) -> DocklineResult<serde_json::Value> {
        let name = path_id("image", name)?;
        self.client
            .http()
            .send(ApiRequest::get(format!("/images/{}/json", name)))
            .await?
            .json()
    }

    /// Parent layers, newest first.
    pub async fn history(&self, name: &str) -> DocklineResult<Vec<serde_json::Value>> {
        let name = path_id("image", name)?;
        self.client
            .http()
            .send(ApiRequest::get(format!("/images/{}/history", name)))
            .await?
            .json()
    }

    /// Add `repo[:tag]` as a name for the image.
    pub async fn tag(&self, name: &str, repo: &str, tag: Option<&str>) -> DocklineResult<()> {
        let name = path_id("image", name)?;
        let request = ApiRequest::post(format!("/images/{}/tag", name))
            .query("repo", repo)
            .query_opt("tag", tag);
        self.client.http().send(request).await?;
        Ok(())
    }

    /// Remove an image. Returns the engine's list of untagged and deleted
    /// references.
    pub async fn remove(
        &self,
        name: &str,
        force: bool,
        no_prune: bool,
    ) -> DocklineResult<Vec<serde_json::Value>> {
        let name = path_id("image", name)?;
        let request = ApiRequest::new(Method::DELETE, format!("/images/{}", name))
            .query("force", force)
            .query("noprune", no_prune);
        self.client.http().send(request).await?.json()
    }

    /// Delete unused images.
    pub async fn prune(&self, filters: &Filters) -> DocklineResult<serde_json::Value> {
        let request = with_filters(ApiRequest::post("/images/prune"), filters)?;
        self.client.http().send(request).await?.json()
    }
}
