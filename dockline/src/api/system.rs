//! Engine-wide endpoints.

use super::{Filters, with_filters};
use crate::client::{ApiRequest, DockerClient};
use crate::stream::{JsonLines, decode_json_lines};
use dockline_shared::DocklineResult;

/// Parameters of an event subscription.
#[derive(Clone, Debug, Default)]
pub struct EventsOptions {
    /// Unix timestamp lower bound.
    pub since: Option<i64>,
    /// Unix timestamp upper bound. Without it the stream stays open.
    pub until: Option<i64>,
    /// Engine filters, e.g. `type=[container]`.
    pub filters: Filters,
}

impl EventsOptions {
    pub fn filter(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.filters.entry(key.into()).or_default().push(value.into());
        self
    }
}

/// System endpoints.
pub struct SystemApi<'a> {
    client: &'a DockerClient,
}

impl<'a> SystemApi<'a> {
    pub(crate) fn new(client: &'a DockerClient) -> Self {
        Self { client }
    }

    /// Check that the engine is reachable. Returns the body, normally `OK`.
    pub async fn ping(&self) -> DocklineResult<String> {
        let response = self.client.http().send(ApiRequest::get("/_ping")).await?;
        Ok(response.text())
    }

    pub async fn version(&self) -> DocklineResult<serde_json::Value> {
        self.client
            .http()
            .send(ApiRequest::get("/version"))
            .await?
            .json()
    }

    pub async fn info(&self) -> DocklineResult<serde_json::Value> {
        self.client.http().send(ApiRequest::get("/info")).await?.json()
    }

    /// Subscribe to engine events, one JSON document per line.
    pub async fn events(&self, options: &EventsOptions) -> DocklineResult<JsonLines> {
        let request = ApiRequest::get("/events")
            .query_opt("since", options.since)
            .query_opt("until", options.until);
        let request = with_filters(request, &options.filters)?;
        let reader = self.client.http().stream(request).await?;
        Ok(decode_json_lines(reader))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_filters_accumulate_per_key() {
        let options = EventsOptions::default()
            .filter("type", "container")
            .filter("event", "start")
            .filter("event", "die");
        assert_eq!(
            serde_json::to_string(&options.filters).unwrap(),
            r#"{"event":["start","die"],"type":["container"]}"#
        );
    }
}
