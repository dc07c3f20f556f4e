//! Thin facades over engine endpoints.
//!
//! Each facade borrows the [`DockerClient`](crate::DockerClient) and maps one
//! method to one endpoint. Responses the crate does not model are returned as
//! [`serde_json::Value`].

pub mod containers;
pub mod exec;
pub mod images;
pub mod networks;
pub mod system;
pub mod volumes;

pub use containers::{AttachOptions, ContainersApi, LogsOptions};
pub use exec::{ExecApi, ExecCreateOptions, ExecStartOptions};
pub use images::ImagesApi;
pub use networks::NetworksApi;
pub use system::{EventsOptions, SystemApi};
pub use volumes::VolumesApi;

use crate::client::ApiRequest;
use dockline_shared::{DocklineError, DocklineResult};
use serde::Deserialize;
use std::collections::BTreeMap;

/// Engine list filters, e.g. `dangling=[true]`. Sent JSON-encoded.
pub type Filters = BTreeMap<String, Vec<String>>;

/// `{"Id": ...}` body returned by create calls.
#[derive(Deserialize)]
pub(crate) struct IdResponse {
    #[serde(rename = "Id")]
    pub(crate) id: String,
}

/// Attach `filters` as the `filters` query parameter unless empty.
pub(crate) fn with_filters(request: ApiRequest, filters: &Filters) -> DocklineResult<ApiRequest> {
    if filters.is_empty() {
        return Ok(request);
    }
    Ok(request.query("filters", serde_json::to_string(filters)?))
}

/// Validate an object id and encode it as a path segment.
pub(crate) fn path_id(kind: &str, id: &str) -> DocklineResult<String> {
    if id.trim().is_empty() {
        return Err(DocklineError::InvalidArgument(format!(
            "{} id must not be empty",
            kind
        )));
    }
    Ok(urlencoding::encode(id).into_owned())
}

/// Validate terminal dimensions for a resize call.
pub(crate) fn check_tty_size(height: u16, width: u16) -> DocklineResult<()> {
    if height == 0 || width == 0 {
        return Err(DocklineError::InvalidArgument(format!(
            "tty size must be non-zero, got {}x{}",
            height, width
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_path_id_rejects_blank() {
        assert!(matches!(
            path_id("exec", " "),
            Err(DocklineError::InvalidArgument(_))
        ));
    }

    #[test]
    fn test_path_id_encodes_separators() {
        assert_eq!(path_id("container", "web/1").unwrap(), "web%2F1");
        assert_eq!(path_id("container", "abc123").unwrap(), "abc123");
    }

    #[test]
    fn test_filters_query() {
        let mut filters = Filters::new();
        filters.insert("dangling".into(), vec!["true".into()]);
        let request = with_filters(ApiRequest::get("/images/json"), &filters).unwrap();
        assert_eq!(
            request.target("1.51"),
            "/v1.51/images/json?filters=%7B%22dangling%22%3A%5B%22true%22%5D%7D"
        );

        let request = with_filters(ApiRequest::get("/volumes"), &Filters::new()).unwrap();
        assert_eq!(request.target("1.51"), "/v1.51/volumes");
    }

    #[test]
    fn test_zero_tty_size_rejected() {
        assert!(check_tty_size(0, 80).is_err());
        assert!(check_tty_size(24, 0).is_err());
        assert!(check_tty_size(24, 80).is_ok());
    }
}
