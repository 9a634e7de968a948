//! Admission request schema and route classification.
//!
//! The host's interception layer hands over the method, URI and raw body of
//! each runtime API call. Only container creation is subject to the quota.

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

const CREATE_PATH: &str = "/containers/create";

/// One intercepted runtime API call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AdmissionRequest {
    /// HTTP method, e.g. `POST`.
    pub method: String,
    /// Request URI including any version prefix and query string.
    pub uri: String,
    /// Raw request body, if one was forwarded.
    #[serde(default)]
    pub body: Option<Vec<u8>>,
}

impl AdmissionRequest {
    /// Create a request without a body.
    pub fn new(method: impl Into<String>, uri: impl Into<String>) -> Self {
        Self {
            method: method.into(),
            uri: uri.into(),
            body: None,
        }
    }

    /// Attach a body.
    #[must_use]
    pub fn with_body(mut self, body: impl Into<Vec<u8>>) -> Self {
        self.body = Some(body.into());
        self
    }

    /// Which route this request targets.
    #[must_use]
    pub fn route(&self) -> RequestRoute {
        RequestRoute::classify(&self.method, &self.uri)
    }

    /// Decode the body as a container-create payload.
    ///
    /// # Errors
    ///
    /// Returns [`Error::MalformedRequest`] for a missing or undecodable body.
    pub fn create_body(&self) -> Result<CreateContainerBody> {
        match self.body.as_deref() {
            None | Some([]) => Err(Error::malformed_request("empty body")),
            Some(bytes) => CreateContainerBody::from_slice(bytes),
        }
    }
}

/// Classification of an intercepted call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestRoute {
    /// `POST [/vN.NN]/containers/create[?query]`.
    ContainerCreate,
    /// Anything else; passes through unaccounted.
    Other,
}

impl RequestRoute {
    /// Classify a method and URI.
    #[must_use]
    pub fn classify(method: &str, uri: &str) -> Self {
        if !method.eq_ignore_ascii_case("POST") {
            return Self::Other;
        }
        let path = uri.split_once('?').map_or(uri, |(path, _)| path);
        if strip_version(path) == CREATE_PATH {
            Self::ContainerCreate
        } else {
            Self::Other
        }
    }
}

/// Drop a leading `/vN.NN` API version segment, if present.
fn strip_version(path: &str) -> &str {
    let Some(rest) = path.strip_prefix("/v") else {
        return path;
    };
    let end = rest.find('/').unwrap_or(rest.len());
    let (version, tail) = rest.split_at(end);
    let is_version = !version.is_empty()
        && version.starts_with(|c: char| c.is_ascii_digit())
        && version.chars().all(|c| c.is_ascii_digit() || c == '.');
    if is_version { tail } else { path }
}

/// The subset of a container-create payload the quota looks at.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreateContainerBody {
    /// Host-level resource settings.
    #[serde(rename = "HostConfig", default)]
    pub host_config: Option<HostConfig>,
}

/// Host-level resource settings of a create payload.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct HostConfig {
    /// Memory limit in bytes; absent or zero means unlimited.
    #[serde(rename = "Memory", default)]
    pub memory: Option<i64>,
}

impl CreateContainerBody {
    /// Decode a JSON payload.
    ///
    /// # Errors
    ///
    /// Returns [`Error::MalformedRequest`] if the JSON does not decode.
    pub fn from_slice(bytes: &[u8]) -> Result<Self> {
        serde_json::from_slice(bytes).map_err(|e| Error::malformed_request(e.to_string()))
    }

    /// Requested memory limit in bytes; zero when none was given.
    ///
    /// # Errors
    ///
    /// Returns [`Error::MalformedRequest`] for a negative limit.
    pub fn requested_memory(&self) -> Result<u64> {
        let memory = self
            .host_config
            .as_ref()
            .and_then(|hc| hc.memory)
            .unwrap_or(0);
        u64::try_from(memory)
            .map_err(|_| Error::malformed_request(format!("negative memory limit {memory}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classify_create_routes() {
        for uri in [
            "/containers/create",
            "/v1.41/containers/create",
            "/v1.24/containers/create?name=web",
            "/containers/create?name=k8s_app",
        ] {
            assert_eq!(
                RequestRoute::classify("POST", uri),
                RequestRoute::ContainerCreate,
                "{uri}"
            );
        }
    }

    #[test]
    fn test_classify_other_routes() {
        for (method, uri) in [
            ("GET", "/containers/create"),
            ("POST", "/containers/abc/start"),
            ("POST", "/v1.41/containers/create/extra"),
            ("POST", "/vx/containers/create"),
            ("POST", "/images/create"),
            ("DELETE", "/containers/abc"),
        ] {
            assert_eq!(RequestRoute::classify(method, uri), RequestRoute::Other, "{method} {uri}");
        }
    }

    #[test]
    fn test_requested_memory() {
        let body = CreateContainerBody::from_slice(br#"{"Image":"nginx","HostConfig":{"Memory":536870912}}"#);
        assert_eq!(body.and_then(|b| b.requested_memory()), Ok(536_870_912));
    }

    #[test]
    fn test_missing_memory_is_zero() {
        for json in [r#"{"Image":"nginx"}"#, r#"{"HostConfig":{}}"#, r#"{"HostConfig":{"Memory":null}}"#] {
            let body = CreateContainerBody::from_slice(json.as_bytes());
            assert_eq!(body.and_then(|b| b.requested_memory()), Ok(0), "{json}");
        }
    }

    #[test]
    fn test_negative_memory_is_malformed() {
        let body = CreateContainerBody::from_slice(br#"{"HostConfig":{"Memory":-1}}"#);
        assert!(matches!(
            body.and_then(|b| b.requested_memory()),
            Err(Error::MalformedRequest { .. })
        ));
    }

    #[test]
    fn test_invalid_json_is_malformed() {
        let request = AdmissionRequest::new("POST", "/containers/create").with_body("{not json");
        assert!(matches!(request.create_body(), Err(Error::MalformedRequest { .. })));

        let empty = AdmissionRequest::new("POST", "/containers/create");
        assert!(matches!(empty.create_body(), Err(Error::MalformedRequest { .. })));
    }
}
