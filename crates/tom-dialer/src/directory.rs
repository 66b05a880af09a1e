//! HTTP client for the endpoint directory: registration and bound-endpoint
//! listing.

use std::collections::HashSet;
use std::time::Duration;

use reqwest::RequestBuilder;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use url::Url;

pub const API_VERSION_HEADER: &str = "Ngrok-Version";
pub const API_VERSION: &str = "2";

#[derive(Debug, thiserror::Error)]
pub enum DirectoryError {
    #[error("request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("directory returned {status}: {body}")]
    Status { status: u16, body: String },

    #[error("unexpected response body: {0}")]
    Decode(#[source] serde_json::Error),

    #[error("invalid directory url: {0}")]
    InvalidUrl(String),
}

// ── Wire types ──────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RegistrationRequest {
    #[serde(skip_serializing_if = "String::is_empty")]
    pub description: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub metadata: String,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub enabled_features: Vec<String>,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub region: String,
    pub binding: BindingRequest,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BindingRequest {
    pub endpoint_selectors: Vec<String>,
    pub csr: String,
}

impl RegistrationRequest {
    /// Registration for a dialer that only opens bindings.
    pub fn for_bindings(endpoint_selectors: Vec<String>, csr: String) -> Self {
        Self {
            description: "tom-dialer binding client".to_string(),
            metadata: r#"{"type":"sdk"}"#.to_string(),
            enabled_features: vec!["bindings".to_string()],
            region: "global".to_string(),
            binding: BindingRequest {
                endpoint_selectors,
                csr,
            },
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct RegistrationResponse {
    pub id: String,
    #[serde(default)]
    pub binding: Option<BindingResponse>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct BindingResponse {
    #[serde(default)]
    pub cert: IssuedCertificate,
    #[serde(default)]
    pub ingress_endpoint: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct IssuedCertificate {
    #[serde(default)]
    pub cert: String,
    #[serde(default)]
    pub not_before: String,
    #[serde(default)]
    pub not_after: String,
}

/// One endpoint as the directory lists it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawEndpoint {
    pub id: String,
    pub url: String,
    #[serde(default)]
    pub proto: String,
    #[serde(default)]
    pub port: u32,
    #[serde(default)]
    pub bindings: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct EndpointList {
    #[serde(default)]
    endpoints: Vec<RawEndpoint>,
}

// ── Client ──────────────────────────────────────────────────────────

pub struct DirectoryClient {
    base_url: Url,
    api_key: String,
    binding_kind: String,
    http: reqwest::Client,
}

impl std::fmt::Debug for DirectoryClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DirectoryClient")
            .field("base_url", &self.base_url.as_str())
            .field("binding_kind", &self.binding_kind)
            .finish_non_exhaustive()
    }
}

impl DirectoryClient {
    pub fn new(
        base_url: &str,
        api_key: impl Into<String>,
        binding_kind: impl Into<String>,
        timeout: Duration,
    ) -> Result<Self, DirectoryError> {
        let base_url =
            Url::parse(base_url).map_err(|e| DirectoryError::InvalidUrl(format!("{base_url}: {e}")))?;
        if base_url.cannot_be_a_base() {
            return Err(DirectoryError::InvalidUrl(base_url.to_string()));
        }
        let http = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            base_url,
            api_key: api_key.into(),
            binding_kind: binding_kind.into(),
            http,
        })
    }

    fn url(&self, segments: &[&str]) -> Result<Url, DirectoryError> {
        let mut url = self.base_url.clone();
        url.path_segments_mut()
            .map_err(|()| DirectoryError::InvalidUrl(self.base_url.to_string()))?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }

    async fn send<T: DeserializeOwned>(&self, req: RequestBuilder) -> Result<T, DirectoryError> {
        let resp = req
            .bearer_auth(&self.api_key)
            .header(API_VERSION_HEADER, API_VERSION)
            .send()
            .await?;
        let status = resp.status();
        let body = resp.bytes().await?;
        if !status.is_success() {
            return Err(DirectoryError::Status {
                status: status.as_u16(),
                body: String::from_utf8_lossy(&body).trim().to_string(),
            });
        }
        serde_json::from_slice(&body).map_err(DirectoryError::Decode)
    }

    /// Register a CSR and receive the signed certificate.
    pub async fn register(
        &self,
        request: &RegistrationRequest,
    ) -> Result<RegistrationResponse, DirectoryError> {
        let url = self.url(&["registrations"])?;
        self.send(self.http.post(url).json(request)).await
    }

    /// Endpoints bound to `registration_id`, narrowed to those carrying our
    /// binding kind. If the narrowing lookup fails, the unfiltered list is
    /// returned.
    pub async fn list_bound_endpoints(
        &self,
        registration_id: &str,
    ) -> Result<Vec<RawEndpoint>, DirectoryError> {
        let url = self.url(&["registrations", registration_id, "bound_endpoints"])?;
        let listed: EndpointList = self.send(self.http.get(url)).await?;

        match self.endpoint_ids_with_binding().await {
            Ok(allowed) => {
                let before = listed.endpoints.len();
                let kept: Vec<_> = listed
                    .endpoints
                    .into_iter()
                    .filter(|ep| allowed.contains(&ep.id))
                    .collect();
                if kept.len() != before {
                    tracing::debug!(
                        dropped = before - kept.len(),
                        binding = %self.binding_kind,
                        "bound endpoints without binding filtered out"
                    );
                }
                Ok(kept)
            }
            Err(e) => {
                tracing::warn!("binding cross-check failed, using unfiltered endpoint list: {e}");
                Ok(listed.endpoints)
            }
        }
    }

    async fn endpoint_ids_with_binding(&self) -> Result<HashSet<String>, DirectoryError> {
        let url = self.url(&["endpoints"])?;
        let all: EndpointList = self.send(self.http.get(url)).await?;
        Ok(all
            .endpoints
            .into_iter()
            .filter(|ep| ep.bindings.iter().any(|b| *b == self.binding_kind))
            .map(|ep| ep.id)
            .collect())
    }
}
