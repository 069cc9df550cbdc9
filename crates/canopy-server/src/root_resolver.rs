//! Discovery of the root compartment when running with the machine's own identity.
//!
//! The instance metadata service is asked once; a successful answer is kept for
//! the rest of the process lifetime and never invalidated. Restarting the
//! process is the only way to pick up a different value.

use async_trait::async_trait;
use serde::Deserialize;
use std::sync::{Arc, OnceLock};
use std::time::Duration;

use crate::error::{Result, ServerError};

pub const METADATA_BASE_URL: &str = "http://169.254.169.254/opc/v2";

/// What the instance knows about itself.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstanceIdentity {
    pub root_id: String,
    pub region: String,
}

/// Source of instance metadata.
#[async_trait]
pub trait MetadataSource: Send + Sync {
    async fn instance_identity(&self) -> Result<InstanceIdentity>;
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct InstanceDocument {
    compartment_id: Option<String>,
    canonical_region_name: Option<String>,
    region: Option<String>,
}

/// HTTP client for the local metadata endpoint.
#[derive(Debug, Clone)]
pub struct MetadataClient {
    base_url: String,
    client: reqwest::Client,
    timeout: Duration,
}

impl MetadataClient {
    pub fn new() -> Self {
        Self::with_base_url(METADATA_BASE_URL)
    }

    pub fn with_base_url(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            client: reqwest::Client::new(),
            timeout: Duration::from_secs(10),
        }
    }

    /// GET a metadata path as text.
    pub async fn get_text(&self, path: &str) -> Result<String> {
        let url = format!("{}/{}", self.base_url, path.trim_start_matches('/'));
        let response = self
            .client
            .get(&url)
            .header("Authorization", "Bearer Oracle")
            .timeout(self.timeout)
            .send()
            .await
            .map_err(|e| ServerError::MetadataUnavailable(format!("{}: {}", url, e)))?;

        if !response.status().is_success() {
            return Err(ServerError::MetadataUnavailable(format!(
                "{} returned {}",
                url,
                response.status()
            )));
        }

        response
            .text()
            .await
            .map_err(|e| ServerError::MetadataUnavailable(format!("{}: {}", url, e)))
    }
}

impl Default for MetadataClient {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl MetadataSource for MetadataClient {
    async fn instance_identity(&self) -> Result<InstanceIdentity> {
        let body = self.get_text("instance/").await?;
        parse_instance_document(&body)
    }
}

fn parse_instance_document(body: &str) -> Result<InstanceIdentity> {
    let document: InstanceDocument = serde_json::from_str(body)
        .map_err(|e| ServerError::MetadataUnavailable(format!("malformed instance document: {}", e)))?;

    let root_id = document
        .compartment_id
        .filter(|id| !id.is_empty())
        .ok_or_else(|| ServerError::MetadataUnavailable("instance document has no compartmentId".into()))?;
    let region = document
        .canonical_region_name
        .or(document.region)
        .ok_or_else(|| ServerError::MetadataUnavailable("instance document has no region".into()))?;

    Ok(InstanceIdentity { root_id, region })
}

/// Memoizing front for a [`MetadataSource`].
///
/// Callers racing on the first lookup may each reach the metadata service; the
/// first value stored wins and the others are dropped. Failures are not cached.
pub struct RootResolver {
    source: Arc<dyn MetadataSource>,
    cache: OnceLock<InstanceIdentity>,
}

impl RootResolver {
    pub fn new(source: Arc<dyn MetadataSource>) -> Self {
        Self {
            source,
            cache: OnceLock::new(),
        }
    }

    /// Root compartment id, or `None` if discovery failed this time.
    pub async fn get_root_id(&self) -> Option<String> {
        self.identity().await.map(|identity| identity.root_id)
    }

    /// Cached identity, or the result of a fresh lookup.
    pub async fn identity(&self) -> Option<InstanceIdentity> {
        if let Some(identity) = self.cache.get() {
            return Some(identity.clone());
        }

        match self.source.instance_identity().await {
            Ok(identity) => {
                log::info!("Resolved root compartment {} in {}", identity.root_id, identity.region);
                let _ = self.cache.set(identity);
                self.cache.get().cloned()
            }
            Err(e) => {
                log::warn!("Root compartment discovery failed: {}", e);
                None
            }
        }
    }

    /// Like [`identity`](Self::identity), but fails with the taxonomy error.
    pub async fn require_identity(&self) -> Result<InstanceIdentity> {
        self.identity()
            .await
            .ok_or_else(|| ServerError::upstream("Unable to determine root compartment from instance metadata"))
    }
}
