use async_trait::async_trait;
use canopy_types::{ErrorResponse, Policy, ProfilesResponse, ROOT_ID_HEADER};
use reqwest::header::HeaderMap;
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::time::Duration;

use crate::{ClientError, CompartmentListing, ExplorerClient, Result, DEFAULT_SERVER_URL};

/// HTTP client for the explorer server
pub struct HttpExplorerClient {
    base_url: String,
    client: reqwest::Client,
    timeout: Duration,
}

impl HttpExplorerClient {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            client: reqwest::Client::new(),
            timeout: Duration::from_secs(30),
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    async fn get(&self, path: &str, query: &[(&str, &str)]) -> Result<Value> {
        self.fetch(path, query).await.map(|(_, value)| value)
    }

    async fn fetch(&self, path: &str, query: &[(&str, &str)]) -> Result<(HeaderMap, Value)> {
        let url = format!("{}{}", self.base_url, path);
        let response = self
            .client
            .get(&url)
            .query(query)
            .timeout(self.timeout)
            .send()
            .await?;

        let status = response.status();
        let headers = response.headers().clone();
        let body = response.text().await?;

        if !status.is_success() {
            let message = serde_json::from_str::<ErrorResponse>(&body)
                .map(|error| error.message)
                .unwrap_or_else(|_| format!("Request to {} failed", path));
            return Err(ClientError::Server {
                status: status.as_u16(),
                message,
            });
        }

        let value = serde_json::from_str(&body)
            .map_err(|e| ClientError::UnexpectedShape(format!("{}: {}", path, e)))?;
        Ok((headers, value))
    }

    async fn get_list<T: DeserializeOwned>(&self, path: &str, query: &[(&str, &str)]) -> Result<Vec<T>> {
        let value = self.get(path, query).await?;
        expect_array(path, value)
    }
}

/// Lists must come back as JSON arrays; anything else is rejected.
fn expect_array<T: DeserializeOwned>(path: &str, value: Value) -> Result<Vec<T>> {
    if !value.is_array() {
        return Err(ClientError::UnexpectedShape(format!(
            "{} did not return an array",
            path
        )));
    }
    serde_json::from_value(value).map_err(|e| ClientError::UnexpectedShape(format!("{}: {}", path, e)))
}

impl Default for HttpExplorerClient {
    fn default() -> Self {
        Self::new(DEFAULT_SERVER_URL)
    }
}

#[async_trait]
impl ExplorerClient for HttpExplorerClient {
    async fn list_profiles(&self) -> Result<Vec<String>> {
        let value = self.get("/api/profiles", &[]).await?;
        let response: ProfilesResponse = serde_json::from_value(value)
            .map_err(|e| ClientError::UnexpectedShape(format!("/api/profiles: {}", e)))?;
        Ok(response.profiles)
    }

    async fn list_compartments(&self, profile: &str, parent: Option<&str>) -> Result<CompartmentListing> {
        let mut query = vec![("profile", profile)];
        if let Some(parent) = parent {
            query.push(("parent", parent));
        }

        let path = "/api/compartments";
        let (headers, value) = self.fetch(path, &query).await?;
        let root_id = headers
            .get(ROOT_ID_HEADER)
            .and_then(|value| value.to_str().ok())
            .filter(|id| !id.is_empty())
            .map(str::to_string);

        Ok(CompartmentListing {
            root_id,
            compartments: expect_array(path, value)?,
        })
    }

    async fn list_policies(&self, profile: &str, compartment_id: &str) -> Result<Vec<Policy>> {
        self.get_list(
            "/api/policies",
            &[("profile", profile), ("compartmentId", compartment_id)],
        )
        .await
    }

    async fn health_check(&self) -> Result<()> {
        self.get("/health", &[]).await.map(|_| ())
    }
}
