//! Calls to the upstream identity service.
//!
//! [`IdentityService`] is the raw upstream seam; [`IdentityProxy`] applies the
//! parameter rules and folds every failure into [`ServerError::UpstreamFailure`]
//! so handlers see a single shape.

use async_trait::async_trait;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use canopy_types::{Compartment, Policy, UpstreamErrorBody};
use chrono::{DateTime, Utc};
use reqwest::{Method, Url};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::json;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::fs;

use crate::auth::{ApiKeyCredentials, Credentials, InstancePrincipalCredentials};
use crate::error::{Result, ServerError};
use crate::root_resolver::MetadataClient;
use crate::signer::{certificate_fingerprint, certificate_tenancy, pem_body, RequestSigner};

const API_VERSION: &str = "20160918";

/// Security tokens are renewed this long before they expire.
const TOKEN_REFRESH_MARGIN_SECS: i64 = 60;

/// Upstream identity operations.
#[async_trait]
pub trait IdentityService: Send + Sync {
    /// Direct children of `parent_id`.
    async fn list_compartments(
        &self,
        credentials: &Credentials,
        parent_id: &str,
    ) -> Result<Vec<Compartment>>;

    /// Policies attached to `compartment_id`.
    async fn list_policies(
        &self,
        credentials: &Credentials,
        compartment_id: &str,
    ) -> Result<Vec<Policy>>;
}

/// Applies defaults and parameter checks in front of an [`IdentityService`].
#[derive(Clone)]
pub struct IdentityProxy {
    service: Arc<dyn IdentityService>,
}

impl IdentityProxy {
    pub fn new(service: Arc<dyn IdentityService>) -> Self {
        Self { service }
    }

    /// Children of `parent`, or of the credentials' root when no parent is given.
    pub async fn list_child_groupings(
        &self,
        credentials: &Credentials,
        parent: Option<&str>,
    ) -> Result<Vec<Compartment>> {
        let parent = parent
            .map(str::trim)
            .filter(|id| !id.is_empty())
            .unwrap_or_else(|| credentials.root_id());

        log::debug!("Listing compartments under {}", parent);
        self.service
            .list_compartments(credentials, parent)
            .await
            .map_err(|e| into_upstream(e, "Failed to list compartments"))
    }

    pub async fn list_policies(
        &self,
        credentials: &Credentials,
        grouping_id: Option<&str>,
    ) -> Result<Vec<Policy>> {
        let grouping_id = grouping_id
            .map(str::trim)
            .filter(|id| !id.is_empty())
            .ok_or_else(|| ServerError::missing_parameter("compartmentId"))?;

        log::debug!("Listing policies in {}", grouping_id);
        self.service
            .list_policies(credentials, grouping_id)
            .await
            .map_err(|e| into_upstream(e, "Failed to list policies"))
    }
}

fn into_upstream(err: ServerError, fallback: &str) -> ServerError {
    match err {
        ServerError::UpstreamFailure(message) if !message.trim().is_empty() => {
            ServerError::UpstreamFailure(message)
        }
        ServerError::MetadataUnavailable(message) => ServerError::UpstreamFailure(message),
        err @ ServerError::InvalidProfile { .. } => err,
        other => {
            log::error!("{}: {}", fallback, other);
            ServerError::upstream(fallback)
        }
    }
}

#[derive(Debug, Deserialize)]
struct FederationResponse {
    token: String,
}

#[derive(Debug, Deserialize)]
struct TokenClaims {
    exp: i64,
}

/// A federated signer and the moment its token stops being accepted.
#[derive(Debug, Clone)]
struct SessionToken {
    signer: RequestSigner,
    expires_at: DateTime<Utc>,
}

impl SessionToken {
    fn is_fresh(&self, now: DateTime<Utc>) -> bool {
        now + chrono::Duration::seconds(TOKEN_REFRESH_MARGIN_SECS) < self.expires_at
    }
}

/// Expiry (`exp` claim) of a JWT security token.
fn token_expiry(token: &str) -> Option<DateTime<Utc>> {
    let payload = token.split('.').nth(1)?;
    let claims: TokenClaims = serde_json::from_slice(&URL_SAFE_NO_PAD.decode(payload).ok()?).ok()?;
    DateTime::from_timestamp(claims.exp, 0)
}

/// Signed HTTP client for the identity service.
#[derive(Clone)]
pub struct OciIdentityClient {
    client: reqwest::Client,
    endpoint_override: Option<String>,
    auth_endpoint_override: Option<String>,
    metadata: MetadataClient,
    session: Arc<Mutex<Option<SessionToken>>>,
    timeout: Duration,
}

impl OciIdentityClient {
    pub fn new() -> Self {
        Self {
            client: reqwest::Client::new(),
            endpoint_override: None,
            auth_endpoint_override: None,
            metadata: MetadataClient::new(),
            session: Arc::new(Mutex::new(None)),
            timeout: Duration::from_secs(30),
        }
    }

    /// Send identity calls to `endpoint` instead of the regional one.
    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint_override = Some(endpoint.into().trim_end_matches('/').to_string());
        self
    }

    /// Send federation calls to `endpoint` instead of the regional auth service.
    pub fn with_auth_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.auth_endpoint_override = Some(endpoint.into().trim_end_matches('/').to_string());
        self
    }

    pub fn with_metadata(mut self, metadata: MetadataClient) -> Self {
        self.metadata = metadata;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    fn identity_endpoint(&self, region: &str) -> String {
        self.endpoint_override
            .clone()
            .unwrap_or_else(|| format!("https://identity.{}.oraclecloud.com", region))
    }

    fn auth_endpoint(&self, region: &str) -> String {
        self.auth_endpoint_override
            .clone()
            .unwrap_or_else(|| format!("https://auth.{}.oraclecloud.com", region))
    }

    async fn signer_for(&self, credentials: &Credentials) -> Result<RequestSigner> {
        match credentials {
            Credentials::ApiKey(creds) => self.api_key_signer(creds).await,
            Credentials::InstancePrincipal(creds) => self.instance_signer(creds).await,
        }
    }

    async fn api_key_signer(&self, creds: &ApiKeyCredentials) -> Result<RequestSigner> {
        let pem = fs::read_to_string(&creds.key_file).await.map_err(|e| {
            ServerError::invalid_profile(
                &creds.profile,
                format!("cannot read key file {}: {}", creds.key_file.display(), e),
            )
        })?;
        let key_id = format!("{}/{}/{}", creds.tenancy, creds.user, creds.fingerprint);
        RequestSigner::from_pem(key_id, &pem).map_err(|e| {
            ServerError::invalid_profile(
                &creds.profile,
                format!("unusable key file {}: {}", creds.key_file.display(), e),
            )
        })
    }

    /// Cached session signer, federating again once the token nears expiry.
    async fn instance_signer(&self, creds: &InstancePrincipalCredentials) -> Result<RequestSigner> {
        let cached = self.session.lock().ok().and_then(|cache| cache.clone());
        if let Some(token) = cached {
            if token.is_fresh(Utc::now()) {
                return Ok(token.signer);
            }
            log::debug!("Security token expired at {}, federating again", token.expires_at);
        }

        let token = self.federate(creds).await?;
        let signer = token.signer.clone();
        if let Ok(mut cache) = self.session.lock() {
            *cache = Some(token);
        }
        Ok(signer)
    }

    /// Trades the instance certificate for a security token.
    async fn federate(&self, creds: &InstancePrincipalCredentials) -> Result<SessionToken> {
        let certificate = self.metadata.get_text("identity/cert.pem").await?;
        let intermediate = self.metadata.get_text("identity/intermediate.pem").await?;
        let private_key = self.metadata.get_text("identity/key.pem").await?;

        let tenancy = certificate_tenancy(&certificate)?;
        let fingerprint = certificate_fingerprint(&certificate)?;
        let leaf = RequestSigner::from_pem(
            format!("{}/fed-x509/{}", tenancy, fingerprint),
            &private_key,
        )?;

        let body = serde_json::to_vec(&json!({
            "certificate": pem_body(&certificate),
            "publicKey": pem_body(&leaf.public_key_pem()?),
            "intermediateCertificates": [pem_body(&intermediate)],
        }))
        .map_err(|e| ServerError::internal(format!("Failed to encode federation request: {}", e)))?;

        let url = Url::parse(&format!("{}/v1/x509", self.auth_endpoint(&creds.region)))
            .map_err(|e| ServerError::upstream(format!("Invalid federation endpoint: {}", e)))?;
        let headers = leaf.sign(&Method::POST, &url, Some(&body))?;

        log::debug!("Requesting security token from {}", url);
        let response = self
            .client
            .post(url)
            .headers(headers)
            .timeout(self.timeout)
            .body(body)
            .send()
            .await
            .map_err(|e| ServerError::upstream(format!("Federation request failed: {}", e)))?;

        let response: FederationResponse = decode(response).await?;
        // Tokens without a readable expiry are used once.
        let expires_at = token_expiry(&response.token).unwrap_or_else(Utc::now);
        log::info!("Federated as tenancy {} until {}", tenancy, expires_at);

        Ok(SessionToken {
            signer: leaf.with_key_id(format!("ST${}", response.token)),
            expires_at,
        })
    }

    async fn list<T: DeserializeOwned>(
        &self,
        credentials: &Credentials,
        resource: &str,
        compartment_id: &str,
    ) -> Result<Vec<T>> {
        let url = Url::parse_with_params(
            &format!(
                "{}/{}/{}",
                self.identity_endpoint(credentials.region()),
                API_VERSION,
                resource
            ),
            &[("compartmentId", compartment_id)],
        )
        .map_err(|e| ServerError::upstream(format!("Invalid identity endpoint: {}", e)))?;

        let signer = self.signer_for(credentials).await?;
        let headers = signer.sign(&Method::GET, &url, None)?;

        let response = self
            .client
            .get(url)
            .headers(headers)
            .header("Accept", "application/json")
            .timeout(self.timeout)
            .send()
            .await
            .map_err(|e| ServerError::upstream(format!("Identity service request failed: {}", e)))?;

        decode(response).await
    }
}

impl Default for OciIdentityClient {
    fn default() -> Self {
        Self::new()
    }
}

/// Success bodies decode into `T`; failures surface the upstream message verbatim.
async fn decode<T: DeserializeOwned>(response: reqwest::Response) -> Result<T> {
    let status = response.status();
    if status.is_success() {
        return response.json::<T>().await.map_err(|e| {
            ServerError::upstream(format!("Unexpected response from identity service: {}", e))
        });
    }

    let body = response.json::<UpstreamErrorBody>().await.unwrap_or_default();
    if let Some(code) = &body.code {
        log::debug!("Identity service error code {} ({})", code, status);
    }
    Err(ServerError::upstream(body.message.unwrap_or_else(|| {
        format!("Identity service returned {}", status)
    })))
}

#[async_trait]
impl IdentityService for OciIdentityClient {
    async fn list_compartments(
        &self,
        credentials: &Credentials,
        parent_id: &str,
    ) -> Result<Vec<Compartment>> {
        self.list(credentials, "compartments", parent_id).await
    }

    async fn list_policies(
        &self,
        credentials: &Credentials,
        compartment_id: &str,
    ) -> Result<Vec<Policy>> {
        self.list(credentials, "policies", compartment_id).await
    }
}
