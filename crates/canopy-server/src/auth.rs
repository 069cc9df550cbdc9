//! Credential resolution for the two mutually exclusive authentication modes.

use canopy_types::INSTANCE_PRINCIPAL_PROFILE;
use std::path::PathBuf;
use std::sync::Arc;

use crate::config_store::{ConfigStore, ProfileFields};
use crate::error::{Result, ServerError};
use crate::root_resolver::RootResolver;

/// Credentials taken from a stored profile.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApiKeyCredentials {
    pub profile: String,
    pub tenancy: String,
    pub user: String,
    pub fingerprint: String,
    pub key_file: PathBuf,
    pub region: String,
}

/// Credentials derived from the machine the server runs on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstancePrincipalCredentials {
    pub root_id: String,
    pub region: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Credentials {
    ApiKey(ApiKeyCredentials),
    InstancePrincipal(InstancePrincipalCredentials),
}

impl Credentials {
    /// Compartment used when the caller does not name a parent.
    pub fn root_id(&self) -> &str {
        match self {
            Credentials::ApiKey(creds) => &creds.tenancy,
            Credentials::InstancePrincipal(creds) => &creds.root_id,
        }
    }

    pub fn region(&self) -> &str {
        match self {
            Credentials::ApiKey(creds) => &creds.region,
            Credentials::InstancePrincipal(creds) => &creds.region,
        }
    }
}

/// Authentication strategy, fixed for the lifetime of the process.
#[derive(Clone)]
pub enum AuthMode {
    /// Named profiles from the credentials file.
    Profile(ConfigStore),
    /// The instance's own identity, exposed under a single sentinel profile.
    InstancePrincipal(Arc<RootResolver>),
}

impl AuthMode {
    pub fn name(&self) -> &'static str {
        match self {
            AuthMode::Profile(_) => "profile",
            AuthMode::InstancePrincipal(_) => "instance_principal",
        }
    }

    /// Profiles a client may pick from.
    pub async fn list_profiles(&self) -> Vec<String> {
        match self {
            AuthMode::Profile(store) => store.list_profiles().await,
            AuthMode::InstancePrincipal(_) => vec![INSTANCE_PRINCIPAL_PROFILE.to_string()],
        }
    }

    /// Build credentials for `profile`.
    pub async fn resolve_credentials(&self, profile: &str) -> Result<Credentials> {
        match self {
            AuthMode::Profile(store) => {
                let fields = store
                    .load_profile(profile)
                    .await
                    .ok_or_else(|| ServerError::profile_not_found(profile))?;
                api_key_credentials(profile, &fields).map(Credentials::ApiKey)
            }
            AuthMode::InstancePrincipal(resolver) => {
                if profile != INSTANCE_PRINCIPAL_PROFILE {
                    return Err(ServerError::profile_not_found(profile));
                }
                let identity = resolver.require_identity().await?;
                Ok(Credentials::InstancePrincipal(InstancePrincipalCredentials {
                    root_id: identity.root_id,
                    region: identity.region,
                }))
            }
        }
    }
}

fn api_key_credentials(profile: &str, fields: &ProfileFields) -> Result<ApiKeyCredentials> {
    let field = |key: &str| -> Result<String> {
        fields
            .get(key)
            .filter(|value| !value.is_empty())
            .cloned()
            .ok_or_else(|| ServerError::invalid_profile(profile, format!("missing field '{}'", key)))
    };

    Ok(ApiKeyCredentials {
        profile: profile.to_string(),
        tenancy: field("tenancy")?,
        user: field("user")?,
        fingerprint: field("fingerprint")?,
        key_file: expand_home(&field("key_file")?),
        region: field("region")?,
    })
}

fn expand_home(path: &str) -> PathBuf {
    match path.strip_prefix("~/") {
        Some(rest) => dirs::home_dir()
            .map(|home| home.join(rest))
            .unwrap_or_else(|| PathBuf::from(path)),
        None => PathBuf::from(path),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::root_resolver::{InstanceIdentity, MetadataSource};
    use async_trait::async_trait;
    use std::io::Write;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tempfile::NamedTempFile;

    const CONFIG: &str = "[dev]\ntenancy=ocid1.tenancy.x\nuser=ocid1.user.u\nfingerprint=aa:bb\nkey_file=/keys/dev.pem\nregion=us-ashburn-1\n\n[broken]\nuser=ocid1.user.u\n";

    struct StaticSource(AtomicUsize);

    #[async_trait]
    impl MetadataSource for StaticSource {
        async fn instance_identity(&self) -> Result<InstanceIdentity> {
            self.0.fetch_add(1, Ordering::SeqCst);
            Ok(InstanceIdentity {
                root_id: "ocid1.tenancy.ip".into(),
                region: "us-phoenix-1".into(),
            })
        }
    }

    fn profile_mode(content: &str) -> (NamedTempFile, AuthMode) {
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(content.as_bytes()).unwrap();
        let mode = AuthMode::Profile(ConfigStore::new(file.path()));
        (file, mode)
    }

    #[tokio::test]
    async fn test_profile_mode_builds_api_key_credentials() {
        let (_file, mode) = profile_mode(CONFIG);
        let creds = mode.resolve_credentials("dev").await.unwrap();

        assert_eq!(creds.root_id(), "ocid1.tenancy.x");
        assert_eq!(creds.region(), "us-ashburn-1");
        match creds {
            Credentials::ApiKey(api) => assert_eq!(api.key_file, PathBuf::from("/keys/dev.pem")),
            other => panic!("unexpected credentials: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_profile_mode_errors() {
        let (_file, mode) = profile_mode(CONFIG);

        let err = mode.resolve_credentials("missing").await.unwrap_err();
        assert!(matches!(err, ServerError::ProfileNotFound(_)));

        let err = mode.resolve_credentials("broken").await.unwrap_err();
        assert!(matches!(err, ServerError::InvalidProfile { .. }));
    }

    #[tokio::test]
    async fn test_sentinel_is_unknown_in_profile_mode() {
        let (_file, mode) = profile_mode(CONFIG);
        let err = mode
            .resolve_credentials(INSTANCE_PRINCIPAL_PROFILE)
            .await
            .unwrap_err();
        assert!(matches!(err, ServerError::ProfileNotFound(_)));
    }

    #[tokio::test]
    async fn test_instance_principal_mode_only_accepts_sentinel() {
        let source = Arc::new(StaticSource(AtomicUsize::new(0)));
        let mode = AuthMode::InstancePrincipal(Arc::new(RootResolver::new(source.clone())));

        let err = mode.resolve_credentials("dev").await.unwrap_err();
        assert!(matches!(err, ServerError::ProfileNotFound(_)));
        assert_eq!(source.0.load(Ordering::SeqCst), 0);

        let creds = mode
            .resolve_credentials(INSTANCE_PRINCIPAL_PROFILE)
            .await
            .unwrap();
        assert_eq!(creds.root_id(), "ocid1.tenancy.ip");
        assert_eq!(mode.list_profiles().await, vec![INSTANCE_PRINCIPAL_PROFILE]);
    }

    #[test]
    fn test_expand_home() {
        let expanded = expand_home("~/.oci/key.pem");
        assert!(expanded.ends_with(".oci/key.pem"));
        assert!(!expanded.starts_with("~"));
        assert_eq!(expand_home("/abs/key.pem"), PathBuf::from("/abs/key.pem"));
    }
}
