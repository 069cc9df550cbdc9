//! Client side of the compartment explorer
//!
//! [`ExplorerClient`] is the seam to the server's HTTP API and
//! [`NavigationController`] walks the compartment tree on top of it, keeping the
//! navigation path, the loaded lists and the loading/error flags in one
//! [`Session`].

use async_trait::async_trait;
use canopy_types::{Compartment, Policy};

pub mod error;
pub mod http_client;
pub mod navigation;

pub use error::{ClientError, Result};
pub use http_client::HttpExplorerClient;
pub use navigation::{
    Completion, LoadRequest, NavigationController, NavigationStack, Session, StackEntry,
};

/// Children of a compartment, with the root id of the profile they were listed
/// under when the server reports it.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CompartmentListing {
    pub root_id: Option<String>,
    pub compartments: Vec<Compartment>,
}

/// Default server location.
pub const DEFAULT_SERVER_URL: &str = "http://localhost:3001";

/// Operations the explorer needs from the server.
#[async_trait]
pub trait ExplorerClient: Send + Sync {
    /// Configured profile names.
    async fn list_profiles(&self) -> Result<Vec<String>>;

    /// Children of `parent`, or of the profile's root when `parent` is `None`.
    async fn list_compartments(&self, profile: &str, parent: Option<&str>) -> Result<CompartmentListing>;

    /// Policies attached to `compartment_id`.
    async fn list_policies(&self, profile: &str, compartment_id: &str) -> Result<Vec<Policy>>;

    /// Check if the server is reachable
    async fn health_check(&self) -> Result<()>;
}
