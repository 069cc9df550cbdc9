//! Wire types exchanged between the canopy server and its clients
//!
//! The same structures deserialize the upstream identity service payloads and
//! serialize the local HTTP API, so both sides agree on the camelCase layout the
//! identity service uses.

use serde::{Deserialize, Serialize};

/// Profile name accepted when the server runs with the machine's own identity.
pub const INSTANCE_PRINCIPAL_PROFILE: &str = "instance_principal";

/// Response header carrying the root compartment id of the profile a listing
/// was made with.
pub const ROOT_ID_HEADER: &str = "x-canopy-root-id";

/// A node of the compartment tree.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Compartment {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub description: String,
    /// Id of the compartment this one was listed under.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub compartment_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub lifecycle_state: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub time_created: Option<String>,
}

impl Compartment {
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            description: String::new(),
            compartment_id: None,
            lifecycle_state: None,
            time_created: None,
        }
    }

    pub fn with_parent(mut self, parent_id: impl Into<String>) -> Self {
        self.compartment_id = Some(parent_id.into());
        self
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }
}

/// An access-control policy attached to a compartment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Policy {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub statements: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub compartment_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub lifecycle_state: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub time_created: Option<String>,
}

impl Policy {
    pub fn new(id: impl Into<String>, name: impl Into<String>, statements: Vec<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            description: String::new(),
            statements,
            compartment_id: None,
            lifecycle_state: None,
            time_created: None,
        }
    }
}

/// Body of `GET /api/profiles`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProfilesResponse {
    pub profiles: Vec<String>,
}

/// Body returned with every non-2xx response of the local API.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
    pub message: String,
}

/// Error payload of the upstream identity service.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct UpstreamErrorBody {
    #[serde(default)]
    pub code: Option<String>,
    #[serde(default)]
    pub message: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_compartment_uses_camel_case() {
        let compartment = Compartment::new("ocid1.compartment.y", "Sales").with_parent("ocid1.tenancy.x");
        let value = serde_json::to_value(&compartment).unwrap();

        assert_eq!(value["compartmentId"], "ocid1.tenancy.x");
        assert_eq!(value["description"], "");
        assert!(value.get("lifecycleState").is_none());
    }

    #[test]
    fn test_policy_from_upstream_payload() {
        let payload = json!({
            "id": "ocid1.policy.p",
            "name": "admins",
            "description": "Admin access",
            "statements": ["Allow group Admins to manage all-resources in tenancy"],
            "compartmentId": "ocid1.tenancy.x",
            "lifecycleState": "ACTIVE",
            "timeCreated": "2024-01-01T00:00:00Z",
            "etag": "ignored"
        });

        let policy: Policy = serde_json::from_value(payload).unwrap();
        assert_eq!(policy.statements.len(), 1);
        assert_eq!(policy.lifecycle_state.as_deref(), Some("ACTIVE"));
    }
}
