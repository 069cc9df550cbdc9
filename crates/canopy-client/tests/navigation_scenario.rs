//! Walks a small tenancy the way an operator would: pick a profile, open a
//! compartment, go back.

use async_trait::async_trait;
use canopy_client::{ClientError, CompartmentListing, ExplorerClient, NavigationController, Result};
use canopy_types::{Compartment, Policy};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};

const TENANCY: &str = "ocid1.tenancy.x";
const SALES: &str = "ocid1.compartment.y";
const EMPTY_TENANCY: &str = "ocid1.tenancy.empty";

struct FakeTenancy {
    tenancy: HashMap<&'static str, &'static str>,
    children: HashMap<&'static str, Vec<Compartment>>,
    calls: Mutex<Vec<String>>,
}

impl FakeTenancy {
    fn new() -> Self {
        let mut children = HashMap::new();
        children.insert(
            TENANCY,
            vec![
                Compartment::new(SALES, "Sales").with_parent(TENANCY),
                Compartment::new("ocid1.compartment.z", "Ops").with_parent(TENANCY),
            ],
        );
        children.insert(SALES, Vec::new());

        Self {
            tenancy: HashMap::from([("dev", TENANCY), ("sandbox", EMPTY_TENANCY)]),
            children,
            calls: Mutex::new(Vec::new()),
        }
    }

    fn take_calls(&self) -> Vec<String> {
        std::mem::take(&mut *self.calls.lock().unwrap())
    }
}

#[async_trait]
impl ExplorerClient for FakeTenancy {
    async fn list_profiles(&self) -> Result<Vec<String>> {
        Ok(self.tenancy.keys().map(|name| name.to_string()).collect())
    }

    async fn list_compartments(&self, profile: &str, parent: Option<&str>) -> Result<CompartmentListing> {
        let root = *self.tenancy.get(profile).ok_or_else(|| ClientError::Server {
            status: 404,
            message: format!("Profile not found: {}", profile),
        })?;
        let parent = parent.unwrap_or(root);
        self.calls.lock().unwrap().push(format!("children:{}", parent));
        Ok(CompartmentListing {
            root_id: Some(root.to_string()),
            compartments: self.children.get(parent).cloned().unwrap_or_default(),
        })
    }

    async fn list_policies(&self, _profile: &str, compartment_id: &str) -> Result<Vec<Policy>> {
        self.calls.lock().unwrap().push(format!("policies:{}", compartment_id));
        Ok(vec![Policy::new(
            format!("ocid1.policy.{}", compartment_id),
            "default",
            vec![format!("Allow group Readers to inspect all-resources in compartment id {}", compartment_id)],
        )])
    }

    async fn health_check(&self) -> Result<()> {
        Ok(())
    }
}

#[tokio::test]
async fn test_select_drill_down_and_back() {
    let tenancy = Arc::new(FakeTenancy::new());
    let mut nav = NavigationController::new(tenancy.clone());

    nav.select_profile("dev").await;
    assert_eq!(
        tenancy.take_calls(),
        vec![format!("children:{}", TENANCY), format!("policies:{}", TENANCY)]
    );
    assert_eq!(nav.session().resolved_root_id.as_deref(), Some(TENANCY));
    assert_eq!(nav.session().compartments.len(), 2);

    let sales = nav
        .session()
        .compartments
        .iter()
        .find(|c| c.name == "Sales")
        .cloned()
        .unwrap();
    nav.drill_down(&sales).await;
    assert_eq!(
        tenancy.take_calls(),
        vec![format!("children:{}", SALES), format!("policies:{}", SALES)]
    );
    assert_eq!(nav.session().stack.top().unwrap().id, SALES);
    assert!(nav.session().compartments.is_empty());
    assert_eq!(nav.session().policies[0].id, format!("ocid1.policy.{}", SALES));

    nav.back().await;
    assert_eq!(
        tenancy.take_calls(),
        vec![format!("children:{}", TENANCY), format!("policies:{}", TENANCY)]
    );
    assert!(nav.session().stack.is_empty());
    assert_eq!(nav.session().compartments.len(), 2);
    assert_eq!(nav.session().policies[0].id, format!("ocid1.policy.{}", TENANCY));
    assert!(nav.session().error.is_none());
}

#[tokio::test]
async fn test_unknown_profile_surfaces_error() {
    let tenancy = Arc::new(FakeTenancy::new());
    let mut nav = NavigationController::new(tenancy.clone());

    nav.select_profile("prod").await;

    let session = nav.session();
    assert_eq!(session.selected_profile.as_deref(), Some("prod"));
    assert!(session.compartments.is_empty());
    assert!(session.policies.is_empty());
    assert!(session
        .error
        .as_deref()
        .unwrap()
        .contains("Profile not found: prod"));
    assert!(tenancy.take_calls().is_empty());
}

#[tokio::test]
async fn test_empty_tenancy_still_shows_root_policies() {
    let tenancy = Arc::new(FakeTenancy::new());
    let mut nav = NavigationController::new(tenancy.clone());

    nav.select_profile("sandbox").await;

    assert_eq!(
        tenancy.take_calls(),
        vec![
            format!("children:{}", EMPTY_TENANCY),
            format!("policies:{}", EMPTY_TENANCY)
        ]
    );
    let session = nav.session();
    assert!(session.compartments.is_empty());
    assert_eq!(session.resolved_root_id.as_deref(), Some(EMPTY_TENANCY));
    assert_eq!(session.policies.len(), 1);
    assert!(session.error.is_none());
}
