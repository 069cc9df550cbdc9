//! Navigation through the compartment tree.
//!
//! Every navigation event changes the [`Session`] right away and yields a
//! [`LoadRequest`] carrying a fresh token. Loads run against an
//! [`ExplorerClient`] and come back as [`Completion`]s; a completion whose
//! token is older than the session's current one is dropped, so a slow response
//! can never overwrite the result of a later navigation.
//!
//! The stack records navigation intent. A failed load sets the session error and
//! clears the affected list but leaves the stack alone.

use canopy_types::{Compartment, Policy};
use std::sync::Arc;

use crate::{ClientError, CompartmentListing, ExplorerClient};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StackEntry {
    pub id: String,
    pub name: String,
}

impl StackEntry {
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
        }
    }
}

/// Path from (but excluding) the root to the current compartment.
///
/// Empty exactly when the root is being viewed.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NavigationStack {
    entries: Vec<StackEntry>,
}

impl NavigationStack {
    pub fn push(&mut self, entry: StackEntry) {
        self.entries.push(entry);
    }

    pub fn pop(&mut self) -> Option<StackEntry> {
        self.entries.pop()
    }

    /// Keep the first `depth` entries.
    pub fn truncate(&mut self, depth: usize) {
        self.entries.truncate(depth);
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    pub fn top(&self) -> Option<&StackEntry> {
        self.entries.last()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn entries(&self) -> &[StackEntry] {
        &self.entries
    }
}

/// Everything the explorer shows, owned by the [`NavigationController`].
#[derive(Debug, Clone, Default)]
pub struct Session {
    pub profiles: Vec<String>,
    pub selected_profile: Option<String>,
    pub resolved_root_id: Option<String>,
    pub stack: NavigationStack,
    pub compartments: Vec<Compartment>,
    pub policies: Vec<Policy>,
    pub loading_profiles: bool,
    pub loading_groupings: bool,
    pub loading_policies: bool,
    pub error: Option<String>,
    token: u64,
}

impl Session {
    /// Top of the stack, else the root id if it is known yet.
    pub fn current_grouping_id(&self) -> Option<&str> {
        self.stack
            .top()
            .map(|entry| entry.id.as_str())
            .or(self.resolved_root_id.as_deref())
    }

    pub fn is_profile_selected(&self) -> bool {
        self.selected_profile.is_some()
    }

    /// Token of the most recent navigation event.
    pub fn token(&self) -> u64 {
        self.token
    }

    /// Breadcrumb labels, root first.
    pub fn breadcrumbs(&self) -> Vec<&str> {
        std::iter::once("root")
            .chain(self.stack.entries().iter().map(|entry| entry.name.as_str()))
            .collect()
    }
}

/// A pair of loads (children, then policies) issued for one navigation event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoadRequest {
    pub token: u64,
    pub profile: String,
    /// `None` means the root, before its id is known.
    pub grouping_id: Option<String>,
}

/// Result of a single load, tagged with the request that started it.
#[derive(Debug, Clone)]
pub enum Completion {
    Groupings {
        request: LoadRequest,
        result: Result<CompartmentListing, ClientError>,
    },
    Policies {
        request: LoadRequest,
        result: Result<Vec<Policy>, ClientError>,
    },
}

impl Completion {
    pub fn request(&self) -> &LoadRequest {
        match self {
            Completion::Groupings { request, .. } | Completion::Policies { request, .. } => request,
        }
    }
}

/// Fetch the children named by `request`.
pub async fn load_groupings(client: &dyn ExplorerClient, request: LoadRequest) -> Completion {
    let result = client
        .list_compartments(&request.profile, request.grouping_id.as_deref())
        .await;
    Completion::Groupings { request, result }
}

/// Fetch the policies named by `request`. `request.grouping_id` must be set.
pub async fn load_policies(client: &dyn ExplorerClient, request: LoadRequest) -> Completion {
    let result = match request.grouping_id.as_deref() {
        Some(id) => client.list_policies(&request.profile, id).await,
        None => Ok(Vec::new()),
    };
    Completion::Policies { request, result }
}

pub struct NavigationController {
    client: Arc<dyn ExplorerClient>,
    session: Session,
}

impl NavigationController {
    pub fn new(client: Arc<dyn ExplorerClient>) -> Self {
        Self {
            client,
            session: Session::default(),
        }
    }

    pub fn session(&self) -> &Session {
        &self.session
    }

    pub fn client(&self) -> Arc<dyn ExplorerClient> {
        self.client.clone()
    }

    fn next_request(&mut self, profile: String) -> LoadRequest {
        self.session.token += 1;
        self.session.error = None;
        self.session.loading_groupings = true;
        self.session.loading_policies = true;
        LoadRequest {
            token: self.session.token,
            profile,
            grouping_id: self.session.current_grouping_id().map(str::to_string),
        }
    }

    /// Switch to `profile`, starting at the root. A blank name deselects.
    pub fn begin_select_profile(&mut self, profile: &str) -> Option<LoadRequest> {
        let profile = profile.trim();
        if profile.is_empty() {
            self.deselect_profile();
            return None;
        }

        log::debug!("Selecting profile {}", profile);
        self.session.selected_profile = Some(profile.to_string());
        self.session.resolved_root_id = None;
        self.session.stack.clear();
        self.session.compartments.clear();
        self.session.policies.clear();
        Some(self.next_request(profile.to_string()))
    }

    pub fn begin_drill_down(&mut self, node: &Compartment) -> Option<LoadRequest> {
        let profile = self.session.selected_profile.clone()?;
        self.session
            .stack
            .push(StackEntry::new(node.id.clone(), node.name.clone()));
        Some(self.next_request(profile))
    }

    /// Up one level. Nothing happens at the root.
    pub fn begin_back(&mut self) -> Option<LoadRequest> {
        let profile = self.session.selected_profile.clone()?;
        self.session.stack.pop()?;
        Some(self.next_request(profile))
    }

    /// Jump to the breadcrumb at `depth` (0 is the root).
    pub fn begin_back_to(&mut self, depth: usize) -> Option<LoadRequest> {
        let profile = self.session.selected_profile.clone()?;
        if depth >= self.session.stack.len() {
            return None;
        }
        self.session.stack.truncate(depth);
        Some(self.next_request(profile))
    }

    /// Reload the current compartment.
    pub fn begin_refresh(&mut self) -> Option<LoadRequest> {
        let profile = self.session.selected_profile.clone()?;
        Some(self.next_request(profile))
    }

    pub fn deselect_profile(&mut self) {
        let profiles = std::mem::take(&mut self.session.profiles);
        let token = self.session.token + 1;
        self.session = Session {
            profiles,
            token,
            ..Session::default()
        };
    }

    fn is_current(&self, request: &LoadRequest) -> bool {
        request.token == self.session.token
    }

    /// Fold a completion into the session. Returns `false` for stale completions.
    pub fn apply(&mut self, completion: Completion) -> bool {
        if !self.is_current(completion.request()) {
            log::debug!(
                "Dropping stale completion {} (current {})",
                completion.request().token,
                self.session.token
            );
            return false;
        }

        match completion {
            Completion::Groupings { request, result } => {
                self.session.loading_groupings = false;
                match result {
                    Ok(listing) => {
                        if request.grouping_id.is_none() && self.session.resolved_root_id.is_none() {
                            self.session.resolved_root_id = listing.root_id.or_else(|| {
                                listing
                                    .compartments
                                    .iter()
                                    .find_map(|child| child.compartment_id.clone())
                            });
                        }
                        self.session.compartments = listing.compartments;
                    }
                    Err(e) => {
                        log::warn!("Compartment load failed: {}", e);
                        self.session.error = Some(format!("Failed to load compartments: {}", e));
                        self.session.compartments.clear();
                    }
                }
            }
            Completion::Policies { result, .. } => {
                self.session.loading_policies = false;
                match result {
                    Ok(policies) => self.session.policies = policies,
                    Err(e) => {
                        log::warn!("Policy load failed: {}", e);
                        self.session.error = Some(format!("Failed to load policies: {}", e));
                        self.session.policies.clear();
                    }
                }
            }
        }
        true
    }

    /// Policy load following the children load of `request`.
    ///
    /// A root request picks up the root id learned from its children load. When
    /// the root id is still unknown there is nothing to ask for, and the policy
    /// list is cleared.
    pub fn policies_request(&mut self, request: &LoadRequest) -> Option<LoadRequest> {
        if !self.is_current(request) {
            return None;
        }

        let grouping_id = request
            .grouping_id
            .clone()
            .or_else(|| self.session.resolved_root_id.clone());

        if grouping_id.is_none() {
            log::debug!("Root compartment id unknown, skipping policy load");
            self.session.loading_policies = false;
            self.session.policies.clear();
            return None;
        }

        Some(LoadRequest {
            grouping_id,
            ..request.clone()
        })
    }

    /// Children, then policies, for `request`.
    pub async fn run(&mut self, request: LoadRequest) {
        let client = self.client.clone();
        let completion = load_groupings(client.as_ref(), request.clone()).await;
        self.apply(completion);

        if let Some(policies) = self.policies_request(&request) {
            let completion = load_policies(client.as_ref(), policies).await;
            self.apply(completion);
        }
    }

    pub async fn load_profiles(&mut self) {
        self.session.loading_profiles = true;
        let result = self.client.list_profiles().await;
        self.session.loading_profiles = false;

        match result {
            Ok(profiles) => self.session.profiles = profiles,
            Err(e) => {
                log::warn!("Profile load failed: {}", e);
                self.session.error = Some(format!("Failed to load profiles: {}", e));
                self.session.profiles.clear();
            }
        }
    }

    pub async fn select_profile(&mut self, profile: &str) {
        if let Some(request) = self.begin_select_profile(profile) {
            self.run(request).await;
        }
    }

    pub async fn drill_down(&mut self, node: &Compartment) {
        if let Some(request) = self.begin_drill_down(node) {
            self.run(request).await;
        }
    }

    pub async fn back(&mut self) {
        if let Some(request) = self.begin_back() {
            self.run(request).await;
        }
    }

    pub async fn back_to(&mut self, depth: usize) {
        if let Some(request) = self.begin_back_to(depth) {
            self.run(request).await;
        }
    }

    pub async fn refresh(&mut self) {
        if let Some(request) = self.begin_refresh() {
            self.run(request).await;
        }
    }
}
