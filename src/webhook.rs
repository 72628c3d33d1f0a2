//! Push event payload structures

use serde::Deserialize;

const BRANCH_REF_PREFIX: &str = "refs/heads/";

/// The parts of a GitHub push event the deployer cares about.
#[derive(Debug, Clone, Deserialize)]
pub struct PushNotification {
    #[serde(rename = "ref")]
    pub git_ref: String,
    pub repository: PushRepository,
    /// Commit SHA the branch now points at.
    #[serde(default)]
    pub after: Option<String>,
    #[serde(default)]
    pub pusher: Option<Pusher>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PushRepository {
    pub clone_url: String,
    #[serde(default)]
    pub ssh_url: Option<String>,
    #[serde(default)]
    pub full_name: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Pusher {
    pub name: Option<String>,
}

impl PushNotification {
    /// Parse a raw webhook body.
    pub fn from_slice(body: &[u8]) -> serde_json::Result<Self> {
        serde_json::from_slice(body)
    }

    /// Branch name with `refs/heads/` stripped. Other refs (tags) are returned verbatim
    /// and simply never match a watched branch.
    pub fn branch(&self) -> &str {
        self.git_ref
            .strip_prefix(BRANCH_REF_PREFIX)
            .unwrap_or(&self.git_ref)
    }

    pub fn clone_url(&self) -> &str {
        &self.repository.clone_url
    }

    pub fn ssh_url(&self) -> Option<&str> {
        self.repository.ssh_url.as_deref()
    }

    pub fn pusher_name(&self) -> Option<&str> {
        self.pusher.as_ref().and_then(|p| p.name.as_deref())
    }

    pub fn repository_name(&self) -> &str {
        self.repository
            .full_name
            .as_deref()
            .unwrap_or(&self.repository.clone_url)
    }
}
