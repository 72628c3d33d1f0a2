//! Watched deployment targets and push matching.

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, info};

use crate::config::{DeployerConfig, FolderConfig};
use crate::error::{DeployerError, Result};
use crate::git;
use crate::runner::DEFAULT_COMMAND_TIMEOUT;
use crate::url::urls_match;

/// One monitored working copy.
#[derive(Debug, Clone, PartialEq)]
pub struct WatchedTarget {
    pub local_path: PathBuf,
    /// Branch detected at registration; never updated afterwards.
    pub branch: String,
    /// Remote URL as configured in the checkout. Normalised on every comparison.
    pub remote_url: String,
    /// Empty means pull only.
    pub post_pull_command: String,
    pub command_timeout: Duration,
    pub notify_on_success: bool,
}

impl WatchedTarget {
    /// Build a target from the live git state at `path`.
    ///
    /// The path must exist and contain a `.git` entry, have a branch checked out and an
    /// `origin` remote.
    pub async fn register(
        path: &Path,
        command: &str,
        command_timeout: Option<Duration>,
        notify_on_success: bool,
    ) -> Result<Self> {
        let local_path = std::fs::canonicalize(path)
            .map_err(|_| DeployerError::NotAGitRepository(path.to_path_buf()))?;

        if !git::is_git_repository(&local_path) {
            return Err(DeployerError::NotAGitRepository(local_path));
        }

        let branch = git::current_branch(&local_path).await?;
        if branch == "HEAD" {
            return Err(DeployerError::GitOperationFailed {
                operation: "rev-parse --abbrev-ref HEAD".to_string(),
                message: "HEAD is detached; check out a branch first".to_string(),
            });
        }
        let remote_url = git::remote_url(&local_path).await?;

        info!(
            path = %local_path.display(),
            branch = %branch,
            remote = %remote_url,
            "Registered target"
        );

        Ok(Self {
            local_path,
            branch,
            remote_url,
            post_pull_command: command.trim().to_string(),
            command_timeout: command_timeout.unwrap_or(DEFAULT_COMMAND_TIMEOUT),
            notify_on_success,
        })
    }

    pub fn has_command(&self) -> bool {
        !self.post_pull_command.is_empty()
    }

    /// Both gates: normalised remote URL and exact, case-sensitive branch name.
    pub fn matches(&self, clone_url: &str, branch: &str) -> bool {
        urls_match(&self.remote_url, clone_url) && self.branch == branch
    }

    pub fn to_folder(&self) -> FolderConfig {
        FolderConfig {
            path: self.local_path.clone(),
            command: self.post_pull_command.clone(),
            branch: self.branch.clone(),
            repo_url: self.remote_url.clone(),
            command_timeout_secs: (self.command_timeout != DEFAULT_COMMAND_TIMEOUT)
                .then(|| self.command_timeout.as_secs()),
            notify_on_success: self.notify_on_success,
        }
    }
}

impl From<&FolderConfig> for WatchedTarget {
    fn from(folder: &FolderConfig) -> Self {
        Self {
            local_path: folder.path.clone(),
            branch: folder.branch.clone(),
            remote_url: folder.repo_url.clone(),
            post_pull_command: folder.command.trim().to_string(),
            command_timeout: folder.command_timeout(),
            notify_on_success: folder.notify_on_success,
        }
    }
}

/// First target, in registration order, matching both the URL and the branch.
pub fn find_target<'a>(
    targets: &'a [WatchedTarget],
    clone_url: &str,
    branch: &str,
) -> Option<&'a WatchedTarget> {
    targets.iter().find(|t| {
        let matched = t.matches(clone_url, branch);
        if !matched && urls_match(&t.remote_url, clone_url) {
            debug!(
                "Branch mismatch for {}: expected {}, got {}",
                t.local_path.display(),
                t.branch,
                branch
            );
        }
        matched
    })
}

/// Read-only, ordered set of targets keyed by local path.
#[derive(Debug, Clone, Default)]
pub struct WatchRegistry {
    targets: Vec<WatchedTarget>,
}

impl WatchRegistry {
    pub fn new(targets: Vec<WatchedTarget>) -> Result<Self> {
        let mut seen = HashSet::new();
        for target in &targets {
            if !seen.insert(target.local_path.clone()) {
                return Err(DeployerError::DuplicateTarget(target.local_path.clone()));
            }
        }
        Ok(Self { targets })
    }

    pub fn from_config(config: &DeployerConfig) -> Result<Self> {
        Self::new(config.folders.iter().map(WatchedTarget::from).collect())
    }

    pub fn targets(&self) -> &[WatchedTarget] {
        &self.targets
    }

    pub fn len(&self) -> usize {
        self.targets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.targets.is_empty()
    }

    pub fn find_target(&self, clone_url: &str, branch: &str) -> Option<&WatchedTarget> {
        find_target(&self.targets, clone_url, branch)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{GitFixture, git};

    fn target(path: &str, branch: &str, url: &str) -> WatchedTarget {
        WatchedTarget {
            local_path: PathBuf::from(path),
            branch: branch.to_string(),
            remote_url: url.to_string(),
            post_pull_command: String::new(),
            command_timeout: DEFAULT_COMMAND_TIMEOUT,
            notify_on_success: false,
        }
    }

    #[test]
    fn it_should_find_a_matching_target() {
        let registry = WatchRegistry::new(vec![target(
            "/srv/p",
            "main",
            "git@github.com:Owner/Repo.git",
        )])
        .unwrap();

        let found = registry.find_target("https://github.com/owner/repo.git", "main");
        assert_eq!(Some(Path::new("/srv/p")), found.map(|t| t.local_path.as_path()));
    }

    #[test]
    fn it_should_not_match_another_branch() {
        let registry =
            WatchRegistry::new(vec![target("/srv/p", "main", "https://github.com/o/r")]).unwrap();

        assert!(registry.find_target("https://github.com/o/r", "dev").is_none());
    }

    #[test]
    fn it_should_compare_branches_case_sensitively() {
        let registry =
            WatchRegistry::new(vec![target("/srv/p", "main", "https://github.com/o/r")]).unwrap();

        assert!(registry.find_target("https://github.com/o/r", "Main").is_none());
    }

    #[test]
    fn it_should_not_match_another_repository() {
        let registry =
            WatchRegistry::new(vec![target("/srv/p", "main", "https://github.com/o/r")]).unwrap();

        assert!(registry.find_target("https://github.com/o/other", "main").is_none());
    }

    #[test]
    fn it_should_prefer_the_first_registered_match() {
        let registry = WatchRegistry::new(vec![
            target("/srv/first", "main", "https://github.com/o/r"),
            target("/srv/second", "main", "https://github.com/o/r"),
        ])
        .unwrap();

        let found = registry.find_target("https://github.com/o/r", "main").unwrap();
        assert_eq!(PathBuf::from("/srv/first"), found.local_path);
    }

    #[test]
    fn it_should_reject_duplicate_paths() {
        let result = WatchRegistry::new(vec![
            target("/srv/p", "main", "https://github.com/o/r"),
            target("/srv/p", "dev", "https://github.com/o/r"),
        ]);

        assert!(matches!(result, Err(DeployerError::DuplicateTarget(_))));
    }

    #[test]
    fn it_should_round_trip_through_folder_config() {
        let mut t = target("/srv/p", "main", "https://github.com/o/r");
        t.post_pull_command = "make deploy".to_string();
        t.command_timeout = Duration::from_secs(30);

        let folder = t.to_folder();
        assert_eq!(Some(30), folder.command_timeout_secs);
        assert_eq!(t, WatchedTarget::from(&folder));
        assert_eq!(None, target("/x", "main", "u").to_folder().command_timeout_secs);
    }

    #[tokio::test]
    async fn it_should_register_a_live_checkout() {
        let fixture = GitFixture::new();

        let t = WatchedTarget::register(fixture.work_path(), " echo hi ", None, true)
            .await
            .unwrap();

        assert_eq!(
            std::fs::canonicalize(fixture.work_path()).unwrap(),
            t.local_path
        );
        assert_eq!("main", t.branch);
        assert_eq!(fixture.remote_path().display().to_string(), t.remote_url);
        assert_eq!("echo hi", t.post_pull_command);
        assert_eq!(DEFAULT_COMMAND_TIMEOUT, t.command_timeout);
        assert!(t.notify_on_success);
    }

    #[tokio::test]
    async fn it_should_refuse_a_plain_directory() {
        let dir = tempfile::tempdir().unwrap();

        let result = WatchedTarget::register(dir.path(), "", None, false).await;
        assert!(matches!(result, Err(DeployerError::NotAGitRepository(_))));
    }

    #[tokio::test]
    async fn it_should_refuse_a_missing_directory() {
        let result =
            WatchedTarget::register(Path::new("/nonexistent/checkout"), "", None, false).await;
        assert!(matches!(result, Err(DeployerError::NotAGitRepository(_))));
    }

    #[tokio::test]
    async fn it_should_refuse_a_detached_head() {
        let fixture = GitFixture::new();
        git(fixture.work_path(), &["checkout", "--detach"]);

        let result = WatchedTarget::register(fixture.work_path(), "", None, false).await;
        assert!(matches!(
            result,
            Err(DeployerError::GitOperationFailed { .. })
        ));
    }
}
