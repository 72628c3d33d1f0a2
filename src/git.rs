//! Git working copy synchronisation.

use async_trait::async_trait;
use std::path::Path;
use std::process::Output;
use std::time::Duration;
use tokio::process::Command;
use tracing::{debug, error, info, warn};

use crate::error::{DeployerError, Result};

const DEFAULT_REMOTE: &str = "origin";
/// Upper bound on a single `git fetch` or `git pull`.
pub const DEFAULT_GIT_TIMEOUT: Duration = Duration::from_secs(300);
const BATCH_SSH_COMMAND: &str = "ssh -o BatchMode=yes";
/// Marker git prints on merge conflicts, e.g. `CONFLICT (content): Merge conflict in x`.
const CONFLICT_MARKER: &str = "CONFLICT";

/// Outcome of fetching and pulling one branch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncResult {
    /// Pull output on success.
    Success(String),
    /// Combined pull output containing the conflict marker.
    ConflictFailure(String),
    /// Anything else that went wrong: fetch failure, pull failure, git missing.
    OtherFailure(String),
}

impl SyncResult {
    pub fn is_success(&self) -> bool {
        matches!(self, SyncResult::Success(_))
    }
}

#[async_trait]
pub trait Synchronizer: Send + Sync {
    /// Bring the working copy at `local_path` up to date with the remote `branch`.
    async fn synchronize(&self, local_path: &Path, branch: &str) -> SyncResult;
}

/// Synchroniser that shells out to the `git` binary.
#[derive(Debug, Clone)]
pub struct GitSynchronizer {
    remote: String,
    timeout: Duration,
}

impl Default for GitSynchronizer {
    fn default() -> Self {
        Self::new(DEFAULT_REMOTE)
    }
}

impl GitSynchronizer {
    pub fn new(remote: impl Into<String>) -> Self {
        Self {
            remote: remote.into(),
            timeout: DEFAULT_GIT_TIMEOUT,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Run `git <operation> <remote> <branch>`, killing git when it outlives the timeout.
    async fn remote_operation(
        &self,
        local_path: &Path,
        operation: &str,
        branch: &str,
    ) -> std::result::Result<Output, String> {
        info!(
            "Running (cwd = '{}'): git {} {} {}",
            local_path.display(),
            operation,
            self.remote,
            branch
        );
        let run = git_command(local_path)
            .args([operation, self.remote.as_str(), branch])
            .output();

        match tokio::time::timeout(self.timeout, run).await {
            Ok(Ok(output)) => Ok(output),
            Ok(Err(e)) => Err(format!("git {} failed to start: {}", operation, e)),
            Err(_) => Err(format!(
                "git {} timed out after {}s",
                operation,
                self.timeout.as_secs()
            )),
        }
    }
}

/// `git` with a fixed locale so the conflict marker is always English, and without
/// interactive credential or host-key prompts that would hang a background deployment.
fn git_command(repo_path: &Path) -> Command {
    let mut cmd = Command::new("git");
    cmd.current_dir(repo_path)
        .env("LC_ALL", "C")
        .env("GIT_TERMINAL_PROMPT", "0")
        .kill_on_drop(true);
    if std::env::var_os("GIT_SSH_COMMAND").is_none() {
        cmd.env("GIT_SSH_COMMAND", BATCH_SSH_COMMAND);
    }
    cmd
}

fn combined_output(output: &Output) -> String {
    let mut combined = String::from_utf8_lossy(&output.stdout).into_owned();
    let stderr = String::from_utf8_lossy(&output.stderr);
    if !stderr.is_empty() {
        if !combined.is_empty() && !combined.ends_with('\n') {
            combined.push('\n');
        }
        combined.push_str(&stderr);
    }
    combined
}

/// Classify the captured output of `git pull`.
fn classify_pull(output: &Output) -> SyncResult {
    let combined = combined_output(output);

    if combined.contains(CONFLICT_MARKER) {
        return SyncResult::ConflictFailure(combined);
    }
    if !output.status.success() {
        return SyncResult::OtherFailure(format!("git pull failed: {}", combined));
    }
    SyncResult::Success(combined)
}

#[async_trait]
impl Synchronizer for GitSynchronizer {
    async fn synchronize(&self, local_path: &Path, branch: &str) -> SyncResult {
        let fetch = match self.remote_operation(local_path, "fetch", branch).await {
            Ok(output) => output,
            Err(msg) => {
                error!("{}", msg);
                return SyncResult::OtherFailure(msg);
            }
        };
        if !fetch.status.success() {
            let msg = format!(
                "git fetch failed: {}",
                String::from_utf8_lossy(&fetch.stderr)
            );
            error!("{}", msg);
            return SyncResult::OtherFailure(msg);
        }

        let pull = match self.remote_operation(local_path, "pull", branch).await {
            Ok(output) => output,
            Err(msg) => {
                error!("{}", msg);
                return SyncResult::OtherFailure(msg);
            }
        };

        let result = classify_pull(&pull);
        match &result {
            SyncResult::Success(output) => debug!("git pull output:\n{}", output),
            SyncResult::ConflictFailure(output) => warn!("git pull hit a conflict:\n{}", output),
            SyncResult::OtherFailure(msg) => error!("{}", msg),
        }
        result
    }
}

/// A directory is accepted as a working copy when it carries a `.git` entry.
pub fn is_git_repository(path: &Path) -> bool {
    path.join(".git").exists()
}

async fn read_git_value(repo_path: &Path, operation: &str, args: &[&str]) -> Result<String> {
    let output = git_command(repo_path).args(args).output().await?;
    if !output.status.success() {
        return Err(DeployerError::GitOperationFailed {
            operation: operation.to_string(),
            message: String::from_utf8_lossy(&output.stderr).trim().to_string(),
        });
    }
    Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
}

/// Name of the branch currently checked out at `repo_path`.
pub async fn current_branch(repo_path: &Path) -> Result<String> {
    read_git_value(
        repo_path,
        "rev-parse --abbrev-ref HEAD",
        &["rev-parse", "--abbrev-ref", "HEAD"],
    )
    .await
}

/// URL of the `origin` remote at `repo_path`.
pub async fn remote_url(repo_path: &Path) -> Result<String> {
    read_git_value(
        repo_path,
        "config --get remote.origin.url",
        &["config", "--get", "remote.origin.url"],
    )
    .await
    .map_err(|e| match e {
        DeployerError::GitOperationFailed { operation, .. } => DeployerError::GitOperationFailed {
            operation,
            message: "no origin remote configured".to_string(),
        },
        other => other,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{GitFixture, git};
    use std::os::unix::process::ExitStatusExt;
    use std::process::ExitStatus;

    fn output(code: i32, stdout: &str, stderr: &str) -> Output {
        Output {
            status: ExitStatus::from_raw(code << 8),
            stdout: stdout.as_bytes().to_vec(),
            stderr: stderr.as_bytes().to_vec(),
        }
    }

    #[test]
    fn it_should_classify_conflict_regardless_of_exit_code() {
        let failed = output(
            1,
            "Auto-merging a.txt\nCONFLICT (content): Merge conflict in a.txt\n",
            "",
        );
        assert!(matches!(classify_pull(&failed), SyncResult::ConflictFailure(_)));

        let succeeded = output(0, "", "CONFLICT somewhere in stderr");
        assert!(matches!(
            classify_pull(&succeeded),
            SyncResult::ConflictFailure(_)
        ));
    }

    #[test]
    fn it_should_classify_other_non_zero_exits_as_failure() {
        let failed = output(128, "", "fatal: couldn't find remote ref nope");
        match classify_pull(&failed) {
            SyncResult::OtherFailure(msg) => assert!(msg.contains("couldn't find remote ref")),
            other => panic!("{other:?} should be a failure"),
        }
    }

    #[test]
    fn it_should_classify_clean_pull_as_success() {
        let ok = output(0, "Already up to date.\n", "");
        assert_eq!(
            SyncResult::Success("Already up to date.\n".to_string()),
            classify_pull(&ok)
        );
    }

    #[tokio::test]
    async fn it_should_pull_new_commits() {
        let fixture = GitFixture::new();
        fixture.push_upstream_change("a.txt", "from upstream\n");

        let result = GitSynchronizer::default()
            .synchronize(fixture.work_path(), "main")
            .await;

        assert!(result.is_success(), "{result:?} should be success");
        let content = std::fs::read_to_string(fixture.work_path().join("a.txt")).unwrap();
        assert_eq!("from upstream\n", content);
    }

    #[tokio::test]
    async fn it_should_report_conflicts() {
        let fixture = GitFixture::new();
        fixture.push_upstream_change("a.txt", "upstream version\n");
        fixture.commit_local_change("a.txt", "local version\n");

        let result = GitSynchronizer::default()
            .synchronize(fixture.work_path(), "main")
            .await;

        match result {
            SyncResult::ConflictFailure(details) => assert!(details.contains("a.txt")),
            other => panic!("{other:?} should be a conflict"),
        }
    }

    #[tokio::test]
    async fn it_should_fail_when_fetch_fails() {
        let fixture = GitFixture::new();
        git(
            fixture.work_path(),
            &["remote", "set-url", "origin", "/nonexistent/remote.git"],
        );

        let result = GitSynchronizer::default()
            .synchronize(fixture.work_path(), "main")
            .await;

        match result {
            SyncResult::OtherFailure(msg) => assert!(msg.starts_with("git fetch failed")),
            other => panic!("{other:?} should be a fetch failure"),
        }
    }

    #[tokio::test]
    async fn it_should_give_up_on_a_stalled_fetch() {
        let fixture = GitFixture::new();
        // A transport that never answers.
        git(fixture.work_path(), &["config", "protocol.ext.allow", "always"]);
        git(
            fixture.work_path(),
            &["remote", "set-url", "origin", "ext::sleep 30"],
        );

        let started = std::time::Instant::now();
        let result = GitSynchronizer::default()
            .with_timeout(Duration::from_secs(1))
            .synchronize(fixture.work_path(), "main")
            .await;

        assert!(started.elapsed() < Duration::from_secs(10));
        match result {
            SyncResult::OtherFailure(msg) => assert_eq!("git fetch timed out after 1s", msg),
            other => panic!("{other:?} should be a fetch timeout"),
        }
    }

    #[tokio::test]
    async fn it_should_fail_for_an_unknown_branch() {
        let fixture = GitFixture::new();

        let result = GitSynchronizer::default()
            .synchronize(fixture.work_path(), "does-not-exist")
            .await;

        assert!(matches!(result, SyncResult::OtherFailure(_)));
    }

    #[tokio::test]
    async fn it_should_fail_outside_a_repository() {
        let dir = tempfile::tempdir().unwrap();

        let result = GitSynchronizer::default()
            .synchronize(dir.path(), "main")
            .await;

        assert!(matches!(result, SyncResult::OtherFailure(_)));
    }

    #[tokio::test]
    async fn it_should_read_branch_and_remote() {
        let fixture = GitFixture::new();

        assert_eq!("main", current_branch(fixture.work_path()).await.unwrap());
        assert_eq!(
            fixture.remote_path().display().to_string(),
            remote_url(fixture.work_path()).await.unwrap()
        );
        assert!(is_git_repository(fixture.work_path()));
    }

    #[tokio::test]
    async fn it_should_fail_reading_remote_without_origin() {
        let fixture = GitFixture::new();
        git(fixture.work_path(), &["remote", "remove", "origin"]);

        let result = remote_url(fixture.work_path()).await;
        assert!(matches!(
            result,
            Err(DeployerError::GitOperationFailed { .. })
        ));
    }
}
