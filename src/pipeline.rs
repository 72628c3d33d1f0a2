//! Push → match → synchronise → run → notify.

use std::collections::HashMap;
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::{Mutex, Semaphore};
use tracing::{Instrument, error, info, info_span, warn};
use uuid::Uuid;

use crate::error::Result;
use crate::git::{SyncResult, Synchronizer};
use crate::notify::Notifier;
use crate::registry::{WatchRegistry, WatchedTarget};
use crate::runner::{CommandRunner, RunResult};
use crate::webhook::PushNotification;

/// Deployments allowed to synchronise or run at the same time.
pub const DEFAULT_WORKERS: usize = 4;

/// Result of one pipeline run. Only used to pick the notification and for logging.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeploymentOutcome {
    /// No target matched the repository and branch.
    Skipped,
    ConflictFailure,
    PullFailure,
    CommandFailure,
    CommandTimeout,
    Success,
}

impl fmt::Display for DeploymentOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            DeploymentOutcome::Skipped => "skipped",
            DeploymentOutcome::ConflictFailure => "conflict",
            DeploymentOutcome::PullFailure => "pull failed",
            DeploymentOutcome::CommandFailure => "command failed",
            DeploymentOutcome::CommandTimeout => "command timed out",
            DeploymentOutcome::Success => "success",
        };
        f.write_str(s)
    }
}

pub struct DeploymentPipeline {
    registry: Arc<WatchRegistry>,
    synchronizer: Arc<dyn Synchronizer>,
    runner: Arc<dyn CommandRunner>,
    notifier: Arc<dyn Notifier>,
    /// One lock per local path, held across synchronise and execute.
    target_locks: HashMap<PathBuf, Arc<Mutex<()>>>,
    /// Taken only once the target lock is held, so deliveries queued behind a busy
    /// target never occupy a slot another target could use.
    run_slots: Semaphore,
}

fn log_delivery(kind: &str, result: Result<()>) {
    if let Err(e) = result {
        error!("Failed to send {} notification: {}", kind, e);
    }
}

impl DeploymentPipeline {
    pub fn new(
        registry: Arc<WatchRegistry>,
        synchronizer: Arc<dyn Synchronizer>,
        runner: Arc<dyn CommandRunner>,
        notifier: Arc<dyn Notifier>,
    ) -> Self {
        let target_locks = registry
            .targets()
            .iter()
            .map(|t| (t.local_path.clone(), Arc::new(Mutex::new(()))))
            .collect();

        Self {
            registry,
            synchronizer,
            runner,
            notifier,
            target_locks,
            run_slots: Semaphore::new(DEFAULT_WORKERS),
        }
    }

    /// Bound the number of deployments running at once.
    pub fn with_workers(mut self, workers: usize) -> Self {
        self.run_slots = Semaphore::new(workers.max(1));
        self
    }

    pub fn registry(&self) -> &WatchRegistry {
        &self.registry
    }

    /// Resolve the push to a target, trying the SSH URL when the clone URL finds nothing.
    pub fn resolve(&self, push: &PushNotification) -> Option<&WatchedTarget> {
        let branch = push.branch();
        self.registry
            .find_target(push.clone_url(), branch)
            .or_else(|| {
                push.ssh_url()
                    .and_then(|ssh| self.registry.find_target(ssh, branch))
            })
    }

    /// Run the whole pipeline for one push delivery.
    pub async fn process(&self, push: &PushNotification) -> DeploymentOutcome {
        let Some(target) = self.resolve(push) else {
            info!(
                "No matching target for repo '{}' and branch '{}', skipping.",
                push.repository_name(),
                push.branch()
            );
            return DeploymentOutcome::Skipped;
        };

        let span = info_span!(
            "deployment",
            id = %Uuid::now_v7(),
            path = %target.local_path.display(),
            branch = %target.branch,
        );
        let outcome = self.deploy(target).instrument(span).await;
        info!(
            path = %target.local_path.display(),
            outcome = %outcome,
            "Deployment finished"
        );
        outcome
    }

    async fn deploy(&self, target: &WatchedTarget) -> DeploymentOutcome {
        let lock = self
            .target_locks
            .get(&target.local_path)
            .cloned()
            .unwrap_or_default();
        let _guard = lock.lock().await;
        let Ok(_slot) = self.run_slots.acquire().await else {
            error!("Deployment slots are closed, dropping delivery");
            return DeploymentOutcome::Skipped;
        };

        info!("Pulling latest changes for {}", target.local_path.display());
        match self
            .synchronizer
            .synchronize(&target.local_path, &target.branch)
            .await
        {
            SyncResult::Success(_) => {}
            SyncResult::ConflictFailure(details) => {
                warn!("Merge conflict detected, not running the command");
                log_delivery(
                    "conflict",
                    self.notifier
                        .notify_conflict(&target.local_path, &target.branch, &details)
                        .await,
                );
                return DeploymentOutcome::ConflictFailure;
            }
            SyncResult::OtherFailure(message) => {
                error!("Synchronisation failed: {}", message);
                log_delivery(
                    "failure",
                    self.notifier
                        .notify_failure(&target.local_path, &target.branch, &message)
                        .await,
                );
                return DeploymentOutcome::PullFailure;
            }
        }

        if !target.has_command() {
            info!("No post-pull command configured");
            self.report_success(target, "Pulled latest changes; no command configured.")
                .await;
            return DeploymentOutcome::Success;
        }

        let command = &target.post_pull_command;
        match self
            .runner
            .run(&target.local_path, command, target.command_timeout)
            .await
        {
            RunResult::Success(output) => {
                info!("Command succeeded");
                self.report_success(target, &output).await;
                DeploymentOutcome::Success
            }
            RunResult::Failure { output, error } => {
                let message = format!("{}\n\nOutput:\n{}", error, output);
                log_delivery(
                    "command failure",
                    self.notifier
                        .notify_command_failure(
                            &target.local_path,
                            &target.branch,
                            command,
                            &message,
                        )
                        .await,
                );
                DeploymentOutcome::CommandFailure
            }
            RunResult::Timeout { output, after } => {
                let message = format!(
                    "command timed out after {}s and was killed\n\nOutput until termination:\n{}",
                    after.as_secs(),
                    output
                );
                log_delivery(
                    "command timeout",
                    self.notifier
                        .notify_command_failure(
                            &target.local_path,
                            &target.branch,
                            command,
                            &message,
                        )
                        .await,
                );
                DeploymentOutcome::CommandTimeout
            }
        }
    }

    async fn report_success(&self, target: &WatchedTarget, output: &str) {
        if target.notify_on_success {
            log_delivery(
                "success",
                self.notifier
                    .notify_success(&target.local_path, &target.branch, output)
                    .await,
            );
        }
    }
}
