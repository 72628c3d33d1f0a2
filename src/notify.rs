//! Failure (and optional success) notifications.
//!
//! Delivery is best effort: the pipeline logs a failed delivery and moves on.

use async_trait::async_trait;
use chrono::Utc;
use lettre::message::Mailbox;
use lettre::message::header::ContentType;
use lettre::transport::smtp::authentication::Credentials;
use lettre::{AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor};
use std::path::Path;
use tracing::{error, info, warn};

use crate::config::SmtpConfig;
use crate::error::{DeployerError, Result};

const SUBJECT_PREFIX: &str = "GitHub Auto-Deployer";
const SMTPS_PORT: u16 = 465;

#[async_trait]
pub trait Notifier: Send + Sync {
    async fn notify_failure(&self, target_path: &Path, branch: &str, message: &str) -> Result<()>;

    async fn notify_conflict(
        &self,
        target_path: &Path,
        branch: &str,
        conflict_details: &str,
    ) -> Result<()>;

    async fn notify_command_failure(
        &self,
        target_path: &Path,
        branch: &str,
        command: &str,
        message: &str,
    ) -> Result<()>;

    async fn notify_success(&self, target_path: &Path, branch: &str, output: &str) -> Result<()>;
}

/// A rendered plain-text notification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notification {
    pub subject: String,
    pub body: String,
}

fn footer() -> &'static str {
    "\n---\nThis is an automated message from GitHub Auto-Deployer.\n"
}

fn now() -> String {
    Utc::now().to_rfc2822()
}

pub fn failure_notification(target_path: &Path, branch: &str, message: &str) -> Notification {
    let path = target_path.display();
    Notification {
        subject: format!("{}: Deployment Failed for {}", SUBJECT_PREFIX, path),
        body: format!(
            "Deployment Failure\n\nRepository: {}\nBranch: {}\nTime: {}\n\nError Details:\n{}\n\n\
             Check the repository on the server; nothing was executed after the failure.\n{}",
            path,
            branch,
            now(),
            message,
            footer()
        ),
    }
}

pub fn conflict_notification(
    target_path: &Path,
    branch: &str,
    conflict_details: &str,
) -> Notification {
    let path = target_path.display();
    Notification {
        subject: format!("{}: Merge Conflict in {}", SUBJECT_PREFIX, path),
        body: format!(
            "Merge Conflict Detected\n\nRepository: {}\nBranch: {}\nTime: {}\n\nConflict Details:\n{}\n\n\
             Action Required:\nResolve the conflicts in the working copy and commit the result.\n\
             Deployments of this branch will keep failing until then.\n{}",
            path,
            branch,
            now(),
            conflict_details,
            footer()
        ),
    }
}

pub fn command_failure_notification(
    target_path: &Path,
    branch: &str,
    command: &str,
    message: &str,
) -> Notification {
    let path = target_path.display();
    Notification {
        subject: format!("{}: Command Failed for {}", SUBJECT_PREFIX, path),
        body: format!(
            "Command Execution Failure\n\nRepository: {}\nBranch: {}\nCommand: {}\nTime: {}\n\nError Details:\n{}\n\n\
             The repository was updated, but the post-pull command failed.\n{}",
            path,
            branch,
            command,
            now(),
            message,
            footer()
        ),
    }
}

pub fn success_notification(target_path: &Path, branch: &str, output: &str) -> Notification {
    let path = target_path.display();
    Notification {
        subject: format!("{}: Deployed {}", SUBJECT_PREFIX, path),
        body: format!(
            "Deployment Succeeded\n\nRepository: {}\nBranch: {}\nTime: {}\n\nOutput:\n{}\n{}",
            path,
            branch,
            now(),
            output,
            footer()
        ),
    }
}

/// Sink used when no SMTP server is configured: notifications end up in the log.
#[derive(Debug, Clone, Default)]
pub struct LogNotifier;

impl LogNotifier {
    fn emit(&self, notification: Notification, failed: bool) {
        if failed {
            warn!(subject = %notification.subject, "{}", notification.body);
        } else {
            info!(subject = %notification.subject, "{}", notification.body);
        }
    }
}

#[async_trait]
impl Notifier for LogNotifier {
    async fn notify_failure(&self, target_path: &Path, branch: &str, message: &str) -> Result<()> {
        self.emit(failure_notification(target_path, branch, message), true);
        Ok(())
    }

    async fn notify_conflict(
        &self,
        target_path: &Path,
        branch: &str,
        conflict_details: &str,
    ) -> Result<()> {
        self.emit(
            conflict_notification(target_path, branch, conflict_details),
            true,
        );
        Ok(())
    }

    async fn notify_command_failure(
        &self,
        target_path: &Path,
        branch: &str,
        command: &str,
        message: &str,
    ) -> Result<()> {
        self.emit(
            command_failure_notification(target_path, branch, command, message),
            true,
        );
        Ok(())
    }

    async fn notify_success(&self, target_path: &Path, branch: &str, output: &str) -> Result<()> {
        self.emit(success_notification(target_path, branch, output), false);
        Ok(())
    }
}

/// Sends notifications as plain-text mail over SMTP (STARTTLS, or implicit TLS on 465).
pub struct EmailNotifier {
    transport: AsyncSmtpTransport<Tokio1Executor>,
    from: Mailbox,
    to: Vec<Mailbox>,
}

fn parse_mailbox(field: &str, value: &str) -> Result<Mailbox> {
    value.trim().parse::<Mailbox>().map_err(|e| {
        DeployerError::ConfigError(format!("Invalid smtp.{} address '{}': {}", field, value, e))
    })
}

impl EmailNotifier {
    pub fn new(config: &SmtpConfig) -> Result<Self> {
        let from = parse_mailbox("from", &config.from)?;
        let to = config
            .to
            .split(',')
            .filter(|s| !s.trim().is_empty())
            .map(|addr| parse_mailbox("to", addr))
            .collect::<Result<Vec<_>>>()?;
        if to.is_empty() {
            return Err(DeployerError::ConfigError(
                "smtp.to must name at least one recipient".to_string(),
            ));
        }

        let builder = if config.port == SMTPS_PORT {
            AsyncSmtpTransport::<Tokio1Executor>::relay(&config.host)
        } else {
            AsyncSmtpTransport::<Tokio1Executor>::starttls_relay(&config.host)
        }
        .map_err(|e| DeployerError::ConfigError(format!("Invalid SMTP host: {}", e)))?
        .port(config.port);

        let builder = if config.username.is_empty() {
            builder
        } else {
            builder.credentials(Credentials::new(
                config.username.clone(),
                config.password.clone(),
            ))
        };

        Ok(Self {
            transport: builder.build(),
            from,
            to,
        })
    }

    async fn send(&self, notification: Notification) -> Result<()> {
        let mut builder = Message::builder()
            .from(self.from.clone())
            .subject(notification.subject.clone())
            .header(ContentType::TEXT_PLAIN);
        for recipient in &self.to {
            builder = builder.to(recipient.clone());
        }
        let message = builder
            .body(notification.body)
            .map_err(|e| DeployerError::NotificationFailed(e.to_string()))?;

        match self.transport.send(message).await {
            Ok(_) => {
                info!(subject = %notification.subject, "Notification email sent");
                Ok(())
            }
            Err(e) => {
                error!("Failed to send notification email: {}", e);
                Err(DeployerError::NotificationFailed(e.to_string()))
            }
        }
    }
}

#[async_trait]
impl Notifier for EmailNotifier {
    async fn notify_failure(&self, target_path: &Path, branch: &str, message: &str) -> Result<()> {
        self.send(failure_notification(target_path, branch, message))
            .await
    }

    async fn notify_conflict(
        &self,
        target_path: &Path,
        branch: &str,
        conflict_details: &str,
    ) -> Result<()> {
        self.send(conflict_notification(target_path, branch, conflict_details))
            .await
    }

    async fn notify_command_failure(
        &self,
        target_path: &Path,
        branch: &str,
        command: &str,
        message: &str,
    ) -> Result<()> {
        self.send(command_failure_notification(
            target_path,
            branch,
            command,
            message,
        ))
        .await
    }

    async fn notify_success(&self, target_path: &Path, branch: &str, output: &str) -> Result<()> {
        self.send(success_notification(target_path, branch, output))
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn smtp(to: &str) -> SmtpConfig {
        SmtpConfig {
            host: "smtp.example.com".to_string(),
            port: 587,
            username: "user".to_string(),
            password: "pass".to_string(),
            from: "Deployer <deployer@example.com>".to_string(),
            to: to.to_string(),
        }
    }

    #[test]
    fn it_should_render_a_conflict_notification() {
        let n = conflict_notification(Path::new("/srv/app"), "main", "CONFLICT in a.txt");

        assert_eq!("GitHub Auto-Deployer: Merge Conflict in /srv/app", n.subject);
        assert!(n.body.contains("Branch: main"));
        assert!(n.body.contains("CONFLICT in a.txt"));
    }

    #[test]
    fn it_should_render_a_command_failure_notification() {
        let n = command_failure_notification(
            Path::new("/srv/app"),
            "main",
            "make deploy",
            "exit 2",
        );

        assert_eq!("GitHub Auto-Deployer: Command Failed for /srv/app", n.subject);
        assert!(n.body.contains("Command: make deploy"));
        assert!(n.body.contains("exit 2"));
    }

    #[test]
    fn it_should_render_failure_and_success_notifications() {
        let failed = failure_notification(Path::new("/srv/app"), "dev", "fetch failed");
        assert!(failed.subject.contains("Deployment Failed"));
        assert!(failed.body.contains("fetch failed"));

        let ok = success_notification(Path::new("/srv/app"), "dev", "built");
        assert!(ok.subject.contains("Deployed /srv/app"));
        assert!(ok.body.contains("built"));
    }

    #[tokio::test]
    async fn it_should_build_an_email_notifier() {
        let notifier = EmailNotifier::new(&smtp("a@example.com, b@example.com")).unwrap();
        assert_eq!(2, notifier.to.len());
        assert_eq!("deployer@example.com", notifier.from.email.to_string());
    }

    #[test]
    fn it_should_reject_bad_addresses() {
        assert!(matches!(
            EmailNotifier::new(&smtp("not an address")),
            Err(DeployerError::ConfigError(_))
        ));
        assert!(matches!(
            EmailNotifier::new(&smtp(" , ")),
            Err(DeployerError::ConfigError(_))
        ));
    }

    #[tokio::test]
    async fn it_should_always_accept_log_notifications() {
        let notifier = LogNotifier;
        assert!(
            notifier
                .notify_conflict(Path::new("/srv/app"), "main", "details")
                .await
                .is_ok()
        );
        assert!(
            notifier
                .notify_success(Path::new("/srv/app"), "main", "ok")
                .await
                .is_ok()
        );
    }
}
