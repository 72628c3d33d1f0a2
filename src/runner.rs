//! Post-pull command execution with a bounded run time.

use async_trait::async_trait;
use nix::sys::signal::{Signal, killpg};
use nix::unistd::Pid;
use std::path::Path;
use std::process::{ExitStatus, Stdio};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::Command;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// Default bound on a post-pull command (10 minutes).
pub const DEFAULT_COMMAND_TIMEOUT: Duration = Duration::from_secs(600);

/// Maximum size for captured output before truncation (1MB)
pub const MAX_OUTPUT_SIZE: usize = 1024 * 1024;

/// How long to wait for output readers once the process group is gone.
const DRAIN_TIMEOUT: Duration = Duration::from_secs(2);

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunResult {
    /// Exit code 0, with combined stdout/stderr.
    Success(String),
    /// Non-zero exit or failure to start.
    Failure { output: String, error: String },
    /// Killed after exceeding the timeout; output captured up to that point.
    Timeout { output: String, after: Duration },
}

#[async_trait]
pub trait CommandRunner: Send + Sync {
    async fn run(&self, working_directory: &Path, command: &str, timeout: Duration) -> RunResult;
}

/// Runs commands through `/bin/sh -c`, so pipes, `&&` and globbing work.
#[derive(Debug, Clone, Default)]
pub struct ShellRunner;

type SharedOutput = Arc<Mutex<String>>;

fn append_line(output: &SharedOutput, line: &[u8]) {
    if let Ok(mut guard) = output.lock() {
        if guard.len() <= MAX_OUTPUT_SIZE {
            guard.push_str(&String::from_utf8_lossy(line));
        }
    }
}

fn collect<R>(reader: Option<R>, output: SharedOutput) -> Option<JoinHandle<()>>
where
    R: AsyncRead + Unpin + Send + 'static,
{
    let reader = reader?;
    Some(tokio::spawn(async move {
        let mut reader = BufReader::new(reader);
        let mut line = Vec::new();
        loop {
            line.clear();
            match reader.read_until(b'\n', &mut line).await {
                Ok(0) => break,
                Ok(_) => append_line(&output, &line),
                Err(e) => {
                    debug!("Stopped reading command output: {}", e);
                    break;
                }
            }
        }
    }))
}

async fn drain(readers: Vec<JoinHandle<()>>) {
    for handle in readers {
        let abort = handle.abort_handle();
        if tokio::time::timeout(DRAIN_TIMEOUT, handle).await.is_err() {
            abort.abort();
        }
    }
}

/// Truncate at a char boundary, marking the cut.
pub fn truncate_output(mut output: String) -> String {
    if output.len() > MAX_OUTPUT_SIZE {
        let mut cut = MAX_OUTPUT_SIZE;
        while !output.is_char_boundary(cut) {
            cut -= 1;
        }
        output.truncate(cut);
        output.push_str("\n... (output truncated)");
    }
    output
}

fn take_output(output: &SharedOutput) -> String {
    let captured = output
        .lock()
        .map(|mut guard| std::mem::take(&mut *guard))
        .unwrap_or_default();
    truncate_output(captured)
}

fn describe_exit(status: ExitStatus) -> String {
    match status.code() {
        Some(code) => format!("command exited with status {}", code),
        None => "command was terminated by a signal".to_string(),
    }
}

/// Kill every process in the command's group, not just the shell.
fn kill_process_group(pid: Option<u32>) {
    let Some(pid) = pid else {
        return;
    };
    if let Err(e) = killpg(Pid::from_raw(pid as i32), Signal::SIGKILL) {
        debug!("killpg({}) failed: {}", pid, e);
    }
}

#[async_trait]
impl CommandRunner for ShellRunner {
    async fn run(&self, working_directory: &Path, command: &str, timeout: Duration) -> RunResult {
        info!(
            "Running (cwd = '{}'): {}",
            working_directory.display(),
            command
        );

        let mut child = match Command::new("sh")
            .arg("-c")
            .arg(command)
            .current_dir(working_directory)
            .env("CI", "true")
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .process_group(0)
            .kill_on_drop(true)
            .spawn()
        {
            Ok(child) => child,
            Err(e) => {
                error!("Command failed to start: {}", e);
                return RunResult::Failure {
                    output: String::new(),
                    error: format!("command failed to start: {}", e),
                };
            }
        };

        let pid = child.id();
        let output: SharedOutput = Arc::new(Mutex::new(String::new()));
        let readers: Vec<_> = [
            collect(child.stdout.take(), output.clone()),
            collect(child.stderr.take(), output.clone()),
        ]
        .into_iter()
        .flatten()
        .collect();

        match tokio::time::timeout(timeout, child.wait()).await {
            Ok(Ok(status)) => {
                drain(readers).await;
                let output = take_output(&output);
                if status.success() {
                    debug!("Command output:\n{}", output);
                    RunResult::Success(output)
                } else {
                    let error = describe_exit(status);
                    error!("{}:\n{}", error, output);
                    RunResult::Failure { output, error }
                }
            }
            Ok(Err(e)) => {
                kill_process_group(pid);
                drain(readers).await;
                error!("Waiting for command failed: {}", e);
                RunResult::Failure {
                    output: take_output(&output),
                    error: format!("waiting for command failed: {}", e),
                }
            }
            Err(_) => {
                warn!("Command timed out after {:?}, killing it", timeout);
                kill_process_group(pid);
                if let Err(e) = child.kill().await {
                    debug!("Killing timed out command failed: {}", e);
                }
                drain(readers).await;
                RunResult::Timeout {
                    output: take_output(&output),
                    after: timeout,
                }
            }
        }
    }
}
