//! Throwaway git repositories for tests.

use std::path::{Path, PathBuf};
use std::process::Command;
use tempfile::TempDir;

/// Run git in `dir` with a fixed identity, panicking on failure.
pub fn git(dir: &Path, args: &[&str]) -> String {
    let output = Command::new("git")
        .current_dir(dir)
        .args(args)
        .env("GIT_AUTHOR_NAME", "Test")
        .env("GIT_AUTHOR_EMAIL", "test@example.com")
        .env("GIT_COMMITTER_NAME", "Test")
        .env("GIT_COMMITTER_EMAIL", "test@example.com")
        .output()
        .expect("git should be installed");
    assert!(
        output.status.success(),
        "git {:?} failed: {}",
        args,
        String::from_utf8_lossy(&output.stderr)
    );
    String::from_utf8_lossy(&output.stdout).into_owned()
}

fn configure_clone(dir: &Path) {
    git(dir, &["config", "user.name", "Test"]);
    git(dir, &["config", "user.email", "test@example.com"]);
    git(dir, &["config", "pull.rebase", "false"]);
}

/// A bare remote with one commit on `main`, a working clone of it, and a second
/// clone standing in for other developers pushing upstream.
pub struct GitFixture {
    root: TempDir,
    work: PathBuf,
}

impl GitFixture {
    pub fn new() -> Self {
        let root = tempfile::tempdir().unwrap();
        let seed = root.path().join("seed");
        std::fs::create_dir(&seed).unwrap();

        git(&seed, &["init", "-b", "main"]);
        configure_clone(&seed);
        std::fs::write(seed.join("a.txt"), "initial\n").unwrap();
        git(&seed, &["add", "-A"]);
        git(&seed, &["commit", "-m", "initial"]);

        let work = root.path().join("work");
        let fixture = GitFixture { root, work };
        let remote = fixture.remote_path();
        git(
            fixture.root.path(),
            &["clone", "--bare", "seed", remote.to_str().unwrap()],
        );
        for name in ["work", "other"] {
            git(
                fixture.root.path(),
                &["clone", remote.to_str().unwrap(), name],
            );
            configure_clone(&fixture.root.path().join(name));
        }
        fixture
    }

    pub fn remote_path(&self) -> PathBuf {
        self.root.path().join("remote.git")
    }

    pub fn work_path(&self) -> &Path {
        &self.work
    }

    pub fn other_path(&self) -> PathBuf {
        self.root.path().join("other")
    }

    /// Commit and push `content` to `file` from the second clone.
    pub fn push_upstream_change(&self, file: &str, content: &str) {
        let other = self.other_path();
        git(&other, &["pull"]);
        std::fs::write(other.join(file), content).unwrap();
        git(&other, &["add", "-A"]);
        git(&other, &["commit", "-m", "upstream change"]);
        git(&other, &["push", "origin", "main"]);
    }

    /// Commit `content` to `file` in the working clone without pushing.
    pub fn commit_local_change(&self, file: &str, content: &str) {
        let work = self.work_path();
        std::fs::write(work.join(file), content).unwrap();
        git(work, &["add", "-A"]);
        git(work, &["commit", "-m", "local change"]);
    }
}
