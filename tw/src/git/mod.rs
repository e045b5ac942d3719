//! Git adapter
//!
//! The fix orchestrator's window onto the repository: branch management,
//! applying fixer edits to the working tree, the single atomic commit, and
//! full revert on scope violations. The CLI implementation shells out to
//! `git`; tests use the in-memory mock.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use thiserror::Error;
use tokio::process::Command;
use tracing::{debug, info, warn};

/// Errors from git operations
#[derive(Debug, Error)]
pub enum GitError {
    #[error("Git unavailable: {0}")]
    Unavailable(String),

    #[error("Git conflict: {0}")]
    Conflict(String),

    #[error("Git command failed: {0}")]
    CommandFailed(String),
}

impl GitError {
    /// Whether this is a conflict (recoverable per-call by policy)
    pub fn is_conflict(&self) -> bool {
        matches!(self, GitError::Conflict(_))
    }
}

/// Repository operations the fix orchestrator depends on
///
/// All operations are synchronous from the core's perspective: when a call
/// returns, its effect is visible to the next call.
#[async_trait]
pub trait GitAdapter: Send + Sync {
    /// Create the branch, or switch to it when it already exists
    async fn create_or_checkout_branch(&self, name: &str) -> Result<(), GitError>;

    /// Write new file contents into the working tree, uncommitted
    async fn apply_edits(&self, edits: &HashMap<String, String>) -> Result<(), GitError>;

    /// Commit everything in the working tree; returns the commit id
    async fn commit_all(&self, message: &str) -> Result<String, GitError>;

    /// Discard all uncommitted changes, returning the tree to HEAD
    async fn revert(&self) -> Result<(), GitError>;

    /// Push a branch to the default remote
    async fn push(&self, branch: &str) -> Result<(), GitError>;

    async fn current_branch(&self) -> Result<String, GitError>;

    async fn list_branches(&self) -> Result<Vec<String>, GitError>;
}

/// GitAdapter backed by the `git` CLI
pub struct CliGitAdapter {
    repo_root: PathBuf,
}

impl CliGitAdapter {
    pub fn new(repo_root: impl Into<PathBuf>) -> Self {
        Self {
            repo_root: repo_root.into(),
        }
    }

    async fn git(&self, args: &[&str]) -> Result<String, GitError> {
        debug!(?args, "Running git");
        let output = Command::new("git")
            .args(args)
            .current_dir(&self.repo_root)
            .output()
            .await
            .map_err(|e| GitError::Unavailable(e.to_string()))?;

        let stdout = String::from_utf8_lossy(&output.stdout).to_string();
        if output.status.success() {
            return Ok(stdout);
        }

        let stderr = String::from_utf8_lossy(&output.stderr).to_string();
        if stderr.contains("CONFLICT") || stderr.contains("conflict") {
            return Err(GitError::Conflict(stderr.trim().to_string()));
        }
        Err(GitError::CommandFailed(format!("git {}: {}", args.join(" "), stderr.trim())))
    }
}

#[async_trait]
impl GitAdapter for CliGitAdapter {
    async fn create_or_checkout_branch(&self, name: &str) -> Result<(), GitError> {
        match self.git(&["checkout", "-b", name]).await {
            Ok(_) => {
                info!(branch = name, "Created fix branch");
                Ok(())
            }
            Err(GitError::CommandFailed(msg)) if msg.contains("already exists") => {
                // Branch collision is recovered by switching to it
                warn!(branch = name, "Branch exists, checking out");
                self.git(&["checkout", name]).await.map(|_| ())
            }
            Err(e) => Err(e),
        }
    }

    async fn apply_edits(&self, edits: &HashMap<String, String>) -> Result<(), GitError> {
        for (file, content) in edits {
            let path = self.repo_root.join(file);
            if let Some(parent) = path.parent() {
                tokio::fs::create_dir_all(parent)
                    .await
                    .map_err(|e| GitError::CommandFailed(format!("create dir for {}: {}", file, e)))?;
            }
            tokio::fs::write(&path, content)
                .await
                .map_err(|e| GitError::CommandFailed(format!("write {}: {}", file, e)))?;
            debug!(%file, bytes = content.len(), "Applied edit");
        }
        Ok(())
    }

    async fn commit_all(&self, message: &str) -> Result<String, GitError> {
        self.git(&["add", "-A"]).await?;
        self.git(&["commit", "-m", message]).await?;
        let sha = self.git(&["rev-parse", "HEAD"]).await?;
        Ok(sha.trim().to_string())
    }

    async fn revert(&self) -> Result<(), GitError> {
        self.git(&["checkout", "--", "."]).await?;
        self.git(&["clean", "-fd"]).await?;
        Ok(())
    }

    async fn push(&self, branch: &str) -> Result<(), GitError> {
        self.git(&["push", "-u", "origin", branch]).await.map(|_| ())
    }

    async fn current_branch(&self) -> Result<String, GitError> {
        let out = self.git(&["rev-parse", "--abbrev-ref", "HEAD"]).await?;
        Ok(out.trim().to_string())
    }

    async fn list_branches(&self) -> Result<Vec<String>, GitError> {
        let out = self.git(&["branch", "--format=%(refname:short)"]).await?;
        Ok(out.lines().map(|l| l.trim().to_string()).filter(|l| !l.is_empty()).collect())
    }
}

/// In-memory git double for tests
pub mod mock {
    use super::*;
    use std::sync::Mutex;

    /// Tracks branches, working-tree edits, and commits without a real repo
    #[derive(Default)]
    pub struct MockGit {
        state: Mutex<MockGitState>,
    }

    #[derive(Default)]
    struct MockGitState {
        branches: Vec<String>,
        current: String,
        /// Uncommitted working-tree contents by path
        working_tree: HashMap<String, String>,
        commits: Vec<MockCommit>,
        pushed: Vec<String>,
        reverts: u32,
    }

    #[derive(Clone)]
    pub struct MockCommit {
        pub id: String,
        pub message: String,
        pub files: HashMap<String, String>,
    }

    impl MockGit {
        pub fn new() -> Self {
            let git = Self::default();
            {
                let mut state = git.state.lock().unwrap();
                state.branches.push("main".to_string());
                state.current = "main".to_string();
            }
            git
        }

        pub fn commits(&self) -> Vec<MockCommit> {
            self.state.lock().unwrap().commits.clone()
        }

        pub fn commit_count(&self) -> usize {
            self.state.lock().unwrap().commits.len()
        }

        pub fn working_tree(&self) -> HashMap<String, String> {
            self.state.lock().unwrap().working_tree.clone()
        }

        pub fn revert_count(&self) -> u32 {
            self.state.lock().unwrap().reverts
        }

        pub fn pushed_branches(&self) -> Vec<String> {
            self.state.lock().unwrap().pushed.clone()
        }
    }

    #[async_trait]
    impl GitAdapter for MockGit {
        async fn create_or_checkout_branch(&self, name: &str) -> Result<(), GitError> {
            let mut state = self.state.lock().unwrap();
            if !state.branches.iter().any(|b| b == name) {
                state.branches.push(name.to_string());
            }
            state.current = name.to_string();
            Ok(())
        }

        async fn apply_edits(&self, edits: &HashMap<String, String>) -> Result<(), GitError> {
            let mut state = self.state.lock().unwrap();
            for (file, content) in edits {
                state.working_tree.insert(file.clone(), content.clone());
            }
            Ok(())
        }

        async fn commit_all(&self, message: &str) -> Result<String, GitError> {
            let mut state = self.state.lock().unwrap();
            let id = format!("commit-{}", state.commits.len() + 1);
            let files = std::mem::take(&mut state.working_tree);
            state.commits.push(MockCommit {
                id: id.clone(),
                message: message.to_string(),
                files,
            });
            Ok(id)
        }

        async fn revert(&self) -> Result<(), GitError> {
            let mut state = self.state.lock().unwrap();
            state.working_tree.clear();
            state.reverts += 1;
            Ok(())
        }

        async fn push(&self, branch: &str) -> Result<(), GitError> {
            self.state.lock().unwrap().pushed.push(branch.to_string());
            Ok(())
        }

        async fn current_branch(&self) -> Result<String, GitError> {
            Ok(self.state.lock().unwrap().current.clone())
        }

        async fn list_branches(&self) -> Result<Vec<String>, GitError> {
            Ok(self.state.lock().unwrap().branches.clone())
        }
    }
}
