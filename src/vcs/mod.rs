//! Version-control capability used by the commit cycle.
//!
//! The cycle only ever talks to [`VersionControl`]; the git CLI backend lives
//! in [`git`]. Every operation that touches the repository returns a
//! [`VcError`] on failure so the caller can turn it into a recorded outcome
//! instead of unwinding.

pub mod git;

use std::{collections::HashSet, path::Path, time::Duration};

use async_trait::async_trait;
use thiserror::Error;

pub use git::GitRepository;

#[derive(Debug, Error)]
pub enum VcError {
    #[error("not a git repository: {0}")]
    NotARepository(String),
    #[error("`{command}` failed: {stderr}")]
    CommandFailed { command: String, stderr: String },
    #[error("failed to run `{command}`: {source}")]
    Spawn {
        command: String,
        #[source]
        source: std::io::Error,
    },
    #[error("push failed after {attempts} attempt(s): {last_error}")]
    PushFailed { attempts: u32, last_error: String },
}

/// Result of a successful commit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommitHandle {
    pub hash: String,
}

/// What changed in the working tree for one cycle. Never persisted.
#[derive(Debug, Clone, Default)]
pub struct ChangeSet {
    files: Vec<String>,
    diff: String,
}

impl ChangeSet {
    /// Builds a change set, dropping repeated paths while keeping first-seen order.
    pub fn new<I>(files: I, diff: String) -> Self
    where
        I: IntoIterator<Item = String>,
    {
        Self {
            files: dedup_paths(files),
            diff,
        }
    }

    pub fn files(&self) -> &[String] {
        &self.files
    }

    pub fn diff(&self) -> &str {
        &self.diff
    }

    pub fn file_count(&self) -> usize {
        self.files.len()
    }
}

pub(crate) fn dedup_paths<I>(paths: I) -> Vec<String>
where
    I: IntoIterator<Item = String>,
{
    let mut seen = HashSet::new();
    paths
        .into_iter()
        .filter(|path| !path.is_empty() && seen.insert(path.clone()))
        .collect()
}

#[async_trait]
pub trait VersionControl: Send + Sync {
    /// Filesystem root of the working tree.
    fn path(&self) -> &Path;

    /// True when anything is modified, staged or untracked.
    async fn has_pending_changes(&self) -> Result<bool, VcError>;

    /// Stages every pending change. Staging twice is harmless.
    async fn stage_all(&self) -> Result<(), VcError>;

    /// Union of modified, staged (against HEAD) and untracked paths.
    async fn changed_files(&self) -> Result<Vec<String>, VcError>;

    /// Advisory diff text. Failures are logged and yield an empty string.
    async fn diff(&self, staged: bool) -> String;

    /// Authorship is overridden only when both name and email are given.
    async fn commit(
        &self,
        message: &str,
        author_name: Option<&str>,
        author_email: Option<&str>,
    ) -> Result<CommitHandle, VcError>;

    /// Tries up to `retry_attempts` times, sleeping `retry_delay` between
    /// attempts but not after the last one.
    async fn push(
        &self,
        remote: &str,
        branch: &str,
        retry_attempts: u32,
        retry_delay: Duration,
    ) -> Result<(), VcError>;

    async fn current_branch(&self) -> Result<String, VcError>;

    /// Number of commits reachable from HEAD, zero when it can't be read.
    async fn commit_count(&self) -> u64;

    async fn last_commit_message(&self) -> Option<String>;
}
