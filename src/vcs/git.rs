use std::{
    path::{Path, PathBuf},
    time::Duration,
};

use async_trait::async_trait;
use log::{error, info, warn};
use tokio::process::Command;

use super::{dedup_paths, CommitHandle, VcError, VersionControl};

// Diffs past this size are cut; the composer only reads the head anyway.
const MAX_DIFF_BYTES: usize = 256 * 1024;

/// Working tree driven through the `git` binary.
#[derive(Debug, Clone)]
pub struct GitRepository {
    root: PathBuf,
}

impl GitRepository {
    pub async fn open(path: impl AsRef<Path>) -> Result<Self, VcError> {
        let path = path.as_ref();
        let root = path
            .canonicalize()
            .map_err(|_| VcError::NotARepository(path.display().to_string()))?;
        let repo = Self { root };

        match repo.git(&["rev-parse", "--is-inside-work-tree"]).await {
            Ok(out) if out.trim() == "true" => {
                info!("Initialized git repository at {}", repo.root.display());
                Ok(repo)
            }
            _ => Err(VcError::NotARepository(repo.root.display().to_string())),
        }
    }

    async fn git(&self, args: &[&str]) -> Result<String, VcError> {
        self.git_with_env(args, &[]).await
    }

    async fn git_with_env(&self, args: &[&str], envs: &[(&str, &str)]) -> Result<String, VcError> {
        let command = format!("git {}", args.join(" "));
        let output = Command::new("git")
            .arg("-c")
            .arg("core.quotepath=off")
            .args(args)
            .envs(envs.iter().copied())
            .current_dir(&self.root)
            .output()
            .await
            .map_err(|source| VcError::Spawn {
                command: command.clone(),
                source,
            })?;

        if output.status.success() {
            Ok(String::from_utf8_lossy(&output.stdout).into_owned())
        } else {
            Err(VcError::CommandFailed {
                command,
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            })
        }
    }

    async fn name_list(&self, args: &[&str]) -> Result<Vec<String>, VcError> {
        let out = self.git(args).await?;
        Ok(out.lines().map(|line| line.trim().to_string()).collect())
    }
}

#[async_trait]
impl VersionControl for GitRepository {
    fn path(&self) -> &Path {
        &self.root
    }

    async fn has_pending_changes(&self) -> Result<bool, VcError> {
        let out = self.git(&["status", "--porcelain"]).await?;
        Ok(out.lines().any(|line| !line.trim().is_empty()))
    }

    async fn stage_all(&self) -> Result<(), VcError> {
        self.git(&["add", "-A"]).await?;
        info!("Staged all changes");
        Ok(())
    }

    async fn changed_files(&self) -> Result<Vec<String>, VcError> {
        let mut files = self.name_list(&["diff", "--name-only"]).await?;

        // An unborn branch has no HEAD to diff against.
        let staged = match self.name_list(&["diff", "--name-only", "--cached", "HEAD"]).await {
            Ok(staged) => staged,
            Err(_) => self.name_list(&["diff", "--name-only", "--cached"]).await?,
        };
        files.extend(staged);

        files.extend(
            self.name_list(&["ls-files", "--others", "--exclude-standard"])
                .await?,
        );

        Ok(dedup_paths(files))
    }

    async fn diff(&self, staged: bool) -> String {
        let args: &[&str] = if staged {
            &["diff", "--cached"]
        } else {
            &["diff"]
        };
        match self.git(args).await {
            Ok(mut diff) => {
                if diff.len() > MAX_DIFF_BYTES {
                    let mut cut = MAX_DIFF_BYTES;
                    while !diff.is_char_boundary(cut) {
                        cut -= 1;
                    }
                    diff.truncate(cut);
                }
                diff
            }
            Err(err) => {
                error!("Failed to get diff: {err}");
                String::new()
            }
        }
    }

    async fn commit(
        &self,
        message: &str,
        author_name: Option<&str>,
        author_email: Option<&str>,
    ) -> Result<CommitHandle, VcError> {
        let envs: Vec<(&str, &str)> = match (author_name, author_email) {
            (Some(name), Some(email)) => vec![
                ("GIT_AUTHOR_NAME", name),
                ("GIT_AUTHOR_EMAIL", email),
                ("GIT_COMMITTER_NAME", name),
                ("GIT_COMMITTER_EMAIL", email),
            ],
            _ => Vec::new(),
        };

        self.git_with_env(&["commit", "-m", message], &envs).await?;
        let hash = self.git(&["rev-parse", "HEAD"]).await?.trim().to_string();

        let preview: String = message.chars().take(50).collect();
        info!("Created commit {hash}: {preview}");
        Ok(CommitHandle { hash })
    }

    async fn push(
        &self,
        remote: &str,
        branch: &str,
        retry_attempts: u32,
        retry_delay: Duration,
    ) -> Result<(), VcError> {
        let attempts = retry_attempts.max(1);
        let mut last_error = String::new();

        for attempt in 1..=attempts {
            match self.git(&["push", remote, branch]).await {
                Ok(_) => {
                    info!("Pushed to {remote}/{branch}");
                    return Ok(());
                }
                Err(err) => {
                    warn!("Push attempt {attempt}/{attempts} failed: {err}");
                    last_error = err.to_string();
                    if attempt < attempts {
                        info!("Retrying in {} seconds...", retry_delay.as_secs());
                        tokio::time::sleep(retry_delay).await;
                    }
                }
            }
        }

        error!("Failed to push after {attempts} attempts");
        Err(VcError::PushFailed {
            attempts,
            last_error,
        })
    }

    async fn current_branch(&self) -> Result<String, VcError> {
        match self.git(&["symbolic-ref", "--short", "HEAD"]).await {
            Ok(branch) => Ok(branch.trim().to_string()),
            // detached HEAD
            Err(_) => Ok(self
                .git(&["rev-parse", "--short", "HEAD"])
                .await?
                .trim()
                .to_string()),
        }
    }

    async fn commit_count(&self) -> u64 {
        match self.git(&["rev-list", "--count", "HEAD"]).await {
            Ok(out) => out.trim().parse().unwrap_or(0),
            Err(err) => {
                error!("Failed to get commit count: {err}");
                0
            }
        }
    }

    async fn last_commit_message(&self) -> Option<String> {
        match self.git(&["log", "-1", "--pretty=%B"]).await {
            Ok(out) => {
                let message = out.trim();
                (!message.is_empty()).then(|| message.to_string())
            }
            Err(err) => {
                error!("Failed to get last commit message: {err}");
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use std::process::Command as StdCommand;

    fn git_sync(dir: &Path, args: &[&str]) -> String {
        let output = StdCommand::new("git")
            .args(args)
            .current_dir(dir)
            .output()
            .unwrap();
        assert!(
            output.status.success(),
            "git {:?} failed: {}",
            args,
            String::from_utf8_lossy(&output.stderr)
        );
        String::from_utf8_lossy(&output.stdout).into_owned()
    }

    fn init_repo(dir: &Path) {
        git_sync(dir, &["init", "-q"]);
        git_sync(dir, &["symbolic-ref", "HEAD", "refs/heads/main"]);
        git_sync(dir, &["config", "user.email", "test@test.com"]);
        git_sync(dir, &["config", "user.name", "Test"]);
    }

    fn init_repo_with_commit(dir: &Path) {
        init_repo(dir);
        fs::write(dir.join("README"), "hi").unwrap();
        git_sync(dir, &["add", "."]);
        git_sync(dir, &["commit", "-q", "-m", "init"]);
    }

    #[tokio::test]
    async fn open_rejects_plain_directory() {
        let dir = tempfile::tempdir().unwrap();
        let err = GitRepository::open(dir.path()).await.unwrap_err();
        assert!(matches!(err, VcError::NotARepository(_)));
    }

    #[tokio::test]
    async fn open_rejects_missing_directory() {
        let dir = tempfile::tempdir().unwrap();
        let err = GitRepository::open(dir.path().join("missing")).await.unwrap_err();
        assert!(matches!(err, VcError::NotARepository(_)));
    }

    #[tokio::test]
    async fn clean_repo_has_no_pending_changes() {
        let dir = tempfile::tempdir().unwrap();
        init_repo_with_commit(dir.path());
        let repo = GitRepository::open(dir.path()).await.unwrap();
        assert!(!repo.has_pending_changes().await.unwrap());
    }

    #[tokio::test]
    async fn untracked_file_counts_as_pending() {
        let dir = tempfile::tempdir().unwrap();
        init_repo_with_commit(dir.path());
        fs::write(dir.path().join("new.txt"), "x").unwrap();
        let repo = GitRepository::open(dir.path()).await.unwrap();
        assert!(repo.has_pending_changes().await.unwrap());
    }

    #[tokio::test]
    async fn changed_files_unions_modified_staged_and_untracked() {
        let dir = tempfile::tempdir().unwrap();
        init_repo_with_commit(dir.path());
        fs::write(dir.path().join("README"), "changed").unwrap();
        fs::write(dir.path().join("staged.txt"), "s").unwrap();
        git_sync(dir.path(), &["add", "staged.txt"]);
        fs::write(dir.path().join("untracked.txt"), "u").unwrap();

        let repo = GitRepository::open(dir.path()).await.unwrap();
        let mut files = repo.changed_files().await.unwrap();
        files.sort();
        assert_eq!(files, ["README", "staged.txt", "untracked.txt"]);
    }

    #[tokio::test]
    async fn changed_files_on_unborn_branch() {
        let dir = tempfile::tempdir().unwrap();
        init_repo(dir.path());
        fs::write(dir.path().join("a.txt"), "a").unwrap();
        git_sync(dir.path(), &["add", "a.txt"]);

        let repo = GitRepository::open(dir.path()).await.unwrap();
        assert_eq!(repo.changed_files().await.unwrap(), ["a.txt"]);
        assert_eq!(repo.current_branch().await.unwrap(), "main");
        assert_eq!(repo.commit_count().await, 0);
        assert_eq!(repo.last_commit_message().await, None);
    }

    #[tokio::test]
    async fn stage_and_commit_round() {
        let dir = tempfile::tempdir().unwrap();
        init_repo_with_commit(dir.path());
        fs::write(dir.path().join("lib.rs"), "fn main() {}\n").unwrap();

        let repo = GitRepository::open(dir.path()).await.unwrap();
        repo.stage_all().await.unwrap();
        repo.stage_all().await.unwrap();
        let diff = repo.diff(true).await;
        assert!(diff.contains("lib.rs"));

        let handle = repo.commit("feat: add lib", None, None).await.unwrap();
        assert_eq!(handle.hash.len(), 40);
        assert!(!repo.has_pending_changes().await.unwrap());
        assert_eq!(repo.commit_count().await, 2);
        assert_eq!(
            repo.last_commit_message().await.as_deref(),
            Some("feat: add lib")
        );
    }

    #[tokio::test]
    async fn commit_with_nothing_staged_fails() {
        let dir = tempfile::tempdir().unwrap();
        init_repo_with_commit(dir.path());
        let repo = GitRepository::open(dir.path()).await.unwrap();
        let err = repo.commit("chore: nothing", None, None).await.unwrap_err();
        assert!(matches!(err, VcError::CommandFailed { .. }));
    }

    #[tokio::test]
    async fn author_override_needs_both_fields() {
        let dir = tempfile::tempdir().unwrap();
        init_repo_with_commit(dir.path());
        let repo = GitRepository::open(dir.path()).await.unwrap();

        fs::write(dir.path().join("a.txt"), "a").unwrap();
        repo.stage_all().await.unwrap();
        repo.commit("chore: a", Some("Bot"), Some("bot@example.com"))
            .await
            .unwrap();
        let author = git_sync(dir.path(), &["log", "-1", "--pretty=%an <%ae>"]);
        assert_eq!(author.trim(), "Bot <bot@example.com>");

        fs::write(dir.path().join("b.txt"), "b").unwrap();
        repo.stage_all().await.unwrap();
        repo.commit("chore: b", Some("Bot"), None).await.unwrap();
        let author = git_sync(dir.path(), &["log", "-1", "--pretty=%an <%ae>"]);
        assert_eq!(author.trim(), "Test <test@test.com>");
    }

    #[tokio::test]
    async fn push_to_bare_remote() {
        let dir = tempfile::tempdir().unwrap();
        let remote = tempfile::tempdir().unwrap();
        git_sync(remote.path(), &["init", "-q", "--bare"]);
        init_repo_with_commit(dir.path());
        let remote_path = remote.path().to_string_lossy().into_owned();
        git_sync(dir.path(), &["remote", "add", "origin", &remote_path]);

        let repo = GitRepository::open(dir.path()).await.unwrap();
        repo.push("origin", "main", 3, Duration::ZERO).await.unwrap();
        let remote_head = git_sync(remote.path(), &["rev-parse", "main"]);
        let local_head = git_sync(dir.path(), &["rev-parse", "HEAD"]);
        assert_eq!(remote_head, local_head);
    }

    #[tokio::test]
    async fn push_without_remote_exhausts_attempts() {
        let dir = tempfile::tempdir().unwrap();
        init_repo_with_commit(dir.path());
        let repo = GitRepository::open(dir.path()).await.unwrap();

        let err = repo
            .push("origin", "main", 2, Duration::ZERO)
            .await
            .unwrap_err();
        match err {
            VcError::PushFailed { attempts, .. } => assert_eq!(attempts, 2),
            other => panic!("expected PushFailed, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn push_sleeps_between_attempts_but_not_after_the_last() {
        let dir = tempfile::tempdir().unwrap();
        init_repo_with_commit(dir.path());
        let repo = GitRepository::open(dir.path()).await.unwrap();

        let started = std::time::Instant::now();
        let err = repo
            .push("origin", "main", 1, Duration::from_secs(3))
            .await
            .unwrap_err();
        assert!(matches!(err, VcError::PushFailed { attempts: 1, .. }));
        assert!(started.elapsed() < Duration::from_secs(2), "{:?}", started.elapsed());

        let started = std::time::Instant::now();
        repo.push("origin", "main", 2, Duration::from_millis(400))
            .await
            .unwrap_err();
        let elapsed = started.elapsed();
        assert!(elapsed >= Duration::from_millis(400), "{elapsed:?}");
        assert!(elapsed < Duration::from_millis(800 + 1_500), "{elapsed:?}");
    }

    #[tokio::test]
    async fn diff_of_clean_tree_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        init_repo_with_commit(dir.path());
        let repo = GitRepository::open(dir.path()).await.unwrap();
        assert_eq!(repo.diff(false).await, "");
    }
}
