//! Scripted ports for scheduler and server tests.

use std::{
    path::{Path, PathBuf},
    sync::{
        atomic::{AtomicBool, AtomicU32, Ordering},
        Arc, Mutex,
    },
    time::Duration,
};

use async_trait::async_trait;

use crate::{
    db::Database,
    generation::{GenerationFailure, TextGenerator},
    settings::AppConfig,
    vcs::{CommitHandle, VcError, VersionControl},
    AppContext,
};

pub(crate) struct FakeRepo {
    root: PathBuf,
    files: Vec<String>,
    pending: AtomicBool,
    fail_stage: AtomicBool,
    fail_commit: AtomicBool,
    fail_push: AtomicBool,
    panic_next_commit: AtomicBool,
    commit_delay: Mutex<Duration>,
    commits: Mutex<Vec<String>>,
    last_author: Mutex<Option<(String, String)>>,
    push_attempts: AtomicU32,
    active_commits: AtomicU32,
    max_active_commits: AtomicU32,
}

impl FakeRepo {
    fn with_files(files: &[&str], pending: bool) -> Arc<Self> {
        Arc::new(Self {
            root: PathBuf::from("/tmp/fake-repo"),
            files: files.iter().map(|f| f.to_string()).collect(),
            pending: AtomicBool::new(pending),
            fail_stage: AtomicBool::new(false),
            fail_commit: AtomicBool::new(false),
            fail_push: AtomicBool::new(false),
            panic_next_commit: AtomicBool::new(false),
            commit_delay: Mutex::new(Duration::ZERO),
            commits: Mutex::new(Vec::new()),
            last_author: Mutex::new(None),
            push_attempts: AtomicU32::new(0),
            active_commits: AtomicU32::new(0),
            max_active_commits: AtomicU32::new(0),
        })
    }

    /// Always reports pending changes, even after a commit.
    pub(crate) fn dirty(files: &[&str]) -> Arc<Self> {
        Self::with_files(files, true)
    }

    pub(crate) fn clean() -> Arc<Self> {
        Self::with_files(&[], false)
    }

    pub(crate) fn fail_stage(&self) {
        self.fail_stage.store(true, Ordering::SeqCst);
    }

    pub(crate) fn fail_commit(&self) {
        self.fail_commit.store(true, Ordering::SeqCst);
    }

    pub(crate) fn fail_push(&self) {
        self.fail_push.store(true, Ordering::SeqCst);
    }

    /// The next `commit` call panics; later ones behave normally.
    pub(crate) fn panic_on_next_commit(&self) {
        self.panic_next_commit.store(true, Ordering::SeqCst);
    }

    pub(crate) fn set_commit_delay(&self, delay: Duration) {
        *self.commit_delay.lock().unwrap() = delay;
    }

    pub(crate) fn commits(&self) -> Vec<String> {
        self.commits.lock().unwrap().clone()
    }

    pub(crate) fn last_author(&self) -> Option<(String, String)> {
        self.last_author.lock().unwrap().clone()
    }

    pub(crate) fn push_attempts(&self) -> u32 {
        self.push_attempts.load(Ordering::SeqCst)
    }

    /// Highest number of commits ever in flight at once.
    pub(crate) fn max_concurrent_commits(&self) -> u32 {
        self.max_active_commits.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl VersionControl for FakeRepo {
    fn path(&self) -> &Path {
        &self.root
    }

    async fn has_pending_changes(&self) -> Result<bool, VcError> {
        Ok(self.pending.load(Ordering::SeqCst))
    }

    async fn stage_all(&self) -> Result<(), VcError> {
        if self.fail_stage.load(Ordering::SeqCst) {
            return Err(VcError::CommandFailed {
                command: "git add -A".into(),
                stderr: "index.lock exists".into(),
            });
        }
        Ok(())
    }

    async fn changed_files(&self) -> Result<Vec<String>, VcError> {
        Ok(self.files.clone())
    }

    async fn diff(&self, _staged: bool) -> String {
        "+added line".into()
    }

    async fn commit(
        &self,
        message: &str,
        author_name: Option<&str>,
        author_email: Option<&str>,
    ) -> Result<CommitHandle, VcError> {
        if self.panic_next_commit.swap(false, Ordering::SeqCst) {
            panic!("fake repository exploded mid-commit");
        }
        let active = self.active_commits.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_active_commits.fetch_max(active, Ordering::SeqCst);

        let delay = *self.commit_delay.lock().unwrap();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        self.active_commits.fetch_sub(1, Ordering::SeqCst);

        if self.fail_commit.load(Ordering::SeqCst) {
            return Err(VcError::CommandFailed {
                command: "git commit".into(),
                stderr: "commit rejected".into(),
            });
        }

        if let (Some(name), Some(email)) = (author_name, author_email) {
            *self.last_author.lock().unwrap() = Some((name.to_string(), email.to_string()));
        }
        let mut commits = self.commits.lock().unwrap();
        commits.push(message.to_string());
        Ok(CommitHandle {
            hash: format!("{:040x}", commits.len()),
        })
    }

    async fn push(
        &self,
        remote: &str,
        _branch: &str,
        _retry_attempts: u32,
        _retry_delay: Duration,
    ) -> Result<(), VcError> {
        self.push_attempts.fetch_add(1, Ordering::SeqCst);
        if self.fail_push.load(Ordering::SeqCst) {
            return Err(VcError::PushFailed {
                attempts: 1,
                last_error: format!("could not read from remote '{remote}'"),
            });
        }
        Ok(())
    }

    async fn current_branch(&self) -> Result<String, VcError> {
        Ok("main".into())
    }

    async fn commit_count(&self) -> u64 {
        self.commits.lock().unwrap().len() as u64
    }

    async fn last_commit_message(&self) -> Option<String> {
        self.commits.lock().unwrap().last().cloned()
    }
}

pub(crate) struct FakeGenerator {
    reply: Result<String, GenerationFailure>,
}

impl FakeGenerator {
    pub(crate) fn replying(reply: Result<&str, GenerationFailure>) -> Arc<Self> {
        Arc::new(Self {
            reply: reply.map(String::from),
        })
    }
}

#[async_trait]
impl TextGenerator for FakeGenerator {
    async fn is_available(&self) -> bool {
        self.reply.is_ok()
    }

    async fn generate(&self, _prompt: &str, _system: &str) -> Result<String, GenerationFailure> {
        self.reply.clone()
    }

    async fn list_models(&self) -> Option<Vec<String>> {
        self.reply.as_ref().ok().map(|_| vec!["fake:latest".to_string()])
    }
}

/// A full context over a fake repository and a scratch ledger. The
/// scheduler loop is built but not started.
pub(crate) fn context_with(
    repo: Arc<FakeRepo>,
    generation_available: bool,
) -> (tempfile::TempDir, AppContext) {
    let dir = tempfile::tempdir().unwrap();
    let mut config =
        AppConfig::from_yaml_str("repositories:\n  - path: /tmp/fake-repo\n", |_| None).unwrap();
    config.database.path = dir.path().join("ledger.db");
    config.logging.file = Some(dir.path().join("logs").join("scheduler.log"));

    let db = Database::new(config.database.path.clone()).unwrap();
    let generator: Arc<dyn TextGenerator> = FakeGenerator::replying(Ok("feat: fake change"));
    let ctx = AppContext::assemble(
        Arc::new(config),
        repo,
        db,
        Some(generator),
        generation_available,
    )
    .unwrap();
    (dir, ctx)
}
