//! One commit cycle: detect, stage, compose, commit, push, record.

use std::{fmt, sync::Arc, time::Duration};

use log::{debug, error, info, warn};

use crate::{
    db::{CommitOutcome, Database},
    message::MessageComposer,
    settings::{AppConfig, ConfigError},
    vcs::{ChangeSet, VcError, VersionControl},
};

/// Message recorded when a cycle fails before a message was composed.
const EARLY_FAILURE_MESSAGE: &str = "Error during commit";
const LOGGED_FILES: usize = 5;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CycleStage {
    CheckingChanges,
    Staging,
    Composing,
    Committing,
    Pushing,
    Recording,
}

impl CycleStage {
    pub fn as_str(&self) -> &'static str {
        match self {
            CycleStage::CheckingChanges => "checking changes",
            CycleStage::Staging => "staging",
            CycleStage::Composing => "composing",
            CycleStage::Committing => "committing",
            CycleStage::Pushing => "pushing",
            CycleStage::Recording => "recording",
        }
    }
}

impl fmt::Display for CycleStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum CycleResult {
    /// Nothing pending. Not recorded.
    Skipped,
    Committed(CommitOutcome),
    Failed {
        stage: CycleStage,
        outcome: CommitOutcome,
    },
}

impl CycleResult {
    pub fn succeeded(&self) -> bool {
        matches!(self, CycleResult::Committed(_))
    }

    pub fn outcome(&self) -> Option<&CommitOutcome> {
        match self {
            CycleResult::Skipped => None,
            CycleResult::Committed(outcome) | CycleResult::Failed { outcome, .. } => Some(outcome),
        }
    }

    pub fn into_outcome(self) -> Option<CommitOutcome> {
        match self {
            CycleResult::Skipped => None,
            CycleResult::Committed(outcome) | CycleResult::Failed { outcome, .. } => Some(outcome),
        }
    }
}

#[derive(Debug, Clone)]
pub struct PushTarget {
    pub remote: String,
    pub branch: String,
    pub retry_attempts: u32,
    pub retry_delay: Duration,
}

#[derive(Debug, Clone, Default)]
pub struct RunnerSettings {
    pub theme: Option<String>,
    pub system_prompt: String,
    pub author: Option<(String, String)>,
    /// `None` when pushing is disabled.
    pub push: Option<PushTarget>,
}

impl RunnerSettings {
    pub fn from_config(config: &AppConfig) -> Result<Self, ConfigError> {
        let repository = config.repository()?;
        let push = config.push.enabled.then(|| PushTarget {
            remote: config.push.remote.clone(),
            branch: repository.branch.clone(),
            retry_attempts: config.push.retry_attempts,
            retry_delay: Duration::from_secs(config.push.retry_delay),
        });

        Ok(Self {
            theme: config.ollama.theme().map(String::from),
            system_prompt: config.ollama.system_prompt.clone(),
            author: config
                .commit
                .author()
                .map(|(name, email)| (name.to_string(), email.to_string())),
            push,
        })
    }
}

pub struct CommitCycleRunner {
    repo: Arc<dyn VersionControl>,
    composer: MessageComposer,
    db: Database,
    settings: RunnerSettings,
}

impl CommitCycleRunner {
    pub fn new(
        repo: Arc<dyn VersionControl>,
        composer: MessageComposer,
        db: Database,
        settings: RunnerSettings,
    ) -> Self {
        Self {
            repo,
            composer,
            db,
            settings,
        }
    }

    pub fn composer(&self) -> &MessageComposer {
        &self.composer
    }

    pub fn repository(&self) -> &Arc<dyn VersionControl> {
        &self.repo
    }

    /// Runs one cycle and reports whether it produced a commit. Details of
    /// the attempt are in the ledger.
    pub async fn run_once(&self) -> bool {
        self.run_cycle().await.succeeded()
    }

    pub async fn run_cycle(&self) -> CycleResult {
        info!("Starting commit cycle...");
        let result = self.attempt().await;
        match &result {
            CycleResult::Skipped => info!("Cycle skipped: no changes to commit"),
            CycleResult::Committed(outcome) => {
                info!("Cycle committed {} ({})", short_hash(&outcome.hash), outcome.message)
            }
            CycleResult::Failed { stage, .. } => warn!("Cycle failed while {stage}"),
        }
        result
    }

    async fn attempt(&self) -> CycleResult {
        debug!("Cycle stage: {}", CycleStage::CheckingChanges);
        match self.repo.has_pending_changes().await {
            Ok(true) => {}
            Ok(false) => return CycleResult::Skipped,
            Err(err) => return self.fail_early(CycleStage::CheckingChanges, err).await,
        }

        debug!("Cycle stage: {}", CycleStage::Staging);
        if let Err(err) = self.repo.stage_all().await {
            return self.fail_early(CycleStage::Staging, err).await;
        }
        let files = match self.repo.changed_files().await {
            Ok(files) => files,
            Err(err) => return self.fail_early(CycleStage::Staging, err).await,
        };
        let diff = self.repo.diff(true).await;
        let change_set = ChangeSet::new(files, diff);
        let files_changed = change_set.file_count() as u64;

        info!("Changes detected in {files_changed} file(s)");
        for file in change_set.files().iter().take(LOGGED_FILES) {
            info!("  - {file}");
        }

        debug!("Cycle stage: {}", CycleStage::Composing);
        let theme = self.settings.theme.as_deref();
        let composed = self
            .composer
            .compose(&change_set, &self.settings.system_prompt, theme)
            .await;
        let used_generation = composed.used_generation();
        let message = composed.message.into_string();
        info!("Commit message: {message}");

        debug!("Cycle stage: {}", CycleStage::Committing);
        let (author_name, author_email) = match &self.settings.author {
            Some((name, email)) => (Some(name.as_str()), Some(email.as_str())),
            None => (None, None),
        };
        let handle = match self.repo.commit(&message, author_name, author_email).await {
            Ok(handle) => handle,
            Err(err) => {
                error!("Failed to create commit: {err}");
                let outcome = CommitOutcome::failed(
                    message,
                    files_changed,
                    used_generation,
                    self.settings.theme.clone(),
                    err.to_string(),
                );
                self.record(&outcome).await;
                return CycleResult::Failed {
                    stage: CycleStage::Committing,
                    outcome,
                };
            }
        };

        let push_success = match &self.settings.push {
            Some(target) => self.push(target).await,
            None => false,
        };

        let outcome = CommitOutcome::committed(
            handle.hash,
            message,
            files_changed,
            used_generation,
            self.settings.theme.clone(),
            push_success,
        );
        self.record(&outcome).await;
        CycleResult::Committed(outcome)
    }

    async fn push(&self, target: &PushTarget) -> bool {
        debug!("Cycle stage: {}", CycleStage::Pushing);
        info!("Pushing to {}/{}...", target.remote, target.branch);
        match self
            .repo
            .push(
                &target.remote,
                &target.branch,
                target.retry_attempts,
                target.retry_delay,
            )
            .await
        {
            Ok(()) => {
                info!("Successfully pushed to remote");
                true
            }
            Err(err) => {
                warn!("Failed to push to remote (commit saved locally): {err}");
                false
            }
        }
    }

    async fn fail_early(&self, stage: CycleStage, err: VcError) -> CycleResult {
        error!("Cycle failed while {stage}: {err}");
        let outcome = CommitOutcome::failed(EARLY_FAILURE_MESSAGE, 0, false, None, err.to_string());
        self.record(&outcome).await;
        CycleResult::Failed { stage, outcome }
    }

    /// Persistence failures never change the cycle's verdict.
    async fn record(&self, outcome: &CommitOutcome) {
        debug!("Cycle stage: {}", CycleStage::Recording);
        if let Err(err) = self.db.record_outcome(outcome).await {
            error!("Failed to record commit outcome: {err:#}");
        }
    }
}

fn short_hash(hash: &str) -> &str {
    hash.get(..8).unwrap_or(hash)
}
