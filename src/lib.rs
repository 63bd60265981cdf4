pub mod db;
pub mod generation;
pub mod message;
pub mod scheduler;
pub mod server;
pub mod settings;
pub mod utils;
pub mod vcs;

use std::sync::Arc;

use anyhow::{Context, Result};
use log::{info, warn};

use db::Database;
use generation::{OllamaClient, OllamaSettings, TextGenerator};
use message::{ComposerSettings, MessageComposer};
use scheduler::{CommitCycleRunner, RunnerSettings, SchedulerController, SchedulerTiming};
use settings::AppConfig;
use vcs::{GitRepository, VersionControl};

/// Everything the loop and the control surfaces share. Built once at startup
/// and passed around by clone; every field is a cheap handle.
#[derive(Clone)]
pub struct AppContext {
    pub config: Arc<AppConfig>,
    pub db: Database,
    pub repo: Arc<dyn VersionControl>,
    pub scheduler: SchedulerController,
    /// Present whenever generation is enabled, even if the startup probe failed.
    pub generator: Option<Arc<dyn TextGenerator>>,
    /// Result of the startup probe. Never re-evaluated.
    pub generation_available: bool,
}

impl AppContext {
    /// Opens the repository, probes the generation backend and opens the
    /// ledger. Any failure here is fatal.
    pub async fn build(config: AppConfig) -> Result<Self> {
        let repository = config.repository()?;
        info!("Using repository: {}", repository.path.display());

        let repo = GitRepository::open(&repository.path)
            .await
            .with_context(|| format!("failed to open repository {}", repository.path.display()))?;
        match repo.current_branch().await {
            Ok(branch) => info!("Git repository initialized on branch: {branch}"),
            Err(err) => warn!("Could not determine current branch: {err}"),
        }

        let (generator, generation_available) = if config.ollama.enabled {
            let client: Arc<dyn TextGenerator> =
                Arc::new(OllamaClient::new(OllamaSettings::from(&config.ollama)));
            let available = client.is_available().await;
            if available {
                info!(
                    "Ollama client initialized: {} (model: {})",
                    config.ollama.url, config.ollama.model
                );
            } else {
                warn!("Ollama health check failed, will use template fallback");
            }
            (Some(client), available)
        } else {
            info!("Ollama disabled in configuration");
            (None, false)
        };

        let db = Database::new(config.database.path.clone())?;

        Self::assemble(Arc::new(config), Arc::new(repo), db, generator, generation_available)
    }

    /// Wires already-opened collaborators together.
    pub fn assemble(
        config: Arc<AppConfig>,
        repo: Arc<dyn VersionControl>,
        db: Database,
        generator: Option<Arc<dyn TextGenerator>>,
        generation_available: bool,
    ) -> Result<Self> {
        let composer_settings = ComposerSettings {
            use_generation: config.generation_enabled(),
            ..ComposerSettings::from(&config.commit)
        };
        let composer_backend = generator.clone().filter(|_| generation_available);
        let composer = MessageComposer::new(composer_backend, composer_settings);

        let runner = CommitCycleRunner::new(
            repo.clone(),
            composer,
            db.clone(),
            RunnerSettings::from_config(&config)?,
        );
        let scheduler =
            SchedulerController::new(Arc::new(runner), SchedulerTiming::from(&config.schedule));

        Ok(Self {
            config,
            db,
            repo,
            scheduler,
            generator,
            generation_available,
        })
    }

    pub fn runner(&self) -> &CommitCycleRunner {
        self.scheduler.runner()
    }
}
