//! Commit message composition.
//!
//! Two tiers: the generation backend is asked first, and its answer is kept
//! only if it survives [`CommitMessage::from_generated`]. Anything else
//! (backend disabled, failure, rejected text) falls through to the template,
//! so [`MessageComposer::compose`] always yields a message.

pub mod conventional;

use std::sync::{
    atomic::{AtomicU64, Ordering},
    Arc,
};

use chrono::Local;
use log::{info, warn};
use rand::seq::SliceRandom;

pub use conventional::{conventional_type, CommitMessage, CONVENTIONAL_TYPES, MAX_MESSAGE_CHARS};

use crate::{generation::TextGenerator, settings::CommitConfig, vcs::ChangeSet};

/// Activity words substituted for `{activity}` in templates.
pub const ACTIVITY_TYPES: [&str; 9] = [
    "chore", "fix", "feat", "refactor", "docs", "style", "test", "perf", "build",
];

pub const DEFAULT_TEMPLATE: &str = "chore: automated update - {timestamp}";

const MAX_PROMPT_FILES: usize = 10;
const MAX_PROMPT_DIFF_LINES: usize = 50;

#[derive(Debug, Clone)]
pub struct ComposerSettings {
    pub use_generation: bool,
    pub include_diff: bool,
    pub template: String,
}

impl Default for ComposerSettings {
    fn default() -> Self {
        Self {
            use_generation: true,
            include_diff: true,
            template: DEFAULT_TEMPLATE.into(),
        }
    }
}

impl From<&CommitConfig> for ComposerSettings {
    fn from(config: &CommitConfig) -> Self {
        Self {
            use_generation: config.use_ollama,
            include_diff: config.include_diff_context,
            template: config.message_template.clone(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageTier {
    Generated,
    Template,
}

#[derive(Debug, Clone)]
pub struct ComposedMessage {
    pub message: CommitMessage,
    pub tier: MessageTier,
}

impl ComposedMessage {
    pub fn used_generation(&self) -> bool {
        self.tier == MessageTier::Generated
    }
}

pub struct MessageComposer {
    generator: Option<Arc<dyn TextGenerator>>,
    settings: ComposerSettings,
    commit_counter: AtomicU64,
}

impl MessageComposer {
    pub fn new(generator: Option<Arc<dyn TextGenerator>>, settings: ComposerSettings) -> Self {
        Self {
            generator,
            settings,
            commit_counter: AtomicU64::new(0),
        }
    }

    pub fn template_only(settings: ComposerSettings) -> Self {
        Self::new(None, settings)
    }

    /// True when the generation tier will be attempted.
    pub fn generation_active(&self) -> bool {
        self.settings.use_generation && self.generator.is_some()
    }

    /// Number of `compose` calls made so far, whichever tier answered.
    pub fn commit_counter(&self) -> u64 {
        self.commit_counter.load(Ordering::SeqCst)
    }

    pub async fn compose(
        &self,
        change_set: &ChangeSet,
        system_prompt: &str,
        theme: Option<&str>,
    ) -> ComposedMessage {
        let count = self.commit_counter.fetch_add(1, Ordering::SeqCst) + 1;

        if let Some(generator) = self.generator.as_ref().filter(|_| self.settings.use_generation)
        {
            let prompt = build_prompt(change_set, self.settings.include_diff, theme);
            match generator.generate(&prompt, system_prompt).await {
                Ok(raw) => match CommitMessage::from_generated(&raw) {
                    Some(message) => {
                        return ComposedMessage {
                            message,
                            tier: MessageTier::Generated,
                        };
                    }
                    None => warn!("Invalid generated message format: {raw:?}"),
                },
                Err(err) => warn!("Message generation failed ({err}), falling back to template"),
            }
        }

        let message = self.render_template(count);
        info!("Generated template message: {message}");
        ComposedMessage {
            message,
            tier: MessageTier::Template,
        }
    }

    fn render_template(&self, count: u64) -> CommitMessage {
        let timestamp = Local::now().format("%Y-%m-%d %H:%M:%S").to_string();
        let activity = ACTIVITY_TYPES
            .choose(&mut rand::thread_rng())
            .copied()
            .unwrap_or("chore");
        let render = |template: &str| {
            template
                .replace("{timestamp}", &timestamp)
                .replace("{activity}", activity)
                .replace("{count}", &count.to_string())
        };

        CommitMessage::from_template(&render(&self.settings.template))
            .or_else(|| CommitMessage::from_template(&render(DEFAULT_TEMPLATE)))
            .unwrap_or_else(CommitMessage::placeholder)
    }
}

pub(crate) fn build_prompt(change_set: &ChangeSet, include_diff: bool, theme: Option<&str>) -> String {
    let mut parts: Vec<String> = Vec::new();

    if let Some(theme) = theme {
        parts.push(format!("Context: This is a {theme} project."));
        parts.push(String::new());
    }

    parts.push("Files changed:".into());
    let files = change_set.files();
    for file in files.iter().take(MAX_PROMPT_FILES) {
        parts.push(format!("- {file}"));
    }
    if files.len() > MAX_PROMPT_FILES {
        parts.push(format!("... and {} more files", files.len() - MAX_PROMPT_FILES));
    }

    if include_diff && !change_set.diff().is_empty() {
        parts.push("\nDiff summary:".into());
        parts.extend(
            change_set
                .diff()
                .lines()
                .take(MAX_PROMPT_DIFF_LINES)
                .map(String::from),
        );
    }

    parts.push("\nGenerate a concise conventional commit message:".into());
    if let Some(theme) = theme {
        parts.push(format!(
            "(Keep the {theme} context in mind when describing the changes)"
        ));
    }

    parts.join("\n")
}
