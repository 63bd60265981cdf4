use std::{
    fs,
    path::{Path, PathBuf},
};

use serde::{Deserialize, Serialize};
use thiserror::Error;

pub const DEFAULT_CONFIG_PATH: &str = "config/config.yaml";

const DEFAULT_SYSTEM_PROMPT: &str = "You write git commit messages. Reply with a single line in \
conventional commit format (type: description), no quotes, no explanation.";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("configuration file not found: {0}")]
    NotFound(PathBuf),
    #[error("failed to read configuration file {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("malformed configuration: {0}")]
    Parse(#[from] serde_yaml::Error),
    #[error("environment variable {name} must be an integer, got '{value}'")]
    InvalidEnv { name: &'static str, value: String },
    #[error("no enabled repositories found in configuration")]
    NoEnabledRepository,
    #[error("invalid configuration: {0}")]
    Invalid(String),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RepositoryConfig {
    pub path: PathBuf,
    #[serde(default = "default_branch")]
    pub branch: String,
    #[serde(default = "default_true")]
    pub enabled: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ScheduleConfig {
    /// Seconds between cycles before jitter is applied.
    pub base_interval: u64,
    /// Maximum jitter in seconds, applied symmetrically around `base_interval`.
    pub jitter_range: u64,
}

impl Default for ScheduleConfig {
    fn default() -> Self {
        Self {
            base_interval: 600,
            jitter_range: 50,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OllamaConfig {
    pub enabled: bool,
    pub url: String,
    pub model: String,
    /// Request timeout in seconds.
    pub timeout: u64,
    pub max_tokens: u32,
    pub theme: String,
    pub system_prompt: String,
}

impl Default for OllamaConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            url: "http://localhost:11434".into(),
            model: "llama3.2".into(),
            timeout: 30,
            max_tokens: 100,
            theme: String::new(),
            system_prompt: DEFAULT_SYSTEM_PROMPT.into(),
        }
    }
}

impl OllamaConfig {
    pub fn theme(&self) -> Option<&str> {
        let theme = self.theme.trim();
        (!theme.is_empty()).then_some(theme)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CommitConfig {
    pub use_ollama: bool,
    pub message_template: String,
    pub include_diff_context: bool,
    pub author_name: Option<String>,
    pub author_email: Option<String>,
}

impl Default for CommitConfig {
    fn default() -> Self {
        Self {
            use_ollama: true,
            message_template: "chore: automated update - {timestamp}".into(),
            include_diff_context: true,
            author_name: None,
            author_email: None,
        }
    }
}

impl CommitConfig {
    /// Author override, only when both name and email are present.
    pub fn author(&self) -> Option<(&str, &str)> {
        match (self.author_name.as_deref(), self.author_email.as_deref()) {
            (Some(name), Some(email)) if !name.is_empty() && !email.is_empty() => {
                Some((name, email))
            }
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PushConfig {
    pub enabled: bool,
    pub remote: String,
    pub retry_attempts: u32,
    /// Seconds to sleep between failed push attempts.
    pub retry_delay: u64,
}

impl Default for PushConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            remote: "origin".into(),
            retry_attempts: 3,
            retry_delay: 30,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
    pub file: Option<PathBuf>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "INFO".into(),
            file: None,
        }
    }
}

impl LoggingConfig {
    pub fn level_filter(&self) -> Option<log::LevelFilter> {
        match self.level.trim().to_ascii_uppercase().as_str() {
            "TRACE" => Some(log::LevelFilter::Trace),
            "DEBUG" => Some(log::LevelFilter::Debug),
            "INFO" => Some(log::LevelFilter::Info),
            "WARN" | "WARNING" => Some(log::LevelFilter::Warn),
            "ERROR" | "CRITICAL" => Some(log::LevelFilter::Error),
            "OFF" => Some(log::LevelFilter::Off),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    pub path: PathBuf,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("database/scheduler.db"),
        }
    }
}

/// Resolved configuration. Loaded once at startup, validated eagerly and
/// shared read-only afterwards.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    pub repositories: Vec<RepositoryConfig>,
    #[serde(default)]
    pub schedule: ScheduleConfig,
    #[serde(default)]
    pub ollama: OllamaConfig,
    #[serde(default)]
    pub commit: CommitConfig,
    #[serde(default)]
    pub push: PushConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
    #[serde(default)]
    pub database: DatabaseConfig,
}

fn default_branch() -> String {
    "main".into()
}

fn default_true() -> bool {
    true
}

impl AppConfig {
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        Self::load_with_env(path, |name| std::env::var(name).ok())
    }

    pub fn load_with_env<F>(path: &Path, env: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if !path.exists() {
            return Err(ConfigError::NotFound(path.to_path_buf()));
        }
        let contents = fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_yaml_str(&contents, env)
    }

    pub fn from_yaml_str<F>(contents: &str, env: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config: AppConfig = serde_yaml::from_str(contents)?;
        config.apply_env_overrides(env)?;
        config.validate()?;
        Ok(config)
    }

    fn apply_env_overrides<F>(&mut self, env: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(url) = env("OLLAMA_URL") {
            self.ollama.url = url;
        }
        if let Some(model) = env("OLLAMA_MODEL") {
            self.ollama.model = model;
        }
        if let Some(theme) = env("OLLAMA_THEME") {
            self.ollama.theme = theme;
        }

        if let Some(first) = self.repositories.first_mut() {
            if let Some(path) = env("REPO_PATH") {
                first.path = PathBuf::from(path);
            }
            if let Some(branch) = env("REPO_BRANCH") {
                first.branch = branch;
            }
        }

        if let Some(value) = env("BASE_INTERVAL") {
            self.schedule.base_interval = parse_env_int("BASE_INTERVAL", &value)?;
        }
        if let Some(value) = env("JITTER_RANGE") {
            self.schedule.jitter_range = parse_env_int("JITTER_RANGE", &value)?;
        }

        if let Some(name) = env("GIT_AUTHOR_NAME") {
            self.commit.author_name = Some(name);
        }
        if let Some(email) = env("GIT_AUTHOR_EMAIL") {
            self.commit.author_email = Some(email);
        }

        if let Some(level) = env("LOG_LEVEL") {
            self.logging.level = level;
        }
        if let Some(file) = env("LOG_FILE") {
            self.logging.file = Some(PathBuf::from(file));
        }

        Ok(())
    }

    fn validate(&self) -> Result<(), ConfigError> {
        let repository = self.repository()?;
        if repository.path.as_os_str().is_empty() {
            return Err(ConfigError::Invalid("repository path is empty".into()));
        }
        if repository.branch.trim().is_empty() {
            return Err(ConfigError::Invalid("repository branch is empty".into()));
        }
        if self.schedule.base_interval == 0 {
            return Err(ConfigError::Invalid(
                "schedule.base_interval must be greater than zero".into(),
            ));
        }
        if self.push.enabled && self.push.retry_attempts == 0 {
            return Err(ConfigError::Invalid(
                "push.retry_attempts must be at least 1 when push is enabled".into(),
            ));
        }
        if self.commit.message_template.trim().is_empty() {
            return Err(ConfigError::Invalid("commit.message_template is empty".into()));
        }
        if self.logging.level_filter().is_none() {
            return Err(ConfigError::Invalid(format!(
                "unknown logging.level '{}'",
                self.logging.level
            )));
        }
        if self.generation_enabled()
            && (self.ollama.url.trim().is_empty() || self.ollama.model.trim().is_empty())
        {
            return Err(ConfigError::Invalid(
                "ollama.url and ollama.model are required when ollama is enabled".into(),
            ));
        }
        Ok(())
    }

    /// The first enabled repository entry.
    pub fn repository(&self) -> Result<&RepositoryConfig, ConfigError> {
        self.repositories
            .iter()
            .find(|repo| repo.enabled)
            .ok_or(ConfigError::NoEnabledRepository)
    }

    /// Whether the generation tier should be attempted at all.
    pub fn generation_enabled(&self) -> bool {
        self.ollama.enabled && self.commit.use_ollama
    }
}

fn parse_env_int(name: &'static str, value: &str) -> Result<u64, ConfigError> {
    value
        .trim()
        .parse()
        .map_err(|_| ConfigError::InvalidEnv {
            name,
            value: value.to_string(),
        })
}
