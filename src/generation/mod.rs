//! Generative-text capability used by the message composer.
//!
//! Every failure mode is reported as a [`GenerationFailure`] value. Nothing
//! here is allowed to abort a cycle; the composer falls back to its template
//! tier whenever generation does not produce usable text.

pub mod ollama;

use async_trait::async_trait;
use thiserror::Error;

pub use ollama::{OllamaClient, OllamaSettings};

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum GenerationFailure {
    #[error("request timed out")]
    Timeout,
    #[error("backend unreachable: {0}")]
    Unreachable(String),
    #[error("backend returned HTTP {status}")]
    Http { status: u16 },
    #[error("malformed response: {0}")]
    MalformedResponse(String),
    #[error("transport error: {0}")]
    Transport(String),
}

#[async_trait]
pub trait TextGenerator: Send + Sync {
    /// Quick reachability probe. Errors are swallowed and reported as `false`.
    async fn is_available(&self) -> bool;

    async fn generate(&self, prompt: &str, system_prompt: &str)
        -> Result<String, GenerationFailure>;

    /// Best-effort model listing for diagnostics.
    async fn list_models(&self) -> Option<Vec<String>>;
}
