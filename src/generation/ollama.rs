//! Ollama HTTP backend (`/api/generate`, `/api/tags`).

use std::time::Duration;

use async_trait::async_trait;
use log::{debug, error, info, warn};
use serde::{Deserialize, Serialize};

use super::{GenerationFailure, TextGenerator};
use crate::settings::OllamaConfig;

const PROBE_TIMEOUT: Duration = Duration::from_secs(5);
const TEMPERATURE: f32 = 0.7;

#[derive(Debug, Clone)]
pub struct OllamaSettings {
    pub url: String,
    pub model: String,
    pub timeout: Duration,
    pub max_tokens: u32,
}

impl OllamaSettings {
    pub fn new(url: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            model: model.into(),
            timeout: Duration::from_secs(30),
            max_tokens: 100,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = max_tokens;
        self
    }
}

impl From<&OllamaConfig> for OllamaSettings {
    fn from(config: &OllamaConfig) -> Self {
        Self::new(config.url.clone(), config.model.clone())
            .with_timeout(Duration::from_secs(config.timeout))
            .with_max_tokens(config.max_tokens)
    }
}

#[derive(Serialize)]
struct GenerateRequest<'a> {
    model: &'a str,
    prompt: &'a str,
    system: &'a str,
    stream: bool,
    options: GenerateOptions,
}

#[derive(Serialize)]
struct GenerateOptions {
    num_predict: u32,
    temperature: f32,
}

#[derive(Deserialize)]
struct GenerateResponse {
    response: Option<String>,
}

pub struct OllamaClient {
    settings: OllamaSettings,
    base_url: String,
    client: reqwest::Client,
}

impl OllamaClient {
    pub fn new(settings: OllamaSettings) -> Self {
        let client = reqwest::Client::builder()
            .timeout(settings.timeout)
            .build()
            .unwrap_or_default();
        let base_url = settings.url.trim_end_matches('/').to_string();
        Self {
            settings,
            base_url,
            client,
        }
    }

    pub fn settings(&self) -> &OllamaSettings {
        &self.settings
    }

    async fn fetch_tags(&self) -> Result<serde_json::Value, GenerationFailure> {
        let resp = self
            .client
            .get(format!("{}/api/tags", self.base_url))
            .timeout(PROBE_TIMEOUT)
            .send()
            .await
            .map_err(|err| classify_reqwest_error(&err))?;

        if !resp.status().is_success() {
            return Err(GenerationFailure::Http {
                status: resp.status().as_u16(),
            });
        }
        resp.json()
            .await
            .map_err(|err| GenerationFailure::MalformedResponse(err.to_string()))
    }
}

#[async_trait]
impl TextGenerator for OllamaClient {
    async fn is_available(&self) -> bool {
        match self.fetch_tags().await {
            Ok(_) => {
                info!("Ollama health check passed");
                true
            }
            Err(err) => {
                warn!("Ollama health check failed: {err}");
                false
            }
        }
    }

    async fn generate(
        &self,
        prompt: &str,
        system_prompt: &str,
    ) -> Result<String, GenerationFailure> {
        let endpoint = format!("{}/api/generate", self.base_url);
        let payload = GenerateRequest {
            model: &self.settings.model,
            prompt,
            system: system_prompt,
            stream: false,
            options: GenerateOptions {
                num_predict: self.settings.max_tokens,
                temperature: TEMPERATURE,
            },
        };

        info!("Sending request to Ollama: {endpoint}");
        debug!("Prompt: {prompt}");

        let resp = self
            .client
            .post(&endpoint)
            .json(&payload)
            .send()
            .await
            .map_err(|err| {
                let failure = classify_reqwest_error(&err);
                error!("Ollama request failed: {failure}");
                failure
            })?;

        let status = resp.status();
        if !status.is_success() {
            error!("Ollama HTTP error: {status}");
            return Err(GenerationFailure::Http {
                status: status.as_u16(),
            });
        }

        let body: GenerateResponse = resp.json().await.map_err(|err| {
            if err.is_timeout() {
                GenerationFailure::Timeout
            } else {
                GenerationFailure::MalformedResponse(err.to_string())
            }
        })?;

        match body.response {
            Some(text) => {
                let text = text.trim().to_string();
                info!("Ollama generated: {text}");
                Ok(text)
            }
            None => {
                error!("Unexpected Ollama response format: missing 'response'");
                Err(GenerationFailure::MalformedResponse(
                    "missing 'response' field".into(),
                ))
            }
        }
    }

    async fn list_models(&self) -> Option<Vec<String>> {
        match self.fetch_tags().await {
            Ok(json) => {
                let models = parse_tags(&json);
                if let Some(models) = &models {
                    info!("Available Ollama models: {models:?}");
                }
                models
            }
            Err(err) => {
                error!("Failed to get Ollama models: {err}");
                None
            }
        }
    }
}

fn classify_reqwest_error(err: &reqwest::Error) -> GenerationFailure {
    if err.is_timeout() {
        GenerationFailure::Timeout
    } else if err.is_connect() {
        GenerationFailure::Unreachable(err.to_string())
    } else if err.is_decode() {
        GenerationFailure::MalformedResponse(err.to_string())
    } else {
        GenerationFailure::Transport(err.to_string())
    }
}

/// `{"models": [{"name": "llama3:8b"}, ...]}`
fn parse_tags(json: &serde_json::Value) -> Option<Vec<String>> {
    let models = json.get("models")?.as_array()?;
    Some(
        models
            .iter()
            .filter_map(|entry| entry.get("name")?.as_str().map(String::from))
            .collect(),
    )
}
