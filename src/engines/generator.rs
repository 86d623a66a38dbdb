//! Ollama-backed reply generation engine

use std::time::Duration;

use async_trait::async_trait;

use super::ReplyGenerator;
use crate::config::LlmConfig;
use crate::{Error, Result};

/// Request body for the Ollama generate API
#[derive(serde::Serialize)]
struct GenerateRequest<'a> {
    model: &'a str,
    prompt: &'a str,
    stream: bool,
    keep_alive: &'a str,
}

/// Response body from the Ollama generate API
#[derive(serde::Deserialize)]
struct GenerateResponse {
    #[serde(default)]
    response: String,
}

/// Reply generator backed by an Ollama server
pub struct OllamaGenerator {
    client: reqwest::Client,
    host: String,
    model: String,
    keep_alive: String,
    generate_timeout: Duration,
    warmup_timeout: Duration,
}

impl OllamaGenerator {
    /// Create a generator from the LLM service configuration
    #[must_use]
    pub fn new(config: &LlmConfig) -> Self {
        Self {
            client: reqwest::Client::new(),
            host: config.host.trim_end_matches('/').to_string(),
            model: config.model.clone(),
            keep_alive: config.keep_alive.clone(),
            generate_timeout: Duration::from_secs(config.generate_timeout_secs),
            warmup_timeout: Duration::from_secs(config.warmup_timeout_secs),
        }
    }

    async fn call(&self, prompt: &str, timeout: Duration) -> Result<String> {
        let request = GenerateRequest {
            model: &self.model,
            prompt,
            stream: false,
            keep_alive: &self.keep_alive,
        };

        let response = self
            .client
            .post(format!("{}/api/generate", self.host))
            .timeout(timeout)
            .json(&request)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(Error::Llm(format!("engine error {status}: {body}")));
        }

        let result: GenerateResponse = response.json().await?;
        Ok(result.response.trim().to_string())
    }
}

#[async_trait]
impl ReplyGenerator for OllamaGenerator {
    async fn generate(&self, prompt: &str) -> Result<String> {
        self.call(prompt, self.generate_timeout).await
    }

    /// Trigger a lightweight load so the first real request does not pay
    /// model-load latency.
    async fn warmup(&self) -> Result<()> {
        self.call("You are loaded.", self.warmup_timeout).await?;
        tracing::info!(model = %self.model, host = %self.host, "generation model warmed up");
        Ok(())
    }
}
