//! HTTP-backed speech recognition engine

use std::path::Path;

use async_trait::async_trait;

use super::SpeechRecognizer;
use crate::{Error, Result};

/// Response from a whisper-style transcription endpoint
#[derive(serde::Deserialize)]
struct TranscriptionResponse {
    text: String,
}

/// Speech recognizer backed by a whisper-style HTTP transcription API
pub struct HttpRecognizer {
    client: reqwest::Client,
    endpoint: String,
    model: String,
}

impl HttpRecognizer {
    /// Create a recognizer for the given endpoint and model
    #[must_use]
    pub fn new(endpoint: String, model: String) -> Self {
        Self {
            client: reqwest::Client::new(),
            endpoint,
            model,
        }
    }
}

#[async_trait]
impl SpeechRecognizer for HttpRecognizer {
    async fn transcribe(&self, audio_path: &Path, lang: Option<&str>) -> Result<String> {
        let audio = tokio::fs::read(audio_path).await?;
        tracing::debug!(audio_bytes = audio.len(), "starting transcription");

        let file_name = audio_path
            .file_name()
            .map_or_else(|| "audio.wav".to_string(), |n| n.to_string_lossy().into_owned());

        let mut form = reqwest::multipart::Form::new()
            .part(
                "file",
                reqwest::multipart::Part::bytes(audio)
                    .file_name(file_name)
                    .mime_str("audio/wav")
                    .map_err(|e| Error::Stt(e.to_string()))?,
            )
            .text("model", self.model.clone());

        if let Some(lang) = lang {
            form = form.text("language", lang.to_string());
        }

        let response = self
            .client
            .post(&self.endpoint)
            .multipart(form)
            .send()
            .await
            .map_err(|e| {
                tracing::error!(error = %e, "transcription request failed");
                e
            })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            tracing::error!(status = %status, body = %body, "transcription engine error");
            return Err(Error::Stt(format!("engine error {status}: {body}")));
        }

        let result: TranscriptionResponse = response.json().await.map_err(|e| {
            tracing::error!(error = %e, "failed to parse transcription response");
            e
        })?;

        tracing::info!(transcript = %result.text, "transcription complete");
        Ok(result.text)
    }
}
