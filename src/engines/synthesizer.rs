//! HTTP-backed voice synthesis engine

use std::path::Path;

use async_trait::async_trait;

use super::{DecodeParams, VoiceSynthesizer};
use crate::{Error, Result};

/// Voice synthesizer backed by an HTTP synthesis server.
///
/// The reference sample, text, and decoding parameters are posted as a
/// multipart form; the response body is the synthesized audio, which is
/// written to the destination path.
pub struct HttpSynthesizer {
    client: reqwest::Client,
    endpoint: String,
}

impl HttpSynthesizer {
    /// Create a synthesizer for the given engine endpoint
    #[must_use]
    pub fn new(endpoint: String) -> Self {
        Self {
            client: reqwest::Client::new(),
            endpoint,
        }
    }
}

#[async_trait]
impl VoiceSynthesizer for HttpSynthesizer {
    async fn synthesize(
        &self,
        reference: &Path,
        text: &str,
        dest: &Path,
        params: &DecodeParams,
    ) -> Result<()> {
        let reference_audio = tokio::fs::read(reference).await?;
        tracing::debug!(
            reference = %reference.display(),
            text_chars = text.len(),
            "starting synthesis"
        );

        let params_json = serde_json::to_string(params)?;
        let form = reqwest::multipart::Form::new()
            .part(
                "reference",
                reqwest::multipart::Part::bytes(reference_audio)
                    .file_name("reference.wav")
                    .mime_str("audio/wav")
                    .map_err(|e| Error::Tts(e.to_string()))?,
            )
            .text("text", text.to_string())
            .text("params", params_json);

        let response = self
            .client
            .post(&self.endpoint)
            .multipart(form)
            .send()
            .await
            .map_err(|e| {
                tracing::error!(error = %e, "synthesis request failed");
                e
            })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            tracing::error!(status = %status, body = %body, "synthesis engine error");
            return Err(Error::Tts(format!("engine error {status}: {body}")));
        }

        let audio = response.bytes().await?;
        tokio::fs::write(dest, &audio).await?;

        tracing::info!(dest = %dest.display(), bytes = audio.len(), "synthesis complete");
        Ok(())
    }
}
