//! External model engine boundary
//!
//! The recognition, generation, and synthesis models live behind these
//! traits. Each service constructs its engine handle once at startup and
//! injects it into request handlers as an `Arc<dyn Trait>`; the engines are
//! safe for concurrent read-only use.

mod generator;
mod recognizer;
mod synthesizer;

pub use generator::OllamaGenerator;
pub use recognizer::HttpRecognizer;
pub use synthesizer::HttpSynthesizer;

use std::path::Path;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::Result;

/// Speech recognition: audio file in, transcript out
#[async_trait]
pub trait SpeechRecognizer: Send + Sync {
    /// Transcribe the audio at `audio_path`.
    ///
    /// `lang` is a two-letter hint, or `None` for automatic detection.
    async fn transcribe(&self, audio_path: &Path, lang: Option<&str>) -> Result<String>;
}

/// Language-model generation: prompt in, reply out
#[async_trait]
pub trait ReplyGenerator: Send + Sync {
    /// Generate a reply for the composed prompt
    async fn generate(&self, prompt: &str) -> Result<String>;

    /// One-time startup warmup to avoid first-call latency.
    ///
    /// Best-effort; callers treat failures as non-fatal.
    async fn warmup(&self) -> Result<()> {
        Ok(())
    }
}

/// Voice synthesis: reference sample + text in, audio file written to `dest`
#[async_trait]
pub trait VoiceSynthesizer: Send + Sync {
    /// Synthesize `text` in the voice of `reference`, writing the result to
    /// `dest`.
    async fn synthesize(
        &self,
        reference: &Path,
        text: &str,
        dest: &Path,
        params: &DecodeParams,
    ) -> Result<()>;
}

/// Synthesis decoding parameters.
///
/// Engine tuning constants; fixed per deployment, not part of the
/// orchestration contract.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DecodeParams {
    /// Enable sampling
    pub do_sample: bool,
    /// Sampling temperature
    pub temperature: f32,
    /// Nucleus sampling cutoff
    pub top_p: f32,
    /// Top-k sampling cutoff
    pub top_k: u32,
    /// Beam count
    pub num_beams: u32,
}

impl Default for DecodeParams {
    fn default() -> Self {
        Self {
            do_sample: true,
            temperature: 0.8,
            top_p: 0.9,
            top_k: 50,
            num_beams: 1,
        }
    }
}
