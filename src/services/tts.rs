//! Speech-synthesis stage service
//!
//! Resolves the text to speak and the reference voice through ordered
//! fallback chains, invokes the synthesis engine, and guarantees an audio
//! artifact exists even when the engine is down by writing a short silent
//! placeholder instead of failing.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use axum::{extract::State, routing::post, Json, Router};
use serde::{Deserialize, Serialize};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use super::ServiceError;
use crate::config::Config;
use crate::engines::VoiceSynthesizer;
use crate::paths::{
    ArtifactPath, TrialPaths, DEFAULT_SPEECH_FILE, REFERENCE_VOICE_FILE, REPLY_FILE,
};
use crate::timeline::{Payload, Timeline, TimelineEvent};
use crate::Error;

/// Spoken when no text could be resolved from the request or the trial
const DEFAULT_LINE: &str = "I do not have anything to say yet.";

/// Shared state for the synthesis service
pub struct TtsState {
    /// Service configuration
    pub config: Arc<Config>,
    /// Synthesis engine handle, constructed once at startup
    pub synthesizer: Arc<dyn VoiceSynthesizer>,
}

/// Build the synthesis API router
pub fn router(state: Arc<TtsState>) -> Router {
    Router::new()
        .route("/api/v1/tts", post(synthesize))
        .with_state(state)
}

/// Build the full synthesis service application
pub fn app(state: Arc<TtsState>) -> Router {
    let data_root = state.config.data_root.clone();
    router(state)
        .merge(super::health_router("tts"))
        .merge(super::files_router(data_root))
        .layer(CorsLayer::new().allow_origin(Any).allow_methods(Any).allow_headers(Any))
        .layer(TraceLayer::new_for_http())
}

/// Synthesis request
#[derive(Debug, Deserialize)]
pub struct TtsRequest {
    pub session_id: String,
    pub trial_id: u32,
    /// Inline text to speak
    #[serde(default)]
    pub text: Option<String>,
    /// Path to a text file, relative to the data root (prefix tolerated)
    #[serde(default)]
    pub text_path: Option<String>,
    /// Reference voice sample path, relative to the data root
    #[serde(default)]
    pub ref_path: Option<String>,
}

/// Synthesis response
#[derive(Debug, Serialize)]
pub struct TtsResponse {
    pub session_id: String,
    pub trial_id: u32,
    /// Synthesized audio path relative to the data root
    pub audio_path: String,
    /// True when the engine failed and a silent placeholder was written
    pub fallback: bool,
    pub timeline: Vec<TimelineEvent>,
}

/// Handle a synthesis request
async fn synthesize(
    State(state): State<Arc<TtsState>>,
    Json(request): Json<TtsRequest>,
) -> Result<Json<TtsResponse>, ServiceError> {
    let data_root = &state.config.data_root;
    let paths = TrialPaths::resolve(data_root, &request.session_id, request.trial_id)?;

    let mut timeline = Timeline::open(&paths.timeline_path);
    timeline.record("tts_start", Payload::new());

    let text = resolve_text(data_root, &paths, &request).await?;
    let reference = resolve_reference(&state.config, &paths, request.ref_path.as_deref())?;
    let out_name = derive_speech_name(request.text_path.as_deref());
    let out_path = paths.trial_dir.join(&out_name);

    let mut fallback = false;
    if let Err(e) = state
        .synthesizer
        .synthesize(&reference, &text, &out_path, &state.config.tts.decode)
        .await
    {
        tracing::warn!(error = %e, "synthesis failed, writing silent placeholder");
        write_silent_wav(
            &out_path,
            state.config.tts.fallback_sample_rate,
            state.config.tts.fallback_duration_ms,
        )
        .map_err(|e| ServiceError::Internal(e.to_string()))?;
        timeline.record("tts_fallback", Payload::new().field("error", e.to_string()));
        fallback = true;
    }

    let audio_path = ArtifactPath::from_local(data_root, &out_path).to_string();
    timeline.record("tts_end", Payload::new().field("audio_path", audio_path.as_str()));

    tracing::info!(
        session_id = %request.session_id,
        trial_id = request.trial_id,
        %audio_path,
        fallback,
        "speech artifact written"
    );

    Ok(Json(TtsResponse {
        session_id: request.session_id,
        trial_id: request.trial_id,
        audio_path,
        fallback,
        timeline: timeline.snapshot(),
    }))
}

/// Resolve the text to speak: inline text, then the referenced file, then
/// the trial's reply file, then a literal default. The last entry always
/// succeeds.
async fn resolve_text(
    data_root: &Path,
    paths: &TrialPaths,
    request: &TtsRequest,
) -> Result<String, ServiceError> {
    if let Some(text) = request.text.as_deref() {
        let text = text.trim();
        if !text.is_empty() {
            return Ok(text.to_string());
        }
    }

    if let Some(raw) = request.text_path.as_deref() {
        let artifact = ArtifactPath::from_request(data_root, raw)?;
        if let Some(text) = read_trimmed(&artifact.absolute(data_root)).await {
            return Ok(text);
        }
    }

    if let Some(text) = read_trimmed(&paths.trial_dir.join(REPLY_FILE)).await {
        return Ok(text);
    }

    Ok(DEFAULT_LINE.to_string())
}

async fn read_trimmed(path: &Path) -> Option<String> {
    let content = tokio::fs::read_to_string(path).await.ok()?;
    let trimmed = content.trim();
    (!trimmed.is_empty()).then(|| trimmed.to_string())
}

/// Resolve the reference voice: explicit path, then the session's meta
/// sample, then the bundled default.
fn resolve_reference(
    config: &Config,
    paths: &TrialPaths,
    ref_path: Option<&str>,
) -> Result<PathBuf, ServiceError> {
    if let Some(raw) = ref_path {
        let artifact = ArtifactPath::from_request(&config.data_root, raw)?;
        return Ok(artifact.absolute(&config.data_root));
    }

    let session_sample = paths.meta_dir.join(REFERENCE_VOICE_FILE);
    if session_sample.is_file() {
        return Ok(session_sample);
    }

    Ok(config.default_voice.clone())
}

/// Derive the output filename from the input text path.
///
/// A path carrying the `llm` stage tag maps to the matching `tts` name
/// (`user_2B_llm.txt` becomes `user_2B_tts.wav`); anything else falls back
/// to the fixed default name.
fn derive_speech_name(text_path: Option<&str>) -> String {
    let Some(stem) = text_path
        .map(Path::new)
        .and_then(Path::file_stem)
        .and_then(|s| s.to_str())
    else {
        return DEFAULT_SPEECH_FILE.to_string();
    };

    if stem.contains("llm") {
        format!("{}.wav", stem.replace("llm", "tts"))
    } else {
        DEFAULT_SPEECH_FILE.to_string()
    }
}

/// Write a silent 16-bit mono WAV placeholder
fn write_silent_wav(path: &Path, sample_rate: u32, duration_ms: u32) -> crate::Result<()> {
    let spec = hound::WavSpec {
        channels: 1,
        sample_rate,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    };

    let mut writer =
        hound::WavWriter::create(path, spec).map_err(|e| Error::Audio(e.to_string()))?;
    let samples = sample_rate * duration_ms / 1000;
    for _ in 0..samples {
        writer
            .write_sample(0i16)
            .map_err(|e| Error::Audio(e.to_string()))?;
    }
    writer.finalize().map_err(|e| Error::Audio(e.to_string()))?;
    Ok(())
}
