//! Transcription stage service
//!
//! Accepts the client's audio upload, persists it under the trial
//! directory, runs the recognition engine, and writes the transcript for
//! the next stage to pick up.

use std::sync::Arc;

use axum::{
    extract::{DefaultBodyLimit, Multipart, State},
    routing::post,
    Json, Router,
};
use serde::Serialize;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use super::ServiceError;
use crate::config::Config;
use crate::engines::SpeechRecognizer;
use crate::paths::{ArtifactPath, TrialPaths, INPUT_AUDIO_FILE, TRANSCRIPT_FILE};
use crate::timeline::{Payload, Timeline, TimelineEvent};

/// Maximum accepted audio upload size
const MAX_UPLOAD_BYTES: usize = 32 * 1024 * 1024;

/// Shared state for the transcription service
pub struct SttState {
    /// Service configuration
    pub config: Arc<Config>,
    /// Recognition engine handle, constructed once at startup
    pub recognizer: Arc<dyn SpeechRecognizer>,
}

/// Build the transcription API router
pub fn router(state: Arc<SttState>) -> Router {
    Router::new()
        .route("/api/v1/stt", post(transcribe))
        .layer(DefaultBodyLimit::max(MAX_UPLOAD_BYTES))
        .with_state(state)
}

/// Build the full transcription service application
pub fn app(state: Arc<SttState>) -> Router {
    let data_root = state.config.data_root.clone();
    router(state)
        .merge(super::health_router("stt"))
        .merge(super::files_router(data_root))
        .layer(CorsLayer::new().allow_origin(Any).allow_methods(Any).allow_headers(Any))
        .layer(TraceLayer::new_for_http())
}

/// Transcription response
#[derive(Debug, Serialize)]
pub struct SttResponse {
    pub session_id: String,
    pub trial_id: u32,
    /// Transcript path relative to the data root
    pub asr_text_path: String,
    pub asr_confidence: f64,
    pub duration_sec: f64,
    pub timeline: Vec<TimelineEvent>,
}

/// Handle a transcription request.
///
/// Multipart fields: `audio` (required), `session_id`, `trial_id`, `lang`
/// (two-letter code or `auto`).
async fn transcribe(
    State(state): State<Arc<SttState>>,
    mut multipart: Multipart,
) -> Result<Json<SttResponse>, ServiceError> {
    let mut audio: Option<Vec<u8>> = None;
    let mut session_id = "demo-session".to_string();
    let mut trial_id: u32 = 0;
    let mut lang = "en".to_string();

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| ServiceError::BadRequest(e.to_string()))?
    {
        let name = field.name().unwrap_or_default().to_string();
        match name.as_str() {
            "audio" => {
                let bytes = field
                    .bytes()
                    .await
                    .map_err(|e| ServiceError::BadRequest(e.to_string()))?;
                audio = Some(bytes.to_vec());
            }
            "session_id" => session_id = super::multipart_text(field).await?,
            "trial_id" => {
                trial_id = super::multipart_text(field)
                    .await?
                    .parse()
                    .map_err(|_| ServiceError::BadRequest("trial_id must be an integer".into()))?;
            }
            "lang" => lang = super::multipart_text(field).await?,
            _ => {}
        }
    }

    let Some(audio) = audio else {
        return Err(ServiceError::BadRequest("missing file field 'audio'".into()));
    };

    let data_root = &state.config.data_root;
    let paths = TrialPaths::resolve(data_root, &session_id, trial_id)?;

    let wav_path = paths.trial_dir.join(INPUT_AUDIO_FILE);
    tokio::fs::write(&wav_path, &audio)
        .await
        .map_err(|e| ServiceError::Internal(e.to_string()))?;

    let mut timeline = Timeline::open(&paths.timeline_path);
    timeline.record("recv_start", Payload::new().field("lang", lang.as_str()));

    tracing::info!(%session_id, trial_id, %lang, "transcribing trial audio");

    // "auto" means no language hint.
    let hint = (lang != "auto").then_some(lang.as_str());
    let text = state.recognizer.transcribe(&wav_path, hint).await?;
    let text = text.trim();

    let asr_path = paths.trial_dir.join(TRANSCRIPT_FILE);
    tokio::fs::write(&asr_path, format!("{text}\n"))
        .await
        .map_err(|e| ServiceError::Internal(e.to_string()))?;

    timeline.record("asr_end", Payload::new());

    Ok(Json(SttResponse {
        session_id,
        trial_id,
        asr_text_path: ArtifactPath::from_local(data_root, &asr_path).to_string(),
        asr_confidence: 0.9,
        duration_sec: 0.0,
        timeline: timeline.snapshot(),
    }))
}
