//! Pipeline orchestrator service
//!
//! Receives the client's audio upload and drives the three stage services
//! in sequence, handing each stage the previous stage's output path. Every
//! response, success or failure, carries the timeline accumulated so far
//! and whatever partial results earlier stages produced.

use std::path::Path as FsPath;
use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::{
    extract::{DefaultBodyLimit, Multipart, Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::get,
    routing::post,
    Json, Router,
};
use serde::{Deserialize, Serialize};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use super::ServiceError;
use crate::config::{Config, OrchestratorConfig};
use crate::paths::{
    ArtifactPath, TrialPaths, PIPELINE_SPEECH_FILE, REFERENCE_VOICE_FILE, REPLY_FILE,
    TRANSCRIPT_FILE,
};
use crate::timeline::{Payload, Timeline, TimelineEvent};
use crate::{Error, Result};

/// Maximum accepted audio upload size
const MAX_UPLOAD_BYTES: usize = 32 * 1024 * 1024;

/// Shared state for the orchestrator service
pub struct OrchestratorState {
    /// Service configuration
    pub config: Arc<Config>,
    /// HTTP client for the stage services
    pub stages: StageClient,
}

impl OrchestratorState {
    /// Build orchestrator state from configuration
    #[must_use]
    pub fn new(config: Arc<Config>) -> Self {
        let stages = StageClient::new(&config.orchestrator);
        Self { config, stages }
    }
}

/// Build the orchestrator API router
pub fn router(state: Arc<OrchestratorState>) -> Router {
    let data_root = state.config.data_root.clone();
    Router::new()
        .route("/api/v1/process", post(process))
        .layer(DefaultBodyLimit::max(MAX_UPLOAD_BYTES))
        .route("/api/v1/status/{session_id}/{trial_id}", get(status))
        .route("/api/v1/download/{*path}", get(download))
        .with_state(state)
        .merge(health_router())
        .merge(super::files_router(data_root))
}

/// Build the full orchestrator application
pub fn app(state: Arc<OrchestratorState>) -> Router {
    router(state)
        .layer(CorsLayer::new().allow_origin(Any).allow_methods(Any).allow_headers(Any))
        .layer(TraceLayer::new_for_http())
}

/// Orchestrator health response (shape differs from the stage probes)
fn health_router() -> Router {
    #[derive(Serialize)]
    struct Health {
        status: &'static str,
        service: &'static str,
    }

    Router::new().route(
        "/healthz",
        get(|| async {
            Json(Health {
                status: "healthy",
                service: "orchestrator",
            })
        }),
    )
}

/// Parsed multipart form for a pipeline request
struct PipelineRequest {
    audio: Vec<u8>,
    audio_name: String,
    session_id: String,
    trial_id: u32,
    lang: String,
    voice_id: String,
    user_context: String,
    condition: String,
    scene: String,
}

/// Full pipeline success response
#[derive(Serialize)]
struct ProcessSuccess {
    status: &'static str,
    session_id: String,
    trial_id: u32,
    stt_text: String,
    llm_response: String,
    tts_audio_path: String,
    processing_time: f64,
    lang: String,
    voice_id: String,
    user_context: String,
    condition: String,
    scene: String,
    timeline: Vec<TimelineEvent>,
}

/// Pipeline failure response, carrying partial results
#[derive(Serialize)]
struct ProcessFailure {
    status: &'static str,
    error: String,
    stage: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    stt_text: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    llm_response: Option<String>,
    processing_time: f64,
    timeline: Vec<TimelineEvent>,
}

/// Drive the full STT -> LLM -> TTS pipeline for one trial.
///
/// Stages run strictly sequentially; a failure at any stage stops the
/// pipeline and returns a 500 carrying the timeline and all partial
/// results obtained before the failure.
async fn process(
    State(state): State<Arc<OrchestratorState>>,
    multipart: Multipart,
) -> Result<Response, ServiceError> {
    let started = Instant::now();
    let request = parse_request(multipart).await?;

    let data_root = &state.config.data_root;
    let paths = TrialPaths::resolve(data_root, &request.session_id, request.trial_id)?;

    tracing::info!(
        session_id = %request.session_id,
        trial_id = request.trial_id,
        "starting pipeline"
    );

    let mut timeline = Timeline::open(&paths.timeline_path);
    timeline.record(
        "pipeline_start",
        Payload::new()
            .field("session_id", request.session_id.as_str())
            .field("trial_id", request.trial_id),
    );

    // Stage 1: transcription.
    timeline.record("stt_start", Payload::new());
    let stt_reply = match state.stages.stt(&request).await {
        Ok(reply) => reply,
        Err(e) => return Ok(failure(&mut timeline, "stt", &e, None, None, started)),
    };

    let transcript_path = ArtifactPath::from_request(data_root, &stt_reply.asr_text_path)?;
    let stt_text = read_snippet_source(&transcript_path.absolute(data_root)).await;
    timeline.record(
        "stt_end",
        Payload::new()
            .field("asr_text_path", transcript_path.to_string())
            .field("asr_text_snippet", snippet(&stt_text, 200)),
    );

    // Stage 2: response generation. The transcript path is re-rooted so the
    // LLM service sees it relative to the shared data root.
    let prompt_path = transcript_path.to_string();
    timeline.record("llm_start", Payload::new().field("prompt_path", prompt_path.as_str()));
    let llm_reply = match state
        .stages
        .llm(&request, &prompt_path)
        .await
    {
        Ok(reply) => reply,
        Err(e) => {
            return Ok(failure(
                &mut timeline,
                "llm",
                &e,
                Some(stt_text),
                None,
                started,
            ));
        }
    };

    let reply_path = ArtifactPath::from_request(data_root, &llm_reply.llm_text_path)?;
    let llm_text = read_snippet_source(&reply_path.absolute(data_root)).await;
    timeline.record(
        "llm_end",
        Payload::new()
            .field("llm_text_snippet", snippet(&llm_text, 300))
            .field("llm_text_path", reply_path.to_string()),
    );

    // Stage 3: synthesis, voiced with the session's reference sample.
    let ref_path = format!(
        "sessions/{}_session/meta/{REFERENCE_VOICE_FILE}",
        request.session_id
    );
    timeline.record(
        "tts_start",
        Payload::new()
            .field("voice_id", request.voice_id.as_str())
            .field("ref_path", ref_path.as_str())
            .field("text_path", reply_path.to_string()),
    );
    let tts_reply = match state
        .stages
        .tts(&request, &reply_path.to_string(), &ref_path)
        .await
    {
        Ok(reply) => reply,
        Err(e) => {
            return Ok(failure(
                &mut timeline,
                "tts",
                &e,
                Some(stt_text),
                Some(llm_text),
                started,
            ));
        }
    };
    timeline.record(
        "tts_end",
        Payload::new().field("tts_audio_path", tts_reply.audio_path.as_str()),
    );

    let processing_time = round2(started.elapsed().as_secs_f64());
    timeline.record(
        "pipeline_end",
        Payload::new().field("processing_time", processing_time),
    );

    tracing::info!(
        session_id = %request.session_id,
        trial_id = request.trial_id,
        processing_time,
        "pipeline complete"
    );

    Ok(Json(ProcessSuccess {
        status: "success",
        session_id: request.session_id,
        trial_id: request.trial_id,
        stt_text,
        llm_response: llm_text,
        tts_audio_path: tts_reply.audio_path,
        processing_time,
        lang: request.lang,
        voice_id: request.voice_id,
        user_context: request.user_context,
        condition: request.condition,
        scene: request.scene,
        timeline: timeline.snapshot(),
    })
    .into_response())
}

/// Record the pipeline error and build the 500 response with partials
fn failure(
    timeline: &mut Timeline,
    stage: &'static str,
    error: &Error,
    stt_text: Option<String>,
    llm_response: Option<String>,
    started: Instant,
) -> Response {
    tracing::error!(stage, error = %error, "pipeline stage failed");
    timeline.record(
        "pipeline_error",
        Payload::new()
            .field("stage", stage)
            .field("error", snippet(&error.to_string(), 1000)),
    );

    (
        StatusCode::INTERNAL_SERVER_ERROR,
        Json(ProcessFailure {
            status: "error",
            error: error.to_string(),
            stage,
            stt_text,
            llm_response,
            processing_time: round2(started.elapsed().as_secs_f64()),
            timeline: timeline.snapshot(),
        }),
    )
        .into_response()
}

/// Parse and default the multipart pipeline request
async fn parse_request(mut multipart: Multipart) -> Result<PipelineRequest, ServiceError> {
    let mut audio: Option<(Vec<u8>, String)> = None;
    let mut session_id = format!("session_{}", crate::timeline::epoch_now() as u64);
    let mut trial_id: u32 = 1;
    let mut lang = "en".to_string();
    let mut voice_id = "default".to_string();
    let mut user_context = String::new();
    let mut condition = "1".to_string();
    let mut scene = "default".to_string();

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| ServiceError::BadRequest(e.to_string()))?
    {
        let name = field.name().unwrap_or_default().to_string();
        match name.as_str() {
            "audio" => {
                let file_name = field
                    .file_name()
                    .map_or_else(|| "input.wav".to_string(), ToString::to_string);
                let bytes = field
                    .bytes()
                    .await
                    .map_err(|e| ServiceError::BadRequest(e.to_string()))?;
                audio = Some((bytes.to_vec(), file_name));
            }
            "session_id" => session_id = super::multipart_text(field).await?,
            "trial_id" => {
                trial_id = super::multipart_text(field)
                    .await?
                    .parse()
                    .map_err(|_| ServiceError::BadRequest("trial_id must be an integer".into()))?;
            }
            "lang" => lang = super::multipart_text(field).await?,
            "voice_id" => voice_id = super::multipart_text(field).await?,
            "user_context" => user_context = super::multipart_text(field).await?,
            "condition" => condition = super::multipart_text(field).await?,
            "scene" => scene = super::multipart_text(field).await?,
            _ => {}
        }
    }

    let Some((audio, audio_name)) = audio else {
        return Err(ServiceError::BadRequest("no audio file provided".into()));
    };
    if audio.is_empty() {
        return Err(ServiceError::BadRequest("empty audio file".into()));
    }

    Ok(PipelineRequest {
        audio,
        audio_name,
        session_id,
        trial_id,
        lang,
        voice_id,
        user_context,
        condition,
        scene,
    })
}

/// Per-trial completion probe: which stage artifacts exist on disk
#[derive(Serialize)]
struct TrialStatus {
    session_id: String,
    trial_id: u32,
    stt_completed: bool,
    llm_completed: bool,
    tts_completed: bool,
}

/// Coarse completion check based on artifact existence
async fn status(
    State(state): State<Arc<OrchestratorState>>,
    Path((session_id, trial_id)): Path<(String, u32)>,
) -> Result<Json<TrialStatus>, ServiceError> {
    let paths = TrialPaths::resolve(&state.config.data_root, &session_id, trial_id)?;

    Ok(Json(TrialStatus {
        stt_completed: paths.trial_dir.join(TRANSCRIPT_FILE).is_file(),
        llm_completed: paths.trial_dir.join(REPLY_FILE).is_file(),
        tts_completed: paths.trial_dir.join(PIPELINE_SPEECH_FILE).is_file(),
        session_id,
        trial_id,
    }))
}

/// Serve a generated artifact to the client
async fn download(
    State(state): State<Arc<OrchestratorState>>,
    Path(path): Path<String>,
) -> Result<Response, ServiceError> {
    super::serve_data_file(&state.config.data_root, &path).await
}

/// Truncate a string for a timeline payload
fn snippet(text: &str, max_chars: usize) -> String {
    text.chars().take(max_chars).collect()
}

/// Round to two decimal places for client display
fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

async fn read_snippet_source(path: &FsPath) -> String {
    match tokio::fs::read_to_string(path).await {
        Ok(content) => content.trim().to_string(),
        Err(e) => {
            tracing::warn!(path = %path.display(), error = %e, "stage artifact unreadable");
            String::new()
        }
    }
}

/// Typed view of the transcription stage response
#[derive(Deserialize)]
pub struct SttStageReply {
    /// Transcript path relative to the data root
    pub asr_text_path: String,
}

/// Typed view of the response-generation stage response
#[derive(Deserialize)]
pub struct LlmStageReply {
    /// Reply path relative to the data root
    pub llm_text_path: String,
}

/// Typed view of the synthesis stage response
#[derive(Deserialize)]
pub struct TtsStageReply {
    /// Synthesized audio path relative to the data root
    pub audio_path: String,
    /// Whether the stage wrote a silent placeholder
    #[serde(default)]
    pub fallback: bool,
}

/// HTTP client for the three stage services, with per-stage timeouts
pub struct StageClient {
    http: reqwest::Client,
    stt_url: String,
    llm_url: String,
    tts_url: String,
    stt_timeout: Duration,
    llm_timeout: Duration,
    tts_timeout: Duration,
}

impl StageClient {
    /// Build a stage client from orchestrator configuration
    #[must_use]
    pub fn new(config: &OrchestratorConfig) -> Self {
        Self {
            http: reqwest::Client::new(),
            stt_url: config.stt_url.trim_end_matches('/').to_string(),
            llm_url: config.llm_url.trim_end_matches('/').to_string(),
            tts_url: config.tts_url.trim_end_matches('/').to_string(),
            stt_timeout: Duration::from_secs(config.stt_timeout_secs),
            llm_timeout: Duration::from_secs(config.llm_timeout_secs),
            tts_timeout: Duration::from_secs(config.tts_timeout_secs),
        }
    }

    /// Call the transcription stage
    async fn stt(&self, request: &PipelineRequest) -> Result<SttStageReply> {
        let form = reqwest::multipart::Form::new()
            .part(
                "audio",
                reqwest::multipart::Part::bytes(request.audio.clone())
                    .file_name(request.audio_name.clone())
                    .mime_str("audio/wav")
                    .map_err(|e| stage_error("stt", &e.to_string()))?,
            )
            .text("session_id", request.session_id.clone())
            .text("trial_id", request.trial_id.to_string())
            .text("lang", request.lang.clone());

        let response = self
            .http
            .post(format!("{}/api/v1/stt", self.stt_url))
            .timeout(self.stt_timeout)
            .multipart(form)
            .send()
            .await
            .map_err(|e| stage_error("stt", &e.to_string()))?;

        parse_stage_response("stt", response).await
    }

    /// Call the response-generation stage
    async fn llm(&self, request: &PipelineRequest, prompt_path: &str) -> Result<LlmStageReply> {
        #[derive(Serialize)]
        struct LlmStageRequest<'a> {
            session_id: &'a str,
            trial_id: u32,
            prompt_path: &'a str,
            condition: &'a str,
        }

        let response = self
            .http
            .post(format!("{}/api/v1/llm", self.llm_url))
            .timeout(self.llm_timeout)
            .json(&LlmStageRequest {
                session_id: &request.session_id,
                trial_id: request.trial_id,
                prompt_path,
                condition: &request.condition,
            })
            .send()
            .await
            .map_err(|e| stage_error("llm", &e.to_string()))?;

        parse_stage_response("llm", response).await
    }

    /// Call the synthesis stage
    async fn tts(
        &self,
        request: &PipelineRequest,
        text_path: &str,
        ref_path: &str,
    ) -> Result<TtsStageReply> {
        #[derive(Serialize)]
        struct TtsStageRequest<'a> {
            session_id: &'a str,
            trial_id: u32,
            text_path: &'a str,
            ref_path: &'a str,
        }

        let response = self
            .http
            .post(format!("{}/api/v1/tts", self.tts_url))
            .timeout(self.tts_timeout)
            .json(&TtsStageRequest {
                session_id: &request.session_id,
                trial_id: request.trial_id,
                text_path,
                ref_path,
            })
            .send()
            .await
            .map_err(|e| stage_error("tts", &e.to_string()))?;

        parse_stage_response("tts", response).await
    }
}

/// Turn a non-2xx stage response into a stage error with its body detail
async fn parse_stage_response<T: serde::de::DeserializeOwned>(
    stage: &'static str,
    response: reqwest::Response,
) -> Result<T> {
    let status = response.status();
    if !status.is_success() {
        let body = response.text().await.unwrap_or_default();
        return Err(stage_error(stage, &format!("{status}: {body}")));
    }
    response
        .json::<T>()
        .await
        .map_err(|e| stage_error(stage, &e.to_string()))
}

fn stage_error(stage: &'static str, message: &str) -> Error {
    Error::Stage {
        stage,
        message: message.to_string(),
    }
}
