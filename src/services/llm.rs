//! Response-generation stage service
//!
//! Composes a prompt from the template, the trial's scene context, and the
//! transcript, asks the generation engine for a reply, optionally extracts
//! the requested condition section, and writes the result for the synthesis
//! stage.

use std::path::Path;
use std::sync::Arc;

use axum::{extract::State, routing::post, Json, Router};
use serde::{Deserialize, Serialize};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use super::ServiceError;
use crate::condition::{extract_choice, Condition};
use crate::config::Config;
use crate::engines::ReplyGenerator;
use crate::paths::{ArtifactPath, TrialPaths, REPLY_FILE, SCENE_FILE};
use crate::timeline::{Payload, Timeline, TimelineEvent};

/// Prompt template filename under the prompt root
const TEMPLATE_FILE: &str = "prompt_llm.txt";

/// Fallback prompt directory when none is configured
const FALLBACK_PROMPT_ROOT: &str = "material/prompts";

/// Reply used when the engine is down and there is no prompt to echo
const EMPTY_PROMPT_REPLY: &str = "No prompt content available.";

/// Shared state for the response-generation service
pub struct LlmState {
    /// Service configuration
    pub config: Arc<Config>,
    /// Generation engine handle, constructed once at startup
    pub generator: Arc<dyn ReplyGenerator>,
}

/// Build the response-generation API router
pub fn router(state: Arc<LlmState>) -> Router {
    Router::new()
        .route("/api/v1/llm", post(generate))
        .with_state(state)
}

/// Build the full response-generation service application
pub fn app(state: Arc<LlmState>) -> Router {
    let data_root = state.config.data_root.clone();
    router(state)
        .merge(super::health_router("llm"))
        .merge(super::files_router(data_root))
        .layer(CorsLayer::new().allow_origin(Any).allow_methods(Any).allow_headers(Any))
        .layer(TraceLayer::new_for_http())
}

/// Response-generation request
#[derive(Debug, Deserialize)]
pub struct LlmRequest {
    pub session_id: String,
    pub trial_id: u32,
    /// Transcript path, relative to the data root (prefix tolerated)
    pub prompt_path: String,
    /// Condition selector digit; defaults to reproduce
    #[serde(default)]
    pub condition: Option<String>,
}

/// Response-generation response
#[derive(Debug, Serialize)]
pub struct LlmResponse {
    /// Reply path relative to the data root
    pub llm_text_path: String,
    pub timeline: Vec<TimelineEvent>,
}

/// Handle a response-generation request
async fn generate(
    State(state): State<Arc<LlmState>>,
    Json(request): Json<LlmRequest>,
) -> Result<Json<LlmResponse>, ServiceError> {
    let data_root = &state.config.data_root;
    let paths = TrialPaths::resolve(data_root, &request.session_id, request.trial_id)?;

    let mut timeline = Timeline::open(&paths.timeline_path);
    timeline.record("llm_start", Payload::new());

    let transcript_path = ArtifactPath::from_request(data_root, &request.prompt_path)?;

    // Prompt = template + scene + transcript, blank-line separated,
    // every part degrading to empty when its file is missing.
    let template = load_template(&state.config).await;
    let scene = read_or_empty(&paths.trial_dir.join(SCENE_FILE)).await;
    let transcript = read_or_empty(&transcript_path.absolute(data_root)).await;

    let prompt = [template, scene, transcript]
        .into_iter()
        .filter(|part| !part.is_empty())
        .collect::<Vec<_>>()
        .join("\n\n");

    let reply = match state.generator.generate(&prompt).await {
        Ok(reply) if !reply.is_empty() => reply,
        Ok(_) => {
            tracing::warn!("generation engine returned an empty reply, echoing prompt");
            echo_reply(&prompt)
        }
        Err(e) => {
            tracing::warn!(error = %e, "generation engine unavailable, echoing prompt");
            echo_reply(&prompt)
        }
    };

    let condition = Condition::parse(request.condition.as_deref());
    let reply = extract_choice(&reply, condition);

    let out_path = paths.trial_dir.join(REPLY_FILE);
    tokio::fs::write(&out_path, &reply)
        .await
        .map_err(|e| ServiceError::Internal(e.to_string()))?;

    timeline.record("llm_end", Payload::new());

    tracing::info!(
        session_id = %request.session_id,
        trial_id = request.trial_id,
        %condition,
        reply_chars = reply.len(),
        "reply written"
    );

    Ok(Json(LlmResponse {
        llm_text_path: ArtifactPath::from_local(data_root, &out_path).to_string(),
        timeline: timeline.snapshot(),
    }))
}

/// Fallback reply when the engine produced nothing
fn echo_reply(prompt: &str) -> String {
    if prompt.is_empty() {
        EMPTY_PROMPT_REPLY.to_string()
    } else {
        prompt.to_string()
    }
}

/// Load the prompt template from the configured root, falling back to the
/// conventional local directory. Absence degrades to an empty template.
async fn load_template(config: &Config) -> String {
    let root = config
        .prompt_root
        .clone()
        .filter(|p| p.is_dir())
        .unwrap_or_else(|| FALLBACK_PROMPT_ROOT.into());
    read_or_empty(&root.join(TEMPLATE_FILE)).await
}

async fn read_or_empty(path: &Path) -> String {
    match tokio::fs::read_to_string(path).await {
        Ok(content) => content.trim().to_string(),
        Err(e) => {
            tracing::warn!(path = %path.display(), error = %e, "prompt part unreadable, using empty");
            String::new()
        }
    }
}
