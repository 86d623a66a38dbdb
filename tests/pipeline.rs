//! End-to-end pipeline tests.
//!
//! Spins up real stage services on loopback ports with mock engines and
//! drives them through the orchestrator router, asserting on the response
//! shape and the recorded timeline.

use std::net::SocketAddr;
use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use axum::body::Body;
use axum::http::{Request, StatusCode};
use tower::ServiceExt;

use voxline::config::{Config, OrchestratorConfig};
use voxline::engines::{DecodeParams, ReplyGenerator, SpeechRecognizer, VoiceSynthesizer};
use voxline::services::{llm, orchestrator, stt, tts};
use voxline::Result;

struct FixedRecognizer(&'static str);

#[async_trait]
impl SpeechRecognizer for FixedRecognizer {
    async fn transcribe(&self, _audio: &Path, _lang: Option<&str>) -> Result<String> {
        Ok(self.0.to_string())
    }
}

struct FixedGenerator(&'static str);

#[async_trait]
impl ReplyGenerator for FixedGenerator {
    async fn generate(&self, _prompt: &str) -> Result<String> {
        Ok(self.0.to_string())
    }
}

struct FileWritingSynthesizer;

#[async_trait]
impl VoiceSynthesizer for FileWritingSynthesizer {
    async fn synthesize(
        &self,
        _reference: &Path,
        _text: &str,
        dest: &Path,
        _params: &DecodeParams,
    ) -> Result<()> {
        tokio::fs::write(dest, b"RIFFaudio").await?;
        Ok(())
    }
}

/// Serve an application on an ephemeral loopback port
async fn spawn(app: axum::Router) -> SocketAddr {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    addr
}

/// Reserve a loopback port nothing is listening on
async fn dead_addr() -> SocketAddr {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    listener.local_addr().unwrap()
}

fn shared_config(root: &Path) -> Config {
    Config {
        data_root: root.to_path_buf(),
        ..Config::default()
    }
}

/// Start all three stage services over one data root and return an
/// orchestrator config pointed at them
async fn start_stages(root: &Path) -> OrchestratorConfig {
    let config = Arc::new(shared_config(root));

    let stt_addr = spawn(stt::app(Arc::new(stt::SttState {
        config: config.clone(),
        recognizer: Arc::new(FixedRecognizer("hello there")),
    })))
    .await;

    let llm_addr = spawn(llm::app(Arc::new(llm::LlmState {
        config: config.clone(),
        generator: Arc::new(FixedGenerator("Nice to meet you.")),
    })))
    .await;

    let tts_addr = spawn(tts::app(Arc::new(tts::TtsState {
        config,
        synthesizer: Arc::new(FileWritingSynthesizer),
    })))
    .await;

    OrchestratorConfig {
        stt_url: format!("http://{stt_addr}"),
        llm_url: format!("http://{llm_addr}"),
        tts_url: format!("http://{tts_addr}"),
        ..OrchestratorConfig::default()
    }
}

fn orchestrator_app(root: &Path, stages: OrchestratorConfig) -> axum::Router {
    let config = Config {
        orchestrator: stages,
        ..shared_config(root)
    };
    orchestrator::app(Arc::new(orchestrator::OrchestratorState::new(Arc::new(
        config,
    ))))
}

const BOUNDARY: &str = "pipeline-test-boundary";

fn process_request(fields: &[(&str, &str)], audio: &[u8]) -> Request<Body> {
    let mut body = Vec::new();
    for (name, value) in fields {
        body.extend_from_slice(
            format!(
                "--{BOUNDARY}\r\nContent-Disposition: form-data; name=\"{name}\"\r\n\r\n{value}\r\n"
            )
            .as_bytes(),
        );
    }
    body.extend_from_slice(
        format!(
            "--{BOUNDARY}\r\nContent-Disposition: form-data; name=\"audio\"; filename=\"mic.wav\"\r\nContent-Type: audio/wav\r\n\r\n"
        )
        .as_bytes(),
    );
    body.extend_from_slice(audio);
    body.extend_from_slice(format!("\r\n--{BOUNDARY}--\r\n").as_bytes());

    Request::builder()
        .method("POST")
        .uri("/api/v1/process")
        .header(
            "content-type",
            format!("multipart/form-data; boundary={BOUNDARY}"),
        )
        .body(Body::from(body))
        .unwrap()
}

async fn json_body(response: axum::response::Response) -> serde_json::Value {
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    serde_json::from_slice(&bytes).unwrap()
}

fn event_names(json: &serde_json::Value) -> Vec<String> {
    json["timeline"]
        .as_array()
        .unwrap()
        .iter()
        .map(|e| e["event"].as_str().unwrap().to_string())
        .collect()
}

#[tokio::test]
async fn full_pipeline_produces_all_artifacts() {
    let root = tempfile::tempdir().unwrap();
    let stages = start_stages(root.path()).await;
    let app = orchestrator_app(root.path(), stages);

    let response = app
        .oneshot(process_request(
            &[
                ("session_id", "e2e"),
                ("trial_id", "1"),
                ("lang", "en"),
                ("voice_id", "alto"),
                ("condition", "1"),
                ("scene", "tavern"),
            ],
            b"RIFFfakewav",
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let json = json_body(response).await;
    assert_eq!(json["status"], "success");
    assert_eq!(json["session_id"], "e2e");
    assert_eq!(json["trial_id"], 1);
    assert_eq!(json["stt_text"], "hello there");
    assert_eq!(json["llm_response"], "Nice to meet you.");
    assert_eq!(
        json["tts_audio_path"],
        "sessions/e2e_session/trial_001/user_2B_tts.wav"
    );
    assert_eq!(json["lang"], "en");
    assert_eq!(json["voice_id"], "alto");
    assert_eq!(json["condition"], "1");
    assert_eq!(json["scene"], "tavern");
    assert!(json["processing_time"].as_f64().unwrap() >= 0.0);

    assert_eq!(
        event_names(&json),
        vec![
            "pipeline_start",
            "stt_start",
            "stt_end",
            "llm_start",
            "llm_end",
            "tts_start",
            "tts_end",
            "pipeline_end",
        ]
    );

    let trial = root.path().join("sessions/e2e_session/trial_001");
    assert!(trial.join("user_1B_mic.wav").is_file());
    assert!(trial.join("user_1B_asr.txt").is_file());
    assert!(trial.join("user_2B_llm.txt").is_file());
    assert!(trial.join("user_2B_tts.wav").is_file());
    assert!(trial.join("timeline.jsonl").is_file());
}

#[tokio::test]
async fn stt_outage_fails_with_no_partials() {
    let root = tempfile::tempdir().unwrap();
    let mut stages = start_stages(root.path()).await;
    stages.stt_url = format!("http://{}", dead_addr().await);
    let app = orchestrator_app(root.path(), stages);

    let response = app
        .oneshot(process_request(
            &[("session_id", "e2e"), ("trial_id", "1")],
            b"RIFFfakewav",
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);

    let json = json_body(response).await;
    assert_eq!(json["status"], "error");
    assert_eq!(json["stage"], "stt");
    assert!(json.get("stt_text").is_none());
    assert!(json.get("llm_response").is_none());
    assert_eq!(
        event_names(&json),
        vec!["pipeline_start", "stt_start", "pipeline_error"]
    );
}

#[tokio::test]
async fn llm_outage_keeps_the_transcript_partial() {
    let root = tempfile::tempdir().unwrap();
    let mut stages = start_stages(root.path()).await;
    stages.llm_url = format!("http://{}", dead_addr().await);
    let app = orchestrator_app(root.path(), stages);

    let response = app
        .oneshot(process_request(
            &[("session_id", "e2e"), ("trial_id", "2")],
            b"RIFFfakewav",
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);

    let json = json_body(response).await;
    assert_eq!(json["status"], "error");
    assert_eq!(json["stage"], "llm");
    assert_eq!(json["stt_text"], "hello there");
    assert!(json.get("llm_response").is_none());

    let events = event_names(&json);
    assert!(events.contains(&"stt_end".to_string()));
    assert!(events.contains(&"llm_start".to_string()));
    assert_eq!(events.last().unwrap(), "pipeline_error");
}

#[tokio::test]
async fn tts_engine_failure_still_completes_with_placeholder() {
    let root = tempfile::tempdir().unwrap();

    struct BrokenSynthesizer;

    #[async_trait]
    impl VoiceSynthesizer for BrokenSynthesizer {
        async fn synthesize(
            &self,
            _reference: &Path,
            _text: &str,
            _dest: &Path,
            _params: &DecodeParams,
        ) -> Result<()> {
            Err(voxline::Error::Tts("engine not initialized".into()))
        }
    }

    let config = Arc::new(shared_config(root.path()));
    let stt_addr = spawn(stt::app(Arc::new(stt::SttState {
        config: config.clone(),
        recognizer: Arc::new(FixedRecognizer("hello there")),
    })))
    .await;
    let llm_addr = spawn(llm::app(Arc::new(llm::LlmState {
        config: config.clone(),
        generator: Arc::new(FixedGenerator("Nice to meet you.")),
    })))
    .await;
    let tts_addr = spawn(tts::app(Arc::new(tts::TtsState {
        config,
        synthesizer: Arc::new(BrokenSynthesizer),
    })))
    .await;

    let stages = OrchestratorConfig {
        stt_url: format!("http://{stt_addr}"),
        llm_url: format!("http://{llm_addr}"),
        tts_url: format!("http://{tts_addr}"),
        ..OrchestratorConfig::default()
    };
    let app = orchestrator_app(root.path(), stages);

    let response = app
        .oneshot(process_request(
            &[("session_id", "e2e"), ("trial_id", "3")],
            b"RIFFfakewav",
        ))
        .await
        .unwrap();

    // The synthesis stage degrades to a silent placeholder instead of
    // failing, so the pipeline still reports success.
    assert_eq!(response.status(), StatusCode::OK);
    let json = json_body(response).await;
    assert_eq!(json["status"], "success");

    let wav = root
        .path()
        .join("sessions/e2e_session/trial_003/user_2B_tts.wav");
    let reader = hound::WavReader::open(&wav).unwrap();
    assert_eq!(reader.spec().sample_rate, 24_000);
}
