//! Configuration for the voxline services
//!
//! Configuration is read from an optional TOML file (`voxline.toml` by
//! default) with environment-variable overrides for the settings that vary
//! between deployments. Every field has a default matching the reference
//! deployment (services on ports 7000-7003, data under `data/`).

use std::path::{Path, PathBuf};

use serde::Deserialize;

use crate::engines::DecodeParams;
use crate::Result;

/// Default config file consulted when no `--config` flag is given
pub const DEFAULT_CONFIG_FILE: &str = "voxline.toml";

/// Top-level configuration shared by all services
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Root directory for all session/trial artifacts
    pub data_root: PathBuf,

    /// Directory holding prompt templates; falls back to `material/prompts`
    pub prompt_root: Option<PathBuf>,

    /// Bundled reference voice used when a session has no sample
    pub default_voice: PathBuf,

    /// Orchestrator service settings
    pub orchestrator: OrchestratorConfig,

    /// Transcription service settings
    pub stt: SttConfig,

    /// Response-generation service settings
    pub llm: LlmConfig,

    /// Speech-synthesis service settings
    pub tts: TtsConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            data_root: PathBuf::from("data"),
            prompt_root: None,
            default_voice: PathBuf::from("material/voices/sample_voice.wav"),
            orchestrator: OrchestratorConfig::default(),
            stt: SttConfig::default(),
            llm: LlmConfig::default(),
            tts: TtsConfig::default(),
        }
    }
}

/// Orchestrator settings: stage service URLs and per-stage timeouts
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct OrchestratorConfig {
    /// Port to listen on
    pub port: u16,

    /// Transcription service base URL
    pub stt_url: String,

    /// Response-generation service base URL
    pub llm_url: String,

    /// Speech-synthesis service base URL
    pub tts_url: String,

    /// Timeout for the transcription stage call, in seconds
    pub stt_timeout_secs: u64,

    /// Timeout for the response-generation stage call, in seconds
    pub llm_timeout_secs: u64,

    /// Timeout for the synthesis stage call, in seconds
    pub tts_timeout_secs: u64,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            port: 7000,
            stt_url: "http://127.0.0.1:7001".to_string(),
            llm_url: "http://127.0.0.1:7002".to_string(),
            tts_url: "http://127.0.0.1:7003".to_string(),
            stt_timeout_secs: 60,
            llm_timeout_secs: 60,
            tts_timeout_secs: 90,
        }
    }
}

/// Transcription service settings
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SttConfig {
    /// Port to listen on
    pub port: u16,

    /// Recognition engine endpoint (whisper-style transcription API)
    pub engine_url: String,

    /// Recognition model identifier
    pub model: String,
}

impl Default for SttConfig {
    fn default() -> Self {
        Self {
            port: 7001,
            engine_url: "http://127.0.0.1:8090/v1/audio/transcriptions".to_string(),
            model: "base.en".to_string(),
        }
    }
}

/// Response-generation service settings (Ollama-backed)
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LlmConfig {
    /// Port to listen on
    pub port: u16,

    /// Ollama host, scheme optional (`OLLAMA_HOST` override)
    pub host: String,

    /// Model name (`OLLAMA_MODEL` override)
    pub model: String,

    /// How long the model stays resident between calls
    pub keep_alive: String,

    /// Timeout for generation calls, in seconds
    pub generate_timeout_secs: u64,

    /// Timeout for the startup warmup call, in seconds
    pub warmup_timeout_secs: u64,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            port: 7002,
            host: "http://127.0.0.1:11434".to_string(),
            model: "llama3.1:8b-instruct-q8_0".to_string(),
            keep_alive: "24h".to_string(),
            generate_timeout_secs: 120,
            warmup_timeout_secs: 10,
        }
    }
}

/// Speech-synthesis service settings
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct TtsConfig {
    /// Port to listen on
    pub port: u16,

    /// Synthesis engine endpoint
    pub engine_url: String,

    /// Sample rate for the silent fallback WAV, in Hz
    pub fallback_sample_rate: u32,

    /// Duration of the silent fallback WAV, in milliseconds
    pub fallback_duration_ms: u32,

    /// Engine decoding parameters (tuning constants, not part of the
    /// orchestration contract)
    pub decode: DecodeParams,
}

impl Default for TtsConfig {
    fn default() -> Self {
        Self {
            port: 7003,
            engine_url: "http://127.0.0.1:8091/synthesize".to_string(),
            fallback_sample_rate: 24_000,
            fallback_duration_ms: 500,
            decode: DecodeParams::default(),
        }
    }
}

impl Config {
    /// Load configuration from an optional TOML file plus env overrides.
    ///
    /// With no explicit path, `voxline.toml` is read if present; otherwise
    /// defaults apply.
    ///
    /// # Errors
    ///
    /// Returns an error if an explicitly given file is unreadable or any
    /// consulted file fails to parse.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut config = match path {
            Some(p) => toml::from_str(&std::fs::read_to_string(p)?)?,
            None => {
                let default_path = Path::new(DEFAULT_CONFIG_FILE);
                if default_path.exists() {
                    toml::from_str(&std::fs::read_to_string(default_path)?)?
                } else {
                    Self::default()
                }
            }
        };
        config.apply_env();
        Ok(config)
    }

    /// Apply environment-variable overrides
    fn apply_env(&mut self) {
        if let Ok(root) = std::env::var("VOXLINE_DATA_ROOT") {
            self.data_root = PathBuf::from(root);
        }
        if let Ok(host) = std::env::var("OLLAMA_HOST") {
            self.llm.host = normalize_host(&host);
        }
        if let Ok(model) = std::env::var("OLLAMA_MODEL") {
            self.llm.model = model;
        }
    }
}

/// Ensure a host string carries an HTTP scheme
fn normalize_host(raw: &str) -> String {
    if raw.starts_with("http://") || raw.starts_with("https://") {
        raw.to_string()
    } else {
        format!("http://{raw}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_reference_deployment() {
        let config = Config::default();
        assert_eq!(config.data_root, PathBuf::from("data"));
        assert_eq!(config.orchestrator.port, 7000);
        assert_eq!(config.stt.port, 7001);
        assert_eq!(config.llm.port, 7002);
        assert_eq!(config.tts.port, 7003);
        assert_eq!(config.orchestrator.stt_timeout_secs, 60);
        assert_eq!(config.orchestrator.tts_timeout_secs, 90);
    }

    #[test]
    fn partial_toml_keeps_defaults() {
        let config: Config = toml::from_str(
            r#"
            data_root = "/srv/voxline/data"

            [orchestrator]
            stt_url = "http://stt.internal:7001"
            "#,
        )
        .unwrap();

        assert_eq!(config.data_root, PathBuf::from("/srv/voxline/data"));
        assert_eq!(config.orchestrator.stt_url, "http://stt.internal:7001");
        assert_eq!(config.orchestrator.llm_url, "http://127.0.0.1:7002");
        assert_eq!(config.tts.fallback_sample_rate, 24_000);
    }

    #[test]
    fn host_scheme_is_normalized() {
        assert_eq!(normalize_host("127.0.0.1:11434"), "http://127.0.0.1:11434");
        assert_eq!(normalize_host("http://a:1"), "http://a:1");
        assert_eq!(normalize_host("https://a:1"), "https://a:1");
    }
}
