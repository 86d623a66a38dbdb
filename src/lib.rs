//! Voxline - speech pipeline gateway
//!
//! This library implements a three-stage speech-to-speech pipeline
//! (speech-to-text, language-model response, text-to-speech) as four
//! independent HTTP services sharing an on-disk artifact layout:
//!
//! ```text
//! ┌──────────────────────────────────────────────────┐
//! │                    Client                         │
//! └───────────────────────┬──────────────────────────┘
//!                         │ multipart audio
//! ┌───────────────────────▼──────────────────────────┐
//! │                 Orchestrator                      │
//! │   timeline  │  trial paths  │  stage client      │
//! └───────┬──────────────┬───────────────┬───────────┘
//!         │              │               │
//!     ┌───▼───┐      ┌───▼───┐       ┌───▼───┐
//!     │  STT  │ ───▶ │  LLM  │ ───▶  │  TTS  │
//!     └───────┘ path └───────┘ path  └───────┘
//! ```
//!
//! Stages hand artifacts to each other as paths relative to a shared data
//! root; each trial owns a directory with its audio, transcript, reply,
//! synthesized speech, and append-only timeline log.

pub mod condition;
pub mod config;
pub mod engines;
pub mod error;
pub mod paths;
pub mod services;
pub mod timeline;

pub use condition::Condition;
pub use config::Config;
pub use error::{Error, Result};
pub use paths::{ArtifactPath, TrialPaths};
pub use timeline::{Payload, Timeline, TimelineEvent};
