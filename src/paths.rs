//! Trial directory layout and artifact path normalization
//!
//! Every stage of the pipeline reads and writes artifacts under a shared
//! data root:
//!
//! ```text
//! <data_root>/sessions/<session_id>_session/meta/*
//! <data_root>/sessions/<session_id>_session/trial_<NNN>/{audio, text, timeline.jsonl}
//! ```
//!
//! Stages hand paths to each other as strings relative to the data root.
//! [`ArtifactPath`] is the single place those strings are normalized, so
//! prefix stripping does not get re-implemented at every call site.

use std::path::{Component, Path, PathBuf};

use crate::{Error, Result};

/// Microphone audio uploaded by the client, persisted by the STT stage
pub const INPUT_AUDIO_FILE: &str = "user_1B_mic.wav";

/// Transcript written by the STT stage
pub const TRANSCRIPT_FILE: &str = "user_1B_asr.txt";

/// Per-trial scene context consumed by the LLM stage
pub const SCENE_FILE: &str = "scene.txt";

/// Generated reply written by the LLM stage
pub const REPLY_FILE: &str = "user_2B_llm.txt";

/// Default synthesized-audio name when no reply path is supplied
pub const DEFAULT_SPEECH_FILE: &str = "npc_2A_tts.wav";

/// Synthesized-audio name the full pipeline produces (derived from
/// [`REPLY_FILE`] by the synthesis stage)
pub const PIPELINE_SPEECH_FILE: &str = "user_2B_tts.wav";

/// Per-session reference voice sample under `meta/`
pub const REFERENCE_VOICE_FILE: &str = "sample_voice.wav";

/// Timeline log name within a trial directory
pub const TIMELINE_FILE: &str = "timeline.jsonl";

/// Validate a session identifier before it is joined into a filesystem path.
///
/// Identifiers are opaque, but they must not be able to walk out of the
/// sessions tree.
///
/// # Errors
///
/// Returns [`Error::InvalidId`] for empty identifiers or identifiers
/// containing path separators or `..`.
pub fn validate_session_id(session_id: &str) -> Result<()> {
    if session_id.is_empty() {
        return Err(Error::InvalidId("empty session_id".to_string()));
    }
    if session_id.contains('/') || session_id.contains('\\') || session_id.contains("..") {
        return Err(Error::InvalidId(format!(
            "session_id contains path components: {session_id}"
        )));
    }
    Ok(())
}

/// Resolved directory layout for one trial
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TrialPaths {
    /// Session base directory: `<data_root>/sessions/<session_id>_session`
    pub base_dir: PathBuf,
    /// Trial directory: `<base_dir>/trial_<NNN>`
    pub trial_dir: PathBuf,
    /// Session-shared meta directory: `<base_dir>/meta`
    pub meta_dir: PathBuf,
    /// Timeline log: `<trial_dir>/timeline.jsonl`
    pub timeline_path: PathBuf,
}

impl TrialPaths {
    /// Derive the layout for `(session_id, trial_id)` and create the trial
    /// and meta directories if absent.
    ///
    /// Idempotent: safe to call repeatedly and concurrently for the same
    /// trial.
    ///
    /// # Errors
    ///
    /// Returns an error for an invalid session id or if directory creation
    /// fails.
    pub fn resolve(data_root: &Path, session_id: &str, trial_id: u32) -> Result<Self> {
        validate_session_id(session_id)?;

        let base_dir = data_root
            .join("sessions")
            .join(format!("{session_id}_session"));
        let trial_dir = base_dir.join(format!("trial_{trial_id:03}"));
        let meta_dir = base_dir.join("meta");

        std::fs::create_dir_all(&trial_dir)?;
        std::fs::create_dir_all(&meta_dir)?;

        let timeline_path = trial_dir.join(TIMELINE_FILE);
        Ok(Self {
            base_dir,
            trial_dir,
            meta_dir,
            timeline_path,
        })
    }
}

/// A pipeline artifact location, stored relative to the data root.
///
/// Constructed from request strings that may or may not already carry the
/// data-root prefix; serialized back out as the relative form.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArtifactPath {
    rel: PathBuf,
}

impl ArtifactPath {
    /// Normalize a raw path string from a request or stage response.
    ///
    /// Accepts paths with or without the data-root prefix. The normalized
    /// path must stay inside the data root.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidId`] if the path is absolute (outside the
    /// data root) or contains `..` components.
    pub fn from_request(data_root: &Path, raw: &str) -> Result<Self> {
        let path = Path::new(raw);
        let rel = path.strip_prefix(data_root).unwrap_or(path);

        if rel.is_absolute() {
            return Err(Error::InvalidId(format!(
                "path escapes data root: {raw}"
            )));
        }
        for component in rel.components() {
            match component {
                Component::Normal(_) | Component::CurDir => {}
                _ => {
                    return Err(Error::InvalidId(format!(
                        "path escapes data root: {raw}"
                    )));
                }
            }
        }

        Ok(Self {
            rel: rel.to_path_buf(),
        })
    }

    /// Build from an absolute path produced by this process.
    ///
    /// Falls back to the path as given when it is not under the data root
    /// (callers always pass paths they derived from the root).
    #[must_use]
    pub fn from_local(data_root: &Path, path: &Path) -> Self {
        let rel = path.strip_prefix(data_root).unwrap_or(path);
        Self {
            rel: rel.to_path_buf(),
        }
    }

    /// The path relative to the data root
    #[must_use]
    pub fn relative(&self) -> &Path {
        &self.rel
    }

    /// The path joined onto a data root
    #[must_use]
    pub fn absolute(&self, data_root: &Path) -> PathBuf {
        data_root.join(&self.rel)
    }
}

impl std::fmt::Display for ArtifactPath {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.rel.display())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resolve_creates_layout() {
        let root = tempfile::tempdir().unwrap();
        let paths = TrialPaths::resolve(root.path(), "abc", 7).unwrap();

        assert!(paths.trial_dir.ends_with("sessions/abc_session/trial_007"));
        assert!(paths.meta_dir.ends_with("sessions/abc_session/meta"));
        assert!(paths.trial_dir.is_dir());
        assert!(paths.meta_dir.is_dir());
        assert_eq!(paths.timeline_path, paths.trial_dir.join("timeline.jsonl"));
    }

    #[test]
    fn resolve_is_idempotent() {
        let root = tempfile::tempdir().unwrap();
        let first = TrialPaths::resolve(root.path(), "abc", 1).unwrap();
        let second = TrialPaths::resolve(root.path(), "abc", 1).unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn session_id_traversal_rejected() {
        let root = tempfile::tempdir().unwrap();
        assert!(TrialPaths::resolve(root.path(), "../evil", 1).is_err());
        assert!(TrialPaths::resolve(root.path(), "a/b", 1).is_err());
        assert!(TrialPaths::resolve(root.path(), "", 1).is_err());
    }

    #[test]
    fn artifact_path_tolerates_prefix() {
        let root = Path::new("data");
        let bare = ArtifactPath::from_request(root, "sessions/s_session/trial_001/x.txt").unwrap();
        let prefixed =
            ArtifactPath::from_request(root, "data/sessions/s_session/trial_001/x.txt").unwrap();
        assert_eq!(bare, prefixed);
        assert_eq!(bare.absolute(root), root.join("sessions/s_session/trial_001/x.txt"));
    }

    #[test]
    fn artifact_path_rejects_escape() {
        let root = Path::new("data");
        assert!(ArtifactPath::from_request(root, "../outside.txt").is_err());
        assert!(ArtifactPath::from_request(root, "a/../../outside.txt").is_err());
        assert!(ArtifactPath::from_request(root, "/etc/passwd").is_err());
    }

    #[test]
    fn from_local_strips_root() {
        let root = Path::new("/srv/voxline/data");
        let abs = root.join("sessions/s_session/trial_001/user_1B_asr.txt");
        let artifact = ArtifactPath::from_local(root, &abs);
        assert_eq!(
            artifact.to_string(),
            "sessions/s_session/trial_001/user_1B_asr.txt"
        );
    }
}
