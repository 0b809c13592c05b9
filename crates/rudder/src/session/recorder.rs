//! Per-session directories with manifests.
//!
//! Each session gets its own directory under the configured sessions root,
//! holding a lightweight `manifest.json` that tracks status, turn counts,
//! and token totals. Manifests are written atomically (temp file + rename)
//! so a crash never leaves a half-written manifest behind.

use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

// ── SessionManifest ────────────────────────────────────────────────

/// Lightweight metadata for a session, stored as `manifest.json`.
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct SessionManifest {
    /// Session ID (also the directory name).
    pub session_id: String,
    /// Model used for this session.
    pub model: String,
    /// Current session status.
    pub status: SessionStatus,
    /// Unix epoch seconds when the session was created.
    pub created_at: i64,
    /// Unix epoch seconds of the last update.
    pub updated_at: i64,
    /// Turns completed so far.
    pub turn_count: u32,
    /// Cumulative prompt tokens.
    pub total_prompt_tokens: u32,
    /// Cumulative completion tokens.
    pub total_completion_tokens: u32,
    /// First ~200 chars of the first user message.
    pub message_preview: String,
}

/// Status of a session.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    Running,
    Completed,
    Interrupted,
}

// ── SessionRecorder ────────────────────────────────────────────────

/// Writer for per-session manifest directories.
///
/// Directory layout:
/// ```text
/// sessions_dir/
///   s-1717171717-1/
///     manifest.json
/// ```
pub struct SessionRecorder {
    sessions_dir: PathBuf,
    manifest: SessionManifest,
}

impl SessionRecorder {
    /// Start recording a new session, ensuring the root directory exists.
    pub fn new(
        sessions_dir: impl Into<PathBuf>,
        model: impl Into<String>,
    ) -> Result<Self, String> {
        let sessions_dir = sessions_dir.into();
        std::fs::create_dir_all(&sessions_dir)
            .map_err(|e| format!("failed to create sessions dir: {e}"))?;

        let now = Utc::now().timestamp();
        let session_id = generate_session_id(now);
        let manifest = SessionManifest {
            session_id,
            model: model.into(),
            status: SessionStatus::Running,
            created_at: now,
            updated_at: now,
            turn_count: 0,
            total_prompt_tokens: 0,
            total_completion_tokens: 0,
            message_preview: String::new(),
        };

        let recorder = Self {
            sessions_dir,
            manifest,
        };
        recorder.save()?;
        Ok(recorder)
    }

    pub fn session_id(&self) -> &str {
        &self.manifest.session_id
    }

    pub fn manifest(&self) -> &SessionManifest {
        &self.manifest
    }

    fn session_dir(&self) -> PathBuf {
        self.sessions_dir.join(&self.manifest.session_id)
    }

    /// Record a completed turn and persist the manifest.
    pub fn record_turn(
        &mut self,
        first_user_text: &str,
        prompt_tokens: u32,
        completion_tokens: u32,
    ) -> Result<(), String> {
        self.manifest.turn_count += 1;
        self.manifest.total_prompt_tokens += prompt_tokens;
        self.manifest.total_completion_tokens += completion_tokens;
        if self.manifest.message_preview.is_empty() {
            self.manifest.message_preview = first_user_text.chars().take(200).collect();
        }
        self.manifest.updated_at = Utc::now().timestamp();
        self.save()
    }

    /// Mark the session with a final status and persist.
    pub fn finish(&mut self, status: SessionStatus) -> Result<(), String> {
        self.manifest.status = status;
        self.manifest.updated_at = Utc::now().timestamp();
        self.save()
    }

    /// Atomic write: serialize to a temp file, then rename into place.
    fn save(&self) -> Result<(), String> {
        let dir = self.session_dir();
        std::fs::create_dir_all(&dir).map_err(|e| format!("failed to create session dir: {e}"))?;

        let final_path = dir.join("manifest.json");
        let tmp_path = dir.join(".manifest.json.tmp");

        let json = serde_json::to_string_pretty(&self.manifest)
            .map_err(|e| format!("failed to serialize manifest: {e}"))?;
        std::fs::write(&tmp_path, json).map_err(|e| format!("failed to write manifest: {e}"))?;
        std::fs::rename(&tmp_path, &final_path)
            .map_err(|e| format!("failed to rename manifest: {e}"))?;
        Ok(())
    }

    /// Load a session's manifest. Returns `None` if it doesn't exist.
    pub fn load_manifest(
        sessions_dir: &Path,
        session_id: &str,
    ) -> Result<Option<SessionManifest>, String> {
        let path = sessions_dir.join(session_id).join("manifest.json");
        if !path.exists() {
            return Ok(None);
        }
        let json =
            std::fs::read_to_string(&path).map_err(|e| format!("failed to read manifest: {e}"))?;
        let manifest = serde_json::from_str(&json)
            .map_err(|e| format!("failed to parse manifest: {e}"))?;
        Ok(Some(manifest))
    }
}

/// Monotonic-enough session ID from the creation timestamp and a process
/// counter (two sessions can start within the same second).
fn generate_session_id(now: i64) -> String {
    use std::sync::atomic::{AtomicU32, Ordering};
    static COUNTER: AtomicU32 = AtomicU32::new(0);
    let n = COUNTER.fetch_add(1, Ordering::SeqCst);
    format!("s-{now}-{n}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_recorder_writes_running_manifest() {
        let dir = tempfile::tempdir().unwrap();
        let recorder = SessionRecorder::new(dir.path(), "test-model").unwrap();

        let loaded = SessionRecorder::load_manifest(dir.path(), recorder.session_id())
            .unwrap()
            .unwrap();
        assert_eq!(loaded.status, SessionStatus::Running);
        assert_eq!(loaded.model, "test-model");
        assert_eq!(loaded.turn_count, 0);
    }

    #[test]
    fn record_turn_accumulates_tokens_and_preview() {
        let dir = tempfile::tempdir().unwrap();
        let mut recorder = SessionRecorder::new(dir.path(), "test-model").unwrap();

        recorder.record_turn("first question", 100, 40).unwrap();
        recorder.record_turn("second question", 50, 20).unwrap();

        let loaded = SessionRecorder::load_manifest(dir.path(), recorder.session_id())
            .unwrap()
            .unwrap();
        assert_eq!(loaded.turn_count, 2);
        assert_eq!(loaded.total_prompt_tokens, 150);
        assert_eq!(loaded.total_completion_tokens, 60);
        // Preview captured from the first turn only.
        assert_eq!(loaded.message_preview, "first question");
    }

    #[test]
    fn finish_sets_terminal_status() {
        let dir = tempfile::tempdir().unwrap();
        let mut recorder = SessionRecorder::new(dir.path(), "test-model").unwrap();
        recorder.finish(SessionStatus::Completed).unwrap();

        let loaded = SessionRecorder::load_manifest(dir.path(), recorder.session_id())
            .unwrap()
            .unwrap();
        assert_eq!(loaded.status, SessionStatus::Completed);
    }

    #[test]
    fn load_missing_manifest_returns_none() {
        let dir = tempfile::tempdir().unwrap();
        assert!(
            SessionRecorder::load_manifest(dir.path(), "s-0-999")
                .unwrap()
                .is_none()
        );
    }

    #[test]
    fn session_ids_are_unique() {
        let dir = tempfile::tempdir().unwrap();
        let a = SessionRecorder::new(dir.path(), "m").unwrap();
        let b = SessionRecorder::new(dir.path(), "m").unwrap();
        assert_ne!(a.session_id(), b.session_id());
    }
}
