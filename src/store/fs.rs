//! Filesystem layout:
//!
//! ```text
//! <root>/<session>/turn-<id>-<type>/audio.webm
//! <root>/<session>/turn-<id>-<type>/transcript.txt
//! <root>/<session>/turn-<id>-<type>/metadata.json
//! <root>/<session>/session.json
//! <root>/<session>/events.jsonl
//! ```
//!
//! Every file is written to a temporary sibling and renamed into place, so
//! a failed write leaves the previous version (if any) intact.

use crate::capture::TurnMetadata;
use crate::store::{SessionSummary, TurnKey, TurnStore};
use anyhow::Context;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

pub const AUDIO_FILE: &str = "audio.webm";
pub const TRANSCRIPT_FILE: &str = "transcript.txt";
pub const METADATA_FILE: &str = "metadata.json";
pub const SESSION_FILE: &str = "session.json";
pub const EVENTS_FILE: &str = "events.jsonl";

#[derive(Debug, Clone)]
pub struct FsTurnStore {
    root: PathBuf,
}

impl FsTurnStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn session_dir(&self, session_id: &str) -> PathBuf {
        self.root.join(sanitize(session_id))
    }

    pub fn turn_dir(&self, key: &TurnKey) -> PathBuf {
        self.session_dir(&key.session_id).join(key.label())
    }
}

impl TurnStore for FsTurnStore {
    fn save_audio(&self, key: &TurnKey, bytes: &[u8]) -> anyhow::Result<()> {
        write_atomic(&self.turn_dir(key).join(AUDIO_FILE), bytes)
    }

    fn save_transcript(&self, key: &TurnKey, text: &str) -> anyhow::Result<()> {
        write_atomic(&self.turn_dir(key).join(TRANSCRIPT_FILE), text.as_bytes())
    }

    fn save_metadata(&self, key: &TurnKey, metadata: &TurnMetadata) -> anyhow::Result<()> {
        let json = serde_json::to_vec_pretty(metadata)?;
        write_atomic(&self.turn_dir(key).join(METADATA_FILE), &json)
    }

    fn save_session(
        &self,
        summary: &SessionSummary,
        events: &[serde_json::Value],
    ) -> anyhow::Result<()> {
        let dir = self.session_dir(&summary.id);
        write_atomic(&dir.join(SESSION_FILE), &serde_json::to_vec_pretty(summary)?)?;

        let mut lines = Vec::new();
        for event in events {
            serde_json::to_writer(&mut lines, event)?;
            lines.push(b'\n');
        }
        write_atomic(&dir.join(EVENTS_FILE), &lines)
    }
}

/// Map an external session id onto a single safe path component.
///
/// ASCII letters, digits and `-` pass through; every other byte, `_`
/// included, becomes `_XX` in uppercase hex, so distinct ids never share a
/// directory. The empty id maps to a lone `_`, which no escape produces.
fn sanitize(session_id: &str) -> String {
    if session_id.is_empty() {
        return "_".to_string();
    }
    let mut escaped = String::with_capacity(session_id.len());
    for byte in session_id.bytes() {
        if byte.is_ascii_alphanumeric() || byte == b'-' {
            escaped.push(char::from(byte));
        } else {
            escaped.push_str(&format!("_{:02X}", byte));
        }
    }
    escaped
}

fn write_atomic(path: &Path, bytes: &[u8]) -> anyhow::Result<()> {
    let dir = path
        .parent()
        .with_context(|| format!("{} has no parent directory", path.display()))?;
    fs::create_dir_all(dir).with_context(|| format!("creating {}", dir.display()))?;

    let tmp = path.with_extension("tmp");
    {
        let mut file =
            fs::File::create(&tmp).with_context(|| format!("creating {}", tmp.display()))?;
        file.write_all(bytes)
            .with_context(|| format!("writing {}", tmp.display()))?;
        file.sync_all()
            .with_context(|| format!("syncing {}", tmp.display()))?;
    }
    fs::rename(&tmp, path).with_context(|| format!("renaming into {}", path.display()))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capture::Direction;
    use chrono::Utc;

    #[test]
    fn test_turn_artifacts_land_in_turn_dir() {
        let tmp = tempfile::tempdir().unwrap();
        let store = FsTurnStore::new(tmp.path());
        let key = TurnKey::new("sess-1", 2, Direction::Input);

        store.save_audio(&key, &[1, 2, 3]).unwrap();
        store.save_transcript(&key, "hello world").unwrap();
        let meta = TurnMetadata {
            id: 2,
            direction: Direction::Input,
            started_at: Utc::now(),
            fragment_count: 3,
            transcript_length: 11,
            audio_bytes: Some(3),
        };
        store.save_metadata(&key, &meta).unwrap();

        let dir = tmp.path().join("sess-1").join("turn-2-input");
        assert_eq!(fs::read(dir.join(AUDIO_FILE)).unwrap(), vec![1, 2, 3]);
        assert_eq!(fs::read_to_string(dir.join(TRANSCRIPT_FILE)).unwrap(), "hello world");
        let read_back: TurnMetadata =
            serde_json::from_slice(&fs::read(dir.join(METADATA_FILE)).unwrap()).unwrap();
        assert_eq!(read_back, meta);
        assert!(!dir.join("audio.tmp").exists());
    }

    #[test]
    fn test_overwrite_replaces_artifact() {
        let tmp = tempfile::tempdir().unwrap();
        let store = FsTurnStore::new(tmp.path());
        let key = TurnKey::new("s", 1, Direction::Output);
        store.save_transcript(&key, "first").unwrap();
        store.save_transcript(&key, "second").unwrap();
        let text = fs::read_to_string(store.turn_dir(&key).join(TRANSCRIPT_FILE)).unwrap();
        assert_eq!(text, "second");
    }

    #[test]
    fn test_session_summary_and_event_log() {
        let tmp = tempfile::tempdir().unwrap();
        let store = FsTurnStore::new(tmp.path());
        let summary = SessionSummary {
            id: "s".to_string(),
            started_at: Utc::now(),
            ended_at: Utc::now(),
            duration: Some(12.5),
            event_count: Some(2),
            transcript: Some("hi".to_string()),
            turn_count: 1,
            raw_event_count: 2,
        };
        let events = vec![
            serde_json::json!({"type": "a"}),
            serde_json::json!({"type": "b"}),
        ];
        store.save_session(&summary, &events).unwrap();

        let log = fs::read_to_string(tmp.path().join("s").join(EVENTS_FILE)).unwrap();
        assert_eq!(log.lines().count(), 2);
        assert!(log.starts_with(r#"{"type":"a"}"#));
        assert!(tmp.path().join("s").join(SESSION_FILE).exists());
    }

    #[test]
    fn test_session_ids_cannot_escape_root() {
        let store = FsTurnStore::new("/data");
        assert_eq!(
            store.session_dir("../../etc"),
            PathBuf::from("/data/_2E_2E_2F_2E_2E_2Fetc")
        );
        assert_eq!(store.session_dir(""), PathBuf::from("/data/_"));
        assert_eq!(store.session_dir("sess-1"), PathBuf::from("/data/sess-1"));
    }

    #[test]
    fn test_similar_session_ids_do_not_share_a_directory() {
        let tmp = tempfile::tempdir().unwrap();
        let store = FsTurnStore::new(tmp.path());
        let dotted = TurnKey::new("call.1", 1, Direction::Input);
        let underscored = TurnKey::new("call_1", 1, Direction::Input);
        assert_ne!(store.turn_dir(&dotted), store.turn_dir(&underscored));
        assert_ne!(store.session_dir("_"), store.session_dir(""));

        store.save_transcript(&dotted, "first session").unwrap();
        store.save_transcript(&underscored, "second session").unwrap();

        let read = |key: &TurnKey| fs::read_to_string(store.turn_dir(key).join(TRANSCRIPT_FILE)).unwrap();
        assert_eq!(read(&dotted), "first session");
        assert_eq!(read(&underscored), "second session");
    }
}
