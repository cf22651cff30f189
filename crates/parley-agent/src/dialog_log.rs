//! JSON-lines snapshots of the conversation

use parley_ai::Role;
use serde::Serialize;
use std::path::{Path, PathBuf};
use tokio::sync::Mutex;

use crate::{
    Result,
    conversation::{Turn, TurnContent},
};

/// Default directory for dialog logs, relative to the working directory
pub const DEFAULT_LOG_DIRECTORY: &str = ".user_data/log";

#[derive(Serialize)]
struct LogLine<'a> {
    role: Role,
    content: &'a TurnContent,
}

/// Rewrites one file with the full history after every mutation.
///
/// Snapshots carry the history version they were taken at; a snapshot older
/// than the last one written is dropped, so concurrent savers never roll the
/// file back.
#[derive(Debug)]
pub struct DialogLog {
    path: PathBuf,
    last_written: Mutex<Option<u64>>,
}

impl DialogLog {
    /// `{dir}/{YYYYmmdd_HHMM}_{title}.jsonl`, stamped with the local time
    pub fn new(dir: impl AsRef<Path>, title: &str) -> Self {
        let stamp = chrono::Local::now().format("%Y%m%d_%H%M");
        Self::at(dir.as_ref().join(format!("{}_{}.jsonl", stamp, title)))
    }

    /// Log titled `autosave`
    pub fn autosave(dir: impl AsRef<Path>) -> Self {
        Self::new(dir, "autosave")
    }

    /// Log at an explicit path
    pub fn at(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            last_written: Mutex::new(None),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Write the snapshot; failures are logged and swallowed.
    pub async fn save(&self, version: u64, system_prompt: &str, turns: &[Turn]) {
        let mut last = self.last_written.lock().await;
        if last.is_some_and(|v| v > version) {
            return;
        }
        match self.write(system_prompt, turns).await {
            Ok(()) => *last = Some(version),
            Err(e) => tracing::debug!("failed to save dialog log {}: {}", self.path.display(), e),
        }
    }

    async fn write(&self, system_prompt: &str, turns: &[Turn]) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        let system = TurnContent::from(system_prompt);
        let mut out = serde_json::to_string(&LogLine {
            role: Role::System,
            content: &system,
        })?;
        out.push('\n');
        for turn in turns {
            out.push_str(&serde_json::to_string(&LogLine {
                role: turn.role,
                content: &turn.content,
            })?);
            out.push('\n');
        }

        tokio::fs::write(&self.path, out).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::conversation::History;
    use parley_ai::DecodedField;

    fn sample_history() -> History {
        let mut history = History::new();
        history.put(Role::User, "hello");
        history.put(Role::Assistant, DecodedField::new("ai", "hi"));
        history
    }

    #[test]
    fn test_file_name_has_stamp_and_title() {
        let log = DialogLog::autosave("logs");
        let name = log.path().file_name().unwrap().to_str().unwrap().to_string();
        assert!(name.ends_with("_autosave.jsonl"));
        // YYYYmmdd_HHMM
        assert_eq!(name.find("_autosave"), Some(13));
        assert!(log.path().starts_with("logs"));
    }

    #[tokio::test]
    async fn test_save_writes_system_line_then_turns() {
        let dir = tempfile::tempdir().unwrap();
        let log = DialogLog::at(dir.path().join("nested/dialog.jsonl"));
        let history = sample_history();

        log.save(history.version(), "persona", history.turns()).await;

        let written = std::fs::read_to_string(log.path()).unwrap();
        let lines: Vec<serde_json::Value> = written
            .lines()
            .map(|l| serde_json::from_str(l).unwrap())
            .collect();
        assert_eq!(lines.len(), 3);
        assert_eq!(lines[0]["role"], "system");
        assert_eq!(lines[0]["content"], "persona");
        assert_eq!(lines[1]["content"], "hello");
        assert_eq!(lines[2]["content"]["ai"], "hi");
    }

    #[tokio::test]
    async fn test_stale_snapshot_is_dropped() {
        let dir = tempfile::tempdir().unwrap();
        let log = DialogLog::at(dir.path().join("dialog.jsonl"));
        let history = sample_history();

        log.save(history.version(), "persona", history.turns()).await;
        log.save(0, "persona", &[]).await;

        let written = std::fs::read_to_string(log.path()).unwrap();
        assert_eq!(written.lines().count(), 3);
    }
}
