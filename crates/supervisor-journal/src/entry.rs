use chrono::{DateTime, Local};
use serde::Serialize;

use crate::time;

/// One terminal-state record.
///
/// Serialized as a single JSON object per line. Timestamps are kept in
/// the human-readable local form so the file can be read without tooling.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct JournalEntry {
    pub command: String,
    pub argv: Vec<String>,
    pub state: String,
    pub exit_code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
    pub start_time: String,
    pub end_time: String,
    /// Termination failure (signal delivery or reaping), if any.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl JournalEntry {
    /// Format start/end for the entry; `end` falls back to `start` when absent.
    pub fn timestamps(start: &DateTime<Local>, end: Option<&DateTime<Local>>) -> (String, String) {
        let start_str = time::human(start);
        let end_str = end.map(time::human).unwrap_or_else(|| start_str.clone());
        (start_str, end_str)
    }

    /// Render as one newline-terminated JSON line.
    pub fn to_line(&self) -> serde_json::Result<String> {
        let mut line = serde_json::to_string(self)?;
        line.push('\n');
        Ok(line)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry() -> JournalEntry {
        JournalEntry {
            command: "echo hi".into(),
            argv: vec!["/bin/sh".into(), "-c".into()],
            state: "completed".into(),
            exit_code: Some(0),
            stdout: "hi\n".into(),
            stderr: String::new(),
            start_time: "2024-01-01 00:00:00".into(),
            end_time: "2024-01-01 00:00:01".into(),
            error: None,
        }
    }

    #[test]
    fn to_line_is_single_json_line() {
        let line = entry().to_line().unwrap();
        assert!(line.ends_with('\n'));
        assert_eq!(line.matches('\n').count(), 1, "embedded newlines must be escaped");

        let value: serde_json::Value = serde_json::from_str(line.trim_end()).unwrap();
        assert_eq!(value["command"], "echo hi");
        assert_eq!(value["exit_code"], 0);
        assert_eq!(value["stdout"], "hi\n");
        assert!(value.get("error").is_none());
    }

    #[test]
    fn missing_exit_code_serializes_as_null() {
        let mut e = entry();
        e.state = "timeout".into();
        e.exit_code = None;
        e.error = Some("wait failed".into());

        let value: serde_json::Value = serde_json::from_str(e.to_line().unwrap().trim_end()).unwrap();
        assert!(value["exit_code"].is_null());
        assert_eq!(value["error"], "wait failed");
    }

    #[test]
    fn timestamps_default_end_to_start() {
        let now = Local::now();
        let (start, end) = JournalEntry::timestamps(&now, None);
        assert_eq!(start, end);
    }
}
