use std::path::Path;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{PanelError, Result};
use crate::logs::event::{LogEvent, LogKind};

/// Substring markers used to classify worker output that is not JSON.
///
/// Marker groups are checked in a fixed order: `success`, then `error`, then
/// `warning`. The first group with a match decides the kind; a line matching
/// nothing is `info`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MarkerSet {
    pub success: Vec<String>,
    pub error: Vec<String>,
    pub warning: Vec<String>,
    /// Stderr lines containing any of these are dropped entirely.
    pub stderr_noise: Vec<String>,
}

impl Default for MarkerSet {
    fn default() -> Self {
        Self {
            success: vec!["[성공]".to_string(), "완료".to_string()],
            error: vec!["[실패]".to_string(), "오류".to_string()],
            warning: vec!["경고".to_string(), "중지".to_string()],
            stderr_noise: vec!["DevTools".to_string()],
        }
    }
}

impl MarkerSet {
    /// Load markers from a JSON file. Groups missing from the file keep
    /// their built-in defaults.
    pub fn from_json_file(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)?;
        serde_json::from_str(&raw).map_err(|e| {
            PanelError::Config(format!("invalid marker file {}: {}", path.display(), e))
        })
    }

    fn ordered(&self) -> [(LogKind, &[String]); 3] {
        [
            (LogKind::Success, self.success.as_slice()),
            (LogKind::Error, self.error.as_slice()),
            (LogKind::Warning, self.warning.as_slice()),
        ]
    }

    /// Infer a kind for free text by marker lookup.
    pub fn match_kind(&self, line: &str) -> LogKind {
        self.ordered()
            .into_iter()
            .find(|(_, markers)| markers.iter().any(|m| line.contains(m.as_str())))
            .map(|(kind, _)| kind)
            .unwrap_or(LogKind::Info)
    }

    pub fn is_stderr_noise(&self, line: &str) -> bool {
        self.stderr_noise.iter().any(|m| line.contains(m.as_str()))
    }

    /// Classify one stdout line. Blank lines produce nothing.
    pub fn classify_stdout(&self, line: &str) -> Option<LogEvent> {
        if line.trim().is_empty() {
            return None;
        }
        Some(classify(line, self))
    }

    /// Classify one stderr line. Blank and noisy lines produce nothing,
    /// everything else is an error carried verbatim.
    pub fn classify_stderr(&self, line: &str) -> Option<LogEvent> {
        if line.trim().is_empty() || self.is_stderr_noise(line) {
            return None;
        }
        Some(LogEvent::error(line))
    }
}

/// Decode a structured worker line: a JSON object with a string `message`
/// and an optional `type`. Missing or unknown types become `info`.
pub fn parse_json_event(line: &str) -> Option<LogEvent> {
    let value: Value = serde_json::from_str(line).ok()?;
    let object = value.as_object()?;
    let message = object.get("message")?.as_str()?;
    let kind = object
        .get("type")
        .and_then(Value::as_str)
        .and_then(LogKind::parse)
        .unwrap_or_default();
    Some(LogEvent::new(kind, message))
}

/// Classify a raw output line.
///
/// Structured JSON lines are reproduced as-is; anything else is tagged by
/// marker lookup and keeps the raw line as its message.
pub fn classify(line: &str, markers: &MarkerSet) -> LogEvent {
    parse_json_event(line).unwrap_or_else(|| LogEvent::new(markers.match_kind(line), line))
}
