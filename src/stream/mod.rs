//! Worker output decoding and the client-facing event model.
//!
//! - `parser`: line reassembly and sentinel-tag decoding into `Frame`s
//! - `extract`: filtering and session-fact extraction over plain-text lines

pub mod extract;
pub mod parser;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Normalized, client-facing unit of a generation session's live feed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StreamEvent {
    AgentMessage {
        text: String,
    },

    ToolInvocation {
        name: String,
        #[serde(default)]
        input: Value,
    },

    /// Tool results are consumed from the worker but not forwarded; the
    /// variant exists so clients decoding the feed share one vocabulary.
    ToolResult {
        name: String,
        #[serde(default)]
        result: Value,
    },

    Progress {
        text: String,
    },

    Error {
        text: String,
    },

    Complete {
        #[serde(rename = "sandboxId")]
        sandbox_id: Option<String>,
        #[serde(rename = "previewUrl")]
        preview_url: String,
    },
}

impl StreamEvent {
    pub fn progress(text: impl Into<String>) -> Self {
        Self::Progress { text: text.into() }
    }

    pub fn error(text: impl Into<String>) -> Self {
        Self::Error { text: text.into() }
    }

    /// Name of the `type` discriminator on the wire.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::AgentMessage { .. } => "agent_message",
            Self::ToolInvocation { .. } => "tool_invocation",
            Self::ToolResult { .. } => "tool_result",
            Self::Progress { .. } => "progress",
            Self::Error { .. } => "error",
            Self::Complete { .. } => "complete",
        }
    }

    /// `Complete` ends a session; nothing may follow it.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Complete { .. })
    }
}

/// Extract a human-readable description from a tool invocation
pub fn describe_tool_use(name: &str, input: &Value) -> String {
    match name {
        "Read" => {
            let path = input
                .get("file_path")
                .and_then(|v| v.as_str())
                .map(shorten_path)
                .unwrap_or_else(|| "file".to_string());
            format!("Reading: {}", path)
        }
        "Write" => {
            let path = input
                .get("file_path")
                .and_then(|v| v.as_str())
                .map(shorten_path)
                .unwrap_or_else(|| "file".to_string());
            format!("Creating: {}", path)
        }
        "Edit" | "MultiEdit" => {
            let path = input
                .get("file_path")
                .and_then(|v| v.as_str())
                .map(shorten_path)
                .unwrap_or_else(|| "file".to_string());
            format!("Editing: {}", path)
        }
        "Bash" => {
            let cmd = input
                .get("command")
                .and_then(|v| v.as_str())
                .map(|s| truncate_str(s, 40))
                .unwrap_or_else(|| "command".to_string());
            format!("Running: {}", cmd)
        }
        "Glob" | "LS" => {
            let pattern = input
                .get("pattern")
                .or_else(|| input.get("path"))
                .and_then(|v| v.as_str())
                .unwrap_or("*");
            format!("Searching: {}", pattern)
        }
        "Grep" => {
            let pattern = input
                .get("pattern")
                .and_then(|v| v.as_str())
                .map(|s| truncate_str(s, 30))
                .unwrap_or_else(|| "pattern".to_string());
            format!("Grep: {}", pattern)
        }
        "WebFetch" | "WebSearch" => {
            let target = input
                .get("url")
                .or_else(|| input.get("query"))
                .and_then(|v| v.as_str())
                .map(|s| truncate_str(s, 40))
                .unwrap_or_else(|| "web".to_string());
            format!("Browsing: {}", target)
        }
        _ => name.to_string(),
    }
}

/// Get an emoji for a tool
pub fn tool_emoji(name: &str) -> &'static str {
    match name {
        "Read" => "\u{1F4D6}",
        "Write" => "\u{1F4DD}",
        "Edit" | "MultiEdit" => "\u{270F}\u{FE0F}",
        "Bash" => "\u{2699}\u{FE0F}",
        "Glob" | "LS" => "\u{1F50D}",
        "Grep" => "\u{1F50E}",
        "WebFetch" | "WebSearch" => "\u{1F310}",
        _ => "\u{1F527}",
    }
}

/// Shorten a file path to just the last 2 components
fn shorten_path(path: &str) -> String {
    let parts: Vec<&str> = path.split('/').collect();
    if parts.len() <= 2 {
        path.to_string()
    } else {
        parts[parts.len() - 2..].join("/")
    }
}

/// Truncate a string with ellipsis, respecting char boundaries
fn truncate_str(s: &str, max_len: usize) -> String {
    if s.chars().count() <= max_len {
        s.to_string()
    } else {
        let head: String = s.chars().take(max_len.saturating_sub(3)).collect();
        format!("{}...", head)
    }
}
