//! Rules applied to plain-text worker output.
//!
//! The worker announces the sandbox it created and the preview URL of the
//! running project as human-readable log lines. These two patterns are the
//! only place the orchestrator depends on that wording.
//!
//! - `Sandbox created: <hex-dash id>`
//! - `Preview URL: https://...`

use regex::Regex;
use std::sync::LazyLock;

use crate::config::OutputConfig;

static SANDBOX_CREATED_REGEX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"Sandbox created: ([a-f0-9-]+)").unwrap());

static PREVIEW_URL_REGEX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"Preview URL: (https://\S+)").unwrap());

static SANDBOX_ID_REGEX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[A-Za-z0-9][A-Za-z0-9-]{0,127}$").unwrap());

/// A session-level fact announced by the worker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionFact {
    SandboxId(String),
    PreviewUrl(String),
}

/// Identifier announced on a sandbox-creation line.
pub fn sandbox_announcement(line: &str) -> Option<&str> {
    SANDBOX_CREATED_REGEX
        .captures(line)
        .and_then(|cap| cap.get(1))
        .map(|m| m.as_str())
}

/// URL announced on a preview line.
pub fn preview_announcement(line: &str) -> Option<&str> {
    PREVIEW_URL_REGEX
        .captures(line)
        .and_then(|cap| cap.get(1))
        .map(|m| m.as_str())
}

/// Apply both extraction rules to one forwarded line.
pub fn extract_facts(line: &str) -> Vec<SessionFact> {
    let mut facts = Vec::new();
    if let Some(id) = sandbox_announcement(line) {
        facts.push(SessionFact::SandboxId(id.to_string()));
    }
    if let Some(url) = preview_announcement(line) {
        facts.push(SessionFact::PreviewUrl(url.to_string()));
    }
    facts
}

/// Whether a caller-supplied sandbox id is safe to pass as a worker argument.
pub fn is_valid_sandbox_id(id: &str) -> bool {
    SANDBOX_ID_REGEX.is_match(id)
}

/// Line filters for worker stdout noise and stderr significance.
#[derive(Debug, Clone)]
pub struct OutputRules {
    debug_markers: Vec<String>,
    error_keywords: Vec<String>,
}

impl OutputRules {
    pub fn new(debug_markers: Vec<String>, error_keywords: Vec<String>) -> Self {
        Self {
            debug_markers,
            error_keywords,
        }
    }

    pub fn from_config(config: &OutputConfig) -> Self {
        Self::new(config.debug_markers.clone(), config.error_keywords.clone())
    }

    /// Internal instrumentation that must not reach the client.
    pub fn is_internal(&self, line: &str) -> bool {
        self.debug_markers
            .iter()
            .any(|marker| !marker.is_empty() && line.contains(marker.as_str()))
    }

    /// Diagnostic lines worth surfacing as `Error` events.
    pub fn is_significant_error(&self, line: &str) -> bool {
        self.error_keywords
            .iter()
            .any(|keyword| !keyword.is_empty() && line.contains(keyword.as_str()))
    }
}

impl Default for OutputRules {
    fn default() -> Self {
        Self::from_config(&OutputConfig::default())
    }
}
