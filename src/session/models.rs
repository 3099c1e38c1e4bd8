use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::errors::ConfigError;

/// AI backend that drives a generation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Backend {
    /// Primary agent
    #[default]
    Claude,
    /// Secondary agent
    Chatgpt,
    /// Third-party agent
    Lovable,
}

impl Backend {
    pub const ALL: [Backend; 3] = [Backend::Claude, Backend::Chatgpt, Backend::Lovable];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Claude => "claude",
            Self::Chatgpt => "chatgpt",
            Self::Lovable => "lovable",
        }
    }
}

impl fmt::Display for Backend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Backend {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "claude" => Ok(Self::Claude),
            "chatgpt" => Ok(Self::Chatgpt),
            "lovable" => Ok(Self::Lovable),
            _ => Err(format!(
                "Invalid backend '{}'. Valid values: claude, chatgpt, lovable",
                s
            )),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    #[default]
    Pending,
    Running,
    Completed,
    Failed,
    Cancelled,
}

impl SessionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Cancelled)
    }
}

impl fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One generation conversation, owned by the orchestrator run serving it.
#[derive(Debug, Clone, Serialize)]
pub struct GenerationSession {
    pub id: Uuid,
    pub prompt: String,
    pub backend: Backend,
    pub follow_up: bool,
    pub sandbox_id: Option<String>,
    pub preview_url: Option<String>,
    pub status: SessionStatus,
    pub created_at: DateTime<Utc>,
}

impl GenerationSession {
    pub fn new(prompt: impl Into<String>, backend: Backend) -> Self {
        Self {
            id: Uuid::new_v4(),
            prompt: prompt.into(),
            backend,
            follow_up: false,
            sandbox_id: None,
            preview_url: None,
            status: SessionStatus::Pending,
            created_at: Utc::now(),
        }
    }

    /// Continue work in a known sandbox.
    pub fn with_sandbox(mut self, sandbox_id: impl Into<String>) -> Self {
        self.sandbox_id = Some(sandbox_id.into());
        self
    }

    pub fn as_follow_up(mut self) -> Self {
        self.follow_up = true;
        self
    }

    /// Record the sandbox id. The first value wins; returns whether it was stored.
    pub fn record_sandbox_id(&mut self, sandbox_id: &str) -> bool {
        set_once(&mut self.sandbox_id, sandbox_id)
    }

    /// Record the preview URL. The first value wins; returns whether it was stored.
    pub fn record_preview_url(&mut self, url: &str) -> bool {
        set_once(&mut self.preview_url, url)
    }
}

fn set_once(slot: &mut Option<String>, value: &str) -> bool {
    if slot.is_some() {
        return false;
    }
    *slot = Some(value.to_string());
    true
}

/// Body of `POST /api/generate`.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerateRequest {
    #[serde(default)]
    pub prompt: String,
    #[serde(default)]
    pub sandbox_id: Option<String>,
    #[serde(default)]
    pub is_follow_up: bool,
    #[serde(default)]
    pub model: Backend,
}

impl GenerateRequest {
    /// Validate the request and create the session it describes.
    pub fn into_session(self) -> Result<GenerationSession, ConfigError> {
        if self.prompt.trim().is_empty() {
            return Err(ConfigError::MissingPrompt);
        }

        let sandbox_id = self
            .sandbox_id
            .map(|id| id.trim().to_string())
            .filter(|id| !id.is_empty());

        if self.is_follow_up && sandbox_id.is_none() {
            return Err(ConfigError::FollowUpWithoutSandbox);
        }

        let mut session = GenerationSession::new(self.prompt, self.model);
        if let Some(id) = sandbox_id {
            session = session.with_sandbox(id);
        }
        if self.is_follow_up {
            session = session.as_follow_up();
        }
        Ok(session)
    }
}
