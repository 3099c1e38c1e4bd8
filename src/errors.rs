//! Typed error hierarchy for the generation pipeline.
//!
//! Two top-level enums cover the two failure families:
//! - `ConfigError`: request/configuration problems detected before any worker is spawned
//! - `SessionError`: failures while starting or driving a worker process

use thiserror::Error;

/// Errors detected while validating a request or deriving its worker invocation.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("Prompt is required")]
    MissingPrompt,

    #[error("Sandbox ID is required for follow-up requests")]
    FollowUpWithoutSandbox,

    #[error("Missing API key for {backend}: {variable} is not set")]
    MissingCredential { backend: String, variable: String },

    #[error("Invalid sandbox ID '{0}'")]
    InvalidSandboxId(String),
}

/// Errors from starting or supervising a worker process.
#[derive(Debug, Error)]
pub enum SessionError {
    #[error("Failed to start worker '{program}': {source}")]
    SpawnFailed {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Worker exited with {}", describe_exit(*.code))]
    WorkerFailed { code: Option<i32> },

    #[error("Worker I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Config(#[from] ConfigError),
}

/// Human-readable exit description shared by errors and `Error` events.
pub fn describe_exit(code: Option<i32>) -> String {
    match code {
        Some(code) => format!("code {}", code),
        None => "a termination signal".to_string(),
    }
}
