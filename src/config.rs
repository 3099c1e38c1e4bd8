//! Runtime configuration for sitegen.
//!
//! Reads `.sitegen/sitegen.toml` (or an explicit `--config` path) and layers
//! environment overrides on top (file → environment → CLI).
//!
//! # Configuration File Format
//!
//! ```toml
//! [server]
//! host = "127.0.0.1"
//! port = 3000
//!
//! [worker]
//! runner = "npx"
//! runner_args = ["tsx"]
//! scripts_dir = "scripts"
//! removal_script = "remove-sandbox.ts"
//! sandbox_credential = "DAYTONA_API_KEY"
//! channel_capacity = 64
//! timeout_secs = 900
//!
//! [output]
//! debug_markers = ["__", "[Claude]:", "[Tool]:"]
//! error_keywords = ["Error", "Failed"]
//!
//! [backends.claude]
//! script = "generate-in-daytona.ts"
//! follow_up_script = "continue-in-daytona.ts"
//! credential = "ANTHROPIC_API_KEY"
//! ```

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::session::models::Backend;

pub const CONFIG_DIR: &str = ".sitegen";
pub const CONFIG_FILE: &str = "sitegen.toml";

/// HTTP listener settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerSection {
    pub host: String,
    pub port: u16,
}

impl Default for ServerSection {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 3000,
        }
    }
}

/// How worker processes are launched.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkerConfig {
    /// Program that runs the worker scripts (default: "npx")
    pub runner: String,
    /// Arguments placed before the script path (default: ["tsx"])
    pub runner_args: Vec<String>,
    /// Directory holding the worker scripts
    pub scripts_dir: PathBuf,
    /// Script that deletes a sandbox, invoked with the sandbox id
    pub removal_script: String,
    /// Credential for the sandbox platform, required by every invocation
    pub sandbox_credential: Option<String>,
    /// Working directory for worker processes (defaults to the server's)
    pub working_dir: Option<PathBuf>,
    /// Buffered events per session before the orchestrator waits on the client
    pub channel_capacity: usize,
    /// Cancel a session after this many seconds. No limit when unset.
    pub timeout_secs: Option<u64>,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            runner: "npx".to_string(),
            runner_args: vec!["tsx".to_string()],
            scripts_dir: PathBuf::from("scripts"),
            removal_script: "remove-sandbox.ts".to_string(),
            sandbox_credential: Some("DAYTONA_API_KEY".to_string()),
            working_dir: None,
            channel_capacity: 64,
            timeout_secs: None,
        }
    }
}

/// Filters applied to worker output.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OutputConfig {
    /// Stdout lines containing any of these are internal and never forwarded
    pub debug_markers: Vec<String>,
    /// Stderr lines containing any of these are forwarded as errors
    pub error_keywords: Vec<String>,
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            debug_markers: vec!["__".into(), "[Claude]:".into(), "[Tool]:".into()],
            error_keywords: vec!["Error".into(), "Failed".into()],
        }
    }
}

/// Worker script and credential for one backend.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BackendConfig {
    pub script: String,
    /// Script used for follow-ups; falls back to `script` when unset
    #[serde(default)]
    pub follow_up_script: Option<String>,
    /// Environment variable holding the backend's API key
    #[serde(default)]
    pub credential: Option<String>,
}

impl BackendConfig {
    fn new(script: &str, credential: &str) -> Self {
        Self {
            script: script.to_string(),
            follow_up_script: None,
            credential: Some(credential.to_string()),
        }
    }

    pub fn script_for(&self, follow_up: bool) -> &str {
        if follow_up {
            self.follow_up_script.as_deref().unwrap_or(&self.script)
        } else {
            &self.script
        }
    }
}

/// Per-backend settings section (`[backends.<name>]`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BackendsConfig {
    pub claude: BackendConfig,
    pub chatgpt: BackendConfig,
    pub lovable: BackendConfig,
}

impl Default for BackendsConfig {
    fn default() -> Self {
        Self {
            claude: BackendConfig::new("generate-in-daytona.ts", "ANTHROPIC_API_KEY"),
            chatgpt: BackendConfig::new("generate-with-chatgpt.ts", "OPENAI_API_KEY"),
            lovable: BackendConfig::new("generate-with-lovable.ts", "LOVABLE_API_KEY"),
        }
    }
}

impl BackendsConfig {
    pub fn get(&self, backend: Backend) -> &BackendConfig {
        match backend {
            Backend::Claude => &self.claude,
            Backend::Chatgpt => &self.chatgpt,
            Backend::Lovable => &self.lovable,
        }
    }
}

/// Complete sitegen configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub server: ServerSection,
    pub worker: WorkerConfig,
    pub output: OutputConfig,
    pub backends: BackendsConfig,
}

impl Config {
    /// Load configuration from a TOML file.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        Self::parse(&content).with_context(|| format!("Failed to parse {}", path.display()))
    }

    /// Parse configuration from a TOML string.
    pub fn parse(content: &str) -> Result<Self> {
        Ok(toml::from_str(content)?)
    }

    /// Load from `explicit` if given, else from `<project_dir>/.sitegen/sitegen.toml`
    /// when it exists, else defaults. Environment overrides are applied last.
    pub fn resolve(explicit: Option<&Path>, project_dir: &Path) -> Result<Self> {
        let mut config = match explicit {
            Some(path) => Self::load(path)?,
            None => {
                let default_path = Self::default_path(project_dir);
                if default_path.exists() {
                    Self::load(&default_path)?
                } else {
                    Self::default()
                }
            }
        };
        config.apply_env_overrides(|key| std::env::var(key).ok())?;
        Ok(config)
    }

    pub fn default_path(project_dir: &Path) -> PathBuf {
        project_dir.join(CONFIG_DIR).join(CONFIG_FILE)
    }

    /// Apply `SITEGEN_*` overrides using the given variable lookup.
    pub fn apply_env_overrides<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(host) = lookup("SITEGEN_HOST") {
            self.server.host = host;
        }
        if let Some(port) = lookup("SITEGEN_PORT") {
            self.server.port = port
                .parse()
                .with_context(|| format!("Invalid SITEGEN_PORT '{}'", port))?;
        }
        if let Some(runner) = lookup("SITEGEN_WORKER_RUNNER") {
            self.worker.runner = runner;
        }
        if let Some(dir) = lookup("SITEGEN_SCRIPTS_DIR") {
            self.worker.scripts_dir = PathBuf::from(dir);
        }
        if let Some(secs) = lookup("SITEGEN_TIMEOUT_SECS") {
            let secs: u64 = secs
                .parse()
                .with_context(|| format!("Invalid SITEGEN_TIMEOUT_SECS '{}'", secs))?;
            self.worker.timeout_secs = (secs > 0).then_some(secs);
        }
        Ok(())
    }

    /// Every credential variable any invocation may require.
    pub fn credential_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.worker.sandbox_credential.iter().cloned().collect();
        for backend in Backend::ALL {
            if let Some(name) = &self.backends.get(backend).credential
                && !names.contains(name)
            {
                names.push(name.clone());
            }
        }
        names
    }

    pub fn to_toml(&self) -> Result<String> {
        toml::to_string_pretty(self).context("Failed to serialize configuration")
    }

    /// Write this configuration to a TOML file, creating parent directories.
    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create {}", parent.display()))?;
        }
        std::fs::write(path, self.to_toml()?)
            .with_context(|| format!("Failed to write config file: {}", path.display()))?;
        Ok(())
    }
}
