use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::path::PathBuf;

use crate::config::{BackendsConfig, Config, WorkerConfig};
use crate::errors::ConfigError;
use crate::session::models::{Backend, GenerationSession};
use crate::stream::extract::is_valid_sandbox_id;

/// Concrete command a session runs. Computed once per request.
#[derive(Clone, PartialEq, Eq)]
pub struct WorkerInvocation {
    pub program: String,
    pub args: Vec<String>,
    /// Credential variables passed on top of the inherited environment
    pub env: BTreeMap<String, String>,
    pub current_dir: Option<PathBuf>,
}

impl fmt::Debug for WorkerInvocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WorkerInvocation")
            .field("program", &self.program)
            .field("args", &self.args)
            .field("env", &self.env.keys().collect::<Vec<_>>())
            .field("current_dir", &self.current_dir)
            .finish()
    }
}

/// Snapshot of the credential variables available to workers.
#[derive(Debug, Clone, Default)]
pub struct Credentials {
    values: HashMap<String, String>,
}

impl Credentials {
    pub fn new() -> Self {
        Self::default()
    }

    /// Read the named variables from the process environment.
    pub fn from_env<I, S>(names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut credentials = Self::new();
        for name in names {
            let name = name.as_ref();
            if let Ok(value) = std::env::var(name) {
                credentials.insert(name, value);
            }
        }
        credentials
    }

    pub fn insert(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.values.insert(name.into(), value.into());
    }

    /// Value of a credential; blank values count as missing.
    pub fn get(&self, name: &str) -> Option<&str> {
        self.values
            .get(name)
            .map(|v| v.as_str())
            .filter(|v| !v.trim().is_empty())
    }

    pub fn contains(&self, name: &str) -> bool {
        self.get(name).is_some()
    }
}

/// Which credentials are configured, for status reporting.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CredentialReport {
    pub sandbox_platform: bool,
    pub backends: BTreeMap<String, bool>,
}

/// Derives `WorkerInvocation`s from sessions.
#[derive(Debug, Clone)]
pub struct InvocationBuilder {
    worker: WorkerConfig,
    backends: BackendsConfig,
    credentials: Credentials,
}

impl InvocationBuilder {
    pub fn new(worker: WorkerConfig, backends: BackendsConfig, credentials: Credentials) -> Self {
        Self {
            worker,
            backends,
            credentials,
        }
    }

    /// Builder over `config`, with credentials read from the environment.
    pub fn from_config(config: &Config) -> Self {
        let credentials = Credentials::from_env(config.credential_names());
        Self::new(config.worker.clone(), config.backends.clone(), credentials)
    }

    /// Invocation for a generation or follow-up request.
    ///
    /// Arguments follow `[runner_args..., script, sandbox_id?, prompt]`. The
    /// sandbox id is passed for follow-ups and whenever the session already
    /// knows its sandbox. Fails without side effects when a credential is
    /// missing.
    pub fn build(&self, session: &GenerationSession) -> Result<WorkerInvocation, ConfigError> {
        if session.prompt.trim().is_empty() {
            return Err(ConfigError::MissingPrompt);
        }
        if session.follow_up && session.sandbox_id.is_none() {
            return Err(ConfigError::FollowUpWithoutSandbox);
        }
        if let Some(id) = &session.sandbox_id
            && !is_valid_sandbox_id(id)
        {
            return Err(ConfigError::InvalidSandboxId(id.clone()));
        }

        let backend = self.backends.get(session.backend);
        let mut env = self.sandbox_env(session.backend)?;
        if let Some(variable) = &backend.credential {
            let value = self.require(session.backend.as_str(), variable)?;
            env.insert(variable.clone(), value);
        }

        let script = backend.script_for(session.follow_up);
        let mut args = self.script_args(script);
        if let Some(id) = &session.sandbox_id {
            args.push(id.clone());
        }
        args.push(session.prompt.clone());

        Ok(WorkerInvocation {
            program: self.worker.runner.clone(),
            args,
            env,
            current_dir: self.worker.working_dir.clone(),
        })
    }

    /// Invocation of the sandbox removal script.
    pub fn removal(&self, sandbox_id: &str) -> Result<WorkerInvocation, ConfigError> {
        if !is_valid_sandbox_id(sandbox_id) {
            return Err(ConfigError::InvalidSandboxId(sandbox_id.to_string()));
        }
        let env = self.sandbox_env_for("sandbox platform")?;
        let mut args = self.script_args(&self.worker.removal_script);
        args.push(sandbox_id.to_string());

        Ok(WorkerInvocation {
            program: self.worker.runner.clone(),
            args,
            env,
            current_dir: self.worker.working_dir.clone(),
        })
    }

    pub fn credential_report(&self) -> CredentialReport {
        let sandbox_platform = self
            .worker
            .sandbox_credential
            .as_deref()
            .is_none_or(|name| self.credentials.contains(name));

        let backends = Backend::ALL
            .iter()
            .map(|backend| {
                let configured = self
                    .backends
                    .get(*backend)
                    .credential
                    .as_deref()
                    .is_none_or(|name| self.credentials.contains(name));
                (backend.as_str().to_string(), configured)
            })
            .collect();

        CredentialReport {
            sandbox_platform,
            backends,
        }
    }

    fn script_args(&self, script: &str) -> Vec<String> {
        let mut args = self.worker.runner_args.clone();
        args.push(self.worker.scripts_dir.join(script).to_string_lossy().into_owned());
        args
    }

    fn sandbox_env(&self, backend: Backend) -> Result<BTreeMap<String, String>, ConfigError> {
        self.sandbox_env_for(backend.as_str())
    }

    fn sandbox_env_for(&self, context: &str) -> Result<BTreeMap<String, String>, ConfigError> {
        let mut env = BTreeMap::new();
        if let Some(variable) = &self.worker.sandbox_credential {
            let value = self.require(context, variable)?;
            env.insert(variable.clone(), value);
        }
        Ok(env)
    }

    fn require(&self, context: &str, variable: &str) -> Result<String, ConfigError> {
        self.credentials
            .get(variable)
            .map(str::to_string)
            .ok_or_else(|| ConfigError::MissingCredential {
                backend: context.to_string(),
                variable: variable.to_string(),
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn full_credentials() -> Credentials {
        let mut credentials = Credentials::new();
        credentials.insert("DAYTONA_API_KEY", "dtn");
        credentials.insert("ANTHROPIC_API_KEY", "ant");
        credentials.insert("OPENAI_API_KEY", "oai");
        credentials
    }

    fn builder(credentials: Credentials) -> InvocationBuilder {
        let config = Config::default();
        InvocationBuilder::new(config.worker, config.backends, credentials)
    }

    #[test]
    fn test_build_new_generation() {
        let session = GenerationSession::new("build a todo app", Backend::Claude);
        let invocation = builder(full_credentials()).build(&session).unwrap();

        assert_eq!(invocation.program, "npx");
        assert_eq!(
            invocation.args,
            vec![
                "tsx".to_string(),
                "scripts/generate-in-daytona.ts".to_string(),
                "build a todo app".to_string(),
            ]
        );
        assert_eq!(invocation.env.get("DAYTONA_API_KEY").map(String::as_str), Some("dtn"));
        assert_eq!(invocation.env.get("ANTHROPIC_API_KEY").map(String::as_str), Some("ant"));
        assert!(!invocation.env.contains_key("OPENAI_API_KEY"));
    }

    #[test]
    fn test_build_forwards_prompt_unchanged() {
        let session = GenerationSession::new("  landing page\n for a bakery ", Backend::Claude);
        let invocation = builder(full_credentials()).build(&session).unwrap();
        assert_eq!(
            invocation.args.last().map(String::as_str),
            Some("  landing page\n for a bakery ")
        );
    }

    #[test]
    fn test_build_rejects_blank_prompt() {
        let session = GenerationSession::new(" \n\t", Backend::Claude);
        assert_eq!(
            builder(full_credentials()).build(&session).unwrap_err(),
            ConfigError::MissingPrompt
        );
    }

    #[test]
    fn test_build_follow_up_passes_sandbox_before_prompt() {
        let session = GenerationSession::new("make the header blue", Backend::Claude)
            .with_sandbox("11111111-1111-1111-1111-111111111111")
            .as_follow_up();
        let invocation = builder(full_credentials()).build(&session).unwrap();
        assert_eq!(
            &invocation.args[1..],
            &[
                "scripts/generate-in-daytona.ts".to_string(),
                "11111111-1111-1111-1111-111111111111".to_string(),
                "make the header blue".to_string(),
            ]
        );
    }

    #[test]
    fn test_build_follow_up_uses_follow_up_script() {
        let mut config = Config::default();
        config.backends.claude.follow_up_script = Some("continue-in-daytona.ts".into());
        let builder = InvocationBuilder::new(config.worker, config.backends, full_credentials());

        let session = GenerationSession::new("tweak", Backend::Claude)
            .with_sandbox("abc")
            .as_follow_up();
        let invocation = builder.build(&session).unwrap();
        assert_eq!(invocation.args[1], "scripts/continue-in-daytona.ts");
    }

    #[test]
    fn test_build_known_sandbox_without_follow_up() {
        let session = GenerationSession::new("start over", Backend::Chatgpt).with_sandbox("abc");
        let invocation = builder(full_credentials()).build(&session).unwrap();
        assert_eq!(
            &invocation.args[1..],
            &[
                "scripts/generate-with-chatgpt.ts".to_string(),
                "abc".to_string(),
                "start over".to_string(),
            ]
        );
        assert!(invocation.env.contains_key("OPENAI_API_KEY"));
    }

    #[test]
    fn test_build_follow_up_without_sandbox_fails() {
        let session = GenerationSession::new("tweak", Backend::Claude).as_follow_up();
        assert_eq!(
            builder(full_credentials()).build(&session).unwrap_err(),
            ConfigError::FollowUpWithoutSandbox
        );
    }

    #[test]
    fn test_build_missing_backend_credential() {
        let session = GenerationSession::new("build a blog", Backend::Lovable);
        let err = builder(full_credentials()).build(&session).unwrap_err();
        assert_eq!(
            err,
            ConfigError::MissingCredential {
                backend: "lovable".into(),
                variable: "LOVABLE_API_KEY".into(),
            }
        );
    }

    #[test]
    fn test_build_missing_sandbox_credential() {
        let mut credentials = Credentials::new();
        credentials.insert("ANTHROPIC_API_KEY", "ant");
        let session = GenerationSession::new("build a blog", Backend::Claude);
        let err = builder(credentials).build(&session).unwrap_err();
        assert!(matches!(
            err,
            ConfigError::MissingCredential { ref variable, .. } if variable == "DAYTONA_API_KEY"
        ));
    }

    #[test]
    fn test_blank_credential_counts_as_missing() {
        let mut credentials = full_credentials();
        credentials.insert("ANTHROPIC_API_KEY", "  ");
        let session = GenerationSession::new("build a blog", Backend::Claude);
        assert!(builder(credentials).build(&session).is_err());
    }

    #[test]
    fn test_build_rejects_option_like_sandbox_id() {
        let session = GenerationSession::new("tweak", Backend::Claude)
            .with_sandbox("--inspect")
            .as_follow_up();
        assert!(matches!(
            builder(full_credentials()).build(&session),
            Err(ConfigError::InvalidSandboxId(_))
        ));
    }

    #[test]
    fn test_removal_invocation() {
        let invocation = builder(full_credentials()).removal("abc-123").unwrap();
        assert_eq!(
            invocation.args,
            vec![
                "tsx".to_string(),
                "scripts/remove-sandbox.ts".to_string(),
                "abc-123".to_string(),
            ]
        );
        assert_eq!(invocation.env.len(), 1);
    }

    #[test]
    fn test_credential_report() {
        let report = builder(full_credentials()).credential_report();
        assert!(report.sandbox_platform);
        assert_eq!(report.backends.get("claude"), Some(&true));
        assert_eq!(report.backends.get("lovable"), Some(&false));
    }

    #[test]
    fn test_debug_redacts_credential_values() {
        let session = GenerationSession::new("build a todo app", Backend::Claude);
        let invocation = builder(full_credentials()).build(&session).unwrap();
        let debug = format!("{:?}", invocation);
        assert!(debug.contains("ANTHROPIC_API_KEY"));
        assert!(!debug.contains("\"ant\""));
    }
}
