//! Scripted worker doubles shared by the session and server tests.

use std::io::{self, Cursor};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tokio::io::{AsyncWriteExt, DuplexStream};

use crate::config::Config;
use crate::errors::SessionError;
use crate::session::invocation::{Credentials, InvocationBuilder, WorkerInvocation};
use crate::session::worker::{OutputStream, WorkerExit, WorkerLauncher, WorkerProcess};

/// Invocation builder with every default credential present.
pub fn test_builder() -> InvocationBuilder {
    let config = Config::default();
    let mut credentials = Credentials::new();
    for name in config.credential_names() {
        credentials.insert(name, "test-key");
    }
    InvocationBuilder::new(config.worker, config.backends, credentials)
}

/// What a scripted worker writes and how it exits.
#[derive(Debug, Clone)]
pub struct WorkerScript {
    stdout: Vec<u8>,
    stderr: Vec<u8>,
    code: Option<i32>,
    hang: bool,
}

impl WorkerScript {
    pub fn new() -> Self {
        Self {
            stdout: Vec::new(),
            stderr: Vec::new(),
            code: Some(0),
            hang: false,
        }
    }

    pub fn stdout_line(mut self, line: &str) -> Self {
        self.stdout.extend_from_slice(line.as_bytes());
        self.stdout.push(b'\n');
        self
    }

    pub fn stderr_line(mut self, line: &str) -> Self {
        self.stderr.extend_from_slice(line.as_bytes());
        self.stderr.push(b'\n');
        self
    }

    pub fn exit_code(mut self, code: Option<i32>) -> Self {
        self.code = code;
        self
    }

    /// Keep stdout open and never exit until killed.
    pub fn hang(mut self) -> Self {
        self.hang = true;
        self
    }
}

/// Launcher that replays a `WorkerScript` for every launch.
pub struct ScriptedLauncher {
    script: WorkerScript,
    spawn_fails: bool,
    killed: Arc<AtomicBool>,
    invocations: Arc<Mutex<Vec<WorkerInvocation>>>,
}

impl ScriptedLauncher {
    pub fn new(script: WorkerScript) -> Self {
        Self {
            script,
            spawn_fails: false,
            killed: Arc::new(AtomicBool::new(false)),
            invocations: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Launcher whose every launch fails like a missing executable.
    pub fn failing() -> Self {
        Self {
            spawn_fails: true,
            ..Self::new(WorkerScript::new())
        }
    }

    /// Set once any launched worker has been killed.
    pub fn killed(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.killed)
    }

    pub fn invocations(&self) -> Arc<Mutex<Vec<WorkerInvocation>>> {
        Arc::clone(&self.invocations)
    }
}

#[async_trait]
impl WorkerLauncher for ScriptedLauncher {
    async fn launch(&self, invocation: &WorkerInvocation) -> Result<Box<dyn WorkerProcess>, SessionError> {
        self.invocations
            .lock()
            .map_err(|_| io::Error::other("invocation log poisoned"))?
            .push(invocation.clone());

        if self.spawn_fails {
            return Err(SessionError::SpawnFailed {
                program: invocation.program.clone(),
                source: io::Error::new(io::ErrorKind::NotFound, "No such file or directory"),
            });
        }

        let (stdout, writer): (OutputStream, Option<DuplexStream>) = if self.script.hang {
            let (mut writer, reader) = tokio::io::duplex(64 * 1024);
            writer.write_all(&self.script.stdout).await?;
            (Box::new(reader), Some(writer))
        } else {
            (Box::new(Cursor::new(self.script.stdout.clone())), None)
        };

        Ok(Box::new(ScriptedProcess {
            stdout: Some(stdout),
            stderr: Some(Box::new(Cursor::new(self.script.stderr.clone()))),
            code: self.script.code,
            hang: self.script.hang,
            killed: Arc::clone(&self.killed),
            writer,
        }))
    }
}

struct ScriptedProcess {
    stdout: Option<OutputStream>,
    stderr: Option<OutputStream>,
    code: Option<i32>,
    hang: bool,
    killed: Arc<AtomicBool>,
    writer: Option<DuplexStream>,
}

#[async_trait]
impl WorkerProcess for ScriptedProcess {
    fn take_stdout(&mut self) -> Option<OutputStream> {
        self.stdout.take()
    }

    fn take_stderr(&mut self) -> Option<OutputStream> {
        self.stderr.take()
    }

    async fn wait(&mut self) -> io::Result<WorkerExit> {
        if self.hang && !self.killed.load(Ordering::SeqCst) {
            std::future::pending::<()>().await;
        }
        Ok(WorkerExit { code: self.code })
    }

    async fn kill(&mut self) -> io::Result<()> {
        self.killed.store(true, Ordering::SeqCst);
        self.writer = None;
        Ok(())
    }
}
