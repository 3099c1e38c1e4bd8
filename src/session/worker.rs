use std::io;
use std::process::Stdio;

use async_trait::async_trait;
use tokio::io::AsyncRead;
use tokio::process::{Child, Command};

use crate::errors::SessionError;
use crate::session::invocation::WorkerInvocation;

/// Boxed output stream of a worker (stdout or stderr).
pub type OutputStream = Box<dyn AsyncRead + Send + Unpin>;

/// Outcome of a finished worker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WorkerExit {
    /// Exit code, or `None` when the worker was terminated by a signal.
    pub code: Option<i32>,
}

impl WorkerExit {
    pub fn success(&self) -> bool {
        self.code == Some(0)
    }
}

/// A started worker. Each output stream can be taken exactly once.
#[async_trait]
pub trait WorkerProcess: Send {
    fn take_stdout(&mut self) -> Option<OutputStream>;

    fn take_stderr(&mut self) -> Option<OutputStream>;

    /// Wait for the worker to exit. Cancel-safe.
    async fn wait(&mut self) -> io::Result<WorkerExit>;

    /// Terminate the worker and reap it.
    async fn kill(&mut self) -> io::Result<()>;

    fn id(&self) -> Option<u32> {
        None
    }
}

/// Starts workers for invocations.
/// Real implementation: `LocalLauncher`. Test double: `ScriptedLauncher`.
#[async_trait]
pub trait WorkerLauncher: Send + Sync {
    async fn launch(&self, invocation: &WorkerInvocation) -> Result<Box<dyn WorkerProcess>, SessionError>;
}

/// Launches workers as local subprocesses.
#[derive(Debug, Clone, Default)]
pub struct LocalLauncher;

impl LocalLauncher {
    pub fn new() -> Self {
        Self
    }

    fn command(invocation: &WorkerInvocation) -> Command {
        let mut cmd = Command::new(&invocation.program);
        cmd.args(&invocation.args)
            .envs(invocation.env.iter())
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        if let Some(dir) = &invocation.current_dir {
            cmd.current_dir(dir);
        }

        // Own process group so kill() reaches the runner's children too
        #[cfg(unix)]
        cmd.process_group(0);

        cmd
    }
}

#[async_trait]
impl WorkerLauncher for LocalLauncher {
    async fn launch(&self, invocation: &WorkerInvocation) -> Result<Box<dyn WorkerProcess>, SessionError> {
        let child = Self::command(invocation)
            .spawn()
            .map_err(|source| SessionError::SpawnFailed {
                program: invocation.program.clone(),
                source,
            })?;

        tracing::debug!(pid = ?child.id(), program = %invocation.program, "Worker started");
        Ok(Box::new(LocalProcess { child }))
    }
}

/// Handle for a running local worker process
pub struct LocalProcess {
    child: Child,
}

#[async_trait]
impl WorkerProcess for LocalProcess {
    fn take_stdout(&mut self) -> Option<OutputStream> {
        self.child
            .stdout
            .take()
            .map(|stdout| Box::new(stdout) as OutputStream)
    }

    fn take_stderr(&mut self) -> Option<OutputStream> {
        self.child
            .stderr
            .take()
            .map(|stderr| Box::new(stderr) as OutputStream)
    }

    async fn wait(&mut self) -> io::Result<WorkerExit> {
        let status = self.child.wait().await?;
        Ok(WorkerExit {
            code: status.code(),
        })
    }

    async fn kill(&mut self) -> io::Result<()> {
        #[cfg(unix)]
        if let Some(pid) = self.child.id() {
            // SAFETY: killpg only sends a signal; the group id is the child's pid
            // because the child was started with process_group(0).
            let rc = unsafe { libc::killpg(pid as libc::pid_t, libc::SIGKILL) };
            if rc != 0 {
                tracing::debug!(pid, error = %io::Error::last_os_error(), "killpg failed, falling back to kill");
            }
        }
        // Already reaped: nothing left to kill
        if self.child.try_wait()?.is_some() {
            return Ok(());
        }
        self.child.kill().await
    }

    fn id(&self) -> Option<u32> {
        self.child.id()
    }
}
