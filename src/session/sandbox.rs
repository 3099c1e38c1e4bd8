use std::sync::Arc;

use crate::errors::SessionError;
use crate::session::invocation::InvocationBuilder;
use crate::session::worker::{OutputStream, WorkerLauncher};
use crate::stream::parser::LineReader;

/// Deletes sandboxes through the removal worker script.
#[derive(Clone)]
pub struct SandboxJanitor {
    launcher: Arc<dyn WorkerLauncher>,
    builder: InvocationBuilder,
}

impl SandboxJanitor {
    pub fn new(launcher: Arc<dyn WorkerLauncher>, builder: InvocationBuilder) -> Self {
        Self { launcher, builder }
    }

    /// Run the removal script for `sandbox_id` and wait for it to finish.
    pub async fn delete(&self, sandbox_id: &str) -> Result<(), SessionError> {
        let invocation = self.builder.removal(sandbox_id)?;
        tracing::info!(sandbox_id, "Deleting sandbox");

        let mut process = self.launcher.launch(&invocation).await?;
        let stdout = process.take_stdout();
        let stderr = process.take_stderr();
        tokio::join!(log_lines(stdout, sandbox_id), log_lines(stderr, sandbox_id));

        let exit = process.wait().await?;
        if !exit.success() {
            tracing::warn!(sandbox_id, code = ?exit.code, "Sandbox removal failed");
            return Err(SessionError::WorkerFailed { code: exit.code });
        }

        tracing::info!(sandbox_id, "Sandbox deleted");
        Ok(())
    }
}

async fn log_lines(stream: Option<OutputStream>, sandbox_id: &str) {
    let Some(stream) = stream else {
        return;
    };
    let mut lines = LineReader::new(stream);
    loop {
        match lines.next_line().await {
            Ok(Some(line)) => tracing::debug!(target: "sitegen::worker", sandbox_id, "{}", line),
            Ok(None) => break,
            Err(e) => {
                tracing::debug!(sandbox_id, error = %e, "Stopped reading removal output");
                break;
            }
        }
    }
}
