//! Drives one generation session from worker start to terminal status.
//!
//! Stdout frames, stderr lines and the worker's exit are awaited in a single
//! `select!` loop that is biased towards cancellation, so a cancel request is
//! observed at the next suspension point. The session ends on the worker's
//! exit, not on its pipes closing. Events leave through a bounded channel;
//! the SSE layer appends the end marker once the sender is dropped.

use std::future;
use std::io;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;

use crate::errors::{ConfigError, SessionError};
use crate::session::cancel::CancellationController;
use crate::session::invocation::{InvocationBuilder, WorkerInvocation};
use crate::session::models::{GenerationSession, SessionStatus};
use crate::session::worker::{OutputStream, WorkerLauncher, WorkerProcess};
use crate::stream::StreamEvent;
use crate::stream::extract::{OutputRules, SessionFact, extract_facts};
use crate::stream::parser::{Frame, FrameReader, LineReader};

const MISSING_PREVIEW_URL: &str = "Failed to get preview URL";

/// How long output is still forwarded after the worker exits. Descendants of
/// the worker may hold its pipes open past that point.
const OUTPUT_DRAIN_GRACE: Duration = Duration::from_secs(2);

/// Runs generation sessions against a worker launcher.
#[derive(Clone)]
pub struct SessionOrchestrator {
    launcher: Arc<dyn WorkerLauncher>,
    builder: InvocationBuilder,
    rules: OutputRules,
}

impl SessionOrchestrator {
    pub fn new(launcher: Arc<dyn WorkerLauncher>, builder: InvocationBuilder, rules: OutputRules) -> Self {
        Self {
            launcher,
            builder,
            rules,
        }
    }

    pub fn launcher(&self) -> Arc<dyn WorkerLauncher> {
        Arc::clone(&self.launcher)
    }

    pub fn builder(&self) -> &InvocationBuilder {
        &self.builder
    }

    /// Derive the worker invocation for a session. Nothing is spawned.
    pub fn prepare(&self, session: &GenerationSession) -> Result<WorkerInvocation, ConfigError> {
        self.builder.build(session)
    }

    /// `prepare` followed by `run`. A configuration failure is reported as a
    /// single `Error` event.
    pub async fn run_request(
        &self,
        session: &mut GenerationSession,
        sink: &mpsc::Sender<StreamEvent>,
        cancel: &CancellationController,
    ) -> SessionStatus {
        match self.prepare(session) {
            Ok(invocation) => self.run(session, &invocation, sink, cancel).await,
            Err(e) => {
                tracing::warn!(session_id = %session.id, error = %e, "Rejected generation request");
                emit(sink, cancel, StreamEvent::error(e.to_string())).await;
                session.status = SessionStatus::Failed;
                SessionStatus::Failed
            }
        }
    }

    /// Run the worker for `session` and forward its events to `sink`.
    ///
    /// Never fails: every problem becomes an `Error` event and a `Failed`
    /// status, and cancellation ends the run silently with `Cancelled`.
    pub async fn run(
        &self,
        session: &mut GenerationSession,
        invocation: &WorkerInvocation,
        sink: &mpsc::Sender<StreamEvent>,
        cancel: &CancellationController,
    ) -> SessionStatus {
        tracing::info!(
            session_id = %session.id,
            backend = %session.backend,
            follow_up = session.follow_up,
            sandbox_id = session.sandbox_id.as_deref().unwrap_or(""),
            "Starting generation session"
        );

        let status = self.drive(session, invocation, sink, cancel).await;
        session.status = status;

        tracing::info!(
            session_id = %session.id,
            status = %status,
            sandbox_id = session.sandbox_id.as_deref().unwrap_or(""),
            preview_url = session.preview_url.as_deref().unwrap_or(""),
            "Generation session finished"
        );
        status
    }

    async fn drive(
        &self,
        session: &mut GenerationSession,
        invocation: &WorkerInvocation,
        sink: &mpsc::Sender<StreamEvent>,
        cancel: &CancellationController,
    ) -> SessionStatus {
        if cancel.is_cancelled() {
            return SessionStatus::Cancelled;
        }
        session.status = SessionStatus::Running;

        let launched = tokio::select! {
            biased;
            _ = cancel.cancelled() => return SessionStatus::Cancelled,
            launched = self.launcher.launch(invocation) => launched,
        };
        let mut process = match launched {
            Ok(process) => process,
            Err(e) => {
                tracing::error!(session_id = %session.id, error = %e, "Failed to start worker");
                return fail(sink, cancel, e.to_string()).await;
            }
        };

        let mut output = WorkerOutput::new(process.as_mut());

        let exit = loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => return terminate(session, process.as_mut()).await,
                item = output.next(session), if output.is_open() => {
                    if let Some(item) = item
                        && !self.handle_output(session, item, sink, cancel).await
                    {
                        return terminate(session, process.as_mut()).await;
                    }
                }
                exit = process.wait() => break exit,
            }
        };

        if output.is_open() {
            let drained = tokio::select! {
                biased;
                _ = cancel.cancelled() => false,
                drained = tokio::time::timeout(
                    OUTPUT_DRAIN_GRACE,
                    self.drain(session, &mut output, sink, cancel),
                ) => drained.unwrap_or_else(|_| {
                    tracing::debug!(session_id = %session.id, "Worker exited with its output still held open");
                    true
                }),
            };
            if !drained {
                return terminate(session, process.as_mut()).await;
            }
        }

        let exit = match exit {
            Ok(exit) => exit,
            Err(e) => return fail(sink, cancel, SessionError::Io(e).to_string()).await,
        };

        if !exit.success() {
            tracing::warn!(session_id = %session.id, code = ?exit.code, "Worker failed");
            return fail(sink, cancel, SessionError::WorkerFailed { code: exit.code }.to_string()).await;
        }

        let Some(preview_url) = session.preview_url.clone() else {
            tracing::warn!(session_id = %session.id, "Worker finished without announcing a preview URL");
            return fail(sink, cancel, MISSING_PREVIEW_URL).await;
        };

        let complete = StreamEvent::Complete {
            sandbox_id: session.sandbox_id.clone(),
            preview_url,
        };
        if emit(sink, cancel, complete).await {
            SessionStatus::Completed
        } else {
            SessionStatus::Cancelled
        }
    }

    /// Returns `false` when the session must stop.
    async fn handle_output(
        &self,
        session: &mut GenerationSession,
        item: Output,
        sink: &mpsc::Sender<StreamEvent>,
        cancel: &CancellationController,
    ) -> bool {
        match item {
            Output::Frame(frame) => self.handle_frame(session, frame, sink, cancel).await,
            Output::Diagnostic(line) => self.handle_diagnostic(session, line, sink, cancel).await,
        }
    }

    /// Forward what the worker wrote before exiting, until both streams close.
    async fn drain(
        &self,
        session: &mut GenerationSession,
        output: &mut WorkerOutput,
        sink: &mpsc::Sender<StreamEvent>,
        cancel: &CancellationController,
    ) -> bool {
        while let Some(item) = output.next(session).await {
            if !self.handle_output(session, item, sink, cancel).await {
                return false;
            }
        }
        true
    }

    async fn handle_frame(
        &self,
        session: &mut GenerationSession,
        frame: Frame,
        sink: &mpsc::Sender<StreamEvent>,
        cancel: &CancellationController,
    ) -> bool {
        let event = match frame {
            Frame::Message(payload) => StreamEvent::AgentMessage {
                text: payload.content,
            },
            Frame::ToolUse(payload) => StreamEvent::ToolInvocation {
                name: payload.name,
                input: payload.input,
            },
            Frame::ToolResult(payload) => {
                tracing::debug!(session_id = %session.id, tool = %payload.name, "Tool result received");
                return true;
            }
            Frame::Text(line) => {
                if self.rules.is_internal(&line) {
                    tracing::trace!(session_id = %session.id, %line, "Dropping internal output");
                    return true;
                }
                record_facts(session, &line);
                StreamEvent::Progress { text: line }
            }
        };
        emit(sink, cancel, event).await
    }

    async fn handle_diagnostic(
        &self,
        session: &GenerationSession,
        line: String,
        sink: &mpsc::Sender<StreamEvent>,
        cancel: &CancellationController,
    ) -> bool {
        tracing::debug!(target: "sitegen::worker", session_id = %session.id, "{}", line);
        if self.rules.is_significant_error(&line) {
            return emit(sink, cancel, StreamEvent::error(line)).await;
        }
        true
    }
}

fn record_facts(session: &mut GenerationSession, line: &str) {
    for fact in extract_facts(line) {
        match fact {
            SessionFact::SandboxId(id) => {
                if session.record_sandbox_id(&id) {
                    tracing::info!(session_id = %session.id, sandbox_id = %id, "Sandbox created");
                }
            }
            SessionFact::PreviewUrl(url) => {
                if session.record_preview_url(&url) {
                    tracing::info!(session_id = %session.id, preview_url = %url, "Preview URL available");
                }
            }
        }
    }
}

/// Send one event unless the session is cancelled. A closed receiver means the
/// client is gone and cancels the session. Returns whether the event was sent.
async fn emit(sink: &mpsc::Sender<StreamEvent>, cancel: &CancellationController, event: StreamEvent) -> bool {
    if cancel.is_cancelled() {
        return false;
    }
    tokio::select! {
        biased;
        _ = cancel.cancelled() => false,
        sent = sink.send(event) => match sent {
            Ok(()) => true,
            Err(_) => {
                tracing::debug!("Event receiver closed, cancelling session");
                cancel.cancel();
                false
            }
        },
    }
}

/// Emit a fatal error and settle on `Failed`, or `Cancelled` if cancellation won.
async fn fail(
    sink: &mpsc::Sender<StreamEvent>,
    cancel: &CancellationController,
    text: impl Into<String>,
) -> SessionStatus {
    if emit(sink, cancel, StreamEvent::error(text)).await {
        SessionStatus::Failed
    } else {
        SessionStatus::Cancelled
    }
}

async fn terminate(session: &GenerationSession, process: &mut dyn WorkerProcess) -> SessionStatus {
    tracing::info!(session_id = %session.id, pid = ?process.id(), "Session cancelled, killing worker");
    if let Err(e) = process.kill().await {
        tracing::warn!(session_id = %session.id, error = %e, "Failed to kill worker");
    }
    SessionStatus::Cancelled
}

enum Output {
    Frame(Frame),
    Diagnostic(String),
}

/// Stdout and stderr readers of one worker.
///
/// A reader is kept until the session ends, also after a read error: dropping
/// it closes the pipe and the worker's next write would raise SIGPIPE.
struct WorkerOutput {
    stdout: Option<FrameReader<OutputStream>>,
    stderr: Option<LineReader<OutputStream>>,
    stdout_open: bool,
    stderr_open: bool,
}

impl WorkerOutput {
    fn new(process: &mut dyn WorkerProcess) -> Self {
        let stdout = process.take_stdout().map(FrameReader::new);
        let stderr = process.take_stderr().map(LineReader::new);
        Self {
            stdout_open: stdout.is_some(),
            stderr_open: stderr.is_some(),
            stdout,
            stderr,
        }
    }

    fn is_open(&self) -> bool {
        self.stdout_open || self.stderr_open
    }

    /// Next frame or diagnostic line, `None` once both streams are closed.
    /// Stdout is preferred when both are ready.
    async fn next(&mut self, session: &GenerationSession) -> Option<Output> {
        while self.is_open() {
            tokio::select! {
                biased;
                frame = next_frame(&mut self.stdout), if self.stdout_open => match frame {
                    Ok(Some(frame)) => return Some(Output::Frame(frame)),
                    Ok(None) => self.stdout_open = false,
                    Err(e) => {
                        tracing::warn!(session_id = %session.id, error = %e, "Worker stdout read failed");
                        self.stdout_open = false;
                    }
                },
                line = next_line(&mut self.stderr), if self.stderr_open => match line {
                    Ok(Some(line)) => return Some(Output::Diagnostic(line)),
                    Ok(None) => self.stderr_open = false,
                    Err(e) => {
                        tracing::warn!(session_id = %session.id, error = %e, "Worker stderr read failed");
                        self.stderr_open = false;
                    }
                },
            }
        }
        None
    }
}

async fn next_frame(reader: &mut Option<FrameReader<OutputStream>>) -> io::Result<Option<Frame>> {
    match reader {
        Some(reader) => reader.next_frame().await,
        None => future::pending().await,
    }
}

async fn next_line(reader: &mut Option<LineReader<OutputStream>>) -> io::Result<Option<String>> {
    match reader {
        Some(reader) => reader.next_line().await,
        None => future::pending().await,
    }
}
