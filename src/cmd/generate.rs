//! One-shot generation command: `sitegen generate`.

use std::io::Write;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use console::style;
use tokio::sync::mpsc;

use sitegen::config::Config;
use sitegen::server::sse::{DONE_FRAME, encode_frame};
use sitegen::session::cancel::CancellationController;
use sitegen::session::invocation::InvocationBuilder;
use sitegen::session::models::{Backend, GenerationSession, SessionStatus};
use sitegen::session::orchestrator::SessionOrchestrator;
use sitegen::session::worker::LocalLauncher;
use sitegen::stream::extract::OutputRules;
use sitegen::stream::{StreamEvent, describe_tool_use, tool_emoji};

use crate::OutputFormat;

pub struct GenerateArgs {
    pub prompt: String,
    pub backend: Backend,
    pub sandbox_id: Option<String>,
    pub follow_up: bool,
    pub timeout: Option<u64>,
    pub format: OutputFormat,
}

pub async fn cmd_generate(config: &Config, args: GenerateArgs) -> Result<SessionStatus> {
    let mut session = GenerationSession::new(args.prompt, args.backend);
    if let Some(id) = args.sandbox_id {
        session = session.with_sandbox(id);
    }
    if args.follow_up {
        session = session.as_follow_up();
    }

    let orchestrator = SessionOrchestrator::new(
        Arc::new(LocalLauncher::new()),
        InvocationBuilder::from_config(config),
        OutputRules::from_config(&config.output),
    );

    let cancel = CancellationController::new();
    if let Some(secs) = args.timeout.or(config.worker.timeout_secs) {
        cancel.cancel_after(Duration::from_secs(secs));
    }
    let interrupt = cancel.clone();
    tokio::spawn(async move {
        tokio::select! {
            _ = interrupt.cancelled() => {}
            signal = tokio::signal::ctrl_c() => {
                if signal.is_ok() {
                    eprintln!("\nCancelling...");
                    interrupt.cancel();
                }
            }
        }
    });

    let (tx, mut rx) = mpsc::channel(config.worker.channel_capacity.max(1));
    let format = args.format;
    let printer = tokio::spawn(async move {
        while let Some(event) = rx.recv().await {
            print_event(format, &event);
        }
        if format == OutputFormat::Sse {
            print!("{}", DONE_FRAME);
        }
        std::io::stdout().flush().ok();
    });

    let status = orchestrator.run_request(&mut session, &tx, &cancel).await;
    drop(tx);
    printer.await.context("Event printer task failed")?;

    // Stops the timeout and Ctrl-C watchers
    cancel.cancel();

    if format == OutputFormat::Pretty {
        print_summary(&session, status);
    }
    Ok(status)
}

fn print_event(format: OutputFormat, event: &StreamEvent) {
    match format {
        OutputFormat::Sse => print!("{}", encode_frame(event)),
        OutputFormat::Pretty => match event {
            StreamEvent::AgentMessage { text } => println!("💬 {}", text),
            StreamEvent::ToolInvocation { name, input } => println!(
                "  {} {}",
                tool_emoji(name),
                style(describe_tool_use(name, input)).dim()
            ),
            StreamEvent::ToolResult { .. } => {}
            StreamEvent::Progress { text } => println!("  {}", text),
            StreamEvent::Error { text } => {
                println!("  {} {}", style("Error:").red().bold(), text)
            }
            StreamEvent::Complete {
                sandbox_id,
                preview_url,
            } => {
                println!();
                println!("{} Preview ready: {}", style("✓").green(), style(preview_url).cyan());
                if let Some(id) = sandbox_id {
                    println!("  Sandbox: {}", id);
                }
            }
        },
    }
}

fn print_summary(session: &GenerationSession, status: SessionStatus) {
    let label = match status {
        SessionStatus::Completed => style(status.as_str()).green(),
        SessionStatus::Cancelled => style(status.as_str()).yellow(),
        _ => style(status.as_str()).red(),
    };
    println!();
    println!("Session {} {}", session.id, label);
    if status != SessionStatus::Completed
        && let Some(id) = &session.sandbox_id
    {
        println!(
            "  Continue with: sitegen generate --follow-up --sandbox-id {} \"<prompt>\"",
            id
        );
    }
}
