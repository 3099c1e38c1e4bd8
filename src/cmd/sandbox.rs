//! Sandbox removal command: `sitegen delete-sandbox`.

use std::sync::Arc;

use anyhow::{Context, Result};

use sitegen::config::Config;
use sitegen::session::invocation::InvocationBuilder;
use sitegen::session::sandbox::SandboxJanitor;
use sitegen::session::worker::LocalLauncher;

pub async fn cmd_delete_sandbox(config: &Config, sandbox_id: &str) -> Result<()> {
    let janitor = SandboxJanitor::new(
        Arc::new(LocalLauncher::new()),
        InvocationBuilder::from_config(config),
    );
    janitor
        .delete(sandbox_id)
        .await
        .with_context(|| format!("Failed to delete sandbox {}", sandbox_id))?;

    println!(
        "{} Sandbox {} deleted",
        console::style("✓").green(),
        sandbox_id
    );
    Ok(())
}
