//! HTTP surface: live generation feeds over SSE plus session and sandbox control.
//!
//! | Route                              | Handler                 |
//! |------------------------------------|-------------------------|
//! | `POST /api/generate`               | start a session, stream `data: <JSON>` units, end with `data: [DONE]` |
//! | `POST /api/sessions/{id}/cancel`   | cancel a running session |
//! | `DELETE /api/sandboxes/{id}`       | run the sandbox removal script |
//! | `GET /api/status`                  | credential and session overview |
//! | `GET /health`                      | liveness |

pub mod api;
pub mod sse;

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use axum::Router;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use crate::config::Config;
use crate::session::cancel::SessionRegistry;
use crate::session::invocation::InvocationBuilder;
use crate::session::orchestrator::SessionOrchestrator;
use crate::session::sandbox::SandboxJanitor;
use crate::session::worker::{LocalLauncher, WorkerLauncher};
use crate::stream::extract::OutputRules;
use api::{AppState, SharedState};

/// Configuration for the HTTP server.
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub dev_mode: bool,
    pub sitegen: Config,
}

impl Default for ServerConfig {
    fn default() -> Self {
        let sitegen = Config::default();
        Self {
            host: sitegen.server.host.clone(),
            port: sitegen.server.port,
            dev_mode: false,
            sitegen,
        }
    }
}

impl ServerConfig {
    pub fn from_config(sitegen: Config) -> Self {
        Self {
            host: sitegen.server.host.clone(),
            port: sitegen.server.port,
            dev_mode: false,
            sitegen,
        }
    }
}

/// Application state backed by local worker processes.
pub fn build_state(config: &Config, launcher: Arc<dyn WorkerLauncher>) -> SharedState {
    let builder = InvocationBuilder::from_config(config);
    Arc::new(AppState {
        orchestrator: SessionOrchestrator::new(
            Arc::clone(&launcher),
            builder.clone(),
            OutputRules::from_config(&config.output),
        ),
        janitor: SandboxJanitor::new(launcher, builder),
        registry: SessionRegistry::new(),
        channel_capacity: config.worker.channel_capacity,
        session_timeout: config.worker.timeout_secs.map(Duration::from_secs),
    })
}

/// Build the full application router.
pub fn build_router(state: SharedState, dev_mode: bool) -> Router {
    let mut app = api::api_router()
        .with_state(state)
        .layer(TraceLayer::new_for_http());

    if dev_mode {
        app = app.layer(CorsLayer::permissive());
    }
    app
}

/// Start the server and run until Ctrl-C.
pub async fn start_server(config: ServerConfig) -> Result<()> {
    let state = build_state(&config.sitegen, Arc::new(LocalLauncher::new()));

    let report = state.orchestrator.builder().credential_report();
    if !report.sandbox_platform {
        tracing::warn!("Sandbox platform credential is not set; generation requests will fail");
    }
    for (backend, configured) in &report.backends {
        if !configured {
            tracing::warn!(backend = %backend, "Backend credential is not set");
        }
    }

    let app = build_router(Arc::clone(&state), config.dev_mode);

    let addr = format!("{}:{}", config.host, config.port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind to {}", addr))?;

    let local_addr = listener.local_addr()?;
    tracing::info!(%local_addr, dev_mode = config.dev_mode, "Server listening");
    println!("sitegen running at http://{}", local_addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("Server error")?;

    println!("Server shut down gracefully.");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "Failed to listen for Ctrl-C");
        return;
    }
    println!("\nShutting down...");
}
