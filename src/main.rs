use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

use sitegen::config::Config;
use sitegen::logging::{self, LogOptions};
use sitegen::session::models::{Backend, SessionStatus};

mod cmd;

#[derive(Parser)]
#[command(name = "sitegen")]
#[command(version, about = "Generate live web projects in remote sandboxes from a prompt")]
pub struct Cli {
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Path to a sitegen.toml. Defaults to .sitegen/sitegen.toml in the project directory.
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    #[arg(long, global = true)]
    pub project_dir: Option<PathBuf>,

    /// Log as JSON lines on stderr
    #[arg(long, global = true)]
    pub log_json: bool,

    /// Also write logs to daily rolling files in this directory
    #[arg(long, global = true)]
    pub log_dir: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Run the HTTP server
    Serve {
        /// Interface to bind (overrides the config file)
        #[arg(long)]
        host: Option<String>,

        /// Port to serve on (overrides the config file)
        #[arg(short, long)]
        port: Option<u16>,

        /// Enable dev mode (CORS permissive for a local UI dev server)
        #[arg(long)]
        dev: bool,
    },
    /// Run one generation session and print its events
    Generate {
        prompt: String,

        /// AI backend: claude, chatgpt, lovable
        #[arg(short, long, default_value = "claude")]
        backend: Backend,

        /// Continue in an existing sandbox
        #[arg(long)]
        sandbox_id: Option<String>,

        /// Treat the prompt as an edit to an existing project (requires --sandbox-id)
        #[arg(long)]
        follow_up: bool,

        /// Cancel the session after this many seconds
        #[arg(long)]
        timeout: Option<u64>,

        #[arg(long, value_enum, default_value_t = OutputFormat::Pretty)]
        format: OutputFormat,
    },
    /// Delete a sandbox through the removal script
    DeleteSandbox { sandbox_id: String },
    /// View or initialize configuration
    Config {
        #[command(subcommand)]
        command: Option<ConfigCommands>,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    /// Human-readable progress
    Pretty,
    /// Raw `data: <JSON>` units as served to browsers
    Sse,
}

#[derive(Subcommand, Clone)]
pub enum ConfigCommands {
    /// Show the effective configuration
    Show,
    /// Write a default sitegen.toml
    Init {
        /// Overwrite an existing file
        #[arg(long)]
        force: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Worker credentials usually live in .env
    dotenvy::dotenv().ok();

    let _log_guard = logging::init(&LogOptions {
        verbose: cli.verbose,
        json: cli.log_json,
        log_dir: cli.log_dir.clone(),
    })?;

    let project_dir = match cli.project_dir.clone() {
        Some(dir) => dir,
        None => std::env::current_dir().context("Failed to get current directory")?,
    };
    let load_config = || Config::resolve(cli.config.as_deref(), &project_dir);

    match cli.command {
        Commands::Serve { host, port, dev } => {
            cmd::cmd_serve(load_config()?, host, port, dev).await?;
        }
        Commands::Generate {
            prompt,
            backend,
            sandbox_id,
            follow_up,
            timeout,
            format,
        } => {
            let status = cmd::cmd_generate(
                &load_config()?,
                cmd::GenerateArgs {
                    prompt,
                    backend,
                    sandbox_id,
                    follow_up,
                    timeout,
                    format,
                },
            )
            .await?;
            if status != SessionStatus::Completed {
                anyhow::bail!("Generation {}", status);
            }
        }
        Commands::DeleteSandbox { sandbox_id } => {
            cmd::cmd_delete_sandbox(&load_config()?, &sandbox_id).await?;
        }
        Commands::Config { command } => {
            cmd::cmd_config(&project_dir, cli.config.as_deref(), load_config, command)?;
        }
    }

    Ok(())
}
