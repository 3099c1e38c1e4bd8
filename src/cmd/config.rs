//! Configuration view and setup commands: `sitegen config`.

use std::path::Path;

use anyhow::Result;

use sitegen::config::Config;

use crate::ConfigCommands;

pub fn cmd_config(
    project_dir: &Path,
    explicit: Option<&Path>,
    load_config: impl FnOnce() -> Result<Config>,
    command: Option<ConfigCommands>,
) -> Result<()> {
    let config_path = explicit
        .map(Path::to_path_buf)
        .unwrap_or_else(|| Config::default_path(project_dir));

    match command {
        None | Some(ConfigCommands::Show) => {
            let config = load_config()?;
            println!();
            println!("sitegen Configuration");
            println!("=====================");
            println!();

            if config_path.exists() {
                println!("Config file: {}", config_path.display());
            } else {
                println!("No config file at {}, using defaults", config_path.display());
            }
            println!();
            println!("Effective values (with env overrides):");
            println!();
            println!("{}", config.to_toml()?);

            println!("Credentials:");
            for name in config.credential_names() {
                let set = std::env::var(&name).is_ok_and(|v| !v.trim().is_empty());
                let marker = if set {
                    console::style("set").green()
                } else {
                    console::style("not set").red()
                };
                println!("  {} {}", name, marker);
            }
            println!();
        }
        Some(ConfigCommands::Init { force }) => {
            if config_path.exists() && !force {
                anyhow::bail!(
                    "{} already exists (use --force to overwrite)",
                    config_path.display()
                );
            }
            Config::default().save(&config_path)?;
            println!("Created {}", config_path.display());
        }
    }

    Ok(())
}
