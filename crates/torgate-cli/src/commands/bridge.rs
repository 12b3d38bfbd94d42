//! Bridge settings commands
//!
//! Bridges live in the JSON settings file (`bridges` text and the `bridge`
//! switch), so a front end and the CLI see the same values.

use std::path::PathBuf;

use anyhow::{bail, Context, Result};
use clap::{Args, Subcommand};
use colored::Colorize;
use torgate_core::daemon::parse_bridges;
use torgate_core::{Config, SettingsStore};

/// Bridge arguments
#[derive(Args, Debug)]
pub struct BridgeArgs {
    #[command(subcommand)]
    pub command: BridgeCommand,

    /// Settings file (default: `settings.file` from config)
    #[arg(short, long, global = true)]
    pub file: Option<PathBuf>,
}

/// Bridge subcommands
#[derive(Subcommand, Debug)]
pub enum BridgeCommand {
    /// Show the stored bridges
    Show,

    /// Replace the stored bridge lines
    Set {
        /// One bridge per line, e.g. "obfs4 1.2.3.4:443 FINGERPRINT cert=... iat-mode=0"
        text: String,

        /// Also enable bridges
        #[arg(long)]
        enable: bool,
    },

    /// Use the stored bridges on the next start
    Enable,

    /// Connect without bridges
    Disable,
}

/// Execute bridge command
pub fn execute(args: BridgeArgs, config: &Config) -> Result<()> {
    let path = args.file.unwrap_or_else(|| config.settings.file.clone());
    let store = SettingsStore::load(&path)
        .with_context(|| format!("Failed to load settings from {}", path.display()))?;

    match args.command {
        BridgeCommand::Show => return show(&store),
        BridgeCommand::Set { text, enable } => {
            let set = parse_bridges(&text).context("Invalid bridge lines")?;
            store.update(|s| {
                s.bridges = set.to_text();
                s.bridge |= enable;
            });
            println!(
                "{} Stored {} {} bridge(s)",
                "✓".green(),
                set.lines.len(),
                set.transport
            );
        }
        BridgeCommand::Enable => {
            let text = store.settings().bridges;
            if text.trim().is_empty() {
                bail!("No bridges stored; add some with 'torgate bridge set <TEXT>'");
            }
            parse_bridges(&text).context("Stored bridge lines are invalid")?;
            store.update(|s| s.bridge = true);
            println!("{} Bridges enabled", "✓".green());
        }
        BridgeCommand::Disable => {
            store.update(|s| s.bridge = false);
            println!("{} Bridges disabled", "✓".green());
        }
    }

    store
        .save()
        .with_context(|| format!("Failed to write settings to {}", path.display()))?;

    // plugin path is only needed once bridges are on
    if let Err(e) = config.check_settings(&store.settings()) {
        println!("{} {}", "!".yellow(), e);
    }
    Ok(())
}

fn show(store: &SettingsStore) -> Result<()> {
    let settings = store.settings();

    println!("File: {}", store.path().display().to_string().cyan());
    let state = if settings.bridge {
        "enabled".green()
    } else {
        "disabled".yellow()
    };
    println!("Bridges: {state}");

    if settings.bridges.trim().is_empty() {
        println!("{}", "No bridge lines stored".yellow());
        return Ok(());
    }
    match parse_bridges(&settings.bridges) {
        Ok(set) => {
            println!("Transport: {}", set.transport);
            for line in &set.lines {
                println!("  {line}");
            }
        }
        Err(e) => println!("{} {}", "Stored bridge lines are invalid:".red(), e),
    }
    Ok(())
}
