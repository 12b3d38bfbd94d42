//! Blocklist management commands
//!
//! Edits the JSON blocklist file the proxy loads at start.

use std::path::PathBuf;

use anyhow::{bail, Context, Result};
use clap::{Args, Subcommand};
use colored::Colorize;
use torgate_core::blocklist::store;
use torgate_core::{Blocklist, Config, ProtocolPath};

/// Blocklist arguments
#[derive(Args, Debug)]
pub struct BlocklistArgs {
    #[command(subcommand)]
    pub command: BlocklistCommand,

    /// Blocklist file (default: `blocklist.file` from config)
    #[arg(short, long, global = true)]
    pub file: Option<PathBuf>,
}

/// Blocklist subcommands
#[derive(Subcommand, Debug)]
pub enum BlocklistCommand {
    /// List all patterns
    List,

    /// Add a pattern (use *.example.com for a wildcard suffix)
    Add {
        /// Host or pattern to add
        host: String,
    },

    /// Remove a pattern
    Remove {
        /// Pattern to remove
        host: String,
    },

    /// Show whether a host would be blocked on each request path
    Check {
        /// Host to check
        host: String,
    },
}

/// Execute blocklist command
pub fn execute(args: BlocklistArgs, config: &Config) -> Result<()> {
    let path = args.file.unwrap_or_else(|| config.blocklist.file.clone());
    let policy = config
        .blocklist
        .policy()
        .context("Invalid blocklist rules in config")?;
    let list = store::load_blocklist(&path)
        .with_context(|| format!("Failed to load blocklist from {}", path.display()))?
        .with_policy(policy);

    match args.command {
        BlocklistCommand::List => list_patterns(&list, &path),
        BlocklistCommand::Add { host } => add_pattern(&list, &path, &host),
        BlocklistCommand::Remove { host } => remove_pattern(&list, &path, &host),
        BlocklistCommand::Check { host } => check_host(&list, &host),
    }
}

fn list_patterns(list: &Blocklist, path: &std::path::Path) -> Result<()> {
    println!("{}", "═".repeat(50).bright_blue());
    println!("{}", " Blocklist".bright_white().bold());
    println!("{}", "═".repeat(50).bright_blue());
    println!("File: {}", path.display().to_string().cyan());
    println!("Total patterns: {}", list.len().to_string().green());
    println!();

    if list.is_empty() {
        println!("{}", "No patterns. Add one with 'torgate blocklist add <host>'".yellow());
    }
    for pattern in list.patterns() {
        println!("  {pattern}");
    }
    Ok(())
}

fn add_pattern(list: &Blocklist, path: &std::path::Path, host: &str) -> Result<()> {
    let pattern = host.trim().to_lowercase();
    if pattern.is_empty() {
        bail!("Pattern must not be empty");
    }
    if list.contains(&pattern) {
        println!("{} '{}' is already in the blocklist", "!".yellow(), pattern);
        return Ok(());
    }

    list.add(&pattern);
    store::save_blocklist(path, list)
        .with_context(|| format!("Failed to write blocklist to {}", path.display()))?;
    println!("{} Added '{}'", "✓".green(), pattern);
    Ok(())
}

fn remove_pattern(list: &Blocklist, path: &std::path::Path, host: &str) -> Result<()> {
    if !list.remove(host) {
        bail!("'{}' is not in the blocklist", host.trim().to_lowercase());
    }
    store::save_blocklist(path, list)
        .with_context(|| format!("Failed to write blocklist to {}", path.display()))?;
    println!("{} Removed '{}'", "✓".green(), host.trim().to_lowercase());
    Ok(())
}

fn check_host(list: &Blocklist, host: &str) -> Result<()> {
    let policy = list.policy();
    for (label, path) in [("CONNECT", ProtocolPath::Connect), ("HTTP", ProtocolPath::Http)] {
        match list.find_match(host, policy.rules_for(path)) {
            Some(pattern) => println!(
                "{:<8} {} (matches '{}')",
                label,
                "blocked".red().bold(),
                pattern
            ),
            None => println!("{:<8} {}", label, "allowed".green()),
        }
    }
    Ok(())
}
