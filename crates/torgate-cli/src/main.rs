//! torgate CLI
//!
//! Command-line interface for the Tor forwarding proxy.

mod args;
mod commands;
mod logging;

use anyhow::Result;
use clap::Parser;
use tracing::error;

use args::Args;
use commands::Command;

fn main() -> Result<()> {
    // Parse command line arguments
    let args = Args::parse();

    let (config, config_path) = commands::config::resolve(args.config.as_deref())?;

    // Initialize logging
    let _log_guard = logging::init(&args, &config.logging)?;

    if let Some(path) = &config_path {
        tracing::debug!(path = %path.display(), "Using configuration file");
    }

    let result = match args.command {
        Command::Run(run_args) => {
            if !args.quiet {
                print_banner();
            }
            commands::run::execute(run_args, config)
        }
        Command::Blocklist(blocklist_args) => commands::blocklist::execute(blocklist_args, &config),
        Command::Bridge(bridge_args) => commands::bridge::execute(bridge_args, &config),
        Command::Config(config_args) => commands::config::execute(config_args, config, config_path),
        Command::Rotate(rotate_args) => commands::rotate::execute(rotate_args, &config),
        Command::Completions(comp_args) => commands::completions::execute(comp_args),
    };

    if let Err(ref e) = result {
        error!("Fatal error: {:#}", e);
    }

    result
}

fn print_banner() {
    use colored::Colorize;

    println!();
    println!("{}", "╔═══════════════════════════════════════════════════════╗".cyan());
    println!("{}", "║                                                       ║".cyan());
    println!(
        "{}{}{}",
        "║  ".cyan(),
        format!("torgate v{:<10}", env!("CARGO_PKG_VERSION")).green().bold(),
        "                                  ║".cyan()
    );
    println!(
        "{}{}{}",
        "║  ".cyan(),
        "HTTP/HTTPS proxy through the Tor network".white(),
        "             ║".cyan()
    );
    println!("{}", "║                                                       ║".cyan());
    println!("{}", "╚═══════════════════════════════════════════════════════╝".cyan());
    println!();
}
