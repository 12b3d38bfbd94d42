//! Rotate command - one-shot identity rotation

use std::time::Duration;

use anyhow::{Context, Result};
use clap::Args;
use colored::Colorize;
use torgate_core::{Config, ControlClient};

/// Rotate command arguments
#[derive(Args, Debug)]
pub struct RotateArgs {
    /// Control port of the running daemon
    #[arg(long, value_name = "PORT")]
    pub control_port: u16,

    /// Control port password (default: `rotation.password` from config)
    #[arg(long, env = "TORGATE_CONTROL_PASSWORD", hide_env_values = true)]
    pub password: Option<String>,

    /// Seconds to wait for the daemon
    #[arg(long, default_value = "10", value_name = "SECS")]
    pub timeout: u64,
}

/// Execute rotate command
pub fn execute(args: RotateArgs, config: &Config) -> Result<()> {
    let client = ControlClient::localhost(args.control_port)
        .with_password(args.password.or_else(|| config.rotation.password.clone()))
        .with_timeout(Duration::from_secs(args.timeout.max(1)));

    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .context("Failed to start async runtime")?;

    runtime
        .block_on(client.rotate_identity())
        .with_context(|| format!("Identity rotation via {} failed", client.addr()))?;

    println!("{} New identity requested", "✓".green());
    Ok(())
}
