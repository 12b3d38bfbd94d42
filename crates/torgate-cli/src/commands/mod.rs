//! CLI commands

pub mod blocklist;
pub mod bridge;
pub mod completions;
pub mod config;
pub mod rotate;
pub mod run;

use clap::Subcommand;

/// CLI commands
#[derive(Subcommand, Debug)]
pub enum Command {
    /// Start the proxy and the Tor daemon (main command)
    Run(run::RunArgs),

    /// Host blocklist management
    Blocklist(blocklist::BlocklistArgs),

    /// Bridge settings
    Bridge(bridge::BridgeArgs),

    /// Configuration management
    Config(config::ConfigArgs),

    /// Request a new Tor identity from a running daemon
    Rotate(rotate::RotateArgs),

    /// Generate shell completions
    Completions(completions::CompletionsArgs),
}
