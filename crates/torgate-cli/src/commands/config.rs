//! Config command - configuration management

use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use clap::{Args, Subcommand};
use colored::Colorize;
use torgate_core::daemon::parse_directives;
use torgate_core::{Config, PortAllocator, SettingsStore};
use tracing::info;

/// File names searched in the working directory, in order
const LOCAL_CONFIG_FILES: [&str; 2] = ["torgate.toml", "config.toml"];

/// Config command arguments
#[derive(Args, Debug)]
pub struct ConfigArgs {
    #[command(subcommand)]
    pub action: ConfigAction,
}

/// Config subcommands
#[derive(Subcommand, Debug)]
pub enum ConfigAction {
    /// Show the effective configuration
    Show,

    /// Generate a configuration file with default values
    Generate {
        /// Output file path
        #[arg(short, long, default_value = "torgate.toml")]
        output: PathBuf,

        /// Overwrite an existing file
        #[arg(long)]
        force: bool,
    },

    /// Validate a configuration file
    Validate {
        /// Config file to validate (default: the effective one)
        file: Option<PathBuf>,
    },

    /// Print the Tor configuration that `run` would generate
    Torrc {
        /// Parse the output back and verify it matches
        #[arg(long)]
        check: bool,
    },

    /// Show config file locations
    Paths,
}

/// Load the config from `explicit`, else the first file found on the search
/// path, else defaults
pub fn resolve(explicit: Option<&Path>) -> Result<(Config, Option<PathBuf>)> {
    if let Some(path) = explicit {
        let config = Config::load(path)
            .with_context(|| format!("Failed to load config from {}", path.display()))?;
        return Ok((config, Some(path.to_path_buf())));
    }

    match find_config_file() {
        Some(path) => {
            let config = Config::load(&path)
                .with_context(|| format!("Failed to load config from {}", path.display()))?;
            Ok((config, Some(path)))
        }
        None => Ok((Config::default(), None)),
    }
}

/// Execute config command
pub fn execute(args: ConfigArgs, config: Config, source: Option<PathBuf>) -> Result<()> {
    match args.action {
        ConfigAction::Show => show_config(&config, source.as_deref()),
        ConfigAction::Generate { output, force } => generate_config(&output, force),
        ConfigAction::Validate { file } => match file {
            Some(path) => {
                let config = Config::load(&path)
                    .with_context(|| format!("Failed to load config from {}", path.display()))?;
                validate_config(&config, Some(&path))
            }
            None => validate_config(&config, source.as_deref()),
        },
        ConfigAction::Torrc { check } => print_torrc(&config, check),
        ConfigAction::Paths => show_paths(),
    }
}

fn show_config(config: &Config, source: Option<&Path>) -> Result<()> {
    let toml_str = config.to_toml().context("Failed to serialize config")?;
    match source {
        Some(path) => println!("# Loaded from {}", path.display()),
        None => println!("# Built-in defaults"),
    }
    println!("{toml_str}");
    Ok(())
}

fn generate_config(output: &Path, force: bool) -> Result<()> {
    if output.exists() && !force {
        bail!("{} already exists; use --force to overwrite", output.display());
    }

    let toml_str = Config::default()
        .to_toml()
        .context("Failed to serialize config")?;

    // Add header comment
    let content = format!(
        "# torgate configuration\n\
         # Ports set to 0 are allocated automatically at start\n\n\
         {toml_str}"
    );

    std::fs::write(output, content)
        .with_context(|| format!("Failed to write config to {}", output.display()))?;

    info!("Generated config file: {}", output.display());
    println!("Configuration file generated: {}", output.display());
    Ok(())
}

fn validate_config(config: &Config, source: Option<&Path>) -> Result<()> {
    config.validate().context("Configuration validation failed")?;

    let settings = SettingsStore::load(&config.settings.file)
        .with_context(|| format!("Failed to load settings from {}", config.settings.file.display()))?
        .settings();
    config
        .check_settings(&settings)
        .context("Settings do not fit the configuration")?;

    let port = |p: u16| if p == 0 { "auto".to_string() } else { p.to_string() };

    println!("{} Configuration is valid", "✓".green());
    if let Some(path) = source {
        println!("  File: {}", path.display());
    }
    println!("  Proxy: {}:{}", config.proxy.listen_addr, port(config.proxy.port));
    println!("  Tor binary: {}", config.daemon.binary.display());
    println!(
        "  SOCKS/control/DNS ports: {}/{}/{}",
        port(config.daemon.socks_port),
        port(config.daemon.control_port),
        port(config.daemon.dns_port)
    );
    println!("  Bridges: {}", if settings.bridge { "enabled" } else { "disabled" });
    println!(
        "  Rotation: {}",
        if config.rotation.enabled {
            format!("every {}s", config.rotation.interval_secs)
        } else {
            "disabled".to_string()
        }
    );
    println!("  System proxy: {}", config.system_proxy.enabled);
    Ok(())
}

fn print_torrc(config: &Config, check: bool) -> Result<()> {
    let settings = SettingsStore::load(&config.settings.file)
        .with_context(|| format!("Failed to load settings from {}", config.settings.file.display()))?
        .settings();

    let ports = PortAllocator::new()
        .allocate_set(config.port_request())
        .context("Failed to allocate ports")?;
    let daemon_config = config
        .daemon_config(ports, &settings)
        .context("Failed to build daemon configuration")?;
    daemon_config
        .validate()
        .context("Daemon configuration is invalid")?;

    let text = daemon_config.to_torrc();
    print!("{text}");

    if check {
        let parsed = parse_directives(&text)
            .and_then(|d| d.to_config())
            .context("Generated configuration does not parse")?;
        if parsed != daemon_config {
            bail!("Generated configuration does not round-trip");
        }
        eprintln!("{} Round-trip check passed", "✓".green());
    }
    Ok(())
}

fn show_paths() -> Result<()> {
    println!("Configuration file search paths:");
    println!();

    for (i, name) in LOCAL_CONFIG_FILES.iter().enumerate() {
        println!("  {}. ./{}", i + 1, name);
    }
    if let Some(dir) = project_config_dir() {
        println!("  {}. {}", LOCAL_CONFIG_FILES.len() + 1, dir.join("config.toml").display());
    }

    println!();
    println!("The TORGATE_CONFIG environment variable or -c overrides the search.");
    Ok(())
}

fn project_config_dir() -> Option<PathBuf> {
    directories::ProjectDirs::from("", "", "torgate").map(|d| d.config_dir().to_path_buf())
}

fn find_config_file() -> Option<PathBuf> {
    let local = LOCAL_CONFIG_FILES.iter().map(PathBuf::from);
    let user = project_config_dir().map(|d| d.join("config.toml"));
    local.chain(user).find(|p| p.exists())
}
