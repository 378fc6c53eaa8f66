use clap::Subcommand;
use std::path::Path;
use tether_core::TetherConfig;

use super::utils::{print_error, print_info, print_success, CliError, CliResult};

const SAMPLE_CONFIG: &str = r#"# Tether configuration
# Any key can be overridden from the environment, e.g. TETHER__RETRY__MAX_RETRIES=5.

[retry]
max_retries = 3
retry_interval_ms = 1000
retry_jitter_ms = 250

[subscriptions]
heartbeat_interval_secs = 30
heartbeat_timeout_secs = 10
backfill_attempts = 5
backfill_initial_backoff_ms = 1000
backfill_max_backoff_ms = 30000
backfill_timeout_secs = 10

[http]
concurrent_limit = 100
request_timeout_secs = 30
connect_timeout_secs = 5

[connection]
initial_reconnect_delay_ms = 500
max_reconnect_delay_ms = 30000
max_consecutive_failures = 10

[logging]
level = "info"
format = "pretty"
"#;

#[derive(Subcommand)]
pub enum ConfigCommands {
    /// Validate a configuration file
    Validate {
        /// Path to config file
        #[arg(short, long, default_value = "config/tether.toml")]
        file: String,
    },

    /// Show the effective configuration (file plus environment overrides)
    Show {
        /// Path to config file
        #[arg(short, long, default_value = "config/tether.toml")]
        file: String,
    },

    /// Generate a sample configuration file
    Generate {
        /// Output path for the config file
        #[arg(short, long, default_value = "config/tether.toml")]
        output: String,

        /// Overwrite existing file
        #[arg(long)]
        force: bool,
    },
}

pub fn handle_config_command(command: ConfigCommands) -> CliResult<()> {
    match command {
        ConfigCommands::Validate { file } => validate_config(&file),
        ConfigCommands::Show { file } => show_config(&file),
        ConfigCommands::Generate { output, force } => generate_config(&output, force),
    }
}

fn validate_config(file: &str) -> CliResult<()> {
    if !Path::new(file).exists() {
        print_error(&format!("Configuration file not found: {file}"));
        return Err(CliError::Config(format!("File not found: {file}")));
    }

    print_info(&format!("Loading configuration from {file}..."));
    let config = TetherConfig::from_file(file).map_err(|e| CliError::Config(e.to_string()))?;
    config.validate().map_err(CliError::Config)?;

    print_success("Configuration is valid!");
    println!("Configuration Summary:");
    println!("  Retries: {} (every {}ms)", config.retry.max_retries, config.retry.retry_interval_ms);
    println!(
        "  Heartbeat: every {}s, timeout {}s",
        config.subscriptions.heartbeat_interval_secs, config.subscriptions.heartbeat_timeout_secs
    );
    println!("  Backfill attempts: {}", config.subscriptions.backfill_attempts);

    Ok(())
}

fn show_config(file: &str) -> CliResult<()> {
    let config = TetherConfig::from_file(file).map_err(|e| CliError::Config(e.to_string()))?;
    println!("{}", serde_json::to_string_pretty(&config)?);
    Ok(())
}

fn generate_config(output: &str, force: bool) -> CliResult<()> {
    if Path::new(output).exists() && !force {
        return Err(CliError::Config(format!(
            "File {output} already exists. Use --force to overwrite."
        )));
    }

    if let Some(parent) = Path::new(output).parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }
    std::fs::write(output, SAMPLE_CONFIG)?;

    print_success(&format!("Sample configuration written to {output}"));
    Ok(())
}
