use anyhow::Result;
use clap::{Parser, Subcommand};
use tether_core::{Client, TetherConfig};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

mod commands;
use commands::{
    handle_config_command, run_call, run_watch, ConfigCommands, WatchKind, WatchOptions,
};

#[derive(Parser)]
#[command(name = "tether-cli")]
#[command(about = "Tether CLI - JSON-RPC calls and gap-free subscriptions against a node")]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Path to config file (defaults to $TETHER_CONFIG or config/tether.toml)
    #[arg(long, global = true)]
    config: Option<String>,
}

#[derive(Subcommand)]
enum Commands {
    /// Send a single JSON-RPC request
    Call {
        /// Endpoint URL (http, https, ws or wss)
        url: String,

        /// Method name, e.g. eth_blockNumber
        method: String,

        /// Params as a JSON array
        #[arg(default_value = "[]")]
        params: String,
    },

    /// Subscribe over a WebSocket endpoint and print events as they arrive
    Watch {
        /// Endpoint URL (ws or wss)
        url: String,

        #[arg(value_enum, default_value = "new-heads")]
        kind: WatchKind,

        /// Log filter address (logs only)
        #[arg(long)]
        address: Option<String>,

        /// Log filter topic (logs only, can be specified multiple times)
        #[arg(long)]
        topic: Vec<String>,

        /// Exit after this many events
        #[arg(short, long)]
        count: Option<usize>,
    },

    /// Configuration Management
    #[command(subcommand)]
    Config(ConfigCommands),
}

/// Initializes the logging system based on the configuration. Logs go to stderr so command
/// output on stdout stays machine readable.
fn init_logging(config: &TetherConfig) {
    let filter = match std::env::var("RUST_LOG") {
        Ok(env_filter) if env_filter == "debug" => {
            EnvFilter::new("warn,tether_core=debug,cli=debug")
        }
        Ok(env_filter) if env_filter == "trace" => {
            EnvFilter::new("warn,tether_core=trace,cli=trace")
        }
        Ok(_) => EnvFilter::try_from_env("RUST_LOG")
            .unwrap_or_else(|_| EnvFilter::new("warn,tether_core=debug,cli=debug")),
        Err(_) => EnvFilter::new(format!(
            "warn,tether_core={level},cli={level}",
            level = config.logging.level
        )),
    };

    let registry = tracing_subscriber::registry().with(filter);

    if config.logging.format == "json" {
        let fmt_layer = tracing_subscriber::fmt::layer().json().with_writer(std::io::stderr);
        registry.with(fmt_layer).init();
    } else {
        // "pretty" and any other format default to pretty logging
        let fmt_layer = tracing_subscriber::fmt::layer()
            .pretty()
            .with_writer(std::io::stderr)
            .with_file(true)
            .with_line_number(true)
            .with_target(false);
        registry.with(fmt_layer).init();
    }
}

fn load_config(path: Option<&str>) -> Result<TetherConfig> {
    let config = match path {
        Some(path) => TetherConfig::from_file(path),
        None => TetherConfig::load(),
    }
    .map_err(|e| anyhow::anyhow!("Failed to load configuration: {e}"))?;

    config.validate().map_err(|e| anyhow::anyhow!("Configuration validation failed: {e}"))?;
    Ok(config)
}

/// Loads configuration, starts logging and connects to `url`.
async fn connect(config_path: Option<&str>, url: &str) -> Result<Client> {
    let config = load_config(config_path)?;
    init_logging(&config);
    Client::connect(url, config)
        .await
        .map_err(|e| anyhow::anyhow!("Failed to connect to {url}: {e}"))
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let config_path = cli.config.as_deref();

    match cli.command {
        Commands::Call { url, method, params } => {
            let client = connect(config_path, &url).await?;
            run_call(&client, &method, &params).await?;
            client.disconnect();
        }

        Commands::Watch { url, kind, address, topic, count } => {
            let client = connect(config_path, &url).await?;
            let options = WatchOptions { kind, address, topics: topic, count };
            run_watch(&client, options).await?;
        }

        Commands::Config(config_command) => {
            handle_config_command(config_command)?;
        }
    }

    Ok(())
}
