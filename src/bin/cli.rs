//! Chatgate CLI
//!
//! Connect to a gateway and watch its events, issue a single API call, or
//! manage the configuration file.

use std::path::PathBuf;
use std::time::Duration;

use anyhow::{bail, Context};
use chatgate::config::{
    apply_env_overrides, config_path, load_config, load_config_from_path, save_config,
    validate_config, LoggingConfig,
};
use chatgate::{GatewayClientConfig, GatewayEvent, GatewaySession, VERSION};
use clap::{ArgAction, Parser, Subcommand};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(
    name = "chatgate",
    version = VERSION,
    about = "Chatgate - real-time chat gateway client",
    long_about = None
)]
struct Cli {
    /// Config file to use instead of the default location
    #[arg(long, short, global = true, env = "CHATGATE_CONFIG")]
    config: Option<PathBuf>,

    /// Override the gateway URL
    #[arg(long, global = true)]
    url: Option<String>,

    /// Emit logs as JSON lines
    #[arg(long, global = true)]
    log_json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Connect and print gateway events until Ctrl-C
    Connect {
        /// Switch to this channel once connected
        #[arg(long)]
        channel: Option<String>,

        /// Report the client as focused
        #[arg(long, default_value_t = true, action = ArgAction::Set)]
        focused: bool,
    },

    /// Send one correlated API call and print its reply
    Call {
        /// API name, e.g. `channel.info`
        api: String,

        /// JSON payload
        #[arg(default_value = "{}")]
        data: String,

        /// Seconds to wait for the connection and for the reply
        #[arg(long, default_value_t = 15)]
        timeout: u64,
    },

    /// View or manage the configuration file
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(Subcommand)]
enum ConfigAction {
    /// Print the effective configuration (token omitted)
    Show,
    /// Check the configuration for errors and warnings
    Validate,
    /// Write a default configuration file
    Init {
        /// Overwrite an existing file
        #[arg(long, short)]
        force: bool,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let creating = matches!(
        cli.command,
        Commands::Config {
            action: ConfigAction::Init { .. }
        }
    );
    let mut config = match &cli.config {
        Some(path) if creating && !path.exists() => GatewayClientConfig::default(),
        Some(path) => {
            let mut config = load_config_from_path(path)?;
            apply_env_overrides(&mut config);
            config
        }
        None => load_config()?,
    };
    if let Some(url) = cli.url.clone() {
        config.connection.url = url;
    }

    init_logging(&config.logging, cli.log_json);

    match cli.command {
        Commands::Connect { channel, focused } => run_connect(config, channel, focused).await,
        Commands::Call { api, data, timeout } => run_call(config, &api, &data, timeout).await,
        Commands::Config { action } => run_config(&config, cli.config, action),
    }
}

fn init_logging(logging: &LoggingConfig, json: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&logging.level));
    if json || logging.json {
        tracing_subscriber::fmt().with_env_filter(filter).json().init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }
}

// ============================================================================
// Gateway commands
// ============================================================================

async fn run_connect(
    config: GatewayClientConfig,
    channel: Option<String>,
    focused: bool,
) -> anyhow::Result<()> {
    let session = GatewaySession::init_ws(config);
    session.on_all(print_event);

    session.connect().await;
    tokio::select! {
        ready = session.wait_connected() => ready?,
        _ = tokio::signal::ctrl_c() => {
            session.teardown();
            return Ok(());
        }
    }
    session.set_focused(focused);

    if let Some(channel_id) = channel {
        match session.switch_to(&channel_id).await {
            Ok(true) => info!(channel_id, "switched channel"),
            Ok(false) => warn!(channel_id, "channel switch refused"),
            Err(e) => warn!(channel_id, error = %e, "channel switch failed"),
        }
    }

    tokio::signal::ctrl_c().await?;
    session.teardown();
    Ok(())
}

async fn run_call(
    config: GatewayClientConfig,
    api: &str,
    data: &str,
    timeout: u64,
) -> anyhow::Result<()> {
    let payload: serde_json::Value =
        serde_json::from_str(data).with_context(|| format!("payload is not valid JSON: {}", data))?;
    let limit = Duration::from_secs(timeout);

    let session = GatewaySession::init_ws(config);
    session.connect().await;
    tokio::time::timeout(limit, session.wait_connected())
        .await
        .context("gateway did not become ready in time")??;

    let outcome = session.api().send_api_timeout(api, payload, limit).await;
    session.teardown();

    let reply = outcome?;
    println!("{}", serde_json::to_string_pretty(&reply)?);
    Ok(())
}

fn print_event(event: &GatewayEvent) {
    match event {
        GatewayEvent::ConnectionStateChanged { state, epoch } => {
            println!("[state] {} (epoch {})", state, epoch)
        }
        GatewayEvent::ReconnectCountdown { remaining } => {
            println!("[reconnect] in {}s", remaining)
        }
        GatewayEvent::LatencyMeasured { millis } => println!("[latency] {} ms", millis),
        GatewayEvent::Message(message) => println!(
            "[message] #{} {}: {}",
            message.channel_id,
            message.sender_id.as_deref().unwrap_or("?"),
            message.content
        ),
        other => println!("[event] {:?}", other),
    }
}

// ============================================================================
// Config commands
// ============================================================================

fn run_config(
    config: &GatewayClientConfig,
    path: Option<PathBuf>,
    action: ConfigAction,
) -> anyhow::Result<()> {
    match action {
        ConfigAction::Show => {
            println!("{}", serde_json::to_string_pretty(config)?);
            Ok(())
        }
        ConfigAction::Validate => {
            let result = validate_config(config);
            for issue in &result.errors {
                println!("error: {}: {}", issue.path, issue.message);
                if let Some(suggestion) = &issue.suggestion {
                    println!("  hint: {}", suggestion);
                }
            }
            for issue in &result.warnings {
                println!("warning: {}: {}", issue.path, issue.message);
            }
            if !result.valid {
                bail!("configuration has {} error(s)", result.errors.len());
            }
            println!("configuration is valid");
            Ok(())
        }
        ConfigAction::Init { force } => {
            let path = path.unwrap_or_else(config_path);
            if path.exists() && !force {
                bail!("{} already exists; pass --force to overwrite", path.display());
            }
            save_config(&GatewayClientConfig::default(), &path)?;
            println!("wrote {}", path.display());
            Ok(())
        }
    }
}
