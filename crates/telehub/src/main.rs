use std::env;
use std::io::{self, IsTerminal, Write};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use log::{LevelFilter, debug, info, warn};
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;

use telehub::api::{AppState, create_router};
use telehub::bridge::{BridgeService, BridgeSettings};
use telehub::config::{self, AppConfig};
use telehub::events::EventBus;
use telehub::registry::ConnectionRegistry;

fn main() {
    if let Err(err) = try_main() {
        let _ = writeln!(io::stderr(), "{err:?}");
        std::process::exit(1);
    }
}

fn try_main() -> Result<()> {
    let cli = Cli::parse();
    let config = config::load(cli.common.config.as_deref())?;
    init_logging(&cli.common, &config)?;
    debug!("effective config: {config:?}");

    match cli.command {
        Command::Serve(cmd) => run_serve(config, cmd),
        Command::Bridge(cmd) => run_bridge(config, cmd),
        Command::Config { command } => handle_config(&cli.common, &config, command),
    }
}

#[tokio::main]
async fn run_serve(config: AppConfig, cmd: ServeCommand) -> Result<()> {
    handle_serve(config, cmd).await
}

#[tokio::main]
async fn run_bridge(config: AppConfig, cmd: BridgeCommand) -> Result<()> {
    handle_bridge(config, cmd).await
}

#[derive(Debug, Parser)]
#[command(
    author,
    version,
    about = "Telehub - robot teleoperation relay hub and bridge.",
    propagate_version = true
)]
struct Cli {
    #[command(flatten)]
    common: CommonOpts,
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Clone, Args)]
struct CommonOpts {
    /// Override the config file path
    #[arg(long, value_name = "PATH", global = true)]
    config: Option<PathBuf>,
    /// Reduce output to only errors
    #[arg(short, long, action = clap::ArgAction::SetTrue, global = true)]
    quiet: bool,
    /// Increase logging verbosity (stackable)
    #[arg(short = 'v', long = "verbose", action = clap::ArgAction::Count, global = true)]
    verbose: u8,
    /// Enable debug logging (equivalent to -v)
    #[arg(long, global = true)]
    debug: bool,
    /// Enable trace logging (overrides other levels)
    #[arg(long, global = true)]
    trace: bool,
    /// Output machine readable JSON logs
    #[arg(long, global = true)]
    json: bool,
    /// Disable ANSI colors in output
    #[arg(long = "no-color", global = true)]
    no_color: bool,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Start the relay hub server
    Serve(ServeCommand),
    /// Start the robot-side bridge client
    Bridge(BridgeCommand),
    /// Inspect configuration
    Config {
        #[command(subcommand)]
        command: ConfigCommand,
    },
}

#[derive(Debug, Clone, Args)]
struct ServeCommand {
    /// Host address to bind to (overrides config)
    #[arg(long)]
    host: Option<String>,
    /// Port to listen on (overrides config)
    #[arg(short, long)]
    port: Option<u16>,
}

#[derive(Debug, Clone, Args)]
struct BridgeCommand {
    /// Identity to register with the relay (overrides config)
    #[arg(long)]
    robot_id: Option<String>,
    /// Robot RTP endpoint IP (overrides config)
    #[arg(long)]
    robot_ip: Option<String>,
    /// Relay robot-role ingress URL (overrides config)
    #[arg(long)]
    relay_url: Option<String>,
}

#[derive(Debug, Subcommand)]
enum ConfigCommand {
    /// Output the effective configuration
    Show,
    /// Print the resolved config file path
    Path,
}

fn init_logging(common: &CommonOpts, config: &AppConfig) -> Result<()> {
    use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

    if common.quiet {
        log::set_max_level(LevelFilter::Off);
        return Ok(());
    }

    let level = effective_log_level(common, config);
    let level_str = match level {
        LevelFilter::Off => "off",
        LevelFilter::Error => "error",
        LevelFilter::Warn => "warn",
        LevelFilter::Info => "info",
        LevelFilter::Debug => "debug",
        LevelFilter::Trace => "trace",
    };

    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("telehub={level_str},tower_http={level_str}")));

    if common.json {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(tracing_subscriber::fmt::layer().json())
            .try_init()
            .ok();
    } else {
        let disable_color =
            common.no_color || env::var_os("NO_COLOR").is_some() || !io::stderr().is_terminal();
        tracing_subscriber::registry()
            .with(env_filter)
            .with(tracing_subscriber::fmt::layer().with_ansi(!disable_color))
            .try_init()
            .ok();
    }

    // Also init env_logger for compatibility with log crate users.
    let mut builder =
        env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(level_str));
    builder.filter_level(level);
    builder.try_init().ok();

    Ok(())
}

fn effective_log_level(common: &CommonOpts, config: &AppConfig) -> LevelFilter {
    if common.trace {
        LevelFilter::Trace
    } else if common.debug || common.verbose == 1 {
        LevelFilter::Debug
    } else if common.verbose > 1 {
        LevelFilter::Trace
    } else {
        match config.logging.level.as_str() {
            "off" => LevelFilter::Off,
            "error" => LevelFilter::Error,
            "warn" => LevelFilter::Warn,
            "debug" => LevelFilter::Debug,
            "trace" => LevelFilter::Trace,
            _ => LevelFilter::Info,
        }
    }
}

async fn handle_serve(config: AppConfig, cmd: ServeCommand) -> Result<()> {
    let registry = Arc::new(ConnectionRegistry::new());
    let events = EventBus::new();
    let state = AppState::new(
        registry,
        events.clone(),
        config.robot.id.clone(),
        config.server.public_base_url.clone(),
    );

    // The presentation layer is out of process here; keep a consumer on the
    // bus so event flow shows up in the logs.
    let mut event_rx = events.subscribe();
    tokio::spawn(async move {
        while let Ok(event) = event_rx.recv().await {
            debug!("hub event: {event:?}");
        }
    });

    let shutdown = state.shutdown.clone();
    let app = create_router(state);

    let host = cmd.host.unwrap_or(config.server.host);
    let port = cmd.port.unwrap_or(config.server.port);
    let addr: SocketAddr = format!("{host}:{port}").parse().context("invalid address")?;

    info!("Relay server listening on http://{addr}");

    let listener = TcpListener::bind(addr)
        .await
        .with_context(|| format!("binding to {addr}"))?;

    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            shutdown_signal().await;
            // Unblock every connection loop so open sockets close with a
            // normal close frame instead of lingering.
            shutdown.cancel();
        })
        .await
        .context("running server")?;

    info!("Relay server stopped");
    Ok(())
}

async fn handle_bridge(config: AppConfig, cmd: BridgeCommand) -> Result<()> {
    let robot_ip = cmd.robot_ip.unwrap_or(config.robot.ip);
    let settings = BridgeSettings {
        robot_id: cmd.robot_id.unwrap_or(config.robot.id),
        robot_url: format!("ws://{robot_ip}:{}", config.robot.port),
        relay_url: cmd.relay_url.unwrap_or(config.bridge.relay_url),
        telemetry_interval_ms: config.bridge.telemetry_interval_ms,
        gripper_interval_ms: config.bridge.gripper_interval_ms,
        state_interval_ms: config.bridge.state_interval_ms,
        heartbeat_interval: Duration::from_millis(config.bridge.heartbeat_interval_ms),
        retry_delay: Duration::from_millis(config.bridge.retry_delay_ms),
    };

    info!(
        "Bridge starting: robot {} relay {}",
        settings.robot_url, settings.relay_url
    );

    let cancel = CancellationToken::new();
    let bridge = BridgeService::new(settings, EventBus::new(), cancel.clone());

    let signal_cancel = cancel.clone();
    tokio::spawn(async move {
        shutdown_signal().await;
        warn!("Shutdown signal received, stopping bridge...");
        signal_cancel.cancel();
    });

    bridge.run().await;
    info!("Bridge stopped");
    Ok(())
}

fn handle_config(common: &CommonOpts, config: &AppConfig, command: ConfigCommand) -> Result<()> {
    match command {
        ConfigCommand::Show => {
            let rendered = if common.json {
                serde_json::to_string_pretty(config)?
            } else {
                toml::to_string_pretty(config)?
            };
            println!("{rendered}");
        }
        ConfigCommand::Path => {
            println!("{}", config::config_path(common.config.as_deref()).display());
        }
    }
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    info!("Shutdown signal received");
}
