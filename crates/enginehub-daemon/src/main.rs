//! enginehub Daemon
//!
//! Serves one WebSocket session per client, each bridged to its own engine
//! subprocess, plus a small status page with live session counts.

use std::net::{IpAddr, SocketAddr};
use std::path::PathBuf;

use clap::Parser;
use tokio::sync::watch;
use tracing::info;

use enginehub_core::config::load_config;
use enginehub_core::tracing_init::{LogFormat, init_tracing};
use enginehub_daemon::server::{EngineServer, ServerConfig};

#[derive(Parser, Debug)]
#[command(name = "enginehub-daemon")]
#[command(version, about = "enginehub daemon - WebSocket gateway to engine subprocesses")]
struct Args {
    /// Settings file (JSON). Defaults to the global settings file if present.
    #[arg(long, env = "ENGINEHUB_CONFIG")]
    config: Option<PathBuf>,

    /// Bind host, overriding the settings file.
    #[arg(long, env = "ENGINEHUB_HOST")]
    host: Option<IpAddr>,

    /// Bind port, overriding the settings file.
    #[arg(long)]
    port: Option<u16>,

    /// Maximum concurrent sessions (0 = unlimited), overriding the settings file.
    #[arg(long)]
    max_sessions: Option<usize>,

    /// Log level filter for the daemon (e.g. "info", "debug", "warn").
    #[arg(long)]
    log_level: Option<String>,

    /// Log output format.
    #[arg(long, default_value = "full", env = "ENGINEHUB_LOG_FORMAT", value_parser = parse_log_format)]
    log_format: LogFormat,
}

fn parse_log_format(raw: &str) -> Result<LogFormat, String> {
    match raw {
        "full" => Ok(LogFormat::Full),
        "compact" => Ok(LogFormat::Compact),
        "json" => Ok(LogFormat::Json),
        other => Err(format!("unknown log format {other:?} (full, compact, json)")),
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let mut config = load_config(args.config.as_deref())?;
    if let Some(port) = args.port {
        config.server.port = port;
    }
    if let Some(max) = args.max_sessions {
        config.server.max_sessions = max;
    }
    if let Some(level) = args.log_level {
        config.server.log_level = level;
    }

    let level = &config.server.log_level;
    init_tracing(
        &format!("enginehub_daemon={level},enginehub_core={level}"),
        args.log_format,
    )?;

    let host = match args.host {
        Some(host) => host,
        None => config.server.bind_host.parse()?,
    };
    let addr = SocketAddr::new(host, config.server.port);

    info!(
        version = env!("CARGO_PKG_VERSION"),
        %addr,
        families = config.engines.len(),
        max_sessions = config.server.max_sessions,
        poll_interval_ms = config.server.poll_interval_ms,
        "Starting enginehub-daemon"
    );

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let server_config = ServerConfig::from_config(&config, addr);
    let listener = tokio::net::TcpListener::bind(server_config.addr).await?;
    let server = EngineServer::new(server_config, config.route_table(), shutdown_rx.clone());

    #[cfg(unix)]
    let mut sigterm = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())?;

    tokio::spawn(async move {
        #[cfg(unix)]
        let sigterm_future = sigterm.recv();
        #[cfg(not(unix))]
        let sigterm_future = std::future::pending::<Option<()>>();

        tokio::select! {
            _ = tokio::signal::ctrl_c() => info!("Received Ctrl+C shutdown signal"),
            _ = sigterm_future => info!("Received SIGTERM shutdown signal"),
        }
        let _ = shutdown_tx.send(true);
    });

    let mut server_shutdown = shutdown_rx;
    let signal = async move {
        let _ = server_shutdown.wait_for(|stopping| *stopping).await;
    };

    // Notify systemd that the daemon is ready to serve (unix only).
    #[cfg(unix)]
    sd_notify::notify(true, &[sd_notify::NotifyState::Ready])?;

    server.serve_listener(listener, signal).await?;

    info!("Daemon stopped");
    Ok(())
}
