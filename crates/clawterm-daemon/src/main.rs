//! clawterm Daemon
//!
//! Shares one tmux session with any number of browser viewers over
//! WebSocket, records transcripts and raises alerts on notable output.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use tracing::{info, warn};

use clawterm_core::config::{Config, load_config, load_dotenv};
use clawterm_daemon::archive::FileArchive;
use clawterm_daemon::backend::TmuxBackend;
use clawterm_daemon::bridge::{BridgeConfig, BridgeController};
use clawterm_daemon::notify::{self, run_alert_fanout};
use clawterm_daemon::server::{AppState, build_router};
use clawterm_daemon::summarizer::Summarizer;
use clawterm_daemon::transcript::TranscriptLog;
use clawterm_daemon::watcher::PatternWatcher;

#[derive(Parser, Debug)]
#[command(name = "clawterm-daemon")]
#[command(version, about = "clawterm daemon - shared web terminal for a tmux session")]
struct Args {
    /// Settings file (defaults to ~/.config/clawterm/settings.json)
    #[arg(long, env = "CLAWTERM_CONFIG")]
    config: Option<PathBuf>,

    /// Listen address
    #[arg(long)]
    host: Option<String>,

    /// Listen port
    #[arg(long)]
    port: Option<u16>,

    /// tmux session to share
    #[arg(long)]
    session: Option<String>,

    /// Directory of static viewer assets
    #[arg(long)]
    public_dir: Option<PathBuf>,

    /// Log level filter for the daemon (e.g. "info", "debug", "warn").
    #[arg(long)]
    log_level: Option<String>,

    /// Output logs as JSON (for structured log aggregation).
    #[arg(long, env = "CLAWTERM_LOG_JSON")]
    log_json: bool,
}

impl Args {
    /// CLI flags take precedence over every other layer.
    fn apply(self, config: &mut Config) {
        if let Some(host) = self.host {
            config.daemon.host = host;
        }
        if let Some(port) = self.port {
            config.daemon.port = port;
        }
        if let Some(session) = self.session {
            config.session.session_name = session;
        }
        if let Some(dir) = self.public_dir {
            config.daemon.public_dir = dir;
        }
        if let Some(level) = self.log_level {
            config.daemon.log_level = level;
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    let log_json = args.log_json;
    let dotenv_error = load_dotenv();
    let mut config = load_config(args.config.as_deref()).context("Failed to load configuration")?;
    args.apply(&mut config);

    clawterm_core::tracing_init::init_tracing(
        &clawterm_core::tracing_init::default_directive("clawterm_daemon", &config.daemon.log_level),
        log_json,
    );
    if let Some(e) = dotenv_error {
        warn!(error = %e, "Ignoring unreadable .env file");
    }

    let addr: SocketAddr = format!("{}:{}", config.daemon.host, config.daemon.port)
        .parse()
        .context("Invalid listen address")?;
    let logs_dir = config.storage.logs_dir();
    let summaries_dir = config.storage.summaries_dir();

    info!(
        version = env!("CARGO_PKG_VERSION"),
        %addr,
        session = %config.session.session_name,
        logs_dir = %logs_dir.display(),
        "Starting clawterm-daemon"
    );

    let backend = Arc::new(TmuxBackend::new(&config.session));
    let bridge = BridgeController::new(backend, BridgeConfig::from(&config.session));

    // Subscribers attach before the first output can be produced.
    let watcher = PatternWatcher::from_config(&config.watcher);
    let alerts = watcher.subscribe();
    tokio::spawn(watcher.run(bridge.subscribe_output()));
    tokio::spawn(TranscriptLog::new(&logs_dir).run(bridge.subscribe_output()));
    tokio::spawn(run_alert_fanout(
        alerts,
        bridge.clone(),
        notify::from_config(&config.notifier),
    ));

    let summarizer = Summarizer::new(&config.summarizer, &logs_dir, &summaries_dir)?;
    let state = AppState::new(bridge.clone(), summarizer, FileArchive::new(&logs_dir, "log"));
    let app = build_router(state, &config.daemon.public_dir);

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind {addr}"))?;

    // The `true` parameter unsets $NOTIFY_SOCKET so a tmux server started
    // by the bridge does not inherit it.
    #[cfg(unix)]
    sd_notify::notify(true, &[sd_notify::NotifyState::Ready])?;

    bridge.spawn().await;

    info!(%addr, "Listening");
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    bridge.destroy().await;
    info!("Daemon stopped");
    Ok(())
}

async fn shutdown_signal() {
    #[cfg(unix)]
    let sigterm = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                warn!(error = %e, "Cannot listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };
    #[cfg(not(unix))]
    let sigterm = std::future::pending::<()>();

    tokio::select! {
        _ = tokio::signal::ctrl_c() => info!("Received Ctrl+C shutdown signal"),
        () = sigterm => info!("Received SIGTERM shutdown signal"),
    }
}
