#![forbid(unsafe_code)]

//! `queue-autopilot` binary.
//!
//! Loads configuration, opens the queue database, starts the orchestrator
//! and reads operator commands from stdin until `quit` or a shutdown
//! signal.

use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, ValueEnum};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tracing_subscriber::{fmt, EnvFilter};

use queue_autopilot::console::{self, Outcome};
use queue_autopilot::notify::{RemoteNotifier, UiPublisher, WebhookNotifier};
use queue_autopilot::orchestrator::{self, OrchestratorDeps};
use queue_autopilot::persistence::{db, QueueStore, SqliteStore};
use queue_autopilot::{AppError, GlobalConfig, Result};

#[derive(Debug, Copy, Clone, Eq, PartialEq, ValueEnum)]
enum LogFormat {
    Text,
    Json,
}

#[derive(Debug, Parser)]
#[command(name = "queue-autopilot", about = "Queue-driven autopilot for an AI coding CLI", version, long_about = None)]
struct Cli {
    /// Path to the TOML configuration file. Defaults apply when omitted.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Log output format (text or json).
    #[arg(long, value_enum, default_value_t = LogFormat::Text)]
    log_format: LogFormat,

    /// Override the workspace root the CLI runs in.
    #[arg(long)]
    workspace: Option<PathBuf>,

    /// Path to the queue database.
    ///
    /// Defaults to `.queue-autopilot/queue.db` under the workspace root.
    #[arg(long)]
    db: Option<PathBuf>,

    /// Echo the CLI's raw terminal output.
    #[arg(long)]
    show_output: bool,
}

fn main() -> Result<()> {
    let args = Cli::parse();
    init_tracing(args.log_format)?;
    info!("queue-autopilot bootstrap");

    tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .map_err(|err| AppError::Config(format!("failed to build tokio runtime: {err}")))?
        .block_on(run(args))
}

async fn run(args: Cli) -> Result<()> {
    // ── Load configuration ──────────────────────────────
    let mut config = match &args.config {
        Some(path) => GlobalConfig::load_from_path(path)?,
        None => GlobalConfig::default(),
    };
    if let Some(ws) = args.workspace {
        config.session.workspace_root = Some(ws);
    }
    config.validate()?;
    let config = Arc::new(config);
    info!(workspace = %config.workspace_key()?, "configuration loaded");

    // ── Initialize database ─────────────────────────────
    let db_path = match args.db {
        Some(path) => path,
        None => config
            .workspace_root()?
            .join(".queue-autopilot")
            .join("queue.db"),
    };
    let db = Arc::new(db::connect(&db_path).await?);
    info!(path = %db_path.display(), "database connected");
    let store: Arc<dyn QueueStore> = Arc::new(SqliteStore::new(db));

    // ── Remote notifier ─────────────────────────────────
    let remote = WebhookNotifier::from_config(&config.remote)?.map(|notifier| {
        info!(url = notifier.url(), "webhook notifier enabled");
        Arc::new(notifier) as Arc<dyn RemoteNotifier>
    });

    // ── Start orchestrator ──────────────────────────────
    let ui = UiPublisher::new();
    let ct = CancellationToken::new();
    let render_handle = tokio::spawn(render_events(ui.subscribe(), args.show_output, ct.clone()));

    let (handle, orchestrator_task) = orchestrator::spawn(
        OrchestratorDeps {
            config: Arc::clone(&config),
            store: Some(store),
            remote,
            ui,
        },
        ct.clone(),
    )?;
    info!("orchestrator started; type `help` for commands");

    // ── Operator console ────────────────────────────────
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let shutdown = shutdown_signal();
    tokio::pin!(shutdown);

    loop {
        tokio::select! {
            () = &mut shutdown => {
                info!("shutdown signal received");
                break;
            }
            line = lines.next_line() => {
                let line = match line {
                    Ok(Some(line)) => line,
                    Ok(None) => {
                        info!("stdin closed");
                        break;
                    }
                    Err(err) => {
                        error!(%err, "failed to read stdin");
                        break;
                    }
                };
                if line.trim().is_empty() {
                    continue;
                }
                let command = match console::parse_line(&line) {
                    Ok(command) => command,
                    Err(err) => {
                        println!("{err}");
                        continue;
                    }
                };
                match console::execute(&handle, command).await {
                    Ok(Outcome::Continue(Some(reply))) => println!("{reply}"),
                    Ok(Outcome::Continue(None)) => {}
                    Ok(Outcome::Quit) => break,
                    Err(err) => println!("{err}"),
                }
            }
        }
    }

    // ── Graceful shutdown ───────────────────────────────
    ct.cancel();
    if let Err(err) = orchestrator_task.await {
        warn!(%err, "orchestrator task ended abnormally");
    }
    let _ = render_handle.await;
    info!("queue-autopilot shut down");
    Ok(())
}

async fn render_events(
    mut events: broadcast::Receiver<queue_autopilot::notify::UiEvent>,
    show_output: bool,
    ct: CancellationToken,
) {
    loop {
        tokio::select! {
            biased;
            () = ct.cancelled() => break,
            event = events.recv() => match event {
                Ok(event) => {
                    if let Some(text) = console::render_event(&event, show_output) {
                        println!("{text}");
                    }
                }
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    warn!(skipped, "console fell behind ui events");
                }
                Err(broadcast::error::RecvError::Closed) => break,
            },
        }
    }
}

async fn shutdown_signal() {
    let ctrl_c = tokio::signal::ctrl_c();

    #[cfg(unix)]
    {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                tokio::select! {
                    _ = ctrl_c => {}
                    _ = sigterm.recv() => {}
                }
            }
            Err(err) => {
                tracing::warn!(%err, "failed to register SIGTERM handler, using ctrl-c only");
                let _ = ctrl_c.await;
            }
        }
    }

    #[cfg(not(unix))]
    {
        if let Err(err) = ctrl_c.await {
            tracing::error!(%err, "ctrl-c signal handler failed");
        }
    }
}

fn init_tracing(log_format: LogFormat) -> Result<()> {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let subscriber = fmt()
        .with_env_filter(env_filter)
        .with_writer(std::io::stderr);

    match log_format {
        LogFormat::Text => subscriber
            .try_init()
            .map_err(|err| AppError::Config(format!("failed to init tracing: {err}")))?,
        LogFormat::Json => subscriber
            .json()
            .try_init()
            .map_err(|err| AppError::Config(format!("failed to init tracing: {err}")))?,
    }

    Ok(())
}
