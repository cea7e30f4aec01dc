use clap::{Parser, Subcommand};
use color_eyre::{eyre::eyre, Result};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::info;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::prelude::*;
use tracing_subscriber::EnvFilter;

use estate_gate::api;
use estate_gate::cache::ResourceClient;
use estate_gate::config::{Config, LogConfig};
use estate_gate::query::HealthMonitor;
use estate_gate::store::{RemoteStore, SqliteStore};

#[derive(Parser, Debug)]
#[command(name = "estate-gate")]
#[command(about = "Table-driven CRUD gateway for the estate back office")]
#[command(version)]
struct Args {
  /// Path to config file
  /// (default: ./estate-gate.yaml, then $XDG_CONFIG_HOME/estate-gate/config.yaml)
  #[arg(short, long)]
  config: Option<PathBuf>,

  #[command(subcommand)]
  command: Option<Command>,
}

#[derive(Subcommand, Debug)]
enum Command {
  /// Open the store and serve the HTTP API (default)
  Serve,
  /// Check that a running server and its store are reachable
  Check {
    /// Keep polling and report every status change until interrupted
    #[arg(short, long)]
    watch: bool,
  },
}

#[tokio::main]
async fn main() -> Result<()> {
  color_eyre::install()?;

  let args = Args::parse();
  let config = Config::load(args.config.as_deref())?;
  let _guard = init_logging(&config.log)?;

  match args.command.unwrap_or(Command::Serve) {
    Command::Serve => serve(config).await,
    Command::Check { watch } => check(config, watch).await,
  }
}

/// Log to stderr, and to `log.file` as well when configured. The returned
/// guard flushes the file writer and must live until exit.
fn init_logging(config: &LogConfig) -> Result<Option<WorkerGuard>> {
  let filter =
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("estate_gate=info"));
  let stderr = tracing_subscriber::fmt::layer().with_writer(std::io::stderr);

  let (file, guard) = match &config.file {
    Some(path) => {
      let dir = path.parent().filter(|d| !d.as_os_str().is_empty());
      let name = path
        .file_name()
        .ok_or_else(|| eyre!("log file path has no file name: {}", path.display()))?;
      let appender = tracing_appender::rolling::never(dir.unwrap_or(Path::new(".")), name);
      let (writer, guard) = tracing_appender::non_blocking(appender);
      let layer = tracing_subscriber::fmt::layer()
        .with_ansi(false)
        .with_writer(writer);
      (Some(layer), Some(guard))
    }
    None => (None, None),
  };

  tracing_subscriber::registry()
    .with(filter)
    .with(stderr)
    .with(file)
    .try_init()?;

  Ok(guard)
}

async fn serve(config: Config) -> Result<()> {
  // No store, no server
  let store = Arc::new(SqliteStore::connect(&config.store).await?);

  let addr = format!("{}:{}", config.server.bind, config.server.port);
  let listener = tokio::net::TcpListener::bind(&addr)
    .await
    .map_err(|e| eyre!("failed to bind {}: {}", addr, e))?;
  info!(addr = %addr, database = %store.database(), "serving");

  axum::serve(listener, api::router(Arc::clone(&store)))
    .with_graceful_shutdown(shutdown_signal())
    .await?;

  store.shutdown().await?;
  info!("stopped");
  Ok(())
}

async fn shutdown_signal() {
  let ctrl_c = async {
    if let Err(e) = tokio::signal::ctrl_c().await {
      tracing::warn!(error = %e, "failed to listen for ctrl-c");
      std::future::pending::<()>().await;
    }
  };

  #[cfg(unix)]
  let terminate = async {
    match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
      Ok(mut signal) => {
        signal.recv().await;
      }
      Err(e) => {
        tracing::warn!(error = %e, "failed to listen for SIGTERM");
        std::future::pending::<()>().await;
      }
    }
  };

  #[cfg(not(unix))]
  let terminate = std::future::pending::<()>();

  tokio::select! {
    _ = ctrl_c => {},
    _ = terminate => {},
  }
  info!("shutdown signal received");
}

async fn check(config: Config, watch: bool) -> Result<()> {
  let remote = RemoteStore::from_config(&config)?;
  let target = remote.base_url().to_string();
  let client = ResourceClient::new(remote)
    .with_stale_time(config.cache.stale_time())
    .with_gc_time(config.cache.gc_time());

  if watch {
    let mut last = client.check_store_health().await;
    println!("{}: {}", if last { "connected" } else { "disconnected" }, target);

    let monitor = HealthMonitor::spawn(client, config.cache.health_interval());
    let mut status = monitor.subscribe();
    let shutdown = shutdown_signal();
    tokio::pin!(shutdown);
    loop {
      tokio::select! {
        changed = status.changed() => {
          if changed.is_err() {
            break;
          }
          let connected = *status.borrow_and_update();
          if connected != last {
            println!("{}: {}", if connected { "connected" } else { "disconnected" }, target);
            last = connected;
          }
        }
        _ = &mut shutdown => break,
      }
    }
    return Ok(());
  }

  if client.check_store_health().await {
    println!("connected: {}", target);
    Ok(())
  } else {
    println!("disconnected: {}", target);
    Err(eyre!("store unreachable at {}", target))
  }
}
