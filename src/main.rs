mod app;
mod cache;
mod config;
mod db;
mod event;
mod lifecycle;
mod net;
mod notify;
mod router;
mod sync;

use clap::{Parser, Subcommand};
use color_eyre::{eyre::eyre, Result};
use std::io;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use app::Worker;
use cache::SqliteStorage;
use db::SqliteQueue;
use event::{spawn_connectivity_probe, EventHandler, WorkerEvent};
use net::HttpClient;
use notify::{ClientSurface, LogSurface};

#[derive(Parser, Debug)]
#[command(name = "sitekeeper")]
#[command(about = "Offline cache worker for a static site")]
#[command(version)]
struct Args {
  /// Path to config file (default: $XDG_CONFIG_HOME/sitekeeper/config.yaml)
  #[arg(short, long)]
  config: Option<PathBuf>,

  #[command(subcommand)]
  command: Option<Command>,
}

#[derive(Subcommand, Debug)]
enum Command {
  /// Install, activate, then serve events until interrupted
  Run,
  /// Precache the manifest and activate once, then exit
  Warm,
  /// Drain one queue partition now
  Replay {
    /// Sync tag of the queue to drain (e.g. contact-form-sync)
    #[arg(short, long)]
    tag: String,
  },
}

/// Initialize the tracing subscriber for logging.
/// Use RUST_LOG to control the level (e.g. RUST_LOG=debug).
fn init_tracing() {
  let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

  tracing_subscriber::registry()
    .with(fmt::layer().with_writer(io::stderr))
    .with(filter)
    .init();
}

#[tokio::main]
async fn main() -> Result<()> {
  color_eyre::install()?;
  init_tracing();

  let args = Args::parse();
  let config = config::Config::load(args.config.as_deref())?;

  let storage = Arc::new(SqliteStorage::open(config.data_dir.as_deref())?);
  let queue = Arc::new(SqliteQueue::open(config.data_dir.as_deref())?);
  let net = HttpClient::new()?;
  let surface: Arc<dyn ClientSurface> = Arc::new(LogSurface);

  let mut worker = Worker::new(
    config.clone(),
    storage,
    queue,
    net.clone(),
    surface,
  );

  match args.command.unwrap_or(Command::Run) {
    Command::Run => {
      let events = EventHandler::new(Duration::from_secs(config.eviction_interval_secs));
      let tx = events.sender();

      // A fresh run behaves like a (re)install
      let _ = tx.send(WorkerEvent::Install);
      let _ = tx.send(WorkerEvent::Activate);

      spawn_connectivity_probe(
        tx.clone(),
        net,
        config.probe_url(),
        Duration::from_secs(config.probe_interval_secs),
      );

      let shutdown_tx = tx;
      tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
          let _ = shutdown_tx.send(WorkerEvent::Shutdown);
        }
      });

      info!(origin = %config.origin, "Worker running");
      worker.run(events).await
    }
    Command::Warm => {
      worker.handle_event(WorkerEvent::Install).await?;
      worker.handle_event(WorkerEvent::Activate).await?;
      Ok(())
    }
    Command::Replay { tag } => match worker.handle_sync(&tag).await? {
      Some(report) => {
        info!(
          delivered = report.delivered,
          retained = report.retained,
          "Replay finished"
        );
        Ok(())
      }
      None => Err(eyre!("Unknown sync tag: {}", tag)),
    },
  }
}
