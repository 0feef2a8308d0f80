//! Inbound worker events and the channel that delivers them.

use std::time::Duration;
use tokio::sync::{mpsc, oneshot};

use crate::cache::Served;
use crate::db::FormKind;
use crate::net::{FetchRequest, HttpClient};
use color_eyre::Result;

/// Everything the host can hand the worker.
#[derive(Debug)]
pub enum WorkerEvent {
  /// Install this worker version: precache the manifest
  Install,
  /// Activate: drop stale generations and claim clients
  Activate,
  /// An intercepted request; the response goes back on `reply`
  Fetch {
    request: FetchRequest,
    reply: oneshot::Sender<Result<Served>>,
  },
  /// Connectivity restored / retry requested for one queue
  Sync { tag: String },
  /// Inbound push message, raw payload when one was attached
  Push { payload: Option<String> },
  /// A notification action was activated
  NotificationClick {
    action: String,
    data: serde_json::Value,
  },
  /// Periodic eviction tick
  Tick,
  /// Stop the run loop
  Shutdown,
}

/// Event handler that merges host-injected events with the eviction tick.
pub struct EventHandler {
  tx: mpsc::UnboundedSender<WorkerEvent>,
  rx: mpsc::UnboundedReceiver<WorkerEvent>,
}

impl EventHandler {
  /// Create a new event handler with the given eviction tick rate.
  pub fn new(tick_rate: Duration) -> Self {
    let (tx, rx) = mpsc::unbounded_channel();

    // Spawn the eviction ticker
    let tick_tx = tx.clone();
    tokio::spawn(async move {
      let mut interval = tokio::time::interval(tick_rate);
      // The immediate first tick would evict before anything is cached
      interval.tick().await;
      loop {
        interval.tick().await;
        if tick_tx.send(WorkerEvent::Tick).is_err() {
          break;
        }
      }
    });

    Self { tx, rx }
  }

  /// A handle the host (or other tasks) uses to inject events.
  pub fn sender(&self) -> mpsc::UnboundedSender<WorkerEvent> {
    self.tx.clone()
  }

  /// Receive the next event.
  pub async fn next(&mut self) -> Option<WorkerEvent> {
    self.rx.recv().await
  }
}

/// Spawn a connectivity probe that emits every registered sync tag each
/// time the probe URL transitions from unreachable back to reachable.
///
/// This is the harness stand-in for the host's background-sync scheduler;
/// retry cadence is the probe interval, nothing smarter.
pub fn spawn_connectivity_probe(
  tx: mpsc::UnboundedSender<WorkerEvent>,
  client: HttpClient,
  probe_url: String,
  every: Duration,
) {
  tokio::spawn(async move {
    let mut online = true;
    let mut interval = tokio::time::interval(every);
    loop {
      interval.tick().await;
      let reachable = client.fetch(&FetchRequest::get(&probe_url)).await.is_ok();
      if reachable && !online {
        for kind in FormKind::ALL {
          let event = WorkerEvent::Sync {
            tag: kind.sync_tag().to_string(),
          };
          if tx.send(event).is_err() {
            return;
          }
        }
      }
      online = reachable;
    }
  });
}

// ============================================================================
// Tests
// ============================================================================
