//! Replay of queued form submissions once connectivity returns.

use color_eyre::Result;
use std::future::Future;
use tracing::{debug, info};

use crate::cache::CachedResponse;
use crate::db::{FormKind, PendingForm, QueueStore};

/// What a drain pass did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReplayReport {
  pub kind: FormKind,
  pub attempted: usize,
  pub delivered: usize,
  pub retained: usize,
}

/// Drain one queue partition: POST every pending record and delete the
/// ones the server accepted.
///
/// Records are processed independently; a failed POST leaves its record
/// untouched for the next sync signal and never blocks the rest. No
/// backoff is scheduled here; retry cadence belongs to the signal
/// source.
///
/// The POST itself is supplied as a closure so tests can drive the drain
/// against fakes.
pub async fn drain<Q, F, Fut>(queue: &Q, kind: FormKind, post: F) -> Result<ReplayReport>
where
  Q: QueueStore + ?Sized,
  F: Fn(PendingForm) -> Fut,
  Fut: Future<Output = Result<CachedResponse>>,
{
  let records = queue.pending(kind)?;
  let attempted = records.len();
  let mut delivered = 0;

  for record in records {
    let id = record.id;
    match post(record).await {
      Ok(response) if response.is_success() => {
        queue.remove(id)?;
        delivered += 1;
      }
      Ok(response) => {
        debug!(id, status = response.status, "Replay rejected, record retained");
      }
      Err(e) => {
        debug!(id, error = %e, "Replay failed, record retained");
      }
    }
  }

  let report = ReplayReport {
    kind,
    attempted,
    delivered,
    retained: attempted - delivered,
  };

  if report.attempted > 0 {
    info!(
      kind = kind.store_name(),
      delivered = report.delivered,
      retained = report.retained,
      "Queue drain finished"
    );
  }

  Ok(report)
}

// ============================================================================
// Tests
// ============================================================================
