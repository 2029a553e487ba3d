//! Startup replay of events persisted while nothing was listening.
//!
//! Every attempted row is marked processed whether or not its emit succeeded;
//! the emit error, if any, is stored on the row.

use std::fmt::Display;
use std::future::Future;
use std::time::Duration;

use reconflow_core::{Event, EventLogStore};

/// Outcome of one sweep.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RecoveryReport {
    pub fetched: usize,
    pub emitted: usize,
    pub failed: usize,
}

/// Re-emit up to `batch` unprocessed rows in creation order, pausing `delay`
/// between rows.
pub async fn recover_events<F, Fut, E>(
    log: &dyn EventLogStore,
    emit: F,
    batch: usize,
    delay: Duration,
) -> RecoveryReport
where
    F: Fn(Event) -> Fut,
    Fut: Future<Output = Result<usize, E>>,
    E: Display,
{
    let mut report = RecoveryReport::default();

    let rows = match log.list_unprocessed(batch).await {
        Ok(rows) => rows,
        Err(e) => {
            tracing::warn!("⚠️ Event recovery skipped, cannot list unprocessed events: {e}");
            return report;
        }
    };
    report.fetched = rows.len();
    if rows.is_empty() {
        tracing::debug!("No unprocessed events to recover");
        return report;
    }
    tracing::info!("♻️ Recovering {} unprocessed event(s)", rows.len());

    for (i, row) in rows.iter().enumerate() {
        if i > 0 && !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }

        let error = match emit(row.to_event()).await {
            Ok(matched) => {
                report.emitted += 1;
                tracing::debug!("Recovered event {} ({}) matched {matched} trigger(s)", row.id, row.topic);
                None
            }
            Err(e) => {
                report.failed += 1;
                tracing::warn!("⚠️ Recovered event {} ({}) failed to emit: {e}", row.id, row.topic);
                Some(e.to_string())
            }
        };

        if let Err(e) = log.mark_processed(row.id, error.as_deref()).await {
            tracing::warn!("⚠️ Failed to mark event {} processed: {e}", row.id);
        }
    }

    tracing::info!(
        "♻️ Event recovery done: {} emitted, {} failed",
        report.emitted,
        report.failed
    );
    report
}
