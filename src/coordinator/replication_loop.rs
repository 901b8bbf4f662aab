// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! The replication loop: read a batch, filter it, apply it, repeat.
//!
//! One task, one change at a time. The only place the loop waits on the source
//! is `next_batch`, and that is also the only place a shutdown request is
//! noticed, so a batch that has started applying always finishes.
//!
//! # Failure handling
//!
//! - A change that fails to apply is classified, logged and dropped.
//! - An error from the change feed ends the loop in `Fatal`.

use super::types::{BatchSummary, LoopState, RunSummary};
use crate::applier::{ApplyOutcome, ChangeApplier};
use crate::classifier::{self, FailureAction};
use crate::error::Result;
use crate::filter::DatabaseFilter;
use crate::metrics;
use crate::stream::{lag_from_now, ChangeBatch, ChangeFeed};
use crate::target::TargetStore;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;
use tokio::sync::watch;
use tracing::{debug, error, info, trace};

/// Shared handles the loop reports through.
pub(super) struct LoopContext<'a> {
    pub state_tx: &'a watch::Sender<LoopState>,
    pub shutdown_rx: watch::Receiver<bool>,
    pub processed: &'a AtomicU64,
}

impl LoopContext<'_> {
    fn set_state(&self, state: LoopState) {
        self.state_tx.send_replace(state);
        metrics::set_loop_state(&state.to_string());
    }
}

/// Drive `feed` until shutdown or a feed error.
pub(super) async fn run_loop<F, T>(
    feed: &mut F,
    filter: &DatabaseFilter,
    applier: &ChangeApplier<T>,
    mut ctx: LoopContext<'_>,
) -> Result<RunSummary>
where
    F: ChangeFeed + ?Sized,
    T: TargetStore,
{
    let mut summary = RunSummary::default();

    loop {
        ctx.set_state(LoopState::WaitingForBatch);

        let read_start = Instant::now();
        let next = tokio::select! {
            biased;

            // Priority: check shutdown first
            _ = ctx.shutdown_rx.wait_for(|stop| *stop) => None,

            result = feed.next_batch() => Some(result),
        };

        let Some(next) = next else {
            info!(processed = summary.processed, "Shutdown signal received, stopping");
            ctx.set_state(LoopState::Stopped);
            return Ok(summary);
        };

        let batch = match next {
            Ok(batch) => batch,
            Err(e) => {
                error!(error = %e, processed = summary.processed, "Change stream failed");
                ctx.set_state(LoopState::Fatal);
                return Err(e);
            }
        };

        if batch.is_empty() {
            info!("No changes, skip...");
            metrics::record_heartbeat();
            summary.heartbeats += 1;
            continue;
        }

        metrics::record_batch_read(batch.len(), read_start.elapsed());

        let batch_summary = process_batch(&batch, filter, applier, &ctx).await;
        summary.add_batch(&batch_summary);
        if batch.resume_marker.is_some() {
            summary.last_resume_marker = batch.resume_marker.clone();
        }

        let lag = lag_from_now(batch.head_cluster_time()).unwrap_or(0);
        metrics::set_replication_lag(lag);
        let token = batch
            .resume_marker
            .as_ref()
            .map(|m| m.to_string())
            .unwrap_or_else(|| "none".to_string());
        let total = ctx.processed.load(Ordering::Relaxed);
        info!(
            lag_secs = lag,
            processed = total,
            batch = batch_summary.read,
            applied = batch_summary.applied,
            failed = batch_summary.failed,
            "{}s, {}, Token={}",
            lag,
            total,
            token
        );
    }
}

/// Filter and apply one non-empty batch, in order.
async fn process_batch<T: TargetStore>(
    batch: &ChangeBatch,
    filter: &DatabaseFilter,
    applier: &ChangeApplier<T>,
    ctx: &LoopContext<'_>,
) -> BatchSummary {
    let mut summary = BatchSummary {
        read: batch.len(),
        ..Default::default()
    };

    ctx.set_state(LoopState::Filtering);
    let survivors: Vec<_> = batch
        .events
        .iter()
        .filter(|event| {
            let keep = filter.belongs(event);
            if !keep {
                trace!(db = %event.database, op = %event.op, "Filtered out");
            }
            keep
        })
        .collect();
    summary.filtered_out = summary.read - survivors.len();
    metrics::record_events_filtered(summary.filtered_out);

    ctx.set_state(LoopState::Applying);
    for event in survivors {
        // Writes go to the configured spelling of the database
        let database = filter.resolve(&event.database).unwrap_or(event.database.as_str());
        ctx.processed.fetch_add(1, Ordering::Relaxed);

        match applier.apply(database, event).await {
            ApplyOutcome::Applied(_) => summary.applied += 1,
            ApplyOutcome::Skipped(reason) => {
                debug!(?reason, "Change skipped");
                summary.skipped += 1;
            }
            ApplyOutcome::Failed(e) => {
                let lag = lag_from_now(event.cluster_time);
                match classifier::handle_failure(&e, event, lag) {
                    FailureAction::Continue => summary.duplicates += 1,
                    FailureAction::ContinueWithWarning => summary.failed += 1,
                }
            }
        }
    }
    metrics::record_events_processed(summary.processed());

    summary
}
