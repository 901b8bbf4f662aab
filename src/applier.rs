// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Change applier: one change in, one target write out.
//!
//! # Mapping
//!
//! | Change | Target write |
//! |--------|--------------|
//! | `insert` | insert `fullDocument` |
//! | `delete` | delete where `_id` = `documentKey._id` |
//! | `update`, `replace` | replace where `_id` = `fullDocument._id`, upsert |
//! | anything else | nothing (logged, skipped) |
//!
//! The `_id` used in delete/replace filters is shaped by [`IdMatch`]: by
//! default its string form, so an ObjectId `_id` is compared as its hex text.
//!
//! # Deadlines and retry
//!
//! Each attempt runs in its own target transaction under the configured
//! timeout. A timed-out attempt's future is dropped, which aborts its
//! transaction, so the target never sees a partial write. With
//! `max_attempts > 1`, retryable failures get further attempts after a
//! backoff; duplicate keys and invalid events never do.

use crate::config::{ApplyConfig, IdMatch};
use crate::error::{ReplicationError, Result};
use crate::metrics;
use crate::resilience::RetryConfig;
use crate::stream::{ChangeEvent, ChangeOp};
use crate::target::{Namespace, TargetStore, WriteAck, WriteKind, WriteOp};
use mongodb::bson::Bson;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

/// Why a change was deliberately not applied.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SkipReason {
    /// Operation type this tool doesn't replicate (drop, rename, ...).
    UnknownOperation(String),
}

/// Result of applying one change.
#[derive(Debug)]
pub enum ApplyOutcome {
    /// The write committed on the target.
    Applied(WriteKind),
    /// Nothing was written, on purpose.
    Skipped(SkipReason),
    /// The write did not commit. Never fatal to the loop.
    Failed(ReplicationError),
}

impl ApplyOutcome {
    pub fn is_applied(&self) -> bool {
        matches!(self, ApplyOutcome::Applied(_))
    }
}

/// String form of an `_id`: strings as-is, ObjectIds as hex, numbers in
/// decimal, anything else as relaxed extended JSON.
pub fn id_string(id: &Bson) -> String {
    match id {
        Bson::String(s) => s.clone(),
        Bson::ObjectId(oid) => oid.to_hex(),
        Bson::Int32(n) => n.to_string(),
        Bson::Int64(n) => n.to_string(),
        Bson::Double(n) => n.to_string(),
        other => other.clone().into_relaxed_extjson().to_string(),
    }
}

/// The `_id` value to put in a target filter.
pub fn filter_id(id: &Bson, id_match: IdMatch) -> Bson {
    match id_match {
        IdMatch::StringForm => Bson::String(id_string(id)),
        IdMatch::Native => id.clone(),
    }
}

/// Map a change to the write it should cause.
///
/// `Ok(None)` for operation types that aren't replicated.
pub fn plan_write(event: &ChangeEvent, id_match: IdMatch) -> Result<Option<WriteOp>> {
    match event.op {
        ChangeOp::Insert => {
            let document = event.full_document.clone().ok_or_else(|| {
                ReplicationError::InvalidEvent("insert without fullDocument".into())
            })?;
            Ok(Some(WriteOp::Insert { document }))
        }
        ChangeOp::Delete => {
            let id = event.key_id().ok_or_else(|| {
                ReplicationError::InvalidEvent("delete without documentKey._id".into())
            })?;
            Ok(Some(WriteOp::Delete {
                id: filter_id(id, id_match),
            }))
        }
        ChangeOp::Update | ChangeOp::Replace => {
            let document = event.full_document.clone().ok_or_else(|| {
                ReplicationError::InvalidEvent(format!(
                    "{} without fullDocument (document deleted before lookup?)",
                    event.op
                ))
            })?;
            let id = document.get("_id").ok_or_else(|| {
                ReplicationError::InvalidEvent(format!("{} fullDocument has no _id", event.op))
            })?;
            Ok(Some(WriteOp::Upsert {
                id: filter_id(id, id_match),
                document,
            }))
        }
        ChangeOp::Unknown(_) => Ok(None),
    }
}

/// Applies changes to a [`TargetStore`], one at a time.
pub struct ChangeApplier<T: TargetStore> {
    target: Arc<T>,
    timeout: Duration,
    retry: RetryConfig,
    id_match: IdMatch,
}

impl<T: TargetStore> ChangeApplier<T> {
    pub fn new(target: Arc<T>, config: &ApplyConfig) -> Self {
        Self {
            target,
            timeout: config.timeout_duration(),
            retry: config.retry_config(),
            id_match: config.id_match,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_id_match(mut self, id_match: IdMatch) -> Self {
        self.id_match = id_match;
        self
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    pub fn target(&self) -> &Arc<T> {
        &self.target
    }

    /// Apply one change to `database` on the target. Always returns; failures
    /// come back as [`ApplyOutcome::Failed`].
    ///
    /// `database` is the configured spelling the change resolved to, which may
    /// differ in case from `event.database`.
    pub async fn apply(&self, database: &str, event: &ChangeEvent) -> ApplyOutcome {
        let op = match plan_write(event, self.id_match) {
            Ok(Some(op)) => op,
            Ok(None) => {
                let name = event.op.as_str().to_string();
                warn!(
                    op = %name,
                    db = %event.database,
                    coll = %event.collection,
                    "Unknown type={}, skipping",
                    name
                );
                metrics::record_unknown_op(&name);
                return ApplyOutcome::Skipped(SkipReason::UnknownOperation(name));
            }
            Err(e) => return ApplyOutcome::Failed(e),
        };

        let ns = Namespace::new(database, &event.collection);
        let kind = op.kind();
        let max_attempts = self.retry.max_attempts.max(1);
        let mut attempt = 1;

        loop {
            let started = Instant::now();
            match self.execute_once(&ns, op.clone()).await {
                Ok(ack) => {
                    metrics::record_event_applied(kind.as_str(), started.elapsed());
                    debug!(
                        ns = %ns,
                        op = kind.as_str(),
                        affected = ack.affected,
                        upserted = ack.upserted,
                        attempt,
                        "Change applied"
                    );
                    return ApplyOutcome::Applied(kind);
                }
                Err(e) if attempt < max_attempts && e.is_retryable() => {
                    let delay = self.retry.delay_for_attempt(attempt);
                    metrics::record_apply_retry(e.kind_label());
                    debug!(
                        ns = %ns,
                        attempt,
                        max_attempts,
                        delay_ms = delay.as_millis() as u64,
                        error = %e,
                        "Apply failed, retrying"
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(e) => return ApplyOutcome::Failed(e),
            }
        }
    }

    async fn execute_once(&self, ns: &Namespace, op: WriteOp) -> Result<WriteAck> {
        match tokio::time::timeout(self.timeout, self.target.execute(ns, op)).await {
            Ok(Ok(ack)) => Ok(ack),
            Ok(Err(e)) => Err(e.into()),
            Err(_) => Err(ReplicationError::ApplyTimeout(self.timeout)),
        }
    }
}
