// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Change stream consumer for the source cluster.
//!
//! Opens a cluster-wide change stream at a fixed operation time and hands out
//! the events in bounded batches, each with the resume token that was current
//! when the batch closed.
//!
//! # Batching
//!
//! The driver buffers whole server batches and `next_if_any` only goes back to
//! the server once that buffer is drained. A batch here ends when it reaches
//! `batch_size`, when a server round-trip comes back empty, or once it has
//! held its first change for `batch_linger`. The linger keeps a steady trickle
//! of changes, where every round-trip returns something, from holding a batch
//! open until it fills. An empty [`ChangeBatch`] means "nothing new during the
//! await window" and is a heartbeat, not an error.
//!
//! # Failure
//!
//! Any error from the driver, or the server closing the cursor, is returned as
//! a fatal [`ReplicationError`]. The stream is never reopened from its resume
//! token; a restart replays from the configured lookback window.

use crate::config::StreamConfig;
use crate::error::{ReplicationError, Result};
use chrono::{DateTime, Utc};
use mongodb::bson::{Bson, Document, Timestamp};
use mongodb::change_stream::event::{ChangeStreamEvent, OperationType, ResumeToken};
use mongodb::change_stream::ChangeStream;
use mongodb::options::FullDocumentType;
use mongodb::Client;
use std::future::Future;
use std::pin::Pin;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, trace};

/// Change operation type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChangeOp {
    Insert,
    Update,
    Replace,
    Delete,
    /// Anything else the server reports (drop, rename, invalidate, ...).
    Unknown(String),
}

impl ChangeOp {
    pub fn as_str(&self) -> &str {
        match self {
            ChangeOp::Insert => "insert",
            ChangeOp::Update => "update",
            ChangeOp::Replace => "replace",
            ChangeOp::Delete => "delete",
            ChangeOp::Unknown(name) => name,
        }
    }
}

impl std::fmt::Display for ChangeOp {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl From<&OperationType> for ChangeOp {
    fn from(op: &OperationType) -> Self {
        match op {
            OperationType::Insert => ChangeOp::Insert,
            OperationType::Update => ChangeOp::Update,
            OperationType::Replace => ChangeOp::Replace,
            OperationType::Delete => ChangeOp::Delete,
            OperationType::Other(name) => ChangeOp::Unknown(name.clone()),
            other => ChangeOp::Unknown(format!("{:?}", other).to_lowercase()),
        }
    }
}

/// Opaque position in the source change stream.
///
/// Held as the raw BSON the server sent so it could be handed back as
/// `resumeAfter`; displayed as relaxed extended JSON for operators.
#[derive(Debug, Clone, PartialEq)]
pub struct ResumeMarker(pub Bson);

impl ResumeMarker {
    /// Capture a driver resume token.
    pub fn from_token(token: &ResumeToken) -> Option<Self> {
        mongodb::bson::to_bson(token).ok().map(ResumeMarker)
    }
}

impl std::fmt::Display for ResumeMarker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0.clone().into_relaxed_extjson())
    }
}

/// A single captured mutation.
#[derive(Debug, Clone)]
pub struct ChangeEvent {
    pub op: ChangeOp,
    pub database: String,
    pub collection: String,
    /// `{ _id: ... }` of the affected document (plus shard key, if any).
    pub document_key: Option<Document>,
    /// Post-image for insert/update/replace.
    pub full_document: Option<Document>,
    pub cluster_time: Option<Timestamp>,
    pub resume_token: Option<ResumeMarker>,
}

impl ChangeEvent {
    /// `_id` from the document key, if present.
    pub fn key_id(&self) -> Option<&Bson> {
        self.document_key.as_ref().and_then(|k| k.get("_id"))
    }

    /// Relaxed extended JSON of the whole event, for failure reports.
    pub fn to_extjson(&self) -> String {
        let mut body = Document::new();
        body.insert("operationType", self.op.as_str());
        body.insert("ns", mongodb::bson::doc! { "db": &self.database, "coll": &self.collection });
        if let Some(ref key) = self.document_key {
            body.insert("documentKey", key.clone());
        }
        if let Some(ref doc) = self.full_document {
            body.insert("fullDocument", doc.clone());
        }
        if let Some(ts) = self.cluster_time {
            body.insert("clusterTime", ts);
        }
        Bson::Document(body).into_relaxed_extjson().to_string()
    }
}

impl From<ChangeStreamEvent<Document>> for ChangeEvent {
    fn from(event: ChangeStreamEvent<Document>) -> Self {
        let (database, collection) = match event.ns {
            Some(ns) => (ns.db, ns.coll.unwrap_or_default()),
            None => (String::new(), String::new()),
        };
        Self {
            op: ChangeOp::from(&event.operation_type),
            database,
            collection,
            document_key: event.document_key,
            full_document: event.full_document,
            cluster_time: event.cluster_time,
            resume_token: ResumeMarker::from_token(&event.id),
        }
    }
}

/// One batch from the change feed.
#[derive(Debug, Clone, Default)]
pub struct ChangeBatch {
    /// Events in source order.
    pub events: Vec<ChangeEvent>,
    /// Stream position after the last event of this batch.
    pub resume_marker: Option<ResumeMarker>,
}

impl ChangeBatch {
    pub fn new(events: Vec<ChangeEvent>, resume_marker: Option<ResumeMarker>) -> Self {
        Self {
            events,
            resume_marker,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    /// Cluster time of the first event, used for lag reporting.
    pub fn head_cluster_time(&self) -> Option<Timestamp> {
        self.events.first().and_then(|e| e.cluster_time)
    }
}

/// Boxed future returned by [`ChangeFeed::next_batch`].
pub type FeedFuture<'a> = Pin<Box<dyn Future<Output = Result<ChangeBatch>> + Send + 'a>>;

/// An ordered source of change batches.
///
/// `next_batch` is the loop's only suspension point upstream of applying.
/// Any `Err` it returns is treated as fatal.
pub trait ChangeFeed: Send {
    fn next_batch(&mut self) -> FeedFuture<'_>;
}

/// Boxed future returned by [`ChangeCursor::next_change`].
type ChangeFuture<'a> = Pin<Box<dyn Future<Output = Result<Option<ChangeEvent>>> + Send + 'a>>;

/// One change at a time from an open stream.
///
/// `Ok(None)` means a round-trip to the server came back empty.
trait ChangeCursor: Send {
    fn next_change(&mut self) -> ChangeFuture<'_>;
}

impl ChangeCursor for ChangeStream<ChangeStreamEvent<Document>> {
    fn next_change(&mut self) -> ChangeFuture<'_> {
        Box::pin(async move {
            match self.next_if_any().await {
                Ok(event) => Ok(event.map(ChangeEvent::from)),
                Err(e) => Err(ReplicationError::source("getMore", e)),
            }
        })
    }
}

/// Read up to `batch_size` changes, stopping early on an empty round-trip or
/// once the first change has waited `linger`.
async fn fill_batch<C>(cursor: &mut C, batch_size: usize, linger: Duration) -> Result<Vec<ChangeEvent>>
where
    C: ChangeCursor + ?Sized,
{
    let mut events = Vec::new();
    let mut first_at: Option<Instant> = None;

    while events.len() < batch_size {
        if first_at.is_some_and(|t| t.elapsed() >= linger) {
            break;
        }
        match cursor.next_change().await? {
            Some(event) => {
                trace!(
                    op = %event.op,
                    db = %event.database,
                    coll = %event.collection,
                    "Received change event"
                );
                first_at.get_or_insert_with(Instant::now);
                events.push(event);
            }
            None => break,
        }
    }

    Ok(events)
}

/// Cluster-wide MongoDB change stream.
pub struct MongoChangeFeed {
    stream: ChangeStream<ChangeStreamEvent<Document>>,
    batch_size: usize,
    linger: Duration,
}

impl MongoChangeFeed {
    /// Open the change stream at `start_at` with full documents on update.
    pub async fn open(client: &Client, start_at: Timestamp, config: &StreamConfig) -> Result<Self> {
        let mut watch = client
            .watch()
            .full_document(FullDocumentType::UpdateLookup)
            .start_at_operation_time(start_at)
            .batch_size(config.batch_size as u32);
        if let Some(max_await) = config.max_await_duration() {
            watch = watch.max_await_time(max_await);
        }

        let stream = watch
            .await
            .map_err(|e| ReplicationError::source("watch", e))?;

        let linger = config.batch_linger_duration();
        debug!(
            start_time = start_at.time,
            batch_size = config.batch_size,
            linger_ms = linger.as_millis() as u64,
            "Change stream opened"
        );

        Ok(Self {
            stream,
            batch_size: config.batch_size,
            linger,
        })
    }

    async fn read_batch(&mut self) -> Result<ChangeBatch> {
        let events = fill_batch(&mut self.stream, self.batch_size, self.linger).await?;

        if events.is_empty() && !self.stream.is_alive() {
            return Err(ReplicationError::StreamClosed(
                "server closed the change stream cursor".to_string(),
            ));
        }

        let resume_marker = self
            .stream
            .resume_token()
            .as_ref()
            .and_then(ResumeMarker::from_token);

        Ok(ChangeBatch::new(events, resume_marker))
    }
}

impl ChangeFeed for MongoChangeFeed {
    fn next_batch(&mut self) -> FeedFuture<'_> {
        Box::pin(self.read_batch())
    }
}

/// Operation time `lookback_hours` before `now`, as the server expects it.
pub fn start_timestamp(now: DateTime<Utc>, lookback_hours: u32) -> Timestamp {
    let start = now.timestamp() - i64::from(lookback_hours) * 3600;
    Timestamp {
        time: start.clamp(0, i64::from(u32::MAX)) as u32,
        increment: 1,
    }
}

/// Seconds between a cluster time and `now_secs` (unix seconds).
///
/// Returns 0 if the cluster time is ahead of the local clock.
pub fn lag_seconds(cluster_time: Timestamp, now_secs: i64) -> u64 {
    now_secs.saturating_sub(i64::from(cluster_time.time)).max(0) as u64
}

/// Lag of a cluster time relative to the current wall clock.
pub fn lag_from_now(cluster_time: Option<Timestamp>) -> Option<u64> {
    cluster_time.map(|ts| lag_seconds(ts, Utc::now().timestamp()))
}
