//! Scripted ChangeFeed plus change event builders.

use changestream_mirror::stream::{ChangeBatch, ChangeEvent, ChangeFeed, ChangeOp, FeedFuture, ResumeMarker};
use changestream_mirror::{ReplicationError, Result};
use mongodb::bson::{doc, Bson, Document, Timestamp};
use std::collections::VecDeque;

/// What the feed does once its script runs out.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WhenExhausted {
    /// Fail like a closed change stream.
    Close,
    /// Wait forever, like a quiet change stream.
    Idle,
}

/// Feed that hands out a fixed sequence of batches.
pub struct ScriptedFeed {
    script: VecDeque<Result<ChangeBatch>>,
    when_exhausted: WhenExhausted,
    on_exhausted: Option<Box<dyn FnOnce() + Send>>,
    served: usize,
}

impl ScriptedFeed {
    /// Serve `batches` in order, then report the stream closed.
    pub fn new(batches: Vec<ChangeBatch>) -> Self {
        Self {
            script: batches.into_iter().map(Ok).collect(),
            when_exhausted: WhenExhausted::Close,
            on_exhausted: None,
            served: 0,
        }
    }

    /// Wait forever instead of closing once the script is done.
    pub fn then_idle(mut self) -> Self {
        self.when_exhausted = WhenExhausted::Idle;
        self
    }

    /// Go idle once the script is done and call `f` the first time that happens.
    ///
    /// Typically `move || session.shutdown()`, so the run ends right after the
    /// last scripted batch has been applied.
    pub fn then_call(mut self, f: impl FnOnce() + Send + 'static) -> Self {
        self.when_exhausted = WhenExhausted::Idle;
        self.on_exhausted = Some(Box::new(f));
        self
    }

    /// Append an error to the script.
    pub fn then_fail(mut self, error: ReplicationError) -> Self {
        self.script.push_back(Err(error));
        self
    }

    /// Batches (and errors) served so far.
    #[allow(dead_code)]
    pub fn served(&self) -> usize {
        self.served
    }
}

impl ChangeFeed for ScriptedFeed {
    fn next_batch(&mut self) -> FeedFuture<'_> {
        let next = self.script.pop_front();
        if next.is_some() {
            self.served += 1;
        } else if let Some(f) = self.on_exhausted.take() {
            f();
        }
        let when_exhausted = self.when_exhausted;
        Box::pin(async move {
            match next {
                Some(result) => result,
                None => match when_exhausted {
                    WhenExhausted::Close => {
                        Err(ReplicationError::StreamClosed("script exhausted".into()))
                    }
                    WhenExhausted::Idle => std::future::pending().await,
                },
            }
        })
    }
}

// =============================================================================
// Event builders
// =============================================================================

/// Builds change events with increasing cluster times and resume tokens.
pub struct EventBuilder {
    next_time: u32,
    next_seq: u32,
}

impl EventBuilder {
    /// Start at the current wall clock so lag comes out near zero.
    pub fn new() -> Self {
        Self::starting_at(chrono::Utc::now().timestamp() as u32)
    }

    pub fn starting_at(time: u32) -> Self {
        Self { next_time: time, next_seq: 0 }
    }

    fn event(
        &mut self,
        op: ChangeOp,
        ns: &str,
        document_key: Option<Document>,
        full_document: Option<Document>,
    ) -> ChangeEvent {
        let (database, collection) = ns.split_once('.').unwrap_or((ns, "docs"));
        self.next_seq += 1;
        let cluster_time = Timestamp { time: self.next_time, increment: self.next_seq };
        ChangeEvent {
            op,
            database: database.to_string(),
            collection: collection.to_string(),
            document_key,
            full_document,
            cluster_time: Some(cluster_time),
            resume_token: Some(marker(self.next_seq)),
        }
    }

    /// Insert of `{_id: id, ..fields}` into `db.coll`.
    pub fn insert(&mut self, ns: &str, id: impl Into<Bson>, fields: Document) -> ChangeEvent {
        let id = id.into();
        let mut full = doc! { "_id": id.clone() };
        full.extend(fields);
        self.event(ChangeOp::Insert, ns, Some(doc! { "_id": id }), Some(full))
    }

    /// Update with its post-image.
    pub fn update(&mut self, ns: &str, id: impl Into<Bson>, fields: Document) -> ChangeEvent {
        let mut ev = self.insert(ns, id, fields);
        ev.op = ChangeOp::Update;
        ev
    }

    /// Replace with the new document.
    #[allow(dead_code)]
    pub fn replace(&mut self, ns: &str, id: impl Into<Bson>, fields: Document) -> ChangeEvent {
        let mut ev = self.insert(ns, id, fields);
        ev.op = ChangeOp::Replace;
        ev
    }

    /// Delete; no post-image.
    pub fn delete(&mut self, ns: &str, id: impl Into<Bson>) -> ChangeEvent {
        self.event(ChangeOp::Delete, ns, Some(doc! { "_id": id.into() }), None)
    }

    /// An operation type that isn't replicated.
    pub fn unknown(&mut self, ns: &str, name: &str) -> ChangeEvent {
        self.event(ChangeOp::Unknown(name.to_string()), ns, None, None)
    }
}

impl Default for EventBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// Resume marker with a recognisable payload.
pub fn marker(seq: u32) -> ResumeMarker {
    ResumeMarker(Bson::Document(doc! { "_data": format!("{seq:08X}") }))
}

/// A batch whose resume marker is that of its last event.
pub fn batch(events: Vec<ChangeEvent>) -> ChangeBatch {
    let resume_marker = events.last().and_then(|e| e.resume_token.clone());
    ChangeBatch::new(events, resume_marker)
}
