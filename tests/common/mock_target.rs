//! Mock TargetStore for testing.
//!
//! Keeps documents in memory keyed by namespace and `_id`, with the write
//! semantics the real target has: inserts of an existing `_id` fail with a
//! duplicate key, deletes of a missing `_id` succeed, replacements upsert.
//! Writes only land once any injected delay has elapsed, so a timed-out
//! write leaves the store untouched. Namespaces are compared exactly, as the
//! server does: `sales` and `SALES` are different databases.

use changestream_mirror::target::{BoxFuture, Namespace, TargetError, TargetStore, WriteAck, WriteOp};
use mongodb::bson::{Bson, Document};
use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use tokio::sync::RwLock;

/// A write the target was asked to perform.
#[derive(Debug, Clone, PartialEq)]
pub struct WriteCall {
    pub ns: Namespace,
    pub op: WriteOp,
}

/// Identity of an `_id` value: same type and same value.
fn id_key(id: &Bson) -> String {
    id.clone().into_canonical_extjson().to_string()
}

/// In-memory target that records every call.
///
/// # Example
/// ```rust,ignore
/// let target = Arc::new(MockTarget::new());
/// target.fail_next(TargetError::Connection("reset".into())).await;
///
/// // Use in tests...
///
/// assert_eq!(target.count("sales", "orders").await, 1);
/// ```
pub struct MockTarget {
    /// namespace -> id key -> document
    collections: RwLock<HashMap<Namespace, BTreeMap<String, Document>>>,
    /// Every execute() call, in order
    calls: RwLock<Vec<WriteCall>>,
    /// Writes that committed, in order
    committed: RwLock<Vec<WriteCall>>,
    /// Errors to return for the next calls, in order
    failures: RwLock<VecDeque<TargetError>>,
    /// Per-id delay before committing (id string -> delay)
    delays: RwLock<HashMap<String, Duration>>,
    /// Delay applied to every call
    default_delay: RwLock<Option<Duration>>,
    call_count: AtomicUsize,
}

impl MockTarget {
    pub fn new() -> Self {
        Self {
            collections: RwLock::new(HashMap::new()),
            calls: RwLock::new(Vec::new()),
            committed: RwLock::new(Vec::new()),
            failures: RwLock::new(VecDeque::new()),
            delays: RwLock::new(HashMap::new()),
            default_delay: RwLock::new(None),
            call_count: AtomicUsize::new(0),
        }
    }

    // =========================================================================
    // Configuration
    // =========================================================================

    /// Put a document on the target directly.
    pub async fn seed(&self, db: &str, coll: &str, document: Document) {
        let id = document.get("_id").cloned().unwrap_or(Bson::Null);
        self.collections
            .write()
            .await
            .entry(Namespace::new(db, coll))
            .or_default()
            .insert(id_key(&id), document);
    }

    /// Fail the next call with `error` (queued behind earlier failures).
    pub async fn fail_next(&self, error: TargetError) {
        self.failures.write().await.push_back(error);
    }

    /// Delay every write touching `id` (string form) before it commits.
    pub async fn delay_id(&self, id: &str, delay: Duration) {
        self.delays.write().await.insert(id.to_string(), delay);
    }

    /// Delay every write before it commits.
    pub async fn delay_all(&self, delay: Duration) {
        *self.default_delay.write().await = Some(delay);
    }

    // =========================================================================
    // Query Methods
    // =========================================================================

    /// Document with the given `_id`, if present.
    pub async fn get(&self, db: &str, coll: &str, id: &Bson) -> Option<Document> {
        self.collections
            .read()
            .await
            .get(&Namespace::new(db, coll))
            .and_then(|c| c.get(&id_key(id)).cloned())
    }

    /// Number of documents in a collection.
    pub async fn count(&self, db: &str, coll: &str) -> usize {
        self.collections
            .read()
            .await
            .get(&Namespace::new(db, coll))
            .map_or(0, BTreeMap::len)
    }

    /// Number of documents across every collection of a database.
    pub async fn database_count(&self, db: &str) -> usize {
        self.collections
            .read()
            .await
            .iter()
            .filter(|(ns, _)| ns.database == db)
            .map(|(_, c)| c.len())
            .sum()
    }

    /// Snapshot of everything on the target.
    pub async fn snapshot(&self) -> HashMap<Namespace, BTreeMap<String, Document>> {
        self.collections.read().await.clone()
    }

    /// Every call made, in order.
    pub async fn calls(&self) -> Vec<WriteCall> {
        self.calls.read().await.clone()
    }

    /// Writes that committed, in order.
    pub async fn committed(&self) -> Vec<WriteCall> {
        self.committed.read().await.clone()
    }

    pub fn call_count(&self) -> usize {
        self.call_count.load(Ordering::SeqCst)
    }

    // =========================================================================
    // Write semantics
    // =========================================================================

    async fn delay_for(&self, op: &WriteOp) -> Option<Duration> {
        let id = match op {
            WriteOp::Insert { document } => document.get("_id"),
            WriteOp::Delete { id } | WriteOp::Upsert { id, .. } => Some(id),
        };
        let per_id = match id {
            Some(id) => {
                let key = changestream_mirror::applier::id_string(id);
                self.delays.read().await.get(&key).copied()
            }
            None => None,
        };
        match per_id {
            Some(d) => Some(d),
            None => *self.default_delay.read().await,
        }
    }

    async fn commit(&self, ns: &Namespace, op: &WriteOp) -> Result<WriteAck, TargetError> {
        let mut collections = self.collections.write().await;
        let coll = collections
            .entry(ns.clone())
            .or_default();

        let ack = match op {
            WriteOp::Insert { document } => {
                let id = document.get("_id").cloned().unwrap_or(Bson::Null);
                let key = id_key(&id);
                if coll.contains_key(&key) {
                    return Err(TargetError::DuplicateKey {
                        message: format!("E11000 duplicate key error collection: {ns} dup key: {{ _id: {id} }}"),
                    });
                }
                coll.insert(key, document.clone());
                WriteAck { affected: 1, upserted: false }
            }
            WriteOp::Delete { id } => {
                let removed = coll.remove(&id_key(id)).is_some();
                WriteAck { affected: u64::from(removed), upserted: false }
            }
            WriteOp::Upsert { id, document } => {
                if let Some(doc_id) = document.get("_id") {
                    if id_key(doc_id) != id_key(id) {
                        return Err(TargetError::Write {
                            code: 66,
                            message: "the (immutable) field '_id' was found to have been altered".into(),
                        });
                    }
                }
                let existed = coll.insert(id_key(id), document.clone()).is_some();
                WriteAck { affected: u64::from(existed), upserted: !existed }
            }
        };
        Ok(ack)
    }
}

impl Default for MockTarget {
    fn default() -> Self {
        Self::new()
    }
}

impl TargetStore for MockTarget {
    fn execute(&self, ns: &Namespace, op: WriteOp) -> BoxFuture<'_, WriteAck> {
        let ns = ns.clone();
        Box::pin(async move {
            self.call_count.fetch_add(1, Ordering::SeqCst);
            self.calls.write().await.push(WriteCall { ns: ns.clone(), op: op.clone() });

            if let Some(delay) = self.delay_for(&op).await {
                tokio::time::sleep(delay).await;
            }

            if let Some(err) = self.failures.write().await.pop_front() {
                return Err(err);
            }

            let ack = self.commit(&ns, &op).await?;
            self.committed.write().await.push(WriteCall { ns, op });
            Ok(ack)
        })
    }
}
