// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Target store integration.
//!
//! Defines what the applier needs from the target: one write, addressed by
//! `(database, collection, _id)`, executed inside a single transaction.
//! Deadlines are enforced by the caller; implementations must leave the target
//! untouched when their future is dropped before it completes.
//!
//! # Example
//!
//! ```rust,no_run
//! use changestream_mirror::target::{BoxFuture, Namespace, TargetStore, WriteAck, WriteOp};
//!
//! struct MyTarget;
//!
//! impl TargetStore for MyTarget {
//!     fn execute(&self, _ns: &Namespace, _op: WriteOp) -> BoxFuture<'_, WriteAck> {
//!         Box::pin(async move { Ok(WriteAck::default()) })
//!     }
//! }
//! ```

use mongodb::bson::{doc, Bson, Document};
use mongodb::error::{ErrorKind, WriteFailure, TRANSIENT_TRANSACTION_ERROR};
use mongodb::Client;
use std::future::Future;
use std::pin::Pin;
use thiserror::Error;

/// Server error code for a unique index violation.
pub const DUPLICATE_KEY_CODE: i32 = 11000;

/// Result type for target operations.
pub type TargetResult<T> = std::result::Result<T, TargetError>;

/// Type alias for boxed async futures (reduces trait signature complexity).
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = TargetResult<T>> + Send + 'a>>;

/// Errors surfaced by a [`TargetStore`].
#[derive(Error, Debug, Clone)]
pub enum TargetError {
    /// Unique index violation; the document is already on the target.
    #[error("Duplicate key: {message}")]
    DuplicateKey { message: String },

    /// Server rejected the write.
    #[error("Write error (code {code}): {message}")]
    Write { code: i32, message: String },

    /// Transaction could not be started, committed, or was aborted.
    #[error("Transaction error: {message}")]
    Transaction { message: String, transient: bool },

    /// Network or server selection failure.
    #[error("Connection error: {0}")]
    Connection(String),

    /// Anything the driver reports that doesn't fit above.
    #[error("{0}")]
    Other(String),
}

impl TargetError {
    /// Check if a fresh transaction could succeed.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::DuplicateKey { .. } => false,
            Self::Write { .. } => false,
            Self::Transaction { transient, .. } => *transient,
            Self::Connection(_) => true,
            Self::Other(_) => false,
        }
    }

    /// Short, stable label for logs and metrics.
    pub fn kind_label(&self) -> &'static str {
        match self {
            Self::DuplicateKey { .. } => "duplicate_key",
            Self::Write { .. } => "write",
            Self::Transaction { .. } => "transaction",
            Self::Connection(_) => "connection",
            Self::Other(_) => "other",
        }
    }
}

impl From<mongodb::error::Error> for TargetError {
    fn from(e: mongodb::error::Error) -> Self {
        let transient = e.contains_label(TRANSIENT_TRANSACTION_ERROR);
        match e.kind.as_ref() {
            ErrorKind::Write(WriteFailure::WriteError(w)) if w.code == DUPLICATE_KEY_CODE => {
                Self::DuplicateKey {
                    message: w.message.clone(),
                }
            }
            ErrorKind::Write(WriteFailure::WriteError(w)) => Self::Write {
                code: w.code,
                message: w.message.clone(),
            },
            ErrorKind::Command(c) if c.code == DUPLICATE_KEY_CODE => Self::DuplicateKey {
                message: c.message.clone(),
            },
            ErrorKind::Io(_)
            | ErrorKind::ServerSelection { .. }
            | ErrorKind::ConnectionPoolCleared { .. } => Self::Connection(e.to_string()),
            ErrorKind::Transaction { message, .. } => Self::Transaction {
                message: message.clone(),
                transient,
            },
            _ if transient => Self::Transaction {
                message: e.to_string(),
                transient,
            },
            _ => Self::Other(e.to_string()),
        }
    }
}

/// `database.collection` address of a write.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Namespace {
    pub database: String,
    pub collection: String,
}

impl Namespace {
    pub fn new(database: impl Into<String>, collection: impl Into<String>) -> Self {
        Self {
            database: database.into(),
            collection: collection.into(),
        }
    }
}

impl std::fmt::Display for Namespace {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}.{}", self.database, self.collection)
    }
}

/// A single write against the target.
///
/// `id` is already in the form the filter should compare against (see
/// [`IdMatch`](crate::config::IdMatch)).
#[derive(Debug, Clone, PartialEq)]
pub enum WriteOp {
    /// Insert the document as-is.
    Insert { document: Document },
    /// Delete the document whose `_id` equals `id`.
    Delete { id: Bson },
    /// Replace the document whose `_id` equals `id`, inserting it if absent.
    Upsert { id: Bson, document: Document },
}

impl WriteOp {
    /// Which kind of write this is.
    pub fn kind(&self) -> WriteKind {
        match self {
            Self::Insert { .. } => WriteKind::Insert,
            Self::Delete { .. } => WriteKind::Delete,
            Self::Upsert { .. } => WriteKind::Upsert,
        }
    }
}

/// Kind of write performed, without its payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteKind {
    Insert,
    Delete,
    Upsert,
}

impl WriteKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Insert => "insert",
            Self::Delete => "delete",
            Self::Upsert => "upsert",
        }
    }
}

/// What the target reported for a committed write.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WriteAck {
    /// Documents inserted, deleted, or modified.
    pub affected: u64,
    /// Whether an upsert created a new document.
    pub upserted: bool,
}

/// Trait defining what the applier needs from the target.
///
/// Implementations run `op` inside one transaction. The applier wraps the
/// returned future in its own deadline and drops it on timeout.
pub trait TargetStore: Send + Sync + 'static {
    /// Execute one write inside one transaction.
    fn execute(&self, ns: &Namespace, op: WriteOp) -> BoxFuture<'_, WriteAck>;
}

/// MongoDB target: one shared client, one session per write.
#[derive(Clone)]
pub struct MongoTarget {
    client: Client,
}

impl MongoTarget {
    /// Wrap an existing client.
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    /// Connect to the target and check that it answers.
    pub async fn connect(uri: &str) -> TargetResult<Self> {
        let client = Client::with_uri_str(uri).await?;
        client
            .database("admin")
            .run_command(doc! { "ping": 1 })
            .await?;
        Ok(Self { client })
    }

    /// The underlying client.
    pub fn client(&self) -> &Client {
        &self.client
    }

    async fn execute_in_transaction(&self, ns: &Namespace, op: WriteOp) -> TargetResult<WriteAck> {
        let collection = self
            .client
            .database(&ns.database)
            .collection::<Document>(&ns.collection);

        let mut session = self.client.start_session().await?;
        session.start_transaction().await?;

        let written = match op {
            WriteOp::Insert { document } => collection
                .insert_one(document)
                .session(&mut session)
                .await
                .map(|_| WriteAck {
                    affected: 1,
                    upserted: false,
                }),
            WriteOp::Delete { id } => collection
                .delete_one(doc! { "_id": id })
                .session(&mut session)
                .await
                .map(|r| WriteAck {
                    affected: r.deleted_count,
                    upserted: false,
                }),
            WriteOp::Upsert { id, document } => collection
                .replace_one(doc! { "_id": id }, document)
                .upsert(true)
                .session(&mut session)
                .await
                .map(|r| WriteAck {
                    affected: r.modified_count,
                    upserted: r.upserted_id.is_some(),
                }),
        };

        match written {
            Ok(ack) => {
                session.commit_transaction().await?;
                Ok(ack)
            }
            Err(e) => {
                if let Err(abort_err) = session.abort_transaction().await {
                    tracing::debug!(error = %abort_err, "Abort after failed write also failed");
                }
                Err(e.into())
            }
        }
    }
}

impl TargetStore for MongoTarget {
    fn execute(&self, ns: &Namespace, op: WriteOp) -> BoxFuture<'_, WriteAck> {
        let ns = ns.clone();
        Box::pin(async move { self.execute_in_transaction(&ns, op).await })
    }
}

/// A no-op target for dry runs.
///
/// Logs the write it would have made and reports success.
#[derive(Clone, Default)]
pub struct NoOpTarget;

impl TargetStore for NoOpTarget {
    fn execute(&self, ns: &Namespace, op: WriteOp) -> BoxFuture<'_, WriteAck> {
        let ns = ns.clone();
        Box::pin(async move {
            match &op {
                WriteOp::Insert { document } => {
                    tracing::info!(ns = %ns, id = ?document.get("_id"), "Dry run: would insert");
                }
                WriteOp::Delete { id } => {
                    tracing::info!(ns = %ns, id = %id, "Dry run: would delete");
                }
                WriteOp::Upsert { id, .. } => {
                    tracing::info!(ns = %ns, id = %id, "Dry run: would upsert");
                }
            }
            Ok(WriteAck::default())
        })
    }
}
