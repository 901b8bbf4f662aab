//! # Change Stream Mirror
//!
//! Keeps selected databases of one MongoDB deployment mirrored onto another by
//! tailing the source's cluster-wide change stream.
//!
//! ## Architecture
//!
//! ```text
//! ┌───────────────────────────────────────────────────────────────────────────┐
//! │                          changestream-mirror                              │
//! │                                                                           │
//! │  ┌─────────────────┐    ┌────────────────┐    ┌────────────────────────┐  │
//! │  │ MongoChangeFeed │───►│ DatabaseFilter │───►│ ChangeApplier          │  │
//! │  │ (watch, batches)│    │ (case-insens.) │    │ (1 txn per change,     │  │
//! │  └─────────────────┘    └────────────────┘    │  timeout, retry)       │  │
//! │          ▲                                    └───────────┬────────────┘  │
//! │          │                                                │ on failure    │
//! │  ┌───────┴──────────────┐                     ┌───────────▼────────────┐  │
//! │  │ ReplicationSession   │◄────────────────────│ classifier             │  │
//! │  │ (loop, state, lag)   │                     │ (dup key vs. warn)     │  │
//! │  └──────────────────────┘                     └────────────────────────┘  │
//! └───────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Delivery
//!
//! At-least-once. Every run starts `lookback_hours` in the past and replays
//! what it finds; inserts that already exist are ignored, updates are upserts,
//! and deletes of missing documents are no-ops. No position is persisted.
//!
//! ## Usage
//!
//! ```rust,no_run
//! use changestream_mirror::{ReplicationConfig, ReplicationSession};
//!
//! #[tokio::main]
//! async fn main() -> changestream_mirror::Result<()> {
//!     let config = ReplicationConfig::new(
//!         "mongodb://source:27017/?replicaSet=rs0",
//!         "mongodb://target:27017/?replicaSet=rs1",
//!         vec!["sales".into()],
//!     );
//!
//!     let session = ReplicationSession::connect(config).await?;
//!
//!     // Runs until the change stream fails or shutdown() is called
//!     session.run().await?;
//!     Ok(())
//! }
//! ```

pub mod applier;
pub mod classifier;
pub mod config;
pub mod coordinator;
pub mod error;
pub mod filter;
pub mod metrics;
pub mod resilience;
pub mod stream;
pub mod target;

// Re-exports for convenience
pub use applier::{ApplyOutcome, ChangeApplier, SkipReason};
pub use classifier::FailureAction;
pub use config::{ApplyConfig, IdMatch, ReplicationConfig, ReplicationSettings, StreamConfig};
pub use coordinator::{LoopState, ReplicationSession, RunSummary};
pub use error::{ReplicationError, Result};
pub use filter::DatabaseFilter;
pub use resilience::RetryConfig;
pub use stream::{ChangeBatch, ChangeEvent, ChangeFeed, ChangeOp, MongoChangeFeed, ResumeMarker};
pub use target::{MongoTarget, Namespace, NoOpTarget, TargetError, TargetStore, WriteKind, WriteOp};
