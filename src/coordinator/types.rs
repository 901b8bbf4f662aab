//! Replication loop state types.
//!
//! Defines the state machine for one replication session.
//!
//! # State Transitions
//!
//! ```text
//!          run()
//! Idle ──────────→ WaitingForBatch ←────────────────┐
//!                   │    │     │                     │
//!       (shutdown)  │    │     │ (empty batch)       │
//!                   ↓    │     └─────────────────────┤
//!               Stopped  │                           │
//!                        │ (batch)                   │
//!                        ↓                           │
//!                    Filtering ──→ Applying ─────────┘
//!
//!  WaitingForBatch ──(source error)──→ Fatal
//! ```
//!
//! # State Descriptions
//!
//! - **Idle**: Session created, `run()` not called yet.
//! - **WaitingForBatch**: Suspended on the change stream.
//! - **Filtering**: Dropping changes for databases that aren't configured.
//! - **Applying**: Writing surviving changes to the target, one at a time.
//! - **Stopped**: Shutdown was requested while waiting. Terminal.
//! - **Fatal**: The change stream failed or closed. Terminal.

use crate::stream::ResumeMarker;

/// State of the replication loop.
///
/// See module docs for the state transition diagram.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopState {
    /// Session created but not started.
    ///
    /// Call [`run()`](super::ReplicationSession::run) to begin replicating.
    Idle,

    /// Waiting for the next batch from the change stream.
    ///
    /// The only state in which a shutdown request is acted on.
    WaitingForBatch,

    /// Filtering a batch by database.
    Filtering,

    /// Applying the surviving changes of a batch.
    Applying,

    /// Shut down on request.
    Stopped,

    /// The change stream failed. `run()` returned the error.
    Fatal,
}

impl std::fmt::Display for LoopState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LoopState::Idle => write!(f, "Idle"),
            LoopState::WaitingForBatch => write!(f, "WaitingForBatch"),
            LoopState::Filtering => write!(f, "Filtering"),
            LoopState::Applying => write!(f, "Applying"),
            LoopState::Stopped => write!(f, "Stopped"),
            LoopState::Fatal => write!(f, "Fatal"),
        }
    }
}

/// Per-batch tallies.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BatchSummary {
    /// Events in the batch.
    pub read: usize,
    /// Events dropped by the database filter.
    pub filtered_out: usize,
    pub applied: usize,
    /// Unknown operation types.
    pub skipped: usize,
    /// Inserts that hit an existing `_id`.
    pub duplicates: usize,
    /// Everything else that didn't commit.
    pub failed: usize,
}

impl BatchSummary {
    /// Events that passed the filter.
    pub fn processed(&self) -> usize {
        self.read - self.filtered_out
    }
}

/// Totals for a session that stopped.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RunSummary {
    /// Non-empty batches.
    pub batches: u64,
    /// Empty batches.
    pub heartbeats: u64,
    /// Events that passed the filter.
    pub processed: u64,
    pub applied: u64,
    pub skipped: u64,
    pub duplicates: u64,
    pub failed: u64,
    /// Resume marker of the last non-empty batch.
    pub last_resume_marker: Option<ResumeMarker>,
}

impl RunSummary {
    pub(crate) fn add_batch(&mut self, batch: &BatchSummary) {
        self.batches += 1;
        self.processed += batch.processed() as u64;
        self.applied += batch.applied as u64;
        self.skipped += batch.skipped as u64;
        self.duplicates += batch.duplicates as u64;
        self.failed += batch.failed as u64;
    }
}
