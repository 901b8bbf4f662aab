// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Replication session coordinator.
//!
//! Ties together:
//! - The source change stream via [`crate::stream::MongoChangeFeed`]
//! - The database filter via [`crate::filter::DatabaseFilter`]
//! - The per-change applier via [`crate::applier::ChangeApplier`]
//!
//! # Lifecycle
//!
//! A [`ReplicationSession`] is created once at startup, run once, and dropped.
//! It starts the change stream `lookback_hours` before it was created and
//! never persists a position; the next run replays the same window and
//! relies on idempotent writes.
//!
//! ```rust,no_run
//! # async fn example() -> changestream_mirror::Result<()> {
//! use changestream_mirror::{ReplicationConfig, ReplicationSession};
//! use std::sync::Arc;
//!
//! let config = ReplicationConfig::new(
//!     "mongodb://source:27017/?replicaSet=rs0",
//!     "mongodb://target:27017/?replicaSet=rs1",
//!     vec!["sales".into()],
//! );
//! let session = Arc::new(ReplicationSession::connect(config).await?);
//!
//! let stopper = Arc::clone(&session);
//! tokio::spawn(async move {
//!     let _ = tokio::signal::ctrl_c().await;
//!     stopper.shutdown();
//! });
//!
//! let summary = session.run().await?;
//! println!("processed {}", summary.processed);
//! # Ok(())
//! # }
//! ```

mod replication_loop;
mod types;

pub use types::{BatchSummary, LoopState, RunSummary};

use crate::applier::ChangeApplier;
use crate::config::{redact_uri, ReplicationConfig};
use crate::error::{ReplicationError, Result};
use crate::filter::DatabaseFilter;
use crate::metrics;
use crate::stream::{start_timestamp, ChangeFeed, MongoChangeFeed};
use crate::target::{MongoTarget, NoOpTarget, TargetStore};
use chrono::Utc;
use mongodb::bson::Timestamp;
use mongodb::Client;
use replication_loop::{run_loop, LoopContext};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{info, info_span, Instrument};

/// One replication run: source client, target, filter, state and counters.
pub struct ReplicationSession<T: TargetStore = NoOpTarget> {
    config: ReplicationConfig,

    /// Source client; `None` for sessions driven by an external feed.
    source: Option<Client>,

    applier: ChangeApplier<T>,
    filter: DatabaseFilter,

    /// Where the change stream starts.
    start_time: Timestamp,

    /// Changes that passed the filter so far.
    processed: Arc<AtomicU64>,

    state_tx: watch::Sender<LoopState>,
    state_rx: watch::Receiver<LoopState>,

    shutdown_tx: watch::Sender<bool>,
    shutdown_rx: watch::Receiver<bool>,

    /// Set once `run` has been entered.
    started: AtomicBool,
}

impl ReplicationSession<MongoTarget> {
    /// Connect to source and target and build a session that writes to the target.
    pub async fn connect(config: ReplicationConfig) -> Result<Self> {
        config.validate()?;

        info!(target_uri = %redact_uri(&config.target_uri), "Connecting to target");
        let target = MongoTarget::connect(&config.target_uri).await?;

        Self::connect_with_target(config, Arc::new(target)).await
    }
}

impl ReplicationSession<NoOpTarget> {
    /// Connect to the source only; writes are logged instead of performed.
    pub async fn connect_dry_run(config: ReplicationConfig) -> Result<Self> {
        Self::connect_with_target(config, Arc::new(NoOpTarget)).await
    }
}

impl<T: TargetStore> ReplicationSession<T> {
    /// Connect to the source and pair it with the given target.
    pub async fn connect_with_target(config: ReplicationConfig, target: Arc<T>) -> Result<Self> {
        config.validate()?;

        info!(source_uri = %redact_uri(&config.source_uri), "Connecting to source");
        let source = Client::with_uri_str(&config.source_uri)
            .await
            .map_err(|e| ReplicationError::source("connect", e))?;

        let mut session = Self::with_target(config, target)?;
        session.source = Some(source);
        Ok(session)
    }

    /// Build a session without a source client.
    ///
    /// Only [`run_with_feed`](Self::run_with_feed) can drive it.
    pub fn with_target(config: ReplicationConfig, target: Arc<T>) -> Result<Self> {
        config.validate()?;

        let (state_tx, state_rx) = watch::channel(LoopState::Idle);
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        Ok(Self {
            applier: ChangeApplier::new(target, &config.settings.apply),
            filter: DatabaseFilter::new(&config.databases),
            start_time: start_timestamp(Utc::now(), config.lookback_hours),
            config,
            source: None,
            processed: Arc::new(AtomicU64::new(0)),
            state_tx,
            state_rx,
            shutdown_tx,
            shutdown_rx,
            started: AtomicBool::new(false),
        })
    }

    pub fn config(&self) -> &ReplicationConfig {
        &self.config
    }

    /// Operation time the change stream starts at.
    pub fn start_time(&self) -> Timestamp {
        self.start_time
    }

    pub fn filter(&self) -> &DatabaseFilter {
        &self.filter
    }

    /// Get a reference to the target.
    pub fn target(&self) -> &Arc<T> {
        self.applier.target()
    }

    /// Get current loop state.
    pub fn state(&self) -> LoopState {
        *self.state_rx.borrow()
    }

    /// Get a receiver to watch state changes.
    pub fn state_receiver(&self) -> watch::Receiver<LoopState> {
        self.state_rx.clone()
    }

    /// Changes that passed the filter so far.
    pub fn processed(&self) -> u64 {
        self.processed.load(Ordering::Relaxed)
    }

    /// Ask the loop to stop.
    ///
    /// Takes effect the next time the loop waits for a batch; a batch already
    /// being applied is finished first.
    pub fn shutdown(&self) {
        info!("Shutdown requested");
        self.shutdown_tx.send_replace(true);
    }

    /// Open the change stream on the source and replicate until shutdown or failure.
    pub async fn run(&self) -> Result<RunSummary> {
        self.claim_run()?;

        let Some(ref client) = self.source else {
            self.set_state(LoopState::Fatal);
            return Err(ReplicationError::InvalidState {
                expected: "session with a source client".to_string(),
                actual: "no source client".to_string(),
            });
        };

        let feed = match MongoChangeFeed::open(client, self.start_time, &self.config.settings.stream).await {
            Ok(feed) => feed,
            Err(e) => {
                tracing::error!(error = %e, "Failed to open change stream");
                self.set_state(LoopState::Fatal);
                return Err(e);
            }
        };

        self.drive(feed).await
    }

    /// Replicate from an arbitrary feed until shutdown or a feed error.
    pub async fn run_with_feed<F: ChangeFeed>(&self, feed: F) -> Result<RunSummary> {
        self.claim_run()?;
        self.drive(feed).await
    }

    fn claim_run(&self) -> Result<()> {
        if self.started.swap(true, Ordering::SeqCst) {
            return Err(ReplicationError::InvalidState {
                expected: LoopState::Idle.to_string(),
                actual: self.state().to_string(),
            });
        }
        Ok(())
    }

    fn set_state(&self, state: LoopState) {
        self.state_tx.send_replace(state);
        metrics::set_loop_state(&state.to_string());
    }

    async fn drive<F: ChangeFeed>(&self, mut feed: F) -> Result<RunSummary> {
        let databases = self.filter.names().join(",");
        let span = info_span!("replication", databases = %databases);

        async {
            info!(
                start_time = self.start_time.time,
                lookback_hours = self.config.lookback_hours,
                batch_size = self.config.settings.stream.batch_size,
                apply_timeout = %humantime::format_duration(self.applier.timeout()),
                "Starting replication"
            );

            let ctx = LoopContext {
                state_tx: &self.state_tx,
                shutdown_rx: self.shutdown_rx.clone(),
                processed: &self.processed,
            };
            let result = run_loop(&mut feed, &self.filter, &self.applier, ctx).await;

            if let Ok(ref summary) = result {
                info!(
                    processed = summary.processed,
                    applied = summary.applied,
                    duplicates = summary.duplicates,
                    failed = summary.failed,
                    "Replication stopped"
                );
            }
            result
        }
        .instrument(span)
        .await
    }
}
