//! changestream-mirror CLI
//!
//! Mirrors the named databases from a source MongoDB deployment to a target by
//! tailing the source change stream.

use anyhow::Context;
use clap::{Parser, ValueEnum};
use changestream_mirror::config::{parse_databases, parse_lookback_hours};
use changestream_mirror::{IdMatch, ReplicationConfig, ReplicationSession, RunSummary, TargetStore};
use std::sync::Arc;
use tracing::{error, info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[derive(Debug, Clone, Copy, ValueEnum)]
enum LogFormat {
    Text,
    Json,
}

#[derive(Parser, Debug)]
#[command(name = "changestream-mirror")]
#[command(about = "Mirror MongoDB databases to another cluster via change streams")]
#[command(version)]
struct Args {
    /// Source connection string (replica set or sharded cluster)
    source: String,

    /// Target connection string (must support transactions)
    target: String,

    /// Databases to replicate (comma-separated, case-insensitive)
    databases: String,

    /// Start the change stream this many hours in the past [default: 50]
    lookback_hours: Option<String>,

    /// Maximum changes per batch
    #[arg(long, env = "CSM_BATCH_SIZE", default_value_t = 2000)]
    batch_size: usize,

    /// Deadline for applying one change (e.g. "2s", "500ms")
    #[arg(long, env = "CSM_APPLY_TIMEOUT", default_value = "2s")]
    apply_timeout: String,

    /// How long the server may wait for new changes per round-trip
    #[arg(long, env = "CSM_MAX_AWAIT")]
    max_await: Option<String>,

    /// How long a batch stays open once it holds its first change
    #[arg(long, env = "CSM_BATCH_LINGER", default_value = "250ms")]
    batch_linger: String,

    /// Attempts per change for retryable failures (1 = no retry)
    #[arg(long, env = "CSM_MAX_APPLY_ATTEMPTS", default_value_t = 1)]
    max_apply_attempts: usize,

    /// Match target documents by the source `_id` value instead of its string form
    #[arg(long)]
    native_id_match: bool,

    /// Log the writes instead of performing them
    #[arg(long)]
    dry_run: bool,

    /// Log output format
    #[arg(long, env = "LOG_FORMAT", value_enum, default_value = "text")]
    log_format: LogFormat,

    /// Log level
    #[arg(long, env = "LOG_LEVEL", default_value = "info")]
    log_level: String,
}

impl Args {
    fn to_config(&self) -> ReplicationConfig {
        let mut config = ReplicationConfig::new(
            self.source.clone(),
            self.target.clone(),
            parse_databases(&self.databases),
        );
        config.lookback_hours = parse_lookback_hours(self.lookback_hours.as_deref());

        let settings = &mut config.settings;
        settings.stream.batch_size = self.batch_size;
        settings.stream.max_await = self.max_await.clone();
        settings.stream.batch_linger = self.batch_linger.clone();
        settings.apply.timeout = self.apply_timeout.clone();
        settings.apply.max_attempts = self.max_apply_attempts;
        settings.apply.dry_run = self.dry_run;
        if self.native_id_match {
            settings.apply.id_match = IdMatch::Native;
        }
        config
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    // Initialize tracing
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&args.log_level));
    let registry = tracing_subscriber::registry().with(filter);
    match args.log_format {
        LogFormat::Json => registry.with(fmt::layer().json()).init(),
        LogFormat::Text => registry.with(fmt::layer()).init(),
    }

    info!(version = env!("CARGO_PKG_VERSION"), "Starting changestream-mirror");

    let config = args.to_config();
    config.validate().context("invalid configuration")?;

    let summary = if config.settings.apply.dry_run {
        warn!("Dry run: changes will be logged, not written");
        let session = ReplicationSession::connect_dry_run(config)
            .await
            .context("failed to connect to source")?;
        replicate(session).await?
    } else {
        let session = ReplicationSession::connect(config)
            .await
            .context("failed to connect")?;
        replicate(session).await?
    };

    info!(
        processed = summary.processed,
        applied = summary.applied,
        duplicates = summary.duplicates,
        failed = summary.failed,
        "changestream-mirror stopped gracefully"
    );
    Ok(())
}

/// Run the session until Ctrl-C or a change stream failure.
async fn replicate<T: TargetStore>(session: ReplicationSession<T>) -> anyhow::Result<RunSummary> {
    let session = Arc::new(session);

    let stopper = Arc::clone(&session);
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => stopper.shutdown(),
            Err(e) => error!(error = %e, "Failed to listen for Ctrl-C"),
        }
    });

    match session.run().await {
        Ok(summary) => Ok(summary),
        Err(e) if e.is_fatal() => {
            error!(error = %e, processed = session.processed(), "Change stream lost, exiting");
            Err(e.into())
        }
        Err(e) => {
            error!(error = %e, kind = e.kind_label(), "Replication could not run");
            Err(e.into())
        }
    }
}
