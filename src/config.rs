//! Configuration for the change stream mirror.
//!
//! Everything here is derived from the command line at startup; there is no
//! config file. The types are still `serde`-derivable so a session can be
//! described in JSON for tests and tooling.
//!
//! # Quick Start
//!
//! ```rust
//! use changestream_mirror::config::{parse_databases, ReplicationConfig};
//!
//! let config = ReplicationConfig::new(
//!     "mongodb://source:27017/?replicaSet=rs0",
//!     "mongodb://target:27017/?replicaSet=rs1",
//!     parse_databases("sales, inventory"),
//! );
//! assert!(config.validate().is_ok());
//! ```
//!
//! # Configuration Structure
//!
//! ```text
//! ReplicationConfig
//! ├── source_uri: String           # Source connection string
//! ├── target_uri: String           # Target connection string
//! ├── databases: Vec<String>       # Databases to replicate (case-insensitive)
//! ├── lookback_hours: u32          # Start the stream this far in the past
//! └── settings: ReplicationSettings
//!     ├── stream: StreamConfig     # Change stream batch size / await window
//!     └── apply: ApplyConfig       # Per-change timeout, retry, id matching
//! ```
//!
//! # JSON Example
//!
//! ```json
//! {
//!   "source_uri": "mongodb://source:27017",
//!   "target_uri": "mongodb://target:27017",
//!   "databases": ["sales"],
//!   "lookback_hours": 50,
//!   "settings": {
//!     "stream": { "batch_size": 2000, "max_await": "1s" },
//!     "apply": { "timeout": "2s", "max_attempts": 1, "id_match": "string_form" }
//!   }
//! }
//! ```

use crate::error::{ReplicationError, Result};
use crate::resilience::RetryConfig;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::warn;

/// Lookback used when none is given or the given value is not an integer.
pub const DEFAULT_LOOKBACK_HOURS: u32 = 50;

// ═══════════════════════════════════════════════════════════════════════════════
// Top-level config
// ═══════════════════════════════════════════════════════════════════════════════

/// Everything needed to start a replication session.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReplicationConfig {
    /// Source connection string. Must point at a replica set or sharded cluster.
    pub source_uri: String,

    /// Target connection string. Must support multi-document transactions.
    pub target_uri: String,

    /// Databases to replicate. Matched case-insensitively.
    pub databases: Vec<String>,

    /// How far back the change stream starts, in hours.
    #[serde(default = "default_lookback_hours")]
    pub lookback_hours: u32,

    #[serde(default)]
    pub settings: ReplicationSettings,
}

fn default_lookback_hours() -> u32 {
    DEFAULT_LOOKBACK_HOURS
}

impl ReplicationConfig {
    pub fn new(
        source_uri: impl Into<String>,
        target_uri: impl Into<String>,
        databases: Vec<String>,
    ) -> Self {
        Self {
            source_uri: source_uri.into(),
            target_uri: target_uri.into(),
            databases,
            lookback_hours: DEFAULT_LOOKBACK_HOURS,
            settings: ReplicationSettings::default(),
        }
    }

    /// Create a minimal config for testing.
    pub fn for_testing(databases: &[&str]) -> Self {
        Self::new(
            "mongodb://source.invalid:27017",
            "mongodb://target.invalid:27017",
            databases.iter().map(|d| d.to_string()).collect(),
        )
    }

    /// Reject settings the session cannot run with.
    pub fn validate(&self) -> Result<()> {
        if self.source_uri.trim().is_empty() {
            return Err(ReplicationError::Config("source connection string is empty".into()));
        }
        if self.target_uri.trim().is_empty() {
            return Err(ReplicationError::Config("target connection string is empty".into()));
        }
        if self.databases.iter().all(|d| d.trim().is_empty()) {
            return Err(ReplicationError::Config("no databases to replicate".into()));
        }
        self.settings.stream.validate()?;
        self.settings.apply.validate()?;
        Ok(())
    }
}

/// Split a comma-separated database list, trimming entries and dropping blanks.
pub fn parse_databases(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(String::from)
        .collect()
}

/// Interpret the optional lookback argument.
///
/// A missing value gives the default. A value that isn't a non-negative
/// integer also gives the default, with a warning.
pub fn parse_lookback_hours(raw: Option<&str>) -> u32 {
    match raw {
        None => DEFAULT_LOOKBACK_HOURS,
        Some(value) => match value.trim().parse::<u32>() {
            Ok(hours) => hours,
            Err(_) => {
                warn!(
                    value = %value,
                    fallback = DEFAULT_LOOKBACK_HOURS,
                    "Lookback hours is not an integer, using default"
                );
                DEFAULT_LOOKBACK_HOURS
            }
        },
    }
}

/// Replace any `user:password@` in a connection string with `***@`.
pub fn redact_uri(uri: &str) -> String {
    let Some(scheme_end) = uri.find("://") else {
        return uri.to_string();
    };
    let authority_start = scheme_end + 3;
    let rest = &uri[authority_start..];
    let authority_len = rest.find(['/', '?']).unwrap_or(rest.len());
    match rest[..authority_len].rfind('@') {
        Some(at) => format!(
            "{}***{}",
            &uri[..authority_start],
            &rest[at..]
        ),
        None => uri.to_string(),
    }
}

fn parse_duration_field(field: &str, value: &str) -> Result<Duration> {
    humantime::parse_duration(value)
        .map_err(|e| ReplicationError::Config(format!("{field}: invalid duration {value:?}: {e}")))
}

// ═══════════════════════════════════════════════════════════════════════════════
// ReplicationSettings
// ═══════════════════════════════════════════════════════════════════════════════

/// Tunables for reading and applying.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ReplicationSettings {
    #[serde(default)]
    pub stream: StreamConfig,
    #[serde(default)]
    pub apply: ApplyConfig,
}

// ═══════════════════════════════════════════════════════════════════════════════
// StreamConfig: change stream reading
// ═══════════════════════════════════════════════════════════════════════════════

/// Change stream settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StreamConfig {
    /// Maximum events per batch, also sent to the server as the cursor batch size.
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,

    /// How long the server may wait for new events per round-trip (e.g. "1s").
    /// Server default when unset.
    #[serde(default)]
    pub max_await: Option<String>,

    /// How long a batch stays open for more changes once it holds its first
    /// one (e.g. "250ms"). Bounds how long a steady trickle of changes can
    /// hold back applying.
    #[serde(default = "default_batch_linger")]
    pub batch_linger: String,
}

fn default_batch_size() -> usize {
    2000
}

fn default_batch_linger() -> String {
    "250ms".to_string()
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            batch_size: default_batch_size(),
            max_await: None,
            batch_linger: default_batch_linger(),
        }
    }
}

impl StreamConfig {
    /// Parsed `max_await`; `None` if unset or unparsable.
    pub fn max_await_duration(&self) -> Option<Duration> {
        self.max_await
            .as_deref()
            .and_then(|s| humantime::parse_duration(s).ok())
    }

    /// Parse the batch linger string to a Duration.
    pub fn batch_linger_duration(&self) -> Duration {
        humantime::parse_duration(&self.batch_linger).unwrap_or(Duration::from_millis(250))
    }

    fn validate(&self) -> Result<()> {
        parse_duration_field("batch linger", &self.batch_linger)?;
        if self.batch_size == 0 {
            return Err(ReplicationError::Config("batch size must be at least 1".into()));
        }
        if self.batch_size > u32::MAX as usize {
            return Err(ReplicationError::Config(format!(
                "batch size {} is too large",
                self.batch_size
            )));
        }
        if let Some(ref max_await) = self.max_await {
            parse_duration_field("max_await", max_await)?;
        }
        Ok(())
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// ApplyConfig: per-change application
// ═══════════════════════════════════════════════════════════════════════════════

/// How the `_id` from a change is compared against documents on the target.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IdMatch {
    /// Compare against the string form of the id (ObjectId as hex, numbers in
    /// decimal). Matches only targets whose `_id`s are strings.
    #[default]
    StringForm,
    /// Compare against the id exactly as the source stored it.
    Native,
}

/// Per-change apply settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApplyConfig {
    /// Deadline for one change's transaction (e.g. "2s").
    #[serde(default = "default_apply_timeout")]
    pub timeout: String,

    /// Total attempts per change. `1` disables retry.
    #[serde(default = "default_max_attempts")]
    pub max_attempts: usize,

    /// Delay before the first retry (e.g. "100ms").
    #[serde(default = "default_retry_initial_delay")]
    pub retry_initial_delay: String,

    /// Ceiling for the retry backoff (e.g. "5s").
    #[serde(default = "default_retry_max_delay")]
    pub retry_max_delay: String,

    #[serde(default)]
    pub id_match: IdMatch,

    /// Log the writes instead of performing them.
    #[serde(default)]
    pub dry_run: bool,
}

fn default_apply_timeout() -> String {
    "2s".to_string()
}

fn default_max_attempts() -> usize {
    1
}

fn default_retry_initial_delay() -> String {
    "100ms".to_string()
}

fn default_retry_max_delay() -> String {
    "5s".to_string()
}

impl Default for ApplyConfig {
    fn default() -> Self {
        Self {
            timeout: default_apply_timeout(),
            max_attempts: default_max_attempts(),
            retry_initial_delay: default_retry_initial_delay(),
            retry_max_delay: default_retry_max_delay(),
            id_match: IdMatch::default(),
            dry_run: false,
        }
    }
}

impl ApplyConfig {
    /// Parse the timeout string to a Duration.
    pub fn timeout_duration(&self) -> Duration {
        humantime::parse_duration(&self.timeout).unwrap_or(Duration::from_secs(2))
    }

    /// Retry policy for the applier.
    pub fn retry_config(&self) -> RetryConfig {
        let defaults = RetryConfig::default();
        RetryConfig {
            max_attempts: self.max_attempts.max(1),
            initial_delay: humantime::parse_duration(&self.retry_initial_delay)
                .unwrap_or(defaults.initial_delay),
            max_delay: humantime::parse_duration(&self.retry_max_delay)
                .unwrap_or(defaults.max_delay),
            backoff_factor: defaults.backoff_factor,
        }
    }

    fn validate(&self) -> Result<()> {
        let timeout = parse_duration_field("apply timeout", &self.timeout)?;
        if timeout.is_zero() {
            return Err(ReplicationError::Config("apply timeout must be non-zero".into()));
        }
        if self.max_attempts == 0 {
            return Err(ReplicationError::Config("max apply attempts must be at least 1".into()));
        }
        parse_duration_field("retry initial delay", &self.retry_initial_delay)?;
        parse_duration_field("retry max delay", &self.retry_max_delay)?;
        Ok(())
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Tests
// ═══════════════════════════════════════════════════════════════════════════════
