// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Failure classification for changes that didn't apply.
//!
//! Nothing here stops the loop. The only question is how loudly to say so:
//!
//! | Failure | Action | Logged with |
//! |---------|--------|-------------|
//! | Duplicate key | `Continue` | lag, document key (info) |
//! | Other write error | `ContinueWithWarning` | lag, op, whole change |
//! | Anything else | `ContinueWithWarning` | lag, op, document key, error kind and message |

use crate::error::ReplicationError;
use crate::metrics;
use crate::stream::ChangeEvent;
use crate::target::TargetError;
use mongodb::bson::Bson;
use tracing::{info, warn};

/// What to do after a change failed to apply.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureAction {
    /// Expected under at-least-once delivery; move on quietly.
    Continue,
    /// Unexpected; report it, then move on.
    ContinueWithWarning,
}

/// Decide how to treat a per-change failure.
pub fn classify(error: &ReplicationError, _event: &ChangeEvent) -> FailureAction {
    if error.is_duplicate_key() {
        FailureAction::Continue
    } else {
        FailureAction::ContinueWithWarning
    }
}

/// Log a per-change failure according to its action.
pub fn report(action: FailureAction, error: &ReplicationError, event: &ChangeEvent, lag_secs: Option<u64>) {
    let lag = lag_secs.unwrap_or(0);
    let key = document_key_json(event);

    match action {
        FailureAction::Continue => {
            info!(
                lag_secs = lag,
                ns = %format_args!("{}.{}", event.database, event.collection),
                "{}",
                duplicate_line(lag, &key)
            );
        }
        FailureAction::ContinueWithWarning => match error {
            ReplicationError::Target(TargetError::Write { code, .. }) => {
                warn!(
                    lag_secs = lag,
                    op = %event.op,
                    code = *code,
                    error = %error,
                    change = %event.to_extjson(),
                    "{}s, {}, write failed",
                    lag,
                    event.op
                );
            }
            _ => {
                warn!(
                    lag_secs = lag,
                    op = %event.op,
                    document_key = %key,
                    kind = error.kind_label(),
                    error = %error,
                    "{}s, {}, {} failed: {}",
                    lag,
                    event.op,
                    key,
                    error
                );
            }
        },
    }
}

/// Classify, report and count a per-change failure.
pub fn handle_failure(error: &ReplicationError, event: &ChangeEvent, lag_secs: Option<u64>) -> FailureAction {
    let action = classify(error, event);
    if action == FailureAction::Continue {
        metrics::record_duplicate();
    } else {
        metrics::record_apply_failure(error.kind_label());
    }
    report(action, error, event, lag_secs);
    action
}

fn duplicate_line(lag_secs: u64, key: &str) -> String {
    format!("{lag_secs}s, DupKey={key}, ignore...")
}

fn document_key_json(event: &ChangeEvent) -> String {
    match event.document_key {
        Some(ref key) => Bson::Document(key.clone()).into_relaxed_extjson().to_string(),
        None => "null".to_string(),
    }
}
