// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Database filter.
//!
//! The change stream is cluster-wide; only changes whose database is in the
//! configured set are replicated. Matching is case-insensitive, so `Sales`,
//! `sales` and `SALES` all name the same database. Writes always go to the
//! database as it was configured, whatever spelling the change carried.

use crate::stream::ChangeEvent;
use std::collections::HashMap;

/// Case-insensitive set of database names to replicate.
#[derive(Debug, Clone, Default)]
pub struct DatabaseFilter {
    /// lowercased name -> configured spelling
    names: HashMap<String, String>,
}

impl DatabaseFilter {
    /// Build a filter from configured names.
    ///
    /// Names are trimmed and blank entries dropped. If two entries differ only
    /// by case, the first spelling is kept.
    pub fn new<I, S>(names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut map = HashMap::new();
        for name in names {
            let name = name.as_ref().trim();
            if name.is_empty() {
                continue;
            }
            map.entry(name.to_lowercase()).or_insert_with(|| name.to_string());
        }
        Self { names: map }
    }

    /// The configured spelling of `database`, if it is one of ours.
    pub fn resolve(&self, database: &str) -> Option<&str> {
        self.names.get(&database.to_lowercase()).map(String::as_str)
    }

    /// Whether the change belongs to a configured database.
    pub fn belongs(&self, event: &ChangeEvent) -> bool {
        self.resolve(&event.database).is_some()
    }

    pub fn len(&self) -> usize {
        self.names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }

    /// Configured names, sorted for stable log output.
    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.names.values().map(String::as_str).collect();
        names.sort_unstable();
        names
    }
}
