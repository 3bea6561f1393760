//! Run Manifest - per-file and per-block outcomes of a load

use crate::table::BlockKey;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// What a manifest entry refers to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Scope {
    /// A whole diagnostic file
    File {
        /// Cycle label
        cycle: String,
        /// File path
        path: PathBuf,
    },
    /// One block of a cycle
    Block {
        /// Cycle label
        cycle: String,
        /// Block key
        key: BlockKey,
    },
    /// A background/analysis pair
    Cycle {
        /// Cycle label
        cycle: String,
    },
}

/// Result for one scope.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Outcome {
    /// Loaded
    Succeeded,
    /// Left out with a reason; the rest of the scope's parent loaded
    Skipped(String),
    /// Failed with the error message
    Failed(String),
}

/// One manifest line.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ManifestEntry {
    /// What the outcome refers to
    pub scope: Scope,
    /// What happened
    pub outcome: Outcome,
}

/// Outcomes of loading an experiment.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunManifest {
    entries: Vec<ManifestEntry>,
}

impl RunManifest {
    /// Create an empty manifest.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Record an outcome.
    pub fn record(&mut self, scope: Scope, outcome: Outcome) {
        self.entries.push(ManifestEntry { scope, outcome });
    }

    /// Append another manifest's entries.
    pub fn extend(&mut self, other: Self) {
        self.entries.extend(other.entries);
    }

    /// Every entry, in load order.
    #[must_use]
    pub fn entries(&self) -> &[ManifestEntry] {
        &self.entries
    }

    /// Entries that loaded.
    pub fn succeeded(&self) -> impl Iterator<Item = &ManifestEntry> {
        self.entries
            .iter()
            .filter(|e| e.outcome == Outcome::Succeeded)
    }

    /// Entries that were skipped.
    pub fn skipped(&self) -> impl Iterator<Item = &ManifestEntry> {
        self.entries
            .iter()
            .filter(|e| matches!(e.outcome, Outcome::Skipped(_)))
    }

    /// Entries that failed.
    pub fn failed(&self) -> impl Iterator<Item = &ManifestEntry> {
        self.entries
            .iter()
            .filter(|e| matches!(e.outcome, Outcome::Failed(_)))
    }

    /// True if nothing failed.
    #[must_use]
    pub fn is_clean(&self) -> bool {
        self.failed().next().is_none()
    }

    /// Serialize as pretty JSON.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::Json`] if serialization fails.
    pub fn to_json(&self) -> crate::Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }
}
