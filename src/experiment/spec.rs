//! Experiment Spec - which files make up an experiment

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Background and analysis diagnostic files of one cycle.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct CycleFiles {
    label: String,
    background: PathBuf,
    analysis: PathBuf,
}

impl CycleFiles {
    /// Create a cycle entry.
    ///
    /// # Arguments
    ///
    /// * `label` - Cycle label used in the run manifest, e.g. `2024010100`
    /// * `background` - First outer loop (`ges`) file
    /// * `analysis` - Final outer loop (`anl`) file
    #[must_use]
    pub fn new(label: impl Into<String>, background: impl Into<PathBuf>, analysis: impl Into<PathBuf>) -> Self {
        Self {
            label: label.into(),
            background: background.into(),
            analysis: analysis.into(),
        }
    }

    /// Get the cycle label.
    #[must_use]
    pub fn label(&self) -> &str {
        &self.label
    }

    /// Get the background file path.
    #[must_use]
    pub fn background(&self) -> &Path {
        &self.background
    }

    /// Get the analysis file path.
    #[must_use]
    pub fn analysis(&self) -> &Path {
        &self.analysis
    }
}

/// Named list of cycles to load as one experiment.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ExperimentSpec {
    name: String,
    cycles: Vec<CycleFiles>,
}

impl ExperimentSpec {
    /// Create a spec with no cycles.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            cycles: Vec::new(),
        }
    }

    /// Create a builder.
    #[must_use]
    pub fn builder(name: impl Into<String>) -> ExperimentSpecBuilder {
        ExperimentSpecBuilder::new(name)
    }

    /// Get the experiment name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Get the cycle files, in insertion order.
    #[must_use]
    pub fn cycles(&self) -> &[CycleFiles] {
        &self.cycles
    }

    /// Append a cycle.
    pub fn push(&mut self, cycle: CycleFiles) {
        self.cycles.push(cycle);
    }
}

/// Builder for `ExperimentSpec`.
#[derive(Debug)]
pub struct ExperimentSpecBuilder {
    spec: ExperimentSpec,
}

impl ExperimentSpecBuilder {
    /// Create a new builder with the experiment name.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            spec: ExperimentSpec::new(name),
        }
    }

    /// Add a cycle.
    #[must_use]
    pub fn cycle(mut self, label: impl Into<String>, background: impl Into<PathBuf>, analysis: impl Into<PathBuf>) -> Self {
        self.spec.push(CycleFiles::new(label, background, analysis));
        self
    }

    /// Build the `ExperimentSpec`.
    #[must_use]
    pub fn build(self) -> ExperimentSpec {
        self.spec
    }
}
