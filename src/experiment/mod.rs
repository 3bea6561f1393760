//! Experiment loading
//!
//! An experiment is a named series of cycles, each a background (`ges`) and
//! an analysis (`anl`) diagnostic file. [`load`] decodes and merges every
//! pair, keeps going past failures and reports what happened in a
//! [`RunManifest`].
//!
//! ```text
//! ExperimentSpec ──< CycleFiles (N)
//!        │
//!      load ──> Experiment ──< MergedCycle (N, by cycle time)
//!           └─> RunManifest ──< ManifestEntry (file | block | cycle)
//! ```
//!
//! ```rust,no_run
//! use diag_impact::config::AnalysisConfig;
//! use diag_impact::experiment::{self, ExperimentSpec};
//!
//! let spec = ExperimentSpec::builder("control")
//!     .cycle("2024010100", "/data/control/diag_conv_ges.2024010100", "/data/control/diag_conv_anl.2024010100")
//!     .cycle("2024010106", "/data/control/diag_conv_ges.2024010106", "/data/control/diag_conv_anl.2024010106")
//!     .build();
//! let loaded = experiment::load(&spec, &AnalysisConfig::default()).unwrap();
//! for entry in loaded.manifest.failed() {
//!     eprintln!("{:?}: {:?}", entry.scope, entry.outcome);
//! }
//! ```

mod manifest;
mod spec;

pub use manifest::{ManifestEntry, Outcome, RunManifest, Scope};
pub use spec::{CycleFiles, ExperimentSpec, ExperimentSpecBuilder};

use crate::config::AnalysisConfig;
use crate::decoder::DiagnosticDecoder;
use crate::merge::{CycleMerger, MergedCycle};
use crate::table::ObservationTable;
use crate::Result;
#[cfg(feature = "rayon")]
use rayon::prelude::*;
use std::fs::File;
use std::io::BufReader;
use std::path::Path;
use tracing::{info, info_span, warn};

/// Merged cycles of one experiment, ordered by cycle time.
#[derive(Debug, Clone, PartialEq)]
pub struct Experiment {
    name: String,
    cycles: Vec<MergedCycle>,
}

impl Experiment {
    /// Create an experiment; cycles are sorted by cycle time.
    #[must_use]
    pub fn new(name: impl Into<String>, mut cycles: Vec<MergedCycle>) -> Self {
        cycles.sort_by_key(MergedCycle::cycle);
        Self {
            name: name.into(),
            cycles,
        }
    }

    /// Get the experiment name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Get the merged cycles.
    #[must_use]
    pub fn cycles(&self) -> &[MergedCycle] {
        &self.cycles
    }

    /// Number of cycles
    #[must_use]
    pub fn len(&self) -> usize {
        self.cycles.len()
    }

    /// True if no cycle loaded
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.cycles.is_empty()
    }
}

/// Result of [`load`].
#[derive(Debug, Clone)]
pub struct LoadedExperiment {
    /// Cycles that decoded and merged
    pub experiment: Experiment,
    /// Per-file, per-block and per-cycle outcomes
    pub manifest: RunManifest,
}

/// Decode one diagnostic file.
///
/// # Errors
///
/// Returns [`crate::Error::Io`] if the file cannot be opened, otherwise any
/// decode error.
pub fn decode_path(path: impl AsRef<Path>, hint: Option<&str>) -> Result<ObservationTable> {
    decode_with(&DiagnosticDecoder::new(), path.as_ref(), hint)
}

fn decode_with(decoder: &DiagnosticDecoder, path: &Path, hint: Option<&str>) -> Result<ObservationTable> {
    let span = info_span!("decode_file", path = %path.display());
    let _guard = span.enter();
    let file = File::open(path)?;
    decoder.decode(BufReader::new(file), hint)
}

/// Decode and merge every cycle of an experiment.
///
/// A failing file drops its cycle and is recorded in the manifest; the
/// other cycles still load.
///
/// # Errors
///
/// Returns [`crate::Error::Config`] if the configuration is invalid or the
/// worker pool cannot be built.
pub fn load(spec: &ExperimentSpec, config: &AnalysisConfig) -> Result<LoadedExperiment> {
    config.validate()?;
    let span = info_span!("load_experiment", name = spec.name(), cycles = spec.cycles().len());
    let _guard = span.enter();

    let decoder = config.decoder();
    let merger = config.merger();
    let hint = config.family.as_deref();
    let run = |files: &CycleFiles| load_cycle(&decoder, &merger, files, hint);

    #[cfg(feature = "rayon")]
    let results: Vec<(Option<MergedCycle>, RunManifest)> = match config.threads {
        Some(threads) => rayon::ThreadPoolBuilder::new()
            .num_threads(threads)
            .build()
            .map_err(|e| crate::Error::Config(format!("worker pool: {e}")))?
            .install(|| spec.cycles().par_iter().map(run).collect()),
        None => spec.cycles().par_iter().map(run).collect(),
    };
    #[cfg(not(feature = "rayon"))]
    let results: Vec<(Option<MergedCycle>, RunManifest)> = spec.cycles().iter().map(run).collect();

    let mut manifest = RunManifest::new();
    let mut cycles = Vec::with_capacity(results.len());
    for (cycle, entries) in results {
        manifest.extend(entries);
        cycles.extend(cycle);
    }
    info!(
        loaded = cycles.len(),
        failed = manifest.failed().count(),
        "experiment loaded"
    );
    Ok(LoadedExperiment {
        experiment: Experiment::new(spec.name(), cycles),
        manifest,
    })
}

fn load_cycle(
    decoder: &DiagnosticDecoder,
    merger: &CycleMerger,
    files: &CycleFiles,
    hint: Option<&str>,
) -> (Option<MergedCycle>, RunManifest) {
    let mut manifest = RunManifest::new();
    let background = decode_recorded(decoder, files, files.background(), hint, &mut manifest);
    let analysis = decode_recorded(decoder, files, files.analysis(), hint, &mut manifest);
    let (Some(background), Some(analysis)) = (background, analysis) else {
        return (None, manifest);
    };

    let cycle_scope = Scope::Cycle {
        cycle: files.label().to_string(),
    };
    match merger.merge(&background, &analysis) {
        Ok(merged) => {
            for failure in merged.failures() {
                manifest.record(
                    Scope::Block {
                        cycle: files.label().to_string(),
                        key: failure.key.clone(),
                    },
                    Outcome::Failed(failure.to_error().to_string()),
                );
            }
            manifest.record(cycle_scope, Outcome::Succeeded);
            (Some(merged), manifest)
        }
        Err(e) => {
            warn!(cycle = files.label(), error = %e, "cycle merge failed");
            manifest.record(cycle_scope, Outcome::Failed(e.to_string()));
            (None, manifest)
        }
    }
}

fn decode_recorded(
    decoder: &DiagnosticDecoder,
    files: &CycleFiles,
    path: &Path,
    hint: Option<&str>,
    manifest: &mut RunManifest,
) -> Option<ObservationTable> {
    let scope = || Scope::File {
        cycle: files.label().to_string(),
        path: path.to_path_buf(),
    };
    match decode_with(decoder, path, hint) {
        Ok(table) => {
            for warning in table.warnings() {
                manifest.record(scope(), Outcome::Skipped(warning.to_string()));
            }
            manifest.record(scope(), Outcome::Succeeded);
            Some(table)
        }
        Err(e) => {
            warn!(path = %path.display(), error = %e, "diagnostic file failed");
            manifest.record(scope(), Outcome::Failed(e.to_string()));
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::encoder::encode_to_vec;
    use crate::schema::{Field, SchemaRegistry};
    use crate::table::{BlockKey, ObservationRecord};
    use std::path::PathBuf;

    fn write_cycle(dir: &Path, label: &str, idate: i32, omf: &[f64]) -> CycleFiles {
        let layout = SchemaRegistry::default()
            .schema("conv")
            .unwrap()
            .shared_layout("t", 20, 0);
        let mut table = ObservationTable::builder("conventional", idate).unwrap();
        for v in omf {
            let record = ObservationRecord::builder(layout.clone())
                .station("72201")
                .set(Field::Kx, 120.0)
                .set(Field::Omf, *v)
                .set(Field::Idqc, 0.0)
                .set(Field::Iuse, 1.0)
                .build();
            table.push(BlockKey::new("t", 120), &layout, record);
        }
        let bytes = encode_to_vec(&table.build()).unwrap();
        let ges = dir.join(format!("diag_conv_ges.{label}"));
        let anl = dir.join(format!("diag_conv_anl.{label}"));
        std::fs::write(&ges, &bytes).unwrap();
        std::fs::write(&anl, &bytes).unwrap();
        CycleFiles::new(label, ges, anl)
    }

    fn scratch(name: &str) -> PathBuf {
        let dir = std::env::temp_dir().join(format!("diag-impact-{name}-{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        dir
    }

    #[test]
    fn test_load_sorts_cycles_and_records_failures() {
        let dir = scratch("load");
        let late = write_cycle(&dir, "2024010106", 2_024_010_106, &[0.5, 0.1]);
        let early = write_cycle(&dir, "2024010100", 2_024_010_100, &[0.2]);
        let missing = CycleFiles::new("2024010112", dir.join("nope.ges"), dir.join("nope.anl"));
        let mut spec = ExperimentSpec::new("ctrl");
        spec.push(late);
        spec.push(missing);
        spec.push(early);

        let loaded = load(&spec, &AnalysisConfig::default()).unwrap();
        assert_eq!(loaded.experiment.len(), 2);
        assert!(loaded.experiment.cycles()[0].cycle() < loaded.experiment.cycles()[1].cycle());
        assert_eq!(loaded.manifest.failed().count(), 2);
        assert!(!loaded.manifest.is_clean());
        std::fs::remove_dir_all(dir).ok();
    }

    #[test]
    fn test_decode_path_missing_file_is_io() {
        assert!(matches!(
            decode_path("/definitely/not/here", None),
            Err(crate::Error::Io(_))
        ));
    }
}
