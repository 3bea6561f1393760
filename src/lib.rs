//! # diag-impact: GSI Diagnostic Decoding and Observation Impact
//!
//! Reads the binary diagnostic files a GSI analysis writes for each outer
//! loop, pairs the first (`ges`) and last (`anl`) outer loop of a cycle, and
//! reduces many cycles to per-key observation impact statistics. Two
//! experiments can then be compared cycle by cycle with paired tests.
//!
//! ## Pipeline
//!
//! ```text
//! bytes ──DiagnosticDecoder──> ObservationTable (ges)  ┐
//! bytes ──DiagnosticDecoder──> ObservationTable (anl)  ┴─CycleMerger─> MergedCycle
//! [MergedCycle] ──ImpactAggregator──> ImpactSummary
//! Experiment A, Experiment B ──ExperimentComparator──> Comparison
//! ```
//!
//! ## Design Principles
//!
//! - **Layouts are data**: record families and their column positions live
//!   in a [`schema::SchemaRegistry`]; adding a family does not touch the
//!   decoder
//! - **Missing is not zero**: every fill sentinel decodes to
//!   [`schema::Reading::Missing`] and is left out of sums and means
//! - **Failures stay local**: a bad block or file is reported and its
//!   siblings still load
//!
//! ## Example
//!
//! ```rust
//! use diag_impact::decoder::DiagnosticDecoder;
//! use diag_impact::encoder::encode_to_vec;
//! use diag_impact::schema::{Field, SchemaRegistry};
//! use diag_impact::table::{BlockKey, ObservationRecord, ObservationTable};
//! use diag_impact::{CycleMerger, ImpactAggregator};
//!
//! let layout = SchemaRegistry::default().schema("conv")?.shared_layout("t", 20, 0);
//! let record = ObservationRecord::builder(layout.clone())
//!     .station("72201")
//!     .set(Field::Kx, 120.0)
//!     .set(Field::Idqc, 0.0)
//!     .set(Field::Iuse, 1.0)
//!     .set(Field::InverseError, 1.0)
//!     .set(Field::Omf, 1.5)
//!     .build();
//! let mut builder = ObservationTable::builder("conventional", 2_024_010_100)?;
//! builder.push(BlockKey::new("t", 120), &layout, record);
//! let table = builder.build();
//!
//! let bytes = encode_to_vec(&table)?;
//! let decoded = DiagnosticDecoder::new().decode(bytes.as_slice(), None)?;
//! let cycle = CycleMerger::new().merge(&decoded, &decoded)?;
//! let summary = ImpactAggregator::new().aggregate(&[cycle]);
//! assert_eq!(summary.keys()[0].assimilated(), 1);
//! # Ok::<(), diag_impact::Error>(())
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]

pub mod compare;
pub mod config;
pub mod decoder;
pub mod encoder;
pub mod error;
pub mod experiment;
pub mod impact;
pub mod logging;
pub mod merge;
pub mod schema;
pub mod table;

pub use compare::{Comparison, ExperimentComparator, Metric};
pub use config::AnalysisConfig;
pub use decoder::DiagnosticDecoder;
pub use error::{Error, Result};
pub use experiment::{Experiment, ExperimentSpec, RunManifest};
pub use impact::{ImpactAggregator, ImpactKey, ImpactSummary};
pub use merge::{CycleMerger, MergedCycle};
pub use table::{BlockKey, ObservationTable, ObservationTableBuilder, TypeCode};
