//! Analysis configuration
//!
//! ```rust
//! use diag_impact::config::AnalysisConfig;
//! use diag_impact::merge::Alignment;
//!
//! let config = AnalysisConfig::builder()
//!     .alignment(Alignment::Identity)
//!     .bootstrap_rounds(500)
//!     .build()
//!     .unwrap();
//! assert_eq!(config.bootstrap_rounds, 500);
//!
//! let parsed = AnalysisConfig::from_json_str(r#"{"seed": 7}"#).unwrap();
//! assert_eq!(parsed.seed, 7);
//! assert_eq!(parsed.bootstrap_rounds, 1000);
//! ```

use crate::compare::{ExperimentComparator, Metric};
use crate::decoder::DiagnosticDecoder;
use crate::impact::{FractionKind, ImpactAggregator, ImpactSource, Inclusion};
use crate::merge::{Alignment, CycleMerger};
use crate::schema::{conventional_with_impact, SchemaRegistry};
use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Settings shared by loading, aggregation and comparison.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct AnalysisConfig {
    /// Record pairing within a block
    pub alignment: Alignment,
    /// Per-record impact source
    pub impact_source: ImpactSource,
    /// Fractional impact normalization
    pub fraction: FractionKind,
    /// Classes contributing to impact sums
    pub inclusion: Inclusion,
    /// Bootstrap resamples for confidence intervals
    pub bootstrap_rounds: usize,
    /// Confidence interval coverage, in (0, 1)
    pub confidence_level: f64,
    /// Significance level for adjusted p-values, in (0, 1)
    pub significance: f64,
    /// Bootstrap RNG seed
    pub seed: u64,
    /// Worker threads for loading; `None` uses the global pool
    pub threads: Option<usize>,
    /// Family name passed to the decoder as a hint
    pub family: Option<String>,
    /// Conventional files carry trailing oma, impact and dfs columns
    pub impact_columns: bool,
    /// Metrics the comparator evaluates
    pub metrics: Vec<Metric>,
}

impl Default for AnalysisConfig {
    fn default() -> Self {
        Self {
            alignment: Alignment::default(),
            impact_source: ImpactSource::default(),
            fraction: FractionKind::default(),
            inclusion: Inclusion::default(),
            bootstrap_rounds: 1000,
            confidence_level: 0.95,
            significance: 0.05,
            seed: 42,
            threads: None,
            family: None,
            impact_columns: false,
            metrics: Metric::ALL.to_vec(),
        }
    }
}

impl AnalysisConfig {
    /// Builder starting from the defaults.
    #[must_use]
    pub fn builder() -> AnalysisConfigBuilder {
        AnalysisConfigBuilder::new()
    }

    /// Parse and validate a JSON document. Missing keys take defaults.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Json`] for malformed JSON or unknown keys and
    /// [`Error::Config`] for out-of-range values.
    pub fn from_json_str(json: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Read and validate a JSON file.
    ///
    /// # Errors
    ///
    /// As [`Self::from_json_str`], plus [`Error::Io`] if the file cannot be read.
    pub fn from_path(path: impl AsRef<Path>) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        Self::from_json_str(&text)
    }

    /// Serialize as pretty JSON.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Json`] if serialization fails.
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// Check every value is in range.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] naming the first offending key.
    pub fn validate(&self) -> Result<()> {
        if self.bootstrap_rounds == 0 {
            return Err(Error::Config("bootstrap_rounds must be positive".into()));
        }
        if !(self.confidence_level > 0.0 && self.confidence_level < 1.0) {
            return Err(Error::Config(format!(
                "confidence_level must be in (0, 1), got {}",
                self.confidence_level
            )));
        }
        if !(self.significance > 0.0 && self.significance < 1.0) {
            return Err(Error::Config(format!(
                "significance must be in (0, 1), got {}",
                self.significance
            )));
        }
        if self.threads == Some(0) {
            return Err(Error::Config("threads must be positive".into()));
        }
        if self.inclusion.classes().is_empty() {
            return Err(Error::Config("inclusion must name at least one class".into()));
        }
        if self.metrics.is_empty() {
            return Err(Error::Config("metrics must not be empty".into()));
        }
        Ok(())
    }

    /// Decoder over the stock families, with the impact-column conventional
    /// layout taking precedence when `impact_columns` is set.
    #[must_use]
    pub fn decoder(&self) -> DiagnosticDecoder {
        let mut registry = SchemaRegistry::default();
        if self.impact_columns {
            registry.register(conventional_with_impact());
        }
        DiagnosticDecoder::with_registry(registry)
    }

    /// Merger configured with the alignment policy.
    #[must_use]
    pub fn merger(&self) -> CycleMerger {
        CycleMerger::new().with_alignment(self.alignment)
    }

    /// Aggregator configured with source, inclusion and fraction policy.
    #[must_use]
    pub fn aggregator(&self) -> ImpactAggregator {
        ImpactAggregator::new()
            .with_inclusion(self.inclusion.clone())
            .with_source(self.impact_source)
            .with_fraction_policy(self.fraction.policy())
    }

    /// Comparator configured with every statistical setting.
    #[must_use]
    pub fn comparator(&self) -> ExperimentComparator {
        ExperimentComparator::new()
            .with_aggregator(self.aggregator())
            .with_metrics(self.metrics.iter().copied())
            .with_bootstrap(self.bootstrap_rounds, self.confidence_level)
            .with_significance(self.significance)
            .with_seed(self.seed)
    }
}

/// Builder for `AnalysisConfig`.
#[derive(Debug, Default)]
pub struct AnalysisConfigBuilder {
    config: AnalysisConfig,
}

impl AnalysisConfigBuilder {
    /// Builder holding the defaults.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the alignment policy.
    #[must_use]
    pub const fn alignment(mut self, alignment: Alignment) -> Self {
        self.config.alignment = alignment;
        self
    }

    /// Set the impact source.
    #[must_use]
    pub const fn impact_source(mut self, source: ImpactSource) -> Self {
        self.config.impact_source = source;
        self
    }

    /// Set the fraction policy.
    #[must_use]
    pub const fn fraction(mut self, fraction: FractionKind) -> Self {
        self.config.fraction = fraction;
        self
    }

    /// Set the inclusion rule.
    #[must_use]
    pub fn inclusion(mut self, inclusion: Inclusion) -> Self {
        self.config.inclusion = inclusion;
        self
    }

    /// Set the bootstrap rounds.
    #[must_use]
    pub const fn bootstrap_rounds(mut self, rounds: usize) -> Self {
        self.config.bootstrap_rounds = rounds;
        self
    }

    /// Set the confidence level.
    #[must_use]
    pub const fn confidence_level(mut self, level: f64) -> Self {
        self.config.confidence_level = level;
        self
    }

    /// Set the significance level.
    #[must_use]
    pub const fn significance(mut self, alpha: f64) -> Self {
        self.config.significance = alpha;
        self
    }

    /// Set the RNG seed.
    #[must_use]
    pub const fn seed(mut self, seed: u64) -> Self {
        self.config.seed = seed;
        self
    }

    /// Set the loader's worker threads.
    #[must_use]
    pub const fn threads(mut self, threads: usize) -> Self {
        self.config.threads = Some(threads);
        self
    }

    /// Set the decoder family hint.
    #[must_use]
    pub fn family(mut self, family: impl Into<String>) -> Self {
        self.config.family = Some(family.into());
        self
    }

    /// Decode conventional files with trailing impact columns.
    #[must_use]
    pub const fn impact_columns(mut self, enabled: bool) -> Self {
        self.config.impact_columns = enabled;
        self
    }

    /// Set the compared metrics.
    #[must_use]
    pub fn metrics(mut self, metrics: impl IntoIterator<Item = Metric>) -> Self {
        self.config.metrics = metrics.into_iter().collect();
        self
    }

    /// Validate and build.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] for out-of-range values.
    pub fn build(self) -> Result<AnalysisConfig> {
        self.config.validate()?;
        Ok(self.config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::impact::ObservationClass;

    #[test]
    fn test_defaults_are_valid() {
        let config = AnalysisConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.metrics.len(), Metric::ALL.len());
        assert_eq!(config.inclusion, Inclusion::assimilated());
    }

    #[test]
    fn test_json_round_trip() {
        let config = AnalysisConfig::builder()
            .alignment(Alignment::Identity)
            .fraction(FractionKind::AbsoluteShare)
            .inclusion(Inclusion::all())
            .family("rad")
            .threads(2)
            .build()
            .unwrap();
        let json = config.to_json().unwrap();
        assert_eq!(AnalysisConfig::from_json_str(&json).unwrap(), config);
    }

    #[test]
    fn test_json_names() {
        let config = AnalysisConfig::from_json_str(
            r#"{"alignment": "identity", "inclusion": ["assimilated", "monitored_assimilated"], "metrics": ["total_impact"]}"#,
        )
        .unwrap();
        assert_eq!(config.alignment, Alignment::Identity);
        assert!(config.inclusion.includes(ObservationClass::MonitoredAssimilated));
        assert_eq!(config.metrics, vec![Metric::TotalImpact]);
    }

    #[test]
    fn test_rejects_out_of_range() {
        assert!(matches!(
            AnalysisConfig::builder().confidence_level(1.0).build(),
            Err(Error::Config(_))
        ));
        assert!(matches!(
            AnalysisConfig::builder().bootstrap_rounds(0).build(),
            Err(Error::Config(_))
        ));
        assert!(matches!(
            AnalysisConfig::builder().threads(0).build(),
            Err(Error::Config(_))
        ));
        assert!(matches!(
            AnalysisConfig::from_json_str(r#"{"significance": 2.0}"#),
            Err(Error::Config(_))
        ));
    }

    #[test]
    fn test_impact_columns_select_decoder_layout() {
        use crate::schema::Framing;

        let stock = AnalysisConfig::default().decoder();
        assert!(stock.registry().schema("conv_impact").is_err());
        assert_eq!(stock.registry().for_framing(Framing::Blocked).unwrap().tag(), "conventional");

        let config = AnalysisConfig::from_json_str(r#"{"impact_columns": true}"#).unwrap();
        let decoder = config.decoder();
        assert_eq!(
            decoder.registry().for_framing(Framing::Blocked).unwrap().tag(),
            "conventional_impact"
        );
        assert!(decoder.registry().schema("conv").is_ok());
    }

    #[test]
    fn test_unknown_key_is_json_error() {
        assert!(matches!(
            AnalysisConfig::from_json_str(r#"{"bootstrap": 10}"#),
            Err(Error::Json(_))
        ));
    }
}
