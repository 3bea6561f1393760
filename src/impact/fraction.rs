//! Fractional impact normalization policies

use super::sum::CompensatedSum;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;

/// Per-key totals a policy normalizes.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct KeyTotals {
    /// Total impact of the key
    pub total_impact: f64,
    /// Total DFS of the key, if any record carried one
    pub dfs: Option<f64>,
}

/// Normalized shares of one key, in percent.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Fractions {
    /// Fractional impact
    pub impact: Option<f64>,
    /// Fractional background impact
    pub background: Option<f64>,
}

/// Turns per-key totals into fractional impact shares.
pub trait FractionPolicy: Send + Sync + fmt::Debug {
    /// Policy name, as recorded in summaries
    fn name(&self) -> &'static str;

    /// Shares for every key, in input order.
    fn fractions(&self, totals: &[KeyTotals]) -> Vec<Fractions>;
}

fn share(value: f64, denominator: f64) -> Option<f64> {
    (denominator != 0.0 && denominator.is_finite()).then(|| value / denominator * 100.0)
}

fn dfs_denominator(totals: &[KeyTotals], magnitude: bool) -> f64 {
    totals
        .iter()
        .filter_map(|t| t.dfs)
        .map(|d| if magnitude { d.abs() } else { d })
        .collect::<CompensatedSum>()
        .value()
}

fn impact_denominator(totals: &[KeyTotals], magnitude: bool) -> f64 {
    totals
        .iter()
        .map(|t| if magnitude { t.total_impact.abs() } else { t.total_impact })
        .collect::<CompensatedSum>()
        .value()
}

/// FI = TI / ΣTI × 100, FBI = DFS / ΣDFS × 100.
#[derive(Debug, Clone, Copy, Default)]
pub struct SignedShare;

impl FractionPolicy for SignedShare {
    fn name(&self) -> &'static str {
        "signed_share"
    }

    fn fractions(&self, totals: &[KeyTotals]) -> Vec<Fractions> {
        let ti = impact_denominator(totals, false);
        let dfs = dfs_denominator(totals, false);
        totals
            .iter()
            .map(|t| Fractions {
                impact: share(t.total_impact, ti),
                background: t.dfs.and_then(|d| share(d, dfs)),
            })
            .collect()
    }
}

/// Shares over magnitudes: FI = TI / Σ|TI| × 100, FBI = DFS / Σ|DFS| × 100.
#[derive(Debug, Clone, Copy, Default)]
pub struct AbsoluteShare;

impl FractionPolicy for AbsoluteShare {
    fn name(&self) -> &'static str {
        "absolute_share"
    }

    fn fractions(&self, totals: &[KeyTotals]) -> Vec<Fractions> {
        let ti = impact_denominator(totals, true);
        let dfs = dfs_denominator(totals, true);
        totals
            .iter()
            .map(|t| Fractions {
                impact: share(t.total_impact, ti),
                background: t.dfs.and_then(|d| share(d, dfs)),
            })
            .collect()
    }
}

/// FI = TI / ΣTI × 100 and FBI = −FI, as the historical reports did.
#[derive(Debug, Clone, Copy, Default)]
pub struct LegacyShare;

impl FractionPolicy for LegacyShare {
    fn name(&self) -> &'static str {
        "legacy_share"
    }

    fn fractions(&self, totals: &[KeyTotals]) -> Vec<Fractions> {
        let ti = impact_denominator(totals, false);
        totals
            .iter()
            .map(|t| {
                let impact = share(t.total_impact, ti);
                Fractions {
                    impact,
                    background: impact.map(|fi| -fi),
                }
            })
            .collect()
    }
}

/// Serializable choice of built-in policy.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FractionKind {
    /// [`SignedShare`]
    #[default]
    SignedShare,
    /// [`AbsoluteShare`]
    AbsoluteShare,
    /// [`LegacyShare`]
    LegacyShare,
}

impl FractionKind {
    /// Instantiate the policy.
    #[must_use]
    pub fn policy(self) -> Arc<dyn FractionPolicy> {
        match self {
            Self::SignedShare => Arc::new(SignedShare),
            Self::AbsoluteShare => Arc::new(AbsoluteShare),
            Self::LegacyShare => Arc::new(LegacyShare),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn totals() -> Vec<KeyTotals> {
        vec![
            KeyTotals {
                total_impact: -3.0,
                dfs: Some(1.0),
            },
            KeyTotals {
                total_impact: 1.0,
                dfs: None,
            },
        ]
    }

    #[test]
    fn test_signed_share() {
        let f = SignedShare.fractions(&totals());
        assert_eq!(f[0].impact, Some(150.0));
        assert_eq!(f[1].impact, Some(-50.0));
        assert_eq!(f[0].background, Some(100.0));
        assert_eq!(f[1].background, None);
    }

    #[test]
    fn test_absolute_share() {
        let f = AbsoluteShare.fractions(&totals());
        assert_eq!(f[0].impact, Some(-75.0));
        assert_eq!(f[1].impact, Some(25.0));
    }

    #[test]
    fn test_legacy_share_negates() {
        let f = LegacyShare.fractions(&totals());
        assert_eq!(f[0].background, Some(-150.0));
    }

    #[test]
    fn test_zero_denominator_has_no_share() {
        let f = SignedShare.fractions(&[KeyTotals {
            total_impact: 0.0,
            dfs: None,
        }]);
        assert_eq!(f[0].impact, None);
    }

    #[test]
    fn test_denominator_keeps_small_totals() {
        let totals: Vec<KeyTotals> = [1e16, 1.0, -1e16, 1.0]
            .into_iter()
            .map(|total_impact| KeyTotals {
                total_impact,
                dfs: Some(total_impact),
            })
            .collect();
        let f = SignedShare.fractions(&totals);
        assert_eq!(f[1].impact, Some(50.0));
        assert_eq!(f[3].background, Some(50.0));
    }

    #[test]
    fn test_kind_names() {
        assert_eq!(FractionKind::default().policy().name(), "signed_share");
        assert_eq!(FractionKind::LegacyShare.policy().name(), "legacy_share");
    }
}
