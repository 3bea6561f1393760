//! Property-based tests for diag-impact
//!
//! - Decode(encode(table)) reproduces the table, sentinels included
//! - Merging equal-count files conserves records
//! - Summaries are independent of cycle order
//! - Run with ProptestConfig::with_cases(64)

use diag_impact::compare::stats;
use diag_impact::decoder::DiagnosticDecoder;
use diag_impact::encoder::encode_to_vec;
use diag_impact::schema::{conventional_with_impact, Field, Reading, SchemaRegistry, Sentinel};
use diag_impact::impact::ImpactSource;
use diag_impact::table::{BlockKey, ObservationRecord, ObservationRecordBuilder, ObservationTable};
use diag_impact::{CycleMerger, ImpactAggregator, MergedCycle};
use proptest::prelude::*;

// ============================================================================
// Property Test Generators (Strategies)
// ============================================================================

/// A value the file can carry, or one of the recognised sentinels.
fn arb_reading() -> impl Strategy<Value = Reading> {
    prop_oneof![
        4 => (-5000.0f32..5000.0).prop_map(|v| Reading::Value(f64::from(v))),
        1 => prop_oneof![Just(Sentinel::E9), Just(Sentinel::E11), Just(Sentinel::E17)]
            .prop_map(Reading::Missing),
    ]
}

/// Rows of (kx, omf, oma, impact) for one variable.
fn arb_rows() -> impl Strategy<Value = Vec<(i32, Reading, Reading, Reading)>> {
    proptest::collection::vec(
        (
            prop_oneof![Just(120), Just(130), Just(180)],
            arb_reading(),
            arb_reading(),
            arb_reading(),
        ),
        0..30,
    )
}

fn put(builder: ObservationRecordBuilder, field: Field, reading: Reading) -> ObservationRecordBuilder {
    match reading {
        Reading::Value(v) => builder.set(field, v),
        Reading::Missing(s) => builder.missing(field, s),
    }
}

fn table(idate: i32, rows: &[(i32, Reading, Reading, Reading)]) -> ObservationTable {
    let layout = conventional_with_impact().shared_layout("t", 22, 0);
    let mut table = ObservationTable::builder("conventional_impact", idate).unwrap();
    for (i, &(kx, omf, oma, impact)) in rows.iter().enumerate() {
        let mut b = ObservationRecord::builder(layout.clone())
            .station(format!("S{i:05}"))
            .set(Field::Kx, f64::from(kx))
            .set(Field::Idqc, 0.0)
            .set(Field::Iuse, 1.0);
        b = put(b, Field::Omf, omf);
        b = put(b, Field::Oma, oma);
        b = put(b, Field::Impact, impact);
        table.push(BlockKey::new("t", kx), &layout, b.build());
    }
    table.build()
}

fn decoder() -> DiagnosticDecoder {
    let mut registry = SchemaRegistry::default();
    registry.register(conventional_with_impact());
    DiagnosticDecoder::with_registry(registry)
}

fn merged(idate: i32, rows: &[(i32, Reading, Reading, Reading)]) -> MergedCycle {
    let t = table(idate, rows);
    CycleMerger::new().merge(&t, &t).unwrap()
}

// ============================================================================
// Property Tests
// ============================================================================

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    // ========================================================================
    // Codec Properties
    // ========================================================================

    /// Property: decode(encode(table)) == table
    #[test]
    fn prop_round_trip_is_exact(rows in arb_rows()) {
        let original = table(2_024_010_100, &rows);
        let bytes = encode_to_vec(&original).unwrap();
        let decoded = decoder().decode(bytes.as_slice(), None).unwrap();
        prop_assert_eq!(decoded, original);
    }

    /// Property: every record lands in exactly one block
    #[test]
    fn prop_blocks_partition_records(rows in arb_rows()) {
        let t = table(2_024_010_100, &rows);
        let by_kx: usize = t.kx_counts("t").values().sum();
        prop_assert_eq!(by_kx, rows.len());
        prop_assert_eq!(t.len(), rows.len());
    }

    // ========================================================================
    // Merge / Aggregate Properties
    // ========================================================================

    /// Property: equal-count merge conserves records
    #[test]
    fn prop_merge_conserves_records(rows in arb_rows()) {
        let cycle = merged(2_024_010_100, &rows);
        prop_assert_eq!(cycle.total_records(), rows.len());
        prop_assert!(cycle.failures().is_empty());
    }

    /// Property: summary does not depend on cycle order
    #[test]
    fn prop_aggregate_is_order_independent(a in arb_rows(), b in arb_rows()) {
        let c1 = merged(2_024_010_100, &a);
        let c2 = merged(2_024_010_106, &b);
        let agg = ImpactAggregator::new();
        let forward = agg.aggregate(&[c1.clone(), c2.clone()]);
        let backward = agg.aggregate(&[c2, c1]);
        prop_assert_eq!(forward.keys().len(), backward.keys().len());
        for (f, r) in forward.keys().iter().zip(backward.keys()) {
            prop_assert_eq!(&f.key, &r.key);
            prop_assert_eq!(&f.counts, &r.counts);
            prop_assert!((f.total_impact - r.total_impact).abs() <= 1e-9 * (1.0 + f.total_impact.abs()));
        }
    }

    /// Property: sentinel readings never reach impact sums
    #[test]
    fn prop_missing_impact_is_excluded(rows in arb_rows()) {
        let cycle = merged(2_024_010_100, &rows);
        let summary = ImpactAggregator::new()
            .with_source(ImpactSource::Field)
            .aggregate(&[cycle]);
        let expected = rows.iter().filter(|r| matches!(r.3, Reading::Value(_))).count();
        let counted: usize = summary.keys().iter().map(|k| k.impact_records).sum();
        prop_assert_eq!(counted, expected);
    }

    // ========================================================================
    // Statistics Properties
    // ========================================================================

    /// Property: BH q-values are bounded below by p and above by 1
    #[test]
    fn prop_bh_bounds(p in proptest::collection::vec(0.0f64..=1.0, 1..40)) {
        let q = stats::benjamini_hochberg(&p);
        prop_assert_eq!(q.len(), p.len());
        for (pi, qi) in p.iter().zip(&q) {
            prop_assert!(*qi >= *pi - 1e-12);
            prop_assert!(*qi <= 1.0);
        }
    }

    /// Property: the bootstrap interval is ordered and within the data range
    #[test]
    fn prop_bootstrap_interval_within_range(values in proptest::collection::vec(-10.0f64..10.0, 2..30)) {
        let (lo, hi) = stats::bootstrap_mean_ci(&values, 200, 0.95, 1).unwrap();
        let min = values.iter().copied().fold(f64::INFINITY, f64::min);
        let max = values.iter().copied().fold(f64::NEG_INFINITY, f64::max);
        prop_assert!(lo <= hi);
        prop_assert!(lo >= min - 1e-12 && hi <= max + 1e-12);
    }
}
