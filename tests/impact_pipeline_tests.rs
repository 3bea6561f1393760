//! End-to-end impact pipeline: encode → decode → merge → aggregate
//!
//! Each test builds background and analysis files in memory, decodes them
//! the way a run would and checks the merged and aggregated result.

use diag_impact::decoder::DiagnosticDecoder;
use diag_impact::encoder::encode_to_vec;
use diag_impact::impact::{FractionKind, ImpactKey, ImpactSource, Inclusion, ObservationClass};
use diag_impact::merge::{Alignment, Side};
use diag_impact::schema::{conventional_with_impact, Field, SchemaRegistry};
use diag_impact::table::{BlockKey, ObservationRecord, ObservationTable, TypeCode};
use diag_impact::{CycleMerger, ImpactAggregator};
use proptest::prelude::*;

// ============================================================================
// Fixtures
// ============================================================================

#[derive(Clone, Copy)]
struct Obs {
    variable: &'static str,
    kx: i32,
    idqc: f64,
    iuse: f64,
    omf: f64,
    impact: f64,
}

const fn obs(variable: &'static str, kx: i32, idqc: f64, iuse: f64, omf: f64, impact: f64) -> Obs {
    Obs {
        variable,
        kx,
        idqc,
        iuse,
        omf,
        impact,
    }
}

/// Encode a conventional file carrying impact columns and decode it back.
///
/// The analysis file holds O-A in its `omf` column, written as half of O-B.
/// Its `oma` column holds a value no merge may pick up.
fn encode_side(idate: i32, rows: &[Obs], analysis: bool) -> ObservationTable {
    let schema = conventional_with_impact();
    let mut table = ObservationTable::builder("conventional_impact", idate).unwrap();
    for r in rows {
        let layout = schema.shared_layout(r.variable, 21, 0);
        let innovation = if analysis { r.omf / 2.0 } else { r.omf };
        let rec = ObservationRecord::builder(layout.clone())
            .station("SBGR")
            .set(Field::Kx, f64::from(r.kx))
            .set(Field::Idqc, r.idqc)
            .set(Field::Iuse, r.iuse)
            .set(Field::InverseError, 1.0)
            .set(Field::Omf, innovation)
            .set(Field::Oma, 99.0)
            .set(Field::Impact, r.impact)
            .build();
        table.push(BlockKey::new(r.variable, r.kx), &layout, rec);
    }
    let bytes = encode_to_vec(&table.build()).unwrap();
    let mut registry = SchemaRegistry::default();
    registry.register(conventional_with_impact());
    DiagnosticDecoder::with_registry(registry)
        .decode(bytes.as_slice(), None)
        .unwrap()
}

fn background(idate: i32, rows: &[Obs]) -> ObservationTable {
    encode_side(idate, rows, false)
}

fn analysis(idate: i32, rows: &[Obs]) -> ObservationTable {
    encode_side(idate, rows, true)
}

fn merged(idate: i32, rows: &[Obs]) -> diag_impact::MergedCycle {
    CycleMerger::new()
        .merge(&background(idate, rows), &analysis(idate, rows))
        .unwrap()
}

// ============================================================================
// Scenarios
// ============================================================================

#[test]
fn test_monitored_rejected_record_is_counted() {
    let rows = [
        obs("t", 120, 0.0, 1.0, 1.0, -0.25),
        obs("t", 120, 9.0, -1.0, 4.0, -8.0),
        obs("t", 120, 0.0, 1.0, 2.0, -0.5),
    ];
    let summary = ImpactAggregator::new().aggregate(&[merged(2_024_010_100, &rows)]);

    let key = summary.get(&BlockKey::new("t", 120)).unwrap();
    assert_eq!(key.counts.get(ObservationClass::MonitoredRejected), 1);
    assert_eq!(key.counts.get(ObservationClass::Assimilated), 2);
    assert_eq!(key.counts.classified(), 3);
    assert!((key.total_impact - (-0.75)).abs() < 1e-9);
}

#[test]
fn test_innovation_sums_cover_included_records() {
    let rows = [
        obs("t", 120, 0.0, 1.0, 1.0, -0.25),
        obs("t", 120, 9.0, -1.0, 4.0, -8.0),
        obs("t", 120, 0.0, 1.0, 2.0, -0.5),
    ];
    let summary = ImpactAggregator::new().aggregate(&[merged(2_024_010_100, &rows)]);

    let key = summary.get(&BlockKey::new("t", 120)).unwrap();
    assert!((key.sum_omf - 3.0).abs() < 1e-9);
    assert!((key.sum_oma - 1.5).abs() < 1e-9);
    assert!((key.mean_oma.unwrap() - 0.75).abs() < 1e-9);
    let batch = summary.to_record_batch().unwrap();
    assert!(batch.column_by_name("sum_omf").is_some());
    assert!(batch.column_by_name("sum_oma").is_some());
}

#[test]
fn test_equal_counts_merge_every_record() {
    let rows = [
        obs("t", 120, 0.0, 1.0, 1.0, -0.25),
        obs("t", 130, 0.0, 1.0, 2.0, -0.5),
        obs("q", 181, 0.0, 1.0, 0.5, 0.125),
    ];
    let bg = background(2_024_010_100, &rows);
    let an = analysis(2_024_010_100, &rows);
    let merged = CycleMerger::new().merge(&bg, &an).unwrap();

    assert_eq!(merged.total_records(), bg.len());
    assert_eq!(merged.total_records(), an.len());
    assert!(merged.failures().is_empty());
    let block = merged.block("t", &TypeCode::Kx(130)).unwrap();
    assert_eq!(block.records()[0].omf(), Some(2.0));
    assert_eq!(block.records()[0].oma(), Some(1.0));
    assert_eq!(block.side(), Side::Both);
}

#[test]
fn test_unequal_block_fails_alone() {
    let bg_rows = [
        obs("ps", 181, 0.0, 1.0, 1.0, -0.1),
        obs("ps", 181, 0.0, 1.0, 1.0, -0.1),
        obs("t", 120, 0.0, 1.0, 2.0, -0.5),
    ];
    let an_rows = [obs("ps", 181, 0.0, 1.0, 1.0, -0.1), obs("t", 120, 0.0, 1.0, 2.0, -0.5)];
    let bg = background(2_024_010_100, &bg_rows);
    let an = analysis(2_024_010_100, &an_rows);
    let merged = CycleMerger::new().merge(&bg, &an).unwrap();

    assert_eq!(merged.failures().len(), 1);
    let failure = &merged.failures()[0];
    assert_eq!(failure.key, BlockKey::new("ps", 181));
    assert_eq!((failure.background, failure.analysis), (2, 1));
    assert!(merged.block("ps", &TypeCode::Kx(181)).is_err());
    assert_eq!(merged.block("t", &TypeCode::Kx(120)).unwrap().len(), 1);
}

#[test]
fn test_identity_alignment_matches_positional_on_same_order() {
    let rows = [obs("t", 120, 0.0, 1.0, 1.0, -0.25), obs("t", 120, 0.0, 1.0, 3.0, -0.75)];
    let bg = background(2_024_010_100, &rows);
    let an = analysis(2_024_010_100, &rows);
    let positional = CycleMerger::new().merge(&bg, &an).unwrap();
    let identity = CycleMerger::new()
        .with_alignment(Alignment::Identity)
        .merge(&bg, &an)
        .unwrap();
    assert_eq!(positional.total_records(), identity.total_records());
    let summary_p = ImpactAggregator::new().aggregate(&[positional]);
    let summary_i = ImpactAggregator::new().aggregate(&[identity]);
    assert_eq!(summary_p.keys(), summary_i.keys());
}

#[test]
fn test_multi_cycle_fractions_and_export() {
    let c1 = [obs("t", 120, 0.0, 1.0, 1.0, -3.0), obs("q", 181, 0.0, 1.0, 1.0, 1.0)];
    let c2 = [obs("t", 120, 0.0, 1.0, 1.0, -3.0), obs("q", 181, 0.0, 1.0, 1.0, 1.0)];
    let cycles = vec![merged(2_024_010_100, &c1), merged(2_024_010_106, &c2)];
    let summary = ImpactAggregator::new()
        .with_fraction_policy(FractionKind::SignedShare.policy())
        .aggregate(&cycles);

    assert_eq!(summary.cycles().len(), 2);
    assert!((summary.total_impact() - (-4.0)).abs() < 1e-9);
    let t = summary.get(&BlockKey::new("t", 120)).unwrap();
    assert!((t.fractional_impact.unwrap() - 150.0).abs() < 1e-9);
    let q = summary.get(&BlockKey::new("q", 181)).unwrap();
    assert!((q.fractional_impact.unwrap() - (-50.0)).abs() < 1e-9);

    let batch = summary.to_record_batch().unwrap();
    assert_eq!(batch.num_rows(), 2);
}

#[test]
fn test_inclusion_all_takes_every_class() {
    let rows = [obs("t", 120, 0.0, 1.0, 1.0, -1.0), obs("t", 120, 9.0, -1.0, 1.0, -2.0)];
    let summary = ImpactAggregator::new()
        .with_inclusion(Inclusion::all())
        .aggregate(&[merged(2_024_010_100, &rows)]);
    assert!((summary.keys()[0].total_impact - (-3.0)).abs() < 1e-9);
}

#[test]
fn test_radiance_impact_is_split_by_channel() {
    let layout = SchemaRegistry::default()
        .schema("rad")
        .unwrap()
        .shared_layout("amsua", 6, 12);
    let mut table = ObservationTable::builder("radiance", 2_024_010_100).unwrap();
    for _ in 0..3 {
        for (channel, iuse, impact) in [(1, 1.0, -0.5), (2, -1.0, -1.0)] {
            let rec = ObservationRecord::builder(layout.clone())
                .set(Field::Channel, f64::from(channel))
                .set(Field::Iuse, iuse)
                .set(Field::Idqc, 0.0)
                .set(Field::InverseError, 0.5)
                .set(Field::Omf, 0.25)
                .set(Field::Impact, impact)
                .build();
            table.push(BlockKey::new("amsua", "n19"), &layout, rec);
        }
    }
    let table = table.build();
    let merged = CycleMerger::new().merge(&table, &table).unwrap();
    let summary = ImpactAggregator::new().aggregate(&[merged]);

    assert_eq!(summary.keys().len(), 2);
    assert!(summary.get(&BlockKey::new("amsua", "n19")).is_none());
    let ch1 = summary
        .get(ImpactKey::channel(BlockKey::new("amsua", "n19"), 1))
        .unwrap();
    assert_eq!(ch1.assimilated(), 3);
    assert!((ch1.total_impact - (-1.5)).abs() < 1e-9);
    let ch2 = summary
        .get(ImpactKey::channel(BlockKey::new("amsua", "n19"), 2))
        .unwrap();
    assert_eq!(ch2.assimilated(), 0);
    assert_eq!(ch2.counts.classified(), 3);
    assert!((summary.total_impact() - (-1.5)).abs() < 1e-9);
    assert_eq!(ch2.key.to_string(), "amsua/n19/ch2");
}

#[test]
fn test_stock_gsi_trailing_column_never_becomes_oma() {
    let q = SchemaRegistry::default()
        .schema("conv")
        .unwrap()
        .shared_layout("q", 20, 0);
    let side = |omf: f64| {
        let rec = ObservationRecord::builder(q.clone())
            .station("83779")
            .set(Field::Kx, 120.0)
            .set(Field::Idqc, 0.0)
            .set(Field::Iuse, 1.0)
            .set(Field::InverseError, 1.0)
            .set(Field::Omf, omf)
            .set(Field::Qsges, 0.012)
            .build();
        let mut table = ObservationTable::builder("conventional", 2_024_010_100).unwrap();
        table.push(BlockKey::new("q", 120), &q, rec);
        let bytes = encode_to_vec(&table.build()).unwrap();
        DiagnosticDecoder::new().decode(bytes.as_slice(), None).unwrap()
    };
    let merged = CycleMerger::new().merge(&side(1.0), &side(0.5)).unwrap();
    let record = &merged.block("q", &TypeCode::Kx(120)).unwrap().records()[0];
    assert_eq!(record.omf(), Some(1.0));
    assert_eq!(record.oma(), Some(0.5));

    let summary = ImpactAggregator::new()
        .with_source(ImpactSource::Auto)
        .aggregate(&[merged]);
    let key = &summary.keys()[0];
    assert_eq!(key.impact_source, ImpactSource::Innovation);
    // (0.5² - 1²) · 1²
    assert!((key.total_impact - (-0.75)).abs() < 1e-9);
}

#[test]
fn test_analysis_oma_column_is_ignored() {
    let rows = [obs("t", 120, 0.0, 1.0, 2.0, -0.5)];
    let cycle = merged(2_024_010_100, &rows);
    let record = &cycle.blocks()[0].records()[0];
    assert_eq!(record.oma(), Some(1.0));
}

// ============================================================================
// Properties
// ============================================================================

proptest! {
    #![proptest_config(ProptestConfig::with_cases(50))]

    /// Class counts sum to the number of records with both flags.
    #[test]
    fn prop_class_counts_cover_all_records(
        flags in proptest::collection::vec((0i32..3, -2i32..3), 1..40)
    ) {
        let rows: Vec<Obs> = flags
            .iter()
            .map(|&(idqc, iuse)| obs("t", 120, f64::from(idqc), f64::from(iuse), 1.0, -0.5))
            .collect();
        let summary = ImpactAggregator::new().aggregate(&[merged(2_024_010_100, &rows)]);
        let key = &summary.keys()[0];
        prop_assert_eq!(key.counts.classified(), rows.len());
        prop_assert_eq!(key.counts.unclassified(), 0);
        let expected = flags.iter().filter(|&&(q, u)| q == 0 && u >= 1).count();
        prop_assert_eq!(key.assimilated(), expected);
    }
}
