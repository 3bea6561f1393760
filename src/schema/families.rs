//! Built-in families: GSI conventional and radiance diagnostics, plus the
//! opt-in conventional layout with impact columns.

use super::{ChannelAttr, Field, FieldSpec, Framing, RecordSchema, Sentinel, Source};

use Source::{Channel, ChannelTable, Column};

/// Conventional variable tokens written by the GSI setup routines.
const CONVENTIONAL_VARIABLES: &[&str] = &[
    "ps", "t", "q", "uv", "spd", "gps", "sst", "pw", "dw", "rw", "tcp", "srw", "o3l", "gust",
    "vis", "pblh", "wspd10m", "td2m", "mxtm", "mitm", "pmsl", "howv", "tcamt", "lcbas", "cldch",
    "uwnd10m", "vwnd10m",
];

/// Header columns shared by every conventional variable (0..=15).
fn conventional_header() -> Vec<FieldSpec> {
    vec![
        FieldSpec::integer(Field::Kx, Column(0), Sentinel::E11),
        FieldSpec::integer(Field::Subtype, Column(1), Sentinel::E11),
        FieldSpec::real(Field::Latitude, Column(2), Sentinel::E11),
        FieldSpec::real(Field::Longitude, Column(3), Sentinel::E11),
        FieldSpec::real(Field::Elevation, Column(4), Sentinel::E11),
        FieldSpec::real(Field::Pressure, Column(5), Sentinel::E11),
        FieldSpec::real(Field::Height, Column(6), Sentinel::E11),
        FieldSpec::real(Field::TimeOffset, Column(7), Sentinel::E11),
        FieldSpec::real(Field::PrepQc, Column(8), Sentinel::E11),
        FieldSpec::integer(Field::Idqc, Column(9), Sentinel::E11),
        FieldSpec::integer(Field::Iusev, Column(10), Sentinel::E11),
        FieldSpec::integer(Field::Iuse, Column(11), Sentinel::E11),
        FieldSpec::real(Field::QcWeight, Column(12), Sentinel::E11),
        FieldSpec::real(Field::InputError, Column(13), Sentinel::Tiny),
        FieldSpec::real(Field::AdjustedError, Column(14), Sentinel::Tiny),
        FieldSpec::real(Field::InverseError, Column(15), Sentinel::Tiny),
    ]
}

/// Innovation columns every conventional record carries (16..=18).
fn conventional_scalar() -> Vec<FieldSpec> {
    let mut fields = conventional_header();
    fields.extend([
        FieldSpec::real(Field::Observed, Column(16), Sentinel::E11),
        FieldSpec::real(Field::Omf, Column(17), Sentinel::E11),
        FieldSpec::real(Field::OmfNbc, Column(18), Sentinel::E11),
    ]);
    fields
}

fn conventional_wind() -> Vec<FieldSpec> {
    let mut fields = conventional_header();
    fields.extend([
        FieldSpec::real(Field::Observed, Column(16), Sentinel::E11),
        FieldSpec::real(Field::Omf, Column(17), Sentinel::E11),
        FieldSpec::real(Field::OmfNbc, Column(18), Sentinel::E11),
        FieldSpec::real(Field::ObservedV, Column(19), Sentinel::E11),
        FieldSpec::real(Field::OmfV, Column(20), Sentinel::E11),
        FieldSpec::real(Field::OmfNbcV, Column(21), Sentinel::E11),
        FieldSpec::real(Field::WindFactor, Column(22), Sentinel::E11),
    ]);
    fields
}

/// Conventional records as the GSI writes them. The analysis residual is
/// not a column: it is the analysis file's `omf`.
pub(super) fn conventional() -> RecordSchema {
    let mut q = conventional_scalar();
    q.push(FieldSpec::real(Field::Qsges, Column(19), Sentinel::E11));

    let mut t = conventional_scalar();
    t.extend([
        FieldSpec::real(Field::Pof, Column(19), Sentinel::E11),
        FieldSpec::real(Field::Wvv, Column(20), Sentinel::E11),
    ]);

    let mut wind = conventional_wind();
    wind.extend([
        FieldSpec::real(Field::Pof, Column(23), Sentinel::E11),
        FieldSpec::real(Field::Wvv, Column(24), Sentinel::E11),
    ]);

    RecordSchema::new("conventional", Framing::Blocked, conventional_scalar())
        .alias("conv")
        .variant("q", q)
        .variant("t", t)
        .variant("uv", wind)
        .variables(CONVENTIONAL_VARIABLES.iter().copied())
}

/// Conventional layout of writers that append analysis residual, impact and
/// DFS columns after the innovations.
///
/// Not registered by default: its trailing columns collide with `qsges` and
/// `pof` in stock GSI output. Register it when the files are known to carry
/// them.
///
/// ```rust
/// use diag_impact::schema::{conventional_with_impact, Field, SchemaRegistry};
///
/// let mut registry = SchemaRegistry::default();
/// registry.register(conventional_with_impact());
/// let layout = registry.schema("conv_impact")?.layout("t", 22, 0);
/// assert!(layout.is_present(Field::Impact));
/// # Ok::<(), diag_impact::Error>(())
/// ```
#[must_use]
pub fn conventional_with_impact() -> RecordSchema {
    let mut scalar = conventional_scalar();
    scalar.extend([
        FieldSpec::real(Field::Oma, Column(19), Sentinel::E9),
        FieldSpec::real(Field::Impact, Column(20), Sentinel::E17),
        FieldSpec::real(Field::Dfs, Column(21), Sentinel::E17),
        FieldSpec::integer(Field::PressureBin, Column(22), Sentinel::E9),
        FieldSpec::real(Field::ObsError, Column(23), Sentinel::E9),
    ]);

    let mut wind = conventional_wind();
    wind.extend([
        FieldSpec::real(Field::Oma, Column(23), Sentinel::E9),
        FieldSpec::real(Field::OmaV, Column(24), Sentinel::E9),
        FieldSpec::real(Field::Impact, Column(25), Sentinel::E17),
        FieldSpec::real(Field::Dfs, Column(26), Sentinel::E17),
        FieldSpec::integer(Field::PressureBin, Column(27), Sentinel::E9),
        FieldSpec::real(Field::ObsError, Column(28), Sentinel::E9),
    ]);

    RecordSchema::new("conventional_impact", Framing::Blocked, scalar)
        .alias("conv_impact")
        .variant("uv", wind)
        .variables(CONVENTIONAL_VARIABLES.iter().copied())
}

pub(super) fn radiance() -> RecordSchema {
    let fields = vec![
        FieldSpec::real(Field::Latitude, Column(0), Sentinel::E11),
        FieldSpec::real(Field::Longitude, Column(1), Sentinel::E11),
        FieldSpec::real(Field::Elevation, Column(2), Sentinel::E11),
        FieldSpec::real(Field::TimeOffset, Column(3), Sentinel::E11),
        FieldSpec::integer(Field::ScanPosition, Column(4), Sentinel::E11),
        FieldSpec::real(Field::Geometry, Column(5), Sentinel::E11),
        FieldSpec::integer(Field::Channel, ChannelTable(ChannelAttr::Number), Sentinel::E11),
        FieldSpec::integer(Field::Iuse, ChannelTable(ChannelAttr::Iuse), Sentinel::E11),
        FieldSpec::real(Field::Observed, Channel(0), Sentinel::E11),
        FieldSpec::real(Field::Omf, Channel(1), Sentinel::E11),
        FieldSpec::real(Field::OmfNbc, Channel(2), Sentinel::E11),
        FieldSpec::real(Field::InverseError, Channel(3), Sentinel::Tiny),
        FieldSpec::integer(Field::Idqc, Channel(4), Sentinel::E11),
        FieldSpec::real(Field::Emissivity, Channel(5), Sentinel::E11),
        FieldSpec::real(Field::Oma, Channel(8), Sentinel::E9),
        FieldSpec::real(Field::OmaNbc, Channel(9), Sentinel::E9),
        FieldSpec::real(Field::Impact, Channel(10), Sentinel::E17),
        FieldSpec::real(Field::Dfs, Channel(11), Sentinel::E17),
    ];
    RecordSchema::new("radiance", Framing::Sensor, fields).alias("rad")
}
