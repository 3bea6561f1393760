//! Declarative record layouts
//!
//! A [`RecordSchema`] says where each field lives in a family's records and
//! which sentinel marks it as not computed. The decoder and encoder only
//! walk these tables; adding a sensor family means registering another
//! schema, not touching decode control flow.
//!
//! ```rust
//! use diag_impact::schema::{Field, SchemaRegistry};
//!
//! let registry = SchemaRegistry::default();
//! let conv = registry.schema("conv")?;
//! let layout = conv.layout("t", 20, 0);
//! assert!(layout.is_present(Field::Pof));
//! assert!(!layout.is_present(Field::Wvv)); // column 20 is beyond ninfo=20
//! assert!(layout.position(Field::Impact).is_none());
//! # Ok::<(), diag_impact::Error>(())
//! ```

mod families;
mod reading;

pub use families::conventional_with_impact;
pub use reading::{Reading, Sentinel};

use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::sync::Arc;

/// Every field any family can carry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[allow(missing_docs)]
pub enum Field {
    Kx,
    Subtype,
    Latitude,
    Longitude,
    Elevation,
    Pressure,
    Height,
    PressureBin,
    TimeOffset,
    PrepQc,
    Idqc,
    Iusev,
    Iuse,
    QcWeight,
    InputError,
    AdjustedError,
    InverseError,
    ObsError,
    Observed,
    Omf,
    OmfNbc,
    Oma,
    OmaNbc,
    Impact,
    Dfs,
    ObservedV,
    OmfV,
    OmfNbcV,
    OmaV,
    WindFactor,
    Qsges,
    Pof,
    Wvv,
    ScanPosition,
    Geometry,
    Channel,
    Emissivity,
}

impl Field {
    /// Number of distinct fields
    pub const COUNT: usize = 37;

    /// Short column name, as used by the plotting layer.
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::Kx => "kx",
            Self::Subtype => "subtype",
            Self::Latitude => "lat",
            Self::Longitude => "lon",
            Self::Elevation => "elev",
            Self::Pressure => "prs",
            Self::Height => "hgt",
            Self::PressureBin => "pbin",
            Self::TimeOffset => "time",
            Self::PrepQc => "pbqc",
            Self::Idqc => "idqc",
            Self::Iusev => "iusev",
            Self::Iuse => "iuse",
            Self::QcWeight => "wpbqc",
            Self::InputError => "inp_err",
            Self::AdjustedError => "adj_err",
            Self::InverseError => "end_err",
            Self::ObsError => "error",
            Self::Observed => "obs",
            Self::Omf => "omf",
            Self::OmfNbc => "omf_nbc",
            Self::Oma => "oma",
            Self::OmaNbc => "oma_nbc",
            Self::Impact => "imp",
            Self::Dfs => "dfs",
            Self::ObservedV => "obs_v",
            Self::OmfV => "omf_v",
            Self::OmfNbcV => "omf_nbc_v",
            Self::OmaV => "oma_v",
            Self::WindFactor => "factw",
            Self::Qsges => "qsges",
            Self::Pof => "pof",
            Self::Wvv => "wvv",
            Self::ScanPosition => "iscan",
            Self::Geometry => "zasat",
            Self::Channel => "nuchan",
            Self::Emissivity => "emiss",
        }
    }

    const fn index(self) -> usize {
        self as usize
    }
}

impl fmt::Display for Field {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Numeric interpretation of a field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FieldKind {
    /// Floating point quantity
    Real,
    /// Integral code stored as a real or an integer (kx, flags, channel)
    Integer,
}

/// Per-channel attribute read from the radiance channel table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ChannelAttr {
    /// Analysis usage flag of the channel
    Iuse,
    /// Sensor channel number (`nuchan`)
    Number,
}

/// Where a field's bytes come from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Source {
    /// Column of the per-observation (location) real array
    Column(usize),
    /// Column of the per-channel real array (radiance only)
    Channel(usize),
    /// Attribute from the channel table (radiance only)
    ChannelTable(ChannelAttr),
}

/// One field's position, kind and sentinel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldSpec {
    /// Field identity
    pub field: Field,
    /// Numeric interpretation
    pub kind: FieldKind,
    /// Byte source
    pub source: Source,
    /// Literal written when the field is missing
    pub sentinel: Sentinel,
}

impl FieldSpec {
    /// Real-valued field
    #[must_use]
    pub const fn real(field: Field, source: Source, sentinel: Sentinel) -> Self {
        Self {
            field,
            kind: FieldKind::Real,
            source,
            sentinel,
        }
    }

    /// Integer-coded field
    #[must_use]
    pub const fn integer(field: Field, source: Source, sentinel: Sentinel) -> Self {
        Self {
            field,
            kind: FieldKind::Integer,
            source,
            sentinel,
        }
    }
}

/// How records are framed in the byte stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Framing {
    /// Date record, then repeated (header, data) record pairs (conventional)
    Blocked,
    /// Sensor header, channel table, then one record per location (radiance)
    Sensor,
}

/// A field list resolved against one file's widths.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Layout {
    specs: Vec<FieldSpec>,
    present: Vec<bool>,
    index: [Option<usize>; Field::COUNT],
    location_width: usize,
    channel_width: usize,
}

impl Layout {
    /// Resolve `specs` for a record with `location_width` location reals and
    /// `channel_width` per-channel reals. A field listed twice resolves to
    /// its last spec.
    #[must_use]
    pub fn new(specs: Vec<FieldSpec>, location_width: usize, channel_width: usize) -> Self {
        let mut index = [None; Field::COUNT];
        let present = specs
            .iter()
            .enumerate()
            .map(|(i, spec)| {
                index[spec.field.index()] = Some(i);
                match spec.source {
                    Source::Column(c) => c < location_width,
                    Source::Channel(c) => c < channel_width,
                    Source::ChannelTable(_) => true,
                }
            })
            .collect();
        Self {
            specs,
            present,
            index,
            location_width,
            channel_width,
        }
    }

    /// Field specs in layout order
    #[must_use]
    pub fn specs(&self) -> &[FieldSpec] {
        &self.specs
    }

    /// Position of `field` in a record's readings.
    #[must_use]
    pub fn position(&self, field: Field) -> Option<usize> {
        self.index[field.index()]
    }

    /// Whether `field` is carried by this layout and its column exists.
    #[must_use]
    pub fn is_present(&self, field: Field) -> bool {
        self.position(field).is_some_and(|i| self.present[i])
    }

    /// Whether the spec at `position` has a column in the file.
    #[must_use]
    pub fn is_present_at(&self, position: usize) -> bool {
        self.present.get(position).copied().unwrap_or(false)
    }

    /// Number of location reals per record (`ninfo` / `ireal`).
    #[must_use]
    pub const fn location_width(&self) -> usize {
        self.location_width
    }

    /// Number of per-channel reals (`ipchan`), zero for conventional data.
    #[must_use]
    pub const fn channel_width(&self) -> usize {
        self.channel_width
    }
}

/// Declarative layout of one observation family.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordSchema {
    tag: String,
    aliases: Vec<String>,
    framing: Framing,
    fields: Vec<FieldSpec>,
    variants: BTreeMap<String, Vec<FieldSpec>>,
    variables: BTreeSet<String>,
}

impl RecordSchema {
    /// Create a schema. An empty `variables` set accepts any token.
    #[must_use]
    pub fn new(tag: impl Into<String>, framing: Framing, fields: Vec<FieldSpec>) -> Self {
        Self {
            tag: tag.into(),
            aliases: Vec::new(),
            framing,
            fields,
            variants: BTreeMap::new(),
            variables: BTreeSet::new(),
        }
    }

    /// Add an alternative tag.
    #[must_use]
    pub fn alias(mut self, alias: impl Into<String>) -> Self {
        self.aliases.push(alias.into());
        self
    }

    /// Override the field list for one variable.
    #[must_use]
    pub fn variant(mut self, variable: impl Into<String>, fields: Vec<FieldSpec>) -> Self {
        self.variants.insert(variable.into(), fields);
        self
    }

    /// Restrict the accepted variable tokens.
    #[must_use]
    pub fn variables<I, S>(mut self, tokens: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.variables.extend(tokens.into_iter().map(Into::into));
        self
    }

    /// Family tag
    #[must_use]
    pub fn tag(&self) -> &str {
        &self.tag
    }

    /// Framing of the byte stream
    #[must_use]
    pub const fn framing(&self) -> Framing {
        self.framing
    }

    /// Base field list
    #[must_use]
    pub fn fields(&self) -> &[FieldSpec] {
        &self.fields
    }

    /// Whether `tag` names this schema.
    #[must_use]
    pub fn answers_to(&self, tag: &str) -> bool {
        let tag = tag.trim();
        self.tag.eq_ignore_ascii_case(tag) || self.aliases.iter().any(|a| a.eq_ignore_ascii_case(tag))
    }

    /// Whether the variable token is accepted. Surrounding blanks are ignored.
    #[must_use]
    pub fn knows_variable(&self, token: &str) -> bool {
        self.variables.is_empty() || self.variables.contains(token.trim())
    }

    /// Field list for a variable (variant when registered, base otherwise).
    #[must_use]
    pub fn fields_for(&self, variable: &str) -> &[FieldSpec] {
        self.variants.get(variable.trim()).map_or(&self.fields, Vec::as_slice)
    }

    /// Resolve the layout of `variable` for one file's widths.
    #[must_use]
    pub fn layout(&self, variable: &str, location_width: usize, channel_width: usize) -> Layout {
        Layout::new(self.fields_for(variable).to_vec(), location_width, channel_width)
    }

    /// Shared layout handle, as stored by records.
    #[must_use]
    pub fn shared_layout(&self, variable: &str, location_width: usize, channel_width: usize) -> Arc<Layout> {
        Arc::new(self.layout(variable, location_width, channel_width))
    }
}

/// Registered families, looked up by tag.
#[derive(Debug, Clone)]
pub struct SchemaRegistry {
    schemas: Vec<RecordSchema>,
}

impl Default for SchemaRegistry {
    fn default() -> Self {
        Self {
            schemas: vec![families::conventional(), families::radiance()],
        }
    }
}

impl SchemaRegistry {
    /// Registry with no families.
    #[must_use]
    pub const fn empty() -> Self {
        Self { schemas: Vec::new() }
    }

    /// Register a family. A later schema with the same tag shadows earlier ones.
    pub fn register(&mut self, schema: RecordSchema) {
        self.schemas.insert(0, schema);
    }

    /// Look up a family by tag or alias.
    ///
    /// # Errors
    ///
    /// Returns [`Error::UnknownFamily`] if no schema answers to `tag`.
    pub fn schema(&self, tag: &str) -> Result<&RecordSchema> {
        self.schemas
            .iter()
            .find(|s| s.answers_to(tag))
            .ok_or_else(|| Error::UnknownFamily(tag.to_string()))
    }

    /// First registered schema with the given framing.
    #[must_use]
    pub fn for_framing(&self, framing: Framing) -> Option<&RecordSchema> {
        self.schemas.iter().find(|s| s.framing == framing)
    }

    /// Registered tags
    #[must_use]
    pub fn tags(&self) -> Vec<&str> {
        self.schemas.iter().map(RecordSchema::tag).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lookup_by_alias() {
        let registry = SchemaRegistry::default();
        assert_eq!(registry.schema("conv").unwrap().tag(), "conventional");
        assert_eq!(registry.schema("RAD").unwrap().tag(), "radiance");
    }

    #[test]
    fn test_unknown_family() {
        let registry = SchemaRegistry::default();
        let err = registry.schema("ozone").unwrap_err();
        assert!(matches!(err, Error::UnknownFamily(ref t) if t == "ozone"));
    }

    #[test]
    fn test_every_field_has_explicit_sentinel() {
        let registry = SchemaRegistry::default();
        for tag in ["conventional", "radiance"] {
            for spec in registry.schema(tag).unwrap().fields() {
                assert_ne!(spec.sentinel, Sentinel::Absent, "{tag}/{}", spec.field);
            }
        }
    }

    #[test]
    fn test_uv_variant_layout() {
        let registry = SchemaRegistry::default();
        let conv = registry.schema("conventional").unwrap();
        let layout = conv.layout("uv", 23, 0);
        assert!(layout.is_present(Field::OmfV));
        assert!(layout.is_present(Field::WindFactor));
        assert!(!layout.is_present(Field::Pof));
        assert!(conv.layout("uv", 25, 0).is_present(Field::Wvv));
        assert_eq!(layout.position(Field::OmaV), None);
    }

    #[test]
    fn test_gsi_trailing_columns_by_variable() {
        let registry = SchemaRegistry::default();
        let conv = registry.schema("conv").unwrap();
        let q = conv.layout("q", 20, 0);
        assert_eq!(q.specs()[q.position(Field::Qsges).unwrap()].source, Source::Column(19));
        assert_eq!(q.position(Field::Oma), None);
        let t = conv.layout("t", 21, 0);
        assert_eq!(t.specs()[t.position(Field::Pof).unwrap()].source, Source::Column(19));
        assert_eq!(t.specs()[t.position(Field::Wvv).unwrap()].source, Source::Column(20));
        let ps = conv.layout("ps", 20, 0);
        assert_eq!(ps.position(Field::Pof), None);
    }

    #[test]
    fn test_impact_columns_need_registration() {
        let mut registry = SchemaRegistry::default();
        assert!(registry.schema("conv_impact").is_err());
        registry.register(conventional_with_impact());
        let layout = registry.schema("conv_impact").unwrap().layout("t", 22, 0);
        assert!(layout.is_present(Field::Oma));
        assert!(layout.is_present(Field::Dfs));
        assert_eq!(registry.for_framing(Framing::Blocked).unwrap().tag(), "conventional_impact");
    }

    #[test]
    fn test_padded_tokens_resolve() {
        let registry = SchemaRegistry::default();
        let conv = registry.schema(" conv ").unwrap();
        assert!(conv.knows_variable(" uv"));
        assert!(conv.layout(" uv", 23, 0).is_present(Field::OmfV));
    }

    #[test]
    fn test_wide_layout_positions_do_not_wrap() {
        let specs: Vec<FieldSpec> = (0..300)
            .map(|c| FieldSpec::real(Field::Observed, Source::Column(c), Sentinel::E11))
            .collect();
        let layout = Layout::new(specs, 300, 0);
        assert_eq!(layout.position(Field::Observed), Some(299));
        assert!(layout.is_present(Field::Observed));
    }

    #[test]
    fn test_register_new_family() {
        let mut registry = SchemaRegistry::default();
        let ozone = RecordSchema::new(
            "ozone",
            Framing::Blocked,
            vec![FieldSpec::real(Field::Observed, Source::Column(0), Sentinel::E11)],
        );
        registry.register(ozone);
        assert_eq!(registry.schema("ozone").unwrap().framing(), Framing::Blocked);
    }

    #[test]
    fn test_layout_positions_cover_fields() {
        let registry = SchemaRegistry::default();
        let rad = registry.schema("radiance").unwrap();
        let layout = rad.layout("amsua", 26, 8);
        for (i, spec) in layout.specs().iter().enumerate() {
            assert_eq!(layout.position(spec.field), Some(i));
        }
        assert!(layout.is_present(Field::Channel));
        assert!(!layout.is_present(Field::Impact));
    }
}
