//! QC classification of observations

use crate::merge::MergedRecord;
use crate::schema::Field;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Usage class of an observation in the analysis.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ObservationClass {
    /// Passed QC and used
    Assimilated,
    /// Failed QC, would have been used
    Rejected,
    /// Passed QC, monitored only
    MonitoredAssimilated,
    /// Failed QC, monitored only
    MonitoredRejected,
}

impl ObservationClass {
    /// Every class, in reporting order.
    pub const ALL: [Self; 4] = [
        Self::Assimilated,
        Self::Rejected,
        Self::MonitoredAssimilated,
        Self::MonitoredRejected,
    ];

    /// GSI classification table. `iuse < -1` is treated as monitored.
    #[must_use]
    pub const fn from_flags(idqc: i32, iuse: i32) -> Self {
        match (idqc == 0, iuse >= 1) {
            (true, true) => Self::Assimilated,
            (true, false) => Self::MonitoredAssimilated,
            (false, false) => Self::MonitoredRejected,
            (false, true) => Self::Rejected,
        }
    }

    const fn index(self) -> usize {
        self as usize
    }
}

impl fmt::Display for ObservationClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Assimilated => "assimilated",
            Self::Rejected => "rejected",
            Self::MonitoredAssimilated => "monitored-assimilated",
            Self::MonitoredRejected => "monitored-rejected",
        })
    }
}

/// Assigns a usage class to a merged record.
pub trait Classifier: Send + Sync + fmt::Debug {
    /// Class of the record, `None` when its flags are missing.
    fn classify(&self, record: &MergedRecord) -> Option<ObservationClass>;
}

/// Classification from the `idqc` and `iuse` flags.
#[derive(Debug, Clone, Copy, Default)]
pub struct GsiClassifier;

impl Classifier for GsiClassifier {
    fn classify(&self, record: &MergedRecord) -> Option<ObservationClass> {
        let idqc = record.record().flag(Field::Idqc)?;
        let iuse = record.record().flag(Field::Iuse)?;
        Some(ObservationClass::from_flags(idqc, iuse))
    }
}

/// Classes whose records contribute to impact sums.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Inclusion {
    classes: Vec<ObservationClass>,
}

impl Default for Inclusion {
    fn default() -> Self {
        Self::assimilated()
    }
}

impl Inclusion {
    /// Assimilated records only
    #[must_use]
    pub fn assimilated() -> Self {
        Self::of([ObservationClass::Assimilated])
    }

    /// Every classified record
    #[must_use]
    pub fn all() -> Self {
        Self::of(ObservationClass::ALL)
    }

    /// An explicit set of classes
    #[must_use]
    pub fn of(classes: impl IntoIterator<Item = ObservationClass>) -> Self {
        let mut classes: Vec<_> = classes.into_iter().collect();
        classes.sort_unstable();
        classes.dedup();
        Self { classes }
    }

    /// Whether `class` is included
    #[must_use]
    pub fn includes(&self, class: ObservationClass) -> bool {
        self.classes.contains(&class)
    }

    /// Included classes
    #[must_use]
    pub fn classes(&self) -> &[ObservationClass] {
        &self.classes
    }
}

/// Record counts per class.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClassCounts {
    counts: [usize; 4],
    unclassified: usize,
}

impl ClassCounts {
    /// Count one record.
    pub fn record(&mut self, class: Option<ObservationClass>) {
        match class {
            Some(c) => self.counts[c.index()] += 1,
            None => self.unclassified += 1,
        }
    }

    /// Records in `class`
    #[must_use]
    pub const fn get(&self, class: ObservationClass) -> usize {
        self.counts[class.index()]
    }

    /// Records with missing flags
    #[must_use]
    pub const fn unclassified(&self) -> usize {
        self.unclassified
    }

    /// Records with a class
    #[must_use]
    pub fn classified(&self) -> usize {
        self.counts.iter().sum()
    }

    /// Combine with another count set.
    pub fn merge(&mut self, other: &Self) {
        for (a, b) in self.counts.iter_mut().zip(other.counts) {
            *a += b;
        }
        self.unclassified += other.unclassified;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_table() {
        assert_eq!(ObservationClass::from_flags(0, 1), ObservationClass::Assimilated);
        assert_eq!(ObservationClass::from_flags(0, -1), ObservationClass::MonitoredAssimilated);
        assert_eq!(ObservationClass::from_flags(9, -1), ObservationClass::MonitoredRejected);
        assert_eq!(ObservationClass::from_flags(9, 1), ObservationClass::Rejected);
        assert_eq!(ObservationClass::from_flags(0, -2), ObservationClass::MonitoredAssimilated);
    }

    #[test]
    fn test_inclusion_dedups() {
        let inc = Inclusion::of([ObservationClass::Rejected, ObservationClass::Assimilated, ObservationClass::Rejected]);
        assert_eq!(inc.classes(), &[ObservationClass::Assimilated, ObservationClass::Rejected]);
        assert!(!inc.includes(ObservationClass::MonitoredRejected));
    }

    #[test]
    fn test_counts_merge() {
        let mut a = ClassCounts::default();
        a.record(Some(ObservationClass::Assimilated));
        a.record(None);
        let mut b = ClassCounts::default();
        b.record(Some(ObservationClass::Assimilated));
        a.merge(&b);
        assert_eq!(a.get(ObservationClass::Assimilated), 2);
        assert_eq!(a.unclassified(), 1);
        assert_eq!(a.classified(), 2);
    }

    proptest! {
        #[test]
        fn prop_classification_is_exclusive(idqc in -10i32..10, iuse in -5i32..5) {
            let class = ObservationClass::from_flags(idqc, iuse);
            let matches = ObservationClass::ALL.iter().filter(|c| **c == class).count();
            prop_assert_eq!(matches, 1);
            prop_assert_eq!(class == ObservationClass::Assimilated, idqc == 0 && iuse >= 1);
        }
    }
}
