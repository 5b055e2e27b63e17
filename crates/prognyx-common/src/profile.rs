//! Data availability types.
//!
//! `RawAvailability` is what the record store hands over; `DataProfile` is
//! the validated, normalised snapshot the rest of the engine reads.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

/// Kinds of patient data a method can depend on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DataType {
    Genomic,
    Expression,
    Clinical,
    MultiOmics,
}

impl DataType {
    pub const ALL: [DataType; 4] = [
        DataType::Genomic,
        DataType::Expression,
        DataType::Clinical,
        DataType::MultiOmics,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            DataType::Genomic => "genomic",
            DataType::Expression => "expression",
            DataType::Clinical => "clinical",
            DataType::MultiOmics => "multi_omics",
        }
    }
}

impl fmt::Display for DataType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ── Raw indicators ──────────────────────────────────────────────────────────

/// Raw per-type indicator as reported by the record store.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RawIndicator {
    pub present: bool,
    /// Quality metric, expected in [0, 1]. Required when `present`.
    #[serde(default)]
    pub quality: Option<f64>,
    /// Number of samples / variants / features backing this data type.
    #[serde(default)]
    pub feature_count: Option<u64>,
}

/// Raw availability indicators for one record.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RawAvailability {
    #[serde(default)]
    pub indicators: BTreeMap<DataType, RawIndicator>,
}

impl RawAvailability {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add an indicator for a data type.
    pub fn with(mut self, data_type: DataType, present: bool, quality: Option<f64>) -> Self {
        self.indicators.insert(
            data_type,
            RawIndicator { present, quality, feature_count: None },
        );
        self
    }

    /// Shorthand for a present data type with a quality score.
    pub fn present(self, data_type: DataType, quality: f64) -> Self {
        self.with(data_type, true, Some(quality))
    }

    /// Shorthand for an absent data type.
    pub fn absent(self, data_type: DataType) -> Self {
        self.with(data_type, false, None)
    }
}

// ── Normalised profile ──────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DataQuality {
    pub present: bool,
    /// Quality in [0, 1]; 0.0 for absent types.
    pub quality: f64,
}

impl DataQuality {
    pub const ABSENT: DataQuality = DataQuality { present: false, quality: 0.0 };
}

/// Immutable snapshot of which data types a record has and how good they are.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DataProfile {
    entries: BTreeMap<DataType, DataQuality>,
}

impl DataProfile {
    /// Build a profile from already-validated entries. Types not listed are
    /// treated as absent.
    pub fn new(entries: BTreeMap<DataType, DataQuality>) -> Self {
        let mut entries = entries;
        for data_type in DataType::ALL {
            entries.entry(data_type).or_insert(DataQuality::ABSENT);
        }
        Self { entries }
    }

    pub fn get(&self, data_type: DataType) -> DataQuality {
        self.entries.get(&data_type).copied().unwrap_or(DataQuality::ABSENT)
    }

    pub fn is_present(&self, data_type: DataType) -> bool {
        self.get(data_type).present
    }

    pub fn quality(&self, data_type: DataType) -> f64 {
        self.get(data_type).quality
    }

    /// Lowest quality across a set of data types (the limiting input).
    /// Returns 0.0 if any of them is absent and 1.0 for an empty set.
    pub fn min_quality<'a, I>(&self, types: I) -> f64
    where
        I: IntoIterator<Item = &'a DataType>,
    {
        types
            .into_iter()
            .map(|t| self.get(*t))
            .map(|q| if q.present { q.quality } else { 0.0 })
            .fold(1.0_f64, f64::min)
    }

    pub fn present_types(&self) -> Vec<DataType> {
        self.entries
            .iter()
            .filter(|(_, q)| q.present)
            .map(|(t, _)| *t)
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_types_default_to_absent() {
        let profile = DataProfile::new(BTreeMap::new());
        for t in DataType::ALL {
            assert!(!profile.is_present(t));
            assert_eq!(profile.quality(t), 0.0);
        }
    }

    #[test]
    fn test_min_quality_uses_limiting_type() {
        let mut entries = BTreeMap::new();
        entries.insert(DataType::Genomic, DataQuality { present: true, quality: 0.9 });
        entries.insert(DataType::Expression, DataQuality { present: true, quality: 0.4 });
        let profile = DataProfile::new(entries);

        let q = profile.min_quality(&[DataType::Genomic, DataType::Expression]);
        assert!((q - 0.4).abs() < 1e-9);
        assert_eq!(profile.min_quality(&[DataType::Clinical]), 0.0);
        assert_eq!(profile.min_quality(&[]), 1.0);
    }

    #[test]
    fn test_raw_availability_json_keys() {
        let raw = RawAvailability::new()
            .present(DataType::MultiOmics, 0.7)
            .absent(DataType::Clinical);
        let json = serde_json::to_string(&raw).unwrap();
        assert!(json.contains("\"multi_omics\""));
        let back: RawAvailability = serde_json::from_str(&json).unwrap();
        assert_eq!(back.indicators.len(), 2);
    }
}
