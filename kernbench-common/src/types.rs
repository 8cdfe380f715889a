use crate::error::{KernbenchError, Result};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Reserved dimension name that resolves to a record's provenance
pub const PROVENANCE: &str = "provenance";

/// One trial observation loaded from a single input row
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BenchmarkRecord {
    provenance: String,
    dimensions: IndexMap<String, String>,
    measurements: IndexMap<String, f64>,
}

impl BenchmarkRecord {
    /// Build a record, rejecting an empty provenance or an empty measurement set.
    pub fn new(
        provenance: impl Into<String>,
        dimensions: IndexMap<String, String>,
        measurements: IndexMap<String, f64>,
    ) -> Result<Self> {
        let provenance = provenance.into();
        if provenance.trim().is_empty() {
            return Err(KernbenchError::InvalidRecord(
                "provenance must not be empty".to_string(),
            ));
        }
        if measurements.is_empty() {
            return Err(KernbenchError::InvalidRecord(format!(
                "record from '{}' carries no measurement",
                provenance
            )));
        }
        Ok(Self {
            provenance,
            dimensions,
            measurements,
        })
    }

    pub fn provenance(&self) -> &str {
        &self.provenance
    }

    /// Look up a categorical value. `provenance` resolves to the record's provenance.
    pub fn dimension(&self, name: &str) -> Option<&str> {
        if name == PROVENANCE {
            return Some(&self.provenance);
        }
        self.dimensions.get(name).map(String::as_str)
    }

    pub fn dimensions(&self) -> &IndexMap<String, String> {
        &self.dimensions
    }

    pub fn measurement(&self, name: &str) -> Option<f64> {
        self.measurements.get(name).copied()
    }

    pub fn measurements(&self) -> &IndexMap<String, f64> {
        &self.measurements
    }

    /// Copy of this record with one extra (or replaced) measurement
    pub fn with_measurement(&self, name: impl Into<String>, value: f64) -> Self {
        let mut record = self.clone();
        record.measurements.insert(name.into(), value);
        record
    }

    /// Values for the given dimensions, or `None` if any of them is absent
    pub fn key_for(&self, dimensions: &[String]) -> Option<GroupKey> {
        dimensions
            .iter()
            .map(|d| self.dimension(d).map(str::to_string))
            .collect::<Option<Vec<_>>>()
            .map(GroupKey)
    }
}

/// Ordered tuple of dimension values identifying one aggregation group
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct GroupKey(pub Vec<String>);

impl GroupKey {
    pub fn new<I, S>(values: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self(values.into_iter().map(Into::into).collect())
    }

    pub fn values(&self) -> &[String] {
        &self.0
    }

    pub fn get(&self, index: usize) -> Option<&str> {
        self.0.get(index).map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Display for GroupKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({})", self.0.join(", "))
    }
}

/// Kind of cross-group comparison
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ComparisonKind {
    /// baseline time / variant time
    Speedup,
    /// original time / optimized time
    Improvement,
}

impl fmt::Display for ComparisonKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ComparisonKind::Speedup => write!(f, "speedup"),
            ComparisonKind::Improvement => write!(f, "improvement"),
        }
    }
}

/// Ratio between two matched observations that differ only in the comparison dimension
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DerivedRatio {
    /// Provenance of the baseline side
    pub provenance: String,
    /// Values of every match dimension
    pub shared: IndexMap<String, String>,
    pub baseline_value: f64,
    pub variant_value: f64,
    /// `baseline_value / variant_value`, always finite and > 0
    pub ratio: f64,
}

impl DerivedRatio {
    /// Returns `None` when the ratio is undefined (non-positive or non-finite inputs).
    pub fn try_new(
        provenance: impl Into<String>,
        shared: IndexMap<String, String>,
        baseline_value: f64,
        variant_value: f64,
    ) -> Option<Self> {
        if !baseline_value.is_finite() || !variant_value.is_finite() || variant_value <= 0.0 {
            return None;
        }
        let ratio = baseline_value / variant_value;
        if !ratio.is_finite() || ratio <= 0.0 {
            return None;
        }
        Some(Self {
            provenance: provenance.into(),
            shared,
            baseline_value,
            variant_value,
            ratio,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record() -> BenchmarkRecord {
        let mut dims = IndexMap::new();
        dims.insert("precision".to_string(), "float".to_string());
        dims.insert("N".to_string(), "512".to_string());
        let mut values = IndexMap::new();
        values.insert("time_ms".to_string(), 10.0);
        BenchmarkRecord::new("AMD", dims, values).unwrap()
    }

    #[test]
    fn test_record_invariants() {
        let mut values = IndexMap::new();
        values.insert("time_ms".to_string(), 1.0);
        assert!(BenchmarkRecord::new("", IndexMap::new(), values).is_err());
        assert!(BenchmarkRecord::new("AMD", IndexMap::new(), IndexMap::new()).is_err());
    }

    #[test]
    fn test_provenance_dimension() {
        let r = record();
        assert_eq!(r.dimension(PROVENANCE), Some("AMD"));
        assert_eq!(r.dimension("precision"), Some("float"));
        assert_eq!(r.dimension("run"), None);
    }

    #[test]
    fn test_key_for() {
        let r = record();
        let key = r.key_for(&["provenance".to_string(), "N".to_string()]).unwrap();
        assert_eq!(key, GroupKey::new(["AMD", "512"]));
        assert_eq!(key.to_string(), "(AMD, 512)");
        assert!(r.key_for(&["run".to_string()]).is_none());
    }

    #[test]
    fn test_with_measurement_leaves_original() {
        let r = record();
        let derived = r.with_measurement("gflops", 26.8);
        assert_eq!(derived.measurement("gflops"), Some(26.8));
        assert_eq!(r.measurement("gflops"), None);
    }

    #[test]
    fn test_ratio_rejects_undefined() {
        assert!(DerivedRatio::try_new("AMD", IndexMap::new(), 100.0, 0.0).is_none());
        assert!(DerivedRatio::try_new("AMD", IndexMap::new(), 100.0, -1.0).is_none());
        assert!(DerivedRatio::try_new("AMD", IndexMap::new(), f64::NAN, 2.0).is_none());
        assert!(DerivedRatio::try_new("AMD", IndexMap::new(), 0.0, 2.0).is_none());
        let r = DerivedRatio::try_new("AMD", IndexMap::new(), 100.0, 25.0).unwrap();
        assert_eq!(r.ratio, 4.0);
    }
}
