//! Derived metrics: speedups, improvement factors and throughput
//!
//! Ratios are only produced for matched pairs with a strictly positive
//! denominator. Undefined ratios are dropped, so downstream statistics never
//! see NaN or infinity.

use crate::aggregate::AggregatedGroup;
use indexmap::IndexMap;
use kernbench_common::{
    BenchmarkRecord, ComparisonKind, DerivedRatio, GroupKey, KernbenchError, Result, PROVENANCE,
};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tracing::debug;

/// Whether ratios are taken per matched trial or between group means
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ComparisonMode {
    #[default]
    PerTrial,
    PerGroup,
}

/// A named comparison between two values of one dimension
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ComparisonSpec {
    pub name: String,
    pub kind: ComparisonKind,
    /// Dimension whose value tells baseline and variant apart
    pub dimension: String,
    pub baseline: String,
    pub variant: String,
    pub measurement: String,
    /// Dimensions that must be equal on both sides, including the trial index
    /// for per-trial ratios
    pub match_on: Vec<String>,
    #[serde(default)]
    pub mode: ComparisonMode,
    /// Match dimensions left off the ratio records, such as the run index
    #[serde(default)]
    pub drop_from_output: Vec<String>,
}

impl ComparisonSpec {
    pub fn validate(&self) -> Result<()> {
        if self.match_on.contains(&self.dimension) {
            return Err(KernbenchError::Config(format!(
                "comparison '{}' matches on its own comparison dimension '{}'",
                self.name, self.dimension
            )));
        }
        if self.baseline == self.variant {
            return Err(KernbenchError::Config(format!(
                "comparison '{}' compares '{}' with itself",
                self.name, self.baseline
            )));
        }
        Ok(())
    }
}

/// Pair records selected by `is_baseline` and `is_variant` that agree on every
/// `match_on` dimension and divide their `measurement` values.
///
/// When several records on one side share a key they are paired with the other
/// side's records for that key in insertion order; surplus records are unmatched.
pub fn compare_by<B, V>(
    records: &[BenchmarkRecord],
    match_on: &[String],
    measurement: &str,
    is_baseline: B,
    is_variant: V,
) -> Vec<DerivedRatio>
where
    B: Fn(&BenchmarkRecord) -> bool,
    V: Fn(&BenchmarkRecord) -> bool,
{
    let mut baselines: IndexMap<GroupKey, Vec<(&BenchmarkRecord, f64)>> = IndexMap::new();
    let mut variants: HashMap<GroupKey, Vec<f64>> = HashMap::new();

    for record in records {
        let (Some(key), Some(value)) = (record.key_for(match_on), record.measurement(measurement))
        else {
            continue;
        };
        if is_baseline(record) {
            baselines.entry(key).or_default().push((record, value));
        } else if is_variant(record) {
            variants.entry(key).or_default().push(value);
        }
    }

    let mut ratios = Vec::new();
    let mut undefined = 0usize;
    for (key, base) in &baselines {
        let Some(matched) = variants.get(key) else {
            continue;
        };
        for ((record, baseline_value), variant_value) in base.iter().zip(matched) {
            let shared: IndexMap<String, String> =
                match_on.iter().cloned().zip(key.values().iter().cloned()).collect();
            match DerivedRatio::try_new(record.provenance(), shared, *baseline_value, *variant_value)
            {
                Some(ratio) => ratios.push(ratio),
                None => undefined += 1,
            }
        }
    }

    if undefined > 0 {
        debug!("{} matched pairs had an undefined ratio and were dropped", undefined);
    }
    ratios
}

/// Per-trial ratios for a configured comparison
pub fn compare(records: &[BenchmarkRecord], spec: &ComparisonSpec) -> Result<Vec<DerivedRatio>> {
    spec.validate()?;
    let dimension = spec.dimension.as_str();
    Ok(compare_by(
        records,
        &spec.match_on,
        &spec.measurement,
        |r| r.dimension(dimension) == Some(spec.baseline.as_str()),
        |r| r.dimension(dimension) == Some(spec.variant.as_str()),
    ))
}

/// Ratios of group means between groups that differ only in `dimension`.
///
/// `group_by` must be the grouping the `groups` were built with and contain
/// `dimension`.
pub fn compare_groups(
    groups: &IndexMap<GroupKey, AggregatedGroup>,
    group_by: &[String],
    dimension: &str,
    baseline: &str,
    variant: &str,
    measurement: &str,
) -> Result<Vec<DerivedRatio>> {
    let position = group_by
        .iter()
        .position(|d| d == dimension)
        .ok_or_else(|| KernbenchError::UnknownDimension(dimension.to_string()))?;

    let mut ratios = Vec::new();
    for (key, group) in groups {
        if key.get(position) != Some(baseline) {
            continue;
        }
        let mut variant_key = key.clone();
        variant_key.0[position] = variant.to_string();

        let (Some(baseline_mean), Some(variant_mean)) = (
            group.mean(measurement),
            groups.get(&variant_key).and_then(|g| g.mean(measurement)),
        ) else {
            continue;
        };

        let shared: IndexMap<String, String> = group_by
            .iter()
            .zip(key.values())
            .filter(|(d, _)| d.as_str() != dimension)
            .map(|(d, v)| (d.clone(), v.clone()))
            .collect();
        let provenance = shared
            .get(PROVENANCE)
            .cloned()
            .unwrap_or_else(|| "aggregate".to_string());

        if let Some(ratio) = DerivedRatio::try_new(provenance, shared, baseline_mean, variant_mean) {
            ratios.push(ratio);
        }
    }
    Ok(ratios)
}

/// Run a comparison in its configured mode
pub fn run_comparison(records: &[BenchmarkRecord], spec: &ComparisonSpec) -> Result<Vec<DerivedRatio>> {
    match spec.mode {
        ComparisonMode::PerTrial => compare(records, spec),
        ComparisonMode::PerGroup => {
            spec.validate()?;
            let mut group_by = spec.match_on.clone();
            group_by.push(spec.dimension.clone());
            let groups = crate::aggregate::aggregate(
                records,
                &crate::aggregate::AggregationSpec::new(group_by.clone(), [spec.measurement.clone()]),
            );
            compare_groups(
                &groups,
                &group_by,
                &spec.dimension,
                &spec.baseline,
                &spec.variant,
                &spec.measurement,
            )
        }
    }
}

/// Re-express ratios as records carrying a single `measurement`, so they can be
/// aggregated and rendered like loaded data. Dimensions in `drop` are removed.
pub fn ratios_to_records(
    ratios: &[DerivedRatio],
    measurement: &str,
    drop: &[String],
) -> Vec<BenchmarkRecord> {
    ratios
        .iter()
        .filter_map(|ratio| {
            let dimensions: IndexMap<String, String> = ratio
                .shared
                .iter()
                .filter(|(d, _)| d.as_str() != PROVENANCE && !drop.contains(*d))
                .map(|(d, v)| (d.clone(), v.clone()))
                .collect();
            let measurements = [(measurement.to_string(), ratio.ratio)].into_iter().collect();
            BenchmarkRecord::new(ratio.provenance.clone(), dimensions, measurements).ok()
        })
        .collect()
}

/// `coefficient * size^exponent / (time * time_divisor)`
///
/// The defaults give GFLOPS for an `N x N` matrix multiplication timed in
/// milliseconds: `2 * N^3 / (t_ms * 1e6)`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ThroughputFormula {
    pub coefficient: f64,
    pub exponent: f64,
    pub time_divisor: f64,
}

impl Default for ThroughputFormula {
    fn default() -> Self {
        Self {
            coefficient: 2.0,
            exponent: 3.0,
            time_divisor: 1e6,
        }
    }
}

impl ThroughputFormula {
    pub fn evaluate(&self, size: f64, time: f64) -> Option<f64> {
        if time <= 0.0 || !time.is_finite() || !size.is_finite() || self.time_divisor == 0.0 {
            return None;
        }
        let value = self.coefficient * size.powf(self.exponent) / (time * self.time_divisor);
        value.is_finite().then_some(value)
    }
}

/// A named throughput measurement computed from a size dimension and a time
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ThroughputSpec {
    pub name: String,
    pub size_dimension: String,
    pub time_measurement: String,
    #[serde(default)]
    pub formula: ThroughputFormula,
}

/// Copy `records`, adding `output` wherever `f(size, time)` is defined.
/// Records without a numeric size or the time measurement are copied unchanged.
pub fn derive_measurement<F>(
    records: &[BenchmarkRecord],
    size_dimension: &str,
    time_measurement: &str,
    output: &str,
    f: F,
) -> Vec<BenchmarkRecord>
where
    F: Fn(f64, f64) -> Option<f64>,
{
    records
        .iter()
        .map(|record| {
            let size = record
                .dimension(size_dimension)
                .and_then(|s| s.parse::<f64>().ok());
            let time = record.measurement(time_measurement);
            match (size, time) {
                (Some(size), Some(time)) => match f(size, time) {
                    Some(value) => record.with_measurement(output, value),
                    None => record.clone(),
                },
                _ => record.clone(),
            }
        })
        .collect()
}

/// Apply a configured throughput derivation
pub fn derive_throughput(records: &[BenchmarkRecord], spec: &ThroughputSpec) -> Vec<BenchmarkRecord> {
    let formula = spec.formula;
    derive_measurement(
        records,
        &spec.size_dimension,
        &spec.time_measurement,
        &spec.name,
        |size, time| formula.evaluate(size, time),
    )
}
