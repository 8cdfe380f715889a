//! Grouping and reduction of benchmark records
//!
//! Records are partitioned on the values of caller-chosen dimensions and every
//! requested measurement is reduced to a [`Summary`]. Standard deviations use
//! the population convention throughout (see [`crate::stats`]).

use crate::stats::{total_cmp, Summary};
use indexmap::IndexMap;
use kernbench_common::{BenchmarkRecord, GroupKey};
use serde::{Deserialize, Serialize};
use tracing::debug;

/// What to group on and what to summarise
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AggregationSpec {
    pub group_by: Vec<String>,
    pub measurements: Vec<String>,
    /// Keep the contributing values, needed for distribution plots
    #[serde(default)]
    pub retain_raw: bool,
}

impl AggregationSpec {
    pub fn new<G, M>(group_by: G, measurements: M) -> Self
    where
        G: IntoIterator,
        G::Item: Into<String>,
        M: IntoIterator,
        M::Item: Into<String>,
    {
        Self {
            group_by: group_by.into_iter().map(Into::into).collect(),
            measurements: measurements.into_iter().map(Into::into).collect(),
            retain_raw: false,
        }
    }

    pub fn with_raw_values(mut self) -> Self {
        self.retain_raw = true;
        self
    }
}

/// Statistics of one measurement inside one group
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MeasurementStats {
    pub summary: Summary,
    /// Contributing values in insertion order, when requested
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub values: Option<Vec<f64>>,
}

impl MeasurementStats {
    /// Raw values sorted ascending
    pub fn sorted_values(&self) -> Option<Vec<f64>> {
        self.values.as_ref().map(|v| {
            let mut sorted = v.clone();
            sorted.sort_by(total_cmp);
            sorted
        })
    }
}

/// All records sharing one [`GroupKey`]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AggregatedGroup {
    pub key: GroupKey,
    /// Number of contributing records, always at least 1
    pub count: usize,
    pub measurements: IndexMap<String, MeasurementStats>,
    /// Positions of the contributing records in the aggregated slice
    pub record_indices: Vec<usize>,
}

impl AggregatedGroup {
    pub fn stats(&self, measurement: &str) -> Option<&MeasurementStats> {
        self.measurements.get(measurement)
    }

    pub fn mean(&self, measurement: &str) -> Option<f64> {
        self.stats(measurement).map(|s| s.summary.mean)
    }
}

/// Partition `records` by `spec.group_by` and summarise `spec.measurements`.
///
/// Groups keep the order in which their first record appears. Records missing
/// a grouping dimension, or carrying none of the requested measurements, are
/// left out.
pub fn aggregate(
    records: &[BenchmarkRecord],
    spec: &AggregationSpec,
) -> IndexMap<GroupKey, AggregatedGroup> {
    let mut buckets: IndexMap<GroupKey, (Vec<usize>, IndexMap<&str, Vec<f64>>)> = IndexMap::new();
    let mut excluded = 0usize;

    for (index, record) in records.iter().enumerate() {
        let Some(key) = record.key_for(&spec.group_by) else {
            excluded += 1;
            continue;
        };
        let present: Vec<(&str, f64)> = spec
            .measurements
            .iter()
            .filter_map(|m| record.measurement(m).map(|v| (m.as_str(), v)))
            .collect();
        if present.is_empty() {
            excluded += 1;
            continue;
        }

        let (indices, values) = buckets.entry(key).or_default();
        indices.push(index);
        for (name, value) in present {
            values.entry(name).or_default().push(value);
        }
    }

    if excluded > 0 {
        debug!(
            "{} of {} records excluded from grouping by {:?}",
            excluded,
            records.len(),
            spec.group_by
        );
    }

    buckets
        .into_iter()
        .map(|(key, (record_indices, mut values))| {
            let measurements = spec
                .measurements
                .iter()
                .filter_map(|name| {
                    let raw = values.swap_remove(name.as_str())?;
                    let summary = Summary::from_values(&raw)?;
                    let values = spec.retain_raw.then_some(raw);
                    Some((name.clone(), MeasurementStats { summary, values }))
                })
                .collect();
            let group = AggregatedGroup {
                key: key.clone(),
                count: record_indices.len(),
                measurements,
                record_indices,
            };
            (key, group)
        })
        .collect()
}

/// Distinct values of `dimension`, numerically sorted when every value is a
/// number and in order of first appearance otherwise.
pub fn category_order<'a, I>(records: I, dimension: &str) -> Vec<String>
where
    I: IntoIterator<Item = &'a BenchmarkRecord>,
{
    let mut values: Vec<String> = Vec::new();
    for record in records {
        if let Some(value) = record.dimension(dimension) {
            if !values.iter().any(|v| v == value) {
                values.push(value.to_string());
            }
        }
    }

    let numeric: Option<Vec<f64>> = values.iter().map(|v| v.parse::<f64>().ok()).collect();
    if let Some(numbers) = numeric {
        let mut paired: Vec<(f64, String)> = numbers.into_iter().zip(values).collect();
        paired.sort_by(|a, b| total_cmp(&a.0, &b.0));
        return paired.into_iter().map(|(_, v)| v).collect();
    }

    values
}
