//! Summary statistics shared by the aggregator and the renderer
//!
//! All dispersion figures use the population convention (divide by `n`), so a
//! single observation has a standard deviation of exactly zero.

use serde::{Deserialize, Serialize};
use std::cmp::Ordering;

/// Summary of one set of measurement values
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Summary {
    pub count: usize,
    pub mean: f64,
    /// Population standard deviation
    pub std_dev: f64,
    pub min: f64,
    pub max: f64,
    pub median: f64,
    /// First quartile
    pub q1: f64,
    /// Third quartile
    pub q3: f64,
}

impl Summary {
    /// Summarise a set of values. Returns `None` for an empty slice.
    pub fn from_values(values: &[f64]) -> Option<Self> {
        if values.is_empty() {
            return None;
        }
        let mut sorted = values.to_vec();
        sorted.sort_by(total_cmp);

        Some(Self {
            count: values.len(),
            mean: calculate_mean(values),
            std_dev: calculate_std_dev(values),
            min: sorted[0],
            max: sorted[sorted.len() - 1],
            median: calculate_percentile(&sorted, 50.0),
            q1: calculate_percentile(&sorted, 25.0),
            q3: calculate_percentile(&sorted, 75.0),
        })
    }

    pub fn iqr(&self) -> f64 {
        self.q3 - self.q1
    }
}

pub fn calculate_mean(values: &[f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    values.iter().sum::<f64>() / values.len() as f64
}

/// Population standard deviation
pub fn calculate_std_dev(values: &[f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }

    let mean = calculate_mean(values);
    let variance = values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / values.len() as f64;

    variance.sqrt()
}

/// Percentile of already sorted values, linearly interpolated between closest ranks
pub fn calculate_percentile(sorted_values: &[f64], percentile: f64) -> f64 {
    if sorted_values.is_empty() {
        return 0.0;
    }

    let rank = (percentile / 100.0).clamp(0.0, 1.0) * (sorted_values.len() - 1) as f64;
    let lower = rank.floor() as usize;
    let upper = rank.ceil() as usize;
    let weight = rank - lower as f64;

    sorted_values[lower] + (sorted_values[upper] - sorted_values[lower]) * weight
}

/// Box-plot whisker ends: the most extreme values within 1.5 IQR of the box
pub fn whiskers(sorted_values: &[f64], summary: &Summary) -> (f64, f64) {
    let low_fence = summary.q1 - 1.5 * summary.iqr();
    let high_fence = summary.q3 + 1.5 * summary.iqr();

    let low = sorted_values
        .iter()
        .copied()
        .find(|v| *v >= low_fence)
        .unwrap_or(summary.min);
    let high = sorted_values
        .iter()
        .rev()
        .copied()
        .find(|v| *v <= high_fence)
        .unwrap_or(summary.max);

    (low, high)
}

/// Ordering for f64 values that never panics on NaN
pub fn total_cmp(a: &f64, b: &f64) -> Ordering {
    a.total_cmp(b)
}

/// Format a value for tick labels and summaries
pub fn format_value(value: f64) -> String {
    let abs = value.abs();
    if abs == 0.0 {
        "0".to_string()
    } else if abs >= 10_000.0 || abs < 0.01 {
        format!("{:.2e}", value)
    } else if abs >= 100.0 {
        format!("{:.0}", value)
    } else if abs >= 1.0 {
        format!("{:.2}", value)
    } else {
        format!("{:.3}", value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_constant_values() {
        let summary = Summary::from_values(&[10.0, 10.0, 10.0]).unwrap();
        assert_eq!(summary.count, 3);
        assert_eq!(summary.mean, 10.0);
        assert_eq!(summary.std_dev, 0.0);
        assert_eq!(summary.min, 10.0);
        assert_eq!(summary.max, 10.0);
    }

    #[test]
    fn test_single_value() {
        let summary = Summary::from_values(&[40.0]).unwrap();
        assert_eq!(summary.count, 1);
        assert_eq!(summary.mean, 40.0);
        assert_eq!(summary.std_dev, 0.0);
        assert_eq!(summary.median, 40.0);
    }

    #[test]
    fn test_empty() {
        assert!(Summary::from_values(&[]).is_none());
    }

    #[test]
    fn test_calculate_std_dev() {
        let values = vec![2.0, 4.0, 4.0, 4.0, 5.0, 5.0, 7.0, 9.0];
        assert!((calculate_std_dev(&values) - 2.0).abs() < 1e-12);
    }

    #[test]
    fn test_calculate_percentile() {
        let values = vec![1.0, 2.0, 3.0, 4.0];
        assert_eq!(calculate_percentile(&values, 50.0), 2.5);
        assert_eq!(calculate_percentile(&values, 0.0), 1.0);
        assert_eq!(calculate_percentile(&values, 100.0), 4.0);
        assert_eq!(calculate_percentile(&values, 25.0), 1.75);
    }

    #[test]
    fn test_whiskers_exclude_outliers() {
        let sorted = vec![1.0, 2.0, 3.0, 4.0, 100.0];
        let summary = Summary::from_values(&sorted).unwrap();
        let (low, high) = whiskers(&sorted, &summary);
        assert_eq!(low, 1.0);
        assert_eq!(high, 4.0);
    }

    #[test]
    fn test_format_value() {
        assert_eq!(format_value(0.0), "0");
        assert_eq!(format_value(12.345), "12.35");
        assert_eq!(format_value(512.0), "512");
        assert_eq!(format_value(0.5), "0.500");
    }
}
