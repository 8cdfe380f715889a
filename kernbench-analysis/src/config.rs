//! Report configuration
//!
//! A report is described by one TOML file: the schema of the input tables, the
//! input files themselves and the derivations, summaries and charts to produce.

use crate::aggregate::AggregationSpec;
use crate::chart::{sanitize, ChartKind, ChartSpec, ReferenceLine, YScale};
use crate::derive::{ComparisonMode, ComparisonSpec, ThroughputFormula, ThroughputSpec};
use crate::loader::{InputSource, RowFilter, SchemaConfig};
use indexmap::IndexMap;
use kernbench_common::{ComparisonKind, KernbenchError, Result, PROVENANCE};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::{Path, PathBuf};

/// A summary table written as `summary_<name>.csv`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SummarySpec {
    pub name: String,
    pub group_by: Vec<String>,
    pub measurements: Vec<String>,
}

impl SummarySpec {
    pub fn aggregation(&self) -> AggregationSpec {
        AggregationSpec::new(self.group_by.clone(), self.measurements.clone())
    }
}

/// Complete description of one report run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReportConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    /// Directory receiving charts, summaries and the manifest
    pub output_dir: PathBuf,
    pub chart_width: u32,
    pub chart_height: u32,
    pub schema: SchemaConfig,
    pub inputs: Vec<InputSource>,
    pub throughput: Vec<ThroughputSpec>,
    pub comparisons: Vec<ComparisonSpec>,
    pub summaries: Vec<SummarySpec>,
    pub charts: Vec<ChartSpec>,
    /// Display names for dimension values and measurement names
    pub labels: IndexMap<String, String>,
}

impl Default for ReportConfig {
    fn default() -> Self {
        Self {
            title: None,
            output_dir: PathBuf::from("plots"),
            chart_width: 1000,
            chart_height: 600,
            schema: SchemaConfig::default(),
            inputs: Vec::new(),
            throughput: Vec::new(),
            comparisons: Vec::new(),
            summaries: Vec::new(),
            charts: Vec::new(),
            labels: IndexMap::new(),
        }
    }
}

impl ReportConfig {
    /// Load configuration from a TOML file. Relative input paths are resolved
    /// against the directory holding the file.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)?;
        let mut config: Self = toml::from_str(&content)?;

        if let Some(base) = path.parent() {
            for input in &mut config.inputs {
                if input.path.is_relative() {
                    input.path = base.join(&input.path);
                }
            }
        }
        Ok(config)
    }

    /// Save configuration to a TOML file
    pub fn to_file<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let path = path.as_ref();
        let content = toml::to_string_pretty(self)?;
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Check the configuration before any file is read
    pub fn validate(&self) -> Result<()> {
        if self.inputs.is_empty() {
            return Err(KernbenchError::Config("no inputs configured".to_string()));
        }
        if self.chart_width == 0 || self.chart_height == 0 {
            return Err(KernbenchError::Config("chart size must be non-zero".to_string()));
        }
        self.schema.delimiter_byte()?;
        if self.schema.numeric.is_empty() {
            return Err(KernbenchError::Config("schema declares no numeric columns".to_string()));
        }

        let mut measurements: HashSet<&str> =
            self.schema.numeric.iter().map(String::as_str).collect();
        for spec in &self.throughput {
            if spec.formula.time_divisor == 0.0 {
                return Err(KernbenchError::Config(format!(
                    "throughput '{}' has a zero time divisor",
                    spec.name
                )));
            }
            if !measurements.insert(spec.name.as_str()) {
                return Err(KernbenchError::Config(format!(
                    "measurement '{}' is defined twice",
                    spec.name
                )));
            }
        }
        for spec in &self.comparisons {
            spec.validate()?;
            if !measurements.insert(spec.name.as_str()) {
                return Err(KernbenchError::Config(format!(
                    "measurement '{}' is defined twice",
                    spec.name
                )));
            }
        }

        let mut names = HashSet::new();
        for summary in &self.summaries {
            if summary.measurements.is_empty() {
                return Err(KernbenchError::Config(format!(
                    "summary '{}' lists no measurements",
                    summary.name
                )));
            }
            if !names.insert(format!("summary_{}", sanitize(&summary.name))) {
                return Err(KernbenchError::Config(format!(
                    "summary '{}' is defined twice or shares a file name",
                    summary.name
                )));
            }
        }
        for chart in &self.charts {
            chart.validate()?;
            if !names.insert(chart.name.clone()) {
                return Err(KernbenchError::Config(format!(
                    "chart '{}' is defined twice",
                    chart.name
                )));
            }
        }
        Ok(())
    }

    /// Configuration for the matrix multiplication benchmark layout
    pub fn example() -> Self {
        let dims = |names: &[&str]| names.iter().map(|s| s.to_string()).collect::<Vec<_>>();

        let mut schema = SchemaConfig {
            categorical: dims(&["precision", "N", "run"]),
            numeric: dims(&["time_ms"]),
            provenance_prefix: Some("results_".to_string()),
            ..SchemaConfig::default()
        };
        schema.defaults.insert("precision".to_string(), "float".to_string());
        schema.filters.push(RowFilter {
            column: "type".to_string(),
            equals: "int".to_string(),
        });

        let inputs = vec![
            InputSource::new("results_amd.csv")
                .with_provenance("AMD")
                .with_tag("version", "Original"),
            InputSource::new("results_amd_optimized.csv")
                .with_provenance("AMD")
                .with_tag("version", "Optimized"),
        ];

        let mut gflops = ChartSpec::new("gflops", ChartKind::GroupedBoxplot, "gflops", "N")
            .with_series("version")
            .with_facets([PROVENANCE, "precision"]);
        gflops.show_points = true;
        gflops.reference_lines.push(ReferenceLine {
            label: "HW peak".to_string(),
            value: 14850.0,
            when: [
                (PROVENANCE.to_string(), "AMD".to_string()),
                ("precision".to_string(), "float".to_string()),
            ]
            .into_iter()
            .collect(),
        });

        let times = ChartSpec::new("times", ChartKind::GroupedBar, "time_ms", "N")
            .with_series("version")
            .with_facets([PROVENANCE])
            .with_y_scale(YScale::Log);
        let improvement = ChartSpec::new("improvement", ChartKind::GroupedBoxplot, "improvement", "N")
            .with_series("precision")
            .with_facets([PROVENANCE]);

        let mut labels = IndexMap::new();
        labels.insert("time_ms".to_string(), "Time (ms)".to_string());
        labels.insert("gflops".to_string(), "GFLOPS".to_string());

        Self {
            title: Some("Matrix multiplication".to_string()),
            schema,
            inputs,
            throughput: vec![ThroughputSpec {
                name: "gflops".to_string(),
                size_dimension: "N".to_string(),
                time_measurement: "time_ms".to_string(),
                formula: ThroughputFormula::default(),
            }],
            comparisons: vec![ComparisonSpec {
                name: "improvement".to_string(),
                kind: ComparisonKind::Improvement,
                dimension: "version".to_string(),
                baseline: "Original".to_string(),
                variant: "Optimized".to_string(),
                measurement: "time_ms".to_string(),
                match_on: dims(&[PROVENANCE, "N", "precision", "run"]),
                mode: ComparisonMode::PerTrial,
                drop_from_output: dims(&["run"]),
            }],
            summaries: vec![SummarySpec {
                name: "times".to_string(),
                group_by: dims(&[PROVENANCE, "version", "precision", "N"]),
                measurements: dims(&["time_ms", "gflops"]),
            }],
            charts: vec![gflops, times, improvement],
            labels,
            ..Self::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_example_is_valid() {
        ReportConfig::example().validate().unwrap();
    }

    #[test]
    fn test_file_round_trip_resolves_inputs() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("conf").join("report.toml");
        let config = ReportConfig::example();
        config.to_file(&path).unwrap();

        let loaded = ReportConfig::from_file(&path).unwrap();
        assert_eq!(loaded.charts, config.charts);
        assert_eq!(loaded.schema, config.schema);
        assert_eq!(
            loaded.inputs[0].path,
            dir.path().join("conf").join("results_amd.csv")
        );
    }

    #[test]
    fn test_minimal_toml() {
        let text = r#"
            [[inputs]]
            path = "/data/results_paul.csv"

            [[charts]]
            name = "times"
            kind = "grouped_bar"
            measurement = "time_ms"
            x = "N"
        "#;
        let config: ReportConfig = toml::from_str(text).unwrap();
        config.validate().unwrap();
        assert_eq!(config.output_dir, PathBuf::from("plots"));
        assert_eq!(config.schema.numeric, vec!["time_ms"]);
        assert!(config.charts[0].error_bars);
        assert_eq!(config.charts[0].y_scale, YScale::Linear);
    }

    #[test]
    fn test_validate_rejects_bad_configs() {
        assert!(ReportConfig::default().validate().is_err());

        let mut config = ReportConfig::example();
        config.charts.push(config.charts[0].clone());
        assert!(matches!(config.validate(), Err(KernbenchError::Config(_))));

        let mut config = ReportConfig::example();
        config.throughput[0].name = "time_ms".to_string();
        assert!(config.validate().is_err());

        let mut config = ReportConfig::example();
        config.schema.delimiter = '→';
        assert!(config.validate().is_err());

        let mut config = ReportConfig::example();
        let mut clash = config.summaries[0].clone();
        config.summaries[0].name = "a/b".to_string();
        clash.name = "a_b".to_string();
        config.summaries.push(clash);
        assert!(matches!(config.validate(), Err(KernbenchError::Config(_))));
    }
}
