//! Report pipeline: load, derive, summarise, render and record a manifest

use crate::aggregate::aggregate;
use crate::chart::{sanitize, ArtifactRegistry, ChartRenderer, ReportArtifact};
use crate::config::{ReportConfig, SummarySpec};
use crate::derive::{derive_throughput, ratios_to_records, run_comparison};
use crate::loader::load_records;
use crate::stats::{format_value, Summary};
use chrono::{DateTime, Utc};
use indexmap::IndexMap;
use kernbench_common::{BenchmarkRecord, GroupKey, KernbenchError, Result, PROVENANCE};
use serde::Serialize;
use std::path::{Path, PathBuf};
use tracing::{debug, error, info, warn};

pub const MANIFEST_FILE: &str = "manifest.json";

/// Records ready for summaries and charts
#[derive(Debug, Default)]
pub struct PreparedData {
    /// Loaded records with throughput measurements added
    pub records: Vec<BenchmarkRecord>,
    /// Ratio records per comparison, keyed by comparison name
    pub datasets: IndexMap<String, Vec<BenchmarkRecord>>,
    /// Recoverable problems met while loading or deriving
    pub diagnostics: Vec<String>,
    pub files_loaded: usize,
}

impl PreparedData {
    /// Record set holding `measurement`: a comparison's ratios or the loaded records
    pub fn dataset_for(&self, measurement: &str) -> &[BenchmarkRecord] {
        self.datasets
            .get(measurement)
            .map(Vec::as_slice)
            .unwrap_or(&self.records)
    }
}

/// One group/measurement line of a summary table
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SummaryRow {
    pub key: GroupKey,
    pub measurement: String,
    pub summary: Summary,
}

#[derive(Debug, Clone, Serialize)]
pub struct SummaryArtifact {
    pub name: String,
    pub path: PathBuf,
    pub rows: usize,
}

/// A chart or summary that produced no output
#[derive(Debug, Clone, Serialize)]
pub struct SkippedItem {
    /// `chart` or `summary`
    pub kind: String,
    pub name: String,
    pub reason: String,
    /// False for failures outside the data, such as an unwritable output directory
    pub recoverable: bool,
}

impl SkippedItem {
    fn new(kind: &str, name: &str, err: &KernbenchError) -> Self {
        let recoverable = err.is_recoverable();
        if recoverable {
            warn!("Skipping {} '{}': {}", kind, name, err);
        } else {
            error!("Skipping {} '{}': {}", kind, name, err);
        }
        Self {
            kind: kind.to_string(),
            name: name.to_string(),
            reason: err.to_string(),
            recoverable,
        }
    }
}

/// Outcome of a report run, also written as the manifest
#[derive(Debug, Clone, Serialize)]
pub struct RunSummary {
    pub generated_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    pub records: usize,
    pub files_loaded: usize,
    pub diagnostics: Vec<String>,
    pub summaries: Vec<SummaryArtifact>,
    pub artifacts: Vec<ReportArtifact>,
    pub skipped: Vec<SkippedItem>,
    pub manifest: PathBuf,
}

pub struct ReportPipeline {
    config: ReportConfig,
}

impl ReportPipeline {
    pub fn new(config: ReportConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self { config })
    }

    pub fn config(&self) -> &ReportConfig {
        &self.config
    }

    /// Load every input and compute derived measurements.
    ///
    /// Fails with `NoData` when no input row survives loading.
    pub fn prepare(&self) -> Result<PreparedData> {
        let outcome = load_records(&self.config.inputs, &self.config.schema);
        let mut diagnostics: Vec<String> = outcome.diagnostics.iter().map(|d| d.to_string()).collect();
        if outcome.is_empty() {
            return Err(KernbenchError::NoData(format!(
                "no usable rows in {} input file(s) ({} problems reported)",
                self.config.inputs.len(),
                diagnostics.len()
            )));
        }
        info!(
            "Loaded {} records from {} of {} inputs",
            outcome.records.len(),
            outcome.files_loaded,
            self.config.inputs.len()
        );

        let mut records = outcome.records;
        for spec in &self.config.throughput {
            records = derive_throughput(&records, spec);
            let derived = records.iter().filter(|r| r.measurement(&spec.name).is_some()).count();
            info!("Derived '{}' for {} of {} records", spec.name, derived, records.len());
        }

        let mut datasets = IndexMap::new();
        for spec in &self.config.comparisons {
            let ratios = match run_comparison(&records, spec) {
                Ok(ratios) => ratios,
                Err(e) => {
                    warn!("Comparison '{}' failed: {}", spec.name, e);
                    diagnostics.push(format!("comparison '{}': {}", spec.name, e));
                    Vec::new()
                }
            };
            info!("Comparison '{}' ({}): {} ratios", spec.name, spec.kind, ratios.len());
            datasets.insert(
                spec.name.clone(),
                ratios_to_records(&ratios, &spec.name, &spec.drop_from_output),
            );
        }

        Ok(PreparedData {
            records,
            datasets,
            diagnostics,
            files_loaded: outcome.files_loaded,
        })
    }

    /// Configured summaries, or one over every declared dimension and
    /// measurement when none is configured
    pub fn summary_specs(&self) -> Vec<SummarySpec> {
        if !self.config.summaries.is_empty() {
            return self.config.summaries.clone();
        }
        let mut group_by = vec![PROVENANCE.to_string()];
        group_by.extend(self.config.schema.categorical.iter().cloned());
        let mut measurements = self.config.schema.numeric.clone();
        measurements.extend(self.config.throughput.iter().map(|t| t.name.clone()));
        vec![SummarySpec {
            name: "all".to_string(),
            group_by,
            measurements,
        }]
    }

    /// Run the full pipeline, writing every artifact under the output directory
    pub fn run(&self) -> Result<RunSummary> {
        let data = self.prepare()?;
        let output_dir = &self.config.output_dir;
        std::fs::create_dir_all(output_dir)?;
        let mut registry = ArtifactRegistry::new();

        let mut summaries = Vec::new();
        let mut skipped = Vec::new();
        for spec in self.summary_specs() {
            let path = output_dir.join(format!("summary_{}.csv", sanitize(&spec.name)));
            let rows = summary_rows(&data, &spec);
            let written = registry
                .claim(&path, false)
                .and_then(|_| write_summary_csv(&path, &spec, &rows));
            match written {
                Ok(()) => {
                    info!("Wrote {} summary rows to {}", rows.len(), path.display());
                    summaries.push(SummaryArtifact {
                        name: spec.name.clone(),
                        path,
                        rows: rows.len(),
                    });
                }
                Err(e) => skipped.push(SkippedItem::new("summary", &spec.name, &e)),
            }
        }

        let renderer = ChartRenderer::new(output_dir, &self.config.labels)
            .with_size(self.config.chart_width, self.config.chart_height);
        let mut artifacts = Vec::new();
        for chart in &self.config.charts {
            match renderer.render(data.dataset_for(&chart.measurement), chart, &mut registry) {
                Ok(written) => {
                    debug!("Chart '{}' produced {} files", chart.name, written.len());
                    artifacts.extend(written);
                }
                Err(e) => skipped.push(SkippedItem::new("chart", &chart.name, &e)),
            }
        }

        let summary = RunSummary {
            generated_at: Utc::now(),
            title: self.config.title.clone(),
            records: data.records.len(),
            files_loaded: data.files_loaded,
            diagnostics: data.diagnostics,
            summaries,
            artifacts,
            skipped,
            manifest: output_dir.join(MANIFEST_FILE),
        };
        write_manifest(&summary.manifest, &summary)?;

        if summary.artifacts.is_empty() {
            if !self.config.charts.is_empty() {
                return Err(KernbenchError::NoData(format!(
                    "none of the {} configured charts produced output",
                    self.config.charts.len()
                )));
            }
            if !summary.summaries.iter().any(|s| s.rows > 0) {
                return Err(KernbenchError::NoData(
                    "no charts configured and no summary rows written".to_string(),
                ));
            }
        }

        info!(
            "Report complete: {} charts, {} summaries, {} skipped",
            summary.artifacts.len(),
            summary.summaries.len(),
            summary.skipped.len()
        );
        Ok(summary)
    }
}

/// Aggregate each measurement of `spec` over the dataset that holds it
pub fn summary_rows(data: &PreparedData, spec: &SummarySpec) -> Vec<SummaryRow> {
    let mut rows = Vec::new();
    for measurement in &spec.measurements {
        let single = SummarySpec {
            measurements: vec![measurement.clone()],
            ..spec.clone()
        };
        let groups = aggregate(data.dataset_for(measurement), &single.aggregation());
        if groups.is_empty() {
            debug!("Summary '{}': no groups for '{}'", spec.name, measurement);
        }
        rows.extend(groups.into_values().filter_map(|group| {
            let summary = group.stats(measurement)?.summary;
            Some(SummaryRow {
                key: group.key,
                measurement: measurement.clone(),
                summary,
            })
        }));
    }
    rows
}

pub fn write_summary_csv(path: &Path, spec: &SummarySpec, rows: &[SummaryRow]) -> Result<()> {
    let mut writer = csv::Writer::from_path(path)?;

    let mut header: Vec<&str> = spec.group_by.iter().map(String::as_str).collect();
    header.extend(["measurement", "count", "mean", "std_dev", "min", "max", "median"]);
    writer.write_record(&header)?;

    for row in rows {
        let s = &row.summary;
        let mut fields: Vec<String> = row.key.values().to_vec();
        fields.push(row.measurement.clone());
        fields.push(s.count.to_string());
        fields.extend([s.mean, s.std_dev, s.min, s.max, s.median].map(|v| v.to_string()));
        writer.write_record(&fields)?;
    }

    writer.flush()?;
    Ok(())
}

/// Plain-text table of summary rows
pub fn format_summary_table(spec: &SummarySpec, rows: &[SummaryRow]) -> String {
    let mut header: Vec<String> = spec.group_by.clone();
    header.extend(["measurement", "count", "mean", "std_dev", "min", "max"].map(String::from));

    let body: Vec<Vec<String>> = rows
        .iter()
        .map(|row| {
            let s = &row.summary;
            let mut cells = row.key.values().to_vec();
            cells.push(row.measurement.clone());
            cells.push(s.count.to_string());
            cells.extend([s.mean, s.std_dev, s.min, s.max].map(format_value));
            cells
        })
        .collect();

    let widths: Vec<usize> = (0..header.len())
        .map(|i| {
            body.iter()
                .map(|cells| cells[i].len())
                .chain(std::iter::once(header[i].len()))
                .max()
                .unwrap_or(0)
        })
        .collect();
    let line = |cells: &[String]| {
        cells
            .iter()
            .zip(&widths)
            .map(|(c, w)| format!("{:<width$}", c, width = *w))
            .collect::<Vec<_>>()
            .join("  ")
            .trim_end()
            .to_string()
    };

    let mut out = format!("== {} ==\n{}\n", spec.name, line(header.as_slice()));
    for cells in &body {
        out.push_str(&line(cells.as_slice()));
        out.push('\n');
    }
    out
}

fn write_manifest(path: &Path, summary: &RunSummary) -> Result<()> {
    let json = serde_json::to_string_pretty(summary)?;
    std::fs::write(path, json)?;
    info!("Manifest written to {}", path.display());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chart::{ChartKind, ChartSpec};
    use crate::loader::InputSource;
    use std::fs;
    use tempfile::tempdir;

    fn write_inputs(dir: &Path) -> Vec<InputSource> {
        fs::write(
            dir.join("results_amd.csv"),
            "precision,N,run,time_ms\nfloat,512,0,10\nfloat,512,1,12\nfloat,1024,0,40\n",
        )
        .unwrap();
        fs::write(
            dir.join("results_amd_opt.csv"),
            "precision,N,run,time_ms\nfloat,512,0,5\nfloat,512,1,4\nfloat,1024,0,10\n",
        )
        .unwrap();
        vec![
            InputSource::new(dir.join("results_amd.csv"))
                .with_provenance("AMD")
                .with_tag("version", "Original"),
            InputSource::new(dir.join("results_amd_opt.csv"))
                .with_provenance("AMD")
                .with_tag("version", "Optimized"),
        ]
    }

    fn config(dir: &Path) -> ReportConfig {
        let mut config = ReportConfig::example();
        config.output_dir = dir.join("out");
        config.inputs = write_inputs(dir);
        config.schema.filters.clear();
        config
    }

    #[test]
    fn test_prepare_derives_measurements() {
        let dir = tempdir().unwrap();
        let pipeline = ReportPipeline::new(config(dir.path())).unwrap();
        let data = pipeline.prepare().unwrap();

        assert_eq!(data.records.len(), 6);
        assert!(data.records.iter().all(|r| r.measurement("gflops").is_some()));
        let ratios = data.dataset_for("improvement");
        assert_eq!(ratios.len(), 3);
        assert_eq!(ratios[0].measurement("improvement"), Some(2.0));
        assert_eq!(ratios[1].measurement("improvement"), Some(3.0));
        assert!(ratios.iter().all(|r| r.dimension("run").is_none()));
        assert_eq!(data.dataset_for("time_ms").len(), 6);
    }

    #[test]
    fn test_run_writes_all_outputs() {
        let dir = tempdir().unwrap();
        let pipeline = ReportPipeline::new(config(dir.path())).unwrap();
        let summary = pipeline.run().unwrap();

        let out = dir.path().join("out");
        assert!(out.join("summary_times.csv").exists());
        assert!(out.join(MANIFEST_FILE).exists());
        assert!(out.join("gflops_AMD_float.svg").exists());
        assert!(out.join("times_AMD.svg").exists());
        assert!(out.join("improvement_AMD.svg").exists());
        assert_eq!(summary.artifacts.len(), 3);
        assert!(summary.skipped.is_empty());

        let csv = fs::read_to_string(out.join("summary_times.csv")).unwrap();
        let mut lines = csv.lines();
        assert_eq!(
            lines.next(),
            Some("provenance,version,precision,N,measurement,count,mean,std_dev,min,max,median")
        );
        assert_eq!(lines.next(), Some("AMD,Original,float,512,time_ms,2,11,1,10,12,11"));

        let manifest: serde_json::Value =
            serde_json::from_str(&fs::read_to_string(out.join(MANIFEST_FILE)).unwrap()).unwrap();
        assert_eq!(manifest["records"], 6);
        assert_eq!(manifest["artifacts"].as_array().unwrap().len(), 3);
    }

    #[test]
    fn test_zero_records_is_fatal() {
        let dir = tempdir().unwrap();
        let mut config = config(dir.path());
        config.inputs = vec![InputSource::new(dir.path().join("missing.csv"))];
        let pipeline = ReportPipeline::new(config).unwrap();
        assert!(matches!(pipeline.run(), Err(KernbenchError::NoData(_))));
    }

    #[test]
    fn test_skipped_charts() {
        let dir = tempdir().unwrap();
        let mut config = config(dir.path());
        config.charts.push(ChartSpec::new("bogus", ChartKind::GroupedBar, "watts", "N"));
        let summary = ReportPipeline::new(config).unwrap().run().unwrap();
        assert_eq!(summary.skipped.len(), 1);
        assert_eq!(summary.skipped[0].kind, "chart");
        assert_eq!(summary.skipped[0].name, "bogus");
        assert!(summary.skipped[0].recoverable);

        let mut config = self::config(dir.path());
        config.output_dir = dir.path().join("out2");
        config.charts = vec![ChartSpec::new("bogus", ChartKind::GroupedBar, "watts", "N")];
        let result = ReportPipeline::new(config).unwrap().run();
        assert!(matches!(result, Err(KernbenchError::NoData(_))));
        assert!(dir.path().join("out2").join(MANIFEST_FILE).exists());
    }

    #[test]
    fn test_default_summary_without_charts() {
        let dir = tempdir().unwrap();
        let mut config = config(dir.path());
        config.charts.clear();
        config.summaries.clear();
        config.comparisons.clear();
        let summary = ReportPipeline::new(config).unwrap().run().unwrap();

        let out = dir.path().join("out");
        assert!(summary.artifacts.is_empty());
        assert_eq!(summary.summaries.len(), 1);
        assert_eq!(summary.summaries[0].name, "all");
        assert!(summary.summaries[0].rows > 0);
        assert!(out.join("summary_all.csv").exists());
    }

    #[test]
    fn test_nothing_produced_is_fatal() {
        let dir = tempdir().unwrap();
        let mut config = config(dir.path());
        config.charts.clear();
        config.comparisons.clear();
        config.summaries = vec![SummarySpec {
            name: "watts".to_string(),
            group_by: vec!["N".to_string()],
            measurements: vec!["watts".to_string()],
        }];
        let result = ReportPipeline::new(config).unwrap().run();
        assert!(matches!(result, Err(KernbenchError::NoData(_))));
    }

    #[test]
    fn test_summary_names_and_write_failures() {
        let dir = tempdir().unwrap();
        let mut config = config(dir.path());
        for name in ["a/b", "blocked"] {
            config.summaries.push(SummarySpec {
                name: name.to_string(),
                group_by: vec!["N".to_string()],
                measurements: vec!["time_ms".to_string()],
            });
        }
        let out = dir.path().join("out");
        fs::create_dir_all(out.join("summary_blocked.csv")).unwrap();

        let summary = ReportPipeline::new(config).unwrap().run().unwrap();

        assert!(out.join("summary_a_b.csv").is_file());
        assert!(summary.summaries.iter().any(|s| s.name == "a/b"));
        assert!(summary.summaries.iter().any(|s| s.name == "times"));
        assert_eq!(summary.skipped.len(), 1);
        assert_eq!(summary.skipped[0].kind, "summary");
        assert_eq!(summary.skipped[0].name, "blocked");
        assert!(!summary.skipped[0].recoverable);
        assert_eq!(summary.artifacts.len(), 3);
    }

    #[test]
    fn test_summary_table_text() {
        let dir = tempdir().unwrap();
        let pipeline = ReportPipeline::new(config(dir.path())).unwrap();
        let data = pipeline.prepare().unwrap();
        let spec = SummarySpec {
            name: "ratios".to_string(),
            group_by: vec!["N".to_string()],
            measurements: vec!["improvement".to_string()],
        };
        let rows = summary_rows(&data, &spec);
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].summary.mean, 2.5);

        let table = format_summary_table(&spec, &rows);
        assert!(table.starts_with("== ratios ==\nN"));
        assert!(table.contains("512   improvement  2      2.50"));
    }
}
