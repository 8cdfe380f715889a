//! kernbench analysis
//!
//! Turns per-trial kernel benchmark tables into summary statistics, derived
//! comparisons and charts:
//! - [`loader`]: delimited input files to [`BenchmarkRecord`]s
//! - [`aggregate`]: grouping and summary statistics
//! - [`derive`]: speedups, improvement factors and throughput
//! - [`chart`]: SVG charts with facets and visual channels
//! - [`report`]: the end-to-end pipeline driven by a [`config::ReportConfig`]

pub mod aggregate;
pub mod chart;
pub mod config;
pub mod derive;
pub mod loader;
pub mod report;
pub mod stats;

pub use aggregate::{aggregate, category_order, AggregatedGroup, AggregationSpec, MeasurementStats};
pub use chart::{
    render_chart, ArtifactRegistry, ChartKind, ChartRenderer, ChartSpec, ReferenceLine, ReportArtifact, YScale,
};
pub use config::{ReportConfig, SummarySpec};
pub use derive::{
    compare, compare_by, compare_groups, derive_measurement, derive_throughput, ratios_to_records,
    run_comparison, ComparisonMode, ComparisonSpec, ThroughputFormula, ThroughputSpec,
};
pub use kernbench_common::{BenchmarkRecord, KernbenchError, Result};
pub use loader::{load_records, InputSource, LoadOutcome, RowFilter, SchemaConfig};
pub use report::{PreparedData, ReportPipeline, RunSummary, SkippedItem};
pub use stats::Summary;
