//! kernbench - benchmark report generator
//!
//! Loads per-trial benchmark tables, aggregates them and renders comparison
//! charts, either from a TOML report configuration or from command-line flags.

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use kernbench::analysis::report::format_summary_table;
use kernbench::analysis::{
    ChartKind, ChartSpec, InputSource, ReportConfig, ReportPipeline, SchemaConfig, SummarySpec,
    YScale,
};
use std::path::PathBuf;
use tracing::{debug, info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "kernbench")]
#[command(about = "Aggregate kernel benchmark results and render comparison charts")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Only log warnings and errors
    #[arg(short, long, global = true, conflicts_with = "verbose")]
    quiet: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the full report: summaries, charts and manifest
    Run {
        /// Report configuration file
        #[arg(short, long, conflicts_with = "inputs")]
        config: Option<PathBuf>,

        /// Input file as PROVENANCE=PATH, or PATH to derive the provenance from the file name
        #[arg(short, long = "input", value_name = "PROVENANCE=PATH")]
        inputs: Vec<String>,

        /// Numeric measurement columns (comma-separated)
        #[arg(long, value_delimiter = ',', default_value = "time_ms")]
        numeric: Vec<String>,

        /// Categorical columns (comma-separated, default: every non-numeric column)
        #[arg(long, value_delimiter = ',')]
        categorical: Vec<String>,

        /// Dimensions for the summary table (comma-separated)
        #[arg(long, value_delimiter = ',')]
        group_by: Vec<String>,

        /// Chart kind
        #[arg(long, value_enum)]
        chart: Option<ChartKind>,

        /// Dimension on the x-axis
        #[arg(long)]
        x: Option<String>,

        /// Dimension mapped to colour
        #[arg(long)]
        series: Option<String>,

        /// Dimensions split into separate files (comma-separated)
        #[arg(long, value_delimiter = ',')]
        facet: Vec<String>,

        /// Logarithmic y-axis
        #[arg(long)]
        log_y: bool,

        /// Output directory, overriding the configuration
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Load and aggregate, printing the summary tables
    Summarize {
        /// Report configuration file
        #[arg(short, long)]
        config: PathBuf,
    },

    /// Write an example configuration
    InitConfig {
        #[arg(default_value = "kernbench.toml")]
        path: PathBuf,

        /// Replace an existing file
        #[arg(long)]
        force: bool,
    },
}

fn init_logging(verbose: bool, quiet: bool) {
    let level = if verbose {
        "debug"
    } else if quiet {
        "warn"
    } else {
        "info"
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}

fn parse_input(spec: &str) -> InputSource {
    match spec.split_once('=') {
        Some((provenance, path)) if !provenance.trim().is_empty() => {
            InputSource::new(path.trim()).with_provenance(provenance.trim())
        }
        _ => InputSource::new(spec.trim()),
    }
}

struct AdhocArgs {
    inputs: Vec<String>,
    numeric: Vec<String>,
    categorical: Vec<String>,
    group_by: Vec<String>,
    chart: Option<ChartKind>,
    x: Option<String>,
    series: Option<String>,
    facet: Vec<String>,
    log_y: bool,
}

fn adhoc_config(args: AdhocArgs) -> Result<ReportConfig> {
    if args.inputs.is_empty() {
        bail!("either --config or at least one --input is required");
    }
    let mut config = ReportConfig {
        schema: SchemaConfig {
            numeric: args.numeric.clone(),
            categorical: args.categorical,
            ..SchemaConfig::default()
        },
        inputs: args.inputs.iter().map(|s| parse_input(s)).collect(),
        ..ReportConfig::default()
    };

    if !args.group_by.is_empty() {
        config.summaries.push(SummarySpec {
            name: "summary".to_string(),
            group_by: args.group_by,
            measurements: args.numeric.clone(),
        });
    }

    if let Some(kind) = args.chart {
        let x = args.x.context("--x is required with --chart")?;
        let measurement = args
            .numeric
            .first()
            .cloned()
            .context("--numeric must name at least one column")?;
        let mut chart = ChartSpec::new(measurement.clone(), kind, measurement, x).with_facets(args.facet);
        chart.series = args.series;
        if args.log_y {
            chart = chart.with_y_scale(YScale::Log);
        }
        config.charts.push(chart);
    } else if args.x.is_some() || args.series.is_some() {
        warn!("--x and --series have no effect without --chart");
    }

    Ok(config)
}

fn run(config: ReportConfig) -> Result<()> {
    let pipeline = ReportPipeline::new(config).context("Invalid report configuration")?;
    let summary = pipeline.run().context("Report failed")?;

    for table in &summary.summaries {
        println!("summary  {}", table.path.display());
    }
    for artifact in &summary.artifacts {
        println!("chart    {}", artifact.path.display());
    }
    for skipped in &summary.skipped {
        println!("skipped  {} {}: {}", skipped.kind, skipped.name, skipped.reason);
    }
    println!("manifest {}", summary.manifest.display());
    Ok(())
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose, cli.quiet);

    match cli.command {
        Commands::Run {
            config,
            inputs,
            numeric,
            categorical,
            group_by,
            chart,
            x,
            series,
            facet,
            log_y,
            output,
        } => {
            let mut config = match config {
                Some(path) => ReportConfig::from_file(&path)
                    .with_context(|| format!("Failed to load configuration {}", path.display()))?,
                None => adhoc_config(AdhocArgs {
                    inputs,
                    numeric,
                    categorical,
                    group_by,
                    chart,
                    x,
                    series,
                    facet,
                    log_y,
                })?,
            };
            if let Some(output) = output {
                config.output_dir = output;
            }
            debug!("Writing report to {}", config.output_dir.display());
            run(config)
        }
        Commands::Summarize { config } => {
            let config = ReportConfig::from_file(&config)
                .with_context(|| format!("Failed to load configuration {}", config.display()))?;
            let pipeline = ReportPipeline::new(config).context("Invalid report configuration")?;
            let data = pipeline.prepare().context("Failed to load benchmark data")?;
            for spec in pipeline.summary_specs() {
                let rows = kernbench::analysis::report::summary_rows(&data, &spec);
                println!("{}", format_summary_table(&spec, &rows));
            }
            Ok(())
        }
        Commands::InitConfig { path, force } => {
            if path.exists() && !force {
                bail!("{} already exists (use --force to replace it)", path.display());
            }
            ReportConfig::example()
                .to_file(&path)
                .with_context(|| format!("Failed to write {}", path.display()))?;
            info!("Example configuration written to {}", path.display());
            println!("{}", path.display());
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use kernbench::common::PROVENANCE;

    #[test]
    fn test_cli_parses() {
        use clap::CommandFactory;
        Cli::command().debug_assert();
    }

    #[test]
    fn test_parse_input() {
        let input = parse_input("AMD=results/amd.csv");
        assert_eq!(input.provenance.as_deref(), Some("AMD"));
        assert_eq!(input.path, PathBuf::from("results/amd.csv"));

        let input = parse_input("results_paul.csv");
        assert!(input.provenance.is_none());
    }

    #[test]
    fn test_adhoc_config() {
        let cli = Cli::parse_from([
            "kernbench", "run", "--input", "AMD=amd.csv", "--input", "NVIDIA=nv.csv",
            "--categorical", "precision,N", "--group-by", "provenance,precision,N",
            "--chart", "grouped_boxplot", "--x", "N", "--series", "precision", "--log-y",
        ]);
        let Commands::Run { inputs, numeric, categorical, group_by, chart, x, series, facet, log_y, .. } =
            cli.command
        else {
            panic!("expected run");
        };
        let config = adhoc_config(AdhocArgs {
            inputs, numeric, categorical, group_by, chart, x, series, facet, log_y,
        })
        .unwrap();

        config.validate().unwrap();
        assert_eq!(config.inputs.len(), 2);
        assert_eq!(config.schema.categorical, vec!["precision", "N"]);
        assert_eq!(config.summaries[0].group_by[0], PROVENANCE);
        assert_eq!(config.charts[0].kind, ChartKind::GroupedBoxplot);
        assert_eq!(config.charts[0].y_scale, YScale::Log);
        assert_eq!(config.charts[0].series.as_deref(), Some("precision"));
    }

    #[test]
    fn test_chart_kind_values() {
        for (arg, kind) in [
            ("grouped_boxplot", ChartKind::GroupedBoxplot),
            ("boxplot", ChartKind::GroupedBoxplot),
            ("grouped-bar", ChartKind::GroupedBar),
            ("bar", ChartKind::GroupedBar),
            ("line", ChartKind::LineScatter),
        ] {
            let cli = Cli::parse_from(["kernbench", "run", "--input", "a.csv", "--chart", arg]);
            let Commands::Run { chart, .. } = cli.command else {
                panic!("expected run");
            };
            assert_eq!(chart, Some(kind));
        }
        assert!(Cli::try_parse_from(["kernbench", "run", "--chart", "pie"]).is_err());
    }

    #[test]
    fn test_chart_requires_x() {
        let result = adhoc_config(AdhocArgs {
            inputs: vec!["a.csv".to_string()],
            numeric: vec!["time_ms".to_string()],
            categorical: Vec::new(),
            group_by: Vec::new(),
            chart: Some(ChartKind::GroupedBar),
            x: None,
            series: None,
            facet: Vec::new(),
            log_y: false,
        });
        assert!(result.is_err());
    }
}
