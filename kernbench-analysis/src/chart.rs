//! Chart rendering for aggregated benchmark data
//!
//! A [`ChartSpec`] maps record dimensions onto visual channels: the x-axis
//! category, the series (colour), an optional style (marker/opacity) and a list
//! of facet dimensions that split the data into separate output files. Each
//! facet is aggregated on its own and drawn with `plotters` into an SVG file
//! whose name is derived from the chart name and the facet values.

use crate::aggregate::{aggregate, category_order, AggregationSpec};
use crate::stats::{format_value, whiskers, Summary};
use indexmap::IndexMap;
use kernbench_common::{BenchmarkRecord, KernbenchError, Result};
use plotters::prelude::*;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::error::Error;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// Seed for the jitter applied to raw points. Fixed so output is reproducible.
const JITTER_SEED: u64 = 42;

const CAPTION_FONT_SIZE: u32 = 28;
const LABEL_FONT_SIZE: u32 = 16;
const X_LABEL_AREA_SIZE: u32 = 50;
const Y_LABEL_AREA_SIZE: u32 = 80;

/// Share of one x category occupied by its boxes or bars
const GROUP_WIDTH: f64 = 0.8;

const COLORS: &[RGBColor] = &[
    RGBColor(52, 152, 219),
    RGBColor(231, 76, 60),
    RGBColor(46, 204, 113),
    RGBColor(155, 89, 182),
    RGBColor(241, 196, 15),
    RGBColor(230, 126, 34),
    RGBColor(26, 188, 156),
    RGBColor(127, 140, 141),
];
const MEAN_COLOR: RGBColor = RGBColor(39, 174, 96);
const REFERENCE_COLOR: RGBColor = RGBColor(192, 57, 43);

fn series_color(index: usize) -> RGBColor {
    COLORS[index % COLORS.len()]
}

fn style_alpha(index: usize) -> f64 {
    0.7 - 0.2 * (index % 3) as f64
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "snake_case")]
pub enum ChartKind {
    #[value(name = "grouped_boxplot", alias = "grouped-boxplot", alias = "boxplot")]
    GroupedBoxplot,
    #[value(name = "grouped_bar", alias = "grouped-bar", alias = "bar")]
    GroupedBar,
    #[value(name = "line_scatter", alias = "line-scatter", alias = "line")]
    LineScatter,
}

impl std::fmt::Display for ChartKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ChartKind::GroupedBoxplot => write!(f, "grouped_boxplot"),
            ChartKind::GroupedBar => write!(f, "grouped_bar"),
            ChartKind::LineScatter => write!(f, "line_scatter"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum YScale {
    #[default]
    Linear,
    Log,
}

impl YScale {
    /// Map a value onto the drawn axis. Non-positive values have no place on a
    /// log axis.
    pub fn project(self, value: f64) -> Option<f64> {
        match self {
            YScale::Linear => value.is_finite().then_some(value),
            YScale::Log => (value > 0.0 && value.is_finite()).then(|| value.log10()),
        }
    }

    fn tick(self, axis_value: f64) -> String {
        match self {
            YScale::Linear => format_value(axis_value),
            YScale::Log => format_value(10f64.powf(axis_value)),
        }
    }
}

/// Horizontal line such as a hardware peak, optionally limited to some facets
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReferenceLine {
    pub label: String,
    pub value: f64,
    /// Facet values that must all match for the line to be drawn
    #[serde(default, skip_serializing_if = "IndexMap::is_empty")]
    pub when: IndexMap<String, String>,
}

impl ReferenceLine {
    pub fn applies_to(&self, facet: &IndexMap<String, String>) -> bool {
        self.when
            .iter()
            .all(|(dim, value)| facet.get(dim).is_some_and(|v| v == value))
    }
}

fn default_true() -> bool {
    true
}

/// One configured chart
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChartSpec {
    /// Base of the output file names
    pub name: String,
    pub kind: ChartKind,
    pub measurement: String,
    /// Dimension placed along the x-axis
    pub x: String,
    /// Dimension mapped to colour
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub series: Option<String>,
    /// Dimension mapped to marker shape and opacity
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub style: Option<String>,
    /// Dimensions split into separate files
    #[serde(default)]
    pub facet: Vec<String>,
    #[serde(default)]
    pub y_scale: YScale,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub y_label: Option<String>,
    /// Overlay jittered raw values
    #[serde(default)]
    pub show_points: bool,
    /// Standard deviation whiskers on bar charts
    #[serde(default = "default_true")]
    pub error_bars: bool,
    #[serde(default)]
    pub reference_lines: Vec<ReferenceLine>,
    /// Permit replacing a file already written by this report
    #[serde(default)]
    pub allow_overwrite: bool,
}

impl ChartSpec {
    pub fn new(
        name: impl Into<String>,
        kind: ChartKind,
        measurement: impl Into<String>,
        x: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            kind,
            measurement: measurement.into(),
            x: x.into(),
            series: None,
            style: None,
            facet: Vec::new(),
            y_scale: YScale::Linear,
            title: None,
            y_label: None,
            show_points: false,
            error_bars: true,
            reference_lines: Vec::new(),
            allow_overwrite: false,
        }
    }

    pub fn with_series(mut self, dimension: impl Into<String>) -> Self {
        self.series = Some(dimension.into());
        self
    }

    pub fn with_style(mut self, dimension: impl Into<String>) -> Self {
        self.style = Some(dimension.into());
        self
    }

    pub fn with_facets<I, S>(mut self, dimensions: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.facet = dimensions.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_y_scale(mut self, scale: YScale) -> Self {
        self.y_scale = scale;
        self
    }

    pub fn channels(&self) -> ChannelMapping {
        ChannelMapping {
            x: self.x.clone(),
            series: self.series.clone(),
            style: self.style.clone(),
            facet: self.facet.clone(),
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.name.trim().is_empty() {
            return Err(KernbenchError::Config("chart name must not be empty".to_string()));
        }
        let mut seen = HashSet::new();
        let channels = std::iter::once(&self.x)
            .chain(self.series.iter())
            .chain(self.style.iter())
            .chain(self.facet.iter());
        for dimension in channels {
            if !seen.insert(dimension.as_str()) {
                return Err(KernbenchError::Config(format!(
                    "chart '{}' maps dimension '{}' to more than one channel",
                    self.name, dimension
                )));
            }
        }
        Ok(())
    }
}

/// Which dimension drives which visual channel
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChannelMapping {
    pub x: String,
    pub series: Option<String>,
    pub style: Option<String>,
    pub facet: Vec<String>,
}

/// One written chart file
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReportArtifact {
    pub path: PathBuf,
    pub chart: String,
    pub kind: ChartKind,
    pub measurement: String,
    pub facet: IndexMap<String, String>,
    pub channels: ChannelMapping,
    pub y_scale: YScale,
    /// Number of groups drawn
    pub groups: usize,
}

/// Tracks the files written during one report so none is silently replaced
#[derive(Debug, Default)]
pub struct ArtifactRegistry {
    written: HashSet<PathBuf>,
}

impl ArtifactRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn claim(&mut self, path: &Path, allow_overwrite: bool) -> Result<()> {
        if self.written.insert(path.to_path_buf()) || allow_overwrite {
            Ok(())
        } else {
            Err(KernbenchError::DuplicateArtifact {
                path: path.to_path_buf(),
            })
        }
    }

    /// Claim every path or none of them
    pub fn claim_all(&mut self, paths: &[PathBuf], allow_overwrite: bool) -> Result<()> {
        if !allow_overwrite {
            if let Some(taken) = paths.iter().find(|p| self.written.contains(*p)) {
                return Err(KernbenchError::DuplicateArtifact {
                    path: taken.clone(),
                });
            }
        }
        self.written.extend(paths.iter().cloned());
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.written.len()
    }

    pub fn is_empty(&self) -> bool {
        self.written.is_empty()
    }
}

pub(crate) fn sanitize(part: &str) -> String {
    part.chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | '_') {
                c
            } else {
                '_'
            }
        })
        .collect()
}

/// `<chart>[_<facet value>...].svg`
pub fn artifact_file_name(chart: &str, facet_values: &[String]) -> String {
    let mut parts = vec![sanitize(chart)];
    parts.extend(facet_values.iter().map(|v| sanitize(v)));
    format!("{}.svg", parts.join("_"))
}

/// File names for the facets of one chart, in order. Facet values that
/// sanitize to the same name get a numeric suffix (`_2`, `_3`, ...).
pub fn facet_file_names(chart: &str, facets: &[&[String]]) -> Vec<String> {
    let mut used = HashSet::new();
    facets
        .iter()
        .map(|values| {
            let base = artifact_file_name(chart, values);
            let mut name = base.clone();
            let stem = base.trim_end_matches(".svg");
            let mut n = 1;
            while !used.insert(name.clone()) {
                n += 1;
                name = format!("{}_{}.svg", stem, n);
            }
            name
        })
        .collect()
}

/// One box, bar or line point
#[derive(Debug)]
struct PlotGroup {
    x: usize,
    series: usize,
    style: usize,
    summary: Summary,
    /// Values in ascending order, restricted to positive values on a log axis
    sorted: Vec<f64>,
}

#[derive(Debug)]
struct FacetPlot<'a> {
    title: String,
    x_desc: String,
    y_desc: String,
    x_labels: Vec<String>,
    series_labels: Vec<String>,
    style_labels: Vec<String>,
    groups: Vec<PlotGroup>,
    references: Vec<&'a ReferenceLine>,
}

impl FacetPlot<'_> {
    fn slots(&self) -> usize {
        self.series_labels.len() * self.style_labels.len()
    }

    fn slot_of(&self, group: &PlotGroup) -> usize {
        group.series * self.style_labels.len() + group.style
    }

    fn legend_label(&self, series: usize, style: usize) -> String {
        [&self.series_labels[series], &self.style_labels[style]]
            .into_iter()
            .filter(|l| !l.is_empty())
            .cloned()
            .collect::<Vec<_>>()
            .join(" / ")
    }
}

/// Renders [`ChartSpec`]s into an output directory
pub struct ChartRenderer<'a> {
    output_dir: &'a Path,
    labels: &'a IndexMap<String, String>,
    size: (u32, u32),
}

impl<'a> ChartRenderer<'a> {
    pub fn new(output_dir: &'a Path, labels: &'a IndexMap<String, String>) -> Self {
        Self {
            output_dir,
            labels,
            size: (1000, 600),
        }
    }

    pub fn with_size(mut self, width: u32, height: u32) -> Self {
        self.size = (width, height);
        self
    }

    fn label(&self, raw: &str) -> String {
        self.labels.get(raw).cloned().unwrap_or_else(|| raw.to_string())
    }

    /// Render every facet of `spec`. Facets without drawable data, or that
    /// fail to draw, are skipped; the chart fails with `NoData` only when no
    /// facet could be drawn. Every file name is claimed before drawing starts.
    pub fn render(
        &self,
        records: &[BenchmarkRecord],
        spec: &ChartSpec,
        registry: &mut ArtifactRegistry,
    ) -> Result<Vec<ReportArtifact>> {
        spec.validate()?;
        if !records.iter().any(|r| r.measurement(&spec.measurement).is_some()) {
            return Err(KernbenchError::UnknownMeasurement(format!(
                "'{}' (chart '{}')",
                spec.measurement, spec.name
            )));
        }
        std::fs::create_dir_all(self.output_dir)?;

        let facets = aggregate(
            records,
            &AggregationSpec::new(spec.facet.clone(), [spec.measurement.clone()]),
        );
        let mut planned = Vec::new();
        for (facet_key, facet_group) in &facets {
            let facet: IndexMap<String, String> = spec
                .facet
                .iter()
                .cloned()
                .zip(facet_key.values().iter().cloned())
                .collect();
            let subset: Vec<BenchmarkRecord> = facet_group
                .record_indices
                .iter()
                .map(|&i| records[i].clone())
                .collect();

            let Some(plot) = self.build_plot(spec, &facet, &subset) else {
                warn!(
                    "Chart '{}' facet {}: no drawable data, skipping",
                    spec.name, facet_key
                );
                continue;
            };
            planned.push((facet_key, facet, plot));
        }

        let keys: Vec<&[String]> = planned.iter().map(|(key, _, _)| key.values()).collect();
        let paths: Vec<PathBuf> = facet_file_names(&spec.name, &keys)
            .into_iter()
            .map(|name| self.output_dir.join(name))
            .collect();
        registry.claim_all(&paths, spec.allow_overwrite)?;

        let mut artifacts = Vec::new();
        for ((facet_key, facet, plot), path) in planned.into_iter().zip(paths) {
            if let Err(e) = draw_chart(&path, self.size, spec, &plot) {
                let e = KernbenchError::Render(format!("{}: {}", path.display(), e));
                warn!("Chart '{}' facet {}: {}, skipping", spec.name, facet_key, e);
                let _ = std::fs::remove_file(&path);
                continue;
            }
            info!("Generated: {}", path.display());

            artifacts.push(ReportArtifact {
                path,
                chart: spec.name.clone(),
                kind: spec.kind,
                measurement: spec.measurement.clone(),
                facet,
                channels: spec.channels(),
                y_scale: spec.y_scale,
                groups: plot.groups.len(),
            });
        }

        if artifacts.is_empty() {
            return Err(KernbenchError::NoData(format!(
                "chart '{}' has no drawable groups",
                spec.name
            )));
        }
        Ok(artifacts)
    }

    fn build_plot<'s>(
        &self,
        spec: &'s ChartSpec,
        facet: &IndexMap<String, String>,
        records: &[BenchmarkRecord],
    ) -> Option<FacetPlot<'s>> {
        let x_values = category_order(records, &spec.x);
        let optional_order = |dimension: &Option<String>| match dimension {
            Some(d) => category_order(records, d),
            None => vec![String::new()],
        };
        let series_values = optional_order(&spec.series);
        let style_values = optional_order(&spec.style);

        let mut group_by = vec![spec.x.clone()];
        group_by.extend(spec.series.iter().cloned());
        group_by.extend(spec.style.iter().cloned());
        let groups = aggregate(
            records,
            &AggregationSpec::new(group_by, [spec.measurement.clone()]).with_raw_values(),
        );

        let position = |values: &[String], key: Option<&str>| match key {
            Some(k) => values.iter().position(|v| v == k),
            None => Some(0),
        };

        let mut plot_groups = Vec::new();
        for group in groups.values() {
            let mut key = group.key.values().iter().map(String::as_str);
            let x = position(x_values.as_slice(), key.next())?;
            let series = position(
                series_values.as_slice(),
                spec.series.as_ref().and_then(|_| key.next()),
            )?;
            let style = position(style_values.as_slice(), spec.style.as_ref().and_then(|_| key.next()))?;

            let Some(mut sorted) = group.stats(&spec.measurement).and_then(|s| s.sorted_values())
            else {
                continue;
            };
            if spec.y_scale == YScale::Log {
                sorted.retain(|v| *v > 0.0);
            }
            let Some(summary) = Summary::from_values(&sorted) else {
                debug!("Group {} has no values drawable on a log axis", group.key);
                continue;
            };
            plot_groups.push(PlotGroup {
                x,
                series,
                style,
                summary,
                sorted,
            });
        }

        if plot_groups.is_empty() {
            return None;
        }

        let base_title = spec.title.clone().unwrap_or_else(|| spec.name.clone());
        let title = if facet.is_empty() {
            base_title
        } else {
            let facet_text: Vec<String> = facet.values().map(|v| self.label(v)).collect();
            format!("{} ({})", base_title, facet_text.join(", "))
        };
        let mut y_desc = spec
            .y_label
            .clone()
            .unwrap_or_else(|| self.label(&spec.measurement));
        if spec.y_scale == YScale::Log {
            y_desc.push_str(" (log scale)");
        }

        Some(FacetPlot {
            title,
            x_desc: self.label(&spec.x),
            y_desc,
            x_labels: x_values.iter().map(|v| self.label(v)).collect(),
            series_labels: series_values.iter().map(|v| self.label(v)).collect(),
            style_labels: style_values.iter().map(|v| self.label(v)).collect(),
            groups: plot_groups,
            references: spec
                .reference_lines
                .iter()
                .filter(|r| r.applies_to(facet))
                .collect(),
        })
    }
}

/// Render one chart at the default canvas size
pub fn render_chart(
    records: &[BenchmarkRecord],
    spec: &ChartSpec,
    labels: &IndexMap<String, String>,
    output_dir: &Path,
    registry: &mut ArtifactRegistry,
) -> Result<Vec<ReportArtifact>> {
    ChartRenderer::new(output_dir, labels).render(records, spec, registry)
}

fn y_bounds(spec: &ChartSpec, plot: &FacetPlot<'_>) -> (f64, f64) {
    let mut values = Vec::new();
    for group in &plot.groups {
        let s = &group.summary;
        match spec.kind {
            ChartKind::GroupedBoxplot => values.extend(group.sorted.iter().copied()),
            ChartKind::GroupedBar => {
                values.push(s.mean);
                if spec.error_bars {
                    values.push(s.mean + s.std_dev);
                    values.push(s.mean - s.std_dev);
                }
            }
            ChartKind::LineScatter => {
                values.push(s.mean);
                if spec.show_points {
                    values.extend(group.sorted.iter().copied());
                }
            }
        }
    }
    values.extend(plot.references.iter().map(|r| r.value));

    let projected: Vec<f64> = values
        .into_iter()
        .filter_map(|v| spec.y_scale.project(v))
        .collect();
    let mut lo = projected.iter().copied().fold(f64::INFINITY, f64::min);
    let mut hi = projected.iter().copied().fold(f64::NEG_INFINITY, f64::max);
    if !lo.is_finite() || !hi.is_finite() {
        return (0.0, 1.0);
    }

    let zero_based = spec.kind == ChartKind::GroupedBar && spec.y_scale == YScale::Linear;
    if zero_based {
        lo = lo.min(0.0);
        hi = hi.max(0.0);
    }
    if hi - lo < f64::EPSILON {
        lo -= 0.5;
        hi += 0.5;
    }

    let pad = (hi - lo) * 0.05;
    let lo = if zero_based && lo == 0.0 { 0.0 } else { lo - pad };
    (lo, hi + pad)
}

fn category_tick(x: f64, labels: &[String]) -> String {
    let index = x.round();
    if index < 0.0 || (x - index).abs() > 0.3 {
        return String::new();
    }
    labels.get(index as usize).cloned().unwrap_or_default()
}

fn slot_center(x: usize, slot: usize, slots: usize) -> f64 {
    let width = GROUP_WIDTH / slots as f64;
    x as f64 + (slot as f64 - (slots as f64 - 1.0) / 2.0) * width
}

fn draw_chart(
    path: &Path,
    size: (u32, u32),
    spec: &ChartSpec,
    plot: &FacetPlot<'_>,
) -> std::result::Result<(), Box<dyn Error>> {
    let scale = spec.y_scale;
    let (y_lo, y_hi) = y_bounds(spec, plot);
    let n_x = plot.x_labels.len();
    let x_min = -0.5;
    let x_max = n_x as f64 - 0.5;

    let root = SVGBackend::new(path, size).into_drawing_area();
    root.fill(&WHITE)?;

    let mut chart = ChartBuilder::on(&root)
        .caption(&plot.title, ("sans-serif", CAPTION_FONT_SIZE))
        .margin(20)
        .x_label_area_size(X_LABEL_AREA_SIZE)
        .y_label_area_size(Y_LABEL_AREA_SIZE)
        .build_cartesian_2d(x_min..x_max, y_lo..y_hi)?;

    let x_labels = &plot.x_labels;
    chart
        .configure_mesh()
        .disable_x_mesh()
        .x_labels(n_x.max(1))
        .x_label_formatter(&|x| category_tick(*x, x_labels))
        .y_label_formatter(&|y| scale.tick(*y))
        .x_desc(plot.x_desc.as_str())
        .y_desc(plot.y_desc.as_str())
        .label_style(("sans-serif", LABEL_FONT_SIZE))
        .draw()?;

    // Clamp projections into the drawn range, used for bar bases and whiskers
    let y = |value: f64| scale.project(value).unwrap_or(y_lo).clamp(y_lo, y_hi);
    let slots = plot.slots();
    let half = GROUP_WIDTH / slots as f64 * 0.4;
    let mut rng = StdRng::seed_from_u64(JITTER_SEED);
    let mut legend: Vec<(usize, usize)> = Vec::new();

    match spec.kind {
        ChartKind::GroupedBoxplot => {
            for group in &plot.groups {
                let cx = slot_center(group.x, plot.slot_of(group), slots);
                let color = series_color(group.series);
                let s = &group.summary;
                let (low, high) = whiskers(&group.sorted, s);

                chart.draw_series(std::iter::once(Rectangle::new(
                    [(cx - half, y(s.q1)), (cx + half, y(s.q3))],
                    color.mix(style_alpha(group.style)).filled(),
                )))?;
                chart.draw_series(std::iter::once(Rectangle::new(
                    [(cx - half, y(s.q1)), (cx + half, y(s.q3))],
                    color.stroke_width(1),
                )))?;
                chart.draw_series([
                    PathElement::new(vec![(cx - half, y(s.median)), (cx + half, y(s.median))], BLACK.stroke_width(2)),
                    PathElement::new(vec![(cx - half, y(s.mean)), (cx + half, y(s.mean))], MEAN_COLOR.stroke_width(1)),
                    PathElement::new(vec![(cx, y(s.q3)), (cx, y(high))], BLACK.stroke_width(1)),
                    PathElement::new(vec![(cx, y(s.q1)), (cx, y(low))], BLACK.stroke_width(1)),
                    PathElement::new(vec![(cx - half / 2.0, y(high)), (cx + half / 2.0, y(high))], BLACK.stroke_width(1)),
                    PathElement::new(vec![(cx - half / 2.0, y(low)), (cx + half / 2.0, y(low))], BLACK.stroke_width(1)),
                ])?;

                let outliers: Vec<Circle<(f64, f64), i32>> = group
                    .sorted
                    .iter()
                    .filter(|v| **v < low || **v > high)
                    .map(|v| Circle::new((cx, y(*v)), 3, color.stroke_width(1)))
                    .collect();
                chart.draw_series(outliers)?;

                if spec.show_points {
                    let points: Vec<Circle<(f64, f64), i32>> = group
                        .sorted
                        .iter()
                        .map(|v| {
                            let dx = rng.gen_range(-1.0f64..1.0) * half * 0.6;
                            Circle::new((cx + dx, y(*v)), 2, color.mix(0.35).filled())
                        })
                        .collect();
                    chart.draw_series(points)?;
                }
                if !legend.contains(&(group.series, group.style)) {
                    legend.push((group.series, group.style));
                }
            }
        }
        ChartKind::GroupedBar => {
            let base = if scale == YScale::Log { y_lo } else { 0.0f64.clamp(y_lo, y_hi) };
            for group in &plot.groups {
                let cx = slot_center(group.x, plot.slot_of(group), slots);
                let color = series_color(group.series);
                let s = &group.summary;

                chart.draw_series(std::iter::once(Rectangle::new(
                    [(cx - half, base), (cx + half, y(s.mean))],
                    color.mix(style_alpha(group.style)).filled(),
                )))?;
                if spec.error_bars && s.std_dev > 0.0 {
                    let (lower, upper) = (y(s.mean - s.std_dev), y(s.mean + s.std_dev));
                    chart.draw_series([
                        PathElement::new(vec![(cx, lower), (cx, upper)], BLACK.stroke_width(1)),
                        PathElement::new(vec![(cx - half / 2.0, upper), (cx + half / 2.0, upper)], BLACK.stroke_width(1)),
                        PathElement::new(vec![(cx - half / 2.0, lower), (cx + half / 2.0, lower)], BLACK.stroke_width(1)),
                    ])?;
                }
                if !legend.contains(&(group.series, group.style)) {
                    legend.push((group.series, group.style));
                }
            }
        }
        ChartKind::LineScatter => {
            for series in 0..plot.series_labels.len() {
                for style in 0..plot.style_labels.len() {
                    let mut line: Vec<&PlotGroup> = plot
                        .groups
                        .iter()
                        .filter(|g| g.series == series && g.style == style)
                        .collect();
                    if line.is_empty() {
                        continue;
                    }
                    line.sort_by_key(|g| g.x);
                    let color = series_color(series);
                    let points: Vec<(f64, f64)> = line
                        .iter()
                        .map(|g| (g.x as f64, y(g.summary.mean)))
                        .collect();

                    let label = plot.legend_label(series, style);
                    let width = 2 + (style % 3) as u32;
                    let anno = chart.draw_series(LineSeries::new(points.clone(), color.stroke_width(width)))?;
                    if !label.is_empty() {
                        anno.label(label).legend(move |(lx, ly)| {
                            PathElement::new(vec![(lx, ly), (lx + 20, ly)], color.stroke_width(width))
                        });
                    }

                    match style % 3 {
                        0 => {
                            chart.draw_series(points.iter().map(|p| Circle::new(*p, 4, color.filled())))?;
                        }
                        1 => {
                            chart.draw_series(
                                points.iter().map(|p| TriangleMarker::new(*p, 5, color.filled())),
                            )?;
                        }
                        _ => {
                            chart.draw_series(points.iter().map(|p| Cross::new(*p, 5, color.stroke_width(2))))?;
                        }
                    }

                    if spec.show_points {
                        for group in &line {
                            let raw: Vec<Circle<(f64, f64), i32>> = group
                                .sorted
                                .iter()
                                .map(|v| {
                                    let dx = rng.gen_range(-1.0f64..1.0) * 0.05;
                                    Circle::new((group.x as f64 + dx, y(*v)), 2, color.mix(0.35).filled())
                                })
                                .collect();
                            chart.draw_series(raw)?;
                        }
                    }
                }
            }
        }
    }

    // Box and bar legends are attached to invisible anchors
    for (series, style) in legend {
        let label = plot.legend_label(series, style);
        if label.is_empty() {
            continue;
        }
        let color = series_color(series).mix(style_alpha(style));
        chart
            .draw_series(std::iter::once(Circle::new((x_min, y_lo), 0, color.filled())))?
            .label(label)
            .legend(move |(lx, ly)| Rectangle::new([(lx, ly - 5), (lx + 20, ly + 5)], color.filled()));
    }

    for reference in &plot.references {
        let Some(ry) = scale.project(reference.value) else {
            continue;
        };
        chart
            .draw_series(std::iter::once(PathElement::new(
                vec![(x_min, ry), (x_max, ry)],
                REFERENCE_COLOR.stroke_width(2),
            )))?
            .label(reference.label.clone())
            .legend(|(lx, ly)| PathElement::new(vec![(lx, ly), (lx + 20, ly)], REFERENCE_COLOR.stroke_width(2)));
    }

    let has_legend = plot.series_labels.iter().chain(&plot.style_labels).any(|l| !l.is_empty())
        || !plot.references.is_empty();
    if has_legend {
        chart
            .configure_series_labels()
            .position(SeriesLabelPosition::UpperRight)
            .background_style(WHITE.mix(0.8))
            .border_style(BLACK)
            .label_font(("sans-serif", LABEL_FONT_SIZE))
            .draw()?;
    }

    root.present()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::tempdir;

    fn record(dims: &[(&str, &str)], time: f64) -> BenchmarkRecord {
        let (provenance, rest) = dims.split_first().unwrap();
        let dimensions = rest
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        let measurements = [("time_ms".to_string(), time)].into_iter().collect();
        BenchmarkRecord::new(provenance.1, dimensions, measurements).unwrap()
    }

    fn sample() -> Vec<BenchmarkRecord> {
        let mut records = Vec::new();
        for (device, scale) in [("AMD", 1.0), ("NVIDIA", 0.5)] {
            for n in ["512", "1024"] {
                for (version, factor) in [("Original", 4.0), ("Optimized", 1.0)] {
                    for run in 0..3 {
                        let t = scale * factor * n.parse::<f64>().unwrap() / 100.0 + run as f64;
                        records.push(record(
                            &[("provenance", device), ("N", n), ("version", version)],
                            t,
                        ));
                    }
                }
            }
        }
        records
    }

    #[test]
    fn test_artifact_file_name() {
        assert_eq!(
            artifact_file_name("gflops", &["AMD".to_string(), "float".to_string()]),
            "gflops_AMD_float.svg"
        );
        assert_eq!(artifact_file_name("speed up", &["a/b".to_string()]), "speed_up_a_b.svg");
        assert_eq!(artifact_file_name("times", &[]), "times.svg");
    }

    #[test]
    fn test_facet_file_names_are_unique() {
        let gpu = ["AMD GPU".to_string()];
        let gpu_underscore = ["AMD_GPU".to_string()];
        let gpu_slash = ["AMD/GPU".to_string()];
        let cpu = ["CPU".to_string()];
        let names = facet_file_names(
            "t",
            &[&gpu[..], &gpu_underscore[..], &cpu[..], &gpu_slash[..]],
        );
        assert_eq!(names, vec!["t_AMD_GPU.svg", "t_AMD_GPU_2.svg", "t_CPU.svg", "t_AMD_GPU_3.svg"]);
    }

    #[test]
    fn test_colliding_facets_all_rendered() {
        let dir = tempdir().unwrap();
        let labels = IndexMap::new();
        let renderer = ChartRenderer::new(dir.path(), &labels);
        let mut registry = ArtifactRegistry::new();
        let records = vec![
            record(&[("provenance", "AMD GPU"), ("N", "512")], 4.0),
            record(&[("provenance", "AMD_GPU"), ("N", "512")], 2.0),
        ];
        let spec = ChartSpec::new("t", ChartKind::GroupedBar, "time_ms", "N").with_facets(["provenance"]);

        let artifacts = renderer.render(&records, &spec, &mut registry).unwrap();

        assert_eq!(artifacts.len(), 2);
        assert_eq!(artifacts[0].facet["provenance"], "AMD GPU");
        assert_eq!(artifacts[1].facet["provenance"], "AMD_GPU");
        assert_ne!(artifacts[0].path, artifacts[1].path);
        let mut on_disk: Vec<String> = fs::read_dir(dir.path())
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
            .collect();
        on_disk.sort();
        assert_eq!(on_disk, vec!["t_AMD_GPU.svg", "t_AMD_GPU_2.svg"]);
        assert_eq!(registry.len(), 2);
    }

    #[test]
    fn test_claim_all_is_atomic() {
        let mut registry = ArtifactRegistry::new();
        registry.claim(Path::new("plots/b.svg"), false).unwrap();
        let paths = vec![PathBuf::from("plots/a.svg"), PathBuf::from("plots/b.svg")];
        assert!(matches!(
            registry.claim_all(&paths, false),
            Err(KernbenchError::DuplicateArtifact { .. })
        ));
        assert_eq!(registry.len(), 1);
        registry.claim_all(&paths, true).unwrap();
        assert_eq!(registry.len(), 2);
    }

    #[test]
    fn test_registry_rejects_duplicates() {
        let mut registry = ArtifactRegistry::new();
        let path = Path::new("plots/a.svg");
        registry.claim(path, false).unwrap();
        assert!(matches!(
            registry.claim(path, false),
            Err(KernbenchError::DuplicateArtifact { .. })
        ));
        registry.claim(path, true).unwrap();
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_reference_line_conditions() {
        let line = ReferenceLine {
            label: "HW peak".to_string(),
            value: 14850.0,
            when: [("provenance".to_string(), "AMD".to_string())].into_iter().collect(),
        };
        let amd: IndexMap<String, String> =
            [("provenance".to_string(), "AMD".to_string())].into_iter().collect();
        let nvidia: IndexMap<String, String> =
            [("provenance".to_string(), "NVIDIA".to_string())].into_iter().collect();
        assert!(line.applies_to(&amd));
        assert!(!line.applies_to(&nvidia));
        assert!(!line.applies_to(&IndexMap::new()));
    }

    #[test]
    fn test_validate_channels() {
        let spec = ChartSpec::new("t", ChartKind::GroupedBar, "time_ms", "N").with_series("N");
        assert!(spec.validate().is_err());
        let spec = ChartSpec::new("t", ChartKind::GroupedBar, "time_ms", "N").with_facets(["N"]);
        assert!(spec.validate().is_err());
        let spec = ChartSpec::new("", ChartKind::GroupedBar, "time_ms", "N");
        assert!(spec.validate().is_err());
    }

    #[test]
    fn test_y_scale_projection() {
        assert_eq!(YScale::Log.project(100.0), Some(2.0));
        assert_eq!(YScale::Log.project(0.0), None);
        assert_eq!(YScale::Linear.project(-3.0), Some(-3.0));
    }

    #[test]
    fn test_render_faceted_boxplots() {
        let dir = tempdir().unwrap();
        let labels = IndexMap::new();
        let renderer = ChartRenderer::new(dir.path(), &labels);
        let mut registry = ArtifactRegistry::new();
        let mut spec = ChartSpec::new("times", ChartKind::GroupedBoxplot, "time_ms", "N")
            .with_series("version")
            .with_facets(["provenance"])
            .with_y_scale(YScale::Log);
        spec.show_points = true;
        spec.reference_lines.push(ReferenceLine {
            label: "limit".to_string(),
            value: 50.0,
            when: IndexMap::new(),
        });

        let artifacts = renderer.render(&sample(), &spec, &mut registry).unwrap();

        assert_eq!(artifacts.len(), 2);
        assert_eq!(artifacts[0].path, dir.path().join("times_AMD.svg"));
        assert_eq!(artifacts[1].path, dir.path().join("times_NVIDIA.svg"));
        assert_eq!(artifacts[0].groups, 4);
        assert_eq!(artifacts[0].facet["provenance"], "AMD");
        let svg = fs::read_to_string(&artifacts[0].path).unwrap();
        assert!(svg.contains("<svg"));
    }

    #[test]
    fn test_render_bar_and_line() {
        let dir = tempdir().unwrap();
        let labels: IndexMap<String, String> =
            [("Optimized".to_string(), "Tuned".to_string())].into_iter().collect();
        let renderer = ChartRenderer::new(dir.path(), &labels).with_size(640, 480);
        let mut registry = ArtifactRegistry::new();

        let bar = ChartSpec::new("bars", ChartKind::GroupedBar, "time_ms", "N")
            .with_series("provenance")
            .with_style("version");
        let line = ChartSpec::new("lines", ChartKind::LineScatter, "time_ms", "N")
            .with_series("version")
            .with_style("provenance");

        let bars = renderer.render(&sample(), &bar, &mut registry).unwrap();
        let lines = renderer.render(&sample(), &line, &mut registry).unwrap();
        assert_eq!(bars.len(), 1);
        assert_eq!(bars[0].groups, 8);
        assert_eq!(lines.len(), 1);
        assert!(lines[0].path.ends_with("lines.svg"));
        assert_eq!(registry.len(), 2);
    }

    #[test]
    fn test_deterministic_names_and_no_silent_overwrite() {
        let dir = tempdir().unwrap();
        let labels = IndexMap::new();
        let renderer = ChartRenderer::new(dir.path(), &labels);
        let spec = ChartSpec::new("times", ChartKind::GroupedBoxplot, "time_ms", "N")
            .with_facets(["provenance"]);

        let first = renderer
            .render(&sample(), &spec, &mut ArtifactRegistry::new())
            .unwrap();
        let second = renderer
            .render(&sample(), &spec, &mut ArtifactRegistry::new())
            .unwrap();
        let names = |a: &[ReportArtifact]| a.iter().map(|a| a.path.clone()).collect::<Vec<_>>();
        assert_eq!(names(&first), names(&second));

        let mut registry = ArtifactRegistry::new();
        renderer.render(&sample(), &spec, &mut registry).unwrap();
        assert!(matches!(
            renderer.render(&sample(), &spec, &mut registry),
            Err(KernbenchError::DuplicateArtifact { .. })
        ));
    }

    #[test]
    fn test_missing_combinations_are_omitted() {
        let dir = tempdir().unwrap();
        let labels = IndexMap::new();
        let records = vec![
            record(&[("provenance", "AMD"), ("N", "512"), ("version", "Original")], 4.0),
            record(&[("provenance", "AMD"), ("N", "1024"), ("version", "Optimized")], 2.0),
        ];
        let spec = ChartSpec::new("sparse", ChartKind::GroupedBar, "time_ms", "N").with_series("version");

        let artifacts =
            render_chart(&records, &spec, &labels, dir.path(), &mut ArtifactRegistry::new()).unwrap();
        assert_eq!(artifacts[0].groups, 2);
    }

    #[test]
    fn test_no_data_errors() {
        let dir = tempdir().unwrap();
        let labels = IndexMap::new();
        let renderer = ChartRenderer::new(dir.path(), &labels);

        let unknown = ChartSpec::new("x", ChartKind::GroupedBar, "gflops", "N");
        assert!(matches!(
            renderer.render(&sample(), &unknown, &mut ArtifactRegistry::new()),
            Err(KernbenchError::UnknownMeasurement(_))
        ));

        let records = vec![record(&[("provenance", "AMD"), ("N", "512")], 0.0)];
        let log = ChartSpec::new("x", ChartKind::GroupedBar, "time_ms", "N").with_y_scale(YScale::Log);
        assert!(matches!(
            renderer.render(&records, &log, &mut ArtifactRegistry::new()),
            Err(KernbenchError::NoData(_))
        ));

        let missing_x = ChartSpec::new("x", ChartKind::GroupedBar, "time_ms", "precision");
        assert!(matches!(
            renderer.render(&records, &missing_x, &mut ArtifactRegistry::new()),
            Err(KernbenchError::NoData(_))
        ));
    }
}
