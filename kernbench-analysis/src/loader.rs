//! Record loading from delimited benchmark result files
//!
//! Each input file holds one row per trial. Rows are normalised into
//! [`BenchmarkRecord`]s tagged with the provenance of their file. Missing
//! files and malformed rows are collected as diagnostics rather than aborting
//! the load, so a partial report can still be produced.

use indexmap::IndexMap;
use kernbench_common::{BenchmarkRecord, KernbenchError, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// One declared input file
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InputSource {
    pub path: PathBuf,
    /// Device/platform label. Derived from the file name when absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub provenance: Option<String>,
    /// Static dimensions applied to every record of this file
    #[serde(default, skip_serializing_if = "IndexMap::is_empty")]
    pub tags: IndexMap<String, String>,
}

impl InputSource {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            provenance: None,
            tags: IndexMap::new(),
        }
    }

    pub fn with_provenance(mut self, provenance: impl Into<String>) -> Self {
        self.provenance = Some(provenance.into());
        self
    }

    pub fn with_tag(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.tags.insert(name.into(), value.into());
        self
    }

    /// Provenance label for this source
    pub fn provenance_label(&self, prefix: Option<&str>) -> String {
        match &self.provenance {
            Some(p) => p.trim().to_string(),
            None => derive_provenance(&self.path, prefix),
        }
    }
}

/// Keep only rows whose `column` equals `equals`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RowFilter {
    pub column: String,
    pub equals: String,
}

/// Describes how input columns map onto record fields
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SchemaConfig {
    /// Categorical columns. Empty means every non-numeric column.
    pub categorical: Vec<String>,
    /// Numeric measurement columns
    pub numeric: Vec<String>,
    /// Values used when a categorical column is absent or empty
    pub defaults: IndexMap<String, String>,
    /// Categorical columns whose values are lowercased
    pub lowercase: Vec<String>,
    pub filters: Vec<RowFilter>,
    pub delimiter: char,
    /// Prefix stripped from file stems when deriving provenance
    #[serde(skip_serializing_if = "Option::is_none")]
    pub provenance_prefix: Option<String>,
}

impl Default for SchemaConfig {
    fn default() -> Self {
        Self {
            categorical: Vec::new(),
            numeric: vec!["time_ms".to_string()],
            defaults: IndexMap::new(),
            lowercase: Vec::new(),
            filters: Vec::new(),
            delimiter: ',',
            provenance_prefix: None,
        }
    }
}

impl SchemaConfig {
    pub fn delimiter_byte(&self) -> Result<u8> {
        if self.delimiter.is_ascii() {
            Ok(self.delimiter as u8)
        } else {
            Err(KernbenchError::Config(format!(
                "delimiter '{}' is not a single-byte character",
                self.delimiter
            )))
        }
    }
}

/// Records plus the recoverable problems met while loading them
#[derive(Debug, Default)]
pub struct LoadOutcome {
    pub records: Vec<BenchmarkRecord>,
    pub diagnostics: Vec<KernbenchError>,
    pub files_loaded: usize,
}

impl LoadOutcome {
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn missing_inputs(&self) -> usize {
        self.diagnostics
            .iter()
            .filter(|d| matches!(d, KernbenchError::MissingInput { .. }))
            .count()
    }

    pub fn malformed_rows(&self) -> usize {
        self.diagnostics
            .iter()
            .filter(|d| matches!(d, KernbenchError::MalformedRow { .. }))
            .count()
    }
}

/// Load every input in declaration order.
///
/// Never fails as a whole: per-file and per-row problems end up in
/// [`LoadOutcome::diagnostics`] and an empty record set is left for the caller
/// to judge.
pub fn load_records(inputs: &[InputSource], schema: &SchemaConfig) -> LoadOutcome {
    let mut outcome = LoadOutcome::default();

    for source in inputs {
        if !source.path.exists() {
            warn!("Missing input file: {}", source.path.display());
            outcome.diagnostics.push(KernbenchError::MissingInput {
                path: source.path.clone(),
            });
            continue;
        }

        let before = outcome.records.len();
        match load_file(source, schema, &mut outcome) {
            Ok(()) => {
                outcome.files_loaded += 1;
                info!(
                    "Loaded {} records from {}",
                    outcome.records.len() - before,
                    source.path.display()
                );
            }
            Err(e) => {
                warn!("Skipping {}: {}", source.path.display(), e);
                outcome.diagnostics.push(e);
            }
        }
    }

    outcome
}

fn load_file(source: &InputSource, schema: &SchemaConfig, outcome: &mut LoadOutcome) -> Result<()> {
    let provenance = source.provenance_label(schema.provenance_prefix.as_deref());
    let mut reader = csv::ReaderBuilder::new()
        .delimiter(schema.delimiter_byte()?)
        .flexible(true)
        .from_path(&source.path)?;

    let headers: Vec<String> = reader.headers()?.iter().map(|h| h.trim().to_string()).collect();
    let column = |name: &str| headers.iter().position(|h| h == name);

    let numeric: Vec<(&str, usize)> = schema
        .numeric
        .iter()
        .filter_map(|n| column(n.as_str()).map(|i| (n.as_str(), i)))
        .collect();
    if numeric.is_empty() {
        return Err(KernbenchError::MissingColumns {
            path: source.path.clone(),
            expected: schema.numeric.clone(),
        });
    }
    for missing in schema.numeric.iter().filter(|n| column(n.as_str()).is_none()) {
        debug!("{} has no '{}' column", source.path.display(), missing);
    }

    let categorical: Vec<(&str, Option<usize>)> = if schema.categorical.is_empty() {
        headers
            .iter()
            .enumerate()
            .filter(|(_, h)| !schema.numeric.contains(*h))
            .map(|(i, h)| (h.as_str(), Some(i)))
            .collect()
    } else {
        schema
            .categorical
            .iter()
            .map(|c| (c.as_str(), column(c.as_str())))
            .collect()
    };

    'rows: for (row_index, row) in reader.records().enumerate() {
        let row = match row {
            Ok(row) => row,
            Err(e) => {
                warn!("Unreadable row in {}: {}", source.path.display(), e);
                outcome.diagnostics.push(e.into());
                continue;
            }
        };
        let line = row
            .position()
            .map(|p| p.line())
            .unwrap_or(row_index as u64 + 2);
        let cell = |i: usize| row.get(i).map(str::trim).unwrap_or("");

        let mut measurements = IndexMap::new();
        for &(name, i) in &numeric {
            let raw = cell(i);
            match raw.parse::<f64>() {
                Ok(value) if value.is_finite() => {
                    measurements.insert(name.to_string(), value);
                }
                _ => {
                    let err = KernbenchError::MalformedRow {
                        path: source.path.clone(),
                        line,
                        column: name.to_string(),
                        value: raw.to_string(),
                    };
                    warn!("{}", err);
                    outcome.diagnostics.push(err);
                    continue 'rows;
                }
            }
        }

        let mut dimensions = IndexMap::new();
        for &(name, i) in &categorical {
            let value = i.map(cell).filter(|v| !v.is_empty());
            if let Some(value) = value {
                dimensions.insert(name.to_string(), value.to_string());
            }
        }
        for (name, value) in &schema.defaults {
            let declared = schema.categorical.is_empty() || schema.categorical.contains(name);
            if declared && !dimensions.contains_key(name) {
                dimensions.insert(name.clone(), value.trim().to_string());
            }
        }
        for name in &schema.lowercase {
            if let Some(value) = dimensions.get_mut(name) {
                *value = value.to_lowercase();
            }
        }
        for (name, value) in &source.tags {
            dimensions.insert(name.clone(), value.trim().to_string());
        }

        let keep = schema.filters.iter().all(|f| {
            let value = dimensions
                .get(&f.column)
                .map(String::as_str)
                .or_else(|| column(f.column.as_str()).map(cell).filter(|v| !v.is_empty()))
                .or_else(|| schema.defaults.get(&f.column).map(String::as_str));
            value == Some(f.equals.as_str())
        });
        if !keep {
            continue;
        }

        match BenchmarkRecord::new(provenance.clone(), dimensions, measurements) {
            Ok(record) => outcome.records.push(record),
            Err(e) => {
                warn!("Dropping row {} of {}: {}", line, source.path.display(), e);
                outcome.diagnostics.push(e);
            }
        }
    }

    Ok(())
}

/// Provenance from a file name: the stem, minus an optional prefix
/// (`results_paul.csv` with prefix `results_` gives `paul`).
pub fn derive_provenance(path: &Path, prefix: Option<&str>) -> String {
    let stem = path
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();
    match prefix {
        Some(prefix) => stem
            .strip_prefix(prefix)
            .filter(|s| !s.is_empty())
            .unwrap_or(&stem)
            .to_string(),
        None => stem,
    }
}
