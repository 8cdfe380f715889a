use std::path::PathBuf;
use thiserror::Error;

/// Main error type for kernbench
#[derive(Error, Debug)]
pub enum KernbenchError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("TOML parse error: {0}")]
    TomlDe(#[from] toml::de::Error),

    #[error("TOML write error: {0}")]
    TomlSer(#[from] toml::ser::Error),

    #[error("Missing input file: {}", path.display())]
    MissingInput { path: PathBuf },

    #[error("Malformed row in {} line {line}: column '{column}' has non-numeric value '{value}'", path.display())]
    MalformedRow {
        path: PathBuf,
        line: u64,
        column: String,
        value: String,
    },

    #[error("No numeric columns in {}: expected one of {expected:?}", path.display())]
    MissingColumns { path: PathBuf, expected: Vec<String> },

    #[error("No data: {0}")]
    NoData(String),

    #[error("Artifact {} already written in this report", path.display())]
    DuplicateArtifact { path: PathBuf },

    #[error("Unknown dimension: {0}")]
    UnknownDimension(String),

    #[error("Unknown measurement: {0}")]
    UnknownMeasurement(String),

    #[error("Invalid record: {0}")]
    InvalidRecord(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Render error: {0}")]
    Render(String),
}

impl KernbenchError {
    /// Errors that only affect a single file, row or chart
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            KernbenchError::MissingInput { .. }
                | KernbenchError::MalformedRow { .. }
                | KernbenchError::MissingColumns { .. }
                | KernbenchError::DuplicateArtifact { .. }
                | KernbenchError::UnknownDimension(_)
                | KernbenchError::UnknownMeasurement(_)
        )
    }
}

pub type Result<T> = std::result::Result<T, KernbenchError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_messages() {
        let err = KernbenchError::MissingInput {
            path: PathBuf::from("results_amd.csv"),
        };
        assert_eq!(err.to_string(), "Missing input file: results_amd.csv");

        let err = KernbenchError::MalformedRow {
            path: PathBuf::from("a.csv"),
            line: 3,
            column: "time_ms".to_string(),
            value: "abc".to_string(),
        };
        assert!(err.to_string().contains("line 3"));
        assert!(err.to_string().contains("'abc'"));
    }

    #[test]
    fn test_recoverable() {
        assert!(KernbenchError::MissingInput { path: PathBuf::new() }.is_recoverable());
        assert!(!KernbenchError::NoData("empty".into()).is_recoverable());
        assert!(!KernbenchError::Config("bad".into()).is_recoverable());
    }
}
