//! kernbench - benchmark result aggregation and comparison reports
//!
//! Re-exports the record model and the analysis pipeline used by the
//! `kernbench` binary.

pub use kernbench_analysis as analysis;
pub use kernbench_common as common;

/// Re-export common types and utilities
pub mod prelude {
    pub use crate::analysis::*;
    pub use crate::common::{ComparisonKind, DerivedRatio, GroupKey, PROVENANCE};
}
