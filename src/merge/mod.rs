//! Recombines per-slice partial results into whole series.

mod blind;
mod query_aware;

pub use blind::ResultsMerger;
pub use query_aware::{QueryAwareResultsMerger, NO_TAGS};

use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum MergeError {
    #[error("metric mismatch across slices: expected {expected}, found {found}")]
    MetricMismatch { expected: String, found: String },

    #[error("no counterpart for series {metric} with tags {tags}")]
    MissingCounterpart { metric: String, tags: String },

    #[error("cannot merge result sets of {left} and {right} series")]
    ShapeMismatch { left: usize, right: usize },
}
