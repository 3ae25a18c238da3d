use thiserror::Error;

use crate::roles::ColumnRole;

/// User-facing configuration problems in the summary pipeline. These halt the
/// affected command but never panic.
#[derive(Error, Debug, PartialEq, Eq)]
pub enum PipelineError {
    #[error("No suitable {role} column found: {hint}")]
    NoCandidates { role: ColumnRole, hint: &'static str },

    #[error("Column '{column}' is not a {role} candidate (candidates: {candidates})")]
    NotACandidate {
        role: ColumnRole,
        column: String,
        candidates: String,
    },

    #[error("Column '{0}' not found in dataset")]
    UnknownColumn(String),
}
