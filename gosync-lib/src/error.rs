use thiserror::Error;

use crate::domains::Tag;

/// Failures of the analyzer. Each of them indicates a bug in a caller or in
/// an upstream component, with the exception of
/// [AnalysisError::PointerAnalysisInconsistency] which is logged and
/// recovered from by dropping the offending points-to label.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AnalysisError {
    #[error("Write through a nil pointer")]
    NilWrite,
    #[error("Cannot combine abstract values tagged {left} and {right}")]
    TagMismatch { left: Tag, right: Tag },
    #[error("Operands belong to different lattices: {0}")]
    LatticeMismatch(String),
    #[error("Unsupported operation: {0}")]
    UnsupportedOperation(String),
    #[error("Top location invariant violated: {0}")]
    InternalConsistency(String),
    #[error("Unknown builtin: {0}")]
    BuiltinUnknown(String),
    #[error("Points-to label {label} has type {label_type}, incompatible with {value} of type {value_type}")]
    PointerAnalysisInconsistency {
        label: String,
        label_type: String,
        value: String,
        value_type: String,
    },
    #[error("Integer constant {0} does not fit in 64 bits")]
    UnrepresentableConstant(String),
}

pub type Result<T> = core::result::Result<T, AnalysisError>;
