use thiserror::Error;

use crate::base::intrinsic::Intrinsic;

/// Server-wide error taxonomy. Recovery is local: a bad ScinthDef never
/// corrupts the registry, a bad command never halts the dispatcher. Only
/// `GpuResource` device loss tears the process down.
#[derive(Debug, Error)]
pub enum Error {
    #[error("parse error: {0}")]
    Parse(String),

    #[error("validation failed: {0}")]
    Validation(String),

    #[error("rate violation at vgen index {0}")]
    RateViolation(usize),

    #[error("intrinsic {intrinsic:?} not supported in this stage, vgen index {index}")]
    UnsupportedIntrinsic { index: usize, intrinsic: Intrinsic },

    #[error("shader compilation failed for {name}: {message}")]
    ShaderCompile { name: String, message: String },

    #[error("gpu resource failure: {0}")]
    GpuResource(String),

    #[error("protocol error: {0}")]
    Protocol(String),
}

pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    /// Index of the first offending VGen, for errors that carry one.
    pub fn vgen_index(&self) -> Option<usize> {
        match self {
            Error::RateViolation(index) => Some(*index),
            Error::UnsupportedIntrinsic { index, .. } => Some(*index),
            _ => None,
        }
    }
}
