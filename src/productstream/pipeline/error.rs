//! Pipeline error taxonomy.

use std::error::Error;
use std::fmt;

/// Loop-boundary error classification.
///
/// Per-record skippable conditions (a single record failing to serialize or
/// deserialize) never surface here: they are logged and dropped where they
/// occur. A failed sink load does not surface either, it is dead-lettered
/// where it happens and the loop continues. What does surface falls into two
/// classes with distinct recovery semantics.
#[derive(Debug)]
pub enum PipelineError {
    /// Retryable without state mutation: the cycle or iteration is abandoned
    /// and the same work is attempted again later (source unreachable,
    /// producer queue staying full, broker hiccup).
    Transient(String),
    /// Unrecoverable within the process, e.g. broker authentication failure.
    /// Retrying with the same credentials cannot succeed, so the loop exits.
    Fatal(String),
}

impl PipelineError {
    pub fn is_fatal(&self) -> bool {
        matches!(self, PipelineError::Fatal(_))
    }
}

impl fmt::Display for PipelineError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PipelineError::Transient(msg) => write!(f, "transient: {}", msg),
            PipelineError::Fatal(msg) => write!(f, "fatal: {}", msg),
        }
    }
}

impl Error for PipelineError {}
