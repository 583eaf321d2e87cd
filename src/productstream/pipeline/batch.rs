//! Bounded batch accumulator for the consumer loop.

use std::time::{Duration, Instant};

use crate::productstream::model::ProductRecord;

/// Why a flush fired, for the structured log line on every transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlushReason {
    Size,
    Age,
    Shutdown,
}

impl std::fmt::Display for FlushReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FlushReason::Size => write!(f, "size"),
            FlushReason::Age => write!(f, "age"),
            FlushReason::Shutdown => write!(f, "shutdown"),
        }
    }
}

/// In-memory batch bounded by record count and age.
///
/// The buffer never exceeds `max_size` records: the flush fires as soon as
/// the size bound is reached, before another record could be appended. The
/// age clock starts at the last flush (or construction) and is reset by
/// `drain`, whether or not the downstream load succeeded, so a poisoned
/// batch cannot grow without bound or be retried against the same failure.
pub struct BatchBuffer {
    records: Vec<ProductRecord>,
    max_size: usize,
    max_age: Duration,
    last_flush: Instant,
}

impl BatchBuffer {
    pub fn new(max_size: usize, max_age: Duration) -> Self {
        BatchBuffer {
            records: Vec::with_capacity(max_size),
            max_size: max_size.max(1),
            max_age,
            last_flush: Instant::now(),
        }
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Append a record. Returns `Some(FlushReason::Size)` when the append
    /// filled the batch to its size bound.
    pub fn push(&mut self, record: ProductRecord) -> Option<FlushReason> {
        self.records.push(record);
        if self.records.len() >= self.max_size {
            Some(FlushReason::Size)
        } else {
            None
        }
    }

    /// Check the age trigger: a non-empty batch older than `max_age` must
    /// flush even if no new message arrives.
    pub fn age_expired(&self) -> Option<FlushReason> {
        if !self.records.is_empty() && self.last_flush.elapsed() >= self.max_age {
            Some(FlushReason::Age)
        } else {
            None
        }
    }

    /// Take the accumulated records and reset the age clock. Called for
    /// every load attempt, success or failure.
    pub fn drain(&mut self) -> Vec<ProductRecord> {
        self.last_flush = Instant::now();
        std::mem::take(&mut self.records)
    }
}
