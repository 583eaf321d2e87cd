//! Pipeline orchestration: the producer and consumer loops plus the
//! primitives they share (watermark store, batch buffer, commit gate,
//! retry policy).

pub mod batch;
pub mod commit_gate;
pub mod consumer_loop;
pub mod error;
pub mod producer_loop;
pub mod retry;
pub mod watermark;

pub use batch::{BatchBuffer, FlushReason};
pub use commit_gate::CommitGate;
pub use consumer_loop::{ConsumerLoop, StepOutcome};
pub use error::PipelineError;
pub use producer_loop::{CycleOutcome, CycleReport, ProducerLoop};
pub use retry::RetryPolicy;
pub use watermark::{sentinel, WatermarkStore};
