//! Consumer loop: poll, decode, batch, bulk-load, commit.

use log::{debug, error, info, warn};
use tokio_util::sync::CancellationToken;

use crate::productstream::config::PolicySettings;
use crate::productstream::kafka::{ConsumeError, MessageStream, RawMessage};
use crate::productstream::model::ProductRecord;
use crate::productstream::pipeline::{BatchBuffer, CommitGate, FlushReason, PipelineError};
use crate::productstream::serialization::AvroCodec;
use crate::productstream::sink::{BatchLoader, DeadLetterStore, WarehouseClient};

/// Pending offset commit for a batch that reached the warehouse.
#[derive(Debug, Clone, Copy)]
struct BatchToken {
    records: usize,
    reason: FlushReason,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepOutcome {
    /// A message was appended to the current batch.
    Polled,
    /// Nothing arrived within the poll timeout.
    Empty,
    /// A batch was loaded and its offsets committed (or commit deferred).
    Flushed { records: usize, reason: FlushReason },
    /// The warehouse rejected the batch; it was written to the dead-letter
    /// directory and its offsets were left uncommitted.
    DeadLettered { records: usize },
}

/// Batch-oriented consumer. Offsets are committed only after the warehouse
/// load succeeds, so a crash anywhere before the commit replays the batch
/// (at-least-once into the warehouse, never data loss).
pub struct ConsumerLoop<M, W> {
    stream: M,
    loader: BatchLoader<W>,
    codec: AvroCodec,
    batch: BatchBuffer,
    gate: CommitGate<BatchToken>,
    dead_letters: DeadLetterStore,
    policy: PolicySettings,
    cancel: CancellationToken,
}

impl<M: MessageStream, W: WarehouseClient> ConsumerLoop<M, W> {
    pub fn new(
        stream: M,
        loader: BatchLoader<W>,
        codec: AvroCodec,
        dead_letters: DeadLetterStore,
        policy: PolicySettings,
        cancel: CancellationToken,
    ) -> Self {
        let batch = BatchBuffer::new(policy.max_batch_size, policy.max_batch_age);
        ConsumerLoop {
            stream,
            loader,
            codec,
            batch,
            gate: CommitGate::new(),
            dead_letters,
            policy,
            cancel,
        }
    }

    pub fn batch_len(&self) -> usize {
        self.batch.len()
    }

    /// One poll-and-maybe-flush step.
    pub async fn step(&mut self) -> Result<StepOutcome, PipelineError> {
        let message = match self.stream.poll(self.policy.poll_timeout).await {
            Ok(message) => message,
            Err(ConsumeError::Authentication(msg)) => {
                return Err(PipelineError::Fatal(msg));
            }
            Err(e) => {
                warn!("poll failed, continuing: {}", e);
                // An erroring broker must not stall the age trigger.
                if let Some(reason) = self.batch.age_expired() {
                    return self.flush(reason).await;
                }
                return Ok(StepOutcome::Empty);
            }
        };

        match message {
            None => {
                // The age trigger has to fire even while the topic is quiet.
                if let Some(reason) = self.batch.age_expired() {
                    return self.flush(reason).await;
                }
                Ok(StepOutcome::Empty)
            }
            Some(raw) => {
                let Some(record) = self.decode(&raw) else {
                    return Ok(StepOutcome::Polled);
                };
                if let Some(reason) = self.batch.push(record) {
                    return self.flush(reason).await;
                }
                if let Some(reason) = self.batch.age_expired() {
                    return self.flush(reason).await;
                }
                Ok(StepOutcome::Polled)
            }
        }
    }

    /// Decode one raw message, discarding malformed keys or payloads. A
    /// discarded message still advances with the next committed batch, which
    /// is deliberate: replaying it would fail identically forever.
    fn decode(&self, raw: &RawMessage) -> Option<ProductRecord> {
        if let Some(key) = &raw.key {
            if std::str::from_utf8(key).is_err() {
                warn!(
                    "discarding message with non-utf8 key at partition {} offset {}",
                    raw.partition, raw.offset
                );
                return None;
            }
        }
        let Some(payload) = raw.payload.as_deref() else {
            debug!(
                "skipping empty payload at partition {} offset {}",
                raw.partition, raw.offset
            );
            return None;
        };
        match self.codec.deserialize(payload) {
            Ok(record) => Some(record),
            Err(e) => {
                warn!(
                    "discarding undecodable message at partition {} offset {}: {}",
                    raw.partition, raw.offset, e
                );
                None
            }
        }
    }

    /// Load the current batch into the warehouse, then commit offsets.
    ///
    /// The buffer is always cleared first. On a failed load the records go to
    /// the dead-letter directory and the offsets stay uncommitted, so a
    /// restart replays them.
    async fn flush(&mut self, reason: FlushReason) -> Result<StepOutcome, PipelineError> {
        let records = self.batch.drain();
        if records.is_empty() {
            return Ok(StepOutcome::Empty);
        }
        info!("flushing batch of {} records (trigger: {})", records.len(), reason);

        match self.loader.load(&records).await {
            Ok(receipt) => {
                self.gate.stage(BatchToken {
                    records: records.len(),
                    reason,
                });
                let stream = &mut self.stream;
                match self.gate.confirm(|_| stream.commit_sync()) {
                    Ok(Some(token)) => {
                        info!(
                            "committed offsets for {} records staged at {}",
                            token.records, receipt.stage_path
                        );
                    }
                    Ok(None) => {}
                    Err(ConsumeError::Authentication(msg)) => {
                        return Err(PipelineError::Fatal(msg));
                    }
                    Err(e) => {
                        // The data is in the warehouse; redelivery after a
                        // restart produces duplicates, which downstream merge
                        // semantics tolerate. Drop the token and move on.
                        self.gate.abandon();
                        warn!("offset commit failed after successful load: {}", e);
                    }
                }
                Ok(StepOutcome::Flushed {
                    records: records.len(),
                    reason,
                })
            }
            Err(e) => {
                error!("warehouse load failed, batch goes to dead letters: {}", e);
                match self.dead_letters.write(&records) {
                    Ok(path) => debug!("dead-letter batch written to {}", path.display()),
                    Err(io_err) => error!("failed to persist dead-letter batch: {}", io_err),
                }
                Ok(StepOutcome::DeadLettered {
                    records: records.len(),
                })
            }
        }
    }

    /// Run steps until cancelled, then flush and commit whatever is buffered.
    pub async fn run(&mut self) -> Result<(), PipelineError> {
        info!(
            "consumer loop started (max batch size {}, max age {:?})",
            self.policy.max_batch_size, self.policy.max_batch_age
        );
        while !self.cancel.is_cancelled() {
            match self.step().await {
                Ok(_) => {}
                Err(e) if e.is_fatal() => {
                    error!("consumer stopping: {}", e);
                    return Err(e);
                }
                Err(e) => warn!("step failed, continuing: {}", e),
            }
        }
        if !self.batch.is_empty() {
            info!("draining final batch before shutdown");
            if let Err(e) = self.flush(FlushReason::Shutdown).await {
                error!("final flush failed: {}", e);
                return Err(e);
            }
        }
        info!("consumer loop stopped");
        Ok(())
    }
}
