//! Producer cycle: extract, publish, drain, advance watermark.

use chrono::NaiveDateTime;
use log::{debug, error, info, warn};
use std::time::Duration;
use tokio_util::sync::CancellationToken;

use crate::productstream::config::PolicySettings;
use crate::productstream::kafka::{DrainReport, MessagePublisher, PublishError};
use crate::productstream::pipeline::{CommitGate, PipelineError, WatermarkStore};
use crate::productstream::serialization::AvroCodec;
use crate::productstream::source::SourceExtractor;

/// What one cycle did, for the structured log line and for tests.
#[derive(Debug, Clone, Copy)]
pub struct CycleReport {
    pub fetched: usize,
    pub skipped: usize,
    pub acked: usize,
    pub unacked: usize,
    /// The watermark value persisted this cycle, if any.
    pub advanced_to: Option<NaiveDateTime>,
}

#[derive(Debug, Clone, Copy)]
pub enum CycleOutcome {
    /// No rows newer than the watermark; caller backs off.
    Idle,
    Published(CycleReport),
}

/// Single-threaded cooperative producer loop.
///
/// A new cycle starts only after the previous cycle's drain completed, so no
/// two extraction cycles are ever in flight and the watermark cannot race.
/// The watermark advances through the commit gate to the max `updated_at`
/// among records the broker acknowledged, never past an unconfirmed record.
pub struct ProducerLoop<S, P> {
    extractor: S,
    publisher: P,
    codec: AvroCodec,
    watermark: WatermarkStore,
    gate: CommitGate<NaiveDateTime>,
    policy: PolicySettings,
    cancel: CancellationToken,
}

impl<S: SourceExtractor, P: MessagePublisher> ProducerLoop<S, P> {
    pub fn new(
        extractor: S,
        publisher: P,
        codec: AvroCodec,
        watermark: WatermarkStore,
        policy: PolicySettings,
        cancel: CancellationToken,
    ) -> Self {
        ProducerLoop {
            extractor,
            publisher,
            codec,
            watermark,
            gate: CommitGate::new(),
            policy,
            cancel,
        }
    }

    pub fn watermark(&self) -> NaiveDateTime {
        self.watermark.current()
    }

    /// Run one extraction-and-publish cycle.
    pub async fn run_cycle(&mut self) -> Result<CycleOutcome, PipelineError> {
        let since = self.watermark.current();
        let rows = self
            .extractor
            .fetch_since(since)
            .await
            .map_err(|e| PipelineError::Transient(format!("source fetch failed: {}", e)))?;

        if rows.is_empty() {
            debug!("no new data since {}", since);
            return Ok(CycleOutcome::Idle);
        }
        info!("found {} new/updated records since {}", rows.len(), since);

        let fetched = rows.len();
        let mut skipped = 0usize;
        for record in &rows {
            let payload = match self.codec.serialize(record) {
                Ok(p) => p,
                Err(e) => {
                    // Skippable: the record is retried next cycle only if its
                    // timestamp still lies past the watermark we end up with.
                    warn!("skipping record '{}', serialization failed: {}", record.id, e);
                    skipped += 1;
                    continue;
                }
            };

            match self.publisher.send(&record.id, record.updated_at, payload).await {
                Ok(()) => {}
                Err(PublishError::Authentication(msg)) => {
                    return Err(PipelineError::Fatal(msg));
                }
                Err(e) => {
                    // Cycle failure: drain whatever is in flight so delivered
                    // records still move the watermark, then give up.
                    warn!("publish failed for record '{}': {}", record.id, e);
                    if let Some(ts) = self.finish_cycle(since).await?.1 {
                        debug!("abandoned cycle still advanced watermark to {}", ts);
                    }
                    return Err(PipelineError::Transient(e.to_string()));
                }
            }
        }

        let (drain, advanced_to) = self.finish_cycle(since).await?;
        let report = CycleReport {
            fetched,
            skipped,
            acked: drain.acked,
            unacked: drain.unacked,
            advanced_to,
        };
        Ok(CycleOutcome::Published(report))
    }

    /// Drain in-flight deliveries and advance the watermark through the
    /// commit gate, but only to the max acked event time and only forward.
    async fn finish_cycle(
        &mut self,
        since: NaiveDateTime,
    ) -> Result<(DrainReport, Option<NaiveDateTime>), PipelineError> {
        let report = self
            .publisher
            .drain(self.policy.flush_timeout)
            .await
            .map_err(|e| match e {
                PublishError::Authentication(msg) => PipelineError::Fatal(msg),
                other => PipelineError::Transient(other.to_string()),
            })?;

        if report.failed > 0 || report.unacked > 0 {
            warn!(
                "cycle drain: acked={} failed={} unacked={}",
                report.acked, report.failed, report.unacked
            );
        }

        let advanced = match report.acked_max {
            Some(max_acked) if max_acked > since => {
                self.gate.stage(max_acked);
                let watermark = &mut self.watermark;
                let advanced = self
                    .gate
                    .confirm(|ts| watermark.save(*ts))
                    .map_err(|e| {
                        PipelineError::Transient(format!("watermark save failed: {}", e))
                    })?;
                if let Some(ts) = advanced {
                    info!("watermark advanced to {}", ts);
                }
                advanced
            }
            _ => {
                self.gate.abandon();
                None
            }
        };
        Ok((report, advanced))
    }

    /// Run cycles until cancelled. Returns only on a fatal error or after a
    /// cooperative shutdown.
    pub async fn run(&mut self) -> Result<(), PipelineError> {
        let watermark = self.watermark.current();
        info!("producer starting with high-watermark {}", watermark);
        match self.extractor.max_updated_at().await {
            Ok(Some(max)) => info!(
                "source max updated_timestamp is {} (lag {}s)",
                max,
                max.signed_duration_since(watermark).num_seconds().max(0)
            ),
            Ok(None) => info!("source table is empty"),
            Err(e) => warn!("could not read source max updated_timestamp: {}", e),
        }
        while !self.cancel.is_cancelled() {
            let delay = match self.run_cycle().await {
                Ok(CycleOutcome::Idle) => self.policy.empty_poll_delay,
                Ok(CycleOutcome::Published(report)) => {
                    info!(
                        "cycle complete: fetched={} skipped={} watermark={:?}",
                        report.fetched, report.skipped, report.advanced_to
                    );
                    self.policy.producer_poll_interval
                }
                Err(e) if e.is_fatal() => {
                    error!("producer stopping: {}", e);
                    return Err(e);
                }
                Err(e) => {
                    warn!("cycle failed, will retry: {}", e);
                    self.policy.producer_poll_interval
                }
            };
            self.sleep(delay).await;
        }
        info!("producer loop stopped");
        Ok(())
    }

    async fn sleep(&self, duration: Duration) {
        tokio::select! {
            _ = tokio::time::sleep(duration) => {}
            _ = self.cancel.cancelled() => {}
        }
    }
}
