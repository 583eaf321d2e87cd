//! Analytical warehouse sink: stage-then-bulk-load.

pub mod dead_letter;
pub mod warehouse;

pub use dead_letter::DeadLetterStore;
pub use warehouse::HttpWarehouseClient;

use async_trait::async_trait;
use log::{info, warn};
use std::error::Error;
use std::fmt;
use uuid::Uuid;

use crate::productstream::model::{to_jsonl, ProductRecord};
use crate::productstream::pipeline::RetryPolicy;

#[derive(Debug)]
pub enum SinkError {
    /// Uploading the staged file failed
    Stage(String),
    /// The bulk-load statement failed; the whole batch is rejected
    /// (abort-statement semantics, no partial-batch success)
    Load(String),
}

impl fmt::Display for SinkError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SinkError::Stage(msg) => write!(f, "stage upload failed: {}", msg),
            SinkError::Load(msg) => write!(f, "bulk load failed: {}", msg),
        }
    }
}

impl Error for SinkError {}

/// The warehouse operations the loader consumes: upload a file to a stage
/// path, execute a SQL statement. Tests substitute an in-memory warehouse.
#[async_trait]
pub trait WarehouseClient: Send + Sync {
    async fn stage_put(&self, stage_path: &str, payload: Vec<u8>) -> Result<(), SinkError>;

    async fn execute(&self, statement: &str) -> Result<(), SinkError>;
}

/// Receipt for a completed batch load.
#[derive(Debug, Clone)]
pub struct LoadReceipt {
    pub stage_path: String,
    pub records: usize,
}

/// Composes the stage-then-load sequence for one batch.
///
/// Each batch is staged under a unique, collision-free name
/// (`product_batch_{uuid}.json`) and loaded with explicit column-name
/// matching and abort-on-error semantics.
pub struct BatchLoader<W> {
    client: W,
    table: String,
    stage: String,
    stage_prefix: String,
    retry: RetryPolicy,
}

impl<W: WarehouseClient> BatchLoader<W> {
    pub fn new(
        client: W,
        table: impl Into<String>,
        stage: impl Into<String>,
        stage_prefix: impl Into<String>,
        retry: RetryPolicy,
    ) -> Self {
        BatchLoader {
            client,
            table: table.into(),
            stage: stage.into(),
            stage_prefix: stage_prefix.into(),
            retry,
        }
    }

    pub async fn load(&self, records: &[ProductRecord]) -> Result<LoadReceipt, SinkError> {
        let payload = to_jsonl(records);
        let file_name = format!("product_batch_{}.json", Uuid::new_v4());
        let stage_path = format!("{}/{}/{}", self.stage, self.stage_prefix, file_name);

        let mut attempt = 0u32;
        loop {
            match self.client.stage_put(&stage_path, payload.clone()).await {
                Ok(()) => break,
                Err(err) if self.retry.allows_retry(attempt) => {
                    warn!("stage upload attempt {} failed: {}", attempt + 1, err);
                    self.retry.pause().await;
                    attempt += 1;
                }
                Err(err) => return Err(err),
            }
        }

        let statement = format!(
            "COPY INTO {} FROM @{} \
             FILE_FORMAT = (TYPE = JSON STRIP_OUTER_ARRAY = FALSE) \
             MATCH_BY_COLUMN_NAME = 'CASE_INSENSITIVE' \
             ON_ERROR = 'ABORT_STATEMENT'",
            self.table, stage_path
        );
        self.client.execute(&statement).await?;

        info!(
            "loaded {} records into {} via {}",
            records.len(),
            self.table,
            stage_path
        );
        Ok(LoadReceipt {
            stage_path,
            records: records.len(),
        })
    }
}
