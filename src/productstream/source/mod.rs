//! Relational source abstraction.

pub mod postgres;

pub use postgres::PostgresExtractor;

use async_trait::async_trait;
use chrono::NaiveDateTime;
use std::error::Error;

use crate::productstream::model::ProductRecord;

/// The source operations the producer loop consumes.
///
/// `fetch_since` must return rows strictly newer than `ts`, ascending by
/// `updated_at`. An empty result is not an error; the caller backs off and
/// retries. A transport failure surfaces as an error and the cycle is
/// abandoned without mutating the watermark, so the same range is re-read
/// next cycle (extraction is idempotent given append/update-only source
/// semantics and a monotonic watermark).
#[async_trait]
pub trait SourceExtractor: Send {
    async fn fetch_since(
        &mut self,
        ts: NaiveDateTime,
    ) -> Result<Vec<ProductRecord>, Box<dyn Error + Send + Sync>>;

    /// Max `updated_at` currently in the table, `None` when empty. Used for
    /// the startup lag log line, not for watermark advancement.
    async fn max_updated_at(
        &mut self,
    ) -> Result<Option<NaiveDateTime>, Box<dyn Error + Send + Sync>>;
}
