//! Dead-letter artifacts for batches the warehouse rejected.
//!
//! A failed bulk load must not silently discard data: the batch is written
//! as line-delimited JSON to a local directory before the in-memory buffer
//! is cleared, so the loss is observable and the file can be replayed
//! manually.

use chrono::Utc;
use log::error;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use uuid::Uuid;

use crate::productstream::model::{to_jsonl, ProductRecord};

pub struct DeadLetterStore {
    dir: PathBuf,
}

impl DeadLetterStore {
    pub fn new(dir: impl AsRef<Path>) -> Self {
        DeadLetterStore {
            dir: dir.as_ref().to_path_buf(),
        }
    }

    /// Persist a failed batch. Returns the artifact path for the log line.
    pub fn write(&self, records: &[ProductRecord]) -> io::Result<PathBuf> {
        fs::create_dir_all(&self.dir)?;
        let name = format!(
            "failed_batch_{}_{}.jsonl",
            Utc::now().format("%Y%m%dT%H%M%S%.3f"),
            Uuid::new_v4()
        );
        let path = self.dir.join(name);
        fs::write(&path, to_jsonl(records))?;
        error!(
            "dead-lettered {} records to {:?} after failed bulk load",
            records.len(),
            path
        );
        Ok(path)
    }
}
