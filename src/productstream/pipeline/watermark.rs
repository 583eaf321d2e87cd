//! Durable high-watermark register for the producer loop.

use chrono::{NaiveDate, NaiveDateTime};
use log::{debug, warn};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

const WATERMARK_FORMAT: &str = "%Y-%m-%d %H:%M:%S%.6f";
// Accepts values written before fractional seconds were always emitted
const WATERMARK_PARSE_FORMAT: &str = "%Y-%m-%d %H:%M:%S%.f";

/// The cold-start sentinel: process everything.
pub fn sentinel() -> NaiveDateTime {
    NaiveDate::from_ymd_opt(1900, 1, 1)
        .expect("static date")
        .and_hms_opt(0, 0, 0)
        .expect("static time")
}

/// File-backed watermark store.
///
/// Purely a durable register: it never decides when to advance, that is the
/// commit gate's job. Saves are atomic (write to a sibling temp file, then
/// rename) so a crash mid-write can never make a later `load` observe a
/// half-written value.
pub struct WatermarkStore {
    path: PathBuf,
    current: NaiveDateTime,
}

impl WatermarkStore {
    /// Open the store, loading the persisted watermark or falling back to
    /// the 1900-01-01 sentinel when no prior state exists.
    pub fn open(path: impl AsRef<Path>) -> io::Result<Self> {
        let path = path.as_ref().to_path_buf();
        let current = match fs::read_to_string(&path) {
            Ok(content) => {
                let trimmed = content.trim();
                if trimmed.is_empty() {
                    sentinel()
                } else {
                    NaiveDateTime::parse_from_str(trimmed, WATERMARK_PARSE_FORMAT).map_err(
                        |e| {
                            io::Error::new(
                                io::ErrorKind::InvalidData,
                                format!("corrupt watermark '{}': {}", trimmed, e),
                            )
                        },
                    )?
                }
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => sentinel(),
            Err(e) => return Err(e),
        };
        debug!("watermark store opened at {:?}, current={}", path, current);
        Ok(WatermarkStore { path, current })
    }

    pub fn current(&self) -> NaiveDateTime {
        self.current
    }

    /// Persist a new watermark. Values below the current watermark are
    /// ignored: the stored value is monotonically non-decreasing.
    pub fn save(&mut self, ts: NaiveDateTime) -> io::Result<()> {
        if ts < self.current {
            warn!(
                "refusing to move watermark backwards ({} < {})",
                ts, self.current
            );
            return Ok(());
        }

        let tmp = self.path.with_extension("tmp");
        fs::write(&tmp, ts.format(WATERMARK_FORMAT).to_string())?;
        fs::rename(&tmp, &self.path)?;
        self.current = ts;
        debug!("watermark advanced to {}", ts);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn ts(secs: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2024, 5, 1)
            .unwrap()
            .and_hms_opt(12, 0, secs)
            .unwrap()
    }

    #[test]
    fn missing_file_yields_sentinel() {
        let dir = tempfile::tempdir().unwrap();
        let store = WatermarkStore::open(dir.path().join("wm.txt")).unwrap();
        assert_eq!(store.current(), sentinel());
    }

    #[test]
    fn save_then_reopen_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("wm.txt");
        let mut store = WatermarkStore::open(&path).unwrap();
        store.save(ts(30)).unwrap();

        let reopened = WatermarkStore::open(&path).unwrap();
        assert_eq!(reopened.current(), ts(30));
    }

    #[test]
    fn watermark_never_decreases() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("wm.txt");
        let mut store = WatermarkStore::open(&path).unwrap();
        store.save(ts(30)).unwrap();
        store.save(ts(10)).unwrap();
        assert_eq!(store.current(), ts(30));
        assert_eq!(WatermarkStore::open(&path).unwrap().current(), ts(30));
    }

    #[test]
    fn no_temp_file_left_behind() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("wm.txt");
        let mut store = WatermarkStore::open(&path).unwrap();
        store.save(ts(5)).unwrap();
        assert!(!path.with_extension("tmp").exists());
    }

    #[test]
    fn fractional_seconds_survive() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("wm.txt");
        let precise = NaiveDate::from_ymd_opt(2024, 5, 1)
            .unwrap()
            .and_hms_micro_opt(12, 0, 0, 123_456)
            .unwrap();
        let mut store = WatermarkStore::open(&path).unwrap();
        store.save(precise).unwrap();
        assert_eq!(WatermarkStore::open(&path).unwrap().current(), precise);
    }
}
