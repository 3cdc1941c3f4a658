//! Crash-safe persistence of the equity high-water mark.
//!
//! The record lives in a single JSON file, `{ "peak": <number> }`. Writes go
//! to a sibling temp file which is synced and renamed over the canonical
//! file, so a crash leaves either the old record or the new one.
//!
//! A missing or unreadable record is "no peak yet": callers reseed from the
//! current equity instead of failing.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use serde_json::value::RawValue;
use std::ffi::OsString;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use tracing::{debug, error, info, warn};

use crate::error::{CalibrationError, Result};

/// Highest equity observed so far.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PeakRecord {
    pub peak_equity: Decimal,
}

/// File-backed store for the [`PeakRecord`].
#[derive(Debug, Clone)]
pub struct PeakStore {
    path: PathBuf,
}

impl PeakStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Read the stored peak. Missing and corrupt files both yield `None`.
    pub fn load(&self) -> Option<PeakRecord> {
        let raw = match fs::read_to_string(&self.path) {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!(path = %self.path.display(), "No peak record on disk");
                return None;
            }
            Err(e) => {
                warn!(path = %self.path.display(), error = %e, "Peak record unreadable, reseeding");
                return None;
            }
        };

        match decode(&raw) {
            Some(record) => Some(record),
            None => {
                warn!(path = %self.path.display(), "Peak record corrupt, reseeding");
                None
            }
        }
    }

    /// Atomically replace the stored record.
    pub fn save(&self, record: &PeakRecord) -> Result<()> {
        let body = encode(record);
        let tmp = self.tmp_path();

        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)?;
        }

        let mut file = fs::File::create(&tmp)?;
        file.write_all(body.as_bytes())?;
        file.sync_all()?;
        drop(file);

        fs::rename(&tmp, &self.path)?;
        debug!(path = %self.path.display(), peak = %record.peak_equity, "Peak record persisted");
        Ok(())
    }

    /// Open the record for one calibration cycle.
    ///
    /// The returned guard persists any pending update on commit, and on drop
    /// if the cycle bails out before committing.
    pub fn acquire(&self) -> PeakGuard<'_> {
        PeakGuard {
            store: self,
            current: self.load(),
            pending: None,
        }
    }

    /// Overwrite the peak unconditionally. This is the only way it can go down.
    pub fn reset(&self, value: Decimal) -> Result<PeakRecord> {
        if value <= Decimal::ZERO {
            return Err(CalibrationError::InvalidEquity(value));
        }
        let record = PeakRecord { peak_equity: value };
        self.save(&record)?;
        info!(path = %self.path.display(), peak = %value, "Peak record reset");
        Ok(record)
    }

    fn tmp_path(&self) -> PathBuf {
        let mut name = self
            .path
            .file_name()
            .map(OsString::from)
            .unwrap_or_else(|| OsString::from("peak"));
        name.push(".tmp");
        self.path.with_file_name(name)
    }
}

/// Scoped handle on the peak record for a single cycle.
pub struct PeakGuard<'a> {
    store: &'a PeakStore,
    current: Option<PeakRecord>,
    pending: Option<PeakRecord>,
}

impl PeakGuard<'_> {
    /// The record as loaded at acquisition.
    pub fn record(&self) -> Option<&PeakRecord> {
        self.current.as_ref()
    }

    /// Stage a new peak. Never lowers the stored value.
    pub fn update(&mut self, record: PeakRecord) {
        let peak_equity = match &self.current {
            Some(current) => current.peak_equity.max(record.peak_equity),
            None => record.peak_equity,
        };
        self.pending = Some(PeakRecord { peak_equity });
    }

    /// Persist the staged update, if any, and return the effective record.
    pub fn commit(mut self) -> Result<Option<PeakRecord>> {
        if let Some(record) = self.pending.take() {
            self.store.save(&record)?;
            self.current = Some(record);
        }
        Ok(self.current.take())
    }
}

impl Drop for PeakGuard<'_> {
    fn drop(&mut self) {
        if let Some(record) = self.pending.take() {
            warn!(peak = %record.peak_equity, "Peak guard dropped uncommitted, flushing");
            if let Err(e) = self.store.save(&record) {
                error!(error = %e, path = %self.store.path.display(), "Failed to flush peak record");
            }
        }
    }
}

/// Decimal text is written as a bare JSON number so no digits are lost.
fn encode(record: &PeakRecord) -> String {
    format!("{{\"peak\":{}}}", record.peak_equity)
}

#[derive(Deserialize)]
struct RawPeak<'a> {
    #[serde(borrow)]
    peak: &'a RawValue,
}

fn decode(raw: &str) -> Option<PeakRecord> {
    let record: RawPeak<'_> = serde_json::from_str(raw).ok()?;
    let text = record.peak.get();
    let peak = if text.starts_with('"') {
        parse_decimal(&serde_json::from_str::<String>(text).ok()?)?
    } else {
        parse_decimal(text)?
    };
    (peak > Decimal::ZERO).then_some(PeakRecord { peak_equity: peak })
}

fn parse_decimal(s: &str) -> Option<Decimal> {
    let s = s.trim();
    Decimal::from_str(s)
        .or_else(|_| Decimal::from_scientific(s))
        .ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn store_in(dir: &TempDir) -> PeakStore {
        PeakStore::new(dir.path().join("arena_peak.json"))
    }

    #[test]
    fn test_round_trip() {
        let dir = TempDir::new().unwrap();
        let store = store_in(&dir);
        let record = PeakRecord {
            peak_equity: Decimal::new(1306, 2),
        };

        store.save(&record).unwrap();
        assert_eq!(store.load(), Some(record));
    }

    #[test]
    fn test_file_format_is_plain_number() {
        let dir = TempDir::new().unwrap();
        let store = store_in(&dir);
        store
            .save(&PeakRecord {
                peak_equity: Decimal::new(425, 1),
            })
            .unwrap();

        let raw = fs::read_to_string(store.path()).unwrap();
        let value: serde_json::Value = serde_json::from_str(&raw).unwrap();
        assert_eq!(value["peak"].as_f64(), Some(42.5));
        assert!(!store.tmp_path().exists());
    }

    #[test]
    fn test_high_precision_peak_survives_reload() {
        let dir = TempDir::new().unwrap();
        let store = store_in(&dir);
        let peak = Decimal::from_str("12.345678901234567891").unwrap();

        store.save(&PeakRecord { peak_equity: peak }).unwrap();

        assert_eq!(
            fs::read_to_string(store.path()).unwrap(),
            r#"{"peak":12.345678901234567891}"#
        );
        assert_eq!(store.load().unwrap().peak_equity, peak);
    }

    #[test]
    fn test_scientific_peak_is_accepted() {
        let dir = TempDir::new().unwrap();
        let store = store_in(&dir);
        fs::write(store.path(), r#"{"peak": 1.5e2}"#).unwrap();
        assert_eq!(store.load().unwrap().peak_equity, Decimal::new(150, 0));
    }

    #[test]
    fn test_missing_and_corrupt_are_none() {
        let dir = TempDir::new().unwrap();
        let store = store_in(&dir);
        assert_eq!(store.load(), None);

        fs::write(store.path(), "{not json").unwrap();
        assert_eq!(store.load(), None);

        fs::write(store.path(), r#"{"peak": -3}"#).unwrap();
        assert_eq!(store.load(), None);

        fs::write(store.path(), r#"{"other": 10}"#).unwrap();
        assert_eq!(store.load(), None);
    }

    #[test]
    fn test_accepts_string_peak() {
        let dir = TempDir::new().unwrap();
        let store = store_in(&dir);
        fs::write(store.path(), r#"{"peak": "27.40"}"#).unwrap();
        assert_eq!(store.load().unwrap().peak_equity, Decimal::new(2740, 2));
    }

    #[test]
    fn test_guard_commit_never_lowers_peak() {
        let dir = TempDir::new().unwrap();
        let store = store_in(&dir);
        store.reset(Decimal::new(100, 0)).unwrap();

        let mut guard = store.acquire();
        assert_eq!(guard.record().unwrap().peak_equity, Decimal::new(100, 0));
        guard.update(PeakRecord {
            peak_equity: Decimal::new(60, 0),
        });
        let committed = guard.commit().unwrap().unwrap();

        assert_eq!(committed.peak_equity, Decimal::new(100, 0));
        assert_eq!(store.load().unwrap().peak_equity, Decimal::new(100, 0));
    }

    #[test]
    fn test_guard_flushes_on_drop() {
        let dir = TempDir::new().unwrap();
        let store = store_in(&dir);

        {
            let mut guard = store.acquire();
            assert!(guard.record().is_none());
            guard.update(PeakRecord {
                peak_equity: Decimal::new(55, 0),
            });
            // dropped without commit, e.g. an early return on error
        }

        assert_eq!(store.load().unwrap().peak_equity, Decimal::new(55, 0));
    }

    #[test]
    fn test_guard_without_update_writes_nothing() {
        let dir = TempDir::new().unwrap();
        let store = store_in(&dir);
        let guard = store.acquire();
        assert_eq!(guard.commit().unwrap(), None);
        assert!(!store.path().exists());
    }

    #[test]
    fn test_reset_rejects_non_positive() {
        let dir = TempDir::new().unwrap();
        let store = store_in(&dir);
        assert!(store.reset(Decimal::ZERO).is_err());
    }

    #[test]
    fn test_save_creates_parent_dir() {
        let dir = TempDir::new().unwrap();
        let store = PeakStore::new(dir.path().join("state").join("peak.json"));
        store.reset(Decimal::new(12, 0)).unwrap();
        assert!(store.path().exists());
    }
}
