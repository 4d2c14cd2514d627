//! Append-only transition log
//!
//! Line-delimited JSON records of every applied transition, rotated
//! past a size threshold by renaming with a timestamp suffix and
//! starting fresh.

use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::PathBuf;

use chrono::Utc;
use tracing::{info, warn};

use crate::models::TransitionRecord;

/// Rotation threshold (10 MB).
pub const DEFAULT_MAX_BYTES: u64 = 10 * 1024 * 1024;

/// JSON-lines transition log with size-based rotation.
#[derive(Debug)]
pub struct TransitionLog {
    path: PathBuf,
    max_bytes: u64,
}

impl TransitionLog {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            max_bytes: DEFAULT_MAX_BYTES,
        }
    }

    pub fn with_max_bytes(mut self, max_bytes: u64) -> Self {
        self.max_bytes = max_bytes;
        self
    }

    /// Append one record, rotating first if the file has grown past
    /// the threshold. Log failures are surfaced to the caller but are
    /// not fatal to the control loop.
    pub fn append(&self, record: &TransitionRecord) -> std::io::Result<()> {
        self.rotate_if_needed()?;

        if let Some(dir) = self.path.parent() {
            fs::create_dir_all(dir)?;
        }

        let line = serde_json::to_string(record)
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))?;
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)?;
        writeln!(file, "{line}")?;
        Ok(())
    }

    fn rotate_if_needed(&self) -> std::io::Result<()> {
        let size = match fs::metadata(&self.path) {
            Ok(meta) => meta.len(),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(()),
            Err(e) => return Err(e),
        };
        if size < self.max_bytes {
            return Ok(());
        }

        let suffix = Utc::now().format("%Y%m%dT%H%M%S");
        let rotated = self.path.with_extension(format!("jsonl.{suffix}"));
        match fs::rename(&self.path, &rotated) {
            Ok(()) => {
                info!(
                    from = %self.path.display(),
                    to = %rotated.display(),
                    size_bytes = size,
                    "Rotated transition log"
                );
                Ok(())
            }
            Err(e) => {
                warn!(error = %e, "Transition log rotation failed, continuing to append");
                Ok(())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Profile;
    use tempfile::TempDir;

    fn record(reason: &str) -> TransitionRecord {
        TransitionRecord {
            timestamp: Utc::now(),
            from_profile: Profile::Balanced,
            to_profile: Profile::Aggressive,
            reason: reason.to_string(),
            host: "node-1".to_string(),
        }
    }

    #[test]
    fn test_append_writes_one_json_line_per_record() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("transitions.jsonl");
        let log = TransitionLog::new(&path);

        log.append(&record("first")).unwrap();
        log.append(&record("second")).unwrap();

        let content = fs::read_to_string(&path).unwrap();
        let lines: Vec<_> = content.lines().collect();
        assert_eq!(lines.len(), 2);

        let parsed: TransitionRecord = serde_json::from_str(lines[0]).unwrap();
        assert_eq!(parsed.reason, "first");
    }

    #[test]
    fn test_rotation_past_size_threshold() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("transitions.jsonl");
        let log = TransitionLog::new(&path).with_max_bytes(200);

        for i in 0..10 {
            log.append(&record(&format!("entry {i}"))).unwrap();
        }

        let rotated: Vec<_> = fs::read_dir(dir.path())
            .unwrap()
            .filter_map(|e| e.ok())
            .filter(|e| {
                e.file_name()
                    .to_string_lossy()
                    .starts_with("transitions.jsonl.")
            })
            .collect();
        assert!(!rotated.is_empty(), "expected at least one rotated file");

        // The live file starts fresh after rotation.
        let live = fs::metadata(&path).unwrap();
        assert!(live.len() < 10 * 200);
    }
}
