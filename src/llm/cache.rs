//! Disk-backed LLM response cache.
//!
//! One JSON object per line, keyed by the prompt fingerprint. Writers
//! serialize on an advisory file lock and replace the file atomically
//! (temp file + rename), so a cancelled run never commits a partial entry.
//! Readers take no lock and tolerate the file being extended underneath
//! them: unparsable trailing lines are skipped, and the last entry for a
//! fingerprint wins.

use std::{
    fs,
    io::Write,
    path::{Path, PathBuf},
};

use chrono::{DateTime, Utc};
use fs2::FileExt;
use serde::{Deserialize, Serialize};
use tempfile::NamedTempFile;

use crate::{errors::PickError, fingerprint::Fingerprint};

#[derive(Serialize, Deserialize, Debug, Clone)]
struct CacheEntry {
    fingerprint: String,
    response: String,
    created_at: DateTime<Utc>,
}

/// Append-only key-value store shared across processes.
pub struct ResponseCache {
    path: PathBuf,
}

impl ResponseCache {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Look up a verbatim response by fingerprint. Lock-free.
    pub fn lookup(&self, fingerprint: &Fingerprint) -> Result<Option<String>, PickError> {
        let contents = match fs::read_to_string(&self.path) {
            Ok(contents) => contents,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };

        let mut hit = None;
        for line in contents.lines() {
            // A line being written concurrently may be truncated; skip it.
            let Ok(entry) = serde_json::from_str::<CacheEntry>(line) else {
                continue;
            };
            if entry.fingerprint == fingerprint.as_str() {
                hit = Some(entry.response);
            }
        }
        Ok(hit)
    }

    /// Record a response. Entries are append-only; correcting a wrong entry
    /// means deleting the file.
    pub fn insert(&self, fingerprint: &Fingerprint, response: &str) -> Result<(), PickError> {
        if let Some(parent) = self.path.parent()
            && !parent.as_os_str().is_empty()
        {
            fs::create_dir_all(parent)?;
        }

        let lock_path = self.lock_path();
        let lock_file = fs::OpenOptions::new()
            .create(true)
            .truncate(false)
            .write(true)
            .open(&lock_path)?;
        lock_file.lock_exclusive()?;

        let result = self.insert_locked(fingerprint, response);
        let _ = FileExt::unlock(&lock_file);
        result
    }

    fn insert_locked(&self, fingerprint: &Fingerprint, response: &str) -> Result<(), PickError> {
        let existing = match fs::read_to_string(&self.path) {
            Ok(contents) => contents,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => String::new(),
            Err(e) => return Err(e.into()),
        };

        let entry = CacheEntry {
            fingerprint: fingerprint.as_str().to_string(),
            response: response.to_string(),
            created_at: Utc::now(),
        };
        let line = serde_json::to_string(&entry)
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))?;

        let dir = self
            .path
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .unwrap_or_else(|| Path::new("."));
        let mut tmp = NamedTempFile::new_in(dir)?;
        tmp.write_all(existing.as_bytes())?;
        tmp.write_all(line.as_bytes())?;
        tmp.write_all(b"\n")?;
        tmp.persist(&self.path).map_err(|e| e.error)?;

        tracing::debug!(
            "cached LLM response for {} in {}",
            fingerprint,
            self.path.display()
        );
        Ok(())
    }

    fn lock_path(&self) -> PathBuf {
        let mut name = self
            .path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "cache".to_string());
        name.push_str(".lock");
        self.path.with_file_name(name)
    }
}
