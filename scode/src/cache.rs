//! Modification-date cache for source analysis.
//!
//! Re-reading and re-hashing tens of megabytes of PCM dominates warm runs,
//! so per-source analysis results are persisted and reused while the file's
//! modification date and target channel count are unchanged.

use std::collections::HashMap;
use std::fs::{self, File};
use std::io;
use std::path::Path;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::debug;

pub const CACHE_DIR: &str = ".cache";
const CACHE_FILE: &str = "info.json";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CachedSource {
    pub path: String,
    /// RFC 3339 modification date at analysis time.
    pub modified: String,
    pub hash: u64,
    pub channels: u16,
    /// Channel count the hash was computed at; an override change
    /// invalidates the entry.
    pub target_channels: u16,
    pub sample_rate: u32,
    pub frame_count: u64,
}

impl CachedSource {
    /// Whether this record still describes the file: same modification date
    /// and hashed at the same target channel count.
    pub fn is_fresh(&self, modified: &str, target_channels: u16) -> bool {
        self.modified == modified && self.target_channels == target_channels
    }
}

#[derive(Debug, Default, Serialize, Deserialize)]
pub struct SourceCache {
    entries: HashMap<String, CachedSource>,
}

impl SourceCache {
    /// Load from `{dir}/info.json`; a missing or corrupt cache is a cold
    /// start, never an error.
    pub fn load(dir: &Path) -> Self {
        let path = dir.join(CACHE_FILE);
        match File::open(&path) {
            Ok(file) => match serde_json::from_reader(file) {
                Ok(cache) => cache,
                Err(e) => {
                    debug!("Ignoring corrupt cache {}: {}", path.display(), e);
                    Self::default()
                }
            },
            Err(_) => Self::default(),
        }
    }

    pub fn save(&self, dir: &Path) -> io::Result<()> {
        fs::create_dir_all(dir)?;
        let file = File::create(dir.join(CACHE_FILE))?;
        serde_json::to_writer_pretty(file, self)
            .map_err(|e| io::Error::new(io::ErrorKind::Other, e.to_string()))
    }

    /// Entry for a path, regardless of freshness.
    pub fn get(&self, path: &str) -> Option<&CachedSource> {
        self.entries.get(path)
    }

    pub fn insert(&mut self, entry: CachedSource) {
        self.entries.insert(entry.path.clone(), entry);
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Modification date as an RFC 3339 stamp; empty when unavailable.
pub fn modified_stamp(path: &Path) -> String {
    fs::metadata(path)
        .and_then(|m| m.modified())
        .map(|time| {
            let datetime: DateTime<Utc> = time.into();
            datetime.to_rfc3339()
        })
        .unwrap_or_default()
}
