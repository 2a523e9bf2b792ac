use crate::error::{Result, TrailError};
use crate::types::FixLog;
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fs::{self, File};
use std::io::{Read, Write};
use std::path::Path;

/// State kept between runs: known fixes per key plus unsent contributions
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LocalStore {
    pub last_key: Option<String>,
    pub last_start_time: Option<i64>,
    pub used_keys: BTreeSet<String>,
    pub points: BTreeMap<String, FixLog>,
    pub pending: Vec<String>,
}

impl LocalStore {
    /// Read a gzip-compressed JSON store; a missing file is an empty store
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(LocalStore::default());
        }

        let file = File::open(path).map_err(|e| storage(path, "open", e))?;
        let mut decoder = GzDecoder::new(file);
        let mut json = String::new();
        decoder
            .read_to_string(&mut json)
            .map_err(|e| storage(path, "decompress", e))?;

        serde_json::from_str(&json).map_err(|e| storage(path, "deserialize", e))
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent).map_err(|e| storage(parent, "create dir", e))?;
            }
        }

        let json = serde_json::to_string(self).map_err(|e| storage(path, "serialize", e))?;
        let file = File::create(path).map_err(|e| storage(path, "create", e))?;
        let mut encoder = GzEncoder::new(file, Compression::default());
        encoder
            .write_all(json.as_bytes())
            .map_err(|e| storage(path, "write", e))?;
        encoder.finish().map_err(|e| storage(path, "finalize", e))?;
        Ok(())
    }

    /// Fix log of a key, created on first use
    pub fn fixes_mut(&mut self, key: &str) -> &mut FixLog {
        self.points.entry(key.to_string()).or_default()
    }

    pub fn fixes(&self, key: &str) -> Option<&FixLog> {
        self.points.get(key)
    }

    /// Remember `key` as the current one
    pub fn touch_key(&mut self, key: &str) {
        self.last_key = Some(key.to_string());
        self.used_keys.insert(key.to_string());
    }
}

fn storage(path: &Path, what: &str, e: impl std::fmt::Display) -> TrailError {
    TrailError::Storage(format!("{} {}: {}", what, path.display(), e))
}
