//! Persistent cache for fallback flag mappings
//!
//! The cache is an explicit store object with a load/save lifecycle,
//! passed into the matcher so tests can inject an in-memory instance.
//! Keys hash the full mapping request (resource, relation, flags, fields,
//! model); values are the returned flag-to-field maps. Completed results
//! are persisted immediately so an interrupted run never repeats work.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde_json::json;
use sha2::{Digest, Sha256};
use tracing::{debug, warn};

use crate::error::Result;

/// A resolved mapping for one (resource, relation) group:
/// flag name to field name, or None for "no good match"
pub type FlagMapping = BTreeMap<String, Option<String>>;

/// Cache key: sha256 hex over the canonical JSON of the request.
///
/// Callers pass flags and fields pre-sorted and deduplicated so the key
/// is stable across runs.
pub fn cache_key(
    resource: &str,
    relation: &str,
    flags: &[(String, String)],
    fields: &[(String, String)],
    model: &str,
) -> String {
    // serde_json::Map is a BTreeMap, so key order (and the hash) is
    // stable regardless of argument construction order.
    let raw = json!({
        "resource": resource,
        "relation": relation,
        "flags": flags,
        "fields": fields,
        "model": model,
    })
    .to_string();
    hex::encode(Sha256::digest(raw.as_bytes()))
}

/// Persistent mapping cache with an optional backing file
#[derive(Debug, Default)]
pub struct MappingCache {
    path: Option<PathBuf>,
    entries: BTreeMap<String, FlagMapping>,
}

impl MappingCache {
    /// Purely in-memory cache (tests, or runs with caching disabled)
    pub fn in_memory() -> Self {
        Self::default()
    }

    /// Load the cache from a JSON file. An unreadable or corrupt file is
    /// treated as an empty cache; it never aborts the run.
    pub fn load(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let entries = match std::fs::read_to_string(&path) {
            Ok(contents) => match serde_json::from_str::<BTreeMap<String, FlagMapping>>(&contents) {
                Ok(entries) => entries,
                Err(err) => {
                    warn!(path = %path.display(), error = %err, "Mapping cache corrupt; starting empty");
                    BTreeMap::new()
                }
            },
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => BTreeMap::new(),
            Err(err) => {
                warn!(path = %path.display(), error = %err, "Mapping cache unreadable; starting empty");
                BTreeMap::new()
            }
        };
        debug!(path = %path.display(), entries = entries.len(), "Mapping cache loaded");
        Self {
            path: Some(path),
            entries,
        }
    }

    /// Look up a cached mapping
    pub fn get(&self, key: &str) -> Option<&FlagMapping> {
        self.entries.get(key)
    }

    /// Number of cached groups
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Record a completed mapping and persist the cache immediately.
    ///
    /// Save failures are logged and swallowed; losing the cache only
    /// costs a repeat external call on the next run.
    pub fn insert(&mut self, key: String, mapping: FlagMapping) {
        self.entries.insert(key, mapping);
        if let Err(err) = self.save() {
            warn!(error = %err, "Failed to persist mapping cache");
        }
    }

    /// Write the cache to its backing file, if it has one
    pub fn save(&self) -> Result<()> {
        let Some(path) = &self.path else {
            return Ok(());
        };
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let payload = serde_json::to_string_pretty(&self.entries)?;
        std::fs::write(path, payload + "\n")?;
        Ok(())
    }

    /// The backing file path, if any
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }
}
