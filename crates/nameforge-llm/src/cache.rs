//! Bounded, time-expiring result cache.
//!
//! Keys are SHA-256 digests of the canonical JSON form of (prompt, count,
//! options). Entries expire lazily on lookup; when full, the oldest insertion
//! is evicted. With a persist path the cache is loaded from a JSON file at
//! construction and written back every [`SAVE_EVERY`] entries, on `clear`
//! and on drop.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use sha2::{Digest, Sha256};
use std::collections::{HashMap, VecDeque};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError};
use std::time::{Duration, Instant};

use nameforge_types::Result;

use crate::config::CacheSettings;
use crate::{GenerationOptions, GenerationResult};

/// A persistent cache is saved whenever its size reaches a multiple of this.
pub const SAVE_EVERY: usize = 10;

/// Deterministic digest of a request. Object keys are sorted at every depth,
/// so option maps that differ only in insertion order share a key.
pub fn cache_key(prompt: &str, count: usize, options: &GenerationOptions) -> String {
    let options = serde_json::to_value(options).unwrap_or(Value::Null);
    let payload = canonicalize(serde_json::json!({
        "prompt": prompt,
        "count": count,
        "options": options,
    }));

    let mut hasher = Sha256::new();
    hasher.update(payload.to_string().as_bytes());
    format!("{:x}", hasher.finalize())
}

fn canonicalize(value: Value) -> Value {
    match value {
        Value::Object(map) => {
            let mut entries: Vec<(String, Value)> = map.into_iter().collect();
            entries.sort_by(|a, b| a.0.cmp(&b.0));
            let sorted: Map<String, Value> = entries
                .into_iter()
                .map(|(k, v)| (k, canonicalize(v)))
                .collect();
            Value::Object(sorted)
        }
        Value::Array(items) => Value::Array(items.into_iter().map(canonicalize).collect()),
        other => other,
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CacheStats {
    pub size: usize,
    pub hits: u64,
    pub misses: u64,
    /// Fraction of lookups that hit, `0.0` before any lookup.
    pub hit_rate: f64,
    pub max_entries: usize,
    pub ttl_secs: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub persist_path: Option<PathBuf>,
}

/// On-disk form of one entry. Files list entries oldest first.
#[derive(Serialize, Deserialize)]
struct PersistedEntry {
    key: String,
    stored_at: DateTime<Utc>,
    result: GenerationResult,
}

struct Entry {
    result: GenerationResult,
    stored_at: Instant,
}

#[derive(Default)]
struct CacheState {
    entries: HashMap<String, Entry>,
    order: VecDeque<String>,
    hits: u64,
    misses: u64,
}

impl CacheState {
    fn forget(&mut self, key: &str) -> bool {
        let present = self.entries.remove(key).is_some();
        if present {
            self.order.retain(|k| k != key);
        }
        present
    }

    fn insert(&mut self, key: String, result: GenerationResult, now: Instant, max_entries: usize) {
        if self.entries.contains_key(&key) {
            self.order.retain(|k| k != &key);
        } else {
            while self.entries.len() >= max_entries {
                let Some(oldest) = self.order.pop_front() else {
                    break;
                };
                self.entries.remove(&oldest);
                tracing::debug!(key = %oldest, "Evicted cache entry");
            }
        }
        self.order.push_back(key.clone());
        self.entries.insert(
            key,
            Entry {
                result,
                stored_at: now,
            },
        );
    }
}

pub struct ResultCache {
    ttl: Duration,
    max_entries: usize,
    persist_path: Option<PathBuf>,
    state: Mutex<CacheState>,
}

impl ResultCache {
    /// `max_entries == 0` disables storage; every lookup misses.
    pub fn new(ttl: Duration, max_entries: usize) -> Self {
        Self {
            ttl,
            max_entries,
            persist_path: None,
            state: Mutex::new(CacheState::default()),
        }
    }

    pub fn from_settings(settings: &CacheSettings) -> Self {
        let cache = Self::new(settings.ttl(), settings.max_entries);
        match &settings.persist_path {
            Some(path) => cache.with_persistence(path.clone()),
            None => cache,
        }
    }

    /// Backs the cache with a JSON file and loads whatever live entries it
    /// holds. An unreadable file is logged and the cache starts empty.
    pub fn with_persistence(mut self, path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        match self.load(&path) {
            Ok(loaded) => tracing::info!(path = %path.display(), loaded, "Loaded result cache"),
            Err(e) => {
                tracing::warn!(path = %path.display(), error = %e, "Could not load result cache, starting empty")
            }
        }
        self.persist_path = Some(path);
        self
    }

    pub fn get(&self, key: &str) -> Option<GenerationResult> {
        self.get_at(key, Instant::now())
    }

    pub fn put(&self, key: String, result: GenerationResult) {
        self.put_at(key, result, Instant::now());
    }

    pub(crate) fn get_at(&self, key: &str, now: Instant) -> Option<GenerationResult> {
        let mut state = self.lock();
        let fresh = state
            .entries
            .get(key)
            .map(|entry| now.saturating_duration_since(entry.stored_at) <= self.ttl);

        match fresh {
            Some(true) => {
                state.hits += 1;
                tracing::debug!(key, "Cache hit");
                state.entries.get(key).map(|entry| entry.result.clone())
            }
            Some(false) => {
                state.forget(key);
                state.misses += 1;
                tracing::debug!(key, "Cache entry expired");
                None
            }
            None => {
                state.misses += 1;
                None
            }
        }
    }

    pub(crate) fn put_at(&self, key: String, result: GenerationResult, now: Instant) {
        if self.max_entries == 0 {
            return;
        }
        let size = {
            let mut state = self.lock();
            state.insert(key, result, now, self.max_entries);
            state.entries.len()
        };
        if size % SAVE_EVERY == 0 {
            self.save_logged();
        }
    }

    /// Drops a single entry. Returns whether it was present.
    pub fn remove(&self, key: &str) -> bool {
        let removed = self.lock().forget(key);
        if removed {
            tracing::debug!(key, "Removed cache entry");
        }
        removed
    }

    pub fn stats(&self) -> CacheStats {
        let state = self.lock();
        let lookups = state.hits + state.misses;
        CacheStats {
            size: state.entries.len(),
            hits: state.hits,
            misses: state.misses,
            hit_rate: if lookups == 0 {
                0.0
            } else {
                state.hits as f64 / lookups as f64
            },
            max_entries: self.max_entries,
            ttl_secs: self.ttl.as_secs(),
            persist_path: self.persist_path.clone(),
        }
    }

    /// Drops every entry and resets the hit/miss counters. A persistent
    /// cache also empties its file.
    pub fn clear(&self) {
        *self.lock() = CacheState::default();
        self.save_logged();
    }

    pub fn persist_path(&self) -> Option<&Path> {
        self.persist_path.as_deref()
    }

    /// Writes live entries to the persist path. No-op for an in-memory cache.
    pub fn save(&self) -> Result<()> {
        let Some(path) = &self.persist_path else {
            return Ok(());
        };

        let entries: Vec<PersistedEntry> = {
            let state = self.lock();
            let now = Instant::now();
            let wall = Utc::now();
            state
                .order
                .iter()
                .filter_map(|key| {
                    let entry = state.entries.get(key)?;
                    let age = now.saturating_duration_since(entry.stored_at);
                    if age > self.ttl {
                        return None;
                    }
                    let age = chrono::Duration::from_std(age).unwrap_or_else(|_| chrono::Duration::zero());
                    Some(PersistedEntry {
                        key: key.clone(),
                        stored_at: wall - age,
                        result: entry.result.clone(),
                    })
                })
                .collect()
        };

        if let Some(dir) = path.parent().filter(|d| !d.as_os_str().is_empty()) {
            std::fs::create_dir_all(dir)?;
        }
        let json = serde_json::to_string_pretty(&entries)?;
        std::fs::write(path, json)?;
        tracing::debug!(path = %path.display(), entries = entries.len(), "Result cache saved");
        Ok(())
    }

    fn save_logged(&self) {
        if let Err(e) = self.save() {
            tracing::warn!(error = %e, "Failed to save result cache");
        }
    }

    fn load(&self, path: &Path) -> Result<usize> {
        if !path.exists() {
            return Ok(0);
        }
        let data = std::fs::read_to_string(path)?;
        let persisted: Vec<PersistedEntry> = serde_json::from_str(&data)?;
        if self.max_entries == 0 {
            return Ok(0);
        }

        let now = Instant::now();
        let wall = Utc::now();
        let mut state = self.lock();
        for entry in persisted {
            // Timestamps in the future count as just stored.
            let age = (wall - entry.stored_at).to_std().unwrap_or(Duration::ZERO);
            if age > self.ttl {
                continue;
            }
            let stored_at = now.checked_sub(age).unwrap_or(now);
            state.insert(entry.key, entry.result, stored_at, self.max_entries);
        }
        Ok(state.entries.len())
    }

    pub fn len(&self) -> usize {
        self.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, CacheState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl std::fmt::Debug for ResultCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResultCache")
            .field("ttl", &self.ttl)
            .field("max_entries", &self.max_entries)
            .field("persist_path", &self.persist_path)
            .field("size", &self.len())
            .finish()
    }
}

impl Drop for ResultCache {
    fn drop(&mut self) {
        if self.persist_path.is_some() {
            self.save_logged();
        }
    }
}
