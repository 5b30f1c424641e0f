//! Persistent last-execution timestamps, keyed by absolute script path.
//!
//! The history lives in a single pretty-printed JSON file under the
//! per-user data directory. It is loaded lazily at most once per process,
//! and every recorded execution rewrites the whole file via an atomic
//! temp-write + rename. Storage failures are logged and swallowed: a
//! missing or corrupt file is simply an empty history.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use tracing::{debug, info, instrument, warn};

use crate::error::ResultExt;

/// Persisted format: a single map from script path to last execution time.
#[derive(Debug, Default, Serialize, Deserialize)]
struct HistoryData {
    #[serde(rename = "ScriptExecutions", default)]
    script_executions: HashMap<String, DateTime<Utc>>,
}

/// Store for per-script execution timestamps with JSON persistence.
///
/// Path identity is case-insensitive; the stored key keeps whatever casing
/// it was first recorded with.
#[derive(Debug)]
pub struct HistoryStore {
    entries: HashMap<String, DateTime<Utc>>,
    file_path: PathBuf,
    loaded: bool,
}

impl HistoryStore {
    /// Create a store backed by the default per-user history file.
    pub fn new() -> Self {
        HistoryStore {
            entries: HashMap::new(),
            file_path: Self::default_path(),
            loaded: false,
        }
    }

    /// Create a store backed by a custom file (used by tests).
    pub fn with_path(path: PathBuf) -> Self {
        HistoryStore {
            entries: HashMap::new(),
            file_path: path,
            loaded: false,
        }
    }

    fn default_path() -> PathBuf {
        dirs::data_local_dir()
            .map(|d| d.join("script-shelf"))
            .unwrap_or_else(|| std::env::temp_dir().join("script-shelf"))
            .join("execution_history.json")
    }

    /// Drop the cache so the next lookup re-reads the file.
    pub fn invalidate(&mut self) {
        self.entries.clear();
        self.loaded = false;
    }

    /// The last recorded execution time for a script, if any.
    ///
    /// Lazily loads the history file on first access. A missing or
    /// unparseable file is treated as an empty history.
    pub fn last_execution(&mut self, path: &Path) -> Option<DateTime<Utc>> {
        self.ensure_loaded();
        let key = self.find_key(path)?;
        self.entries.get(&key).copied()
    }

    /// Merge one execution into the cache and rewrite the whole file.
    ///
    /// Persistence failures are logged, never surfaced; the caller proceeds
    /// regardless.
    #[instrument(name = "history_record", skip(self, timestamp))]
    pub fn record_execution(&mut self, path: &Path, timestamp: DateTime<Utc>) {
        self.ensure_loaded();
        let key = self
            .find_key(path)
            .unwrap_or_else(|| path.to_string_lossy().into_owned());
        self.entries.insert(key, timestamp);
        self.save().warn_on_err();
    }

    /// Move the recorded timestamp from one path to another.
    ///
    /// No-op when the old path was never executed. Keeps rename
    /// reconciliation from losing a script's history.
    pub fn rename_entry(&mut self, old_path: &Path, new_path: &Path) {
        self.ensure_loaded();
        let Some(old_key) = self.find_key(old_path) else {
            return;
        };
        if let Some(ts) = self.entries.remove(&old_key) {
            debug!(
                from = %old_path.display(),
                to = %new_path.display(),
                "Migrating execution history entry"
            );
            self.entries
                .insert(new_path.to_string_lossy().into_owned(), ts);
            self.save().warn_on_err();
        }
    }

    /// Find the stored key matching a path, case-insensitively.
    fn find_key(&self, path: &Path) -> Option<String> {
        let wanted = path.to_string_lossy();
        if self.entries.contains_key(wanted.as_ref()) {
            return Some(wanted.into_owned());
        }
        let folded = wanted.to_lowercase();
        self.entries
            .keys()
            .find(|k| k.to_lowercase() == folded)
            .cloned()
    }

    /// Cache is loaded at most once per process lifetime unless invalidated.
    fn ensure_loaded(&mut self) {
        if self.loaded {
            return;
        }
        self.loaded = true;

        if !self.file_path.exists() {
            info!(path = %self.file_path.display(), "History file not found, starting fresh");
            return;
        }

        match std::fs::read_to_string(&self.file_path) {
            Ok(content) => match serde_json::from_str::<HistoryData>(&content) {
                Ok(data) => {
                    self.entries = data.script_executions;
                    info!(
                        path = %self.file_path.display(),
                        entry_count = self.entries.len(),
                        "Loaded execution history"
                    );
                }
                Err(e) => {
                    warn!(
                        error = %e,
                        path = %self.file_path.display(),
                        "History file corrupt, treating as empty"
                    );
                }
            },
            Err(e) => {
                warn!(
                    error = %e,
                    path = %self.file_path.display(),
                    "Could not read history file, treating as empty"
                );
            }
        }
    }

    /// Rewrite the full history file atomically (write temp + rename).
    #[instrument(name = "history_save", skip(self))]
    fn save(&self) -> Result<()> {
        if let Some(parent) = self.file_path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create directory: {}", parent.display()))?;
        }

        let json = serde_json::to_string_pretty(&HistoryData {
            script_executions: self.entries.clone(),
        })
        .context("Failed to serialize execution history")?;

        let temp_path = self.file_path.with_extension("json.tmp");
        std::fs::write(&temp_path, &json)
            .with_context(|| format!("Failed to write temp history file: {}", temp_path.display()))?;
        std::fs::rename(&temp_path, &self.file_path).with_context(|| {
            format!("Failed to rename temp file to {}", self.file_path.display())
        })?;

        debug!(
            path = %self.file_path.display(),
            entry_count = self.entries.len(),
            bytes = json.len(),
            "Saved execution history (atomic)"
        );
        Ok(())
    }
}

impl Default for HistoryStore {
    fn default() -> Self {
        Self::new()
    }
}
