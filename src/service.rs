//! The outward-facing surface of the script catalog engine.
//!
//! `ScriptService` owns the catalog, the history store, the executor and
//! the watcher, and exposes snapshot queries, execution, deletion, folder
//! switching and a change-event subscription. Catalog mutation is
//! serialized through one mutex; consumers only ever see cloned
//! snapshots. A generation counter discards watcher events and execution
//! completions that arrive after the catalog was rebuilt for a different
//! root.

use parking_lot::Mutex;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::mpsc::{channel, Receiver, Sender};
use std::sync::Arc;
use std::thread::JoinHandle;
use tracing::{info, instrument, warn};

use crate::catalog::{group_by_folder, Catalog, ScriptEntry, ScriptGroup};
use crate::error::ShelfError;
use crate::executor::{Executor, InterpreterTable};
use crate::history::HistoryStore;
use crate::settings::FolderConfig;
use crate::watcher::{CatalogEvent, ScriptWatcher};

pub struct ScriptService {
    config: FolderConfig,
    history: Arc<Mutex<HistoryStore>>,
    catalog: Arc<Mutex<Catalog>>,
    executor: Executor,
    watcher: Option<ScriptWatcher>,
    pump: Option<JoinHandle<()>>,
    generation: Arc<AtomicU64>,
    subscribers: Arc<Mutex<Vec<Sender<CatalogEvent>>>>,
    status: Arc<Mutex<String>>,
}

impl ScriptService {
    /// Build a service with the default per-user history store.
    pub fn new(config: FolderConfig, interpreters: InterpreterTable) -> Self {
        Self::with_history(
            config,
            Arc::new(Mutex::new(HistoryStore::new())),
            interpreters,
        )
    }

    /// Build a service around an explicit history store (tests inject a
    /// temp-backed one here).
    pub fn with_history(
        config: FolderConfig,
        history: Arc<Mutex<HistoryStore>>,
        interpreters: InterpreterTable,
    ) -> Self {
        config.ensure_folder_exists();
        let catalog = Arc::new(Mutex::new(Catalog::new(
            config.current_folder().to_path_buf(),
        )));

        let service = ScriptService {
            executor: Executor::new(interpreters, history.clone()),
            config,
            history,
            catalog,
            watcher: None,
            pump: None,
            generation: Arc::new(AtomicU64::new(0)),
            subscribers: Arc::new(Mutex::new(Vec::new())),
            status: Arc::new(Mutex::new("Ready".to_string())),
        };
        service.refresh();
        service
    }

    pub fn current_folder(&self) -> PathBuf {
        self.config.current_folder().to_path_buf()
    }

    /// Human-readable status of the most recent operation.
    pub fn status_message(&self) -> String {
        self.status.lock().clone()
    }

    fn set_status(&self, message: String) {
        *self.status.lock() = message;
    }

    /// All known scripts, ordered by name. Always a cloned snapshot.
    pub fn list_scripts(&self) -> Vec<ScriptEntry> {
        self.catalog.lock().snapshot()
    }

    /// Scripts partitioned by folder: root group first, then folders in
    /// lexicographic order.
    pub fn grouped_scripts(&self) -> Vec<ScriptGroup> {
        group_by_folder(&self.catalog.lock().snapshot())
    }

    /// Subscribe to applied catalog changes. Events are delivered on the
    /// service's pump thread; consumers marshal them onto their own loop.
    pub fn subscribe(&self) -> Receiver<CatalogEvent> {
        let (tx, rx) = channel();
        self.subscribers.lock().push(tx);
        rx
    }

    /// Full rescan of the current folder.
    #[instrument(name = "service_refresh", skip(self))]
    pub fn refresh(&self) {
        let root = self.config.current_folder().to_path_buf();
        let mut history = self.history.lock();
        let mut catalog = self.catalog.lock();
        catalog.rebuild(&root, &mut history);

        let folders = catalog.folder_count();
        let folder_word = if folders == 1 { "folder" } else { "folders" };
        self.set_status(format!(
            "Loaded {} scripts in {} {}",
            catalog.len(),
            folders,
            folder_word
        ));
    }

    /// Execute a script and wait for it to finish.
    ///
    /// The catalog lock is not held while the process runs; only the
    /// executing flag and the completion stamp touch shared state. A
    /// completion that lands after a folder switch leaves the rebuilt
    /// catalog alone.
    pub fn execute(&self, path: &Path) -> bool {
        let generation = self.generation.load(Ordering::SeqCst);
        let name = display_name(path);

        self.catalog.lock().set_executing(path, true);
        self.set_status(format!("Executing {}...", name));

        let report = self.executor.execute(path);

        {
            let mut catalog = self.catalog.lock();
            if self.generation.load(Ordering::SeqCst) == generation {
                catalog.set_executing(path, false);
                // Mirror exactly what went into the history file
                if let Some(when) = report.recorded {
                    catalog.set_last_executed(path, when);
                }
            }
        }

        self.set_status(report.detail.clone());
        report.success
    }

    /// Delete a script file from disk. The catalog entry is removed
    /// eagerly; the watcher's own deletion event then reconciles as a
    /// no-op.
    pub fn delete(&self, path: &Path) -> bool {
        let name = display_name(path);
        if !path.is_file() {
            self.set_status(format!("Failed to delete {}", name));
            return false;
        }
        match std::fs::remove_file(path) {
            Ok(()) => {
                self.catalog.lock().apply_remove(path);
                self.set_status(format!("Script {} deleted successfully", name));
                true
            }
            Err(e) => {
                warn!(error = %e, path = %path.display(), "Could not delete script");
                self.set_status(format!("Failed to delete {}", name));
                false
            }
        }
    }

    /// Switch the scripts root. Fails with `FolderNotFound` when the
    /// target doesn't exist; previous state is retained. On success the
    /// old watcher is fully torn down before the new root is scanned and
    /// (when watching was active) resubscribed.
    pub fn set_folder(&mut self, path: &Path) -> Result<(), ShelfError> {
        self.config.set_folder(path)?;

        // Invalidate anything still in flight for the old root
        self.generation.fetch_add(1, Ordering::SeqCst);

        let was_watching = self.watcher.is_some();
        self.stop_watching();
        self.refresh();
        if was_watching {
            self.start_watching()?;
        }
        Ok(())
    }

    /// Start the file watcher for the current root and the pump thread
    /// that applies its events to the catalog. No-op when already
    /// watching.
    pub fn start_watching(&mut self) -> Result<(), ShelfError> {
        if self.watcher.is_some() {
            return Ok(());
        }

        let root = self.config.current_folder().to_path_buf();
        let (watcher, rx) = ScriptWatcher::start(&root, self.history.clone())?;

        let catalog = self.catalog.clone();
        let subscribers = self.subscribers.clone();
        let status = self.status.clone();
        let generation = self.generation.clone();
        let started_at = generation.load(Ordering::SeqCst);

        let pump = std::thread::spawn(move || {
            while let Ok(event) = rx.recv() {
                // Stale-write guard: the catalog has been rebuilt for a
                // different root since this watcher was started
                if generation.load(Ordering::SeqCst) != started_at {
                    continue;
                }
                pump_event(event, &catalog, &subscribers, &status);
            }
        });

        self.watcher = Some(watcher);
        self.pump = Some(pump);
        Ok(())
    }

    /// Stop watching: unsubscribe, drop pending debounce state, and wait
    /// for the pump thread to drain. Safe when not watching.
    pub fn stop_watching(&mut self) {
        if let Some(mut watcher) = self.watcher.take() {
            watcher.stop();
        }
        if let Some(pump) = self.pump.take() {
            let _ = pump.join();
        }
    }

    pub fn is_watching(&self) -> bool {
        self.watcher.is_some()
    }
}

impl Drop for ScriptService {
    fn drop(&mut self) {
        self.stop_watching();
    }
}

fn display_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string())
}

/// Apply one watcher event to the catalog and forward it to subscribers.
/// Events that turn out to be no-ops (duplicate add, unknown removal) are
/// not forwarded.
fn pump_event(
    event: CatalogEvent,
    catalog: &Mutex<Catalog>,
    subscribers: &Mutex<Vec<Sender<CatalogEvent>>>,
    status: &Mutex<String>,
) {
    let forwarded = match &event {
        CatalogEvent::ScriptAdded(entry) => {
            let added = catalog.lock().apply_create(entry.clone());
            if added {
                let location = if entry.is_in_subfolder() {
                    format!(" in {}", entry.folder)
                } else {
                    String::new()
                };
                *status.lock() = format!("Script {} added{}", entry.name, location);
            }
            added
        }
        CatalogEvent::ScriptRemoved(path) => {
            let removed = catalog.lock().apply_remove(path);
            if let Some(entry) = &removed {
                *status.lock() = format!("Script {} removed", entry.name);
            }
            removed.is_some()
        }
        CatalogEvent::FolderDeleted(path) => {
            let removed = catalog.lock().apply_folder_removed(path);
            let folder_name = display_name(path);
            *status.lock() = format!(
                "Folder '{}' deleted - removed {} scripts",
                folder_name,
                removed.len()
            );
            true
        }
    };

    if forwarded {
        info!(event = ?event, "Catalog updated from watcher event");
        subscribers
            .lock()
            .retain(|tx| tx.send(event.clone()).is_ok());
    }
}
