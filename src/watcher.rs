//! Turns raw file-system notifications into typed catalog events.
//!
//! Raw create/delete/rename events for the watched root are debounced and
//! classified into `ScriptAdded` / `ScriptRemoved` / `FolderDeleted`.
//! Creates (and the add half of renames) sit in a per-path pending map for
//! a short delay before the file is read, so a writer that hasn't finished
//! flushing never produces a half-built entry; a file that is still
//! unreadable after the delay is dropped silently.

use notify::event::{ModifyKind, RemoveKind, RenameMode};
use notify::{recommended_watcher, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{channel, Receiver, Sender};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

use crate::catalog::{is_script_file, ScriptEntry};
use crate::error::ShelfError;
use crate::history::HistoryStore;

/// Delay between a create/rename notification and reading the file.
pub const DEBOUNCE: Duration = Duration::from_millis(100);

/// How often the pending map is checked for expired deadlines.
const FLUSH_TICK: Duration = Duration::from_millis(25);

/// Catalog-level change notification emitted by the watcher.
#[derive(Clone, Debug)]
pub enum CatalogEvent {
    ScriptAdded(ScriptEntry),
    ScriptRemoved(PathBuf),
    FolderDeleted(PathBuf),
}

/// Watches a scripts root recursively and emits [`CatalogEvent`]s.
///
/// Stopping (or dropping) the watcher unsubscribes, discards any pending
/// debounce state, and closes the event channel; no events from the old
/// root are delivered afterwards. Restarting on a new root is a fresh
/// `start` call.
pub struct ScriptWatcher {
    // Dropping the notify watcher is what unsubscribes
    watcher: Option<RecommendedWatcher>,
    stop: Arc<AtomicBool>,
}

impl ScriptWatcher {
    /// Subscribe to a root folder. Returns the watcher handle and the
    /// receiving end of the event stream.
    pub fn start(
        root: &Path,
        history: Arc<Mutex<HistoryStore>>,
    ) -> Result<(Self, Receiver<CatalogEvent>), ShelfError> {
        Self::start_with_debounce(root, history, DEBOUNCE)
    }

    pub fn start_with_debounce(
        root: &Path,
        history: Arc<Mutex<HistoryStore>>,
        debounce: Duration,
    ) -> Result<(Self, Receiver<CatalogEvent>), ShelfError> {
        let (out_tx, out_rx) = channel();
        let (raw_tx, raw_rx) = channel();

        let mut watcher = recommended_watcher(move |res: notify::Result<notify::Event>| {
            let _ = raw_tx.send(res);
        })?;
        watcher.watch(root, RecursiveMode::Recursive)?;

        let stop = Arc::new(AtomicBool::new(false));
        let pending: Arc<Mutex<HashMap<PathBuf, Instant>>> = Arc::new(Mutex::new(HashMap::new()));

        info!(root = %root.display(), recursive = true, "Script watcher started");

        // Worker: classify raw events; removals go out immediately,
        // creates are parked in the pending map.
        {
            let out_tx = out_tx.clone();
            let pending = pending.clone();
            thread::spawn(move || {
                loop {
                    match raw_rx.recv() {
                        Ok(Ok(event)) => {
                            if classify_raw_event(&event, &out_tx, &pending, debounce).is_err() {
                                break;
                            }
                        }
                        Ok(Err(e)) => {
                            warn!(error = %e, watcher = "scripts", "File watcher error");
                        }
                        Err(_) => {
                            info!(watcher = "scripts", "Script watcher shutting down");
                            break;
                        }
                    }
                }
            });
        }

        // Flusher: resolve pending creates once their deadline passes.
        {
            let stop = stop.clone();
            let pending = pending.clone();
            let root = root.to_path_buf();
            thread::spawn(move || {
                loop {
                    thread::sleep(FLUSH_TICK);
                    if stop.load(Ordering::Relaxed) {
                        pending.lock().clear();
                        break;
                    }

                    let now = Instant::now();
                    let expired: Vec<PathBuf> = {
                        let mut map = pending.lock();
                        let due: Vec<PathBuf> = map
                            .iter()
                            .filter(|(_, deadline)| **deadline <= now)
                            .map(|(path, _)| path.clone())
                            .collect();
                        for path in &due {
                            map.remove(path);
                        }
                        due
                    };

                    for path in expired {
                        // Resolve outside the pending lock
                        let entry = ScriptEntry::from_file(&path, &root, &mut history.lock());
                        match entry {
                            Ok(entry) => {
                                debug!(path = %path.display(), "Emitting script added");
                                if out_tx.send(CatalogEvent::ScriptAdded(entry)).is_err() {
                                    return;
                                }
                            }
                            Err(e) => {
                                // Writer never finished, or the file is
                                // already gone again: drop silently
                                debug!(
                                    error = %e,
                                    path = %path.display(),
                                    "Dropping unreadable pending create"
                                );
                            }
                        }
                    }
                }
            });
        }

        Ok((
            ScriptWatcher {
                watcher: Some(watcher),
                stop,
            },
            out_rx,
        ))
    }

    /// Unsubscribe and discard in-flight debounce timers. Safe to call
    /// more than once; the watcher is idle afterwards.
    pub fn stop(&mut self) {
        self.stop.store(true, Ordering::Relaxed);
        if self.watcher.take().is_some() {
            info!("Script watcher stopped");
        }
    }
}

impl Drop for ScriptWatcher {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Route one raw notify event. Returns Err only when the outbound channel
/// is closed and the worker should exit.
fn classify_raw_event(
    event: &notify::Event,
    out_tx: &Sender<CatalogEvent>,
    pending: &Mutex<HashMap<PathBuf, Instant>>,
    debounce: Duration,
) -> Result<(), ()> {
    match &event.kind {
        EventKind::Create(_) => {
            for path in &event.paths {
                queue_pending_add(path, pending, debounce);
            }
        }
        EventKind::Remove(kind) => {
            for path in &event.paths {
                pending.lock().remove(path);
                let removal = match kind {
                    RemoveKind::Folder => Some(CatalogEvent::FolderDeleted(path.clone())),
                    _ => classify_removal(path),
                };
                if let Some(ev) = removal {
                    out_tx.send(ev).map_err(|_| ())?;
                }
            }
        }
        // Rename is remove-old + debounced add-new
        EventKind::Modify(ModifyKind::Name(mode)) => match mode {
            RenameMode::Both if event.paths.len() >= 2 => {
                let (old, new) = (&event.paths[0], &event.paths[1]);
                pending.lock().remove(old);
                if is_script_file(old) {
                    out_tx
                        .send(CatalogEvent::ScriptRemoved(old.clone()))
                        .map_err(|_| ())?;
                }
                queue_pending_add(new, pending, debounce);
            }
            RenameMode::From => {
                for path in &event.paths {
                    pending.lock().remove(path);
                    if let Some(ev) = classify_removal(path) {
                        out_tx.send(ev).map_err(|_| ())?;
                    }
                }
            }
            RenameMode::To => {
                for path in &event.paths {
                    queue_pending_add(path, pending, debounce);
                }
            }
            _ => {
                // Unspecific rename: decide per path by what's on disk now
                for path in &event.paths {
                    if path.exists() {
                        queue_pending_add(path, pending, debounce);
                    } else {
                        pending.lock().remove(path);
                        if let Some(ev) = classify_removal(path) {
                            out_tx.send(ev).map_err(|_| ())?;
                        }
                    }
                }
            }
        },
        // Content modifications don't change catalog membership
        _ => {}
    }
    Ok(())
}

fn queue_pending_add(path: &Path, pending: &Mutex<HashMap<PathBuf, Instant>>, debounce: Duration) {
    if !is_script_file(path) {
        return;
    }
    debug!(path = %path.display(), "Debouncing pending create");
    pending
        .lock()
        .insert(path.to_path_buf(), Instant::now() + debounce);
}

/// Disambiguate a raw deletion. A vanished path with no extension is
/// classified as a folder deletion (an extensionless deleted file will
/// misclassify here; the over-broad prefix removal self-corrects on the
/// next rescan). A recognized script extension is a script removal;
/// anything else is ignored.
fn classify_removal(path: &Path) -> Option<CatalogEvent> {
    if !path.exists() && path.extension().is_none() {
        return Some(CatalogEvent::FolderDeleted(path.to_path_buf()));
    }
    if is_script_file(path) {
        return Some(CatalogEvent::ScriptRemoved(path.to_path_buf()));
    }
    None
}
