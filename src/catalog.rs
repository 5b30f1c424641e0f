//! In-memory catalog of known scripts for the current root folder.
//!
//! The catalog is the authoritative collection: a full-scan `rebuild`
//! enumerates the folder tree, and the incremental `apply_*` operations
//! reconcile individual file-system changes without a rescan. Path
//! identity is case-insensitive and the catalog holds at most one entry
//! per absolute path.

use chrono::{DateTime, Utc};
use std::cmp::Ordering;
use std::path::{Path, PathBuf};
use tracing::{debug, info, instrument, warn};

use crate::history::HistoryStore;

/// Script kinds the catalog recognizes, matched case-insensitively.
pub const SUPPORTED_EXTENSIONS: [&str; 4] = ["vbs", "bat", "cmd", "ps1"];

/// Whether a path carries one of the recognized script extensions.
pub fn is_script_file(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .map(|e| {
            let folded = e.to_ascii_lowercase();
            SUPPORTED_EXTENSIONS.contains(&folded.as_str())
        })
        .unwrap_or(false)
}

fn fold_path(path: &Path) -> String {
    path.to_string_lossy().to_lowercase()
}

/// One known script file.
#[derive(Clone, Debug, PartialEq)]
pub struct ScriptEntry {
    /// File name, used for display and ordering
    pub name: String,
    /// Absolute path; catalog identity (case-insensitive)
    pub path: PathBuf,
    /// Folder relative to the root; empty string means the root itself
    pub folder: String,
    pub created: Option<DateTime<Utc>>,
    pub modified: Option<DateTime<Utc>>,
    pub size: u64,
    pub last_executed: Option<DateTime<Utc>>,
    /// Transient flag, never persisted
    pub is_executing: bool,
}

impl ScriptEntry {
    /// Build an entry from an on-disk file, seeding `last_executed` from
    /// the history store. Fails when the file's metadata is unreadable.
    pub fn from_file(
        path: &Path,
        root: &Path,
        history: &mut HistoryStore,
    ) -> std::io::Result<ScriptEntry> {
        let metadata = std::fs::metadata(path)?;
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        Ok(ScriptEntry {
            name,
            path: path.to_path_buf(),
            folder: relative_folder(path, root),
            created: metadata.created().ok().map(DateTime::<Utc>::from),
            modified: metadata.modified().ok().map(DateTime::<Utc>::from),
            size: metadata.len(),
            last_executed: history.last_execution(path),
            is_executing: false,
        })
    }

    /// Folder label for grouping: `"Root"` for top-level scripts.
    pub fn display_folder(&self) -> &str {
        if self.folder.is_empty() {
            "Root"
        } else {
            &self.folder
        }
    }

    pub fn is_in_subfolder(&self) -> bool {
        !self.folder.is_empty()
    }

    /// Human-readable last execution, e.g. for list output.
    pub fn last_executed_display(&self) -> String {
        match self.last_executed {
            None => "Never executed".to_string(),
            Some(ts) => format!("on {}", ts.format("%b %d, %Y at %H:%M")),
        }
    }

    pub fn file_size_display(&self) -> String {
        if self.size < 1024 {
            format!("{} bytes", self.size)
        } else {
            format!("{:.1} KB", self.size as f64 / 1024.0)
        }
    }
}

/// Containing folder of `path`, relative to `root`. Empty for the root
/// itself or for paths outside the root.
fn relative_folder(path: &Path, root: &Path) -> String {
    path.parent()
        .and_then(|parent| parent.strip_prefix(root).ok())
        .map(|rel| rel.to_string_lossy().into_owned())
        .unwrap_or_default()
}

fn by_name(a: &ScriptEntry, b: &ScriptEntry) -> Ordering {
    a.name
        .to_lowercase()
        .cmp(&b.name.to_lowercase())
        .then_with(|| a.name.cmp(&b.name))
}

/// A derived grouping of scripts by containing folder. Never stored;
/// recomputed whenever the catalog changes.
#[derive(Clone, Debug)]
pub struct ScriptGroup {
    /// Display name: `"Root"` or the relative folder
    pub name: String,
    /// Scripts in this folder, ordered by name
    pub scripts: Vec<ScriptEntry>,
}

impl ScriptGroup {
    pub fn len(&self) -> usize {
        self.scripts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.scripts.is_empty()
    }
}

/// Partition entries into per-folder groups: the root group first, the
/// remaining groups ordered lexicographically by folder name, scripts
/// within each group ordered by name.
pub fn group_by_folder(entries: &[ScriptEntry]) -> Vec<ScriptGroup> {
    let mut groups: Vec<ScriptGroup> = Vec::new();

    for entry in entries {
        let label = entry.display_folder();
        match groups.iter_mut().find(|g| g.name == label) {
            Some(group) => group.scripts.push(entry.clone()),
            None => groups.push(ScriptGroup {
                name: label.to_string(),
                scripts: vec![entry.clone()],
            }),
        }
    }

    for group in &mut groups {
        group.scripts.sort_by(by_name);
    }
    // Root sorts before everything else, the rest by folder name
    groups.sort_by(|a, b| {
        let ka = if a.name == "Root" { "" } else { a.name.as_str() };
        let kb = if b.name == "Root" { "" } else { b.name.as_str() };
        ka.cmp(kb)
    });
    groups
}

/// Authoritative in-memory set of known scripts.
#[derive(Debug, Default)]
pub struct Catalog {
    root: PathBuf,
    entries: Vec<ScriptEntry>,
}

impl Catalog {
    pub fn new(root: PathBuf) -> Self {
        Catalog {
            root,
            entries: Vec::new(),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Cloned snapshot of the entries; the internal collection is never
    /// handed out.
    pub fn snapshot(&self) -> Vec<ScriptEntry> {
        self.entries.clone()
    }

    /// Number of distinct folders currently represented.
    pub fn folder_count(&self) -> usize {
        let mut folders: Vec<&str> = self.entries.iter().map(|e| e.display_folder()).collect();
        folders.sort_unstable();
        folders.dedup();
        folders.len()
    }

    pub fn contains(&self, path: &Path) -> bool {
        self.position_of(path).is_some()
    }

    pub fn get(&self, path: &Path) -> Option<&ScriptEntry> {
        self.position_of(path).map(|i| &self.entries[i])
    }

    fn position_of(&self, path: &Path) -> Option<usize> {
        let folded = fold_path(path);
        self.entries
            .iter()
            .position(|e| fold_path(&e.path) == folded)
    }

    /// Full scan: recursively enumerate the root, keeping recognized script
    /// files, each annotated with its last execution time. A missing root
    /// yields an empty catalog, not an error; individual unreadable files
    /// are skipped with a warning.
    #[instrument(name = "catalog_rebuild", skip(self, history), fields(root = %root.display()))]
    pub fn rebuild(&mut self, root: &Path, history: &mut HistoryStore) {
        self.root = root.to_path_buf();
        self.entries.clear();

        if !root.is_dir() {
            debug!(root = %root.display(), "Scripts folder does not exist, catalog is empty");
            return;
        }

        let mut found = Vec::new();
        walk_scripts(root, &mut found);

        for path in found {
            match ScriptEntry::from_file(&path, root, history) {
                Ok(entry) => self.entries.push(entry),
                Err(e) => {
                    warn!(
                        error = %e,
                        path = %path.display(),
                        "Skipping unreadable script file"
                    );
                }
            }
        }

        self.entries.sort_by(by_name);
        info!(
            count = self.entries.len(),
            folders = self.folder_count(),
            "Catalog rebuilt"
        );
    }

    /// Insert a newly discovered script, keeping name order. A duplicate
    /// path (case-insensitive) is a no-op; returns whether the entry was
    /// actually added.
    pub fn apply_create(&mut self, entry: ScriptEntry) -> bool {
        if self.contains(&entry.path) {
            debug!(path = %entry.path.display(), "Ignoring duplicate catalog entry");
            return false;
        }
        let at = self
            .entries
            .partition_point(|e| by_name(e, &entry) != Ordering::Greater);
        self.entries.insert(at, entry);
        true
    }

    /// Remove the entry for a deleted script. Unknown paths are a no-op;
    /// returns the removed entry for reporting.
    pub fn apply_remove(&mut self, path: &Path) -> Option<ScriptEntry> {
        let at = self.position_of(path)?;
        Some(self.entries.remove(at))
    }

    /// Rename an entry in place, migrating its history key so the recorded
    /// last execution survives the rename. Unknown old paths are a no-op;
    /// returns whether an entry was renamed.
    pub fn apply_rename(
        &mut self,
        old_path: &Path,
        new_path: &Path,
        history: &mut HistoryStore,
    ) -> bool {
        let Some(at) = self.position_of(old_path) else {
            return false;
        };
        history.rename_entry(old_path, new_path);

        let root = self.root.clone();
        let entry = &mut self.entries[at];
        entry.path = new_path.to_path_buf();
        entry.name = new_path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        entry.folder = relative_folder(new_path, &root);
        entry.last_executed = history.last_execution(new_path);

        self.entries.sort_by(by_name);
        true
    }

    /// Remove every entry inside the deleted folder (case-insensitive).
    /// The prefix match stops at a path separator, so a sibling folder
    /// sharing the name as a prefix is untouched. Returns the removed
    /// paths for reporting.
    pub fn apply_folder_removed(&mut self, folder: &Path) -> Vec<PathBuf> {
        let mut prefix = fold_path(folder);
        if !prefix.ends_with(std::path::MAIN_SEPARATOR) {
            prefix.push(std::path::MAIN_SEPARATOR);
        }
        let mut removed = Vec::new();
        self.entries.retain(|e| {
            if fold_path(&e.path).starts_with(&prefix) {
                removed.push(e.path.clone());
                false
            } else {
                true
            }
        });
        if !removed.is_empty() {
            info!(
                folder = %folder.display(),
                removed = removed.len(),
                "Folder deleted, cascading entry removal"
            );
        }
        removed
    }

    /// Mark or clear the transient executing flag for a script.
    pub fn set_executing(&mut self, path: &Path, executing: bool) {
        if let Some(at) = self.position_of(path) {
            self.entries[at].is_executing = executing;
        }
    }

    /// Stamp a completed execution onto the entry.
    pub fn set_last_executed(&mut self, path: &Path, when: DateTime<Utc>) {
        if let Some(at) = self.position_of(path) {
            self.entries[at].last_executed = Some(when);
        }
    }
}

/// Depth-first enumeration of recognized script files under `dir`.
/// Unreadable directories are skipped with a warning.
fn walk_scripts(dir: &Path, out: &mut Vec<PathBuf>) {
    let entries = match std::fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(e) => {
            warn!(error = %e, path = %dir.display(), "Could not read directory during scan");
            return;
        }
    };

    for entry in entries.flatten() {
        let path = entry.path();
        match entry.file_type() {
            Ok(ft) if ft.is_dir() => walk_scripts(&path, out),
            Ok(ft) if ft.is_file() => {
                if is_script_file(&path) {
                    out.push(path);
                }
            }
            _ => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn test_history(dir: &TempDir) -> HistoryStore {
        HistoryStore::with_path(dir.path().join("history.json"))
    }

    fn entry(path: &str, folder: &str) -> ScriptEntry {
        ScriptEntry {
            name: Path::new(path)
                .file_name()
                .unwrap()
                .to_string_lossy()
                .into_owned(),
            path: PathBuf::from(path),
            folder: folder.to_string(),
            created: None,
            modified: None,
            size: 0,
            last_executed: None,
            is_executing: false,
        }
    }

    #[test]
    fn test_is_script_file_case_insensitive() {
        assert!(is_script_file(Path::new("/s/a.vbs")));
        assert!(is_script_file(Path::new("/s/a.BAT")));
        assert!(is_script_file(Path::new("/s/a.Cmd")));
        assert!(is_script_file(Path::new("/s/a.PS1")));
        assert!(!is_script_file(Path::new("/s/a.txt")));
        assert!(!is_script_file(Path::new("/s/noext")));
    }

    #[test]
    fn test_rebuild_scenario_two_files() {
        let state = TempDir::new().unwrap();
        let root = TempDir::new().unwrap();
        std::fs::write(root.path().join("a.vbs"), b"0123456789").unwrap();
        std::fs::create_dir(root.path().join("sub")).unwrap();
        std::fs::write(root.path().join("sub/b.bat"), b"01234567890123456789").unwrap();
        // A file the scan must ignore
        std::fs::write(root.path().join("notes.txt"), b"x").unwrap();

        let mut history = test_history(&state);
        let mut catalog = Catalog::new(root.path().to_path_buf());
        catalog.rebuild(root.path(), &mut history);

        let entries = catalog.snapshot();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].name, "a.vbs");
        assert_eq!(entries[0].size, 10);
        assert_eq!(entries[0].folder, "");
        assert_eq!(entries[0].last_executed, None);
        assert_eq!(entries[1].name, "b.bat");
        assert_eq!(entries[1].size, 20);
        assert_eq!(entries[1].folder, "sub");

        let groups = group_by_folder(&entries);
        assert_eq!(groups.len(), 2);
        assert_eq!(groups[0].name, "Root");
        assert_eq!(groups[0].scripts[0].name, "a.vbs");
        assert_eq!(groups[1].name, "sub");
        assert_eq!(groups[1].scripts[0].name, "b.bat");
    }

    #[test]
    fn test_rebuild_missing_root_is_empty() {
        let state = TempDir::new().unwrap();
        let mut history = test_history(&state);
        let mut catalog = Catalog::new(PathBuf::from("/nope"));
        catalog.rebuild(Path::new("/nope/scripts"), &mut history);
        assert!(catalog.is_empty());
    }

    #[test]
    fn test_rebuild_seeds_last_execution_from_history() {
        let state = TempDir::new().unwrap();
        let root = TempDir::new().unwrap();
        let script = root.path().join("job.ps1");
        std::fs::write(&script, b"Write-Output hi").unwrap();

        let when = Utc::now();
        let mut history = test_history(&state);
        history.record_execution(&script, when);

        let mut catalog = Catalog::new(root.path().to_path_buf());
        catalog.rebuild(root.path(), &mut history);
        assert_eq!(catalog.get(&script).unwrap().last_executed, Some(when));
    }

    #[test]
    fn test_group_by_folder_partitions_exactly() {
        let entries = vec![
            entry("/r/sub/z.bat", "sub"),
            entry("/r/a.vbs", ""),
            entry("/r/sub/a.ps1", "sub"),
            entry("/r/other/m.cmd", "other"),
        ];
        let groups = group_by_folder(&entries);

        // Root first, then lexicographic
        let names: Vec<&str> = groups.iter().map(|g| g.name.as_str()).collect();
        assert_eq!(names, vec!["Root", "other", "sub"]);

        // Exact partition: no script omitted or duplicated
        let total: usize = groups.iter().map(|g| g.len()).sum();
        assert_eq!(total, entries.len());

        // Scripts within a group ordered by name
        assert_eq!(groups[2].scripts[0].name, "a.ps1");
        assert_eq!(groups[2].scripts[1].name, "z.bat");
    }

    #[test]
    fn test_apply_create_dedupes_case_insensitively() {
        let mut catalog = Catalog::new(PathBuf::from("/r"));
        assert!(catalog.apply_create(entry("/r/A.bat", "")));
        assert!(!catalog.apply_create(entry("/r/a.BAT", "")));
        assert_eq!(catalog.len(), 1);
    }

    #[test]
    fn test_apply_create_keeps_name_order() {
        let mut catalog = Catalog::new(PathBuf::from("/r"));
        catalog.apply_create(entry("/r/b.bat", ""));
        catalog.apply_create(entry("/r/a.vbs", ""));
        catalog.apply_create(entry("/r/c.ps1", ""));
        let names: Vec<String> = catalog.snapshot().into_iter().map(|e| e.name).collect();
        assert_eq!(names, vec!["a.vbs", "b.bat", "c.ps1"]);
    }

    #[test]
    fn test_apply_remove_is_idempotent() {
        let mut catalog = Catalog::new(PathBuf::from("/r"));
        catalog.apply_create(entry("/r/a.vbs", ""));
        catalog.apply_create(entry("/r/b.bat", ""));

        assert!(catalog.apply_remove(Path::new("/r/a.vbs")).is_some());
        let after_first = catalog.snapshot();
        // Second application is a no-op, not an error
        assert!(catalog.apply_remove(Path::new("/r/a.vbs")).is_none());
        assert_eq!(catalog.snapshot(), after_first);
    }

    #[test]
    fn test_apply_rename_updates_entry_and_history() {
        let state = TempDir::new().unwrap();
        let mut history = test_history(&state);
        let when = Utc::now();
        history.record_execution(Path::new("/r/old.ps1"), when);

        let mut catalog = Catalog::new(PathBuf::from("/r"));
        catalog.apply_create(entry("/r/old.ps1", ""));

        assert!(catalog.apply_rename(
            Path::new("/r/old.ps1"),
            Path::new("/r/sub/new.ps1"),
            &mut history
        ));
        let renamed = catalog.get(Path::new("/r/sub/new.ps1")).unwrap();
        assert_eq!(renamed.name, "new.ps1");
        assert_eq!(renamed.folder, "sub");
        // Rename preserves history
        assert_eq!(renamed.last_executed, Some(when));
        assert_eq!(
            history.last_execution(Path::new("/r/sub/new.ps1")),
            Some(when)
        );
    }

    #[test]
    fn test_apply_rename_unknown_path_is_noop() {
        let state = TempDir::new().unwrap();
        let mut history = test_history(&state);
        let mut catalog = Catalog::new(PathBuf::from("/r"));
        assert!(!catalog.apply_rename(
            Path::new("/r/ghost.bat"),
            Path::new("/r/new.bat"),
            &mut history
        ));
    }

    #[test]
    fn test_folder_deletion_cascade() {
        let mut catalog = Catalog::new(PathBuf::from("/root"));
        catalog.apply_create(entry("/root/sub/a.ps1", "sub"));
        catalog.apply_create(entry("/root/sub/b.bat", "sub"));
        catalog.apply_create(entry("/root/c.vbs", ""));

        let mut removed = catalog.apply_folder_removed(Path::new("/root/sub"));
        removed.sort();
        assert_eq!(
            removed,
            vec![PathBuf::from("/root/sub/a.ps1"), PathBuf::from("/root/sub/b.bat")]
        );
        // Unrelated entry untouched
        assert_eq!(catalog.len(), 1);
        assert!(catalog.contains(Path::new("/root/c.vbs")));
    }

    #[test]
    fn test_folder_deletion_spares_sibling_with_shared_prefix() {
        let mut catalog = Catalog::new(PathBuf::from("/root"));
        catalog.apply_create(entry("/root/sub/a.ps1", "sub"));
        catalog.apply_create(entry("/root/subzero/b.bat", "subzero"));

        let removed = catalog.apply_folder_removed(Path::new("/root/sub"));
        assert_eq!(removed, vec![PathBuf::from("/root/sub/a.ps1")]);
        assert!(catalog.contains(Path::new("/root/subzero/b.bat")));
    }

    #[test]
    fn test_folder_deletion_prefix_is_case_insensitive() {
        let mut catalog = Catalog::new(PathBuf::from("/root"));
        catalog.apply_create(entry("/root/Sub/a.ps1", "Sub"));
        let removed = catalog.apply_folder_removed(Path::new("/root/sub"));
        assert_eq!(removed.len(), 1);
        assert!(catalog.is_empty());
    }

    #[test]
    fn test_executing_flag_and_stamp() {
        let mut catalog = Catalog::new(PathBuf::from("/r"));
        catalog.apply_create(entry("/r/a.vbs", ""));

        catalog.set_executing(Path::new("/r/a.vbs"), true);
        assert!(catalog.get(Path::new("/r/a.vbs")).unwrap().is_executing);

        let when = Utc::now();
        catalog.set_last_executed(Path::new("/r/a.vbs"), when);
        catalog.set_executing(Path::new("/r/a.vbs"), false);
        let e = catalog.get(Path::new("/r/a.vbs")).unwrap();
        assert_eq!(e.last_executed, Some(when));
        assert!(!e.is_executing);

        // Unknown paths are a no-op
        catalog.set_executing(Path::new("/r/ghost.bat"), true);
    }

    #[test]
    fn test_display_helpers() {
        let mut e = entry("/r/a.vbs", "");
        assert_eq!(e.display_folder(), "Root");
        assert!(!e.is_in_subfolder());
        e.size = 10;
        assert_eq!(e.file_size_display(), "10 bytes");
        e.size = 2048;
        assert_eq!(e.file_size_display(), "2.0 KB");
        assert_eq!(e.last_executed_display(), "Never executed");
    }
}
