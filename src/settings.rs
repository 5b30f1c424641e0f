//! Root-folder configuration, persisted as JSON and observable.
//!
//! Replaces any global settings access with an explicit handle threaded
//! through catalog, watcher and executor construction. Folder changes are
//! validated (the target must exist) and broadcast to subscribers after
//! they are applied.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::mpsc::{channel, Receiver, Sender};
use tracing::{info, warn};

use crate::error::{ResultExt, ShelfError};

#[derive(Debug, Serialize, Deserialize)]
struct Settings {
    #[serde(rename = "scriptsFolder")]
    scripts_folder: PathBuf,
}

/// Holds the current scripts root folder and notifies on change.
pub struct FolderConfig {
    folder: PathBuf,
    settings_path: PathBuf,
    subscribers: Vec<Sender<PathBuf>>,
}

impl FolderConfig {
    /// Load the configuration from the default per-user settings file,
    /// falling back to `~/Scripts` when there is none or the saved folder
    /// no longer exists.
    pub fn load() -> Self {
        Self::load_from(Self::default_settings_path())
    }

    /// Load from a specific settings file (used by tests).
    pub fn load_from(settings_path: PathBuf) -> Self {
        let mut folder = Self::default_folder();

        if settings_path.exists() {
            match std::fs::read_to_string(&settings_path)
                .map_err(anyhow::Error::from)
                .and_then(|s| serde_json::from_str::<Settings>(&s).map_err(Into::into))
            {
                Ok(settings) => {
                    if settings.scripts_folder.is_dir() {
                        folder = settings.scripts_folder;
                    } else {
                        warn!(
                            folder = %settings.scripts_folder.display(),
                            "Saved scripts folder no longer exists, using default"
                        );
                    }
                }
                Err(e) => {
                    warn!(
                        error = %e,
                        path = %settings_path.display(),
                        "Could not load settings, using default folder"
                    );
                }
            }
        }

        info!(folder = %folder.display(), "Scripts folder configured");
        FolderConfig {
            folder,
            settings_path,
            subscribers: Vec::new(),
        }
    }

    fn default_settings_path() -> PathBuf {
        dirs::data_local_dir()
            .map(|d| d.join("script-shelf"))
            .unwrap_or_else(|| std::env::temp_dir().join("script-shelf"))
            .join("settings.json")
    }

    fn default_folder() -> PathBuf {
        PathBuf::from(shellexpand::tilde("~/Scripts").as_ref())
    }

    /// The currently configured scripts root.
    pub fn current_folder(&self) -> &Path {
        &self.folder
    }

    /// Change the scripts root.
    ///
    /// Fails with [`ShelfError::FolderNotFound`] when the path is not an
    /// existing directory; the previous folder is retained. On success the
    /// new value is persisted (best effort) and subscribers are notified.
    pub fn set_folder(&mut self, path: &Path) -> Result<(), ShelfError> {
        if !path.is_dir() {
            return Err(ShelfError::FolderNotFound(path.to_path_buf()));
        }

        self.folder = path.to_path_buf();
        self.save().warn_on_err();

        info!(folder = %self.folder.display(), "Scripts folder changed");
        let folder = self.folder.clone();
        self.subscribers.retain(|tx| tx.send(folder.clone()).is_ok());
        Ok(())
    }

    /// Subscribe to folder changes. Each successful `set_folder` delivers
    /// the new path after it has been applied.
    pub fn subscribe(&mut self) -> Receiver<PathBuf> {
        let (tx, rx) = channel();
        self.subscribers.push(tx);
        rx
    }

    /// Create the configured folder when it does not exist yet.
    pub fn ensure_folder_exists(&self) {
        if !self.folder.exists() {
            std::fs::create_dir_all(&self.folder).warn_on_err();
        }
    }

    fn save(&self) -> anyhow::Result<()> {
        use anyhow::Context;

        if let Some(parent) = self.settings_path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create directory: {}", parent.display()))?;
        }
        let json = serde_json::to_string_pretty(&Settings {
            scripts_folder: self.folder.clone(),
        })
        .context("Failed to serialize settings")?;
        std::fs::write(&self.settings_path, json)
            .with_context(|| format!("Failed to write settings: {}", self.settings_path.display()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_set_folder_rejects_missing_path() {
        let dir = TempDir::new().unwrap();
        let mut config = FolderConfig::load_from(dir.path().join("settings.json"));
        let before = config.current_folder().to_path_buf();

        let result = config.set_folder(Path::new("/definitely/not/here"));
        assert!(matches!(result, Err(ShelfError::FolderNotFound(_))));
        // Previous state retained
        assert_eq!(config.current_folder(), before.as_path());
    }

    #[test]
    fn test_set_folder_persists_and_notifies() {
        let dir = TempDir::new().unwrap();
        let settings = dir.path().join("settings.json");
        let scripts = dir.path().join("scripts");
        std::fs::create_dir_all(&scripts).unwrap();

        let mut config = FolderConfig::load_from(settings.clone());
        let rx = config.subscribe();
        config.set_folder(&scripts).unwrap();

        assert_eq!(config.current_folder(), scripts.as_path());
        assert_eq!(rx.try_recv().unwrap(), scripts);

        // A fresh load picks up the persisted folder
        let reloaded = FolderConfig::load_from(settings);
        assert_eq!(reloaded.current_folder(), scripts.as_path());
    }

    #[test]
    fn test_corrupt_settings_fall_back_to_default() {
        let dir = TempDir::new().unwrap();
        let settings = dir.path().join("settings.json");
        std::fs::write(&settings, "{{ not json").unwrap();

        let config = FolderConfig::load_from(settings);
        assert_eq!(
            config.current_folder(),
            PathBuf::from(shellexpand::tilde("~/Scripts").as_ref()).as_path()
        );
    }

    #[test]
    fn test_saved_but_vanished_folder_falls_back() {
        let dir = TempDir::new().unwrap();
        let settings = dir.path().join("settings.json");
        std::fs::write(
            &settings,
            r#"{"scriptsFolder": "/gone/forever/scripts"}"#,
        )
        .unwrap();

        let config = FolderConfig::load_from(settings);
        assert_ne!(config.current_folder(), Path::new("/gone/forever/scripts"));
    }
}
