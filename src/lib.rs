//! script-shelf - a script catalog engine.
//!
//! Discovers interpreter-executable script files (`.vbs`, `.bat`, `.cmd`,
//! `.ps1`) under a configurable root folder, keeps an in-memory catalog
//! synchronized with live file-system changes, executes scripts through
//! the matching external interpreter, and persists per-script
//! last-execution timestamps.

pub mod catalog;
pub mod error;
pub mod executor;
pub mod history;
pub mod logging;
pub mod service;
pub mod settings;
pub mod watcher;

pub use catalog::{group_by_folder, Catalog, ScriptEntry, ScriptGroup};
pub use error::{ResultExt, ShelfError};
pub use executor::{ExecutionReport, Executor, InterpreterSpec, InterpreterTable};
pub use history::HistoryStore;
pub use service::ScriptService;
pub use settings::FolderConfig;
pub use watcher::{CatalogEvent, ScriptWatcher};
