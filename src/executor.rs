//! Script execution via external interpreters.
//!
//! Each recognized extension maps to an interpreter invocation; the script
//! path is always the final argument. Output is captured rather than shown
//! live, the working directory is the script's own folder, and the call
//! blocks until the process exits. Every completed run records a history
//! timestamp regardless of exit code; failures never propagate past this
//! boundary.

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::sync::Arc;
use tracing::{debug, info, instrument, warn};

use crate::history::HistoryStore;

/// One interpreter invocation: the binary plus its leading arguments.
/// The script path is appended as the final argument.
#[derive(Clone, Debug)]
pub struct InterpreterSpec {
    pub program: String,
    pub args: Vec<String>,
}

impl InterpreterSpec {
    pub fn new(program: &str, args: &[&str]) -> Self {
        InterpreterSpec {
            program: program.to_string(),
            args: args.iter().map(|a| a.to_string()).collect(),
        }
    }
}

/// Dispatch table from lowercased extension to interpreter invocation.
///
/// Passed explicitly to the executor so tests (and other platforms) can
/// substitute their own interpreters.
#[derive(Clone, Debug, Default)]
pub struct InterpreterTable {
    specs: HashMap<String, InterpreterSpec>,
}

impl InterpreterTable {
    pub fn empty() -> Self {
        InterpreterTable {
            specs: HashMap::new(),
        }
    }

    /// The standard Windows dispatch set: `cscript` for VBScript, the
    /// command shell for batch files, PowerShell with an execution-policy
    /// bypass for `.ps1`.
    pub fn standard() -> Self {
        let mut table = Self::empty();
        table.insert("vbs", InterpreterSpec::new("cscript.exe", &[]));
        table.insert("bat", InterpreterSpec::new("cmd.exe", &["/c"]));
        table.insert("cmd", InterpreterSpec::new("cmd.exe", &["/c"]));
        table.insert(
            "ps1",
            InterpreterSpec::new("powershell.exe", &["-ExecutionPolicy", "Bypass", "-File"]),
        );
        table
    }

    pub fn insert(&mut self, extension: &str, spec: InterpreterSpec) {
        self.specs.insert(extension.to_ascii_lowercase(), spec);
    }

    /// Look up the interpreter for a path by its extension,
    /// case-insensitively.
    pub fn spec_for(&self, path: &Path) -> Option<&InterpreterSpec> {
        let ext = path.extension()?.to_str()?.to_ascii_lowercase();
        self.specs.get(&ext)
    }
}

/// Outcome of one execution attempt.
#[derive(Clone, Debug)]
pub struct ExecutionReport {
    /// True only when the process ran and exited with code 0
    pub success: bool,
    /// Exit code when the process actually ran
    pub exit_code: Option<i32>,
    /// Timestamp written to history; set whenever the process ran,
    /// independent of its exit code
    pub recorded: Option<DateTime<Utc>>,
    /// Human-readable status for the caller
    pub detail: String,
}

impl ExecutionReport {
    fn failed(detail: String) -> Self {
        ExecutionReport {
            success: false,
            exit_code: None,
            recorded: None,
            detail,
        }
    }
}

/// Runs scripts through their interpreters and records execution history.
pub struct Executor {
    table: InterpreterTable,
    history: Arc<Mutex<HistoryStore>>,
}

impl Executor {
    pub fn new(table: InterpreterTable, history: Arc<Mutex<HistoryStore>>) -> Self {
        Executor { table, history }
    }

    /// Execute a script and wait for it to exit.
    ///
    /// Returns a failed report (never an error) when the file is missing,
    /// the extension is unrecognized, the interpreter cannot be resolved,
    /// or the spawn/wait fails. A history timestamp is recorded whenever
    /// the process actually ran, independent of its exit code.
    #[instrument(name = "execute_script", skip(self), fields(path = %path.display()))]
    pub fn execute(&self, path: &Path) -> ExecutionReport {
        if !path.is_file() {
            debug!("Script file does not exist");
            return ExecutionReport::failed(format!("Script not found: {}", path.display()));
        }

        let Some(spec) = self.table.spec_for(path) else {
            debug!("Unrecognized script extension");
            return ExecutionReport::failed(format!(
                "Unrecognized script type: {}",
                path.display()
            ));
        };

        let program = match which::which(&spec.program) {
            Ok(resolved) => resolved,
            Err(e) => {
                warn!(interpreter = %spec.program, error = %e, "Interpreter not found");
                return ExecutionReport::failed(format!(
                    "Interpreter '{}' not found",
                    spec.program
                ));
            }
        };

        let working_dir = path
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_else(|| PathBuf::from("."));

        let output = Command::new(&program)
            .args(&spec.args)
            .arg(path)
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .stdin(Stdio::null())
            .current_dir(&working_dir)
            .output();

        let output = match output {
            Ok(output) => output,
            Err(e) => {
                warn!(interpreter = %program.display(), error = %e, "Process failed to start");
                return ExecutionReport::failed(format!("Could not start process: {}", e));
            }
        };

        // The process ran: record the timestamp no matter how it exited
        let completed = Utc::now();
        self.history.lock().record_execution(path, completed);

        let exit_code = output.status.code();
        let success = exit_code == Some(0);
        info!(
            exit_code = ?exit_code,
            success = success,
            stdout_bytes = output.stdout.len(),
            stderr_bytes = output.stderr.len(),
            "Script finished"
        );

        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| path.display().to_string());
        let detail = if success {
            format!("Script {} executed successfully", name)
        } else {
            format!("Script {} execution failed", name)
        };
        ExecutionReport {
            success,
            exit_code,
            recorded: Some(completed),
            detail,
        }
    }
}
