//! Command-line front end for the script catalog engine.

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::process::ExitCode;

use script_shelf::executor::InterpreterTable;
use script_shelf::service::ScriptService;
use script_shelf::settings::FolderConfig;
use script_shelf::watcher::CatalogEvent;
use script_shelf::{logging, ShelfError};

#[derive(Parser)]
#[command(name = "script-shelf", about = "Catalog and run scripts from a folder")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// List all known scripts, ordered by name
    List,
    /// List scripts grouped by folder
    Groups,
    /// Execute a script and wait for it to finish
    Run { path: PathBuf },
    /// Delete a script file
    Delete { path: PathBuf },
    /// Change the scripts root folder
    SetFolder { path: PathBuf },
    /// Watch the scripts folder and print catalog changes
    Watch,
}

fn main() -> ExitCode {
    let _guard = logging::init();
    let cli = Cli::parse();

    let config = FolderConfig::load();
    let mut service = ScriptService::new(config, InterpreterTable::standard());

    match cli.command {
        Command::List => {
            for entry in service.list_scripts() {
                println!(
                    "{:<30} {:>10}  {}  [{}]",
                    entry.name,
                    entry.file_size_display(),
                    entry.last_executed_display(),
                    entry.display_folder()
                );
            }
            println!("{}", service.status_message());
            ExitCode::SUCCESS
        }
        Command::Groups => {
            for group in service.grouped_scripts() {
                println!("{} ({} scripts)", group.name, group.len());
                for entry in &group.scripts {
                    println!("  {}", entry.name);
                }
            }
            ExitCode::SUCCESS
        }
        Command::Run { path } => {
            let success = service.execute(&path);
            println!("{}", service.status_message());
            if success {
                ExitCode::SUCCESS
            } else {
                ExitCode::FAILURE
            }
        }
        Command::Delete { path } => {
            let deleted = service.delete(&path);
            println!("{}", service.status_message());
            if deleted {
                ExitCode::SUCCESS
            } else {
                ExitCode::FAILURE
            }
        }
        Command::SetFolder { path } => match service.set_folder(&path) {
            Ok(()) => {
                println!("Scripts folder is now {}", path.display());
                println!("{}", service.status_message());
                ExitCode::SUCCESS
            }
            Err(ShelfError::FolderNotFound(p)) => {
                eprintln!("Folder does not exist: {}", p.display());
                ExitCode::FAILURE
            }
            Err(e) => {
                eprintln!("{}", e);
                ExitCode::FAILURE
            }
        },
        Command::Watch => {
            let rx = service.subscribe();
            if let Err(e) = service.start_watching() {
                eprintln!("Could not start watcher: {}", e);
                return ExitCode::FAILURE;
            }
            println!(
                "Watching {} (Ctrl-C to stop)",
                service.current_folder().display()
            );
            while let Ok(event) = rx.recv() {
                match event {
                    CatalogEvent::ScriptAdded(entry) => {
                        println!("+ {} [{}]", entry.name, entry.display_folder())
                    }
                    CatalogEvent::ScriptRemoved(path) => println!("- {}", path.display()),
                    CatalogEvent::FolderDeleted(path) => {
                        println!("x folder {}", path.display())
                    }
                }
            }
            ExitCode::SUCCESS
        }
    }
}
