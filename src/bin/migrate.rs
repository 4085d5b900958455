//! Maintenance binary: drive the migration engine against the workspace
//! database from the command line.
//!
//! Usage:
//!   captureos-migrate <status|preview|cleanup|migrate|rollback> [--db <path>]
//!
//! Defaults to `~/.captureos/capture.db`. Results print as pretty JSON so
//! the output can be piped into support tooling.

use std::path::PathBuf;
use std::process::ExitCode;

use captureos::MigrationEngine;

fn usage() -> ExitCode {
    eprintln!("usage: captureos-migrate <status|preview|cleanup|migrate|rollback> [--db <path>]");
    ExitCode::FAILURE
}

fn main() -> ExitCode {
    env_logger::init();

    let args: Vec<String> = std::env::args().skip(1).collect();
    let Some(command) = args.first().map(String::as_str) else {
        return usage();
    };

    let db_path: Option<PathBuf> = match args.iter().position(|a| a == "--db") {
        Some(i) => match args.get(i + 1) {
            Some(p) => Some(PathBuf::from(p)),
            None => return usage(),
        },
        None => None,
    };

    let engine = match db_path {
        Some(path) => MigrationEngine::open_at(path),
        None => MigrationEngine::open(),
    };
    let engine = match engine {
        Ok(e) => e,
        Err(e) => {
            eprintln!("failed to open database: {}", e.public_message());
            return ExitCode::FAILURE;
        }
    };

    // Print phase transitions as they happen; the channel outlives the
    // operation, so the printer thread drains and exits on disconnect.
    let (_token, rx) = engine.subscribe_progress();
    let printer = std::thread::spawn(move || {
        for event in rx {
            match event.measure {
                Some(n) => eprintln!("  [{}] {} ({})", event.attempt_id, event.phase.as_str(), n),
                None => eprintln!("  [{}] {}", event.attempt_id, event.phase.as_str()),
            }
        }
    });

    let exit = match command {
        "status" => print_json(engine.status()),
        "preview" => print_json(engine.preview_cleanup()),
        "cleanup" => print_json(engine.run_cleanup()),
        "migrate" => {
            let result = engine.run_migration();
            let ok = result.success;
            print_serialized(&result);
            if ok {
                ExitCode::SUCCESS
            } else {
                ExitCode::FAILURE
            }
        }
        "rollback" => {
            let result = engine.rollback_migration();
            let ok = result.success;
            print_serialized(&result);
            if ok {
                ExitCode::SUCCESS
            } else {
                ExitCode::FAILURE
            }
        }
        _ => usage(),
    };

    drop(engine);
    let _ = printer.join();
    exit
}

fn print_json<T: serde::Serialize>(
    result: Result<T, captureos::MigrationError>,
) -> ExitCode {
    match result {
        Ok(value) => {
            print_serialized(&value);
            ExitCode::SUCCESS
        }
        Err(e) => {
            eprintln!("error: {}", e.public_message());
            ExitCode::FAILURE
        }
    }
}

fn print_serialized<T: serde::Serialize>(value: &T) {
    match serde_json::to_string_pretty(value) {
        Ok(json) => println!("{}", json),
        Err(e) => eprintln!("failed to serialize result: {}", e),
    }
}
