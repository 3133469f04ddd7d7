// Copyright (c) 2025-present, clustertree-core authors
// Licensed under the MIT license or the Apache License, Version 2.0, at
// your option.

//! CLI tool for inspecting a database file.

mod inspect;

use clap::{ArgAction, Parser, Subcommand};
use clustertree_core::Config;
use std::path::PathBuf;
use std::process::ExitCode;

macro_rules! die {
    ($fmt:literal, $($arg:tt)*) => {{
        eprintln!($fmt, $($arg)*);
        return ExitCode::FAILURE;
    }};

    ($fmt:literal) => {{
        eprintln!($fmt);
        return ExitCode::FAILURE;
    }};
}

/// CLI tool for inspecting a database file.
#[derive(Parser, Debug)]
#[command(name = "inspect")]
#[command(about = "Read-only inspector for a database file")]
struct ToolArgs {
    /// Suppress all output except for errors. This overrides the -v flag.
    #[arg(short, long, global = true)]
    quiet: bool,

    /// Turn on verbose output. Supply -v multiple times to increase verbosity.
    #[arg(short, long, action = ArgAction::Count, global = true)]
    verbose: u8,

    /// Path to the database file.
    db_path: PathBuf,

    /// Command to run.
    #[command(subcommand)]
    command: ToolCommand,
}

#[derive(Subcommand, Debug, Clone)]
enum ToolCommand {
    /// Print the current version and table count.
    Info,
    /// List every table, with column and row counts.
    Tables,
    /// Print one table's column types.
    Schema {
        /// The table to inspect.
        table: String,
    },
    /// Print one table's row count.
    Count {
        /// The table to inspect.
        table: String,
    },
}

fn init_logging(quiet: bool, verbose: u8) {
    let level = if quiet {
        log::LevelFilter::Error
    } else {
        match verbose {
            0 => log::LevelFilter::Warn,
            1 => log::LevelFilter::Info,
            2 => log::LevelFilter::Debug,
            _ => log::LevelFilter::Trace,
        }
    };

    env_logger::Builder::new().filter_level(level).format_timestamp(None).init();
}

fn main() -> ExitCode {
    let args = ToolArgs::parse();
    init_logging(args.quiet, args.verbose);

    let db = match Config::new(&args.db_path).read_only(true).create_if_missing(false).open() {
        Ok(db) => db,
        Err(e) => die!("failed to open {}: {e}", args.db_path.display()),
    };

    let result = match &args.command {
        ToolCommand::Info => inspect::print_info(&db),
        ToolCommand::Tables => inspect::print_tables(&db),
        ToolCommand::Schema { table } => inspect::print_schema(&db, table),
        ToolCommand::Count { table } => inspect::print_count(&db, table),
    };

    if let Err(e) = result {
        die!("{e}");
    }

    ExitCode::SUCCESS
}
