//! Command handlers for the DocQA CLI.
//!
//! Each subcommand opens the workspace knowledge store, runs one operation
//! and prints the outcome (plain text or `--json`).

pub mod ingest;
pub mod maintenance;
pub mod search;
pub mod sources;

// Re-export command types for convenience
pub use ingest::{IngestCommand, TextCommand};
pub use maintenance::{ClearCommand, ExportCommand, RebuildCommand, RemoveCommand, StatusCommand};
pub use search::{ChunksCommand, RandomCommand, SearchCommand};
pub use sources::{SourcesCommand, StatsCommand};

use docqa_core::AppResult;
use serde::Serialize;

/// Print a value as pretty JSON on stdout.
pub(crate) fn print_json<T: Serialize>(value: &T) -> AppResult<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}
