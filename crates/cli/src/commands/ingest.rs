//! Ingestion command handlers.

use clap::Args;
use docqa_core::{config::AppConfig, AppError, AppResult};
use docqa_knowledge::IngestResult;
use std::io::Read;
use std::path::PathBuf;

use super::print_json;

/// Ingest files or directories
#[derive(Args, Debug)]
pub struct IngestCommand {
    /// Files or directories to ingest
    #[arg(required = true)]
    pub paths: Vec<PathBuf>,

    /// Skip paths containing this pattern (repeatable)
    #[arg(long)]
    pub exclude: Vec<String>,

    /// Output as JSON
    #[arg(long)]
    pub json: bool,
}

impl IngestCommand {
    pub async fn execute(&self, config: &AppConfig) -> AppResult<()> {
        tracing::info!("Executing ingest command for {} paths", self.paths.len());

        let files = docqa_knowledge::collect_files(&self.paths, &self.exclude)?;
        if files.is_empty() {
            return Err(AppError::Knowledge(
                "No supported files found (pdf, txt, docx)".to_string(),
            ));
        }

        let mut store = docqa_knowledge::open_workspace(config).await?;
        let result = store.ingest_files(&files).await;

        if self.json {
            print_json(&result)?;
        } else {
            print_ingest_result(&result);
        }

        if result.success {
            Ok(())
        } else {
            Err(AppError::Knowledge(result.message))
        }
    }
}

fn print_ingest_result(result: &IngestResult) {
    println!("{}", result.message);
    if !result.skipped_names.is_empty() {
        println!("Skipped (already processed): {}", result.skipped_names.join(", "));
    }
    if !result.failed_names.is_empty() {
        println!("Failed: {}", result.failed_names.join(", "));
    }
    if let Some(error) = &result.error {
        println!("Error: {}", error);
    }
}

/// Ingest raw text as a new source
#[derive(Args, Debug)]
pub struct TextCommand {
    /// Display name of the text source
    #[arg(short, long)]
    pub name: String,

    /// Text to ingest; "-" reads stdin
    pub text: String,
}

impl TextCommand {
    pub async fn execute(&self, config: &AppConfig) -> AppResult<()> {
        tracing::info!("Executing text command for source '{}'", self.name);

        let text = if self.text == "-" {
            let mut buf = String::new();
            std::io::stdin().read_to_string(&mut buf)?;
            buf
        } else {
            self.text.clone()
        };

        let mut store = docqa_knowledge::open_workspace(config).await?;
        if !store.ingest_text(&text, &self.name).await {
            return Err(AppError::Knowledge(format!(
                "Failed to process text source '{}'",
                self.name
            )));
        }

        let stats = store.get_stats();
        println!(
            "Processed text source '{}' ({} chunks in store)",
            self.name, stats.chunk_count
        );
        Ok(())
    }
}
