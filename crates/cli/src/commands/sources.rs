//! Source listing and statistics.

use clap::Args;
use docqa_core::{config::AppConfig, AppResult};

use super::print_json;

/// List processed sources
#[derive(Args, Debug)]
pub struct SourcesCommand {
    /// Output as JSON
    #[arg(long)]
    pub json: bool,
}

impl SourcesCommand {
    pub async fn execute(&self, config: &AppConfig) -> AppResult<()> {
        tracing::info!("Executing sources command");

        let store = docqa_knowledge::open_workspace(config).await?;
        let sources = store.list_sources();

        if self.json {
            return print_json(&sources);
        }

        if sources.is_empty() {
            println!("No sources processed yet.");
            return Ok(());
        }
        for source in &sources {
            println!(
                "{}  {}  {}  {} chunks  {:.2} MB  {}",
                source.content_hash,
                source.filename,
                source.file_type,
                source.chunk_count,
                source.size_mb(),
                source.processed_at.format("%Y-%m-%d %H:%M")
            );
        }
        Ok(())
    }
}

/// Show statistics
#[derive(Args, Debug)]
pub struct StatsCommand {
    /// Output as JSON
    #[arg(long)]
    pub json: bool,
}

impl StatsCommand {
    pub async fn execute(&self, config: &AppConfig) -> AppResult<()> {
        tracing::info!("Executing stats command");

        let store = docqa_knowledge::open_workspace(config).await?;
        let stats = store.get_stats();

        if self.json {
            return print_json(&stats);
        }

        println!("Knowledge Store Statistics");
        println!("  Documents: {}", stats.doc_count);
        println!("  Chunks: {}", stats.chunk_count);
        println!("  Total characters: {}", stats.total_chars);
        println!("  Average chunk size: {}", stats.avg_chunk_size);
        if !stats.source_names.is_empty() {
            println!("  Sources: {}", stats.source_names.join(", "));
        }
        Ok(())
    }
}
