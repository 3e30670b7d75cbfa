//! Store maintenance: removal, rebuild, clear, export, status.

use clap::Args;
use docqa_core::{config::AppConfig, AppError, AppResult};
use std::path::PathBuf;

use super::print_json;

/// Remove a source
#[derive(Args, Debug)]
pub struct RemoveCommand {
    /// Content hash of the source (see `docqa sources`)
    pub hash: String,

    /// Leave the index stale instead of rebuilding it
    #[arg(long)]
    pub no_rebuild: bool,
}

impl RemoveCommand {
    pub async fn execute(&self, config: &AppConfig) -> AppResult<()> {
        tracing::info!("Executing remove command for {}", self.hash);

        let mut store = docqa_knowledge::open_workspace(config).await?;
        if !store.remove_source(&self.hash) {
            return Err(AppError::Knowledge(format!("Unknown source: {}", self.hash)));
        }
        println!("Removed source {}", self.hash);

        if store.needs_rebuild() {
            if self.no_rebuild {
                println!("Index is stale; run `docqa rebuild` to drop the removed chunks.");
            } else if store.rebuild_index().await {
                println!("Rebuilt index ({} chunks)", store.documents().len());
            } else {
                return Err(AppError::Knowledge(
                    "Source removed but the index could not be rebuilt".to_string(),
                ));
            }
        }
        Ok(())
    }
}

/// Rebuild the index
#[derive(Args, Debug)]
pub struct RebuildCommand {}

impl RebuildCommand {
    pub async fn execute(&self, config: &AppConfig) -> AppResult<()> {
        tracing::info!("Executing rebuild command");

        let mut store = docqa_knowledge::open_workspace(config).await?;
        if store.rebuild_index().await {
            println!("Rebuilt index ({} chunks)", store.documents().len());
            Ok(())
        } else {
            Err(AppError::Knowledge(
                "Index not rebuilt (no documents or embedding model unavailable)".to_string(),
            ))
        }
    }
}

/// Clear everything
#[derive(Args, Debug)]
pub struct ClearCommand {
    /// Confirm deletion of all documents, metadata and the index
    #[arg(long)]
    pub yes: bool,
}

impl ClearCommand {
    pub async fn execute(&self, config: &AppConfig) -> AppResult<()> {
        tracing::info!("Executing clear command");

        if !self.yes {
            return Err(AppError::Other(
                "Refusing to clear without --yes".to_string(),
            ));
        }

        let mut store = docqa_knowledge::open_workspace(config).await?;
        if store.clear_all() {
            println!("Knowledge store cleared");
            Ok(())
        } else {
            Err(AppError::Knowledge(
                "Knowledge store only partially cleared; see logs".to_string(),
            ))
        }
    }
}

/// Export as JSON
#[derive(Args, Debug)]
pub struct ExportCommand {
    /// Output file
    pub output: PathBuf,
}

impl ExportCommand {
    pub async fn execute(&self, config: &AppConfig) -> AppResult<()> {
        tracing::info!("Executing export command");

        let store = docqa_knowledge::open_workspace(config).await?;
        store.export_to_file(&self.output)?;
        println!(
            "Exported {} chunks to {}",
            store.documents().len(),
            self.output.display()
        );
        Ok(())
    }
}

/// Preload and consistency status
#[derive(Args, Debug)]
pub struct StatusCommand {
    /// Also probe the embedding backend
    #[arg(long)]
    pub probe: bool,

    /// Output as JSON
    #[arg(long)]
    pub json: bool,
}

impl StatusCommand {
    pub async fn execute(&self, config: &AppConfig) -> AppResult<()> {
        tracing::info!("Executing status command");

        let store = docqa_knowledge::open_workspace(config).await?;
        let status = store.preload_status();
        let consistency = store.check_consistency().err().map(|e| e.to_string());
        let embedder_ready = if self.probe {
            Some(store.embedder().is_ready().await)
        } else {
            None
        };

        if self.json {
            return print_json(&serde_json::json!({
                "status": status,
                "consistencyError": consistency,
                "embedderReady": embedder_ready,
                "embeddingProvider": store.config().embedding.provider,
                "embeddingModel": store.embedder().model().await,
            }));
        }

        println!("Preloaded: {}", status.is_preloaded);
        println!("Needs rebuild: {}", status.needs_rebuild);
        println!("In-memory chunks: {}", status.in_memory_chunks);
        println!("Indexed chunks: {}", status.indexed_chunks);
        println!(
            "Embedding: {} / {}",
            store.config().embedding.provider,
            store.embedder().model().await
        );
        if let Some(ready) = embedder_ready {
            println!("Embedder ready: {}", ready);
        }
        match consistency {
            None => println!("Consistency: ok"),
            Some(err) => println!("Consistency: {}", err),
        }
        Ok(())
    }
}
