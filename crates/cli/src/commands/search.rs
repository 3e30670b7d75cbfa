//! Retrieval command handlers.

use clap::Args;
use docqa_core::{config::AppConfig, AppError, AppResult};
use docqa_knowledge::{RetrievalConfig, Retriever};

use super::print_json;

/// Open the workspace store behind a retriever, with the configured
/// retrieval defaults.
async fn open_retriever(
    config: &AppConfig,
    seed: Option<u64>,
) -> AppResult<(Retriever, RetrievalConfig)> {
    let store = docqa_knowledge::open_workspace(config).await?;
    let defaults = store.config().retrieval.clone();
    let shared = store.into_shared();
    let retriever = match seed {
        Some(seed) => Retriever::with_seed(shared, seed),
        None => Retriever::new(shared),
    };
    Ok((retriever, defaults))
}

/// Similarity search
#[derive(Args, Debug)]
pub struct SearchCommand {
    /// Query text
    pub query: String,

    /// Number of chunks to retrieve (default from config)
    #[arg(short = 'k', long)]
    pub top_k: Option<usize>,

    /// Restrict to these source hashes (repeatable; "all" for every source)
    #[arg(short, long)]
    pub source: Vec<String>,

    /// Output as JSON
    #[arg(long)]
    pub json: bool,
}

impl SearchCommand {
    pub async fn execute(&self, config: &AppConfig) -> AppResult<()> {
        tracing::info!("Executing search command");

        let (retriever, defaults) = open_retriever(config, None).await?;
        let k = self.top_k.unwrap_or(defaults.default_k);
        let hits = retriever.similarity_search(&self.query, k, &self.source).await;

        if self.json {
            return print_json(&hits);
        }

        if hits.is_empty() {
            println!("No results.");
            return Ok(());
        }
        for (rank, hit) in hits.iter().enumerate() {
            println!(
                "{}. [{:.3}] {} (chunk {})",
                rank + 1,
                hit.relevance_score,
                hit.metadata.source_name,
                hit.metadata.chunk_index
            );
            println!("{}", hit.content.trim());
            println!();
        }
        Ok(())
    }
}

/// Random context passage
#[derive(Args, Debug)]
pub struct RandomCommand {
    /// Preferred minimum length in characters (default from config)
    #[arg(long)]
    pub min_length: Option<usize>,

    /// Restrict to these source hashes (repeatable)
    #[arg(short, long)]
    pub source: Vec<String>,

    /// Seed for reproducible selection
    #[arg(long)]
    pub seed: Option<u64>,
}

impl RandomCommand {
    pub async fn execute(&self, config: &AppConfig) -> AppResult<()> {
        tracing::info!("Executing random command");

        let (retriever, defaults) = open_retriever(config, self.seed).await?;
        let min_length = self.min_length.unwrap_or(defaults.min_context_length);

        match retriever.get_random_context(min_length, &self.source).await {
            Some(context) => {
                println!("{}", context);
                Ok(())
            }
            None => Err(AppError::Knowledge(
                "No documents available for context".to_string(),
            )),
        }
    }
}

/// Dump chunks
#[derive(Args, Debug)]
pub struct ChunksCommand {
    /// Restrict to these source hashes (repeatable)
    #[arg(short, long)]
    pub source: Vec<String>,

    /// Output as JSON
    #[arg(long)]
    pub json: bool,
}

impl ChunksCommand {
    pub async fn execute(&self, config: &AppConfig) -> AppResult<()> {
        tracing::info!("Executing chunks command");

        let (retriever, _) = open_retriever(config, None).await?;
        let chunks = retriever.get_all_chunks(&self.source).await;

        if self.json {
            return print_json(&chunks);
        }

        for chunk in &chunks {
            println!(
                "--- {} #{} ---",
                chunk.metadata.source_name, chunk.metadata.chunk_index
            );
            println!("{}", chunk.content);
        }
        println!("{} chunks", chunks.len());
        Ok(())
    }
}
