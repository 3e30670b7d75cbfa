//! DocQA CLI
//!
//! Main entry point for the docqa command-line tool.
//! Manages the document knowledge store: ingestion, retrieval and upkeep.

mod commands;

use clap::{Parser, Subcommand};
use commands::{
    ChunksCommand, ClearCommand, ExportCommand, IngestCommand, RandomCommand, RebuildCommand,
    RemoveCommand, SearchCommand, SourcesCommand, StatsCommand, StatusCommand, TextCommand,
};
use docqa_core::{config::AppConfig, logging, AppResult, LogFormat};
use std::path::PathBuf;

/// DocQA - document knowledge store for chat and quiz generation
#[derive(Parser, Debug)]
#[command(name = "docqa")]
#[command(about = "Document knowledge store for chat and quiz generation", long_about = None)]
#[command(version)]
struct Cli {
    /// Path to workspace directory (default: current directory)
    #[arg(short, long, global = true, env = "DOCQA_WORKSPACE")]
    workspace: Option<PathBuf>,

    /// Path to config file
    #[arg(short, long, global = true, env = "DOCQA_CONFIG")]
    config: Option<PathBuf>,

    /// Log level (error, warn, info, debug, trace)
    #[arg(long, global = true, env = "RUST_LOG")]
    log_level: Option<String>,

    /// Log output format (pretty, json)
    #[arg(long, global = true, env = "DOCQA_LOG_FORMAT")]
    log_format: Option<LogFormat>,

    /// Enable verbose output (sets log level to debug)
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Disable colored output
    #[arg(long, global = true, env = "NO_COLOR")]
    no_color: bool,

    /// Embedding provider (mock, ollama, openai)
    #[arg(short = 'p', long, global = true, env = "DOCQA_EMBEDDING_PROVIDER")]
    embedding_provider: Option<String>,

    /// Embedding model identifier
    #[arg(short = 'm', long, global = true, env = "DOCQA_EMBEDDING_MODEL")]
    embedding_model: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Ingest PDF, TXT and DOCX files or directories
    Ingest(IngestCommand),

    /// Ingest raw text as a new source
    Text(TextCommand),

    /// Similarity search over the knowledge store
    Search(SearchCommand),

    /// Print one random context passage
    Random(RandomCommand),

    /// Dump every chunk of the selected sources
    Chunks(ChunksCommand),

    /// List processed sources
    Sources(SourcesCommand),

    /// Show knowledge store statistics
    Stats(StatsCommand),

    /// Remove a source by content hash
    Remove(RemoveCommand),

    /// Rebuild the vector index from the document list
    Rebuild(RebuildCommand),

    /// Delete all documents, metadata and the index
    Clear(ClearCommand),

    /// Export documents and stats as JSON
    Export(ExportCommand),

    /// Show preload and consistency status
    Status(StatusCommand),
}

impl Commands {
    fn name(&self) -> &'static str {
        match self {
            Commands::Ingest(_) => "ingest",
            Commands::Text(_) => "text",
            Commands::Search(_) => "search",
            Commands::Random(_) => "random",
            Commands::Chunks(_) => "chunks",
            Commands::Sources(_) => "sources",
            Commands::Stats(_) => "stats",
            Commands::Remove(_) => "remove",
            Commands::Rebuild(_) => "rebuild",
            Commands::Clear(_) => "clear",
            Commands::Export(_) => "export",
            Commands::Status(_) => "status",
        }
    }
}

#[tokio::main]
async fn main() -> AppResult<()> {
    // Parse command-line arguments first (needed for logging config)
    let cli = Cli::parse();

    // Load base configuration from environment and config file
    let config = AppConfig::load()?;

    // Apply CLI overrides
    let mut config = config.with_overrides(
        cli.workspace,
        cli.config,
        cli.embedding_provider,
        cli.embedding_model,
        cli.log_level,
        cli.verbose,
        cli.no_color,
    );
    if let Some(format) = cli.log_format {
        config.log_format = format;
    }

    // Initialize logging with final configuration
    logging::init_logging(config.log_level.as_deref(), config.log_format, config.no_color)?;

    tracing::info!("DocQA CLI starting");
    tracing::debug!("Workspace: {:?}", config.workspace);
    tracing::debug!(
        "Embedding provider override: {:?}, model override: {:?}",
        config.embedding_provider,
        config.embedding_model
    );

    let _span = tracing::info_span!("command", name = cli.command.name()).entered();

    // Route to command handlers
    let result = match cli.command {
        Commands::Ingest(cmd) => cmd.execute(&config).await,
        Commands::Text(cmd) => cmd.execute(&config).await,
        Commands::Search(cmd) => cmd.execute(&config).await,
        Commands::Random(cmd) => cmd.execute(&config).await,
        Commands::Chunks(cmd) => cmd.execute(&config).await,
        Commands::Sources(cmd) => cmd.execute(&config).await,
        Commands::Stats(cmd) => cmd.execute(&config).await,
        Commands::Remove(cmd) => cmd.execute(&config).await,
        Commands::Rebuild(cmd) => cmd.execute(&config).await,
        Commands::Clear(cmd) => cmd.execute(&config).await,
        Commands::Export(cmd) => cmd.execute(&config).await,
        Commands::Status(cmd) => cmd.execute(&config).await,
    };

    match &result {
        Ok(_) => tracing::info!("Command completed successfully"),
        Err(e) => tracing::error!("Command failed: {}", e),
    }

    result
}
