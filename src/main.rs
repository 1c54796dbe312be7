//! Continuity CLI
//!
//! Talks to a chat-completion model with a persisted shared-memory document.

use clap::{Parser, Subcommand};
use continuity::config::{continuity_home, CONFIG_FILE_NAME};
use continuity::{ContinuityAgent, ContinuityConfig, ContinuityStore, Entry, EntryQuery, TimeRange};
use std::path::PathBuf;
use tracing::info;
use tracing_subscriber::EnvFilter;

/// Continuity - shared memory for chat-completion conversations
#[derive(Parser, Debug)]
#[command(name = "continuity")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Config file (default: ~/.continuity/config.toml)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Path to the continuity document
    #[arg(long, global = true)]
    document: Option<PathBuf>,

    /// Chat model override
    #[arg(long, global = true)]
    model: Option<String>,

    /// Verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Send a message; tool calls in the reply update or query the document
    Chat {
        #[arg(trailing_var_arg = true, required = true)]
        message: Vec<String>,
    },
    /// Show summary, participants and archive size
    Status,
    /// Search entries
    Query {
        query: String,
        /// recent, all or archived
        #[arg(long, default_value_t = TimeRange::Recent)]
        range: TimeRange,
    },
    /// Move entries beyond the keep bound into the archive now
    Archive,
    /// Remove a stale document lock
    Unlock,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    let config = resolve_config(&cli).await?;
    info!("Document: {}", config.document_path.display());

    match cli.command {
        Command::Chat { message } => run_chat(&config, &message.join(" ")).await,
        Command::Status => run_status(&config).await,
        Command::Query { query, range } => run_query(&config, &query, range).await,
        Command::Archive => run_archive(&config).await,
        Command::Unlock => {
            let store = ContinuityStore::from_config(&config);
            if store.force_unlock().await? {
                println!("Removed lock {}", store.lock_path().display());
            } else {
                println!("No lock present");
            }
            Ok(())
        }
    }
}

fn init_logging(verbose: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        if verbose {
            EnvFilter::new("debug")
        } else {
            EnvFilter::new("info")
        }
    });

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}

async fn resolve_config(cli: &Cli) -> anyhow::Result<ContinuityConfig> {
    let config_path = match &cli.config {
        Some(path) => path.clone(),
        None => continuity_home()?.join(CONFIG_FILE_NAME),
    };

    let mut config = ContinuityConfig::load_file(&config_path).await?;
    if let Some(document) = &cli.document {
        config = config.with_document_path(document.clone());
    }
    if let Some(model) = &cli.model {
        config = config.with_model(model.clone());
    }
    Ok(config)
}

async fn run_chat(config: &ContinuityConfig, message: &str) -> anyhow::Result<()> {
    let agent = ContinuityAgent::from_config(config)?;
    let outcome = agent.exchange(message).await?;

    for tool in &outcome.tool_outcomes {
        let marker = if tool.is_success() { "ok" } else { "failed" };
        eprintln!("[{} {}] {}", tool.tool, marker, tool.to_content());
    }
    println!("{}", outcome.content);
    Ok(())
}

async fn run_status(config: &ContinuityConfig) -> anyhow::Result<()> {
    let store = ContinuityStore::from_config(config);
    let (summary, document) = store.load().await?;
    let archived = store.archive().count().await?;

    println!("Summary: {}", summary);
    println!(
        "Entries: {} live, {} archived (~{} tokens)",
        document.entries.len(),
        archived,
        document.estimated_tokens
    );
    for p in &document.participants {
        println!("Participant: {} ({}), last active {}", p.model, p.role, p.last_active);
    }
    Ok(())
}

async fn run_query(config: &ContinuityConfig, query: &str, range: TimeRange) -> anyhow::Result<()> {
    let store = ContinuityStore::from_config(config);
    let query = EntryQuery::parse(query)?;
    let results = store.search(&query, range).await?;

    if results.is_empty() {
        println!("No results");
        return Ok(());
    }
    for entry in &results {
        println!("{}", format_entry(entry));
    }
    Ok(())
}

async fn run_archive(config: &ContinuityConfig) -> anyhow::Result<()> {
    let store = ContinuityStore::from_config(config);
    let _lock = store.lock().await?;
    let (_, mut document) = store.load().await?;
    let moved = store.archive_now(&mut document).await?;
    println!(
        "Archived {} entries ({} remain live)",
        moved,
        document.entries.len()
    );
    Ok(())
}

fn format_entry(entry: &Entry) -> String {
    let mut line = format!("[{}] {}", entry.timestamp, entry.emotional_tone);
    if !entry.key_understandings.is_empty() {
        line.push_str(&format!(" | understandings: {}", entry.key_understandings.join("; ")));
    }
    if !entry.open_threads.is_empty() {
        line.push_str(&format!(" | open: {}", entry.open_threads.join("; ")));
    }
    line
}
