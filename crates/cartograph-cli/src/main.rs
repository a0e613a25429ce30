//! Cartograph CLI - compile CLI extraction artifacts into a knowledge graph

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::anyhow;
use clap::{Parser, Subcommand};

use cartograph_core::compile::{CompileOptions, compile};
use cartograph_core::config::Config;
use cartograph_core::llm::{LlmClient, LlmFieldMapper};
use cartograph_core::matcher::cache::MappingCache;
use cartograph_core::matcher::fallback::FallbackResolver;
use cartograph_core::scan::{NullScanner, RubyModelScanner, SummarySourceScanner};
use cartograph_core::storage::{Database, DatabaseConfig, default_database_path};

#[derive(Parser)]
#[command(name = "cartograph")]
#[command(author, version, about = "Compile CLI extraction artifacts into a SQLite knowledge graph", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Database path (defaults to the platform data directory)
    #[arg(long, global = true)]
    db: Option<PathBuf>,

    /// Quiet mode (minimal output)
    #[arg(short, long, global = true)]
    quiet: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Compile artifacts and schema maps into the knowledge graph
    Compile {
        /// Directory of command artifact JSON files
        #[arg(long)]
        artifacts: PathBuf,
        /// Path to resource_map.json
        #[arg(long)]
        resource_map: PathBuf,
        /// Path to summary_map.json (missing file means no summaries)
        #[arg(long)]
        summary_map: PathBuf,
        /// CLI repo checkout for summarize endpoint sniffing
        #[arg(long)]
        cli_root: Option<PathBuf>,
        /// Server repo checkout for summary dimension scanning
        #[arg(long)]
        server_root: Option<PathBuf>,
        /// Maximum relationship hops for filter path resolution
        #[arg(long)]
        max_hops: Option<usize>,
        /// Use LLM fallback to map unmapped flags to resource fields
        #[arg(long)]
        llm: bool,
        /// Model name for LLM fallback
        #[arg(long)]
        llm_model: Option<String>,
        /// Number of parallel LLM workers
        #[arg(long)]
        llm_workers: Option<usize>,
        /// Path to LLM cache JSON (defaults next to the database)
        #[arg(long)]
        llm_cache: Option<PathBuf>,
    },

    /// Show database and table statistics
    Status,

    /// Rank a resource's nearest neighbors by similarity score
    Neighbors {
        /// Resource name
        resource: String,
        /// Maximum neighbors to show
        #[arg(short, long, default_value_t = 10)]
        limit: usize,
    },

    /// Configuration management
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(Subcommand)]
enum ConfigAction {
    /// Get a configuration value
    Get { key: String },
    /// Set a configuration value
    Set { key: String, value: String },
    /// List all configuration values
    List,
    /// Reset configuration to defaults
    Reset,
    /// Show the configuration file path
    Path,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("cartograph=info".parse()?),
        )
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Compile {
            artifacts,
            resource_map,
            summary_map,
            cli_root,
            server_root,
            max_hops,
            llm,
            llm_model,
            llm_workers,
            llm_cache,
        } => {
            let db = open_db(cli.db.clone()).await?;
            cmd_compile(
                &db,
                CompileArgs {
                    artifacts,
                    resource_map,
                    summary_map,
                    cli_root,
                    server_root,
                    max_hops,
                    llm,
                    llm_model,
                    llm_workers,
                    llm_cache,
                },
                cli.quiet,
            )
            .await
        }

        Commands::Status => {
            let db = open_db(cli.db.clone()).await?;
            cmd_status(&db).await
        }

        Commands::Neighbors { resource, limit } => {
            let db = open_db(cli.db.clone()).await?;
            cmd_neighbors(&db, &resource, limit).await
        }

        Commands::Config { action } => cmd_config(action, cli.quiet),
    }
}

async fn open_db(path: Option<PathBuf>) -> anyhow::Result<Database> {
    let path = path.unwrap_or_else(default_database_path);
    Ok(Database::new(DatabaseConfig::with_path(path)).await?)
}

struct CompileArgs {
    artifacts: PathBuf,
    resource_map: PathBuf,
    summary_map: PathBuf,
    cli_root: Option<PathBuf>,
    server_root: Option<PathBuf>,
    max_hops: Option<usize>,
    llm: bool,
    llm_model: Option<String>,
    llm_workers: Option<usize>,
    llm_cache: Option<PathBuf>,
}

async fn cmd_compile(db: &Database, args: CompileArgs, quiet: bool) -> anyhow::Result<()> {
    let config = Config::load()?;

    let options = CompileOptions {
        artifacts_dir: args.artifacts,
        resource_map: args.resource_map,
        summary_map: args.summary_map,
        cli_root: args.cli_root,
        max_hops: args.max_hops.unwrap_or(config.compiler.max_hops),
    };

    let scanner: Box<dyn SummarySourceScanner> = match &args.server_root {
        Some(root) => Box::new(RubyModelScanner::new(root)),
        None => Box::new(NullScanner),
    };

    let mut fallback = if args.llm {
        let api_key = config.llm.resolved_api_key()?.ok_or_else(|| {
            anyhow!(
                "LLM fallback requires an API key. \
                 Set CARTOGRAPH_API_KEY or OPENROUTER_API_KEY environment variable."
            )
        })?;
        let client = LlmClient::builder()
            .config(config.llm.clone())
            .api_key(api_key)
            .build()?;
        let model = args
            .llm_model
            .unwrap_or_else(|| config.llm.default_model.clone());
        let cache_path = args.llm_cache.unwrap_or_else(|| {
            db.path()
                .parent()
                .map(|dir| dir.join("llm_flag_cache.json"))
                .unwrap_or_else(|| PathBuf::from("llm_flag_cache.json"))
        });
        let cache = MappingCache::load(cache_path);
        let workers = args.llm_workers.unwrap_or(config.compiler.llm_workers);
        Some(FallbackResolver::new(
            Arc::new(LlmFieldMapper::new(client)),
            cache,
            model,
            workers,
        ))
    } else {
        None
    };

    let report = compile(db, &options, fallback.as_mut(), scanner.as_ref()).await?;

    if !quiet {
        println!(
            "Compiled {} artifacts ({} skipped)",
            report.artifacts_ingested, report.artifacts_skipped
        );
        println!("  resource links:  {}", report.resource_links);
        println!(
            "  field links:     {} deterministic, {} via LLM ({} flags unmatched)",
            report.field_links_deterministic, report.field_links_fallback, report.flags_unmatched
        );
        println!("  filter paths:    {}", report.filter_paths);
        if report.cache_hits + report.cache_misses > 0 {
            println!(
                "  LLM cache:       {} hits, {} misses",
                report.cache_hits, report.cache_misses
            );
        }
    }
    Ok(())
}

async fn cmd_status(db: &Database) -> anyhow::Result<()> {
    let status = db.migration_status().await?;
    println!("Database: {}", db.path().display());
    println!(
        "Schema version: {} (target {})",
        status.current_version, status.target_version
    );
    println!();

    let tables = [
        "commands",
        "flags",
        "sources",
        "resources",
        "resource_fields",
        "resource_field_targets",
        "command_resource_links",
        "command_field_links",
        "command_filter_paths",
        "summary_resource_targets",
        "summary_sources",
        "summary_dimensions",
        "summary_metrics",
        "command_summary_dimensions",
        "command_summary_metrics",
    ];
    for table in tables {
        let (count,): (i64,) = sqlx::query_as(&format!("SELECT COUNT(*) FROM {}", table))
            .fetch_one(db.pool())
            .await?;
        println!("{:<28} {}", table, count);
    }
    Ok(())
}

async fn cmd_neighbors(db: &Database, resource: &str, limit: usize) -> anyhow::Result<()> {
    let rows: Vec<(String, f64, i64)> = sqlx::query_as(
        "SELECT target_resource, score, evidence_count \
         FROM resource_neighbor_scores \
         WHERE source_resource = ? \
         ORDER BY score DESC, target_resource \
         LIMIT ?",
    )
    .bind(resource)
    .bind(limit as i64)
    .fetch_all(db.pool())
    .await?;

    if rows.is_empty() {
        println!("No neighbors recorded for '{}'", resource);
        return Ok(());
    }

    println!("{:<32} {:>8} {:>10}", "neighbor", "score", "evidence");
    for (target, score, evidence) in rows {
        println!("{:<32} {:>8.1} {:>10}", target, score, evidence);
    }
    Ok(())
}

fn cmd_config(action: ConfigAction, quiet: bool) -> anyhow::Result<()> {
    match action {
        ConfigAction::Get { key } => {
            let config = Config::load()?;
            let value = config.get(&key)?;
            println!("{}", value);
        }
        ConfigAction::Set { key, value } => {
            let mut config = Config::load()?;
            config.set(&key, &value)?;
            config.save()?;
            if !quiet {
                println!("Set {} = {}", key, value);
            }
        }
        ConfigAction::List => {
            let config = Config::load()?;
            let items = config.list()?;
            for (key, value) in items {
                println!("{} = {}", key, value);
            }
        }
        ConfigAction::Reset => {
            Config::reset()?;
            if !quiet {
                println!("Configuration reset to defaults.");
            }
        }
        ConfigAction::Path => {
            let path = Config::config_path()?;
            println!("{}", path.display());
        }
    }
    Ok(())
}
