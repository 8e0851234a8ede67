//! Catalog Ingest - exercise catalog loader

use anyhow::{Context, Result};
use catalog_common::logging::{init_logging, LogConfig, LogFormat, LogLevel};
use catalog_ingest::models::SourceRecord;
use catalog_ingest::normalize::Normalizer;
use catalog_ingest::store::{self, bounded, MergePolicy};
use catalog_ingest::{
    IdStrategy, IdentityPolicy, IngestConfig, IngestError, IngestionPipeline, RunSummary,
    StoreKind,
};
use chrono::Utc;
use clap::{Args, Parser, Subcommand};
use indicatif::{ProgressBar, ProgressStyle};
use std::io::IsTerminal;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

#[derive(Parser, Debug)]
#[command(name = "catalog-ingest")]
#[command(author, version, about = "Idempotent exercise catalog loader")]
struct Cli {
    #[command(subcommand)]
    command: Command,

    #[command(flatten)]
    store: StoreArgs,

    /// Verbose output
    #[arg(short, long, global = true)]
    verbose: bool,
}

/// Settings shared by every subcommand; unset flags fall back to the environment
#[derive(Args, Debug)]
struct StoreArgs {
    /// Document store backend
    #[arg(long, global = true, value_enum, env = "CATALOG_STORE")]
    store: Option<StoreKind>,

    /// Target collection
    #[arg(short, long, global = true, env = "CATALOG_COLLECTION")]
    collection: Option<String>,

    /// Provenance label written on every record
    #[arg(long, global = true, env = "CATALOG_PROVENANCE")]
    provenance: Option<String>,

    /// Identifier fallback for records without an id
    #[arg(long, global = true, value_enum, env = "CATALOG_ID_STRATEGY")]
    id_strategy: Option<IdStrategy>,

    /// Bound for every store call, in seconds
    #[arg(long, global = true, env = "CATALOG_STORE_TIMEOUT_SECS")]
    timeout_secs: Option<u64>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Load a JSON array of exercises into the catalog
    Import(ImportArgs),

    /// Write a single exercise directly, outside the batch path
    UpsertOne {
        /// JSON file holding one exercise object
        #[arg(short, long)]
        input: PathBuf,

        /// Replace the stored document instead of merging into it
        #[arg(long)]
        overwrite: bool,
    },
}

#[derive(Args, Debug)]
struct ImportArgs {
    /// JSON file holding an array of exercises
    #[arg(short, long)]
    input: PathBuf,

    /// Identity policy
    #[arg(short, long, value_enum, env = "CATALOG_POLICY")]
    policy: Option<IdentityPolicy>,

    /// Records per committed write group (1-500)
    #[arg(long, env = "CATALOG_CHUNK_SIZE")]
    chunk_size: Option<usize>,

    /// Identity lookups in flight at once
    #[arg(long, env = "CATALOG_LOOKUP_CONCURRENCY")]
    lookup_concurrency: Option<usize>,

    /// Documents sampled for the final report
    #[arg(long, env = "CATALOG_SAMPLE_SIZE")]
    sample_size: Option<usize>,

    /// Refuse to run unless the input has this SHA-256
    #[arg(long)]
    input_sha256: Option<String>,

    /// Also write the run summary as JSON to this path
    #[arg(long)]
    summary_json: Option<PathBuf>,

    /// Never draw a progress bar
    #[arg(long)]
    no_progress: bool,
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let log_level = if cli.verbose {
        LogLevel::Debug
    } else {
        LogLevel::Info
    };

    let log_config = LogConfig::builder()
        .level(log_level)
        .log_file_prefix("catalog-ingest")
        .build();

    // Environment variables take precedence
    let log_config = log_config.clone().merge_env().unwrap_or(log_config);

    // The loader still works without logging
    let _guard = init_logging(&log_config).ok();

    let result = match cli.command {
        Command::Import(ref args) => import(&cli.store, args, &log_config).await,
        Command::UpsertOne {
            ref input,
            overwrite,
        } => upsert_one(&cli.store, input, overwrite).await,
    };

    match result {
        Ok(code) => code,
        Err(e) => {
            error!(error = %e, "Command failed");
            eprintln!("Error: {:#}", e);
            ExitCode::from(1)
        }
    }
}

/// Environment configuration with command-line overrides applied
fn resolve_config(
    store: &StoreArgs,
    import: Option<&ImportArgs>,
) -> catalog_ingest::Result<IngestConfig> {
    let mut config = IngestConfig::from_env()?;

    if let Some(kind) = store.store {
        config.store = kind;
    }
    if let Some(ref collection) = store.collection {
        config.collection = collection.clone();
    }
    if let Some(ref provenance) = store.provenance {
        config.provenance = provenance.clone();
    }
    if let Some(strategy) = store.id_strategy {
        config.id_strategy = strategy;
    }
    if let Some(secs) = store.timeout_secs {
        config.store_timeout_secs = secs;
    }

    if let Some(args) = import {
        if let Some(policy) = args.policy {
            config.policy = policy;
        }
        if let Some(size) = args.chunk_size {
            config.chunk_size = size;
        }
        if let Some(n) = args.lookup_concurrency {
            config.lookup_concurrency = n;
        }
        if let Some(n) = args.sample_size {
            config.sample_size = n;
        }
    }

    config.validate()?;
    Ok(config)
}

async fn import(
    store_args: &StoreArgs,
    args: &ImportArgs,
    log_config: &LogConfig,
) -> Result<ExitCode> {
    let started_at = Utc::now();

    let prepared = resolve_config(store_args, Some(args))
        .and_then(|config| store::connect(&config).map(|store| (config, store)));

    let summary = match prepared {
        Ok((config, store)) => {
            let cancel = CancellationToken::new();
            spawn_interrupt_handler(cancel.clone());

            let show_progress = !args.no_progress
                && log_config.format != LogFormat::Json
                && std::io::stdout().is_terminal();
            let progress = if show_progress {
                chunk_progress_bar()
            } else {
                ProgressBar::hidden()
            };

            IngestionPipeline::new(store, config)
                .with_progress(progress)
                .run_path(&args.input, args.input_sha256.as_deref(), &cancel)
                .await?
        }
        Err(e) => {
            error!(error = %e, "Run aborted during initialization");
            let policy = args.policy.unwrap_or_default();
            let collection = store_args
                .collection
                .clone()
                .unwrap_or_else(|| catalog_ingest::config::DEFAULT_COLLECTION.to_string());
            RunSummary::aborted(&e, collection, policy, started_at)
        }
    };

    println!("{}", summary);

    if let Some(ref path) = args.summary_json {
        write_summary(path, &summary)?;
    }

    Ok(ExitCode::from(summary.outcome.exit_code() as u8))
}

async fn upsert_one(store_args: &StoreArgs, input: &Path, overwrite: bool) -> Result<ExitCode> {
    let config = resolve_config(store_args, None)?;
    let store = store::connect(&config)?;

    let raw = tokio::fs::read(input)
        .await
        .map_err(|e| IngestError::input_read(input.display().to_string(), e.to_string()))?;
    let source: SourceRecord = serde_json::from_slice(&raw)
        .map_err(|e| IngestError::input_read(input.display().to_string(), e.to_string()))?;
    if source.fields().is_empty() {
        return Err(IngestError::input_read(
            input.display().to_string(),
            "expected a single JSON object",
        )
        .into());
    }

    let record = Normalizer::new(config.id_strategy, &config.provenance).normalize(&source);
    let policy = if overwrite {
        MergePolicy::Overwrite
    } else {
        MergePolicy::Merge
    };

    bounded(
        config.store_timeout(),
        store.upsert(&config.collection, &record.id, &record.to_document(), policy),
    )
    .await
    .map_err(IngestError::from)
    .with_context(|| format!("Failed to upsert '{}'", record.id))?;

    info!(id = %record.id, collection = %config.collection, ?policy, "Record upserted");
    println!("Upserted {} ({}) into {}", record.id, record.display_name, config.collection);
    Ok(ExitCode::SUCCESS)
}

fn spawn_interrupt_handler(cancel: CancellationToken) {
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupt received; finishing the current chunk and stopping");
            cancel.cancel();
        }
    });
}

fn chunk_progress_bar() -> ProgressBar {
    let pb = ProgressBar::new(0);
    let style = ProgressStyle::default_bar()
        .template(
            "{msg}\n{spinner:.green} [{elapsed_precise}] \
             [{wide_bar:.cyan/blue}] {pos}/{len} chunks",
        )
        .map(|style| style.progress_chars("#>-"))
        .unwrap_or_else(|_| ProgressStyle::default_bar());
    pb.set_style(style);
    pb
}

fn write_summary(path: &Path, summary: &RunSummary) -> Result<()> {
    let json = serde_json::to_string_pretty(summary).context("Failed to serialize run summary")?;
    std::fs::write(path, json)
        .with_context(|| format!("Failed to write summary to {}", path.display()))?;
    info!(path = %path.display(), "Run summary written");
    Ok(())
}
