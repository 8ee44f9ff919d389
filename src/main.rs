//! Binary entry point for dupwatch.
//!
//! This binary provides the CLI interface for the dupwatch duplicate image
//! detector.

#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(missing_docs)]
// Allow print_stderr in main binary for CLI output
#![allow(clippy::print_stderr)]
#![allow(clippy::print_stdout)]
// Allow needless_pass_by_value for command functions
#![allow(clippy::needless_pass_by_value)]
// Allow multiple crate versions from transitive dependencies
#![allow(clippy::multiple_crate_versions)]

use anyhow::Context;
use clap::{Parser, Subcommand};
use dupwatch::config::{DupwatchConfig, StoreBackend};
use dupwatch::features::{Dispatcher, serve_json_lines};
use dupwatch::models::Submitter;
use dupwatch::observability;
use dupwatch::services::{FingerprintEngine, ImageFetcher};
use dupwatch::storage::{DuplicateStore, MemoryDuplicateStore, RedisDuplicateStore};
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;

/// Dupwatch - near-duplicate image detection for chat bots.
#[derive(Parser)]
#[command(name = "dupwatch")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Enable verbose output.
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Path to configuration file.
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

/// Available commands.
#[derive(Subcommand)]
enum Commands {
    /// Print the fingerprint of a local image.
    Hash {
        /// Image file.
        file: PathBuf,

        /// Fingerprint granularity (bits per side).
        #[arg(short, long)]
        size: Option<usize>,
    },

    /// Run the duplicate pipeline on one or more images, in order.
    Check {
        /// Image files or http(s) URLs.
        #[arg(required = true)]
        sources: Vec<String>,

        /// Identity of the submitter.
        #[arg(long, default_value_t = 0)]
        user_id: u64,

        /// Display name of the submitter.
        #[arg(long, default_value = "anonymous")]
        nickname: String,

        /// Use a throwaway in-process store instead of the configured one.
        #[arg(long)]
        memory: bool,
    },

    /// Serve JSON-lines events from stdin, writing replies to stdout.
    Process {
        /// Use a throwaway in-process store instead of the configured one.
        #[arg(long)]
        memory: bool,
    },

    /// Show the effective configuration.
    Config,
}

/// Main entry point.
#[tokio::main]
async fn main() -> ExitCode {
    let _ = dotenvy::dotenv();
    let cli = Cli::parse();

    let config = match DupwatchConfig::load(cli.config.as_deref()) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Failed to load configuration: {e}");
            return ExitCode::FAILURE;
        },
    };

    if let Err(e) = observability::init_from_settings(&config.logging, cli.verbose) {
        eprintln!("Failed to initialize logging: {e}");
        return ExitCode::FAILURE;
    }

    match run_command(cli, config).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Error: {e:#}");
            ExitCode::FAILURE
        },
    }
}

/// Runs the selected command.
async fn run_command(cli: Cli, config: DupwatchConfig) -> anyhow::Result<()> {
    match cli.command {
        Commands::Hash { file, size } => {
            cmd_hash(&file, size.unwrap_or(config.detection.fingerprint_size))
        },

        Commands::Check {
            sources,
            user_id,
            nickname,
            memory,
        } => {
            let reporter = Submitter::new(user_id, nickname);
            match select_backend(&config, memory) {
                StoreBackend::Memory => {
                    cmd_check(MemoryDuplicateStore::new(), &config, &sources, &reporter).await
                },
                StoreBackend::Redis => {
                    let store = RedisDuplicateStore::connect(&config.store).await?;
                    cmd_check(store, &config, &sources, &reporter).await
                },
            }
        },

        Commands::Process { memory } => match select_backend(&config, memory) {
            StoreBackend::Memory => cmd_process(MemoryDuplicateStore::new(), &config).await,
            StoreBackend::Redis => {
                let store = RedisDuplicateStore::connect(&config.store).await?;
                cmd_process(store, &config).await
            },
        },

        Commands::Config => cmd_config(&config, cli.config.as_deref()),
    }
}

const fn select_backend(config: &DupwatchConfig, memory: bool) -> StoreBackend {
    if memory {
        StoreBackend::Memory
    } else {
        config.store.backend
    }
}

/// Hash command.
fn cmd_hash(file: &Path, size: usize) -> anyhow::Result<()> {
    let bytes = std::fs::read(file).with_context(|| format!("reading {}", file.display()))?;
    let fingerprint = FingerprintEngine::new(size)?.compute(&bytes)?;
    println!("{fingerprint}");
    Ok(())
}

/// Check command.
async fn cmd_check<S: DuplicateStore>(
    store: S,
    config: &DupwatchConfig,
    sources: &[String],
    reporter: &Submitter,
) -> anyhow::Result<()> {
    let dispatcher = Dispatcher::from_config(store, config)?;
    let fetcher = ImageFetcher::new(config.image.fetch_timeout())?;

    for source in sources {
        let bytes = if source.starts_with("http://") || source.starts_with("https://") {
            fetcher.fetch(source).await?
        } else {
            std::fs::read(source).with_context(|| format!("reading {source}"))?
        };

        match dispatcher.check_image(&bytes, reporter).await {
            Ok(outcome) => {
                eprintln!("{source}: {} (count {:?})", outcome.as_str(), outcome.count());
                if !outcome.message().is_empty() {
                    println!("{}", outcome.message());
                }
            },
            Err(e) if e.is_rejection() => eprintln!("{source}: skipped ({e})"),
            Err(e) => return Err(e.into()),
        }
    }

    Ok(())
}

/// Process command.
async fn cmd_process<S: DuplicateStore + 'static>(
    store: S,
    config: &DupwatchConfig,
) -> anyhow::Result<()> {
    let dispatcher = Arc::new(Dispatcher::from_config(store, config)?);
    let stdin = tokio::io::BufReader::new(tokio::io::stdin());
    let stats = serve_json_lines(dispatcher, stdin, tokio::io::stdout()).await?;

    eprintln!(
        "Processed {} events ({} segments), sent {} replies, skipped {} malformed lines",
        stats.events, stats.segments, stats.replies, stats.malformed
    );
    Ok(())
}

/// Config command.
fn cmd_config(config: &DupwatchConfig, explicit: Option<&Path>) -> anyhow::Result<()> {
    println!("Configuration file: {}", config_source(explicit));
    println!();
    println!("[store]");
    println!("backend = {:?}", config.store.backend.as_str());
    println!("url = {:?}", config.store.redacted_url());
    println!("scan_batch_size = {}", config.store.scan_batch_size);
    println!("operation_timeout_ms = {}", config.store.operation_timeout_ms);
    println!();
    println!("[detection]");
    println!("similarity_threshold = {}", config.detection.similarity_threshold);
    println!("max_call_outs = {}", config.detection.max_call_outs);
    println!("cooldown_secs = {}", config.detection.cooldown_secs);
    println!("record_ttl_secs = {}", config.detection.record_ttl_secs);
    println!("fingerprint_size = {}", config.detection.fingerprint_size);
    println!();
    println!("[image]");
    println!("min_width = {}", config.image.min_width);
    println!("min_height = {}", config.image.min_height);
    println!("allowed_formats = {:?}", config.image.allowed_formats);
    println!("fetch_timeout_secs = {}", config.image.fetch_timeout_secs);
    println!();
    println!("[logging]");
    println!("format = {:?}", config.logging.format);
    println!("filter = {:?}", config.logging.filter);
    if let Some(file) = &config.logging.file {
        println!("file = {:?}", file.display().to_string());
    }
    Ok(())
}

fn config_source(explicit: Option<&Path>) -> String {
    if let Some(path) = explicit {
        return path.display().to_string();
    }
    if let Ok(path) = std::env::var(dupwatch::config::CONFIG_PATH_ENV) {
        if !path.trim().is_empty() {
            return path;
        }
    }
    DupwatchConfig::default_path()
        .filter(|path| path.exists())
        .map_or_else(|| "(defaults)".to_string(), |path| path.display().to_string())
}
