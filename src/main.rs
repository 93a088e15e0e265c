//! Bitcoin Multi-Address Checker CLI
//!
//! Looks up transaction counts and balances for a file of Bitcoin
//! addresses and exports them ranked by activity.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn, Level};
use tracing_subscriber::FmtSubscriber;

use btc_multiaddr_checker::bitcoin::load_address_file;
use btc_multiaddr_checker::config::CheckerConfig;
use btc_multiaddr_checker::export::{default_output_path, format_table, read_records_csv};
use btc_multiaddr_checker::fetch::partition_batches;
use btc_multiaddr_checker::pipeline::{Pipeline, RunStatus};
use btc_multiaddr_checker::status::LogObserver;

#[derive(Parser)]
#[command(name = "btc-multiaddr-checker")]
#[command(version)]
#[command(about = "Batch Bitcoin address balance and activity checker", long_about = None)]
struct Cli {
    /// Path to configuration file (optional, uses env vars if not provided)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Look up every address in a file and export the ranked results
    Run {
        /// Text file with one address per line
        #[arg(short, long)]
        input: PathBuf,

        /// CSV destination (default: "<input stem> processed.csv")
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Addresses per request (max 50)
        #[arg(short, long)]
        batch_size: Option<usize>,

        /// Pause after each batch in milliseconds
        #[arg(short, long)]
        delay_ms: Option<u64>,

        /// Batches allowed in flight at once
        #[arg(long)]
        concurrency: Option<usize>,

        /// Per-request timeout in seconds
        #[arg(long)]
        timeout_secs: Option<u64>,

        /// Also write a JSON run summary to this path
        #[arg(long)]
        summary: Option<PathBuf>,

        /// Rows to print after the run
        #[arg(long, default_value = "20")]
        top: usize,
    },

    /// Validate an address file without querying the API
    Validate {
        /// Text file with one address per line
        #[arg(short, long)]
        input: PathBuf,
    },

    /// Print a previously exported CSV
    Show {
        /// Exported CSV file
        #[arg(short, long)]
        file: PathBuf,

        /// Rows to print
        #[arg(long, default_value = "20")]
        top: usize,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize logging
    let log_level = if cli.verbose { Level::DEBUG } else { Level::INFO };
    let subscriber = FmtSubscriber::builder()
        .with_max_level(log_level)
        .with_target(false)
        .with_thread_ids(false)
        .compact()
        .finish();
    tracing::subscriber::set_global_default(subscriber)
        .context("Failed to set tracing subscriber")?;

    // Load configuration
    let mut config = match &cli.config {
        Some(path) => CheckerConfig::load_from_file(path)
            .with_context(|| format!("Failed to load config from {:?}", path))?,
        None => CheckerConfig::load().context("Failed to load config from environment")?,
    };

    match cli.command {
        Commands::Run {
            input,
            output,
            batch_size,
            delay_ms,
            concurrency,
            timeout_secs,
            summary,
            top,
        } => {
            // CLI flags override file and environment settings
            if let Some(size) = batch_size {
                config.rate_limits.batch_size = size;
            }
            if let Some(delay) = delay_ms {
                config.rate_limits.delay_ms = delay;
            }
            if let Some(n) = concurrency {
                config.rate_limits.max_concurrent_batches = n;
            }
            if let Some(secs) = timeout_secs {
                config.api.request_timeout_secs = secs;
            }
            config.validate().context("Invalid configuration")?;

            let output = output.unwrap_or_else(|| default_output_path(&input));
            cmd_run(&config, &input, &output, summary.as_deref(), top).await?;
        }
        Commands::Validate { input } => {
            config.validate().context("Invalid configuration")?;
            cmd_validate(&config, &input)?;
        }
        Commands::Show { file, top } => {
            cmd_show(&file, top)?;
        }
    }

    Ok(())
}

async fn cmd_run(
    config: &CheckerConfig,
    input: &Path,
    output: &Path,
    summary_path: Option<&Path>,
    top: usize,
) -> Result<()> {
    info!("=== Checking Addresses ===");
    info!(
        "Batch size={}, delay={}ms, concurrency={}, timeout={}s",
        config.rate_limits.batch_size,
        config.rate_limits.delay_ms,
        config.rate_limits.max_concurrent_batches,
        config.api.request_timeout_secs
    );

    let pipeline = Pipeline::new(config).context("Failed to initialise pipeline")?;

    // Ctrl-C stops the run between batches; fetched results are still exported
    let cancel = CancellationToken::new();
    let ctrl_c_token = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupt received, finishing current batch...");
            ctrl_c_token.cancel();
        }
    });

    let report = pipeline
        .run(input, output, &LogObserver, &cancel)
        .await
        .with_context(|| format!("Run failed for {:?}", input))?;

    if !report.records.is_empty() {
        info!("Top addresses by transaction count:\n{}", format_table(&report.records, Some(top)));
    }

    for error in &report.validation_errors {
        warn!("Skipped invalid address at {}", error);
    }
    for error in &report.batch_errors {
        warn!("Missing results for {}", error);
    }

    info!(
        "Run {}: {} records, {} invalid lines, {} failed batches",
        report.status,
        report.records.len(),
        report.validation_errors.len(),
        report.batch_errors.len()
    );

    if let Some(path) = summary_path {
        report
            .summary(input)
            .save(path)
            .with_context(|| format!("Failed to write summary to {:?}", path))?;
        info!("Summary saved to {:?}", path);
    }

    if report.status == RunStatus::Cancelled {
        warn!("Run was cancelled; {:?} holds partial results", output);
    }

    Ok(())
}

fn cmd_validate(config: &CheckerConfig, input: &Path) -> Result<()> {
    info!("=== Validating {:?} ===", input);

    let loaded = load_address_file(input)
        .with_context(|| format!("Failed to read address list {:?}", input))?;

    let batches = partition_batches(&loaded.addresses, config.rate_limits.batch_size).len();

    info!("Lines read: {}", loaded.lines_read);
    info!("Valid addresses: {}", loaded.addresses.len());
    info!("Invalid lines: {}", loaded.rejected.len());
    for (kind, count) in loaded.kind_counts() {
        info!("  {}: {}", kind, count);
    }
    info!(
        "Would query in {} batches of up to {}",
        batches, config.rate_limits.batch_size
    );

    if loaded.addresses.is_empty() {
        warn!("No addresses loaded.");
    }

    Ok(())
}

fn cmd_show(file: &Path, top: usize) -> Result<()> {
    let records =
        read_records_csv(file).with_context(|| format!("Failed to read export {:?}", file))?;

    info!("{} records in {:?}\n{}", records.len(), file, format_table(&records, Some(top)));
    Ok(())
}
