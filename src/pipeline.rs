//! Run orchestration: load, validate, fetch, rank, export.
//!
//! A [`Pipeline`] owns the fetcher and the current [`RunState`]. Each run
//! gets its own [`RunContext`]; nothing outlives the run except the report
//! handed back to the caller.

use crate::bitcoin::{load_address_file, AddressError, LoadedAddresses, ValidatedAddress};
use crate::client::{ApiError, BlockchainInfoClient};
use crate::config::CheckerConfig;
use crate::export::{export_csv, ExportError};
use crate::fetch::BatchFetcher;
use crate::rank::rank;
use crate::schemas::{AddressRecord, BatchError, RunCounts, RunSummary, ValidationError};
use crate::status::{RunState, StatusObserver, StatusUpdate};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("A run is already in progress")]
    AlreadyRunning,

    #[error("Cannot read address list {path:?}: {source}")]
    Input {
        path: PathBuf,
        #[source]
        source: AddressError,
    },

    #[error("Export failed: {0}")]
    Export(#[from] ExportError),

    #[error("HTTP client setup failed: {0}")]
    Client(#[from] ApiError),
}

/// How a run that did not fail ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunStatus {
    Completed,
    /// Stopped early; results cover the batches fetched before cancellation
    Cancelled,
    /// Nothing valid to look up; no requests were made
    NoAddresses,
}

impl std::fmt::Display for RunStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RunStatus::Completed => write!(f, "completed"),
            RunStatus::Cancelled => write!(f, "cancelled"),
            RunStatus::NoAddresses => write!(f, "no_addresses"),
        }
    }
}

/// Everything a run produced
#[derive(Debug)]
pub struct RunReport {
    pub status: RunStatus,
    /// Ranked records, most active first
    pub records: Vec<AddressRecord>,
    pub validation_errors: Vec<ValidationError>,
    pub batch_errors: Vec<BatchError>,
    pub counts: RunCounts,
    /// Export destination, `None` when nothing was exported
    pub output_path: Option<PathBuf>,
}

impl RunReport {
    pub fn summary(&self, input: &Path) -> RunSummary {
        let mut summary = RunSummary::new(input.to_path_buf());
        summary.output_path = self.output_path.clone();
        summary.status = self.status.to_string();
        summary.counts = self.counts.clone();
        summary.batch_errors = self.batch_errors.clone();
        summary
    }
}

/// State of a single run, passed through every stage
struct RunContext<'a> {
    input: &'a Path,
    output: &'a Path,
    observer: &'a dyn StatusObserver,
    addresses: Vec<ValidatedAddress>,
    validation_errors: Vec<ValidationError>,
    records: Vec<AddressRecord>,
    batch_errors: Vec<BatchError>,
    counts: RunCounts,
    cancelled: bool,
}

impl<'a> RunContext<'a> {
    fn new(input: &'a Path, output: &'a Path, observer: &'a dyn StatusObserver) -> Self {
        Self {
            input,
            output,
            observer,
            addresses: Vec::new(),
            validation_errors: Vec::new(),
            records: Vec::new(),
            batch_errors: Vec::new(),
            counts: RunCounts::default(),
            cancelled: false,
        }
    }

    fn into_report(self, status: RunStatus, output_path: Option<PathBuf>) -> RunReport {
        RunReport {
            status,
            records: self.records,
            validation_errors: self.validation_errors,
            batch_errors: self.batch_errors,
            counts: self.counts,
            output_path,
        }
    }
}

/// Clears the running flag when a run ends, however it ends
struct RunGuard<'a>(&'a AtomicBool);

impl Drop for RunGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

/// Address checking pipeline
pub struct Pipeline {
    fetcher: BatchFetcher,
    state: Mutex<RunState>,
    running: AtomicBool,
}

impl Pipeline {
    pub fn new(config: &CheckerConfig) -> Result<Self, PipelineError> {
        let client = BlockchainInfoClient::new(&config.api)?;
        info!("Using lookup endpoint {}", client.endpoint());

        Ok(Self {
            fetcher: BatchFetcher::new(client, &config.rate_limits),
            state: Mutex::new(RunState::Idle),
            running: AtomicBool::new(false),
        })
    }

    /// Current state
    pub fn state(&self) -> RunState {
        self.state.lock().map(|s| *s).unwrap_or(RunState::Failed)
    }

    /// Run the whole pipeline once.
    ///
    /// Invalid lines and failed batches are reported in the returned
    /// [`RunReport`]; only an unreadable input or a failed export is an
    /// error. Fails with [`PipelineError::AlreadyRunning`] if another run on
    /// this pipeline has not finished.
    pub async fn run(
        &self,
        input: &Path,
        output: &Path,
        observer: &dyn StatusObserver,
        cancel: &CancellationToken,
    ) -> Result<RunReport, PipelineError> {
        if self
            .running
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return Err(PipelineError::AlreadyRunning);
        }
        let _guard = RunGuard(&self.running);

        let mut ctx = RunContext::new(input, output, observer);
        match self.execute(&mut ctx, cancel).await {
            Ok(status) => {
                let output_path = match status {
                    RunStatus::NoAddresses => None,
                    _ => Some(output.to_path_buf()),
                };
                self.transition(&ctx, RunState::Idle, format!("Run {}", status));
                Ok(ctx.into_report(status, output_path))
            }
            Err(e) => {
                self.set_state(RunState::Failed);
                observer.on_status(&StatusUpdate::warning(
                    RunState::Failed,
                    format!("Run failed: {}", e),
                ));
                Err(e)
            }
        }
    }

    async fn execute(
        &self,
        ctx: &mut RunContext<'_>,
        cancel: &CancellationToken,
    ) -> Result<RunStatus, PipelineError> {
        let loaded = self.load(ctx)?;

        self.validate(ctx, loaded);
        if ctx.addresses.is_empty() {
            ctx.observer.on_status(&StatusUpdate::warning(
                RunState::Validating,
                "No addresses loaded.",
            ));
            return Ok(RunStatus::NoAddresses);
        }

        self.fetch(ctx, cancel).await;
        self.rank(ctx);
        self.export(ctx)?;

        Ok(if ctx.cancelled {
            RunStatus::Cancelled
        } else {
            RunStatus::Completed
        })
    }

    fn load(&self, ctx: &RunContext<'_>) -> Result<LoadedAddresses, PipelineError> {
        self.transition(ctx, RunState::Loading, format!("Loading {:?}", ctx.input));

        load_address_file(ctx.input).map_err(|source| PipelineError::Input {
            path: ctx.input.to_path_buf(),
            source,
        })
    }

    fn validate(&self, ctx: &mut RunContext<'_>, loaded: LoadedAddresses) {
        self.transition(ctx, RunState::Validating, "Validating addresses");

        ctx.counts.lines_read = loaded.lines_read;
        ctx.counts.valid_addresses = loaded.addresses.len();
        ctx.counts.invalid_lines = loaded.rejected.len();

        if !loaded.rejected.is_empty() {
            ctx.observer.on_status(&StatusUpdate::warning(
                RunState::Validating,
                format!("Skipped {} invalid lines", loaded.rejected.len()),
            ));
        }
        ctx.observer.on_status(&StatusUpdate::info(
            RunState::Validating,
            format!("Loaded {} addresses.", loaded.addresses.len()),
        ));

        ctx.addresses = loaded.addresses;
        ctx.validation_errors = loaded.rejected;
    }

    async fn fetch(&self, ctx: &mut RunContext<'_>, cancel: &CancellationToken) {
        self.transition(
            ctx,
            RunState::Fetching,
            format!(
                "API query in process for {} addresses, please be patient...",
                ctx.addresses.len()
            ),
        );

        let outcome = self.fetcher.fetch(&ctx.addresses, ctx.observer, cancel).await;

        ctx.counts.batches = outcome.batches;
        ctx.counts.failed_batches = outcome.failures.len();
        ctx.counts.skipped_batches = outcome.skipped_batches;
        ctx.cancelled = outcome.cancelled;

        if outcome.cancelled {
            ctx.observer.on_status(&StatusUpdate::warning(
                RunState::Fetching,
                format!(
                    "Cancelled: {} of {} batches not queried",
                    outcome.skipped_batches, outcome.batches
                ),
            ));
        }

        ctx.records = outcome.records;
        ctx.batch_errors = outcome.failures;
    }

    fn rank(&self, ctx: &mut RunContext<'_>) {
        self.transition(
            ctx,
            RunState::Ranking,
            format!("Ranking {} records by transaction count", ctx.records.len()),
        );
        ctx.records = rank(std::mem::take(&mut ctx.records));
        ctx.counts.records = ctx.records.len();
    }

    fn export(&self, ctx: &RunContext<'_>) -> Result<(), PipelineError> {
        self.transition(ctx, RunState::Exporting, format!("Exporting to {:?}", ctx.output));

        export_csv(&ctx.records, ctx.output)?;
        ctx.observer.on_status(&StatusUpdate::info(
            RunState::Exporting,
            format!("Exported results to {}", ctx.output.display()),
        ));
        Ok(())
    }

    fn transition(&self, ctx: &RunContext<'_>, state: RunState, message: impl Into<String>) {
        debug!("State -> {}", state);
        self.set_state(state);
        ctx.observer.on_status(&StatusUpdate::info(state, message));
    }

    fn set_state(&self, state: RunState) {
        if let Ok(mut current) = self.state.lock() {
            *current = state;
        }
    }
}
