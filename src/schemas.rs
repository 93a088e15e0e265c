//! Data schemas shared by every pipeline stage.
//!
//! Monetary values are carried as integer satoshis end to end; conversion
//! to decimal BTC only happens at the export/display boundary.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Satoshis per bitcoin
pub const SATOSHIS_PER_BTC: u64 = 100_000_000;

/// Summary schema version
pub const SUMMARY_VERSION: &str = "1.0.0";

// ============================================================================
// Address records
// ============================================================================

/// Balance and activity of one address, as reported by the lookup service
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct AddressRecord {
    /// Address as echoed back by the service
    pub address: String,

    /// Number of transactions involving the address
    pub n_tx: u64,

    /// Total received, in satoshis
    pub total_received: u64,

    /// Total sent, in satoshis
    pub total_sent: u64,

    /// Current balance in satoshis. Authoritative over `derived_balance`.
    pub final_balance: i64,
}

impl AddressRecord {
    /// Balance implied by the received/sent totals
    pub fn derived_balance(&self) -> i128 {
        i128::from(self.total_received) - i128::from(self.total_sent)
    }

    pub fn balance_is_consistent(&self) -> bool {
        self.derived_balance() == i128::from(self.final_balance)
    }
}

// ============================================================================
// Diagnostics
// ============================================================================

/// Input line rejected by address validation
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ValidationError {
    /// 1-based line number in the input file
    pub line_number: usize,

    /// Trimmed token that failed validation
    pub token: String,
}

impl std::fmt::Display for ValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "line {}: {:?}", self.line_number, self.token)
    }
}

/// Failure confined to one batch; the run continues without its records
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct BatchError {
    /// 0-based batch index
    pub batch_index: usize,

    /// 0-based position of the batch's first address in the validated list
    pub first_address_index: usize,

    /// Number of addresses in the batch
    pub len: usize,

    pub reason: String,
}

impl std::fmt::Display for BatchError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "batch {} (addresses {} to {}): {}",
            self.batch_index + 1,
            self.first_address_index + 1,
            self.first_address_index + self.len,
            self.reason
        )
    }
}

// ============================================================================
// Run summary
// ============================================================================

/// Machine-readable summary of one run
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunSummary {
    pub summary_version: String,

    pub tool_version: String,

    pub run_timestamp: DateTime<Utc>,

    pub input_path: PathBuf,

    /// Export destination, if anything was exported
    pub output_path: Option<PathBuf>,

    /// Final run status (`completed`, `cancelled`, `no_addresses`)
    pub status: String,

    pub counts: RunCounts,

    #[serde(default)]
    pub batch_errors: Vec<BatchError>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq, Eq)]
pub struct RunCounts {
    pub lines_read: usize,
    pub valid_addresses: usize,
    pub invalid_lines: usize,
    pub batches: usize,
    pub failed_batches: usize,
    pub skipped_batches: usize,
    pub records: usize,
}

impl RunSummary {
    pub fn new(input_path: PathBuf) -> Self {
        Self {
            summary_version: SUMMARY_VERSION.to_string(),
            tool_version: env!("CARGO_PKG_VERSION").to_string(),
            run_timestamp: Utc::now(),
            input_path,
            output_path: None,
            status: String::new(),
            counts: RunCounts::default(),
            batch_errors: Vec::new(),
        }
    }

    pub fn save(&self, path: &std::path::Path) -> anyhow::Result<()> {
        let json = serde_json::to_string_pretty(self)?;
        std::fs::write(path, json)?;
        Ok(())
    }
}
