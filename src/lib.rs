//! Bitcoin Multi-Address Checker Library
//!
//! Loads a list of Bitcoin addresses, looks up their transaction counts and
//! balances through the blockchain.info `multiaddr` endpoint, ranks them by
//! activity and exports the result as CSV.
//!
//! # Pipeline Stages
//!
//! 1. **Validation** ([`bitcoin`]): Loads the address file and drops tokens that are not P2PKH, P2SH or bech32 addresses
//! 2. **Batch Fetching** ([`fetch`]): Queries the service in batches of up to 50, paced and cancellable
//! 3. **Ranking** ([`rank`]): Stable sort by transaction count, most active first
//! 4. **Export** ([`export`]): Writes `Address,n_tx,total_received,total_sent,final_balance` CSV
//!
//! [`pipeline::Pipeline`] runs the stages in order and reports progress to a
//! [`status::StatusObserver`].
//!
//! # Example
//!
//! ```no_run
//! use btc_multiaddr_checker::config::CheckerConfig;
//! use btc_multiaddr_checker::pipeline::Pipeline;
//! use btc_multiaddr_checker::status::LogObserver;
//! use std::path::Path;
//! use tokio_util::sync::CancellationToken;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = CheckerConfig::load()?;
//!     let pipeline = Pipeline::new(&config)?;
//!     let report = pipeline
//!         .run(
//!             Path::new("addresses.txt"),
//!             Path::new("addresses processed.csv"),
//!             &LogObserver,
//!             &CancellationToken::new(),
//!         )
//!         .await?;
//!     println!("Fetched {} records", report.records.len());
//!     Ok(())
//! }
//! ```

pub mod bitcoin;
pub mod client;
pub mod config;
pub mod export;
pub mod fetch;
pub mod pipeline;
pub mod rank;
pub mod schemas;
pub mod status;

// Re-export commonly used types
pub use config::CheckerConfig;
pub use pipeline::{Pipeline, RunReport, RunStatus};
pub use schemas::{AddressRecord, BatchError, RunSummary, ValidationError};
