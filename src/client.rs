//! blockchain.info multiaddr client.
//!
//! One GET per batch: `{base}/multiaddr?active=a|b|c`. No retries; a failed
//! request is reported to the caller, which decides whether the run goes on.

use crate::bitcoin::ValidatedAddress;
use crate::config::ApiConfig;
use crate::schemas::AddressRecord;
use serde::Deserialize;
use thiserror::Error;
use tracing::{debug, warn};

/// Separator the endpoint expects between addresses in `active`
pub const ADDRESS_DELIMITER: &str = "|";

/// Response body kept for diagnostics on non-success statuses
const MAX_ERROR_BODY: usize = 256;

#[derive(Error, Debug)]
pub enum ApiError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("HTTP {status}: {body}")]
    Status { status: u16, body: String },

    #[error("Malformed response body: {0}")]
    Deserialize(#[from] serde_json::Error),

    #[error("Empty batch")]
    EmptyBatch,
}

/// multiaddr response (only the fields this tool reads)
#[derive(Debug, Deserialize)]
struct MultiAddrResponse {
    addresses: Vec<AddressRecord>,
}

/// HTTP client for the explorer's multi-address endpoint
#[derive(Debug, Clone)]
pub struct BlockchainInfoClient {
    client: reqwest::Client,
    endpoint: String,
}

impl BlockchainInfoClient {
    pub fn new(config: &ApiConfig) -> Result<Self, ApiError> {
        let client = reqwest::Client::builder()
            .timeout(config.request_timeout())
            .user_agent(config.user_agent.clone())
            .build()?;

        Ok(Self {
            client,
            endpoint: config.multiaddr_url(),
        })
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    /// Look up every address in `batch` with a single request.
    pub async fn multiaddr(
        &self,
        batch: &[ValidatedAddress],
    ) -> Result<Vec<AddressRecord>, ApiError> {
        if batch.is_empty() {
            return Err(ApiError::EmptyBatch);
        }

        let active = join_addresses(batch);
        debug!("GET {} ({} addresses)", self.endpoint, batch.len());

        let response = self
            .client
            .get(&self.endpoint)
            .query(&[("active", active.as_str())])
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            warn!("Status Code: {}, Response: {}", status.as_u16(), body);
            return Err(ApiError::Status {
                status: status.as_u16(),
                body: truncate(&body, MAX_ERROR_BODY),
            });
        }

        // Read the body first so transport errors and bad JSON stay distinct
        let bytes = response.bytes().await?;
        let parsed: MultiAddrResponse = serde_json::from_slice(&bytes)?;

        if parsed.addresses.len() != batch.len() {
            debug!(
                "Requested {} addresses, service returned {}",
                batch.len(),
                parsed.addresses.len()
            );
        }

        for record in &parsed.addresses {
            if !record.balance_is_consistent() {
                warn!(
                    "final_balance {} for {} differs from received-sent {}, keeping reported value",
                    record.final_balance,
                    record.address,
                    record.derived_balance()
                );
            }
        }

        Ok(parsed.addresses)
    }
}

/// Join a batch into the `active` parameter form
pub fn join_addresses(batch: &[ValidatedAddress]) -> String {
    batch
        .iter()
        .map(ValidatedAddress::as_str)
        .collect::<Vec<_>>()
        .join(ADDRESS_DELIMITER)
}

fn truncate(body: &str, max: usize) -> String {
    match body.char_indices().nth(max) {
        Some((idx, _)) => format!("{}...", &body[..idx]),
        None => body.to_string(),
    }
}
