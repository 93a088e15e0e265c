//! Batched balance lookups for validated addresses.
//!
//! Addresses are split into fixed-size batches, one request each. Every
//! batch, failed or not, is followed by a pause of the configured delay
//! before its request stream issues the next one; the final batch is not.
//! With more than one stream in flight, a shared rate limiter also keeps
//! request starts at least one delay apart. Results are merged in batch
//! order, so the outcome does not depend on completion order.

use crate::bitcoin::ValidatedAddress;
use crate::client::BlockchainInfoClient;
use crate::config::RateLimitConfig;
use crate::schemas::{AddressRecord, BatchError};
use crate::status::{RunState, StatusObserver, StatusUpdate};
use futures::stream::{self, StreamExt};
use governor::{DefaultDirectRateLimiter, Quota, RateLimiter};
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Split `addresses` into consecutive batches of at most `batch_size`.
///
/// A size of 0 is treated as 1.
pub fn partition_batches(
    addresses: &[ValidatedAddress],
    batch_size: usize,
) -> Vec<&[ValidatedAddress]> {
    addresses.chunks(batch_size.max(1)).collect()
}

/// What one batch produced
#[derive(Debug)]
enum BatchOutcome {
    Fetched(Vec<AddressRecord>),
    Failed(BatchError),
    /// Not attempted because the run was cancelled
    Skipped,
}

/// Merged result of a fetch
#[derive(Debug, Default)]
pub struct FetchOutcome {
    /// Records from successful batches, in batch order
    pub records: Vec<AddressRecord>,
    pub failures: Vec<BatchError>,
    /// Total batches the input was split into
    pub batches: usize,
    /// Batches never attempted due to cancellation
    pub skipped_batches: usize,
    pub cancelled: bool,
}

/// Issues one multiaddr request per batch
pub struct BatchFetcher {
    client: BlockchainInfoClient,
    batch_size: usize,
    max_concurrent: usize,
    /// Pause after each batch within a request stream
    delay: Duration,
    /// Start spacing across streams, only when more than one is in flight
    pacer: Option<DefaultDirectRateLimiter>,
}

impl BatchFetcher {
    pub fn new(client: BlockchainInfoClient, limits: &RateLimitConfig) -> Self {
        let max_concurrent = limits.max_concurrent_batches.max(1);

        // A zero period has no quota: no start spacing at all
        let pacer = if max_concurrent > 1 {
            Quota::with_period(limits.delay()).map(RateLimiter::direct)
        } else {
            None
        };

        Self {
            client,
            batch_size: limits.batch_size.max(1),
            max_concurrent,
            delay: limits.delay(),
            pacer,
        }
    }

    /// Fetch records for every address.
    ///
    /// Never fails as a whole: each failed batch becomes a [`BatchError`].
    /// `cancel` is checked before each batch and while pausing between
    /// batches, never in the middle of a request.
    pub async fn fetch(
        &self,
        addresses: &[ValidatedAddress],
        observer: &dyn StatusObserver,
        cancel: &CancellationToken,
    ) -> FetchOutcome {
        let batches = partition_batches(addresses, self.batch_size);
        let total = batches.len();

        info!(
            "Fetching {} addresses in {} batches (size={}, concurrency={})",
            addresses.len(),
            total,
            self.batch_size,
            self.max_concurrent
        );

        let outcomes: Vec<BatchOutcome> = stream::iter(batches.into_iter().enumerate())
            .map(|(index, batch)| self.fetch_batch(index, total, batch, observer, cancel))
            .buffered(self.max_concurrent)
            .collect()
            .await;

        let mut merged = FetchOutcome {
            batches: total,
            ..FetchOutcome::default()
        };

        for outcome in outcomes {
            match outcome {
                BatchOutcome::Fetched(records) => merged.records.extend(records),
                BatchOutcome::Failed(error) => merged.failures.push(error),
                BatchOutcome::Skipped => merged.skipped_batches += 1,
            }
        }
        merged.cancelled = merged.skipped_batches > 0;

        info!(
            "Fetched {} records ({} failed batches, {} skipped)",
            merged.records.len(),
            merged.failures.len(),
            merged.skipped_batches
        );

        merged
    }

    async fn fetch_batch(
        &self,
        index: usize,
        total: usize,
        batch: &[ValidatedAddress],
        observer: &dyn StatusObserver,
        cancel: &CancellationToken,
    ) -> BatchOutcome {
        if cancel.is_cancelled() {
            debug!("Skipping batch {} after cancellation", index + 1);
            return BatchOutcome::Skipped;
        }

        if let Some(pacer) = &self.pacer {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    debug!("Cancelled while waiting to send batch {}", index + 1);
                    return BatchOutcome::Skipped;
                }
                _ = pacer.until_ready() => {}
            }
        }

        let outcome = self.query_batch(index, total, batch, observer).await;

        if index + 1 < total && !self.delay.is_zero() {
            debug!("Pausing {:?} after batch {}", self.delay, index + 1);
            tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    debug!("Cancelled while pausing after batch {}", index + 1);
                }
                _ = tokio::time::sleep(self.delay) => {}
            }
        }

        outcome
    }

    async fn query_batch(
        &self,
        index: usize,
        total: usize,
        batch: &[ValidatedAddress],
        observer: &dyn StatusObserver,
    ) -> BatchOutcome {
        let first = index * self.batch_size;
        observer.on_status(&StatusUpdate::info(
            RunState::Fetching,
            format!(
                "Querying batch {}/{} (addresses {} to {})",
                index + 1,
                total,
                first + 1,
                first + batch.len()
            ),
        ));

        match self.client.multiaddr(batch).await {
            Ok(records) => {
                debug!("Batch {}/{} returned {} records", index + 1, total, records.len());
                BatchOutcome::Fetched(records)
            }
            Err(e) => {
                let error = BatchError {
                    batch_index: index,
                    first_address_index: first,
                    len: batch.len(),
                    reason: e.to_string(),
                };
                warn!("{}", error);
                observer.on_status(&StatusUpdate::warning(
                    RunState::Fetching,
                    format!(
                        "Failed to fetch data for addresses {} to {}",
                        first + 1,
                        first + batch.len()
                    ),
                ));
                BatchOutcome::Failed(error)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::join_addresses;
    use crate::config::ApiConfig;
    use crate::status::{CollectingObserver, StatusLevel};
    use serde_json::json;
    use std::time::{Duration, Instant};
    use wiremock::matchers::{method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    const BASE58: &[u8] = b"123456789ABCDEFGHJKLMNPQRSTUVWXYZabcdefghijkmnopqrstuvwxyz";

    /// Distinct, syntactically valid P2PKH address for index `i`
    fn synthetic_address(i: usize) -> ValidatedAddress {
        let mut s = String::from("1");
        let mut n = i;
        for _ in 0..30 {
            s.push(BASE58[n % BASE58.len()] as char);
            n /= BASE58.len();
        }
        ValidatedAddress::parse(&s).unwrap()
    }

    fn synthetic_addresses(count: usize) -> Vec<ValidatedAddress> {
        (0..count).map(synthetic_address).collect()
    }

    fn body_for(batch: &[ValidatedAddress], n_tx: u64) -> serde_json::Value {
        let entries: Vec<_> = batch
            .iter()
            .map(|a| {
                json!({
                    "address": a.as_str(),
                    "n_tx": n_tx,
                    "total_received": 1000,
                    "total_sent": 400,
                    "final_balance": 600
                })
            })
            .collect();
        json!({ "addresses": entries })
    }

    fn fetcher_for(server: &MockServer, batch_size: usize, delay_ms: u64, concurrency: usize) -> BatchFetcher {
        let api = ApiConfig {
            base_url: server.uri(),
            request_timeout_secs: 5,
            ..ApiConfig::default()
        };
        let limits = RateLimitConfig {
            batch_size,
            delay_ms,
            max_concurrent_batches: concurrency,
        };
        BatchFetcher::new(BlockchainInfoClient::new(&api).unwrap(), &limits)
    }

    async fn mount_batch(server: &MockServer, batch: &[ValidatedAddress], template: ResponseTemplate) {
        Mock::given(method("GET"))
            .and(path("/multiaddr"))
            .and(query_param("active", join_addresses(batch)))
            .respond_with(template)
            .mount(server)
            .await;
    }

    #[test]
    fn test_partition_120_by_50() {
        let addresses = synthetic_addresses(120);
        let batches = partition_batches(&addresses, 50);
        let sizes: Vec<usize> = batches.iter().map(|b| b.len()).collect();
        assert_eq!(sizes, vec![50, 50, 20]);
    }

    #[test]
    fn test_partition_reproduces_input() {
        let addresses = synthetic_addresses(37);
        for size in [1, 5, 36, 37, 50] {
            let batches = partition_batches(&addresses, size);
            assert!(batches.iter().all(|b| b.len() <= size));
            let rejoined: Vec<ValidatedAddress> =
                batches.iter().flat_map(|b| b.iter().cloned()).collect();
            assert_eq!(rejoined, addresses);
        }
    }

    #[test]
    fn test_partition_edge_cases() {
        assert!(partition_batches(&[], 50).is_empty());
        let addresses = synthetic_addresses(3);
        assert_eq!(partition_batches(&addresses, 0).len(), 3);
    }

    #[tokio::test]
    async fn test_failed_batch_does_not_abort_run() {
        let server = MockServer::start().await;
        let addresses = synthetic_addresses(5);
        mount_batch(&server, &addresses[0..2], ResponseTemplate::new(500)).await;
        mount_batch(&server, &addresses[2..4], ResponseTemplate::new(200).set_body_json(body_for(&addresses[2..4], 7))).await;
        mount_batch(&server, &addresses[4..5], ResponseTemplate::new(200).set_body_json(body_for(&addresses[4..5], 1))).await;

        let observer = CollectingObserver::new();
        let outcome = fetcher_for(&server, 2, 0, 1)
            .fetch(&addresses, &observer, &CancellationToken::new())
            .await;

        assert_eq!(outcome.batches, 3);
        assert_eq!(outcome.records.len(), 3);
        assert_eq!(outcome.records[0].address, addresses[2].as_str());
        assert_eq!(outcome.failures.len(), 1);
        assert_eq!(outcome.failures[0].batch_index, 0);
        assert_eq!(outcome.failures[0].first_address_index, 0);
        assert_eq!(outcome.failures[0].len, 2);
        assert!(!outcome.cancelled);

        let warnings: Vec<_> = observer
            .updates()
            .into_iter()
            .filter(|u| u.level == StatusLevel::Warning)
            .collect();
        assert_eq!(warnings.len(), 1);
        assert_eq!(warnings[0].message, "Failed to fetch data for addresses 1 to 2");
    }

    #[tokio::test]
    async fn test_malformed_body_is_batch_error() {
        let server = MockServer::start().await;
        let addresses = synthetic_addresses(2);
        mount_batch(&server, &addresses, ResponseTemplate::new(200).set_body_json(json!({"wallet": {}}))).await;

        let outcome = fetcher_for(&server, 50, 0, 1)
            .fetch(&addresses, &CollectingObserver::new(), &CancellationToken::new())
            .await;

        assert!(outcome.records.is_empty());
        assert_eq!(outcome.failures.len(), 1);
        assert!(outcome.failures[0].reason.contains("Malformed"));
    }

    #[tokio::test]
    async fn test_concurrent_batches_merge_in_batch_order() {
        let server = MockServer::start().await;
        let addresses = synthetic_addresses(12);
        let batches = partition_batches(&addresses, 3);
        // Earlier batches answer slower, so completion order is reversed
        for (i, batch) in batches.iter().enumerate() {
            let delay = Duration::from_millis(40 * (batches.len() - i) as u64);
            mount_batch(
                &server,
                batch,
                ResponseTemplate::new(200)
                    .set_body_json(body_for(batch, i as u64))
                    .set_delay(delay),
            )
            .await;
        }

        let outcome = fetcher_for(&server, 3, 0, 4)
            .fetch(&addresses, &CollectingObserver::new(), &CancellationToken::new())
            .await;

        let returned: Vec<&str> = outcome.records.iter().map(|r| r.address.as_str()).collect();
        let expected: Vec<&str> = addresses.iter().map(|a| a.as_str()).collect();
        assert_eq!(returned, expected);
    }

    #[tokio::test]
    async fn test_pause_follows_every_batch_including_failures() {
        let server = MockServer::start().await;
        let addresses = synthetic_addresses(3);
        let latency = Duration::from_millis(150);
        for (i, batch) in partition_batches(&addresses, 1).into_iter().enumerate() {
            let template = if i == 1 {
                ResponseTemplate::new(500)
            } else {
                ResponseTemplate::new(200).set_body_json(body_for(batch, 1))
            };
            mount_batch(&server, batch, template.set_delay(latency)).await;
        }

        let started = Instant::now();
        let outcome = fetcher_for(&server, 1, 200, 1)
            .fetch(&addresses, &CollectingObserver::new(), &CancellationToken::new())
            .await;
        let elapsed = started.elapsed();

        assert_eq!(outcome.records.len(), 2);
        assert_eq!(outcome.failures.len(), 1);
        // Three responses plus a pause after the first two, none after the last
        assert!(elapsed >= Duration::from_millis(3 * 150 + 2 * 200), "elapsed {:?}", elapsed);
        assert!(elapsed < Duration::from_millis(3000), "elapsed {:?}", elapsed);
    }

    #[tokio::test]
    async fn test_concurrent_request_starts_stay_spaced() {
        let server = MockServer::start().await;
        let addresses = synthetic_addresses(3);
        for batch in partition_batches(&addresses, 1) {
            mount_batch(&server, batch, ResponseTemplate::new(200).set_body_json(body_for(batch, 1))).await;
        }

        let started = Instant::now();
        let outcome = fetcher_for(&server, 1, 100, 3)
            .fetch(&addresses, &CollectingObserver::new(), &CancellationToken::new())
            .await;
        let elapsed = started.elapsed();

        assert_eq!(outcome.records.len(), 3);
        // Third start waits two periods on the shared limiter
        assert!(elapsed >= Duration::from_millis(180), "elapsed {:?}", elapsed);
        assert!(elapsed < Duration::from_millis(1000), "elapsed {:?}", elapsed);
    }

    #[tokio::test]
    async fn test_cancelled_before_start_sends_nothing() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200))
            .expect(0)
            .mount(&server)
            .await;

        let cancel = CancellationToken::new();
        cancel.cancel();
        let outcome = fetcher_for(&server, 2, 0, 1)
            .fetch(&synthetic_addresses(5), &CollectingObserver::new(), &cancel)
            .await;

        assert!(outcome.cancelled);
        assert_eq!(outcome.skipped_batches, 3);
        assert!(outcome.records.is_empty());
    }

    /// Cancels the run as soon as the first batch has been sent
    struct CancelAfterFirstBatch {
        token: CancellationToken,
    }

    impl StatusObserver for CancelAfterFirstBatch {
        fn on_status(&self, update: &StatusUpdate) {
            if update.message.starts_with("Querying batch 1/") {
                self.token.cancel();
            }
        }
    }

    #[tokio::test]
    async fn test_cancel_between_batches_keeps_partial_results() {
        let server = MockServer::start().await;
        let addresses = synthetic_addresses(6);
        for batch in partition_batches(&addresses, 2) {
            mount_batch(&server, batch, ResponseTemplate::new(200).set_body_json(body_for(batch, 4))).await;
        }

        let cancel = CancellationToken::new();
        let observer = CancelAfterFirstBatch { token: cancel.clone() };
        let outcome = fetcher_for(&server, 2, 0, 1)
            .fetch(&addresses, &observer, &cancel)
            .await;

        // The in-flight request completes; later batches are skipped
        assert!(outcome.cancelled);
        assert_eq!(outcome.records.len(), 2);
        assert_eq!(outcome.skipped_batches, 2);
        assert_eq!(server.received_requests().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_cancel_cuts_pause_short() {
        let server = MockServer::start().await;
        let addresses = synthetic_addresses(4);
        for batch in partition_batches(&addresses, 2) {
            mount_batch(&server, batch, ResponseTemplate::new(200).set_body_json(body_for(batch, 2))).await;
        }

        let cancel = CancellationToken::new();
        let observer = CancelAfterFirstBatch { token: cancel.clone() };
        let started = Instant::now();
        let outcome = fetcher_for(&server, 2, 10_000, 1)
            .fetch(&addresses, &observer, &cancel)
            .await;

        assert!(started.elapsed() < Duration::from_secs(2), "elapsed {:?}", started.elapsed());
        assert!(outcome.cancelled);
        assert_eq!(outcome.records.len(), 2);
        assert_eq!(outcome.skipped_batches, 1);
    }
}
