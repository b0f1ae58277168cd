use std::sync::Arc;
use std::time::Duration;

use batcher_chain_client_interface::{EthClient, EthClientError};
use batcher_utils::retry::{retry_with_backoff, retry_with_backoff_if};
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, error, info, warn};

use crate::config::FinalizerConfig;
use crate::core::client::BlobStore;
use crate::error::FinalizerError;
use crate::pipeline::worker_pool::WorkerPool;
use crate::types::blob::{BlobKey, BlobStatus};
use crate::utils::metrics::{BatcherMetrics, BlobOutcome};

const MAX_RETRIES: usize = 3;
const BASE_RETRY_DELAY: Duration = Duration::from_secs(1);

/// Promotes confirmed blobs to finalized once their confirmation block is at or below the chain's
/// finalized head.
pub struct Finalizer {
    config: FinalizerConfig,
    blob_store: Arc<dyn BlobStore>,
    eth_client: Arc<dyn EthClient>,
    metrics: Arc<BatcherMetrics>,
}

impl Finalizer {
    pub fn new(
        config: FinalizerConfig,
        blob_store: Arc<dyn BlobStore>,
        eth_client: Arc<dyn EthClient>,
        metrics: Arc<BatcherMetrics>,
    ) -> Self {
        Self { config, blob_store, eth_client, metrics }
    }

    pub fn start(self: &Arc<Self>, shutdown_token: CancellationToken, tracker: &TaskTracker) {
        let finalizer = Arc::clone(self);
        tracker.spawn(async move {
            let mut ticker = tokio::time::interval(finalizer.config.loop_interval);
            loop {
                tokio::select! {
                    _ = shutdown_token.cancelled() => break,
                    _ = ticker.tick() => {
                        tokio::select! {
                            _ = shutdown_token.cancelled() => break,
                            result = finalizer.finalize_blobs() => {
                                if let Err(err) = result {
                                    error!(component = "Finalizer", error = %err, "Error finalizing blobs");
                                }
                            }
                        }
                    }
                }
            }
            info!(component = "Finalizer", "Finalizer stopped");
        });
    }

    /// One pass over every confirmed blob. Per-blob errors are logged and skipped. Failing to fetch a
    /// later page ends the pass after the blobs already fetched are done.
    pub async fn finalize_blobs(self: &Arc<Self>) -> Result<(), FinalizerError> {
        let finalized_block = self.get_latest_finalized_block().await?;
        self.metrics.finalizer_runs.add(1, &[]);
        self.metrics.last_finalized_block.record(finalized_block as f64, &[]);

        let pool = WorkerPool::new(self.config.num_workers);
        let mut start_key = None;
        let mut num_blobs = 0;
        loop {
            let fetched = self
                .blob_store
                .get_blob_metadata_by_status_with_pagination(
                    BlobStatus::Confirmed,
                    self.config.num_blobs_per_fetch,
                    start_key,
                )
                .await;
            let (page, next_key) = match fetched {
                Ok(fetched) => fetched,
                Err(err) if num_blobs == 0 => return Err(err.into()),
                Err(err) => {
                    // Blobs already submitted still finish below.
                    error!(component = "Finalizer", num_blobs, error = %err, "Error fetching confirmed blobs, ending pass early");
                    break;
                }
            };
            num_blobs += page.len();
            for metadata in page {
                let finalizer = Arc::clone(self);
                pool.submit(async move { finalizer.update_blob(metadata.key(), finalized_block).await });
            }
            match next_key {
                Some(key) => start_key = Some(key),
                None => break,
            }
        }
        pool.wait().await;

        info!(component = "Finalizer", finalized_block, num_blobs, "Finalizer pass complete");
        Ok(())
    }

    async fn update_blob(&self, key: BlobKey, finalized_block: u64) {
        let metadata = match self.blob_store.get_blob_metadata(&key).await {
            Ok(metadata) => metadata,
            Err(err) => {
                error!(component = "Finalizer", blob_key = %key, error = %err, "Error getting blob metadata");
                return;
            }
        };
        // Another pass may already have moved it on.
        if metadata.blob_status != BlobStatus::Confirmed {
            return;
        }
        let Some(info) = metadata.confirmation_info.as_ref() else {
            warn!(component = "Finalizer", blob_key = %key, "Confirmed blob has no confirmation info");
            return;
        };
        if u64::from(info.confirmation_block_number) > finalized_block {
            debug!(component = "Finalizer", blob_key = %key, "Confirmation block not yet finalized");
            return;
        }

        let tx_hash = info.confirmation_txn_hash;
        let receipt = retry_with_backoff_if(
            MAX_RETRIES,
            BASE_RETRY_DELAY,
            |err: &EthClientError| !err.is_not_found(),
            |_| async move {
                tokio::time::timeout(self.config.timeout, self.eth_client.transaction_receipt(tx_hash))
                    .await
                    .unwrap_or_else(|_| Err(EthClientError::Timeout("transaction receipt".to_string())))
            },
        )
        .await;
        let receipt = match receipt {
            Ok(receipt) => receipt,
            Err(err) if err.is_not_found() => {
                warn!(component = "Finalizer", blob_key = %key, tx_hash = %tx_hash, "Confirmation transaction not found, failing blob");
                match self.blob_store.mark_blob_failed(&key).await {
                    Ok(()) => self.metrics.record_blobs(BlobOutcome::Failed, 1),
                    Err(err) => error!(component = "Finalizer", blob_key = %key, error = %err, "Error marking blob as failed"),
                }
                return;
            }
            Err(err) => {
                error!(component = "Finalizer", blob_key = %key, tx_hash = %tx_hash, error = %err, "Error getting transaction receipt");
                return;
            }
        };

        let confirmation_block_number = receipt.block_number as u32;
        if confirmation_block_number != info.confirmation_block_number {
            info!(
                component = "Finalizer",
                blob_key = %key,
                from = info.confirmation_block_number,
                to = confirmation_block_number,
                "Confirmation block changed"
            );
            if let Err(err) =
                self.blob_store.update_confirmation_block_number(&metadata, confirmation_block_number).await
            {
                error!(component = "Finalizer", blob_key = %key, error = %err, "Error updating confirmation block number");
                return;
            }
        }
        if receipt.block_number > finalized_block {
            return;
        }

        match self.blob_store.mark_blob_finalized(&key).await {
            Ok(()) => self.metrics.record_blobs(BlobOutcome::Finalized, 1),
            Err(err) => error!(component = "Finalizer", blob_key = %key, error = %err, "Error marking blob as finalized"),
        }
    }

    async fn get_latest_finalized_block(&self) -> Result<u64, FinalizerError> {
        retry_with_backoff(MAX_RETRIES, BASE_RETRY_DELAY, |_| async {
            tokio::time::timeout(self.config.timeout, self.eth_client.finalized_block_number())
                .await
                .unwrap_or_else(|_| Err(EthClientError::Timeout("finalized block number".to_string())))
        })
        .await
        .map_err(FinalizerError::FinalizedBlock)
    }
}
