use std::collections::HashMap;
use std::sync::{Arc, Mutex as StdMutex, PoisonError};
use std::time::Instant;

use alloy::primitives::U256;
use chrono::Utc;
use tokio::sync::{mpsc, Mutex};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::config::MinibatcherConfig;
use crate::core::client::dispatcher::{DispatchError, FailureAggregator, OperatorFailure};
use crate::core::client::{BlobStore, Dispatcher, MinibatchStore};
use crate::error::{FailReason, MinibatcherError};
use crate::pipeline::encoding_streamer::{Batch, EncodingStreamer};
use crate::pipeline::worker_pool::WorkerPool;
use crate::types::attestation::Signature;
use crate::types::batch::{
    BatchRecord, BlobMinibatchMapping, DispersalRequest, DispersalResponse, MinibatchDispersal, MinibatchRecord,
};
use crate::types::blob::BlobMetadata;
use crate::types::encoding::{BlobMessage, EncodedBlob};
use crate::types::header::{BatchHeader, BlobHeader};
use crate::types::operator::{IndexedOperatorInfo, IndexedOperatorState, OperatorId};
use crate::utils::metrics::{BatcherMetrics, BlobOutcome};

/// Everything dispersed so far under one batch record. Handed to the confirmer through
/// [`Minibatcher::pop_batch_state`].
#[derive(Debug, Clone)]
pub struct BatchState {
    pub batch_id: Uuid,
    pub reference_block_number: u64,
    pub blob_headers: Vec<BlobHeader>,
    pub blob_metadata: Vec<Arc<BlobMetadata>>,
    pub operator_state: Arc<IndexedOperatorState>,
    pub num_minibatches: u32,
}

#[derive(Default)]
struct CurrentBatch {
    batch_id: Option<Uuid>,
    reference_block_number: u64,
    minibatch_index: u32,
}

/// Cuts minibatches out of the encoding streamer and disperses them to the operators.
pub struct Minibatcher {
    config: MinibatcherConfig,
    streamer: Arc<EncodingStreamer>,
    blob_store: Arc<dyn BlobStore>,
    minibatch_store: Arc<dyn MinibatchStore>,
    dispatcher: Arc<dyn Dispatcher>,
    pool: WorkerPool,
    metrics: Arc<BatcherMetrics>,
    shutdown_token: CancellationToken,
    batches: StdMutex<HashMap<Uuid, BatchState>>,
    current: Mutex<CurrentBatch>,
}

impl Minibatcher {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        config: MinibatcherConfig,
        streamer: Arc<EncodingStreamer>,
        blob_store: Arc<dyn BlobStore>,
        minibatch_store: Arc<dyn MinibatchStore>,
        dispatcher: Arc<dyn Dispatcher>,
        pool: WorkerPool,
        metrics: Arc<BatcherMetrics>,
        shutdown_token: CancellationToken,
    ) -> Self {
        Self {
            config,
            streamer,
            blob_store,
            minibatch_store,
            dispatcher,
            pool,
            metrics,
            shutdown_token,
            batches: StdMutex::new(HashMap::new()),
            current: Mutex::new(CurrentBatch::default()),
        }
    }

    pub async fn current_batch_id(&self) -> Option<Uuid> {
        self.current.lock().await.batch_id
    }

    pub async fn minibatch_index(&self) -> u32 {
        self.current.lock().await.minibatch_index
    }

    /// Removes and returns the accumulated state of a batch. A second call for the same id returns
    /// `None`.
    pub fn pop_batch_state(&self, batch_id: Uuid) -> Option<BatchState> {
        self.batches.lock().unwrap_or_else(PoisonError::into_inner).remove(&batch_id)
    }

    pub fn has_batch_state(&self, batch_id: Uuid) -> bool {
        self.batches.lock().unwrap_or_else(PoisonError::into_inner).contains_key(&batch_id)
    }

    /// One minibatch iteration: form a minibatch, roll over to a new batch record when the reference
    /// block advanced, persist the records and hand every operator its dispersal job.
    pub async fn handle_single_minibatch(&self) -> Result<(), MinibatcherError> {
        let pending = self.pool.waiting_queue_size();
        if pending > self.config.max_num_connections {
            return Err(MinibatcherError::TooManyPendingRequests { pending, max: self.config.max_num_connections });
        }

        let batch = self.streamer.create_minibatch().await?;
        let reference_block_number = batch.batch_header.reference_block_number;

        let mut current = self.current.lock().await;
        if current.batch_id.is_none() || current.reference_block_number < reference_block_number {
            if let Some(previous) = current.batch_id {
                if let Err(err) = self.minibatch_store.mark_batch_formed(previous, current.minibatch_index).await {
                    error!(component = "Minibatcher", batch_id = %previous, error = %err, "Error marking batch as formed");
                    self.handle_failure(&batch.blob_metadata, FailReason::FailUpdateBatchStatus).await;
                    return Err(err.into());
                }
                info!(
                    component = "Minibatcher",
                    batch_id = %previous,
                    num_minibatches = current.minibatch_index,
                    "Batch formed"
                );
            }

            let batch_id = Uuid::now_v7();
            current.batch_id = Some(batch_id);
            current.reference_block_number = reference_block_number;
            current.minibatch_index = 0;

            if let Err(err) = self.minibatch_store.put_batch(BatchRecord::new_pending(batch_id, reference_block_number)).await {
                error!(component = "Minibatcher", batch_id = %batch_id, error = %err, "Error storing batch record");
                current.batch_id = None;
                self.handle_failure(&batch.blob_metadata, FailReason::FailStoreBatch).await;
                return Err(err.into());
            }
            self.batches.lock().unwrap_or_else(PoisonError::into_inner).insert(
                batch_id,
                BatchState {
                    batch_id,
                    reference_block_number,
                    blob_headers: Vec::new(),
                    blob_metadata: Vec::new(),
                    operator_state: Arc::clone(&batch.state),
                    num_minibatches: 0,
                },
            );
            info!(component = "Minibatcher", batch_id = %batch_id, reference_block_number, "Created new batch");
        }

        let Some(batch_id) = current.batch_id else {
            return Ok(());
        };
        let minibatch_index = current.minibatch_index;
        let blob_headers = batch.blob_headers();

        if let Err(err) = self.store_blob_minibatch_mappings(batch_id, minibatch_index, &batch, &blob_headers).await {
            self.handle_failure(&batch.blob_metadata, FailReason::FailStoreMappings).await;
            return Err(err);
        }

        let minibatch = MinibatchRecord {
            batch_id,
            minibatch_index,
            blob_header_hashes: blob_headers.iter().map(BlobHeader::hash).collect(),
            batch_size: batch.batch_size,
            reference_block_number,
        };
        if let Err(err) = self.minibatch_store.put_minibatch(minibatch).await {
            error!(component = "Minibatcher", batch_id = %batch_id, minibatch_index, error = %err, "Error storing minibatch");
            self.handle_failure(&batch.blob_metadata, FailReason::FailStoreBatch).await;
            return Err(err.into());
        }

        if let Some(state) = self.batches.lock().unwrap_or_else(PoisonError::into_inner).get_mut(&batch_id) {
            state.blob_headers.extend(blob_headers);
            state.blob_metadata.extend(batch.blob_metadata.iter().cloned());
            state.num_minibatches = minibatch_index + 1;
        }
        current.minibatch_index += 1;
        drop(current);

        self.metrics.minibatches_dispersed.add(1, &[]);
        self.metrics.batch_size.record(batch.batch_size as f64, &[]);
        info!(
            component = "Minibatcher",
            batch_id = %batch_id,
            minibatch_index,
            num_blobs = batch.encoded_blobs.len(),
            batch_size = batch.batch_size,
            "Dispersing minibatch"
        );

        self.disperse_batch(batch.state, batch.encoded_blobs, batch.batch_header, batch_id, minibatch_index).await;
        Ok(())
    }

    async fn store_blob_minibatch_mappings(
        &self,
        batch_id: Uuid,
        minibatch_index: u32,
        batch: &Batch,
        blob_headers: &[BlobHeader],
    ) -> Result<(), MinibatcherError> {
        if batch.blob_metadata.len() != blob_headers.len() {
            return Err(MinibatcherError::MappingLengthMismatch {
                metadata: batch.blob_metadata.len(),
                headers: blob_headers.len(),
            });
        }
        let mappings = batch
            .blob_metadata
            .iter()
            .zip(blob_headers)
            .enumerate()
            .map(|(blob_index, (metadata, blob_header))| BlobMinibatchMapping {
                blob_key: metadata.key(),
                batch_id,
                minibatch_index,
                blob_index: blob_index as u32,
                blob_header: blob_header.clone(),
            })
            .collect();
        self.minibatch_store.put_blob_minibatch_mappings(mappings).await.map_err(MinibatcherError::StoreMappings)
    }

    /// Records a dispersal request per operator and submits its dispersal job. Does not wait for the
    /// operators; responses land in the minibatch store.
    pub async fn disperse_batch(
        &self,
        state: Arc<IndexedOperatorState>,
        blobs: Vec<EncodedBlob>,
        batch_header: BatchHeader,
        batch_id: Uuid,
        minibatch_index: u32,
    ) {
        let blobs = Arc::new(blobs);
        let (report_tx, report_rx) = mpsc::channel(state.indexed_operators.len().max(1));
        let mut num_jobs = 0;

        for (operator_id, operator) in &state.indexed_operators {
            let dispersal = MinibatchDispersal {
                request: DispersalRequest {
                    batch_id,
                    minibatch_index,
                    operator_id: *operator_id,
                    socket: operator.socket.clone(),
                    num_blobs: blobs.len() as u32,
                    requested_at: Utc::now(),
                },
                response: DispersalResponse::default(),
            };
            if let Err(err) = self.minibatch_store.put_dispersal(dispersal.clone()).await {
                error!(
                    component = "Minibatcher",
                    operator_id = %operator_id,
                    error = %err,
                    "Error storing dispersal request"
                );
                continue;
            }

            num_jobs += 1;
            let job = DispersalJob {
                dispatcher: Arc::clone(&self.dispatcher),
                minibatch_store: Arc::clone(&self.minibatch_store),
                metrics: Arc::clone(&self.metrics),
                shutdown_token: self.shutdown_token.clone(),
                blobs: Arc::clone(&blobs),
                batch_header,
                operator_id: *operator_id,
                operator: operator.clone(),
                dispersal,
                timeout: self.config.pull_interval,
                max_retries: self.config.max_num_retries_per_dispersal,
            };
            let report_tx = report_tx.clone();
            self.pool.submit(async move {
                let report = job.run().await;
                let _ = report_tx.send(report).await;
            });
        }
        drop(report_tx);

        tokio::spawn(log_dispersal_failures(report_rx, state, num_jobs, batch_id, minibatch_index));
    }

    /// Drops the blobs' cached encodings and hands them back to the blob store for retry.
    pub async fn handle_failure(&self, blobs: &[Arc<BlobMetadata>], reason: FailReason) {
        let mut retried = 0;
        let mut failed = 0;
        for metadata in blobs {
            self.streamer.remove_encoded_blob(metadata);
            match self.blob_store.handle_blob_failure(metadata, self.config.max_num_retries_per_blob).await {
                Ok(true) => retried += 1,
                Ok(false) => failed += 1,
                Err(err) => {
                    error!(component = "Minibatcher", blob_key = %metadata.key(), error = %err, "Error handling blob failure")
                }
            }
        }
        self.metrics.record_blobs(BlobOutcome::Retried, retried);
        self.metrics.record_blobs(BlobOutcome::Failed, failed);
        warn!(component = "Minibatcher", reason = %reason, num_blobs = blobs.len(), retried, failed, "Handled minibatch failure");
    }
}

struct DispersalReport {
    operator_id: OperatorId,
    socket: String,
    error: Option<String>,
}

struct DispersalJob {
    dispatcher: Arc<dyn Dispatcher>,
    minibatch_store: Arc<dyn MinibatchStore>,
    metrics: Arc<BatcherMetrics>,
    shutdown_token: CancellationToken,
    blobs: Arc<Vec<EncodedBlob>>,
    batch_header: BatchHeader,
    operator_id: OperatorId,
    operator: IndexedOperatorInfo,
    dispersal: MinibatchDispersal,
    timeout: std::time::Duration,
    max_retries: usize,
}

impl DispersalJob {
    async fn run(self) -> DispersalReport {
        let started = Instant::now();
        let result = tokio::select! {
            _ = self.shutdown_token.cancelled() => Err("dispersal cancelled".to_string()),
            result = send_blobs_to_operator_with_retries(
                self.dispatcher.as_ref(),
                &self.blobs,
                self.batch_header,
                self.operator_id,
                &self.operator,
                self.timeout,
                self.max_retries,
            ) => result.map_err(|err| err.to_string()),
        };
        self.metrics.dispersal_latency.record(started.elapsed().as_secs_f64() * 1000.0, &[]);

        let (signatures, error) = match result {
            Ok(signatures) => (signatures, None),
            Err(err) => {
                warn!(
                    component = "Minibatcher",
                    operator_id = %self.operator_id,
                    socket = %self.operator.socket,
                    error = %err,
                    "Error sending blobs to operator"
                );
                (Vec::new(), Some(err))
            }
        };
        let response = DispersalResponse { signatures, responded_at: Some(Utc::now()), error: error.clone() };
        if let Err(err) = self.minibatch_store.update_dispersal_response(&self.dispersal, response).await {
            error!(
                component = "Minibatcher",
                operator_id = %self.operator_id,
                error = %err,
                "Error updating dispersal response"
            );
        }
        DispersalReport { operator_id: self.operator_id, socket: self.operator.socket, error }
    }
}

/// Sends an operator its bundles of every blob. The timeout starts at `timeout` and doubles after
/// every failed attempt.
pub async fn send_blobs_to_operator_with_retries(
    dispatcher: &dyn Dispatcher,
    blobs: &[EncodedBlob],
    batch_header: BatchHeader,
    operator_id: OperatorId,
    operator: &IndexedOperatorInfo,
    timeout: std::time::Duration,
    max_retries: usize,
) -> Result<Vec<Signature>, DispatchError> {
    let mut has_any_bundles = false;
    let messages: Vec<BlobMessage> = blobs
        .iter()
        .map(|blob| {
            let bundles = blob.bundles_by_operator.get(&operator_id).cloned().unwrap_or_default();
            has_any_bundles |= blob.bundles_by_operator.contains_key(&operator_id);
            BlobMessage { blob_header: blob.blob_header.clone(), bundles }
        })
        .collect();
    if !has_any_bundles {
        return Err(DispatchError::NotInAnyQuorum(operator_id));
    }

    let max_retries = max_retries.max(1);
    let mut timeout = timeout;
    let mut attempt = 0;
    loop {
        match dispatcher.send_blobs_to_operator(messages.clone(), batch_header, operator.clone(), timeout).await {
            Ok(signatures) => return Ok(signatures),
            Err(err) => {
                attempt += 1;
                if attempt >= max_retries {
                    return Err(err);
                }
                debug!(
                    component = "Minibatcher",
                    operator_id = %operator_id,
                    attempt,
                    error = %err,
                    "Retrying dispersal with a longer timeout"
                );
                timeout = timeout.saturating_mul(2);
            }
        }
    }
}

async fn log_dispersal_failures(
    mut reports: mpsc::Receiver<DispersalReport>,
    state: Arc<IndexedOperatorState>,
    num_jobs: usize,
    batch_id: Uuid,
    minibatch_index: u32,
) {
    let mut aggregator = FailureAggregator::new();
    for (quorum_id, total) in &state.operator_state.totals {
        aggregator.add_total_stake(*quorum_id, total.stake);
    }
    let mut received = 0;
    while received < num_jobs {
        let Some(report) = reports.recv().await else { break };
        received += 1;
        let Some(error) = report.error else { continue };
        let stake_by_quorum = state
            .operator_state
            .operators
            .iter()
            .filter_map(|(quorum_id, operators)| operators.get(&report.operator_id).map(|op| (*quorum_id, op.stake)))
            .collect::<std::collections::BTreeMap<_, U256>>();
        aggregator.add_failure(OperatorFailure { operator_id: report.operator_id, socket: report.socket, stake_by_quorum, error });
    }
    debug!(component = "Minibatcher", batch_id = %batch_id, minibatch_index, num_responses = received, "Minibatch responses are in");
    aggregator.log_summary();
}
