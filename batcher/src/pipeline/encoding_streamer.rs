use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::num::NonZeroUsize;
use std::sync::{Arc, Mutex as StdMutex, PoisonError};
use std::time::Duration;

use lru::LruCache;
use tokio::sync::{mpsc, Mutex};
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, error, info, warn};

use crate::config::StreamerConfig;
use crate::core::assignment::{
    get_blob_length, params_from_mins, validate_encoding_params, AssignmentCoordinator, AssignmentError,
};
use crate::core::client::blob_store::BlobStoreExclusiveStartKey;
use crate::core::client::encoder::EncoderError;
use crate::core::client::{BlobStore, EncoderClient, IndexedChainState};
use crate::core::merkle::MerkleTree;
use crate::error::EncodingStreamerError;
use crate::pipeline::encoded_blob_store::EncodedBlobStore;
use crate::pipeline::notifier::EncodedSizeNotifier;
use crate::pipeline::worker_pool::WorkerPool;
use crate::types::blob::{Blob, BlobKey, BlobMetadata, BlobStatus};
use crate::types::encoding::{Assignment, Bundles, EncodedBlob, EncodingParams, EncodingResult};
use crate::types::header::{BatchHeader, BlobHeader, BlobQuorumInfo};
use crate::types::operator::{IndexedOperatorState, OperatorId};
use crate::types::QuorumId;
use crate::utils::metrics::BatcherMetrics;

const ENCODING_INTERVAL: Duration = Duration::from_secs(2);
const OPERATOR_STATE_CACHE_SIZE: usize = 32;

/// What an encoding job reports back, successful or not.
#[derive(Debug)]
pub struct EncodingOutcome {
    pub blob_metadata: Arc<BlobMetadata>,
    pub blob_quorum_info: BlobQuorumInfo,
    pub result: Result<EncodingResult, EncoderError>,
}

/// Blobs ready for dispersal at one reference block. Every vector is in the same blob order.
#[derive(Debug, Clone)]
pub struct Batch {
    pub encoded_blobs: Vec<EncodedBlob>,
    pub blob_metadata: Vec<Arc<BlobMetadata>>,
    pub batch_header: BatchHeader,
    pub state: Arc<IndexedOperatorState>,
    pub merkle_tree: MerkleTree,
    /// Encoded bytes across all blobs.
    pub batch_size: u64,
}

impl Batch {
    pub fn blob_headers(&self) -> Vec<BlobHeader> {
        self.encoded_blobs.iter().map(|blob| blob.blob_header.clone()).collect()
    }
}

#[derive(Default)]
struct StreamerState {
    reference_block_number: u64,
    exclusive_start_key: Option<BlobStoreExclusiveStartKey>,
    /// One token per submitted encoding job. A job cancels its own token when it finishes.
    encoding_cancel_tokens: Vec<CancellationToken>,
}

impl StreamerState {
    fn cancel_encodings(&mut self) {
        for token in self.encoding_cancel_tokens.drain(..) {
            token.cancel();
        }
    }
}

struct PendingRequest {
    metadata: Arc<BlobMetadata>,
    data: Vec<u8>,
    blob_quorum_info: BlobQuorumInfo,
    assignments: BTreeMap<OperatorId, Assignment>,
    params: EncodingParams,
}

/// Turns `Processing` blobs into operator-ready encodings and cuts them into batches.
pub struct EncodingStreamer {
    config: StreamerConfig,
    blob_store: Arc<dyn BlobStore>,
    chain_state: Arc<dyn IndexedChainState>,
    encoder_client: Arc<dyn EncoderClient>,
    assignment_coordinator: Arc<dyn AssignmentCoordinator>,
    encoded_blobs: EncodedBlobStore,
    notifier: EncodedSizeNotifier,
    pool: WorkerPool,
    metrics: Arc<BatcherMetrics>,
    operator_state_cache: StdMutex<LruCache<Vec<u8>, Arc<IndexedOperatorState>>>,
    state: Mutex<StreamerState>,
}

impl EncodingStreamer {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        config: StreamerConfig,
        blob_store: Arc<dyn BlobStore>,
        chain_state: Arc<dyn IndexedChainState>,
        encoder_client: Arc<dyn EncoderClient>,
        assignment_coordinator: Arc<dyn AssignmentCoordinator>,
        notifier: EncodedSizeNotifier,
        pool: WorkerPool,
        metrics: Arc<BatcherMetrics>,
    ) -> Result<Self, EncodingStreamerError> {
        config.validate()?;
        let cache_size = NonZeroUsize::new(OPERATOR_STATE_CACHE_SIZE).unwrap_or(NonZeroUsize::MIN);
        Ok(Self {
            config,
            blob_store,
            chain_state,
            encoder_client,
            assignment_coordinator,
            encoded_blobs: EncodedBlobStore::new(),
            notifier,
            pool,
            metrics,
            operator_state_cache: StdMutex::new(LruCache::new(cache_size)),
            state: Mutex::new(StreamerState::default()),
        })
    }

    pub fn encoded_blobs(&self) -> &EncodedBlobStore {
        &self.encoded_blobs
    }

    pub async fn reference_block_number(&self) -> u64 {
        self.state.lock().await.reference_block_number
    }

    /// Runs the encoding loop and the result consumer until `shutdown_token` is cancelled.
    pub fn start(self: &Arc<Self>, shutdown_token: CancellationToken, tracker: &TaskTracker) {
        let (sender, mut receiver) = mpsc::channel::<EncodingOutcome>(self.config.encoding_queue_limit);

        let streamer = Arc::clone(self);
        let token = shutdown_token.clone();
        tracker.spawn(async move {
            loop {
                tokio::select! {
                    _ = token.cancelled() => break,
                    outcome = receiver.recv() => {
                        let Some(outcome) = outcome else { break };
                        if let Err(err) = streamer.process_encoded_blobs(outcome) {
                            log_encoding_error(&err);
                        }
                    }
                }
            }
            debug!(component = "EncodingStreamer", "Encoding result consumer stopped");
        });

        let streamer = Arc::clone(self);
        tracker.spawn(async move {
            let mut ticker = tokio::time::interval(ENCODING_INTERVAL);
            loop {
                tokio::select! {
                    _ = shutdown_token.cancelled() => break,
                    _ = ticker.tick() => {
                        if let Err(err) = streamer.request_encoding(&sender).await {
                            error!(component = "EncodingStreamer", error = %err, "Error requesting encoding");
                        }
                    }
                }
            }
            streamer.state.lock().await.cancel_encodings();
            info!(component = "EncodingStreamer", "Encoding streamer stopped");
        });
    }

    /// Pulls a page of `Processing` blobs and submits one encoding job per blob and quorum that has
    /// neither a running job nor a cached result at the current reference block.
    pub async fn request_encoding(&self, sender: &mpsc::Sender<EncodingOutcome>) -> Result<(), EncodingStreamerError> {
        let mut state = self.state.lock().await;

        let (metadatas, next_start_key) = self
            .blob_store
            .get_blob_metadata_by_status_with_pagination(
                BlobStatus::Processing,
                self.config.max_blobs_to_fetch_from_store,
                state.exclusive_start_key.clone(),
            )
            .await?;
        state.exclusive_start_key = next_start_key;
        if metadatas.is_empty() {
            debug!(component = "EncodingStreamer", "No new metadatas to encode");
            return Ok(());
        }

        if state.reference_block_number == 0 {
            let current = self.chain_state.get_current_block_number().await?;
            state.reference_block_number = current.saturating_sub(self.config.finalization_block_delay);
        }
        let reference_block_number = state.reference_block_number;

        let metadatas: Vec<BlobMetadata> = metadatas
            .into_iter()
            .filter(|metadata| {
                let key = metadata.key();
                metadata
                    .quorum_ids()
                    .any(|quorum_id| !self.encoded_blobs.has_encoding_requested(&key, quorum_id, reference_block_number))
            })
            .collect();

        let waiting = self.pool.waiting_queue_size();
        let capacity = self.config.encoding_queue_limit.saturating_sub(waiting).min(metadatas.len());
        if capacity == 0 {
            if !metadatas.is_empty() {
                info!(
                    component = "EncodingStreamer",
                    waiting,
                    queue_limit = self.config.encoding_queue_limit,
                    "Worker pool queue is full, skipping this round"
                );
            }
            return Ok(());
        }
        let metadatas = &metadatas[..capacity];

        let quorum_ids: BTreeSet<QuorumId> = metadatas.iter().flat_map(|metadata| metadata.quorum_ids()).collect();
        let quorum_ids: Vec<QuorumId> = quorum_ids.into_iter().collect();
        let operator_state = self.get_operator_state(reference_block_number, &quorum_ids).await?;

        let mut valid = Vec::with_capacity(metadatas.len());
        for metadata in metadatas {
            let missing: Vec<QuorumId> =
                metadata.quorum_ids().filter(|quorum_id| !operator_state.aggregate_pubkeys.contains_key(quorum_id)).collect();
            if missing.is_empty() {
                valid.push(metadata.clone());
                continue;
            }
            error!(
                component = "EncodingStreamer",
                blob_key = %metadata.key(),
                quorums = ?missing,
                "Requested quorums have no aggregate public key, failing blob"
            );
            if let Err(err) = self.blob_store.handle_blob_failure(metadata, 0).await {
                error!(component = "EncodingStreamer", blob_key = %metadata.key(), error = %err, "Error failing blob");
            }
        }
        if valid.is_empty() {
            return Ok(());
        }

        let blobs = self.blob_store.get_blobs_by_metadata(&valid).await?;
        let (pending, invalid) = self.pending_requests(valid, blobs, &operator_state, reference_block_number);
        for (blob_key, err) in invalid {
            error!(component = "EncodingStreamer", blob_key = %blob_key, error = %err, "Invalid encoding params, failing blob");
            if let Err(err) = self.blob_store.mark_blob_failed(&blob_key).await {
                error!(component = "EncodingStreamer", blob_key = %blob_key, error = %err, "Error marking blob failed");
            }
        }
        debug!(component = "EncodingStreamer", num_requests = pending.len(), reference_block_number, "Requesting encodings");

        for request in pending {
            let params = request.params;
            self.encoded_blobs.put_encoding_request(request.metadata.key(), request.blob_quorum_info.quorum_id());
            let token = CancellationToken::new();
            state.encoding_cancel_tokens.retain(|token| !token.is_cancelled());
            state.encoding_cancel_tokens.push(token.clone());

            let encoder = Arc::clone(&self.encoder_client);
            let sender = sender.clone();
            let timeout = self.config.encoding_request_timeout;
            self.metrics.encoding_requests.add(1, &[]);
            self.pool.submit(async move {
                let encoded = tokio::select! {
                    _ = token.cancelled() => Err(EncoderError::Cancelled),
                    encoded = tokio::time::timeout(timeout, encoder.encode_blob(request.data, params)) => {
                        encoded.unwrap_or(Err(EncoderError::Timeout))
                    }
                };
                token.cancel();

                let result = encoded.map(|(commitment, chunks)| EncodingResult {
                    blob_metadata: Arc::clone(&request.metadata),
                    reference_block_number,
                    blob_quorum_info: request.blob_quorum_info,
                    commitment,
                    chunks,
                    assignments: request.assignments,
                });
                let outcome = EncodingOutcome {
                    blob_metadata: request.metadata,
                    blob_quorum_info: request.blob_quorum_info,
                    result,
                };
                if sender.send(outcome).await.is_err() {
                    debug!(component = "EncodingStreamer", "Encoding result receiver dropped");
                }
            });
        }
        Ok(())
    }

    /// Builds the outstanding requests of every blob. A blob with any quorum whose encoding params
    /// are invalid contributes no request and is returned in the second list instead.
    fn pending_requests(
        &self,
        metadatas: Vec<BlobMetadata>,
        mut blobs: HashMap<BlobKey, Blob>,
        operator_state: &IndexedOperatorState,
        reference_block_number: u64,
    ) -> (Vec<PendingRequest>, Vec<(BlobKey, AssignmentError)>) {
        let mut pending = Vec::new();
        let mut invalid = Vec::new();
        'blobs: for metadata in metadatas {
            let key = metadata.key();
            let Some(blob) = blobs.remove(&key) else {
                warn!(component = "EncodingStreamer", blob_key = %key, "Blob content not found, skipping");
                continue;
            };
            let blob_length = get_blob_length(metadata.request_metadata.blob_size);
            let metadata = Arc::new(metadata);

            let mut requests = Vec::new();
            for param in metadata.security_params() {
                if self.encoded_blobs.has_encoding_requested(&key, param.quorum_id, reference_block_number) {
                    continue;
                }
                let chunk_length = match self.assignment_coordinator.calculate_chunk_length(
                    &operator_state.operator_state,
                    blob_length,
                    self.config.target_num_chunks,
                    param,
                ) {
                    Ok(chunk_length) => chunk_length,
                    Err(err) => {
                        error!(component = "EncodingStreamer", blob_key = %key, quorum_id = param.quorum_id, error = %err, "Error calculating chunk length");
                        continue;
                    }
                };
                let blob_quorum_info = BlobQuorumInfo { security_param: *param, chunk_length: chunk_length as u32 };
                let (assignments, info) = match self.assignment_coordinator.get_assignments(
                    &operator_state.operator_state,
                    blob_length,
                    &blob_quorum_info,
                ) {
                    Ok(assignments) => assignments,
                    Err(err) => {
                        error!(component = "EncodingStreamer", blob_key = %key, quorum_id = param.quorum_id, error = %err, "Error getting assignments");
                        continue;
                    }
                };
                let params = params_from_mins(chunk_length as u64, info.total_chunks as u64);
                if let Err(err) = validate_encoding_params(&params, blob_length, self.config.srs_order) {
                    invalid.push((key.clone(), err));
                    continue 'blobs;
                }
                requests.push(PendingRequest {
                    metadata: Arc::clone(&metadata),
                    data: blob.data.clone(),
                    blob_quorum_info,
                    assignments,
                    params,
                });
            }
            pending.extend(requests);
        }
        (pending, invalid)
    }

    /// Consumes one job outcome. A failed job clears its marker so the next round retries it.
    pub fn process_encoded_blobs(&self, outcome: EncodingOutcome) -> Result<(), EncodingStreamerError> {
        let quorum_id = outcome.blob_quorum_info.quorum_id();
        match outcome.result {
            Err(source) => {
                let blob_key = outcome.blob_metadata.key();
                self.encoded_blobs.delete_encoding_request(&blob_key, quorum_id);
                Err(EncodingStreamerError::Encoding { blob_key, quorum_id, source })
            }
            Ok(result) => {
                self.encoded_blobs.put_encoding_result(result)?;
                let (count, size) = self.encoded_blobs.get_encoded_result_size();
                self.metrics.encoded_results.record(count as f64, &[]);
                self.metrics.encoded_results_size.record(size as f64, &[]);
                self.notifier.check(size);
                Ok(())
            }
        }
    }

    /// Moves the reference block to `current_block_number` minus the finalization delay. Moving it
    /// forward cancels the running encodings and drops the results of the old block.
    pub async fn update_reference_block(&self, current_block_number: u64) -> Result<(), EncodingStreamerError> {
        let block_number = current_block_number.saturating_sub(self.config.finalization_block_delay);
        let mut state = self.state.lock().await;
        if state.reference_block_number > block_number {
            return Err(EncodingStreamerError::ReferenceBlockDecrease {
                current: state.reference_block_number,
                new: block_number,
            });
        }
        if state.reference_block_number < block_number {
            state.cancel_encodings();
            let stale = self.encoded_blobs.pop_latest_encoding_results(state.reference_block_number, 0);
            if !stale.is_empty() {
                debug!(
                    component = "EncodingStreamer",
                    num_results = stale.len(),
                    from = state.reference_block_number,
                    to = block_number,
                    "Dropped encoding results of previous reference block"
                );
            }
            state.reference_block_number = block_number;
        }
        Ok(())
    }

    /// Forms one batch out of every result at the current reference block, then resets the reference
    /// block so the next round starts from the chain head.
    pub async fn create_batch(&self) -> Result<Batch, EncodingStreamerError> {
        let mut state = self.state.lock().await;
        state.cancel_encodings();
        let reference_block_number = state.reference_block_number;
        let results = self.encoded_blobs.get_new_and_delete_stale_encoding_results(reference_block_number);
        self.notifier.reset();
        if results.is_empty() {
            return Err(EncodingStreamerError::NoEncodedResults);
        }

        let batch = self.assemble_batch(results, reference_block_number).await?;
        state.reference_block_number = 0;
        Ok(batch)
    }

    /// Pops a size-bounded minibatch at the current reference block. Running encodings keep going.
    pub async fn create_minibatch(&self) -> Result<Batch, EncodingStreamerError> {
        let state = self.state.lock().await;
        let reference_block_number = state.reference_block_number;
        let results =
            self.encoded_blobs.pop_latest_encoding_results(reference_block_number, self.config.batch_size_limit);
        self.notifier.reset();
        if results.is_empty() {
            return Err(EncodingStreamerError::NoEncodedResults);
        }
        let batch = self.assemble_batch(results, reference_block_number).await;
        drop(state);
        batch
    }

    async fn assemble_batch(
        &self,
        results: Vec<EncodingResult>,
        reference_block_number: u64,
    ) -> Result<Batch, EncodingStreamerError> {
        let mut order: Vec<BlobKey> = Vec::new();
        let mut grouped: HashMap<BlobKey, (Arc<BlobMetadata>, EncodedBlob, u64)> = HashMap::new();

        for result in results {
            let key = result.blob_metadata.key();
            let size = result.size();
            let (_, encoded_blob, blob_size) = grouped.entry(key.clone()).or_insert_with(|| {
                order.push(key.clone());
                let header = BlobHeader {
                    commitments: result.commitment.clone(),
                    quorum_infos: Vec::new(),
                    account_id: result.blob_metadata.request_metadata.request_header.account_id.clone(),
                };
                (
                    Arc::clone(&result.blob_metadata),
                    EncodedBlob { blob_header: header, bundles_by_operator: BTreeMap::new() },
                    0,
                )
            });

            let quorum_id = result.quorum_id();
            for (operator_id, assignment) in &result.assignments {
                let Some(chunks) = result.chunks.get(assignment.indices()) else {
                    error!(
                        component = "EncodingStreamer",
                        blob_key = %key,
                        quorum_id,
                        operator_id = %operator_id,
                        "Assignment out of range of encoded chunks"
                    );
                    continue;
                };
                let bundles: &mut Bundles = encoded_blob.bundles_by_operator.entry(*operator_id).or_default();
                bundles.entry(quorum_id).or_default().extend_from_slice(chunks);
            }
            encoded_blob.blob_header.quorum_infos.push(result.blob_quorum_info);
            *blob_size += size;
        }

        let mut candidates = Vec::with_capacity(order.len());
        for key in order {
            let Some((metadata, encoded_blob, size)) = grouped.remove(&key) else { continue };
            let requested: BTreeSet<QuorumId> = metadata.quorum_ids().collect();
            let encoded: BTreeSet<QuorumId> = encoded_blob.blob_header.quorum_ids().collect();
            if requested != encoded {
                warn!(
                    component = "EncodingStreamer",
                    blob_key = %key,
                    requested = ?requested,
                    encoded = ?encoded,
                    "Encoded quorums do not match requested quorums, leaving blob for the next round"
                );
                continue;
            }
            candidates.push((metadata, encoded_blob, size));
        }
        if candidates.is_empty() {
            return Err(EncodingStreamerError::NoEncodedResults);
        }

        let quorum_ids: BTreeSet<QuorumId> =
            candidates.iter().flat_map(|(metadata, _, _)| metadata.quorum_ids().collect::<Vec<_>>()).collect();
        let quorum_ids: Vec<QuorumId> = quorum_ids.into_iter().collect();
        let state = self.get_operator_state(reference_block_number, &quorum_ids).await?;

        let mut encoded_blobs = Vec::with_capacity(candidates.len());
        let mut blob_metadata = Vec::with_capacity(candidates.len());
        let mut batch_size = 0;
        for (metadata, encoded_blob, size) in candidates {
            let key = metadata.key();
            let transitioned = self.blob_store.mark_blob_dispersing(&key).await;
            self.remove_encoded_blob(&metadata);
            if let Err(err) = transitioned {
                error!(component = "EncodingStreamer", blob_key = %key, error = %err, "Error marking blob as dispersing");
                continue;
            }
            batch_size += size;
            encoded_blobs.push(encoded_blob);
            blob_metadata.push(metadata);
        }
        if encoded_blobs.is_empty() {
            return Err(EncodingStreamerError::NoEncodedResults);
        }

        let mut batch_header = BatchHeader::new(reference_block_number);
        let headers: Vec<BlobHeader> = encoded_blobs.iter().map(|blob| blob.blob_header.clone()).collect();
        let merkle_tree = batch_header.set_batch_root(&headers)?;

        let (count, size) = self.encoded_blobs.get_encoded_result_size();
        self.metrics.encoded_results.record(count as f64, &[]);
        self.metrics.encoded_results_size.record(size as f64, &[]);
        info!(
            component = "EncodingStreamer",
            num_blobs = encoded_blobs.len(),
            batch_size,
            reference_block_number,
            "Created batch"
        );

        Ok(Batch { encoded_blobs, blob_metadata, batch_header, state, merkle_tree, batch_size })
    }

    /// Forgets every cached encoding of the blob.
    pub fn remove_encoded_blob(&self, metadata: &BlobMetadata) {
        let key = metadata.key();
        for quorum_id in metadata.quorum_ids() {
            self.encoded_blobs.delete_encoding_result(&key, quorum_id);
        }
    }

    async fn get_operator_state(
        &self,
        block_number: u64,
        quorum_ids: &[QuorumId],
    ) -> Result<Arc<IndexedOperatorState>, EncodingStreamerError> {
        let mut sorted = quorum_ids.to_vec();
        sorted.sort_unstable();
        sorted.dedup();
        let mut cache_key = block_number.to_le_bytes().to_vec();
        cache_key.extend_from_slice(&sorted);

        if let Some(state) = self.operator_state_cache.lock().unwrap_or_else(PoisonError::into_inner).get(&cache_key) {
            return Ok(Arc::clone(state));
        }

        let state = tokio::time::timeout(
            self.config.chain_state_timeout,
            self.chain_state.get_indexed_operator_state(block_number, &sorted),
        )
        .await
        .map_err(|_| EncodingStreamerError::ChainStateTimeout(block_number))??;
        let state = Arc::new(state);
        self.operator_state_cache.lock().unwrap_or_else(PoisonError::into_inner).put(cache_key, Arc::clone(&state));
        Ok(state)
    }
}

fn log_encoding_error(err: &EncodingStreamerError) {
    match err.encoder_error() {
        Some(EncoderError::Cancelled) => {}
        Some(source) if source.is_transient() => {
            warn!(component = "EncodingStreamer", error = %err, "Transient error encoding blob");
        }
        _ => error!(component = "EncodingStreamer", error = %err, "Error processing encoded blob"),
    }
}
