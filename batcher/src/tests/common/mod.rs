use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;

use alloy::primitives::{Bytes, B256, U256};
use rstest::*;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use batcher_utils::metrics::Metrics;

use crate::config::{BatchConfirmerConfig, MinibatcherConfig, StreamerConfig, TxnManagerConfig};
use crate::core::assignment::StdAssignmentCoordinator;
use crate::core::client::chain_state::MockIndexedChainState;
use crate::core::client::dispatcher::MockDispatcher;
use crate::core::client::encoder::MockEncoderClient;
use crate::core::client::{BlobStore, InMemoryBlobStore, InMemoryMinibatchStore};
use crate::pipeline::encoding_streamer::{EncodingOutcome, EncodingStreamer};
use crate::pipeline::minibatcher::Minibatcher;
use crate::pipeline::notifier::EncodedSizeNotifier;
use crate::pipeline::worker_pool::WorkerPool;
use crate::types::attestation::{Signature, SigningMessage};
use crate::types::blob::{Blob, BlobKey, BlobRequestHeader, SecurityParam};
use crate::types::encoding::{BlobCommitments, G1Point};
use crate::types::operator::{IndexedOperatorInfo, IndexedOperatorState, OperatorId, OperatorInfo};
use crate::types::QuorumId;
use crate::utils::metrics::BatcherMetrics;

pub const REFERENCE_BLOCK: u64 = 100;
pub const QUORUMS: [QuorumId; 2] = [0, 1];

pub fn operator_id(n: u8) -> OperatorId {
    B256::repeat_byte(n)
}

pub fn signature_of(operator: OperatorId) -> Signature {
    Signature(Bytes::copy_from_slice(operator.as_slice()))
}

/// Two operators with equal stake, both registered in quorums 0 and 1.
#[fixture]
pub fn operator_state() -> IndexedOperatorState {
    let mut state = IndexedOperatorState::default();
    state.operator_state.block_number = REFERENCE_BLOCK;
    for quorum_id in QUORUMS {
        for (index, n) in [1u8, 2].into_iter().enumerate() {
            state
                .operator_state
                .operators
                .entry(quorum_id)
                .or_default()
                .insert(operator_id(n), OperatorInfo { stake: U256::from(1), index: index as u32 });
        }
        state.operator_state.totals.insert(quorum_id, OperatorInfo { stake: U256::from(2), index: 2 });
        state.aggregate_pubkeys.insert(quorum_id, G1Point::new(U256::from(quorum_id), U256::from(7)));
    }
    for n in [1u8, 2] {
        state.indexed_operators.insert(
            operator_id(n),
            IndexedOperatorInfo {
                pubkey_g1: G1Point::new(U256::from(n), U256::from(n)),
                pubkey_g2: Bytes::new(),
                socket: format!("operator-{n}:32005"),
            },
        );
    }
    state
}

pub fn security_params() -> Vec<SecurityParam> {
    QUORUMS
        .into_iter()
        .map(|quorum_id| SecurityParam { quorum_id, adversary_threshold: 30, confirmation_threshold: 80, quorum_rate: 0 })
        .collect()
}

pub fn blob(seed: u8) -> Blob {
    Blob {
        request_header: BlobRequestHeader { account_id: "test-account".to_string(), security_params: security_params() },
        data: vec![seed; 100],
    }
}

pub fn test_metrics() -> Arc<BatcherMetrics> {
    Arc::new(BatcherMetrics::register())
}

pub fn streamer_config() -> StreamerConfig {
    StreamerConfig {
        encoding_queue_limit: 16,
        finalization_block_delay: 0,
        batch_size_limit: 1024 * 1024,
        encoding_request_timeout: Duration::from_secs(5),
        chain_state_timeout: Duration::from_secs(5),
        ..Default::default()
    }
}

pub fn minibatcher_config() -> MinibatcherConfig {
    MinibatcherConfig {
        pull_interval: Duration::from_millis(100),
        max_num_connections: 16,
        max_num_retries_per_blob: 2,
        max_num_retries_per_dispersal: 1,
    }
}

pub fn confirmer_config() -> BatchConfirmerConfig {
    BatchConfirmerConfig {
        pull_interval: Duration::from_millis(100),
        dispersal_timeout: Duration::from_secs(5),
        dispersal_status_check_interval: Duration::from_millis(10),
        attestation_timeout: Duration::from_secs(5),
        max_num_retries_per_blob: 2,
    }
}

pub fn txn_manager_config() -> TxnManagerConfig {
    TxnManagerConfig { queue_size: 4, txn_refresh_interval: Duration::from_secs(2) }
}

pub fn mock_chain_state(state: IndexedOperatorState) -> MockIndexedChainState {
    let mut chain_state = MockIndexedChainState::new();
    chain_state.expect_get_current_block_number().returning(|| Ok(REFERENCE_BLOCK));
    chain_state.expect_get_indexed_operator_state().returning(move |_, _| Ok(state.clone()));
    chain_state
}

/// Returns one 32 byte chunk per requested chunk.
pub fn mock_encoder() -> MockEncoderClient {
    let mut encoder = MockEncoderClient::new();
    encoder.expect_encode_blob().returning(|data, params| {
        let chunk = Bytes::from(vec![data.first().copied().unwrap_or_default(); 32]);
        Ok((BlobCommitments::default(), vec![chunk; params.num_chunks as usize]))
    });
    encoder
}

/// Operators in `signers` store every blob and sign attestations. The others time out on
/// attestation.
pub fn mock_dispatcher(signers: BTreeSet<OperatorId>) -> MockDispatcher {
    let mut dispatcher = MockDispatcher::new();
    dispatcher.expect_send_blobs_to_operator().returning(|blobs, _, operator, _| {
        Ok(blobs.iter().map(|_| Signature(Bytes::copy_from_slice(operator.socket.as_bytes()))).collect())
    });
    dispatcher.expect_attest_batch().returning(move |state, _, batch_header| {
        let (tx, rx) = mpsc::channel(state.indexed_operators.len().max(1));
        for operator in state.indexed_operators.keys() {
            let signed = signers.contains(operator);
            let message = SigningMessage {
                operator: *operator,
                batch_header_hash: batch_header.hash(),
                signature: signed.then(|| signature_of(*operator)),
                attestation_latency_ms: 1.0,
                error: (!signed).then(|| "deadline exceeded".to_string()),
            };
            let _ = tx.try_send(message);
        }
        Ok(rx)
    });
    dispatcher
}

/// Streamer and minibatcher over in-memory stores and mocked network collaborators.
pub struct TestPipeline {
    pub blob_store: Arc<InMemoryBlobStore>,
    pub minibatch_store: Arc<InMemoryMinibatchStore>,
    pub streamer: Arc<EncodingStreamer>,
    pub minibatcher: Arc<Minibatcher>,
    pub dispatcher: Arc<MockDispatcher>,
    pub encoding_tx: mpsc::Sender<EncodingOutcome>,
    pub encoding_rx: mpsc::Receiver<EncodingOutcome>,
    pub batch_trigger: mpsc::Receiver<()>,
    pub metrics: Arc<BatcherMetrics>,
}

impl TestPipeline {
    pub fn new(dispatcher: MockDispatcher, config: StreamerConfig) -> Self {
        Self::with_encoder(dispatcher, mock_encoder(), config)
    }

    pub fn with_encoder(dispatcher: MockDispatcher, encoder: MockEncoderClient, config: StreamerConfig) -> Self {
        let blob_store = Arc::new(InMemoryBlobStore::new());
        let minibatch_store = Arc::new(InMemoryMinibatchStore::new());
        let metrics = test_metrics();
        let (notifier, batch_trigger) = EncodedSizeNotifier::new(config.batch_size_limit);
        let pool = WorkerPool::new(config.encoding_queue_limit);
        let streamer = Arc::new(
            EncodingStreamer::new(
                config,
                blob_store.clone(),
                Arc::new(mock_chain_state(operator_state())),
                Arc::new(encoder),
                Arc::new(StdAssignmentCoordinator),
                notifier,
                pool,
                metrics.clone(),
            )
            .unwrap(),
        );
        let dispatcher = Arc::new(dispatcher);
        let minibatcher = Arc::new(Minibatcher::new(
            minibatcher_config(),
            streamer.clone(),
            blob_store.clone(),
            minibatch_store.clone(),
            dispatcher.clone(),
            WorkerPool::new(4),
            metrics.clone(),
            CancellationToken::new(),
        ));
        let (encoding_tx, encoding_rx) = mpsc::channel(64);
        Self {
            blob_store,
            minibatch_store,
            streamer,
            minibatcher,
            dispatcher,
            encoding_tx,
            encoding_rx,
            batch_trigger,
            metrics,
        }
    }

    pub async fn store_blobs(&self, seeds: impl IntoIterator<Item = u8>) -> Vec<BlobKey> {
        let mut keys = Vec::new();
        for (offset, seed) in seeds.into_iter().enumerate() {
            keys.push(self.blob_store.store_blob(blob(seed), 1_000 + offset as u64).await.unwrap());
        }
        keys
    }

    /// Requests encodings and feeds `expected` job outcomes back into the streamer.
    pub async fn encode(&mut self, expected: usize) {
        self.streamer.request_encoding(&self.encoding_tx).await.unwrap();
        for _ in 0..expected {
            let outcome = self.encoding_rx.recv().await.unwrap();
            self.streamer.process_encoded_blobs(outcome).unwrap();
        }
    }

    /// Stores, encodes and disperses one minibatch per entry of `minibatches`.
    pub async fn disperse_minibatches(&mut self, minibatches: &[&[u8]]) -> Vec<BlobKey> {
        let mut keys = Vec::new();
        for seeds in minibatches {
            let stored = self.store_blobs(seeds.iter().copied()).await;
            self.encode(stored.len() * QUORUMS.len()).await;
            self.minibatcher.handle_single_minibatch().await.unwrap();
            keys.extend(stored);
        }
        keys
    }
}

pub fn all_operators() -> BTreeSet<OperatorId> {
    [operator_id(1), operator_id(2)].into_iter().collect()
}
