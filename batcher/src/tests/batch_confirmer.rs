use std::collections::BTreeSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use alloy::consensus::TxEip1559;
use alloy::primitives::{keccak256, Address, Bytes, Log, LogData, B256, U256};
use assert_matches::assert_matches;
use batcher_chain_client_interface::{MockEthClient, TxReceipt};
use rstest::*;
use tokio::sync::mpsc;
use uuid::Uuid;

use crate::config::BatchConfirmerConfig;
use crate::core::client::dispatcher::{DispatchError, MockDispatcher};
use crate::core::client::transactor::MockTransactor;
use crate::core::client::{BlobStore, MinibatchStore, StakeSignatureAggregator};
use crate::core::merkle::MerkleTree;
use crate::error::{BatchConfirmerError, TxnManagerError};
use crate::pipeline::batch_confirmer::{BatchConfirmer, BatchConfirmerDeps, ConfirmationMetadata};
use crate::pipeline::txn_manager::{ReceiptOrErr, TxnManager};
use crate::tests::common::*;
use crate::types::attestation::{QuorumResult, SignatureAggregation};
use crate::types::batch::{BatchAttestation, BatchRecord, BatchStatus};
use crate::types::blob::{BlobKey, BlobStatus};
use crate::types::header::{BatchHeader, BlobHeader, BlobQuorumInfo};

const CONFIRM_TX_HASH: B256 = B256::repeat_byte(0xaa);

fn batch_confirmed_receipt(batch_id: Option<u32>) -> TxReceipt {
    let data = batch_id.map(|id| U256::from(id).to_be_bytes::<32>().to_vec()).unwrap_or_default();
    let log = Log {
        address: Address::ZERO,
        data: LogData::new_unchecked(
            vec![keccak256("BatchConfirmed(bytes32,uint32)"), B256::repeat_byte(1)],
            Bytes::from(data),
        ),
    };
    TxReceipt { transaction_hash: CONFIRM_TX_HASH, block_number: 150, gas_used: 21_000, status: true, logs: vec![log] }
}

/// Chain at the pipeline's reference block that accepts every transaction and mines it at once.
fn confirming_eth_client() -> MockEthClient {
    let mut eth_client = MockEthClient::new();
    eth_client.expect_block_number().returning(|| Ok(REFERENCE_BLOCK));
    eth_client.expect_get_latest_gas_caps().returning(|| Ok((1_000_000_000, 10_000_000_000)));
    eth_client.expect_update_gas().returning(|tx, _, _, _| Ok(tx));
    eth_client.expect_send_transaction().returning(|_| Ok(CONFIRM_TX_HASH));
    eth_client.expect_ensure_transaction_evaled().returning(|_, _| Ok(batch_confirmed_receipt(Some(3))));
    eth_client
}

fn accepting_transactor() -> MockTransactor {
    let mut transactor = MockTransactor::new();
    transactor.expect_build_confirm_batch_txn().returning(|_, _, _| Ok(TxEip1559::default()));
    transactor
}

struct ConfirmerHarness {
    confirmer: BatchConfirmer,
    txn_manager: Arc<TxnManager<ConfirmationMetadata>>,
    receipts: mpsc::Receiver<ReceiptOrErr<ConfirmationMetadata>>,
}

impl ConfirmerHarness {
    fn new(
        pipeline: &TestPipeline,
        config: BatchConfirmerConfig,
        transactor: MockTransactor,
        eth_client: MockEthClient,
    ) -> Self {
        let eth_client = Arc::new(eth_client);
        let (txn_manager, receipts) = TxnManager::new(txn_manager_config(), eth_client.clone(), pipeline.metrics.clone());
        let txn_manager = Arc::new(txn_manager);
        let confirmer = BatchConfirmer::new(
            config,
            BatchConfirmerDeps {
                blob_store: pipeline.blob_store.clone(),
                minibatch_store: pipeline.minibatch_store.clone(),
                dispatcher: pipeline.dispatcher.clone(),
                aggregator: Arc::new(StakeSignatureAggregator),
                transactor: Arc::new(transactor),
                eth_client,
            },
            pipeline.streamer.clone(),
            pipeline.minibatcher.clone(),
            txn_manager.clone(),
            pipeline.metrics.clone(),
        );
        Self { confirmer, txn_manager, receipts }
    }
}

/// A batch record already waiting on its confirmation receipt.
async fn attesting_batch(pipeline: &TestPipeline) -> Uuid {
    let batch_id = Uuid::now_v7();
    pipeline.minibatch_store.put_batch(BatchRecord::new_pending(batch_id, REFERENCE_BLOCK)).await.unwrap();
    pipeline.minibatch_store.mark_batch_formed(batch_id, 1).await.unwrap();
    let attestation = BatchAttestation {
        header_hash: B256::repeat_byte(0x11),
        quorum_agg_pubkeys: Default::default(),
        aggregate_signature: Default::default(),
    };
    pipeline.minibatch_store.mark_batch_attesting(batch_id, attestation).await.unwrap();
    batch_id
}

/// Two minibatches of two blobs each, all dispersed, batch marked formed.
async fn formed_batch(pipeline: &mut TestPipeline) -> (Uuid, Vec<BlobKey>) {
    let keys = pipeline.disperse_minibatches(&[&[1, 2], &[3, 4]]).await;
    let batch_id = pipeline.minibatcher.current_batch_id().await.unwrap();
    pipeline.minibatch_store.mark_batch_formed(batch_id, 2).await.unwrap();
    (batch_id, keys)
}

#[rstest]
#[tokio::test]
async fn confirms_batch_signed_by_every_operator() {
    let mut pipeline = TestPipeline::new(mock_dispatcher(all_operators()), streamer_config());
    let (batch_id, keys) = formed_batch(&mut pipeline).await;

    let mut transactor = MockTransactor::new();
    transactor
        .expect_build_confirm_batch_txn()
        .withf(|header, results, aggregation| {
            header.reference_block_number == REFERENCE_BLOCK
                && results.len() == 2
                && results.values().all(|result| result.percent_signed == 100)
                && aggregation.non_signers.is_empty()
        })
        .times(1)
        .returning(|_, _, _| Ok(TxEip1559::default()));
    let mut harness = ConfirmerHarness::new(&pipeline, confirmer_config(), transactor, confirming_eth_client());

    harness.confirmer.handle_single_batch().await.unwrap();
    assert!(!pipeline.minibatcher.has_batch_state(batch_id));
    let batch = pipeline.minibatch_store.get_batch(batch_id).await.unwrap().unwrap();
    assert_eq!(batch.status, BatchStatus::Attesting);
    let attestation = batch.attestation.unwrap();
    assert_eq!(attestation.quorum_agg_pubkeys.len(), 2);
    assert_ne!(attestation.header_hash, B256::ZERO);

    let shutdown = tokio_util::sync::CancellationToken::new();
    let tracker = tokio_util::task::TaskTracker::new();
    harness.txn_manager.start(shutdown.clone(), &tracker).await;
    let outcome = harness.receipts.recv().await.unwrap();
    assert_eq!(outcome.metadata.batch_id, batch_id);
    assert_eq!(outcome.metadata.blobs.len(), 4);
    harness.confirmer.process_confirmed_batch(outcome).await.unwrap();

    let batch = pipeline.minibatch_store.get_batch(batch_id).await.unwrap().unwrap();
    assert_eq!(batch.status, BatchStatus::Attested);
    for key in &keys {
        let metadata = pipeline.blob_store.get_blob_metadata(key).await.unwrap();
        assert_eq!(metadata.blob_status, BlobStatus::Confirmed);
        let info = metadata.confirmation_info.unwrap();
        assert_eq!(info.batch_id, 3);
        assert_eq!(info.blob_count, 4);
        assert_eq!(info.confirmation_txn_hash, CONFIRM_TX_HASH);
        assert_eq!(info.confirmation_block_number, 150);
        assert!(!info.blob_inclusion_proof.is_empty());
        assert_eq!(
            pipeline.blob_store.status_history(key).await,
            vec![BlobStatus::Processing, BlobStatus::Dispersing, BlobStatus::Confirmed]
        );
    }
    shutdown.cancel();
}

#[rstest]
#[tokio::test]
async fn batch_without_sufficient_signatures_is_retried() {
    let signers: BTreeSet<_> = [operator_id(1)].into_iter().collect();
    let mut pipeline = TestPipeline::new(mock_dispatcher(signers), streamer_config());
    let (batch_id, keys) = formed_batch(&mut pipeline).await;

    let mut transactor = MockTransactor::new();
    transactor.expect_build_confirm_batch_txn().never();
    let harness = ConfirmerHarness::new(&pipeline, confirmer_config(), transactor, confirming_eth_client());

    let err = harness.confirmer.handle_single_batch().await.unwrap_err();
    assert!(err.to_string().contains("no blobs received sufficient signatures"));

    let batch = pipeline.minibatch_store.get_batch(batch_id).await.unwrap().unwrap();
    assert_eq!(batch.status, BatchStatus::Failed);
    for key in &keys {
        let metadata = pipeline.blob_store.get_blob_metadata(key).await.unwrap();
        assert_eq!(metadata.blob_status, BlobStatus::Processing);
        assert_eq!(metadata.num_retries, 1);
    }
}

#[rstest]
#[tokio::test]
async fn undispersed_batch_times_out() {
    let mut dispatcher = MockDispatcher::new();
    dispatcher.expect_send_blobs_to_operator().returning(|_, _, operator, _| {
        Err(DispatchError::Connection { socket: operator.socket, message: "connection refused".to_string() })
    });
    dispatcher.expect_attest_batch().never();
    let mut pipeline = TestPipeline::new(dispatcher, streamer_config());
    let (batch_id, keys) = formed_batch(&mut pipeline).await;

    let config = BatchConfirmerConfig { dispersal_timeout: Duration::from_millis(200), ..confirmer_config() };
    let harness = ConfirmerHarness::new(&pipeline, config, accepting_transactor(), confirming_eth_client());

    let err = harness.confirmer.handle_single_batch().await.unwrap_err();
    assert_matches!(err, BatchConfirmerError::DispersalTimeout { batch_id: id, .. } if id == batch_id);
    assert!(!pipeline.minibatcher.has_batch_state(batch_id));
    assert_eq!(pipeline.minibatch_store.get_batch(batch_id).await.unwrap().unwrap().status, BatchStatus::Failed);
    for key in &keys {
        assert_eq!(pipeline.blob_store.get_blob_metadata(key).await.unwrap().blob_status, BlobStatus::Processing);
    }
}

#[rstest]
#[tokio::test]
async fn no_formed_batch_is_a_no_op() {
    let pipeline = TestPipeline::new(mock_dispatcher(all_operators()), streamer_config());
    let mut transactor = MockTransactor::new();
    transactor.expect_build_confirm_batch_txn().never();
    let harness = ConfirmerHarness::new(&pipeline, confirmer_config(), transactor, confirming_eth_client());

    harness.confirmer.handle_single_batch().await.unwrap();
}

#[rstest]
#[tokio::test(start_paused = true)]
async fn batch_id_is_recovered_from_refetched_receipt() {
    let pipeline = TestPipeline::new(mock_dispatcher(all_operators()), streamer_config());
    let key = pipeline.store_blobs([9]).await.remove(0);
    pipeline.blob_store.mark_blob_dispersing(&key).await.unwrap();
    let metadata = Arc::new(pipeline.blob_store.get_blob_metadata(&key).await.unwrap());

    let batch_id = attesting_batch(&pipeline).await;
    let blob_header = BlobHeader {
        quorum_infos: security_params()
            .into_iter()
            .map(|security_param| BlobQuorumInfo { security_param, chunk_length: 4 })
            .collect(),
        ..Default::default()
    };
    let mut batch_header = BatchHeader::new(REFERENCE_BLOCK);
    let merkle_tree: MerkleTree = batch_header.set_batch_root(std::slice::from_ref(&blob_header)).unwrap();
    let aggregation = SignatureAggregation {
        quorum_results: QUORUMS
            .into_iter()
            .map(|quorum_id| (quorum_id, QuorumResult { quorum_id, percent_signed: 100 }))
            .collect(),
        ..Default::default()
    };

    let calls = Arc::new(AtomicUsize::new(0));
    let mut eth_client = confirming_eth_client();
    let counter = calls.clone();
    eth_client.expect_transaction_receipt().returning(move |_| {
        let call = counter.fetch_add(1, Ordering::SeqCst);
        Ok(batch_confirmed_receipt((call >= 2).then_some(3)))
    });
    let harness = ConfirmerHarness::new(&pipeline, confirmer_config(), accepting_transactor(), eth_client);

    let outcome = ReceiptOrErr {
        metadata: ConfirmationMetadata {
            batch_id,
            batch_header,
            blobs: vec![metadata],
            blob_headers: vec![blob_header],
            merkle_tree,
            aggregation,
        },
        result: Ok(batch_confirmed_receipt(None)),
    };
    harness.confirmer.process_confirmed_batch(outcome).await.unwrap();

    assert_eq!(calls.load(Ordering::SeqCst), 3);
    let confirmed = pipeline.blob_store.get_blob_metadata(&key).await.unwrap();
    assert_eq!(confirmed.blob_status, BlobStatus::Confirmed);
    assert_eq!(confirmed.confirmation_info.unwrap().batch_id, 3);
    assert_eq!(pipeline.minibatch_store.get_batch(batch_id).await.unwrap().unwrap().status, BatchStatus::Attested);
}

#[rstest]
#[tokio::test]
async fn failed_confirmation_transaction_fails_batch() {
    let pipeline = TestPipeline::new(mock_dispatcher(all_operators()), streamer_config());
    let key = pipeline.store_blobs([5]).await.remove(0);
    pipeline.blob_store.mark_blob_dispersing(&key).await.unwrap();
    let metadata = Arc::new(pipeline.blob_store.get_blob_metadata(&key).await.unwrap());
    let batch_id = attesting_batch(&pipeline).await;

    let harness = ConfirmerHarness::new(&pipeline, confirmer_config(), accepting_transactor(), confirming_eth_client());
    let outcome = ReceiptOrErr {
        metadata: ConfirmationMetadata {
            batch_id,
            batch_header: BatchHeader::new(REFERENCE_BLOCK),
            blobs: vec![metadata],
            blob_headers: vec![BlobHeader::default()],
            merkle_tree: MerkleTree::new(&[B256::ZERO]).unwrap(),
            aggregation: SignatureAggregation::default(),
        },
        result: Err(TxnManagerError::MonitorStopped),
    };

    let err = harness.confirmer.process_confirmed_batch(outcome).await.unwrap_err();
    assert_matches!(err, BatchConfirmerError::OnchainConfirmation(_));
    assert_eq!(pipeline.minibatch_store.get_batch(batch_id).await.unwrap().unwrap().status, BatchStatus::Failed);
    assert_eq!(pipeline.blob_store.get_blob_metadata(&key).await.unwrap().blob_status, BlobStatus::Processing);
}

#[rstest]
#[tokio::test]
async fn batch_awaiting_receipt_is_not_picked_up_again() {
    let mut pipeline = TestPipeline::new(mock_dispatcher(all_operators()), streamer_config());
    let (batch_id, keys) = formed_batch(&mut pipeline).await;
    let mut transactor = MockTransactor::new();
    transactor.expect_build_confirm_batch_txn().times(1).returning(|_, _, _| Ok(TxEip1559::default()));
    let mut harness = ConfirmerHarness::new(&pipeline, confirmer_config(), transactor, confirming_eth_client());

    harness.confirmer.handle_single_batch().await.unwrap();
    // Next tick while the receipt is still outstanding.
    harness.confirmer.handle_single_batch().await.unwrap();
    assert_eq!(pipeline.minibatch_store.get_batch(batch_id).await.unwrap().unwrap().status, BatchStatus::Attesting);
    for key in &keys {
        assert_eq!(pipeline.blob_store.get_blob_metadata(key).await.unwrap().blob_status, BlobStatus::Dispersing);
    }

    let shutdown = tokio_util::sync::CancellationToken::new();
    let tracker = tokio_util::task::TaskTracker::new();
    harness.txn_manager.start(shutdown.clone(), &tracker).await;
    let outcome = harness.receipts.recv().await.unwrap();
    harness.confirmer.process_confirmed_batch(outcome).await.unwrap();

    assert_eq!(pipeline.minibatch_store.get_batch(batch_id).await.unwrap().unwrap().status, BatchStatus::Attested);
    for key in &keys {
        assert_eq!(pipeline.blob_store.get_blob_metadata(key).await.unwrap().blob_status, BlobStatus::Confirmed);
    }
    shutdown.cancel();
}

#[rstest]
#[tokio::test]
async fn formed_batch_without_state_keeps_its_status() {
    let mut pipeline = TestPipeline::new(mock_dispatcher(all_operators()), streamer_config());
    let (batch_id, _keys) = formed_batch(&mut pipeline).await;
    pipeline.minibatcher.pop_batch_state(batch_id).unwrap();
    let mut transactor = MockTransactor::new();
    transactor.expect_build_confirm_batch_txn().never();
    let harness = ConfirmerHarness::new(&pipeline, confirmer_config(), transactor, confirming_eth_client());

    assert_matches!(
        harness.confirmer.handle_single_batch().await,
        Err(BatchConfirmerError::MissingBatchState(id)) if id == batch_id
    );
    assert_eq!(pipeline.minibatch_store.get_batch(batch_id).await.unwrap().unwrap().status, BatchStatus::Formed);
}
