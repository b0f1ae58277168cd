use std::collections::BTreeSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use alloy::primitives::{Bytes, B256};
use assert_matches::assert_matches;
use rstest::*;

use crate::config::StreamerConfig;
use crate::core::client::encoder::{EncoderError, MockEncoderClient};
use crate::core::client::BlobStore;
use crate::error::EncodingStreamerError;
use crate::tests::common::*;
use crate::types::blob::{Blob, BlobRequestHeader, BlobStatus, SecurityParam};
use crate::types::encoding::BlobCommitments;

fn counting_encoder(calls: Arc<AtomicUsize>) -> MockEncoderClient {
    let mut encoder = MockEncoderClient::new();
    encoder.expect_encode_blob().returning(move |_, params| {
        calls.fetch_add(1, Ordering::SeqCst);
        Ok((BlobCommitments::default(), vec![Bytes::from(vec![0u8; 32]); params.num_chunks as usize]))
    });
    encoder
}

#[rstest]
#[tokio::test]
async fn duplicate_requests_are_not_encoded_twice() {
    let calls = Arc::new(AtomicUsize::new(0));
    let mut pipeline =
        TestPipeline::with_encoder(mock_dispatcher(all_operators()), counting_encoder(calls.clone()), streamer_config());
    pipeline.store_blobs([1, 2]).await;

    pipeline.streamer.request_encoding(&pipeline.encoding_tx).await.unwrap();
    pipeline.streamer.request_encoding(&pipeline.encoding_tx).await.unwrap();
    assert_eq!(pipeline.streamer.encoded_blobs().num_requested(), 4);

    for _ in 0..4 {
        let outcome = pipeline.encoding_rx.recv().await.unwrap();
        pipeline.streamer.process_encoded_blobs(outcome).unwrap();
    }
    // Results cached at the same reference block count as requested.
    pipeline.encode(0).await;

    assert_eq!(calls.load(Ordering::SeqCst), 4);
    assert_eq!(pipeline.streamer.encoded_blobs().get_encoded_result_size().0, 4);
    assert!(pipeline.encoding_rx.try_recv().is_err());
}

#[rstest]
#[tokio::test]
async fn size_threshold_notifies_once_per_batch() {
    let config = StreamerConfig { batch_size_limit: 64, ..streamer_config() };
    let mut pipeline = TestPipeline::new(mock_dispatcher(all_operators()), config);
    pipeline.store_blobs([1, 2]).await;
    pipeline.encode(4).await;

    assert!(pipeline.batch_trigger.try_recv().is_ok());
    assert!(pipeline.batch_trigger.try_recv().is_err());

    // Popping a minibatch re-arms the trigger.
    pipeline.streamer.create_minibatch().await.unwrap();
    pipeline.store_blobs([3]).await;
    pipeline.encode(2).await;
    assert!(pipeline.batch_trigger.try_recv().is_ok());
    assert!(pipeline.batch_trigger.try_recv().is_err());
}

#[rstest]
#[tokio::test]
async fn reference_block_cannot_move_backwards() {
    let mut pipeline = TestPipeline::new(mock_dispatcher(all_operators()), streamer_config());
    pipeline.store_blobs([1]).await;
    pipeline.encode(2).await;
    assert_eq!(pipeline.streamer.reference_block_number().await, REFERENCE_BLOCK);

    pipeline.streamer.update_reference_block(REFERENCE_BLOCK).await.unwrap();
    assert_matches!(
        pipeline.streamer.update_reference_block(REFERENCE_BLOCK - 1).await,
        Err(EncodingStreamerError::ReferenceBlockDecrease { current: REFERENCE_BLOCK, new }) if new == REFERENCE_BLOCK - 1
    );
}

#[rstest]
#[tokio::test]
async fn advancing_reference_block_drops_stale_results() {
    let calls = Arc::new(AtomicUsize::new(0));
    let mut pipeline =
        TestPipeline::with_encoder(mock_dispatcher(all_operators()), counting_encoder(calls.clone()), streamer_config());
    pipeline.store_blobs([1]).await;
    pipeline.encode(2).await;

    pipeline.streamer.update_reference_block(REFERENCE_BLOCK + 1).await.unwrap();
    assert_eq!(pipeline.streamer.encoded_blobs().get_encoded_result_size(), (0, 0));

    pipeline.encode(2).await;
    assert_eq!(calls.load(Ordering::SeqCst), 4);
    assert_eq!(pipeline.streamer.reference_block_number().await, REFERENCE_BLOCK + 1);
    assert_eq!(pipeline.streamer.encoded_blobs().get_encoded_result_size().0, 2);
}

#[rstest]
#[tokio::test]
async fn invalid_encoding_params_fail_blob() {
    let mut encoder = MockEncoderClient::new();
    encoder.expect_encode_blob().never();
    let config = StreamerConfig { srs_order: 4, ..streamer_config() };
    let mut pipeline = TestPipeline::with_encoder(mock_dispatcher(all_operators()), encoder, config);
    let keys = pipeline.store_blobs([1]).await;

    pipeline.encode(0).await;

    let metadata = pipeline.blob_store.get_blob_metadata(&keys[0]).await.unwrap();
    assert_eq!(metadata.blob_status, BlobStatus::Failed);
    assert_eq!(metadata.num_retries, 0);
}

#[rstest]
#[tokio::test]
async fn one_invalid_quorum_fails_blob_before_any_encoding() {
    let calls = Arc::new(AtomicUsize::new(0));
    let config = StreamerConfig { srs_order: 16, ..streamer_config() };
    let mut pipeline =
        TestPipeline::with_encoder(mock_dispatcher(all_operators()), counting_encoder(calls.clone()), config);
    let blob = Blob {
        request_header: BlobRequestHeader {
            account_id: "test-account".to_string(),
            security_params: vec![
                SecurityParam { quorum_id: 0, adversary_threshold: 30, confirmation_threshold: 80, quorum_rate: 0 },
                SecurityParam { quorum_id: 1, adversary_threshold: 30, confirmation_threshold: 31, quorum_rate: 0 },
            ],
        },
        data: vec![1; 100],
    };
    let key = pipeline.blob_store.store_blob(blob, 1).await.unwrap();

    pipeline.encode(0).await;

    assert_eq!(calls.load(Ordering::SeqCst), 0);
    assert_eq!(pipeline.streamer.encoded_blobs().num_requested(), 0);
    assert_eq!(pipeline.streamer.encoded_blobs().get_encoded_result_size(), (0, 0));
    assert!(pipeline.encoding_rx.try_recv().is_err());
    assert_eq!(
        pipeline.blob_store.status_history(&key).await,
        vec![BlobStatus::Processing, BlobStatus::Failed]
    );
}

#[rstest]
#[tokio::test]
async fn quorum_without_aggregate_key_fails_blob() {
    let mut encoder = MockEncoderClient::new();
    encoder.expect_encode_blob().never();
    let mut pipeline = TestPipeline::with_encoder(mock_dispatcher(all_operators()), encoder, streamer_config());
    let blob = Blob {
        request_header: BlobRequestHeader {
            account_id: "test-account".to_string(),
            security_params: vec![SecurityParam {
                quorum_id: 7,
                adversary_threshold: 30,
                confirmation_threshold: 80,
                quorum_rate: 0,
            }],
        },
        data: vec![1; 100],
    };
    let key = pipeline.blob_store.store_blob(blob, 1).await.unwrap();

    pipeline.encode(0).await;

    assert_eq!(pipeline.blob_store.get_blob_metadata(&key).await.unwrap().blob_status, BlobStatus::Failed);
}

#[rstest]
#[tokio::test]
async fn failed_encoding_clears_request_marker() {
    let mut encoder = MockEncoderClient::new();
    encoder.expect_encode_blob().returning(|_, _| Err(EncoderError::Connection("refused".to_string())));
    let mut pipeline = TestPipeline::with_encoder(mock_dispatcher(all_operators()), encoder, streamer_config());
    let keys = pipeline.store_blobs([1]).await;

    pipeline.streamer.request_encoding(&pipeline.encoding_tx).await.unwrap();
    for _ in 0..2 {
        let outcome = pipeline.encoding_rx.recv().await.unwrap();
        let err = pipeline.streamer.process_encoded_blobs(outcome).unwrap_err();
        assert_matches!(err.encoder_error(), Some(EncoderError::Connection(_)));
    }

    assert_eq!(pipeline.streamer.encoded_blobs().num_requested(), 0);
    assert_eq!(pipeline.blob_store.get_blob_metadata(&keys[0]).await.unwrap().blob_status, BlobStatus::Processing);
}

#[rstest]
#[tokio::test]
async fn minibatch_merges_quorums_per_operator() {
    let mut pipeline = TestPipeline::new(mock_dispatcher(all_operators()), streamer_config());
    let keys = pipeline.store_blobs([1, 2]).await;
    pipeline.encode(4).await;

    let batch = pipeline.streamer.create_minibatch().await.unwrap();

    assert_eq!(batch.encoded_blobs.len(), 2);
    assert_eq!(batch.batch_header.reference_block_number, REFERENCE_BLOCK);
    assert_ne!(batch.batch_header.batch_root, B256::ZERO);
    assert_eq!(batch.merkle_tree.num_leaves(), 2);
    for encoded in &batch.encoded_blobs {
        let quorums: BTreeSet<_> = encoded.blob_header.quorum_ids().collect();
        assert_eq!(quorums, QUORUMS.into_iter().collect());
        assert_eq!(encoded.bundles_by_operator.len(), 2);
        for bundles in encoded.bundles_by_operator.values() {
            assert_eq!(bundles.len(), 2);
            assert!(bundles.values().all(|bundle| bundle.len() == 1));
        }
    }
    for key in &keys {
        assert_eq!(pipeline.blob_store.get_blob_metadata(key).await.unwrap().blob_status, BlobStatus::Dispersing);
    }
    assert_eq!(pipeline.streamer.encoded_blobs().get_encoded_result_size(), (0, 0));
    assert_matches!(pipeline.streamer.create_minibatch().await, Err(EncodingStreamerError::NoEncodedResults));
}

#[rstest]
#[tokio::test]
async fn legacy_batch_resets_reference_block() {
    let mut pipeline = TestPipeline::new(mock_dispatcher(all_operators()), streamer_config());
    pipeline.store_blobs([1, 2]).await;
    pipeline.encode(4).await;

    let batch = pipeline.streamer.create_batch().await.unwrap();

    assert_eq!(batch.encoded_blobs.len(), 2);
    assert_eq!(pipeline.streamer.reference_block_number().await, 0);
}
