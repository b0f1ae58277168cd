use std::sync::Arc;
use std::time::Duration;

use batcher_chain_client_interface::MockEthClient;
use rstest::*;
use tokio::sync::mpsc;
use tracing_test::traced_test;

use crate::config::{FinalizerConfig, OrchestratorConfig};
use crate::core::assignment::StdAssignmentCoordinator;
use crate::core::client::transactor::MockTransactor;
use crate::core::client::{BlobStore, InMemoryBlobStore, InMemoryMinibatchStore, MinibatchStore, StakeSignatureAggregator};
use crate::pipeline::{Collaborators, Orchestrator};
use crate::tests::common::*;
use crate::types::batch::BatchStatus;
use crate::types::blob::BlobStatus;

struct Stores {
    blob_store: Arc<InMemoryBlobStore>,
    minibatch_store: Arc<InMemoryMinibatchStore>,
}

fn pipeline_config() -> OrchestratorConfig {
    OrchestratorConfig {
        streamer: streamer_config(),
        minibatcher: minibatcher_config(),
        batch_confirmer: confirmer_config(),
        txn_manager: txn_manager_config(),
        finalizer: FinalizerConfig { loop_interval: Duration::from_secs(60), ..Default::default() },
        shutdown_timeout: Duration::from_secs(5),
    }
}

/// Chain that never moves past the reference block, so batches stay pending.
fn idle_eth_client() -> MockEthClient {
    let mut eth_client = MockEthClient::new();
    eth_client.expect_block_number().returning(|| Ok(REFERENCE_BLOCK));
    eth_client.expect_finalized_block_number().returning(|| Ok(0));
    eth_client
}

fn collaborators() -> (Collaborators, Stores) {
    let blob_store = Arc::new(InMemoryBlobStore::new());
    let minibatch_store = Arc::new(InMemoryMinibatchStore::new());
    let collaborators = Collaborators {
        blob_store: blob_store.clone(),
        minibatch_store: minibatch_store.clone(),
        encoder_client: Arc::new(mock_encoder()),
        dispatcher: Arc::new(mock_dispatcher(all_operators())),
        chain_state: Arc::new(mock_chain_state(operator_state())),
        assignment_coordinator: Arc::new(StdAssignmentCoordinator),
        aggregator: Arc::new(StakeSignatureAggregator),
        transactor: Arc::new(MockTransactor::new()),
        eth_client: Arc::new(idle_eth_client()),
    };
    (collaborators, Stores { blob_store, minibatch_store })
}

#[rstest]
#[traced_test]
#[tokio::test]
async fn idle_pipeline_sends_heartbeats_and_stops() {
    let (collaborators, _stores) = collaborators();
    let (heartbeat_tx, mut heartbeat_rx) = mpsc::channel(1);
    let orchestrator =
        Arc::new(Orchestrator::new(pipeline_config(), collaborators, test_metrics(), Some(heartbeat_tx)).unwrap());

    orchestrator.start().await;
    let beat = tokio::time::timeout(Duration::from_secs(5), heartbeat_rx.recv()).await.unwrap();
    assert!(beat.is_some());

    orchestrator.shutdown().await;
    assert!(orchestrator.shutdown_token().is_cancelled());
    assert!(logs_contain("Pipeline started"));
    assert!(logs_contain("Pipeline stopped"));
    assert!(!logs_contain("Timed out waiting for tasks to stop"));
}

#[rstest]
#[tokio::test]
async fn stored_blobs_are_encoded_and_dispersed() {
    let (collaborators, stores) = collaborators();
    let mut keys = Vec::new();
    for seed in [1, 2] {
        keys.push(stores.blob_store.store_blob(blob(seed), u64::from(seed)).await.unwrap());
    }
    let orchestrator = Arc::new(Orchestrator::new(pipeline_config(), collaborators, test_metrics(), None).unwrap());

    orchestrator.start().await;
    tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            let mut dispersing = 0;
            for key in &keys {
                if stores.blob_store.get_blob_metadata(key).await.unwrap().blob_status == BlobStatus::Dispersing {
                    dispersing += 1;
                }
            }
            if dispersing == keys.len() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .unwrap();
    orchestrator.shutdown().await;

    let pending = stores.minibatch_store.get_batches_by_status(BatchStatus::Pending).await.unwrap();
    assert_eq!(pending.len(), 1);
    assert_eq!(pending[0].reference_block_number, REFERENCE_BLOCK);
    let mut mapped = 0;
    for key in &keys {
        mapped += stores.minibatch_store.get_blob_minibatch_mappings(key).await.unwrap().len();
    }
    assert_eq!(mapped, keys.len());
}
