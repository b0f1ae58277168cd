use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use alloy::consensus::TxEip1559;
use alloy::primitives::{B256, U256};
use assert_matches::assert_matches;
use batcher_chain_client_interface::{EthClientError, MockEthClient, TxReceipt};
use rstest::*;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;

use crate::error::TxnManagerError;
use crate::pipeline::txn_manager::{ReceiptOrErr, TxnManager, TxnRequest, MAX_SEND_TRANSACTION_RETRY};
use crate::tests::common::*;

const TAG: &str = "confirmBatch";

fn request(metadata: u32) -> TxnRequest<u32> {
    TxnRequest { tx: TxEip1559::default(), tag: TAG.to_string(), value: U256::ZERO, metadata }
}

fn mined(tx_hash: B256) -> TxReceipt {
    TxReceipt { transaction_hash: tx_hash, block_number: 1, gas_used: 50_000, status: true, logs: Vec::new() }
}

/// Network gas caps served one per send, fee caps copied into the transaction, and sequential hashes
/// per send. Gas caps, gas update and send are each expected once per entry of `gas_caps`.
fn sending_eth_client(fee_caps: Arc<Mutex<Vec<(u128, u128)>>>, gas_caps: &[(u128, u128)]) -> MockEthClient {
    let sends = gas_caps.len();
    let mut eth_client = MockEthClient::new();
    let network = Mutex::new(gas_caps.to_vec().into_iter());
    eth_client
        .expect_get_latest_gas_caps()
        .times(sends)
        .returning(move || Ok(network.lock().unwrap().next().unwrap()));
    eth_client.expect_update_gas().times(sends).returning(move |mut tx, _, tip, fee| {
        fee_caps.lock().unwrap().push((tip, fee));
        tx.max_priority_fee_per_gas = tip;
        tx.max_fee_per_gas = fee;
        Ok(tx)
    });
    let sent = AtomicUsize::new(0);
    eth_client
        .expect_send_transaction()
        .times(sends)
        .returning(move |_| Ok(B256::with_last_byte(sent.fetch_add(1, Ordering::SeqCst) as u8 + 1)));
    eth_client
}

async fn started(eth_client: MockEthClient) -> (Arc<TxnManager<u32>>, mpsc::Receiver<ReceiptOrErr<u32>>, CancellationToken) {
    let (manager, receipts) = TxnManager::new(txn_manager_config(), Arc::new(eth_client), test_metrics());
    let manager = Arc::new(manager);
    let token = CancellationToken::new();
    manager.start(token.clone(), &TaskTracker::new()).await;
    (manager, receipts, token)
}

#[rstest]
#[tokio::test]
async fn mined_transaction_delivers_receipt_with_metadata() {
    let fee_caps = Arc::new(Mutex::new(Vec::new()));
    let mut eth_client = sending_eth_client(fee_caps.clone(), &[(100, 1_000)]);
    eth_client.expect_ensure_transaction_evaled().times(1).returning(|tx_hash, _| Ok(mined(tx_hash)));
    let (manager, mut receipts, token) = started(eth_client).await;

    manager.process_transaction(request(7)).await.unwrap();
    let outcome = receipts.recv().await.unwrap();

    assert_eq!(outcome.metadata, 7);
    assert_eq!(outcome.result.unwrap().transaction_hash, B256::with_last_byte(1));
    assert_eq!(*fee_caps.lock().unwrap(), vec![(100, 1_000)]);
    token.cancel();
}

#[rstest]
#[case::bumped_by_ten_percent((100, 1_000), (110, 1_100))]
#[case::network_caps_when_higher((200, 5_000), (200, 5_000))]
#[case::each_cap_takes_the_larger((105, 5_000), (110, 5_000))]
#[tokio::test]
async fn stuck_transaction_is_sped_up(#[case] network_caps: (u128, u128), #[case] expected: (u128, u128)) {
    let fee_caps = Arc::new(Mutex::new(Vec::new()));
    let mut eth_client = sending_eth_client(fee_caps.clone(), &[(100, 1_000), network_caps]);
    let waits = Arc::new(AtomicUsize::new(0));
    let counter = waits.clone();
    eth_client.expect_ensure_transaction_evaled().returning(move |tx_hash, _| {
        if counter.fetch_add(1, Ordering::SeqCst) == 0 {
            Err(EthClientError::Timeout(format!("{tx_hash} not mined")))
        } else {
            Ok(mined(tx_hash))
        }
    });
    let (manager, mut receipts, token) = started(eth_client).await;

    manager.process_transaction(request(1)).await.unwrap();
    let outcome = receipts.recv().await.unwrap();

    let receipt = outcome.result.unwrap();
    assert!([B256::with_last_byte(1), B256::with_last_byte(2)].contains(&receipt.transaction_hash));
    assert_eq!(*fee_caps.lock().unwrap(), vec![(100, 1_000), expected]);
    // One wait for the first attempt, then one per broadcast version.
    assert_eq!(waits.load(Ordering::SeqCst), 3);
    assert!(tokio::time::timeout(Duration::from_millis(50), receipts.recv()).await.is_err());
    token.cancel();
}

#[rstest]
#[tokio::test]
async fn reverted_transaction_is_reported() {
    let mut eth_client = sending_eth_client(Arc::new(Mutex::new(Vec::new())), &[(100, 1_000)]);
    eth_client
        .expect_ensure_transaction_evaled()
        .times(1)
        .returning(|tx_hash, _| Err(EthClientError::Reverted(tx_hash)));
    let (manager, mut receipts, token) = started(eth_client).await;

    manager.process_transaction(request(2)).await.unwrap();
    let outcome = receipts.recv().await.unwrap();

    assert_eq!(outcome.metadata, 2);
    assert_matches!(
        outcome.result,
        Err(TxnManagerError::Monitor { tag, source: EthClientError::Reverted(_) }) if tag == TAG
    );
    token.cancel();
}

#[rstest]
#[case::timeouts_are_retried(EthClientError::Timeout("send".to_string()), MAX_SEND_TRANSACTION_RETRY)]
#[case::other_errors_are_not(EthClientError::Rpc("nonce too low".to_string()), 1)]
#[tokio::test]
async fn failed_send_is_returned_to_caller(#[case] error: EthClientError, #[case] expected_sends: usize) {
    let mut eth_client = MockEthClient::new();
    eth_client.expect_get_latest_gas_caps().returning(|| Ok((100, 1_000)));
    eth_client.expect_update_gas().returning(|tx, _, _, _| Ok(tx));
    let returned = error.clone();
    eth_client.expect_send_transaction().times(expected_sends).returning(move |_| Err(returned.clone()));
    eth_client.expect_ensure_transaction_evaled().never();
    let (manager, _receipts) = TxnManager::<u32>::new(txn_manager_config(), Arc::new(eth_client), test_metrics());

    let err = manager.process_transaction(request(3)).await.unwrap_err();

    if error.is_timeout() {
        assert_matches!(err, TxnManagerError::SendRetriesExhausted { attempts: MAX_SEND_TRANSACTION_RETRY, .. });
    } else {
        assert_eq!(err, TxnManagerError::Send { tag: TAG.to_string(), source: error });
    }
}

#[rstest]
#[tokio::test]
async fn gas_cap_failure_sends_nothing() {
    let mut eth_client = MockEthClient::new();
    eth_client.expect_get_latest_gas_caps().returning(|| Err(EthClientError::Rpc("unavailable".to_string())));
    eth_client.expect_send_transaction().never();
    let (manager, _receipts) = TxnManager::<u32>::new(txn_manager_config(), Arc::new(eth_client), test_metrics());

    assert_matches!(manager.process_transaction(request(4)).await, Err(TxnManagerError::GasCaps(_)));
}
