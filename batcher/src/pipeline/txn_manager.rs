use std::sync::Arc;
use std::time::Instant;

use alloy::consensus::TxEip1559;
use alloy::primitives::{B256, U256};
use batcher_chain_client_interface::{EthClient, EthClientError, TxReceipt};
use futures::future::select_ok;
use futures::FutureExt;
use tokio::sync::{mpsc, Mutex};
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{error, info, warn};

use crate::config::TxnManagerConfig;
use crate::error::TxnManagerError;
use crate::utils::metrics::BatcherMetrics;

/// Attempts at broadcasting one transaction while the node keeps timing out.
pub const MAX_SEND_TRANSACTION_RETRY: usize = 3;
/// Percentage added to both fee caps on every speed-up.
pub const GAS_PRICE_INCREASE_PERCENTAGE: u128 = 10;

/// A transaction to submit. `metadata` comes back untouched with the receipt.
#[derive(Debug, Clone)]
pub struct TxnRequest<M> {
    pub tx: TxEip1559,
    pub tag: String,
    pub value: U256,
    pub metadata: M,
}

/// Final outcome of a submitted transaction. Delivered exactly once per request.
#[derive(Debug)]
pub struct ReceiptOrErr<M> {
    pub metadata: M,
    pub result: Result<TxReceipt, TxnManagerError>,
}

struct PendingTxn<M> {
    request: TxnRequest<M>,
    /// Transaction as last broadcast, gas fields filled.
    tx: TxEip1559,
    /// Hashes of every broadcast version. Any of them may be the one that gets mined.
    attempts: Vec<B256>,
    requested_at: Instant,
}

/// Submits transactions from the batcher account and monitors them to inclusion, bumping gas when
/// one is not mined in time. Not safe for more than one account.
pub struct TxnManager<M> {
    config: TxnManagerConfig,
    eth_client: Arc<dyn EthClient>,
    metrics: Arc<BatcherMetrics>,
    send_lock: Mutex<()>,
    requests: mpsc::Sender<PendingTxn<M>>,
    pending: Mutex<Option<mpsc::Receiver<PendingTxn<M>>>>,
    receipts: mpsc::Sender<ReceiptOrErr<M>>,
}

impl<M: Send + 'static> TxnManager<M> {
    pub fn new(
        config: TxnManagerConfig,
        eth_client: Arc<dyn EthClient>,
        metrics: Arc<BatcherMetrics>,
    ) -> (Self, mpsc::Receiver<ReceiptOrErr<M>>) {
        let queue_size = config.queue_size.max(1);
        let (requests, pending) = mpsc::channel(queue_size);
        let (receipts, receipt_rx) = mpsc::channel(queue_size);
        let manager = Self {
            config,
            eth_client,
            metrics,
            send_lock: Mutex::new(()),
            requests,
            pending: Mutex::new(Some(pending)),
            receipts,
        };
        (manager, receipt_rx)
    }

    /// Spawns the monitor loop. Calling it twice is a no-op.
    pub async fn start(self: &Arc<Self>, shutdown_token: CancellationToken, tracker: &TaskTracker) {
        let Some(mut pending) = self.pending.lock().await.take() else {
            warn!(component = "TxnManager", "Transaction monitor already running");
            return;
        };
        let manager = Arc::clone(self);
        tracker.spawn(async move {
            loop {
                tokio::select! {
                    _ = shutdown_token.cancelled() => break,
                    txn = pending.recv() => {
                        let Some(txn) = txn else { break };
                        let tag = txn.request.tag.clone();
                        tokio::select! {
                            _ = shutdown_token.cancelled() => {
                                warn!(component = "TxnManager", tag = %tag, "Shutting down while monitoring transaction");
                                break;
                            }
                            (metadata, result) = manager.monitor_transaction(txn) => {
                                manager.deliver(metadata, result).await;
                            }
                        }
                    }
                }
            }
            info!(component = "TxnManager", "Transaction monitor stopped");
        });
    }

    /// Fills the gas fields, broadcasts the transaction and queues it for monitoring. The receipt
    /// arrives later on the receipt channel.
    pub async fn process_transaction(&self, request: TxnRequest<M>) -> Result<(), TxnManagerError> {
        let _guard = self.send_lock.lock().await;

        let (gas_tip_cap, gas_fee_cap) =
            self.eth_client.get_latest_gas_caps().await.map_err(TxnManagerError::GasCaps)?;
        let tx = self
            .eth_client
            .update_gas(request.tx.clone(), request.value, gas_tip_cap, gas_fee_cap)
            .await
            .map_err(TxnManagerError::UpdateGas)?;
        let tx_hash = self.send_with_retries(&tx, &request.tag).await?;

        info!(component = "TxnManager", tag = %request.tag, tx_hash = %tx_hash, gas_tip_cap, gas_fee_cap, "Transaction sent");
        let txn = PendingTxn { request, tx, attempts: vec![tx_hash], requested_at: Instant::now() };
        self.requests.send(txn).await.map_err(|_| TxnManagerError::MonitorStopped)
    }

    async fn send_with_retries(&self, tx: &TxEip1559, tag: &str) -> Result<B256, TxnManagerError> {
        let mut last_err = None;
        for attempt in 0..MAX_SEND_TRANSACTION_RETRY {
            match self.eth_client.send_transaction(tx.clone()).await {
                Ok(tx_hash) => {
                    self.metrics.txns_sent.add(1, &[]);
                    return Ok(tx_hash);
                }
                Err(err) if err.is_timeout() => {
                    warn!(component = "TxnManager", tag, attempt, error = %err, "Timed out sending transaction, retrying");
                    last_err = Some(err);
                }
                Err(err) => return Err(TxnManagerError::Send { tag: tag.to_string(), source: err }),
            }
        }
        Err(TxnManagerError::SendRetriesExhausted {
            tag: tag.to_string(),
            attempts: MAX_SEND_TRANSACTION_RETRY,
            source: last_err.unwrap_or_else(|| EthClientError::Timeout("send transaction".to_string())),
        })
    }

    async fn monitor_transaction(&self, mut txn: PendingTxn<M>) -> (M, Result<TxReceipt, TxnManagerError>) {
        let tag = txn.request.tag.clone();
        loop {
            let waits = txn
                .attempts
                .iter()
                .map(|tx_hash| self.eth_client.ensure_transaction_evaled(*tx_hash, &tag).boxed())
                .collect::<Vec<_>>();
            let outcome = tokio::time::timeout(self.config.txn_refresh_interval, select_ok(waits)).await;

            match outcome {
                Ok(Ok((receipt, _))) => {
                    self.metrics.gas_used.record(receipt.gas_used as f64, &[]);
                    info!(
                        component = "TxnManager",
                        tag = %tag,
                        tx_hash = %receipt.transaction_hash,
                        block_number = receipt.block_number,
                        gas_used = receipt.gas_used,
                        elapsed_ms = txn.requested_at.elapsed().as_millis() as u64,
                        "Transaction mined"
                    );
                    return (txn.request.metadata, Ok(receipt));
                }
                Ok(Err(err)) if !err.is_timeout() => {
                    error!(component = "TxnManager", tag = %tag, error = %err, "Transaction failed");
                    return (txn.request.metadata, Err(TxnManagerError::Monitor { tag: tag.clone(), source: err }));
                }
                _ => {
                    warn!(component = "TxnManager", tag = %tag, attempts = txn.attempts.len(), "Transaction not mined in time, speeding up");
                    if let Err(err) = self.speed_up(&mut txn).await {
                        error!(component = "TxnManager", tag = %tag, error = %err, "Error speeding up transaction");
                        return (txn.request.metadata, Err(err));
                    }
                }
            }
        }
    }

    /// Re-sends the transaction under the same nonce with both fee caps raised by
    /// [`GAS_PRICE_INCREASE_PERCENTAGE`], or to the network's current caps if those are higher.
    async fn speed_up(&self, txn: &mut PendingTxn<M>) -> Result<(), TxnManagerError> {
        let (current_tip, current_fee) =
            self.eth_client.get_latest_gas_caps().await.map_err(TxnManagerError::GasCaps)?;
        let gas_tip_cap = increase_gas_price(txn.tx.max_priority_fee_per_gas).max(current_tip);
        let gas_fee_cap = increase_gas_price(txn.tx.max_fee_per_gas).max(current_fee);

        let tx = self
            .eth_client
            .update_gas(txn.tx.clone(), txn.request.value, gas_tip_cap, gas_fee_cap)
            .await
            .map_err(TxnManagerError::UpdateGas)?;
        let tx_hash = self.send_with_retries(&tx, &txn.request.tag).await?;

        self.metrics.txn_speed_ups.add(1, &[]);
        info!(component = "TxnManager", tag = %txn.request.tag, tx_hash = %tx_hash, gas_tip_cap, gas_fee_cap, "Transaction sped up");
        txn.tx = tx;
        txn.attempts.push(tx_hash);
        Ok(())
    }

    async fn deliver(&self, metadata: M, result: Result<TxReceipt, TxnManagerError>) {
        if self.receipts.send(ReceiptOrErr { metadata, result }).await.is_err() {
            warn!(component = "TxnManager", "Receipt channel closed, dropping transaction outcome");
        }
    }
}

/// `price + ceil(price * 10 / 100)`.
pub fn increase_gas_price(price: u128) -> u128 {
    price.saturating_add(price.saturating_mul(GAS_PRICE_INCREASE_PERCENTAGE).div_ceil(100))
}

#[cfg(test)]
mod tests {
    use rstest::rstest;

    use super::*;

    #[rstest]
    #[case(0, 0)]
    #[case(1, 2)]
    #[case(100, 110)]
    #[case(15_000_000_000, 16_500_000_000)]
    #[case(u128::MAX, u128::MAX)]
    fn gas_price_increase(#[case] price: u128, #[case] expected: u128) {
        assert_eq!(increase_gas_price(price), expected);
    }
}
