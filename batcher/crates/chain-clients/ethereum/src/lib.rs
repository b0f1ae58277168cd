use std::sync::Arc;
use std::time::Duration;

use alloy::consensus::{SignableTransaction, TxEip1559, TxEnvelope};
use alloy::eips::eip2718::Encodable2718;
use alloy::eips::BlockNumberOrTag;
use alloy::network::{EthereumWallet, TxSigner};
use alloy::primitives::{Address, B256, U256};
use alloy::providers::{Provider, ProviderBuilder, RootProvider};
use alloy::rpc::types::{BlockTransactionsKind, TransactionInput, TransactionReceipt, TransactionRequest};
use alloy::signers::local::PrivateKeySigner;
use alloy::transports::http::Http;
use alloy::transports::{RpcError, TransportErrorKind};
use async_trait::async_trait;
use batcher_chain_client_interface::{EthClient, EthClientError, TxReceipt};
use reqwest::Client;
use tokio::time::sleep;
use tracing::{debug, error, info};
use url::Url;

/// Tip used when the node does not implement `eth_maxPriorityFeePerGas` (15 gwei).
pub const FALLBACK_GAS_TIP_CAP: u128 = 15_000_000_000;

#[derive(Clone, Debug)]
pub struct EthereumClientValidatedArgs {
    pub rpc_url: Url,

    pub private_key: String,

    /// Blocks a receipt must be buried under before it is reported as evaluated.
    pub num_confirmations: u64,

    pub receipt_poll_interval: Duration,
}

pub struct EthereumClient {
    provider: Arc<RootProvider<Http<Client>>>,
    wallet: EthereumWallet,
    wallet_address: Address,
    num_confirmations: u64,
    receipt_poll_interval: Duration,
}

impl EthereumClient {
    pub fn new_with_args(args: &EthereumClientValidatedArgs) -> Result<Self, EthClientError> {
        let signer: PrivateKeySigner =
            args.private_key.parse().map_err(|e| EthClientError::Signer(format!("Failed to parse private key: {e}")))?;
        let wallet_address = signer.address();
        let wallet = EthereumWallet::from(signer);

        let provider = Arc::new(ProviderBuilder::new().on_http(args.rpc_url.clone()));

        info!(address = %wallet_address, rpc_url = %args.rpc_url, "Ethereum client initialised");

        Ok(Self {
            provider,
            wallet,
            wallet_address,
            num_confirmations: args.num_confirmations,
            receipt_poll_interval: args.receipt_poll_interval,
        })
    }

    pub fn wallet_address(&self) -> Address {
        self.wallet_address
    }

    async fn latest_base_fee(&self) -> Result<u128, EthClientError> {
        let block = self
            .provider
            .get_block_by_number(BlockNumberOrTag::Latest, BlockTransactionsKind::Hashes)
            .await
            .map_err(map_rpc_error)?
            .ok_or_else(|| EthClientError::NotFound("latest block".to_string()))?;
        Ok(block.header.base_fee_per_gas.map(u128::from).unwrap_or_default())
    }
}

#[async_trait]
impl EthClient for EthereumClient {
    async fn block_number(&self) -> Result<u64, EthClientError> {
        self.provider.get_block_number().await.map_err(map_rpc_error)
    }

    async fn finalized_block_number(&self) -> Result<u64, EthClientError> {
        let block = self
            .provider
            .get_block_by_number(BlockNumberOrTag::Finalized, BlockTransactionsKind::Hashes)
            .await
            .map_err(map_rpc_error)?
            .ok_or_else(|| EthClientError::NotFound("finalized block".to_string()))?;
        Ok(block.header.number)
    }

    async fn transaction_receipt(&self, tx_hash: B256) -> Result<TxReceipt, EthClientError> {
        let receipt = self
            .provider
            .get_transaction_receipt(tx_hash)
            .await
            .map_err(map_rpc_error)?
            .ok_or_else(|| EthClientError::NotFound(format!("receipt for {tx_hash}")))?;
        to_tx_receipt(receipt)
    }

    async fn get_latest_gas_caps(&self) -> Result<(u128, u128), EthClientError> {
        let suggested = match self.provider.get_max_priority_fee_per_gas().await {
            Ok(tip) => tip,
            Err(e) => {
                info!(error = %e, "eth_maxPriorityFeePerGas is unsupported by current backend, using fallback gas tip cap");
                FALLBACK_GAS_TIP_CAP
            }
        };
        let gas_tip_cap = with_extra_tip(suggested);
        let base_fee = self.latest_base_fee().await?;
        Ok((gas_tip_cap, gas_fee_cap(gas_tip_cap, base_fee)))
    }

    async fn update_gas(
        &self,
        tx: TxEip1559,
        value: U256,
        gas_tip_cap: u128,
        gas_fee_cap: u128,
    ) -> Result<TxEip1559, EthClientError> {
        let request = TransactionRequest {
            from: Some(self.wallet_address),
            to: Some(tx.to),
            input: TransactionInput::new(tx.input.clone()),
            value: Some(value),
            max_fee_per_gas: Some(gas_fee_cap),
            max_priority_fee_per_gas: Some(gas_tip_cap),
            ..Default::default()
        };
        let gas_limit = self.provider.estimate_gas(&request).await.map_err(map_rpc_error)?;

        Ok(TxEip1559 {
            gas_limit: add_gas_buffer(gas_limit),
            max_fee_per_gas: gas_fee_cap,
            max_priority_fee_per_gas: gas_tip_cap,
            value,
            ..tx
        })
    }

    async fn send_transaction(&self, mut tx: TxEip1559) -> Result<B256, EthClientError> {
        let signature = self
            .wallet
            .default_signer()
            .sign_transaction(&mut tx)
            .await
            .map_err(|e| EthClientError::Signer(e.to_string()))?;
        let envelope = TxEnvelope::from(tx.into_signed(signature));
        let encoded = envelope.encoded_2718();

        let pending = self.provider.send_raw_transaction(encoded.as_slice()).await.map_err(map_rpc_error)?;
        let tx_hash = *pending.tx_hash();
        debug!(tx_hash = %tx_hash, "Transaction broadcast");
        Ok(tx_hash)
    }

    async fn ensure_transaction_evaled(&self, tx_hash: B256, tag: &str) -> Result<TxReceipt, EthClientError> {
        loop {
            match self.transaction_receipt(tx_hash).await {
                Ok(receipt) => {
                    if !receipt.status {
                        error!(tag, tx_hash = %tx_hash, gas_used = receipt.gas_used, "Transaction failed");
                        return Err(EthClientError::Reverted(tx_hash));
                    }
                    match self.block_number().await {
                        Ok(chain_tip) if receipt.block_number + self.num_confirmations <= chain_tip => {
                            debug!(tag, tx_hash = %tx_hash, block_number = receipt.block_number, "Transaction confirmed");
                            return Ok(receipt);
                        }
                        Ok(chain_tip) => {
                            debug!(
                                tx_block_number = receipt.block_number,
                                num_confirmations = self.num_confirmations,
                                chain_tip,
                                "Transaction mined but not enough confirmations yet"
                            );
                        }
                        Err(e) => debug!(error = %e, "Failed to query block height while waiting for transaction"),
                    }
                }
                Err(EthClientError::NotFound(_)) => debug!(tx_hash = %tx_hash, "Transaction not yet mined"),
                Err(e) => debug!(error = %e, "Transaction receipt retrieval failed"),
            }
            sleep(self.receipt_poll_interval).await;
        }
    }

    async fn pending_nonce(&self) -> Result<u64, EthClientError> {
        self.provider.get_transaction_count(self.wallet_address).pending().await.map_err(map_rpc_error)
    }

    async fn chain_id(&self) -> Result<u64, EthClientError> {
        self.provider.get_chain_id().await.map_err(map_rpc_error)
    }
}

fn map_rpc_error(e: RpcError<TransportErrorKind>) -> EthClientError {
    let message = e.to_string();
    if message.contains("timed out") || message.contains("timeout") {
        EthClientError::Timeout(message)
    } else {
        EthClientError::Rpc(message)
    }
}

fn to_tx_receipt(receipt: TransactionReceipt) -> Result<TxReceipt, EthClientError> {
    let block_number = receipt
        .block_number
        .ok_or_else(|| EthClientError::NotFound(format!("block number for {}", receipt.transaction_hash)))?;
    Ok(TxReceipt {
        transaction_hash: receipt.transaction_hash,
        block_number,
        gas_used: receipt.gas_used as u64,
        status: receipt.status(),
        logs: receipt.inner.logs().iter().map(|log| log.inner.clone()).collect(),
    })
}

/// Pays 25% over the suggestion, and at least 2 wei more.
fn with_extra_tip(suggested: u128) -> u128 {
    suggested + (suggested / 4).max(2)
}

/// `2 * base_fee + tip`
fn gas_fee_cap(gas_tip_cap: u128, base_fee: u128) -> u128 {
    base_fee.saturating_mul(2).saturating_add(gas_tip_cap)
}

/// Adds a 20% buffer to an estimated gas limit.
fn add_gas_buffer(gas_limit: u64) -> u64 {
    gas_limit.saturating_mul(6) / 5
}
