use alloy::consensus::TxEip1559;
use alloy::primitives::{Log, B256, U256};
use async_trait::async_trait;
use mockall::automock;
use mockall::predicate::*;
use thiserror::Error;

/// Receipt of a transaction that was included in a block.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct TxReceipt {
    pub transaction_hash: B256,
    pub block_number: u64,
    pub gas_used: u64,
    pub status: bool,
    pub logs: Vec<Log>,
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum EthClientError {
    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Timed out: {0}")]
    Timeout(String),

    #[error("Transaction {0} reverted")]
    Reverted(B256),

    #[error("RPC error: {0}")]
    Rpc(String),

    #[error("Signer error: {0}")]
    Signer(String),
}

impl EthClientError {
    /// Whether the caller may retry the same call after waiting.
    pub fn is_timeout(&self) -> bool {
        matches!(self, EthClientError::Timeout(_))
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, EthClientError::NotFound(_))
    }
}

/// Access to the settlement chain. Implemented by the alloy backed client and mocked in tests.
#[automock]
#[async_trait]
pub trait EthClient: Send + Sync {
    /// Latest block number known to the node.
    async fn block_number(&self) -> Result<u64, EthClientError>;

    /// Number of the latest block the node considers finalized.
    async fn finalized_block_number(&self) -> Result<u64, EthClientError>;

    /// Fetches the receipt of a mined transaction. `NotFound` when the transaction is unknown
    /// or still pending.
    async fn transaction_receipt(&self, tx_hash: B256) -> Result<TxReceipt, EthClientError>;

    /// Current `(gas_tip_cap, gas_fee_cap)` suggestion.
    async fn get_latest_gas_caps(&self) -> Result<(u128, u128), EthClientError>;

    /// Rebuilds `tx` with the given value and fee caps, re-estimating the gas limit. The nonce is preserved.
    async fn update_gas(
        &self,
        tx: TxEip1559,
        value: U256,
        gas_tip_cap: u128,
        gas_fee_cap: u128,
    ) -> Result<TxEip1559, EthClientError>;

    /// Signs and broadcasts `tx`, returning its hash.
    async fn send_transaction(&self, tx: TxEip1559) -> Result<B256, EthClientError>;

    /// Waits until the transaction is mined with enough confirmations. Callers bound the wait
    /// themselves, a `Timeout` error means the node gave up before inclusion.
    async fn ensure_transaction_evaled(&self, tx_hash: B256, tag: &str) -> Result<TxReceipt, EthClientError>;

    /// Nonce for the next transaction sent by the batcher account.
    async fn pending_nonce(&self) -> Result<u64, EthClientError>;

    async fn chain_id(&self) -> Result<u64, EthClientError>;
}
