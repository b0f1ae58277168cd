pub mod error;
pub mod ethereum;

use std::collections::BTreeMap;

use alloy::consensus::TxEip1559;
use alloy::primitives::U256;
use alloy::sol_types::SolEvent;
use async_trait::async_trait;
use batcher_chain_client_interface::TxReceipt;
pub use error::TransactorError;

use crate::types::attestation::{QuorumResult, SignatureAggregation};
use crate::types::header::BatchHeader;
use crate::types::QuorumId;

alloy::sol! {
    event BatchConfirmed(bytes32 indexed batchHeaderHash, uint32 batchId);
}

/// Builds the transactions that settle batches on chain.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait Transactor: Send + Sync {
    /// Unsigned `confirmBatch` call. Gas fields are left for the transaction manager to fill.
    async fn build_confirm_batch_txn(
        &self,
        batch_header: &BatchHeader,
        quorum_results: &BTreeMap<QuorumId, QuorumResult>,
        aggregation: &SignatureAggregation,
    ) -> Result<TxEip1559, TransactorError>;
}

/// On-chain batch id carried by the `BatchConfirmed` event of a confirmation receipt.
pub fn parse_batch_id_from_receipt(receipt: &TxReceipt) -> Result<u32, TransactorError> {
    let log = receipt
        .logs
        .iter()
        .find(|log| log.topics().first() == Some(&BatchConfirmed::SIGNATURE_HASH))
        .ok_or(TransactorError::MissingBatchConfirmedEvent(receipt.transaction_hash))?;

    let data = log.data.data.as_ref();
    let word = data.get(..32).ok_or_else(|| {
        TransactorError::MalformedBatchConfirmedEvent(format!("expected at least 32 bytes of data, got {}", data.len()))
    })?;
    u32::try_from(U256::from_be_slice(word))
        .map_err(|_| TransactorError::MalformedBatchConfirmedEvent("batch id does not fit in uint32".to_string()))
}
