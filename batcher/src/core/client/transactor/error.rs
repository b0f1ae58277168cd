use batcher_chain_client_interface::EthClientError;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TransactorError {
    #[error("No BatchConfirmed event in receipt of transaction {0}")]
    MissingBatchConfirmedEvent(alloy::primitives::B256),

    #[error("Malformed BatchConfirmed event: {0}")]
    MalformedBatchConfirmedEvent(String),

    #[error(transparent)]
    EthClient(#[from] EthClientError),
}
