use batcher_chain_client_interface::EthClientError;
use thiserror::Error;

use crate::types::QuorumId;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ChainStateError {
    #[error("Failed to read operator state file {path}: {message}")]
    Io { path: String, message: String },

    #[error("Failed to parse operator state: {0}")]
    Parse(String),

    #[error("Quorum {0} has no aggregate public key")]
    MissingAggregatePubkey(QuorumId),

    #[error("Timed out fetching operator state")]
    Timeout,

    #[error(transparent)]
    EthClient(#[from] EthClientError),
}
