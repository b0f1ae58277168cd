use std::time::Duration;

use batcher_chain_client_interface::EthClientError;
use thiserror::Error;
use uuid::Uuid;

use crate::core::client::aggregator::AggregationError;
use crate::core::client::blob_store::BlobStoreError;
use crate::core::client::chain_state::ChainStateError;
use crate::core::client::dispatcher::DispatchError;
use crate::core::client::encoder::EncoderError;
use crate::core::client::minibatch_store::MinibatchStoreError;
use crate::core::client::transactor::TransactorError;
use crate::core::merkle::MerkleError;
use crate::types::blob::BlobKey;
use crate::types::QuorumId;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum EncodedBlobStoreError {
    #[error("No such key: blob {blob_key} quorum {quorum_id} was never requested")]
    NoSuchKey { blob_key: BlobKey, quorum_id: QuorumId },
}

#[derive(Error, Debug)]
pub enum EncodingStreamerError {
    #[error("no encoded results")]
    NoEncodedResults,

    #[error("Invalid streamer config: {0}")]
    InvalidConfig(String),

    #[error("reference block number is being updated to a lower value: from {current} to {new}")]
    ReferenceBlockDecrease { current: u64, new: u64 },

    #[error("Timed out fetching operator state at block {0}")]
    ChainStateTimeout(u64),

    #[error("Chain state error: {0}")]
    ChainState(#[from] ChainStateError),

    #[error("Blob store error: {0}")]
    BlobStore(#[from] BlobStoreError),

    #[error("Encoding of blob {blob_key} for quorum {quorum_id} failed: {source}")]
    Encoding {
        blob_key: BlobKey,
        quorum_id: QuorumId,
        #[source]
        source: EncoderError,
    },

    #[error("Encoded blob store error: {0}")]
    EncodedBlobStore(#[from] EncodedBlobStoreError),

    #[error("Merkle error: {0}")]
    Merkle(#[from] MerkleError),
}

impl EncodingStreamerError {
    /// Encoder failure wrapped by this error, if any.
    pub fn encoder_error(&self) -> Option<&EncoderError> {
        match self {
            EncodingStreamerError::Encoding { source, .. } => Some(source),
            _ => None,
        }
    }
}

#[derive(Error, Debug)]
pub enum MinibatcherError {
    #[error("too many pending requests {pending} with max number of connections {max}. skipping minibatch iteration")]
    TooManyPendingRequests { pending: usize, max: usize },

    #[error(transparent)]
    EncodingStreamer(#[from] EncodingStreamerError),

    #[error("Minibatch store error: {0}")]
    MinibatchStore(#[from] MinibatchStoreError),

    #[error("error storing blob minibatch mappings: {0}")]
    StoreMappings(#[source] MinibatchStoreError),

    #[error("number of blob metadatas ({metadata}) and blob headers ({headers}) do not match")]
    MappingLengthMismatch { metadata: usize, headers: usize },
}

#[derive(Error, Debug)]
pub enum BatchConfirmerError {
    #[error("error getting current block number: {0}")]
    EthClient(#[from] EthClientError),

    #[error("error updating reference block number: {0}")]
    EncodingStreamer(#[from] EncodingStreamerError),

    #[error("Minibatch store error: {0}")]
    MinibatchStore(#[from] MinibatchStoreError),

    #[error("batch {batch_id} was not dispersed within {timeout:?}")]
    DispersalTimeout { batch_id: Uuid, timeout: Duration },

    #[error("batch {batch_id} did not gather signatures within {timeout:?}")]
    AttestationTimeout { batch_id: Uuid, timeout: Duration },

    #[error("no batch state found for batch {0}")]
    MissingBatchState(Uuid),

    #[error("error setting batch root from blob header hashes: {0}")]
    Merkle(#[from] MerkleError),

    #[error("error making attest batch request: {0}")]
    Dispatch(#[from] DispatchError),

    #[error("error receiving and aggregating signatures: {0}")]
    Aggregation(#[from] AggregationError),

    #[error("no blobs received sufficient signatures")]
    NoSignatures,

    #[error("error building confirmBatch transaction: {0}")]
    Transactor(#[from] TransactorError),

    #[error("error sending confirmBatch transaction: {0}")]
    TxnManager(#[from] TxnManagerError),

    #[error("failed to confirm batch onchain: {0}")]
    OnchainConfirmation(#[source] TxnManagerError),

    #[error("error fetching batch ID: {0}")]
    BatchId(#[source] TransactorError),

    #[error("Shutdown requested")]
    Cancelled,
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TxnManagerError {
    #[error("failed to get latest gas caps: {0}")]
    GasCaps(#[source] EthClientError),

    #[error("failed to update gas price: {0}")]
    UpdateGas(#[source] EthClientError),

    #[error("failed to send txn ({tag}): {source}")]
    Send {
        tag: String,
        #[source]
        source: EthClientError,
    },

    #[error("failed to send txn ({tag}) after {attempts} attempts: {source}")]
    SendRetriesExhausted {
        tag: String,
        attempts: usize,
        #[source]
        source: EthClientError,
    },

    #[error("transaction ({tag}) failed: {source}")]
    Monitor {
        tag: String,
        #[source]
        source: EthClientError,
    },

    #[error("Transaction monitor is not running")]
    MonitorStopped,

    #[error("Shutdown requested")]
    Cancelled,
}

#[derive(Error, Debug)]
pub enum FinalizerError {
    #[error("error getting latest finalized block: {0}")]
    FinalizedBlock(#[source] EthClientError),

    #[error("error getting blob metadata: {0}")]
    BlobStore(#[from] BlobStoreError),
}
