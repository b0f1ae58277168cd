pub mod pipeline;

use batcher_chain_client_interface::EthClientError;
use strum_macros::Display;
use thiserror::Error;

use crate::core::assignment::AssignmentError;
use crate::core::client::aggregator::AggregationError;
use crate::core::client::blob_store::BlobStoreError;
use crate::core::client::chain_state::ChainStateError;
use crate::core::client::dispatcher::DispatchError;
use crate::core::client::encoder::EncoderError;
use crate::core::client::minibatch_store::MinibatchStoreError;
use crate::core::client::transactor::TransactorError;
use crate::core::merkle::MerkleError;
pub use pipeline::{
    BatchConfirmerError, EncodedBlobStoreError, EncodingStreamerError, FinalizerError, MinibatcherError,
    TxnManagerError,
};

/// Result type for batcher operations
pub type BatcherResult<T> = Result<T, BatcherError>;

/// Error types for the batcher process
#[derive(Error, Debug)]
pub enum BatcherError {
    #[error("Blob store error: {0}")]
    BlobStore(#[from] BlobStoreError),

    #[error("Minibatch store error: {0}")]
    MinibatchStore(#[from] MinibatchStoreError),

    #[error("Encoder error: {0}")]
    Encoder(#[from] EncoderError),

    #[error("Dispatch error: {0}")]
    Dispatch(#[from] DispatchError),

    #[error("Chain state error: {0}")]
    ChainState(#[from] ChainStateError),

    #[error("Signature aggregation error: {0}")]
    Aggregation(#[from] AggregationError),

    #[error("Assignment error: {0}")]
    Assignment(#[from] AssignmentError),

    #[error("Merkle error: {0}")]
    Merkle(#[from] MerkleError),

    #[error("Transactor error: {0}")]
    Transactor(#[from] TransactorError),

    #[error("Eth client error: {0}")]
    EthClient(#[from] EthClientError),

    #[error("Encoding streamer error: {0}")]
    EncodingStreamer(#[from] EncodingStreamerError),

    #[error("Minibatcher error: {0}")]
    Minibatcher(#[from] MinibatcherError),

    #[error("Batch confirmer error: {0}")]
    BatchConfirmer(#[from] BatchConfirmerError),

    #[error("Txn manager error: {0}")]
    TxnManager(#[from] TxnManagerError),

    #[error("Finalizer error: {0}")]
    Finalizer(#[from] FinalizerError),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Run Command error
    #[error("Run Command Error: {0}")]
    RunCommand(String),
}

/// Why a set of blobs was handed back to the blob store for retry or failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
pub enum FailReason {
    FailBatchHeaderHash,
    FailAggregateSignatures,
    FailNoSignatures,
    FailNoAggregatedSignature,
    FailConfirmBatch,
    FailGetBatchID,
    FailUpdateConfirmationInfo,
    FailUpdateBatchStatus,
    FailStoreBatch,
    FailStoreMappings,
}
