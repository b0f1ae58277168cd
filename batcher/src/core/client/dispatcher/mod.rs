pub mod error;
pub mod failure_aggregator;
pub mod http;

use std::sync::Arc;
use std::time::Duration;

use alloy::primitives::B256;
use async_trait::async_trait;
pub use error::DispatchError;
pub use failure_aggregator::{FailureAggregator, OperatorFailure};
use tokio::sync::mpsc;

use crate::types::attestation::{Signature, SigningMessage};
use crate::types::encoding::{BlobMessage, EncodedBlob};
use crate::types::header::BatchHeader;
use crate::types::operator::{IndexedOperatorInfo, IndexedOperatorState};

/// Network fan-out to the operators of a batch.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait Dispatcher: Send + Sync {
    /// Sends each operator its bundles of every blob. The receiver yields one message per operator
    /// in `state`; operators without any bundle report an error instead of being contacted.
    async fn disperse_batch(
        &self,
        state: Arc<IndexedOperatorState>,
        blobs: Vec<EncodedBlob>,
        batch_header: BatchHeader,
    ) -> mpsc::Receiver<SigningMessage>;

    /// Stores the blobs on one operator and returns its signature of each blob, in order.
    async fn send_blobs_to_operator(
        &self,
        blobs: Vec<BlobMessage>,
        batch_header: BatchHeader,
        operator: IndexedOperatorInfo,
        timeout: Duration,
    ) -> Result<Vec<Signature>, DispatchError>;

    /// Asks every operator in `state` to sign the batch header. The receiver yields one message per
    /// operator.
    async fn attest_batch(
        &self,
        state: Arc<IndexedOperatorState>,
        blob_header_hashes: Vec<B256>,
        batch_header: BatchHeader,
    ) -> Result<mpsc::Receiver<SigningMessage>, DispatchError>;
}
