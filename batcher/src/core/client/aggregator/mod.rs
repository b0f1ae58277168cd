pub mod error;
pub mod stake;

use alloy::primitives::B256;
use async_trait::async_trait;
pub use error::AggregationError;
use tokio::sync::mpsc;

use crate::types::attestation::{QuorumAttestation, SignatureAggregation, SigningMessage};
use crate::types::operator::IndexedOperatorState;
use crate::types::QuorumId;

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait SignatureAggregator: Send + Sync {
    /// Drains one reply per operator of `state` (or until the channel closes) and tallies the
    /// signed stake of every quorum.
    async fn receive_signatures(
        &self,
        state: &IndexedOperatorState,
        message: B256,
        replies: mpsc::Receiver<SigningMessage>,
    ) -> Result<QuorumAttestation, AggregationError>;

    /// Restricts the attestation to `quorum_ids` and combines their signatures.
    fn aggregate_signatures(
        &self,
        state: &IndexedOperatorState,
        attestation: &QuorumAttestation,
        quorum_ids: &[QuorumId],
    ) -> Result<SignatureAggregation, AggregationError>;
}
