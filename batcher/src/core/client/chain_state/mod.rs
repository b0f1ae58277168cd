pub mod error;
pub mod file;

use async_trait::async_trait;
pub use error::ChainStateError;

use crate::types::operator::IndexedOperatorState;
use crate::types::QuorumId;

/// Operator registry as seen at a given block.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait IndexedChainState: Send + Sync {
    async fn get_current_block_number(&self) -> Result<u64, ChainStateError>;

    /// Operator state of the given quorums at `block_number`. Quorums unknown at that block are
    /// left out of the result.
    async fn get_indexed_operator_state(
        &self,
        block_number: u64,
        quorum_ids: &[QuorumId],
    ) -> Result<IndexedOperatorState, ChainStateError>;
}
