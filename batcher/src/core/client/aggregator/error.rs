use thiserror::Error;

use crate::types::QuorumId;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AggregationError {
    #[error("Quorum {0} is not part of the operator state")]
    UnknownQuorum(QuorumId),

    #[error("Quorum {0} has no aggregate public key")]
    MissingAggregatePubkey(QuorumId),

    #[error("No signatures to aggregate for quorums {0:?}")]
    NoSignatures(Vec<QuorumId>),
}
