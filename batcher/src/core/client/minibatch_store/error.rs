use thiserror::Error;
use uuid::Uuid;

use crate::types::batch::BatchStatus;
use crate::types::operator::OperatorId;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum MinibatchStoreError {
    #[error("Batch {0} already exists")]
    BatchExists(Uuid),

    #[error("Batch {0} not found")]
    BatchNotFound(Uuid),

    #[error("Invalid batch status {0}")]
    InvalidBatchStatus(BatchStatus),

    #[error("Batch {batch_id} cannot move from {from} to {to}")]
    InvalidBatchTransition { batch_id: Uuid, from: BatchStatus, to: BatchStatus },

    #[error("Minibatch {minibatch_index} of batch {batch_id} already exists")]
    MinibatchExists { batch_id: Uuid, minibatch_index: u32 },

    #[error("Dispersal of minibatch {minibatch_index} of batch {batch_id} to operator {operator_id} not found")]
    DispersalNotFound { batch_id: Uuid, minibatch_index: u32, operator_id: OperatorId },

    #[error("No dispersal responses found for batch {batch_id} minibatch {minibatch_index}")]
    NoDispersals { batch_id: Uuid, minibatch_index: u32 },

    #[error("Minibatch store backend error: {0}")]
    Backend(String),
}
