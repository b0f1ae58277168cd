use std::collections::BTreeMap;

use alloy::primitives::B256;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use strum_macros::Display;
use uuid::Uuid;

use crate::types::attestation::Signature;
use crate::types::blob::BlobKey;
use crate::types::encoding::G1Point;
use crate::types::header::BlobHeader;
use crate::types::operator::OperatorId;
use crate::types::QuorumId;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display)]
pub enum BatchStatus {
    /// Minibatches are still being added.
    Pending,
    /// No more minibatches will be added; waiting for dispersal to finish.
    Formed,
    /// Signatures aggregated and the confirmation transaction handed off; waiting for its receipt.
    Attesting,
    Attested,
    Failed,
}

impl BatchStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, BatchStatus::Attested | BatchStatus::Failed)
    }

    pub fn can_transition_to(self, next: BatchStatus) -> bool {
        use BatchStatus::*;
        matches!(
            (self, next),
            (Pending, Formed)
                | (Pending, Failed)
                | (Formed, Attesting)
                | (Formed, Failed)
                | (Attesting, Attested)
                | (Attesting, Failed)
        )
    }
}

/// Outcome of signature aggregation stored on the batch before confirmation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchAttestation {
    pub header_hash: B256,
    pub quorum_agg_pubkeys: BTreeMap<QuorumId, G1Point>,
    pub aggregate_signature: Signature,
}

/// A logical batch: every minibatch dispersed at one reference block.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchRecord {
    pub id: Uuid,
    pub created_at: DateTime<Utc>,
    pub reference_block_number: u64,
    /// Set once the batch moves to `Attesting`.
    pub attestation: Option<BatchAttestation>,
    pub status: BatchStatus,
    pub num_minibatches: u32,
}

impl BatchRecord {
    pub fn new_pending(id: Uuid, reference_block_number: u64) -> Self {
        Self {
            id,
            created_at: Utc::now(),
            reference_block_number,
            attestation: None,
            status: BatchStatus::Pending,
            num_minibatches: 0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MinibatchRecord {
    pub batch_id: Uuid,
    pub minibatch_index: u32,
    pub blob_header_hashes: Vec<B256>,
    /// Encoded bytes dispersed in this minibatch.
    pub batch_size: u64,
    pub reference_block_number: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DispersalRequest {
    pub batch_id: Uuid,
    pub minibatch_index: u32,
    pub operator_id: OperatorId,
    pub socket: String,
    pub num_blobs: u32,
    pub requested_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct DispersalResponse {
    pub signatures: Vec<Signature>,
    pub responded_at: Option<DateTime<Utc>>,
    pub error: Option<String>,
}

/// Dispersal of one minibatch to one operator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MinibatchDispersal {
    pub request: DispersalRequest,
    pub response: DispersalResponse,
}

impl MinibatchDispersal {
    pub fn is_successful(&self) -> bool {
        self.response.responded_at.is_some() && self.response.error.is_none()
    }
}

/// Where a blob landed inside a batch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlobMinibatchMapping {
    pub blob_key: BlobKey,
    pub batch_id: Uuid,
    pub minibatch_index: u32,
    pub blob_index: u32,
    pub blob_header: BlobHeader,
}

#[cfg(test)]
mod tests {
    use rstest::rstest;

    use super::BatchStatus::{self, *};

    #[rstest]
    #[case(Pending, Formed, true)]
    #[case(Formed, Attesting, true)]
    #[case(Attesting, Attested, true)]
    #[case(Attesting, Failed, true)]
    #[case(Formed, Attested, false)]
    #[case(Failed, Attested, false)]
    #[case(Attested, Failed, false)]
    #[case(Attesting, Formed, false)]
    #[case(Formed, Formed, false)]
    fn batch_status_transitions(#[case] from: BatchStatus, #[case] to: BatchStatus, #[case] allowed: bool) {
        assert_eq!(from.can_transition_to(to), allowed);
    }
}
