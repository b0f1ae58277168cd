use std::collections::BTreeMap;

use alloy::primitives::{Bytes, B256, U256};
use serde::{Deserialize, Serialize};

use crate::types::encoding::G1Point;
use crate::types::QuorumId;

/// keccak256 of the operator's G1 public key.
pub type OperatorId = B256;

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct OperatorInfo {
    pub stake: U256,
    /// Position of the operator inside the quorum, used to lay out chunk assignments.
    pub index: u32,
}

/// Stake distribution of every quorum at a block.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct OperatorState {
    pub operators: BTreeMap<QuorumId, BTreeMap<OperatorId, OperatorInfo>>,
    /// Total stake and operator count (`index`) per quorum.
    pub totals: BTreeMap<QuorumId, OperatorInfo>,
    pub block_number: u64,
}

impl OperatorState {
    pub fn total_stake(&self, quorum_id: QuorumId) -> Option<U256> {
        self.totals.get(&quorum_id).map(|total| total.stake)
    }

    /// Quorums the operator has stake in.
    pub fn quorums_of(&self, operator_id: &OperatorId) -> Vec<QuorumId> {
        self.operators
            .iter()
            .filter(|(_, operators)| operators.contains_key(operator_id))
            .map(|(quorum_id, _)| *quorum_id)
            .collect()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct IndexedOperatorInfo {
    pub pubkey_g1: G1Point,
    /// Serialized G2 public key. Only the aggregation backend interprets it.
    pub pubkey_g2: Bytes,
    /// Dispersal endpoint, `host:port` or a full URL.
    pub socket: String,
}

/// Operator state enriched with the data needed to reach operators and check their signatures.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct IndexedOperatorState {
    pub operator_state: OperatorState,
    pub indexed_operators: BTreeMap<OperatorId, IndexedOperatorInfo>,
    pub aggregate_pubkeys: BTreeMap<QuorumId, G1Point>,
}

impl IndexedOperatorState {
    pub fn quorum_ids(&self) -> Vec<QuorumId> {
        self.aggregate_pubkeys.keys().copied().collect()
    }

    pub fn block_number(&self) -> u64 {
        self.operator_state.block_number
    }
}
