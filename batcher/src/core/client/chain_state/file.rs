use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;

use alloy::primitives::{Bytes, U256};
use async_trait::async_trait;
use batcher_chain_client_interface::EthClient;
use serde::Deserialize;
use tracing::{debug, info};

use super::{ChainStateError, IndexedChainState};
use crate::types::encoding::G1Point;
use crate::types::operator::{IndexedOperatorInfo, IndexedOperatorState, OperatorInfo, OperatorState};
use crate::types::QuorumId;

#[derive(Debug, Clone, Deserialize)]
struct OperatorEntry {
    pubkey_g1: G1Point,
    #[serde(default)]
    pubkey_g2: Bytes,
    socket: String,
    /// Stake per quorum the operator is registered in.
    stakes: BTreeMap<QuorumId, u64>,
}

#[derive(Debug, Clone, Deserialize)]
struct OperatorRegistry {
    operators: Vec<OperatorEntry>,
    aggregate_pubkeys: BTreeMap<QuorumId, G1Point>,
}

/// `IndexedChainState` backed by a static operator registry file. The registry is the same at
/// every block; the chain is only asked for its current height.
pub struct FileChainState {
    registry: OperatorRegistry,
    eth_client: Arc<dyn EthClient>,
}

impl std::fmt::Debug for FileChainState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FileChainState").field("registry", &self.registry).finish_non_exhaustive()
    }
}

impl FileChainState {
    pub fn new(path: impl AsRef<Path>, eth_client: Arc<dyn EthClient>) -> Result<Self, ChainStateError> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path)
            .map_err(|e| ChainStateError::Io { path: path.display().to_string(), message: e.to_string() })?;
        let state = Self::from_json(&contents, eth_client)?;
        info!(
            path = %path.display(),
            num_operators = state.registry.operators.len(),
            quorums = ?state.registry.aggregate_pubkeys.keys().collect::<Vec<_>>(),
            "Loaded operator registry"
        );
        Ok(state)
    }

    pub fn from_json(contents: &str, eth_client: Arc<dyn EthClient>) -> Result<Self, ChainStateError> {
        let registry: OperatorRegistry =
            serde_json::from_str(contents).map_err(|e| ChainStateError::Parse(e.to_string()))?;
        Ok(Self { registry, eth_client })
    }
}

#[async_trait]
impl IndexedChainState for FileChainState {
    async fn get_current_block_number(&self) -> Result<u64, ChainStateError> {
        Ok(self.eth_client.block_number().await?)
    }

    async fn get_indexed_operator_state(
        &self,
        block_number: u64,
        quorum_ids: &[QuorumId],
    ) -> Result<IndexedOperatorState, ChainStateError> {
        let mut state = IndexedOperatorState {
            operator_state: OperatorState { block_number, ..Default::default() },
            ..Default::default()
        };

        for entry in &self.registry.operators {
            let operator_id = entry.pubkey_g1.hash();
            let mut registered = false;
            for (quorum_id, stake) in entry.stakes.iter().filter(|(q, _)| quorum_ids.contains(q)) {
                let total = state.operator_state.totals.entry(*quorum_id).or_default();
                let index = total.index;
                total.index += 1;
                total.stake += U256::from(*stake);
                state
                    .operator_state
                    .operators
                    .entry(*quorum_id)
                    .or_default()
                    .insert(operator_id, OperatorInfo { stake: U256::from(*stake), index });
                registered = true;
            }
            if registered {
                state.indexed_operators.insert(
                    operator_id,
                    IndexedOperatorInfo {
                        pubkey_g1: entry.pubkey_g1,
                        pubkey_g2: entry.pubkey_g2.clone(),
                        socket: entry.socket.clone(),
                    },
                );
            }
        }

        for quorum_id in quorum_ids {
            if let Some(pubkey) = self.registry.aggregate_pubkeys.get(quorum_id) {
                state.aggregate_pubkeys.insert(*quorum_id, *pubkey);
            }
        }

        debug!(block_number, ?quorum_ids, num_operators = state.indexed_operators.len(), "Built operator state");
        Ok(state)
    }
}
