use std::collections::BTreeMap;

use alloy::primitives::U256;
use tracing::{info, warn};

use crate::types::operator::OperatorId;
use crate::types::QuorumId;

/// A dispersal that did not succeed, with the stake it represents.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OperatorFailure {
    pub operator_id: OperatorId,
    pub socket: String,
    pub stake_by_quorum: BTreeMap<QuorumId, U256>,
    pub error: String,
}

/// Tallies failed stake per quorum over one dispersal round.
#[derive(Debug, Default)]
pub struct FailureAggregator {
    failures: Vec<OperatorFailure>,
    total_stake: BTreeMap<QuorumId, U256>,
    failed_stake: BTreeMap<QuorumId, U256>,
}

impl FailureAggregator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_total_stake(&mut self, quorum_id: QuorumId, stake: U256) {
        *self.total_stake.entry(quorum_id).or_default() += stake;
    }

    pub fn add_failure(&mut self, failure: OperatorFailure) {
        for (quorum_id, stake) in &failure.stake_by_quorum {
            *self.failed_stake.entry(*quorum_id).or_default() += *stake;
        }
        self.failures.push(failure);
    }

    pub fn failures(&self) -> &[OperatorFailure] {
        &self.failures
    }

    /// Share of the quorum's stake that failed, in percent. Zero for quorums without stake.
    pub fn failed_stake_percentage(&self, quorum_id: QuorumId) -> f64 {
        let total = self.total_stake.get(&quorum_id).copied().unwrap_or_default();
        if total.is_zero() {
            return 0.0;
        }
        let failed = self.failed_stake.get(&quorum_id).copied().unwrap_or_default();
        // basis points keep two decimals without going through floats on big integers
        let basis_points = failed * U256::from(10_000) / total;
        u64::try_from(basis_points).unwrap_or(u64::MAX) as f64 / 100.0
    }

    pub fn log_summary(&self) {
        if self.failures.is_empty() {
            info!(component = "FailureAggregator", "All operators accepted the dispersal");
            return;
        }
        for quorum_id in self.total_stake.keys() {
            warn!(
                component = "FailureAggregator",
                quorum_id,
                failed_stake_percentage = self.failed_stake_percentage(*quorum_id),
                "Failed stake in quorum"
            );
        }
        for failure in &self.failures {
            warn!(
                component = "FailureAggregator",
                operator_id = %failure.operator_id,
                socket = %failure.socket,
                error = %failure.error,
                "Operator dispersal failed"
            );
        }
    }
}
