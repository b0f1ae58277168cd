use std::collections::{BTreeMap, BTreeSet};

use alloy::primitives::{B256, U256};
use async_trait::async_trait;
use itertools::Itertools;
use tokio::sync::mpsc;
use tracing::{debug, warn};

use super::{AggregationError, SignatureAggregator};
use crate::types::attestation::{QuorumAttestation, QuorumResult, Signature, SignatureAggregation, SigningMessage};
use crate::types::operator::IndexedOperatorState;
use crate::types::QuorumId;

/// Tallies signatures by stake. Signatures are carried as opaque bytes; checking them against the
/// operators' keys belongs to the on-chain verifier.
#[derive(Debug, Default, Clone, Copy)]
pub struct StakeSignatureAggregator;

fn percent(signed: U256, total: U256) -> u8 {
    if total.is_zero() {
        return 0;
    }
    u8::try_from(signed * U256::from(100) / total).unwrap_or(100)
}

#[async_trait]
impl SignatureAggregator for StakeSignatureAggregator {
    async fn receive_signatures(
        &self,
        state: &IndexedOperatorState,
        message: B256,
        mut replies: mpsc::Receiver<SigningMessage>,
    ) -> Result<QuorumAttestation, AggregationError> {
        let quorum_ids = state.quorum_ids();
        let mut signed_stake: BTreeMap<QuorumId, U256> = BTreeMap::new();
        let mut signatures: BTreeMap<QuorumId, BTreeMap<B256, Signature>> = BTreeMap::new();
        let mut signer_map = BTreeSet::new();

        for _ in 0..state.indexed_operators.len() {
            let Some(reply) = replies.recv().await else {
                break;
            };
            let operator_id = reply.operator;
            let signature = match (reply.signature, reply.error) {
                (Some(signature), None) => signature,
                (_, error) => {
                    warn!(component = "SignatureAggregator", %operator_id, ?error, "Operator did not sign");
                    continue;
                }
            };
            if reply.batch_header_hash != message {
                warn!(component = "SignatureAggregator", %operator_id, "Operator signed a different batch header");
                continue;
            }
            if !state.indexed_operators.contains_key(&operator_id) {
                warn!(component = "SignatureAggregator", %operator_id, "Signature from unknown operator");
                continue;
            }

            for quorum_id in &quorum_ids {
                let Some(info) = state.operator_state.operators.get(quorum_id).and_then(|ops| ops.get(&operator_id))
                else {
                    continue;
                };
                *signed_stake.entry(*quorum_id).or_default() += info.stake;
                signatures.entry(*quorum_id).or_default().insert(operator_id, signature.clone());
            }
            signer_map.insert(operator_id);
        }

        let mut attestation = QuorumAttestation { signer_map, ..Default::default() };
        for quorum_id in quorum_ids {
            let pubkey =
                state.aggregate_pubkeys.get(&quorum_id).ok_or(AggregationError::MissingAggregatePubkey(quorum_id))?;
            let total = state.operator_state.total_stake(quorum_id).unwrap_or_default();
            let signed = signed_stake.get(&quorum_id).copied().unwrap_or_default();
            let percent_signed = percent(signed, total);
            debug!(component = "SignatureAggregator", quorum_id, percent_signed, "Quorum tallied");

            attestation.quorum_agg_pubkey.insert(quorum_id, *pubkey);
            attestation.quorum_results.insert(quorum_id, QuorumResult { quorum_id, percent_signed });
            attestation
                .signer_signatures
                .insert(quorum_id, signatures.remove(&quorum_id).unwrap_or_default().into_values().collect());
        }
        Ok(attestation)
    }

    fn aggregate_signatures(
        &self,
        state: &IndexedOperatorState,
        attestation: &QuorumAttestation,
        quorum_ids: &[QuorumId],
    ) -> Result<SignatureAggregation, AggregationError> {
        let mut aggregation = SignatureAggregation::default();
        let mut non_signers = BTreeMap::new();
        let mut signatures = Vec::new();

        for quorum_id in quorum_ids {
            let result =
                attestation.quorum_results.get(quorum_id).ok_or(AggregationError::UnknownQuorum(*quorum_id))?;
            let pubkey =
                attestation.quorum_agg_pubkey.get(quorum_id).ok_or(AggregationError::MissingAggregatePubkey(*quorum_id))?;
            aggregation.quorum_results.insert(*quorum_id, *result);
            aggregation.quorum_agg_pubkeys.insert(*quorum_id, *pubkey);
            signatures.extend(attestation.signer_signatures.get(quorum_id).into_iter().flatten());

            for operator_id in state.operator_state.operators.get(quorum_id).into_iter().flat_map(|ops| ops.keys()) {
                if attestation.signer_map.contains(operator_id) {
                    continue;
                }
                if let Some(info) = state.indexed_operators.get(operator_id) {
                    non_signers.insert(info.pubkey_g1.hash(), info.pubkey_g1);
                }
            }
        }

        if signatures.is_empty() {
            return Err(AggregationError::NoSignatures(quorum_ids.to_vec()));
        }
        // operators in several quorums contribute their signature once
        aggregation.agg_signature = Signature::aggregate(signatures.into_iter().unique());
        aggregation.non_signers = non_signers.into_values().collect();
        Ok(aggregation)
    }
}

#[cfg(test)]
mod tests {
    use alloy::primitives::Bytes;
    use assert_matches::assert_matches;
    use rstest::rstest;

    use super::*;
    use crate::types::encoding::G1Point;
    use crate::types::operator::{IndexedOperatorInfo, OperatorInfo};

    /// Operators 1 and 2 in quorum 0 (stake 1 and 3), operator 2 alone in quorum 1.
    fn state() -> IndexedOperatorState {
        let mut state = IndexedOperatorState::default();
        for (n, stakes) in [(1u8, vec![(0u8, 1u64)]), (2, vec![(0, 3), (1, 5)])] {
            let pubkey = G1Point::new(U256::from(n), U256::from(n));
            let id = pubkey.hash();
            state.indexed_operators.insert(id, IndexedOperatorInfo { pubkey_g1: pubkey, ..Default::default() });
            for (quorum_id, stake) in stakes {
                let total = state.operator_state.totals.entry(quorum_id).or_default();
                total.stake += U256::from(stake);
                state.operator_state.operators.entry(quorum_id).or_default().insert(id, OperatorInfo { stake: U256::from(stake), index: 0 });
            }
        }
        state.aggregate_pubkeys.insert(0, G1Point::new(U256::from(10), U256::ZERO));
        state.aggregate_pubkeys.insert(1, G1Point::new(U256::from(11), U256::ZERO));
        state
    }

    fn operator(n: u8) -> B256 {
        G1Point::new(U256::from(n), U256::from(n)).hash()
    }

    async fn attest(state: &IndexedOperatorState, signers: &[u8]) -> QuorumAttestation {
        let message = B256::repeat_byte(0xee);
        let (tx, rx) = mpsc::channel(2);
        for n in [1u8, 2] {
            let signed = signers.contains(&n);
            tx.send(SigningMessage {
                operator: operator(n),
                batch_header_hash: message,
                signature: signed.then(|| Signature(Bytes::from(vec![n]))),
                attestation_latency_ms: 1.0,
                error: (!signed).then(|| "deadline exceeded".to_string()),
            })
            .await
            .unwrap();
        }
        StakeSignatureAggregator.receive_signatures(state, message, rx).await.unwrap()
    }

    #[rstest]
    #[case(&[1, 2], 100, 100)]
    #[case(&[2], 75, 100)]
    #[case(&[1], 25, 0)]
    #[case(&[], 0, 0)]
    #[tokio::test]
    async fn percent_signed_follows_stake(#[case] signers: &[u8], #[case] quorum0: u8, #[case] quorum1: u8) {
        let state = state();
        let attestation = attest(&state, signers).await;
        assert_eq!(attestation.quorum_results[&0].percent_signed, quorum0);
        assert_eq!(attestation.quorum_results[&1].percent_signed, quorum1);
        assert_eq!(attestation.signer_map.len(), signers.len());
    }

    #[rstest]
    #[tokio::test]
    async fn aggregation_lists_non_signers_of_requested_quorums() {
        let state = state();
        let attestation = attest(&state, &[2]).await;

        let aggregation = StakeSignatureAggregator.aggregate_signatures(&state, &attestation, &[1]).unwrap();
        assert!(aggregation.non_signers.is_empty());
        assert_eq!(aggregation.quorum_results.keys().copied().collect::<Vec<_>>(), vec![1]);

        let aggregation = StakeSignatureAggregator.aggregate_signatures(&state, &attestation, &[0, 1]).unwrap();
        assert_eq!(aggregation.non_signers, vec![G1Point::new(U256::from(1), U256::from(1))]);
        assert!(!aggregation.agg_signature.is_empty());
    }

    #[rstest]
    #[tokio::test]
    async fn aggregation_without_signers_fails() {
        let state = state();
        let attestation = attest(&state, &[]).await;
        assert_matches!(
            StakeSignatureAggregator.aggregate_signatures(&state, &attestation, &[0]),
            Err(AggregationError::NoSignatures(_))
        );
        assert_matches!(
            StakeSignatureAggregator.aggregate_signatures(&state, &attestation, &[5]),
            Err(AggregationError::UnknownQuorum(5))
        );
    }
}
