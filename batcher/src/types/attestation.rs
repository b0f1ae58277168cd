use std::collections::{BTreeMap, BTreeSet};

use alloy::primitives::{Bytes, B256};
use serde::{Deserialize, Serialize};

use crate::types::encoding::G1Point;
use crate::types::operator::OperatorId;
use crate::types::QuorumId;

/// Serialized BLS signature as returned by an operator.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct Signature(pub Bytes);

impl Signature {
    /// Joins signature sets in the given order. Combining them on the curve is left to the verifier.
    pub fn aggregate<'a>(signatures: impl IntoIterator<Item = &'a Signature>) -> Signature {
        let joined: Vec<u8> = signatures.into_iter().flat_map(|sig| sig.0.iter().copied()).collect();
        Signature(Bytes::from(joined))
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

/// Reply of one operator to an attestation request.
#[derive(Debug, Clone)]
pub struct SigningMessage {
    pub operator: OperatorId,
    pub batch_header_hash: B256,
    pub signature: Option<Signature>,
    pub attestation_latency_ms: f64,
    pub error: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuorumResult {
    pub quorum_id: QuorumId,
    pub percent_signed: u8,
}

/// Signatures collected for a batch, tallied per quorum.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct QuorumAttestation {
    /// On-chain aggregate key of every operator of the quorum, signers or not.
    pub quorum_agg_pubkey: BTreeMap<QuorumId, G1Point>,
    /// Signatures of the quorum's signers, in operator id order.
    pub signer_signatures: BTreeMap<QuorumId, Vec<Signature>>,
    pub quorum_results: BTreeMap<QuorumId, QuorumResult>,
    pub signer_map: BTreeSet<OperatorId>,
}

/// Attestation reduced to the quorums that go on chain.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SignatureAggregation {
    /// Public keys of operators that did not sign, sorted by key hash.
    pub non_signers: Vec<G1Point>,
    pub quorum_agg_pubkeys: BTreeMap<QuorumId, G1Point>,
    pub agg_signature: Signature,
    pub quorum_results: BTreeMap<QuorumId, QuorumResult>,
}
