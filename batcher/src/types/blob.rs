use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use alloy::primitives::B256;
use serde::{Deserialize, Serialize};
use strum_macros::Display;

use crate::types::attestation::QuorumResult;
use crate::types::encoding::BlobCommitments;
use crate::types::header::BlobQuorumInfo;
use crate::types::QuorumId;

/// Identifies a stored blob: the hash of its content and the hash of its request metadata.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct BlobKey {
    pub blob_hash: String,
    pub metadata_hash: String,
}

impl BlobKey {
    pub fn new(blob_hash: impl Into<String>, metadata_hash: impl Into<String>) -> Self {
        Self { blob_hash: blob_hash.into(), metadata_hash: metadata_hash.into() }
    }
}

impl fmt::Display for BlobKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.blob_hash, self.metadata_hash)
    }
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
#[error("Invalid blob key: {0}")]
pub struct ParseBlobKeyError(pub String);

impl FromStr for BlobKey {
    type Err = ParseBlobKeyError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.split_once('-') {
            Some((blob_hash, metadata_hash)) if !blob_hash.is_empty() && !metadata_hash.is_empty() => {
                Ok(Self::new(blob_hash, metadata_hash))
            }
            _ => Err(ParseBlobKeyError(s.to_string())),
        }
    }
}

/// Lifecycle of a blob. The integer codes are persisted and must not change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display)]
#[repr(u8)]
pub enum BlobStatus {
    Processing = 0,
    Confirmed = 1,
    Failed = 2,
    Finalized = 3,
    InsufficientSignatures = 4,
    Dispersing = 5,
}

impl BlobStatus {
    pub fn code(self) -> u8 {
        self as u8
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, BlobStatus::Finalized | BlobStatus::Failed)
    }

    /// Transitions allowed by the blob state machine. Re-entering `Processing` from `Dispersing` is
    /// the retry path.
    pub fn can_transition_to(self, next: BlobStatus) -> bool {
        use BlobStatus::*;
        if self == next {
            return !self.is_terminal();
        }
        matches!(
            (self, next),
            (Processing, Dispersing)
                | (Processing, Failed)
                | (Dispersing, Processing)
                | (Dispersing, Confirmed)
                | (Dispersing, InsufficientSignatures)
                | (Dispersing, Failed)
                | (Confirmed, Finalized)
                | (Confirmed, Failed)
                | (InsufficientSignatures, Finalized)
        )
    }
}

impl TryFrom<u8> for BlobStatus {
    type Error = u8;

    fn try_from(code: u8) -> Result<Self, Self::Error> {
        Ok(match code {
            0 => BlobStatus::Processing,
            1 => BlobStatus::Confirmed,
            2 => BlobStatus::Failed,
            3 => BlobStatus::Finalized,
            4 => BlobStatus::InsufficientSignatures,
            5 => BlobStatus::Dispersing,
            other => return Err(other),
        })
    }
}

/// Security requirement of a blob for one quorum.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SecurityParam {
    pub quorum_id: QuorumId,
    /// Maximum share of stake (percent) an adversary may control.
    pub adversary_threshold: u8,
    /// Share of stake (percent) that must sign for the blob to count as attested.
    pub confirmation_threshold: u8,
    pub quorum_rate: u32,
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum SecurityParamError {
    #[error("Confirmation threshold {0} exceeds 100")]
    ConfirmationAbove100(u8),
    #[error("Adversary threshold equals 0")]
    ZeroAdversary,
    #[error("Confirmation threshold must be >= 10 + adversary threshold")]
    GapTooSmall,
}

impl SecurityParam {
    pub fn validate(&self) -> Result<(), SecurityParamError> {
        if self.confirmation_threshold > 100 {
            return Err(SecurityParamError::ConfirmationAbove100(self.confirmation_threshold));
        }
        if self.adversary_threshold == 0 {
            return Err(SecurityParamError::ZeroAdversary);
        }
        if self.confirmation_threshold < self.adversary_threshold
            || self.confirmation_threshold - self.adversary_threshold < 10
        {
            return Err(SecurityParamError::GapTooSmall);
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct BlobRequestHeader {
    pub account_id: String,
    pub security_params: Vec<SecurityParam>,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct RequestMetadata {
    pub request_header: BlobRequestHeader,
    pub blob_size: u64,
    /// Unix time in nanoseconds.
    pub requested_at: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Blob {
    pub request_header: BlobRequestHeader,
    pub data: Vec<u8>,
}

/// Attestation outcome attached to a blob once its batch is confirmed on chain.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConfirmationInfo {
    pub batch_header_hash: B256,
    pub blob_index: u32,
    pub blob_count: u32,
    pub signatory_record_hash: B256,
    pub reference_block_number: u32,
    pub batch_root: B256,
    pub blob_inclusion_proof: Vec<u8>,
    pub blob_commitment: BlobCommitments,
    pub batch_id: u32,
    pub confirmation_txn_hash: B256,
    pub confirmation_block_number: u32,
    pub fee: Vec<u8>,
    pub quorum_results: BTreeMap<QuorumId, QuorumResult>,
    pub blob_quorum_infos: Vec<BlobQuorumInfo>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlobMetadata {
    pub blob_hash: String,
    pub metadata_hash: String,
    pub blob_status: BlobStatus,
    /// Unix time in seconds after which the blob may be dropped.
    pub expiry: u64,
    pub num_retries: u32,
    pub request_metadata: RequestMetadata,
    pub confirmation_info: Option<ConfirmationInfo>,
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
#[error("Blob {0} is {1} but has no confirmation info")]
pub struct MissingConfirmationInfo(pub BlobKey, pub BlobStatus);

impl BlobMetadata {
    pub fn key(&self) -> BlobKey {
        BlobKey::new(self.blob_hash.clone(), self.metadata_hash.clone())
    }

    pub fn security_params(&self) -> &[SecurityParam] {
        &self.request_metadata.request_header.security_params
    }

    pub fn quorum_ids(&self) -> impl Iterator<Item = QuorumId> + '_ {
        self.security_params().iter().map(|param| param.quorum_id)
    }

    pub fn is_confirmed(&self) -> Result<bool, MissingConfirmationInfo> {
        match self.blob_status {
            BlobStatus::Confirmed | BlobStatus::Finalized => {
                if self.confirmation_info.is_none() {
                    return Err(MissingConfirmationInfo(self.key(), self.blob_status));
                }
                Ok(true)
            }
            _ => Ok(false),
        }
    }
}

#[cfg(test)]
mod tests {
    use rstest::rstest;

    use super::*;

    #[test]
    fn blob_key_round_trips_through_string() {
        let key = BlobKey::new("abc", "def");
        assert_eq!(key.to_string(), "abc-def");
        assert_eq!("abc-def".parse::<BlobKey>(), Ok(key));
        assert!("abcdef".parse::<BlobKey>().is_err());
    }

    #[rstest]
    #[case(30, 80, true)]
    #[case(0, 50, false)]
    #[case(30, 101, false)]
    #[case(75, 80, false)]
    #[case(90, 100, true)]
    fn security_param_validation(#[case] adversary: u8, #[case] confirmation: u8, #[case] valid: bool) {
        let param = SecurityParam {
            quorum_id: 0,
            adversary_threshold: adversary,
            confirmation_threshold: confirmation,
            quorum_rate: 0,
        };
        assert_eq!(param.validate().is_ok(), valid);
    }

    #[rstest]
    #[case(BlobStatus::Processing, BlobStatus::Dispersing, true)]
    #[case(BlobStatus::Dispersing, BlobStatus::Processing, true)]
    #[case(BlobStatus::Confirmed, BlobStatus::Finalized, true)]
    #[case(BlobStatus::Finalized, BlobStatus::Processing, false)]
    #[case(BlobStatus::Failed, BlobStatus::Processing, false)]
    #[case(BlobStatus::Failed, BlobStatus::Failed, false)]
    #[case(BlobStatus::Processing, BlobStatus::Confirmed, false)]
    fn status_transitions(#[case] from: BlobStatus, #[case] to: BlobStatus, #[case] allowed: bool) {
        assert_eq!(from.can_transition_to(to), allowed);
    }

    #[test]
    fn status_codes_are_stable() {
        for code in 0u8..=5 {
            let status = BlobStatus::try_from(code).unwrap();
            assert_eq!(status.code(), code);
        }
        assert_eq!(BlobStatus::try_from(6), Err(6));
    }
}
