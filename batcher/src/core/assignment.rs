//! Stake-weighted chunk assignment.
//!
//! Every operator of a quorum receives a share of the chunks proportional to its stake, scaled so
//! that any set of operators holding more than `confirmation - adversary` percent of the stake can
//! reconstruct the blob.

use std::collections::BTreeMap;

use alloy::primitives::U256;
use thiserror::Error;

use crate::types::blob::SecurityParam;
use crate::types::encoding::{Assignment, AssignmentInfo, EncodingParams};
use crate::types::header::BlobQuorumInfo;
use crate::types::operator::{OperatorId, OperatorState};
use crate::types::QuorumId;

pub const BYTES_PER_SYMBOL: u64 = 32;
pub const PERCENT_MULTIPLIER: u64 = 100;
/// Largest chunk length, in symbols, an operator will accept.
pub const MAX_CHUNK_LENGTH: u64 = 8192;

#[derive(Error, Debug, PartialEq, Eq)]
pub enum AssignmentError {
    #[error("Quorum {0} not found in operator state")]
    QuorumNotFound(QuorumId),

    #[error("Quorum {0} has no stake")]
    ZeroTotalStake(QuorumId),

    #[error("Invalid security param: confirmation threshold {confirmation} must exceed adversary threshold {adversary}")]
    InvalidSecurityParam { adversary: u8, confirmation: u8 },

    #[error("Invalid chunk length {0}")]
    InvalidChunkLength(u32),

    #[error("Invalid encoding params: {0}")]
    InvalidEncodingParams(String),
}

#[cfg_attr(test, mockall::automock)]
pub trait AssignmentCoordinator: Send + Sync {
    /// Chunk ranges of every operator in the quorum, and the total number of chunks.
    fn get_assignments(
        &self,
        state: &OperatorState,
        blob_length: u64,
        info: &BlobQuorumInfo,
    ) -> Result<(BTreeMap<OperatorId, Assignment>, AssignmentInfo), AssignmentError>;

    /// Largest valid chunk length for the blob. With a non-zero `target_num_chunks` the search
    /// stops at the first length whose total chunk count fits in the target.
    fn calculate_chunk_length(
        &self,
        state: &OperatorState,
        blob_length: u64,
        target_num_chunks: u64,
        param: &SecurityParam,
    ) -> Result<u64, AssignmentError>;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct StdAssignmentCoordinator;

impl StdAssignmentCoordinator {
    fn num_chunks(
        blob_length: u64,
        chunk_length: u64,
        stake: U256,
        total_stake: U256,
        param: &SecurityParam,
    ) -> Result<u32, AssignmentError> {
        let gap = threshold_gap(param)?;
        let numerator = U256::from(blob_length) * U256::from(PERCENT_MULTIPLIER) * stake;
        let denominator = U256::from(gap) * U256::from(chunk_length) * total_stake;
        let chunks = numerator.div_ceil(denominator);
        Ok(u32::try_from(chunks).unwrap_or(u32::MAX))
    }

    fn is_valid_chunk_length(blob_length: u64, chunk_length: u64) -> bool {
        chunk_length.is_power_of_two() && chunk_length <= blob_length && chunk_length <= MAX_CHUNK_LENGTH
    }
}

impl AssignmentCoordinator for StdAssignmentCoordinator {
    fn get_assignments(
        &self,
        state: &OperatorState,
        blob_length: u64,
        info: &BlobQuorumInfo,
    ) -> Result<(BTreeMap<OperatorId, Assignment>, AssignmentInfo), AssignmentError> {
        let quorum_id = info.quorum_id();
        let operators = state.operators.get(&quorum_id).ok_or(AssignmentError::QuorumNotFound(quorum_id))?;
        let total_stake = state.total_stake(quorum_id).ok_or(AssignmentError::QuorumNotFound(quorum_id))?;
        if total_stake.is_zero() {
            return Err(AssignmentError::ZeroTotalStake(quorum_id));
        }
        if info.chunk_length == 0 {
            return Err(AssignmentError::InvalidChunkLength(info.chunk_length));
        }

        // Chunks are laid out contiguously in operator index order.
        let mut ordered: Vec<_> = operators.iter().collect();
        ordered.sort_by_key(|(_, operator)| operator.index);

        let mut assignments = BTreeMap::new();
        let mut next_index = 0u32;
        for (operator_id, operator) in ordered {
            let num_chunks = Self::num_chunks(
                blob_length,
                info.chunk_length as u64,
                operator.stake,
                total_stake,
                &info.security_param,
            )?;
            assignments.insert(*operator_id, Assignment { start_index: next_index, num_chunks });
            next_index = next_index.saturating_add(num_chunks);
        }

        Ok((assignments, AssignmentInfo { total_chunks: next_index }))
    }

    fn calculate_chunk_length(
        &self,
        state: &OperatorState,
        blob_length: u64,
        target_num_chunks: u64,
        param: &SecurityParam,
    ) -> Result<u64, AssignmentError> {
        threshold_gap(param)?;

        let mut chunk_length = 1u64;
        loop {
            let doubled = chunk_length * 2;
            if !Self::is_valid_chunk_length(blob_length, doubled) {
                return Ok(chunk_length);
            }
            if target_num_chunks != 0 {
                let info = BlobQuorumInfo { security_param: *param, chunk_length: doubled as u32 };
                let (_, assignment_info) = self.get_assignments(state, blob_length, &info)?;
                if assignment_info.total_chunks as u64 <= target_num_chunks {
                    return Ok(doubled);
                }
            }
            chunk_length = doubled;
        }
    }
}

fn threshold_gap(param: &SecurityParam) -> Result<u8, AssignmentError> {
    match param.confirmation_threshold.checked_sub(param.adversary_threshold) {
        Some(gap) if gap > 0 => Ok(gap),
        _ => Err(AssignmentError::InvalidSecurityParam {
            adversary: param.adversary_threshold,
            confirmation: param.confirmation_threshold,
        }),
    }
}

/// Blob length in symbols.
pub fn get_blob_length(blob_size: u64) -> u64 {
    blob_size.div_ceil(BYTES_PER_SYMBOL)
}

/// Rounds both minimums up to powers of two.
pub fn params_from_mins(min_chunk_length: u64, min_num_chunks: u64) -> EncodingParams {
    EncodingParams {
        chunk_length: min_chunk_length.max(1).next_power_of_two(),
        num_chunks: min_num_chunks.max(1).next_power_of_two(),
    }
}

pub fn validate_encoding_params(
    params: &EncodingParams,
    blob_length: u64,
    srs_order: u64,
) -> Result<(), AssignmentError> {
    let capacity = params.chunk_length.saturating_mul(params.num_chunks);
    if capacity > srs_order {
        return Err(AssignmentError::InvalidEncodingParams(format!(
            "{} chunks of length {} exceed the SRS order {}",
            params.num_chunks, params.chunk_length, srs_order
        )));
    }
    if capacity < blob_length {
        return Err(AssignmentError::InvalidEncodingParams(format!(
            "{} chunks of length {} cannot hold a blob of {} symbols",
            params.num_chunks, params.chunk_length, blob_length
        )));
    }
    Ok(())
}
