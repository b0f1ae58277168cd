use std::collections::BTreeMap;
use std::sync::Arc;

use alloy::primitives::{keccak256, Bytes, B256, U256};
use serde::{Deserialize, Serialize};

use crate::types::blob::BlobMetadata;
use crate::types::header::{BlobHeader, BlobQuorumInfo};
use crate::types::operator::OperatorId;
use crate::types::QuorumId;

/// Affine point on the G1 curve, kept in its serialized coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct G1Point {
    pub x: U256,
    pub y: U256,
}

impl G1Point {
    pub fn new(x: U256, y: U256) -> Self {
        Self { x, y }
    }

    /// keccak256(X ‖ Y), each coordinate as 32 big-endian bytes. Operator ids are derived this way.
    pub fn hash(&self) -> B256 {
        let mut buf = [0u8; 64];
        buf[..32].copy_from_slice(&self.x.to_be_bytes::<32>());
        buf[32..].copy_from_slice(&self.y.to_be_bytes::<32>());
        keccak256(buf)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct BlobCommitments {
    pub commitment: G1Point,
    pub length_commitment: Bytes,
    pub length_proof: Bytes,
    /// Blob length in symbols.
    pub length: u32,
}

/// Shape of an erasure-coded blob: `num_chunks` chunks of `chunk_length` symbols each.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct EncodingParams {
    pub chunk_length: u64,
    pub num_chunks: u64,
}

/// One erasure-coded frame. The encoder owns its layout.
pub type Chunk = Bytes;

/// Contiguous range of chunk indices assigned to one operator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Assignment {
    pub start_index: u32,
    pub num_chunks: u32,
}

impl Assignment {
    pub fn indices(&self) -> std::ops::Range<usize> {
        self.start_index as usize..(self.start_index + self.num_chunks) as usize
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct AssignmentInfo {
    pub total_chunks: u32,
}

/// Encoding of one blob for one quorum.
#[derive(Debug, Clone)]
pub struct EncodingResult {
    pub blob_metadata: Arc<BlobMetadata>,
    pub reference_block_number: u64,
    pub blob_quorum_info: BlobQuorumInfo,
    pub commitment: BlobCommitments,
    pub chunks: Vec<Chunk>,
    pub assignments: BTreeMap<OperatorId, Assignment>,
}

impl EncodingResult {
    /// Bytes held by the chunks. This is what counts toward the batch size threshold.
    pub fn size(&self) -> u64 {
        self.chunks.iter().map(|chunk| chunk.len() as u64).sum()
    }

    pub fn quorum_id(&self) -> QuorumId {
        self.blob_quorum_info.security_param.quorum_id
    }
}

/// Chunks of one blob for one quorum destined to a single operator.
pub type Bundle = Vec<Chunk>;
pub type Bundles = BTreeMap<QuorumId, Bundle>;

/// A blob whose quorum encodings have been merged per operator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncodedBlob {
    pub blob_header: BlobHeader,
    pub bundles_by_operator: BTreeMap<OperatorId, Bundles>,
}

/// What an operator receives for one blob.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlobMessage {
    pub blob_header: BlobHeader,
    pub bundles: Bundles,
}
