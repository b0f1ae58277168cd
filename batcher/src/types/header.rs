use alloy::primitives::{keccak256, B256};
use alloy::sol_types::SolValue;
use serde::{Deserialize, Serialize};

use crate::core::merkle::{MerkleError, MerkleTree};
use crate::types::blob::SecurityParam;
use crate::types::encoding::BlobCommitments;
use crate::types::QuorumId;

mod abi {
    alloy::sol! {
        struct G1Point {
            uint256 X;
            uint256 Y;
        }

        struct QuorumBlobParam {
            uint8 quorumNumber;
            uint8 adversaryThresholdPercentage;
            uint8 confirmationThresholdPercentage;
            uint32 chunkLength;
        }

        struct BlobHeader {
            G1Point commitment;
            uint32 dataLength;
            QuorumBlobParam[] quorumBlobParams;
        }

        struct ReducedBatchHeader {
            bytes32 blobHeadersRoot;
            uint32 referenceBlockNumber;
        }
    }
}

/// Per-quorum parameters of a blob: its security thresholds and the chunk length chosen for it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct BlobQuorumInfo {
    pub security_param: SecurityParam,
    pub chunk_length: u32,
}

impl BlobQuorumInfo {
    pub fn quorum_id(&self) -> QuorumId {
        self.security_param.quorum_id
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct BlobHeader {
    pub commitments: BlobCommitments,
    pub quorum_infos: Vec<BlobQuorumInfo>,
    pub account_id: String,
}

impl BlobHeader {
    /// keccak256 of the ABI encoding of `(G1Point commitment, uint32 dataLength, QuorumBlobParam[])`,
    /// matching the on-chain blob header hash.
    pub fn hash(&self) -> B256 {
        let header = abi::BlobHeader {
            commitment: abi::G1Point { X: self.commitments.commitment.x, Y: self.commitments.commitment.y },
            dataLength: self.commitments.length,
            quorumBlobParams: self
                .quorum_infos
                .iter()
                .map(|info| abi::QuorumBlobParam {
                    quorumNumber: info.security_param.quorum_id,
                    adversaryThresholdPercentage: info.security_param.adversary_threshold,
                    confirmationThresholdPercentage: info.security_param.confirmation_threshold,
                    chunkLength: info.chunk_length,
                })
                .collect(),
        };
        keccak256(header.abi_encode())
    }

    pub fn quorum_ids(&self) -> impl Iterator<Item = QuorumId> + '_ {
        self.quorum_infos.iter().map(BlobQuorumInfo::quorum_id)
    }

    pub fn quorum_info(&self, quorum_id: QuorumId) -> Option<&BlobQuorumInfo> {
        self.quorum_infos.iter().find(|info| info.quorum_id() == quorum_id)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct BatchHeader {
    pub reference_block_number: u64,
    pub batch_root: B256,
}

impl BatchHeader {
    pub fn new(reference_block_number: u64) -> Self {
        Self { reference_block_number, batch_root: B256::ZERO }
    }

    /// keccak256 of `abi.encode(bytes32 blobHeadersRoot, uint32 referenceBlockNumber)`.
    pub fn hash(&self) -> B256 {
        keccak256(self.reduced().abi_encode())
    }

    /// Builds the Merkle tree over the blob header hashes and stores its root.
    pub fn set_batch_root(&mut self, blob_headers: &[BlobHeader]) -> Result<MerkleTree, MerkleError> {
        let leaves: Vec<B256> = blob_headers.iter().map(BlobHeader::hash).collect();
        self.set_batch_root_from_hashes(&leaves)
    }

    pub fn set_batch_root_from_hashes(&mut self, blob_header_hashes: &[B256]) -> Result<MerkleTree, MerkleError> {
        let tree = MerkleTree::new(blob_header_hashes)?;
        self.batch_root = tree.root();
        Ok(tree)
    }

    fn reduced(&self) -> abi::ReducedBatchHeader {
        abi::ReducedBatchHeader {
            blobHeadersRoot: self.batch_root,
            referenceBlockNumber: self.reference_block_number as u32,
        }
    }
}
