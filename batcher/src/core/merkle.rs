//! Binary keccak256 Merkle tree over blob header hashes.
//!
//! Leaves are `keccak256(data)`; the leaf layer is padded with zero hashes up to the next power
//! of two and each parent is `keccak256(left ‖ right)`. A proof is the concatenation of the
//! sibling hashes from the leaf up to the root, which is what the on-chain verifier consumes.

use alloy::primitives::{keccak256, B256};
use thiserror::Error;

#[derive(Error, Debug, PartialEq, Eq)]
pub enum MerkleError {
    #[error("Cannot build a Merkle tree without leaves")]
    Empty,

    #[error("Leaf index {index} out of range for {num_leaves} leaves")]
    IndexOutOfRange { index: usize, num_leaves: usize },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MerkleTree {
    /// `layers[0]` holds the padded leaves, the last layer holds the root.
    layers: Vec<Vec<B256>>,
    num_leaves: usize,
}

impl MerkleTree {
    pub fn new(data: &[B256]) -> Result<Self, MerkleError> {
        if data.is_empty() {
            return Err(MerkleError::Empty);
        }

        let width = data.len().next_power_of_two();
        let mut leaves: Vec<B256> = data.iter().map(|item| keccak256(item)).collect();
        leaves.resize(width, B256::ZERO);

        let mut layers = vec![leaves];
        while let Some(current) = layers.last().filter(|layer| layer.len() > 1) {
            let parents: Vec<B256> = current.chunks(2).map(|pair| hash_pair(&pair[0], &pair[1])).collect();
            layers.push(parents);
        }

        Ok(Self { layers, num_leaves: data.len() })
    }

    pub fn root(&self) -> B256 {
        // `new` never produces an empty layer list.
        self.layers.last().and_then(|layer| layer.first()).copied().unwrap_or_default()
    }

    pub fn num_leaves(&self) -> usize {
        self.num_leaves
    }

    pub fn generate_proof(&self, index: usize) -> Result<Vec<u8>, MerkleError> {
        if index >= self.num_leaves {
            return Err(MerkleError::IndexOutOfRange { index, num_leaves: self.num_leaves });
        }

        let mut proof = Vec::with_capacity(32 * (self.layers.len() - 1));
        let mut position = index;
        for layer in &self.layers[..self.layers.len() - 1] {
            proof.extend_from_slice(layer[position ^ 1].as_slice());
            position /= 2;
        }
        Ok(proof)
    }

    /// Recomputes the root from `data` at `index` and the concatenated sibling hashes.
    pub fn verify_proof(root: B256, data: B256, index: usize, proof: &[u8]) -> bool {
        if proof.len() % 32 != 0 {
            return false;
        }
        let mut node = keccak256(data);
        let mut position = index;
        for sibling in proof.chunks(32) {
            let sibling = B256::from_slice(sibling);
            node = if position % 2 == 0 { hash_pair(&node, &sibling) } else { hash_pair(&sibling, &node) };
            position /= 2;
        }
        node == root
    }
}

fn hash_pair(left: &B256, right: &B256) -> B256 {
    let mut buf = [0u8; 64];
    buf[..32].copy_from_slice(left.as_slice());
    buf[32..].copy_from_slice(right.as_slice());
    keccak256(buf)
}
