pub mod attestation;
pub mod batch;
pub mod blob;
pub mod encoding;
pub mod header;
pub mod operator;

/// Identifier of a quorum. At most 255 quorums exist.
pub type QuorumId = u8;
