use thiserror::Error;

use crate::types::blob::{BlobKey, BlobStatus, MissingConfirmationInfo};

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum BlobStoreError {
    #[error("Blob not found: {0}")]
    BlobNotFound(String),

    #[error("Illegal status transition for blob {key}: {from} -> {to}")]
    IllegalTransition { key: BlobKey, from: BlobStatus, to: BlobStatus },

    #[error("Blob {0} has no confirmation info")]
    MissingConfirmationInfo(BlobKey),

    #[error("Blob store backend error: {0}")]
    Backend(String),
}

impl From<MissingConfirmationInfo> for BlobStoreError {
    fn from(err: MissingConfirmationInfo) -> Self {
        BlobStoreError::MissingConfirmationInfo(err.0)
    }
}
