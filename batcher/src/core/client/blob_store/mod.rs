pub mod error;
pub mod memory;

use std::collections::HashMap;

use alloy::primitives::B256;
use async_trait::async_trait;
pub use error::BlobStoreError;

use crate::types::blob::{Blob, BlobKey, BlobMetadata, BlobStatus, ConfirmationInfo};

/// Pagination cursor for status queries. Results are ordered by `(requested_at, blob_key)` and
/// the next page starts strictly after this position.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub struct BlobStoreExclusiveStartKey {
    pub requested_at: u64,
    pub blob_key: BlobKey,
}

/// Owner of blob content and metadata. Every status change goes through this trait and is
/// checked against the blob state machine.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait BlobStore: Send + Sync {
    /// Stores a new blob in `Processing` and returns its key.
    async fn store_blob(&self, blob: Blob, requested_at: u64) -> Result<BlobKey, BlobStoreError>;

    async fn get_blob_content(&self, blob_hash: &str) -> Result<Vec<u8>, BlobStoreError>;

    async fn get_blobs_by_metadata(
        &self,
        metadata: &[BlobMetadata],
    ) -> Result<HashMap<BlobKey, Blob>, BlobStoreError>;

    async fn get_blob_metadata(&self, key: &BlobKey) -> Result<BlobMetadata, BlobStoreError>;

    async fn get_bulk_blob_metadata(&self, keys: &[BlobKey]) -> Result<Vec<BlobMetadata>, BlobStoreError>;

    async fn get_blob_metadata_by_status(&self, status: BlobStatus) -> Result<Vec<BlobMetadata>, BlobStoreError>;

    /// Returns at most `limit` blobs with `status`, and the cursor of the last one when the page is full.
    async fn get_blob_metadata_by_status_with_pagination(
        &self,
        status: BlobStatus,
        limit: usize,
        exclusive_start_key: Option<BlobStoreExclusiveStartKey>,
    ) -> Result<(Vec<BlobMetadata>, Option<BlobStoreExclusiveStartKey>), BlobStoreError>;

    async fn get_metadata_in_batch(
        &self,
        batch_header_hash: B256,
        blob_index: u32,
    ) -> Result<BlobMetadata, BlobStoreError>;

    async fn get_all_blob_metadata_by_batch(&self, batch_header_hash: B256)
        -> Result<Vec<BlobMetadata>, BlobStoreError>;

    async fn mark_blob_processing(&self, key: &BlobKey) -> Result<(), BlobStoreError>;

    async fn mark_blob_dispersing(&self, key: &BlobKey) -> Result<(), BlobStoreError>;

    /// Idempotent: a blob that is already confirmed is returned unchanged.
    async fn mark_blob_confirmed(
        &self,
        metadata: &BlobMetadata,
        confirmation_info: ConfirmationInfo,
    ) -> Result<BlobMetadata, BlobStoreError>;

    async fn mark_blob_insufficient_signatures(
        &self,
        metadata: &BlobMetadata,
        confirmation_info: ConfirmationInfo,
    ) -> Result<BlobMetadata, BlobStoreError>;

    async fn mark_blob_finalized(&self, key: &BlobKey) -> Result<(), BlobStoreError>;

    async fn mark_blob_failed(&self, key: &BlobKey) -> Result<(), BlobStoreError>;

    async fn increment_blob_retry_count(&self, metadata: &BlobMetadata) -> Result<(), BlobStoreError>;

    async fn update_confirmation_block_number(
        &self,
        metadata: &BlobMetadata,
        confirmation_block_number: u32,
    ) -> Result<(), BlobStoreError>;

    /// Requeues the blob while it has retries left, otherwise marks it failed.
    /// Returns whether the blob was requeued.
    async fn handle_blob_failure(&self, metadata: &BlobMetadata, max_retries: u32) -> Result<bool, BlobStoreError>;
}
