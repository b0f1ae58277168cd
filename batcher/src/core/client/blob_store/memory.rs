use std::collections::{BTreeMap, HashMap};

use alloy::hex;
use alloy::primitives::{keccak256, B256};
use async_trait::async_trait;
use tokio::sync::RwLock;
use tracing::debug;

use super::{BlobStore, BlobStoreError, BlobStoreExclusiveStartKey};
use crate::types::blob::{Blob, BlobKey, BlobMetadata, BlobStatus, ConfirmationInfo, RequestMetadata, SecurityParam};

/// Blobs expire an hour after they were requested.
const BLOB_TTL_SECS: u64 = 3600;

#[derive(Default)]
struct Inner {
    blobs: HashMap<String, Vec<u8>>,
    metadata: BTreeMap<BlobKey, BlobMetadata>,
    history: HashMap<BlobKey, Vec<BlobStatus>>,
}

impl Inner {
    fn get_mut(&mut self, key: &BlobKey) -> Result<&mut BlobMetadata, BlobStoreError> {
        self.metadata.get_mut(key).ok_or_else(|| BlobStoreError::BlobNotFound(key.to_string()))
    }

    fn transition(&mut self, key: &BlobKey, to: BlobStatus) -> Result<&mut BlobMetadata, BlobStoreError> {
        let from = self.get_mut(key)?.blob_status;
        if !from.can_transition_to(to) {
            return Err(BlobStoreError::IllegalTransition { key: key.clone(), from, to });
        }
        if from != to {
            self.history.entry(key.clone()).or_default().push(to);
        }
        let metadata = self.get_mut(key)?;
        metadata.blob_status = to;
        Ok(metadata)
    }
}

/// Process-local `BlobStore`. Used by the binary when no external store is configured and by tests.
#[derive(Default)]
pub struct InMemoryBlobStore {
    inner: RwLock<Inner>,
}

impl InMemoryBlobStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every status the blob has been in, oldest first.
    pub async fn status_history(&self, key: &BlobKey) -> Vec<BlobStatus> {
        self.inner.read().await.history.get(key).cloned().unwrap_or_default()
    }

    /// Overwrites stored metadata as is, bypassing transition checks.
    pub async fn insert_metadata(&self, metadata: BlobMetadata) {
        let mut inner = self.inner.write().await;
        let key = metadata.key();
        inner.history.entry(key.clone()).or_default().push(metadata.blob_status);
        inner.metadata.insert(key, metadata);
    }
}

fn metadata_hash(requested_at: u64, security_params: &[SecurityParam]) -> String {
    let mut preimage = format!("{requested_at}/");
    for param in security_params {
        preimage.push_str(&format!("{}/{}/", param.quorum_id, param.adversary_threshold));
    }
    hex::encode(keccak256(preimage.as_bytes()))
}

#[async_trait]
impl BlobStore for InMemoryBlobStore {
    async fn store_blob(&self, blob: Blob, requested_at: u64) -> Result<BlobKey, BlobStoreError> {
        let blob_hash = hex::encode(keccak256(&blob.data));
        let key = BlobKey::new(blob_hash.clone(), metadata_hash(requested_at, &blob.request_header.security_params));

        let metadata = BlobMetadata {
            blob_hash: blob_hash.clone(),
            metadata_hash: key.metadata_hash.clone(),
            blob_status: BlobStatus::Processing,
            expiry: requested_at / 1_000_000_000 + BLOB_TTL_SECS,
            num_retries: 0,
            request_metadata: RequestMetadata {
                request_header: blob.request_header,
                blob_size: blob.data.len() as u64,
                requested_at,
            },
            confirmation_info: None,
        };

        let mut inner = self.inner.write().await;
        inner.blobs.insert(blob_hash, blob.data);
        inner.history.insert(key.clone(), vec![BlobStatus::Processing]);
        inner.metadata.insert(key.clone(), metadata);
        debug!(blob_key = %key, "Blob stored");
        Ok(key)
    }

    async fn get_blob_content(&self, blob_hash: &str) -> Result<Vec<u8>, BlobStoreError> {
        self.inner
            .read()
            .await
            .blobs
            .get(blob_hash)
            .cloned()
            .ok_or_else(|| BlobStoreError::BlobNotFound(blob_hash.to_string()))
    }

    async fn get_blobs_by_metadata(
        &self,
        metadata: &[BlobMetadata],
    ) -> Result<HashMap<BlobKey, Blob>, BlobStoreError> {
        let inner = self.inner.read().await;
        metadata
            .iter()
            .map(|meta| {
                let data =
                    inner.blobs.get(&meta.blob_hash).ok_or_else(|| BlobStoreError::BlobNotFound(meta.key().to_string()))?;
                Ok((
                    meta.key(),
                    Blob { request_header: meta.request_metadata.request_header.clone(), data: data.clone() },
                ))
            })
            .collect()
    }

    async fn get_blob_metadata(&self, key: &BlobKey) -> Result<BlobMetadata, BlobStoreError> {
        self.inner.read().await.metadata.get(key).cloned().ok_or_else(|| BlobStoreError::BlobNotFound(key.to_string()))
    }

    async fn get_bulk_blob_metadata(&self, keys: &[BlobKey]) -> Result<Vec<BlobMetadata>, BlobStoreError> {
        let inner = self.inner.read().await;
        keys.iter()
            .map(|key| inner.metadata.get(key).cloned().ok_or_else(|| BlobStoreError::BlobNotFound(key.to_string())))
            .collect()
    }

    async fn get_blob_metadata_by_status(&self, status: BlobStatus) -> Result<Vec<BlobMetadata>, BlobStoreError> {
        let inner = self.inner.read().await;
        Ok(inner.metadata.values().filter(|meta| meta.blob_status == status).cloned().collect())
    }

    async fn get_blob_metadata_by_status_with_pagination(
        &self,
        status: BlobStatus,
        limit: usize,
        exclusive_start_key: Option<BlobStoreExclusiveStartKey>,
    ) -> Result<(Vec<BlobMetadata>, Option<BlobStoreExclusiveStartKey>), BlobStoreError> {
        let inner = self.inner.read().await;
        let mut candidates: Vec<(BlobStoreExclusiveStartKey, &BlobMetadata)> = inner
            .metadata
            .values()
            .filter(|meta| meta.blob_status == status)
            .map(|meta| {
                (
                    BlobStoreExclusiveStartKey { requested_at: meta.request_metadata.requested_at, blob_key: meta.key() },
                    meta,
                )
            })
            .filter(|(cursor, _)| exclusive_start_key.as_ref().map_or(true, |start| cursor > start))
            .collect();
        candidates.sort_by(|a, b| a.0.cmp(&b.0));

        if limit == 0 || candidates.len() < limit {
            return Ok((candidates.into_iter().map(|(_, meta)| meta.clone()).collect(), None));
        }

        candidates.truncate(limit);
        let next = candidates.last().map(|(cursor, _)| cursor.clone());
        Ok((candidates.into_iter().map(|(_, meta)| meta.clone()).collect(), next))
    }

    async fn get_metadata_in_batch(
        &self,
        batch_header_hash: B256,
        blob_index: u32,
    ) -> Result<BlobMetadata, BlobStoreError> {
        let inner = self.inner.read().await;
        inner
            .metadata
            .values()
            .find(|meta| {
                meta.confirmation_info
                    .as_ref()
                    .is_some_and(|info| info.batch_header_hash == batch_header_hash && info.blob_index == blob_index)
            })
            .cloned()
            .ok_or_else(|| BlobStoreError::BlobNotFound(format!("{batch_header_hash}/{blob_index}")))
    }

    async fn get_all_blob_metadata_by_batch(
        &self,
        batch_header_hash: B256,
    ) -> Result<Vec<BlobMetadata>, BlobStoreError> {
        let inner = self.inner.read().await;
        let mut metas: Vec<BlobMetadata> = inner
            .metadata
            .values()
            .filter(|meta| {
                meta.confirmation_info.as_ref().is_some_and(|info| info.batch_header_hash == batch_header_hash)
            })
            .cloned()
            .collect();
        metas.sort_by_key(|meta| meta.confirmation_info.as_ref().map(|info| info.blob_index));
        Ok(metas)
    }

    async fn mark_blob_processing(&self, key: &BlobKey) -> Result<(), BlobStoreError> {
        self.inner.write().await.transition(key, BlobStatus::Processing).map(|_| ())
    }

    async fn mark_blob_dispersing(&self, key: &BlobKey) -> Result<(), BlobStoreError> {
        self.inner.write().await.transition(key, BlobStatus::Dispersing).map(|_| ())
    }

    async fn mark_blob_confirmed(
        &self,
        metadata: &BlobMetadata,
        confirmation_info: ConfirmationInfo,
    ) -> Result<BlobMetadata, BlobStoreError> {
        let mut inner = self.inner.write().await;
        let key = metadata.key();
        let current = inner.get_mut(&key)?.clone();
        if current.is_confirmed()? {
            return Ok(current);
        }
        let stored = inner.transition(&key, BlobStatus::Confirmed)?;
        stored.confirmation_info = Some(confirmation_info);
        Ok(stored.clone())
    }

    async fn mark_blob_insufficient_signatures(
        &self,
        metadata: &BlobMetadata,
        confirmation_info: ConfirmationInfo,
    ) -> Result<BlobMetadata, BlobStoreError> {
        let mut inner = self.inner.write().await;
        let stored = inner.transition(&metadata.key(), BlobStatus::InsufficientSignatures)?;
        stored.confirmation_info = Some(confirmation_info);
        Ok(stored.clone())
    }

    async fn mark_blob_finalized(&self, key: &BlobKey) -> Result<(), BlobStoreError> {
        self.inner.write().await.transition(key, BlobStatus::Finalized).map(|_| ())
    }

    async fn mark_blob_failed(&self, key: &BlobKey) -> Result<(), BlobStoreError> {
        self.inner.write().await.transition(key, BlobStatus::Failed).map(|_| ())
    }

    async fn increment_blob_retry_count(&self, metadata: &BlobMetadata) -> Result<(), BlobStoreError> {
        let mut inner = self.inner.write().await;
        inner.get_mut(&metadata.key())?.num_retries += 1;
        Ok(())
    }

    async fn update_confirmation_block_number(
        &self,
        metadata: &BlobMetadata,
        confirmation_block_number: u32,
    ) -> Result<(), BlobStoreError> {
        let mut inner = self.inner.write().await;
        let key = metadata.key();
        let stored = inner.get_mut(&key)?;
        let info = stored.confirmation_info.as_mut().ok_or(BlobStoreError::MissingConfirmationInfo(key))?;
        info.confirmation_block_number = confirmation_block_number;
        Ok(())
    }

    async fn handle_blob_failure(&self, metadata: &BlobMetadata, max_retries: u32) -> Result<bool, BlobStoreError> {
        if metadata.num_retries < max_retries {
            self.mark_blob_processing(&metadata.key()).await?;
            self.increment_blob_retry_count(metadata).await?;
            Ok(true)
        } else {
            self.mark_blob_failed(&metadata.key()).await?;
            Ok(false)
        }
    }
}
