use std::collections::{BTreeMap, HashMap};
use std::sync::{PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use itertools::Itertools;
use tracing::debug;

use crate::error::EncodedBlobStoreError;
use crate::types::blob::BlobKey;
use crate::types::encoding::EncodingResult;
use crate::types::QuorumId;

type RequestId = (BlobKey, QuorumId);

struct EncodedEntry {
    sequence: u64,
    result: EncodingResult,
}

#[derive(Default)]
struct Inner {
    /// Outstanding encode jobs, with the order in which they were requested.
    requested: HashMap<RequestId, u64>,
    encoded: HashMap<RequestId, EncodedEntry>,
    encoded_size: u64,
    next_sequence: u64,
}

impl Inner {
    fn remove_encoded(&mut self, id: &RequestId) -> Option<EncodedEntry> {
        let entry = self.encoded.remove(id)?;
        self.encoded_size = self.encoded_size.saturating_sub(entry.result.size());
        Some(entry)
    }
}

/// In-memory cache of encoding results keyed by `(blob, quorum)`, plus the markers of encodings that
/// are still running.
#[derive(Default)]
pub struct EncodedBlobStore {
    inner: RwLock<Inner>,
}

impl EncodedBlobStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> RwLockReadGuard<'_, Inner> {
        self.inner.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, Inner> {
        self.inner.write().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn put_encoding_request(&self, blob_key: BlobKey, quorum_id: QuorumId) {
        let mut inner = self.write();
        let sequence = inner.next_sequence;
        inner.next_sequence += 1;
        inner.requested.insert((blob_key, quorum_id), sequence);
    }

    /// True while an encode for the pair is running, or when a result at `reference_block_number`
    /// is already cached.
    pub fn has_encoding_requested(&self, blob_key: &BlobKey, quorum_id: QuorumId, reference_block_number: u64) -> bool {
        let inner = self.read();
        let id = (blob_key.clone(), quorum_id);
        if inner.requested.contains_key(&id) {
            return true;
        }
        inner.encoded.get(&id).is_some_and(|entry| entry.result.reference_block_number == reference_block_number)
    }

    pub fn delete_encoding_request(&self, blob_key: &BlobKey, quorum_id: QuorumId) {
        self.write().requested.remove(&(blob_key.clone(), quorum_id));
    }

    /// Moves a request to the encoded set. Fails if the pair was never requested.
    pub fn put_encoding_result(&self, result: EncodingResult) -> Result<(), EncodedBlobStoreError> {
        let blob_key = result.blob_metadata.key();
        let quorum_id = result.quorum_id();
        let id = (blob_key, quorum_id);

        let mut inner = self.write();
        let Some(sequence) = inner.requested.remove(&id) else {
            return Err(EncodedBlobStoreError::NoSuchKey { blob_key: id.0, quorum_id });
        };
        inner.remove_encoded(&id);
        inner.encoded_size += result.size();
        inner.encoded.insert(id, EncodedEntry { sequence, result });
        Ok(())
    }

    pub fn get_encoding_result(&self, blob_key: &BlobKey, quorum_id: QuorumId) -> Option<EncodingResult> {
        self.read().encoded.get(&(blob_key.clone(), quorum_id)).map(|entry| entry.result.clone())
    }

    pub fn delete_encoding_result(&self, blob_key: &BlobKey, quorum_id: QuorumId) {
        self.write().remove_encoded(&(blob_key.clone(), quorum_id));
    }

    /// Returns every result at `reference_block_number` without removing it, and drops the results of
    /// older reference blocks.
    pub fn get_new_and_delete_stale_encoding_results(&self, reference_block_number: u64) -> Vec<EncodingResult> {
        let mut inner = self.write();
        let stale: Vec<RequestId> = inner
            .encoded
            .iter()
            .filter(|(_, entry)| entry.result.reference_block_number < reference_block_number)
            .map(|(id, _)| id.clone())
            .collect();
        for id in &stale {
            inner.remove_encoded(id);
        }
        if !stale.is_empty() {
            debug!(component = "EncodedBlobStore", num_stale = stale.len(), "Dropped stale encoding results");
        }

        inner
            .encoded
            .values()
            .filter(|entry| entry.result.reference_block_number == reference_block_number)
            .sorted_by_key(|entry| entry.sequence)
            .map(|entry| entry.result.clone())
            .collect()
    }

    /// Removes and returns the results of whole blobs at `reference_block_number`, oldest request
    /// first, stopping before the blob that would push the total past `max_size`. The first blob is
    /// always taken. A zero `max_size` takes everything. Blobs still missing a quorum stay cached, and
    /// results of older reference blocks are dropped.
    pub fn pop_latest_encoding_results(&self, reference_block_number: u64, max_size: u64) -> Vec<EncodingResult> {
        let mut inner = self.write();
        let stale: Vec<RequestId> = inner
            .encoded
            .iter()
            .filter(|(_, entry)| entry.result.reference_block_number < reference_block_number)
            .map(|(id, _)| id.clone())
            .collect();
        for id in &stale {
            inner.remove_encoded(id);
        }

        let mut by_blob: BTreeMap<BlobKey, Vec<&EncodedEntry>> = BTreeMap::new();
        for entry in inner.encoded.values() {
            if entry.result.reference_block_number == reference_block_number {
                by_blob.entry(entry.result.blob_metadata.key()).or_default().push(entry);
            }
        }

        let groups: Vec<(u64, u64, Vec<RequestId>)> = by_blob
            .into_iter()
            .filter(|(_, entries)| {
                let requested = entries[0].result.blob_metadata.security_params().len();
                entries.len() == requested
            })
            .map(|(blob_key, entries)| {
                let first = entries.iter().map(|entry| entry.sequence).min().unwrap_or_default();
                let size = entries.iter().map(|entry| entry.result.size()).sum();
                let ids = entries.iter().map(|entry| (blob_key.clone(), entry.result.quorum_id())).collect();
                (first, size, ids)
            })
            .sorted_by_key(|(first, _, _)| *first)
            .collect();

        let mut popped = Vec::new();
        let mut total = 0u64;
        for (_, size, ids) in groups {
            if max_size > 0 && !popped.is_empty() && total + size > max_size {
                break;
            }
            total += size;
            let mut entries: Vec<EncodedEntry> = ids.iter().filter_map(|id| inner.remove_encoded(id)).collect();
            entries.sort_by_key(|entry| entry.sequence);
            popped.extend(entries.into_iter().map(|entry| entry.result));
        }
        popped
    }

    /// Number of cached results and the bytes they hold.
    pub fn get_encoded_result_size(&self) -> (usize, u64) {
        let inner = self.read();
        (inner.encoded.len(), inner.encoded_size)
    }

    pub fn num_requested(&self) -> usize {
        self.read().requested.len()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use alloy::primitives::Bytes;
    use assert_matches::assert_matches;
    use rstest::*;

    use super::*;
    use crate::types::blob::{BlobMetadata, BlobStatus, BlobRequestHeader, RequestMetadata, SecurityParam};
    use crate::types::header::BlobQuorumInfo;

    fn metadata(blob_hash: &str, quorums: &[QuorumId]) -> Arc<BlobMetadata> {
        Arc::new(BlobMetadata {
            blob_hash: blob_hash.to_string(),
            metadata_hash: "meta".to_string(),
            blob_status: BlobStatus::Processing,
            expiry: 0,
            num_retries: 0,
            request_metadata: RequestMetadata {
                request_header: BlobRequestHeader {
                    account_id: String::new(),
                    security_params: quorums
                        .iter()
                        .map(|&quorum_id| SecurityParam {
                            quorum_id,
                            adversary_threshold: 30,
                            confirmation_threshold: 80,
                            quorum_rate: 0,
                        })
                        .collect(),
                },
                blob_size: 64,
                requested_at: 0,
            },
            confirmation_info: None,
        })
    }

    fn result(metadata: &Arc<BlobMetadata>, quorum_id: QuorumId, reference_block_number: u64, size: usize) -> EncodingResult {
        EncodingResult {
            blob_metadata: Arc::clone(metadata),
            reference_block_number,
            blob_quorum_info: BlobQuorumInfo {
                security_param: SecurityParam {
                    quorum_id,
                    adversary_threshold: 30,
                    confirmation_threshold: 80,
                    quorum_rate: 0,
                },
                chunk_length: 1,
            },
            commitment: Default::default(),
            chunks: vec![Bytes::from(vec![0u8; size])],
            assignments: Default::default(),
        }
    }

    fn store_result(store: &EncodedBlobStore, result: EncodingResult) {
        store.put_encoding_request(result.blob_metadata.key(), result.quorum_id());
        store.put_encoding_result(result).unwrap();
    }

    #[fixture]
    fn store() -> EncodedBlobStore {
        EncodedBlobStore::new()
    }

    #[rstest]
    fn request_marker_lifecycle(store: EncodedBlobStore) {
        let meta = metadata("a", &[0]);
        let key = meta.key();
        assert!(!store.has_encoding_requested(&key, 0, 10));

        store.put_encoding_request(key.clone(), 0);
        assert!(store.has_encoding_requested(&key, 0, 10));
        assert!(store.has_encoding_requested(&key, 0, 11));

        store.put_encoding_result(result(&meta, 0, 10, 8)).unwrap();
        assert_eq!(store.num_requested(), 0);
        assert!(store.has_encoding_requested(&key, 0, 10));
        assert!(!store.has_encoding_requested(&key, 0, 11));
        assert_eq!(store.get_encoded_result_size(), (1, 8));
    }

    #[rstest]
    fn result_without_request_is_rejected(store: EncodedBlobStore) {
        let meta = metadata("a", &[0]);
        assert_matches!(
            store.put_encoding_result(result(&meta, 0, 10, 8)),
            Err(EncodedBlobStoreError::NoSuchKey { quorum_id: 0, .. })
        );
    }

    #[rstest]
    fn deleting_request_allows_retry(store: EncodedBlobStore) {
        let key = metadata("a", &[0]).key();
        store.put_encoding_request(key.clone(), 0);
        store.delete_encoding_request(&key, 0);
        assert!(!store.has_encoding_requested(&key, 0, 10));
    }

    #[rstest]
    fn get_new_keeps_current_and_drops_stale(store: EncodedBlobStore) {
        let old = metadata("old", &[0]);
        let new = metadata("new", &[0]);
        store_result(&store, result(&old, 0, 9, 4));
        store_result(&store, result(&new, 0, 10, 6));

        let fetched = store.get_new_and_delete_stale_encoding_results(10);
        assert_eq!(fetched.len(), 1);
        assert_eq!(fetched[0].blob_metadata.blob_hash, "new");
        assert_eq!(store.get_encoded_result_size(), (1, 6));
    }

    #[rstest]
    fn pop_takes_whole_blobs_within_size_limit(store: EncodedBlobStore) {
        let a = metadata("a", &[0, 1]);
        let b = metadata("b", &[0]);
        let c = metadata("c", &[0]);
        store_result(&store, result(&a, 0, 10, 4));
        store_result(&store, result(&a, 1, 10, 4));
        store_result(&store, result(&b, 0, 10, 4));
        store_result(&store, result(&c, 0, 10, 4));

        let popped = store.pop_latest_encoding_results(10, 12);
        let blobs: Vec<_> = popped.iter().map(|r| r.blob_metadata.blob_hash.as_str()).collect();
        assert_eq!(blobs, vec!["a", "a", "b"]);
        assert_eq!(store.get_encoded_result_size(), (1, 4));

        let rest = store.pop_latest_encoding_results(10, 12);
        assert_eq!(rest.len(), 1);
        assert_eq!(store.get_encoded_result_size(), (0, 0));
    }

    #[rstest]
    fn pop_always_takes_first_blob(store: EncodedBlobStore) {
        let big = metadata("big", &[0]);
        store_result(&store, result(&big, 0, 10, 100));
        assert_eq!(store.pop_latest_encoding_results(10, 10).len(), 1);
    }

    #[rstest]
    fn pop_leaves_incomplete_blobs(store: EncodedBlobStore) {
        let partial = metadata("partial", &[0, 1]);
        store_result(&store, result(&partial, 0, 10, 4));
        store.put_encoding_request(partial.key(), 1);

        assert!(store.pop_latest_encoding_results(10, 0).is_empty());
        assert_eq!(store.get_encoded_result_size(), (1, 4));

        store.put_encoding_result(result(&partial, 1, 10, 4)).unwrap();
        assert_eq!(store.pop_latest_encoding_results(10, 0).len(), 2);
    }

    #[rstest]
    fn pop_drops_stale_results(store: EncodedBlobStore) {
        let old = metadata("old", &[0]);
        store_result(&store, result(&old, 0, 9, 4));
        assert!(store.pop_latest_encoding_results(10, 0).is_empty());
        assert_eq!(store.get_encoded_result_size(), (0, 0));
    }
}
