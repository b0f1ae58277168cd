use std::collections::{BTreeMap, HashMap};

use async_trait::async_trait;
use tokio::sync::RwLock;
use tracing::debug;
use uuid::Uuid;

use super::{MinibatchStore, MinibatchStoreError};
use crate::types::batch::{
    BatchAttestation, BatchRecord, BatchStatus, BlobMinibatchMapping, DispersalResponse, MinibatchDispersal, MinibatchRecord,
};
use crate::types::blob::BlobKey;
use crate::types::operator::OperatorId;

type DispersalKey = (Uuid, u32, OperatorId);

#[derive(Default)]
struct Inner {
    batches: HashMap<Uuid, BatchRecord>,
    minibatches: BTreeMap<(Uuid, u32), MinibatchRecord>,
    dispersals: BTreeMap<DispersalKey, MinibatchDispersal>,
    mappings: Vec<BlobMinibatchMapping>,
}

impl Inner {
    fn batch_mut(&mut self, batch_id: Uuid) -> Result<&mut BatchRecord, MinibatchStoreError> {
        self.batches.get_mut(&batch_id).ok_or(MinibatchStoreError::BatchNotFound(batch_id))
    }

    fn transition(&mut self, batch_id: Uuid, to: BatchStatus) -> Result<&mut BatchRecord, MinibatchStoreError> {
        let batch = self.batch_mut(batch_id)?;
        if !batch.status.can_transition_to(to) {
            return Err(MinibatchStoreError::InvalidBatchTransition { batch_id, from: batch.status, to });
        }
        batch.status = to;
        Ok(batch)
    }

    fn dispersals_of(&self, batch_id: Uuid) -> impl Iterator<Item = &MinibatchDispersal> {
        self.dispersals
            .range((batch_id, 0, OperatorId::ZERO)..=(batch_id, u32::MAX, OperatorId::repeat_byte(0xff)))
            .map(|(_, dispersal)| dispersal)
    }
}

/// Process-local `MinibatchStore`.
#[derive(Default)]
pub struct InMemoryMinibatchStore {
    inner: RwLock<Inner>,
}

impl InMemoryMinibatchStore {
    pub fn new() -> Self {
        Self::default()
    }
}

fn dispersal_key(dispersal: &MinibatchDispersal) -> DispersalKey {
    (dispersal.request.batch_id, dispersal.request.minibatch_index, dispersal.request.operator_id)
}

#[async_trait]
impl MinibatchStore for InMemoryMinibatchStore {
    async fn put_batch(&self, batch: BatchRecord) -> Result<(), MinibatchStoreError> {
        let mut inner = self.inner.write().await;
        if inner.batches.contains_key(&batch.id) {
            return Err(MinibatchStoreError::BatchExists(batch.id));
        }
        inner.batches.insert(batch.id, batch);
        Ok(())
    }

    async fn get_batch(&self, batch_id: Uuid) -> Result<Option<BatchRecord>, MinibatchStoreError> {
        Ok(self.inner.read().await.batches.get(&batch_id).cloned())
    }

    async fn get_batches_by_status(&self, status: BatchStatus) -> Result<Vec<BatchRecord>, MinibatchStoreError> {
        let inner = self.inner.read().await;
        let mut batches: Vec<BatchRecord> =
            inner.batches.values().filter(|batch| batch.status == status).cloned().collect();
        batches.sort_by_key(|batch| (batch.created_at, batch.id));
        Ok(batches)
    }

    async fn update_batch_status(&self, batch_id: Uuid, status: BatchStatus) -> Result<(), MinibatchStoreError> {
        if status == BatchStatus::Pending {
            return Err(MinibatchStoreError::InvalidBatchStatus(status));
        }
        self.inner.write().await.transition(batch_id, status)?;
        Ok(())
    }

    async fn mark_batch_formed(&self, batch_id: Uuid, num_minibatches: u32) -> Result<(), MinibatchStoreError> {
        let mut inner = self.inner.write().await;
        let batch = inner.transition(batch_id, BatchStatus::Formed)?;
        batch.num_minibatches = num_minibatches;
        debug!(%batch_id, num_minibatches, "Batch formed");
        Ok(())
    }

    async fn mark_batch_attesting(
        &self,
        batch_id: Uuid,
        attestation: BatchAttestation,
    ) -> Result<(), MinibatchStoreError> {
        let mut inner = self.inner.write().await;
        inner.transition(batch_id, BatchStatus::Attesting)?.attestation = Some(attestation);
        Ok(())
    }

    async fn get_latest_formed_batch(&self) -> Result<Option<BatchRecord>, MinibatchStoreError> {
        Ok(self.get_batches_by_status(BatchStatus::Formed).await?.pop())
    }

    async fn put_minibatch(&self, minibatch: MinibatchRecord) -> Result<(), MinibatchStoreError> {
        let mut inner = self.inner.write().await;
        let key = (minibatch.batch_id, minibatch.minibatch_index);
        if inner.minibatches.contains_key(&key) {
            return Err(MinibatchStoreError::MinibatchExists {
                batch_id: minibatch.batch_id,
                minibatch_index: minibatch.minibatch_index,
            });
        }
        inner.minibatches.insert(key, minibatch);
        Ok(())
    }

    async fn get_minibatch(
        &self,
        batch_id: Uuid,
        minibatch_index: u32,
    ) -> Result<Option<MinibatchRecord>, MinibatchStoreError> {
        Ok(self.inner.read().await.minibatches.get(&(batch_id, minibatch_index)).cloned())
    }

    async fn get_minibatches(&self, batch_id: Uuid) -> Result<Vec<MinibatchRecord>, MinibatchStoreError> {
        let inner = self.inner.read().await;
        Ok(inner.minibatches.range((batch_id, 0)..=(batch_id, u32::MAX)).map(|(_, m)| m.clone()).collect())
    }

    async fn put_dispersal(&self, dispersal: MinibatchDispersal) -> Result<(), MinibatchStoreError> {
        self.inner.write().await.dispersals.insert(dispersal_key(&dispersal), dispersal);
        Ok(())
    }

    async fn update_dispersal_response(
        &self,
        dispersal: &MinibatchDispersal,
        response: DispersalResponse,
    ) -> Result<(), MinibatchStoreError> {
        let mut inner = self.inner.write().await;
        let (batch_id, minibatch_index, operator_id) = dispersal_key(dispersal);
        let stored = inner.dispersals.get_mut(&(batch_id, minibatch_index, operator_id)).ok_or(
            MinibatchStoreError::DispersalNotFound { batch_id, minibatch_index, operator_id },
        )?;
        stored.response = response;
        Ok(())
    }

    async fn get_dispersal(
        &self,
        batch_id: Uuid,
        minibatch_index: u32,
        operator_id: OperatorId,
    ) -> Result<Option<MinibatchDispersal>, MinibatchStoreError> {
        Ok(self.inner.read().await.dispersals.get(&(batch_id, minibatch_index, operator_id)).cloned())
    }

    async fn get_dispersals_by_batch_id(&self, batch_id: Uuid) -> Result<Vec<MinibatchDispersal>, MinibatchStoreError> {
        Ok(self.inner.read().await.dispersals_of(batch_id).cloned().collect())
    }

    async fn get_dispersals_by_minibatch(
        &self,
        batch_id: Uuid,
        minibatch_index: u32,
    ) -> Result<Vec<MinibatchDispersal>, MinibatchStoreError> {
        let inner = self.inner.read().await;
        let dispersals: Vec<MinibatchDispersal> = inner
            .dispersals_of(batch_id)
            .filter(|dispersal| dispersal.request.minibatch_index == minibatch_index)
            .cloned()
            .collect();
        if dispersals.is_empty() {
            return Err(MinibatchStoreError::NoDispersals { batch_id, minibatch_index });
        }
        Ok(dispersals)
    }

    async fn put_blob_minibatch_mappings(&self, mappings: Vec<BlobMinibatchMapping>) -> Result<(), MinibatchStoreError> {
        self.inner.write().await.mappings.extend(mappings);
        Ok(())
    }

    async fn get_blob_minibatch_mappings(
        &self,
        blob_key: &BlobKey,
    ) -> Result<Vec<BlobMinibatchMapping>, MinibatchStoreError> {
        let inner = self.inner.read().await;
        Ok(inner.mappings.iter().filter(|mapping| &mapping.blob_key == blob_key).cloned().collect())
    }

    async fn get_blob_minibatch_mappings_by_batch_id(
        &self,
        batch_id: Uuid,
    ) -> Result<Vec<BlobMinibatchMapping>, MinibatchStoreError> {
        let inner = self.inner.read().await;
        Ok(inner.mappings.iter().filter(|mapping| mapping.batch_id == batch_id).cloned().collect())
    }

    async fn batch_dispersed(&self, batch_id: Uuid, num_minibatches: u32) -> Result<bool, MinibatchStoreError> {
        let inner = self.inner.read().await;
        let mut seen = vec![false; num_minibatches as usize];
        let mut any = false;
        for dispersal in inner.dispersals_of(batch_id) {
            any = true;
            if !dispersal.is_successful() {
                debug!(%batch_id, minibatch_index = dispersal.request.minibatch_index, operator_id = %dispersal.request.operator_id, "Dispersal response pending");
                return Ok(false);
            }
            match seen.get_mut(dispersal.request.minibatch_index as usize) {
                Some(slot) => *slot = true,
                None => return Ok(false),
            }
        }
        if !any {
            debug!(%batch_id, "No dispersals found");
            return Ok(false);
        }
        Ok(seen.into_iter().all(|dispersed| dispersed))
    }
}
