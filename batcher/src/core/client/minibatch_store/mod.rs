pub mod error;
pub mod memory;

use async_trait::async_trait;
pub use error::MinibatchStoreError;
use uuid::Uuid;

use crate::types::batch::{
    BatchAttestation, BatchRecord, BatchStatus, BlobMinibatchMapping, DispersalResponse, MinibatchDispersal, MinibatchRecord,
};
use crate::types::blob::BlobKey;
use crate::types::operator::OperatorId;

/// Owner of batch, minibatch and dispersal records. Keyed by batch id and minibatch index; callers
/// never lock around it.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait MinibatchStore: Send + Sync {
    /// Fails if a batch with the same id already exists.
    async fn put_batch(&self, batch: BatchRecord) -> Result<(), MinibatchStoreError>;

    async fn get_batch(&self, batch_id: Uuid) -> Result<Option<BatchRecord>, MinibatchStoreError>;

    /// Batches with `status`, oldest first.
    async fn get_batches_by_status(&self, status: BatchStatus) -> Result<Vec<BatchRecord>, MinibatchStoreError>;

    /// `Pending` can never be set. Transitions outside `BatchStatus::can_transition_to` are rejected.
    async fn update_batch_status(&self, batch_id: Uuid, status: BatchStatus) -> Result<(), MinibatchStoreError>;

    async fn mark_batch_formed(&self, batch_id: Uuid, num_minibatches: u32) -> Result<(), MinibatchStoreError>;

    /// Moves a `Formed` batch to `Attesting` and records its aggregated attestation.
    async fn mark_batch_attesting(
        &self,
        batch_id: Uuid,
        attestation: BatchAttestation,
    ) -> Result<(), MinibatchStoreError>;

    /// Most recently created batch in `Formed`.
    async fn get_latest_formed_batch(&self) -> Result<Option<BatchRecord>, MinibatchStoreError>;

    async fn put_minibatch(&self, minibatch: MinibatchRecord) -> Result<(), MinibatchStoreError>;

    async fn get_minibatch(
        &self,
        batch_id: Uuid,
        minibatch_index: u32,
    ) -> Result<Option<MinibatchRecord>, MinibatchStoreError>;

    async fn get_minibatches(&self, batch_id: Uuid) -> Result<Vec<MinibatchRecord>, MinibatchStoreError>;

    /// Records a dispersal request. Overwrites an earlier record for the same operator and minibatch.
    async fn put_dispersal(&self, dispersal: MinibatchDispersal) -> Result<(), MinibatchStoreError>;

    async fn update_dispersal_response(
        &self,
        dispersal: &MinibatchDispersal,
        response: DispersalResponse,
    ) -> Result<(), MinibatchStoreError>;

    async fn get_dispersal(
        &self,
        batch_id: Uuid,
        minibatch_index: u32,
        operator_id: OperatorId,
    ) -> Result<Option<MinibatchDispersal>, MinibatchStoreError>;

    async fn get_dispersals_by_batch_id(&self, batch_id: Uuid) -> Result<Vec<MinibatchDispersal>, MinibatchStoreError>;

    /// Errors when the minibatch has no dispersals at all.
    async fn get_dispersals_by_minibatch(
        &self,
        batch_id: Uuid,
        minibatch_index: u32,
    ) -> Result<Vec<MinibatchDispersal>, MinibatchStoreError>;

    async fn put_blob_minibatch_mappings(&self, mappings: Vec<BlobMinibatchMapping>) -> Result<(), MinibatchStoreError>;

    async fn get_blob_minibatch_mappings(
        &self,
        blob_key: &BlobKey,
    ) -> Result<Vec<BlobMinibatchMapping>, MinibatchStoreError>;

    async fn get_blob_minibatch_mappings_by_batch_id(
        &self,
        batch_id: Uuid,
    ) -> Result<Vec<BlobMinibatchMapping>, MinibatchStoreError>;

    /// True once every minibatch in `0..num_minibatches` has dispersals and every one of them
    /// responded without error.
    async fn batch_dispersed(&self, batch_id: Uuid, num_minibatches: u32) -> Result<bool, MinibatchStoreError>;
}
