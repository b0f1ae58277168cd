use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use std::time::Duration;

use alloy::primitives::{keccak256, B256, U256};
use batcher_chain_client_interface::{EthClient, TxReceipt};
use batcher_utils::retry::retry_with_backoff;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::config::BatchConfirmerConfig;
use crate::core::client::transactor::{parse_batch_id_from_receipt, TransactorError};
use crate::core::client::{BlobStore, Dispatcher, MinibatchStore, SignatureAggregator, Transactor};
use crate::core::merkle::MerkleTree;
use crate::error::{BatchConfirmerError, FailReason};
use crate::pipeline::encoding_streamer::EncodingStreamer;
use crate::pipeline::minibatcher::Minibatcher;
use crate::pipeline::txn_manager::{ReceiptOrErr, TxnManager, TxnRequest};
use crate::types::attestation::{QuorumResult, SignatureAggregation};
use crate::types::batch::{BatchAttestation, BatchStatus};
use crate::types::blob::{BlobMetadata, ConfirmationInfo};
use crate::types::encoding::G1Point;
use crate::types::header::{BatchHeader, BlobHeader};
use crate::types::QuorumId;
use crate::utils::metrics::{BatcherMetrics, BlobOutcome};

pub const CONFIRM_BATCH_TAG: &str = "confirmBatch";
const BATCH_ID_MAX_ATTEMPTS: usize = 5;
const BATCH_ID_BASE_DELAY: Duration = Duration::from_secs(1);

/// Context of a `confirmBatch` transaction, returned with its receipt.
#[derive(Debug, Clone)]
pub struct ConfirmationMetadata {
    pub batch_id: Uuid,
    pub batch_header: BatchHeader,
    pub blobs: Vec<Arc<BlobMetadata>>,
    pub blob_headers: Vec<BlobHeader>,
    pub merkle_tree: MerkleTree,
    pub aggregation: SignatureAggregation,
}

/// Collaborators the confirmer calls into.
pub struct BatchConfirmerDeps {
    pub blob_store: Arc<dyn BlobStore>,
    pub minibatch_store: Arc<dyn MinibatchStore>,
    pub dispatcher: Arc<dyn Dispatcher>,
    pub aggregator: Arc<dyn SignatureAggregator>,
    pub transactor: Arc<dyn Transactor>,
    pub eth_client: Arc<dyn EthClient>,
}

/// Attests formed batches and confirms them on chain.
pub struct BatchConfirmer {
    config: BatchConfirmerConfig,
    deps: BatchConfirmerDeps,
    streamer: Arc<EncodingStreamer>,
    minibatcher: Arc<Minibatcher>,
    txn_manager: Arc<TxnManager<ConfirmationMetadata>>,
    metrics: Arc<BatcherMetrics>,
}

/// A blob passes when every quorum it asked for signed at or above its confirmation threshold.
pub fn blob_passes(blob_header: &BlobHeader, quorum_results: &BTreeMap<QuorumId, QuorumResult>) -> bool {
    blob_header.quorum_infos.iter().all(|info| {
        quorum_results
            .get(&info.quorum_id())
            .is_some_and(|result| result.percent_signed >= info.security_param.confirmation_threshold)
    })
}

/// keccak256 of the reference block (4 bytes, big endian) followed by the non-signer operator ids.
pub fn compute_signatory_record_hash(reference_block_number: u32, non_signers: &[G1Point]) -> B256 {
    let mut buf = Vec::with_capacity(4 + 32 * non_signers.len());
    buf.extend_from_slice(&reference_block_number.to_be_bytes());
    for pubkey in non_signers {
        buf.extend_from_slice(pubkey.hash().as_slice());
    }
    keccak256(buf)
}

impl BatchConfirmer {
    pub fn new(
        config: BatchConfirmerConfig,
        deps: BatchConfirmerDeps,
        streamer: Arc<EncodingStreamer>,
        minibatcher: Arc<Minibatcher>,
        txn_manager: Arc<TxnManager<ConfirmationMetadata>>,
        metrics: Arc<BatcherMetrics>,
    ) -> Self {
        Self { config, deps, streamer, minibatcher, txn_manager, metrics }
    }

    pub fn start(self: &Arc<Self>, shutdown_token: CancellationToken, tracker: &TaskTracker) {
        let confirmer = Arc::clone(self);
        tracker.spawn(async move {
            let mut ticker = tokio::time::interval(confirmer.config.pull_interval);
            loop {
                tokio::select! {
                    _ = shutdown_token.cancelled() => break,
                    _ = ticker.tick() => {
                        let handled = tokio::select! {
                            _ = shutdown_token.cancelled() => break,
                            handled = confirmer.handle_single_batch() => handled,
                        };
                        if let Err(err) = handled {
                            error!(component = "BatchConfirmer", error = %err, "Error handling batch");
                        }
                    }
                }
            }
            info!(component = "BatchConfirmer", "Batch confirmer stopped");
        });
    }

    /// Moves the reference block forward, then attests the latest formed batch once all of its
    /// minibatches are dispersed and submits its confirmation. The batch is `Attesting` from the
    /// moment the transaction is handed off until its receipt is processed.
    pub async fn handle_single_batch(&self) -> Result<(), BatchConfirmerError> {
        let current_block_number = self.deps.eth_client.block_number().await?;
        self.streamer.update_reference_block(current_block_number).await?;

        let Some(batch) = self.deps.minibatch_store.get_latest_formed_batch().await? else {
            debug!(component = "BatchConfirmer", "No formed batch to confirm");
            return Ok(());
        };
        let batch_id = batch.id;

        if !self.wait_for_dispersal(batch_id, batch.num_minibatches).await? {
            warn!(component = "BatchConfirmer", batch_id = %batch_id, "Timed out waiting for batch dispersal");
            let blobs = self.minibatcher.pop_batch_state(batch_id).map(|state| state.blob_metadata).unwrap_or_default();
            self.handle_failure(batch_id, &blobs, FailReason::FailAggregateSignatures).await;
            return Err(BatchConfirmerError::DispersalTimeout { batch_id, timeout: self.config.dispersal_timeout });
        }

        // The batch keeps its status: its state may be owned by a confirmation already in flight.
        let Some(state) = self.minibatcher.pop_batch_state(batch_id) else {
            return Err(BatchConfirmerError::MissingBatchState(batch_id));
        };
        let blobs = state.blob_metadata.clone();

        let blob_header_hashes: Vec<B256> = state.blob_headers.iter().map(BlobHeader::hash).collect();
        let mut batch_header = BatchHeader::new(state.reference_block_number);
        let merkle_tree = match batch_header.set_batch_root_from_hashes(&blob_header_hashes) {
            Ok(tree) => tree,
            Err(err) => {
                self.handle_failure(batch_id, &blobs, FailReason::FailBatchHeaderHash).await;
                return Err(err.into());
            }
        };
        let batch_header_hash = batch_header.hash();
        let quorum_ids: BTreeSet<QuorumId> = state.blob_headers.iter().flat_map(BlobHeader::quorum_ids).collect();
        info!(
            component = "BatchConfirmer",
            batch_id = %batch_id,
            num_blobs = blobs.len(),
            num_minibatches = state.num_minibatches,
            quorums = ?quorum_ids,
            batch_header_hash = %batch_header_hash,
            "Requesting attestation"
        );

        let replies = match self
            .deps
            .dispatcher
            .attest_batch(Arc::clone(&state.operator_state), blob_header_hashes, batch_header)
            .await
        {
            Ok(replies) => replies,
            Err(err) => {
                self.handle_failure(batch_id, &blobs, FailReason::FailAggregateSignatures).await;
                return Err(err.into());
            }
        };

        let received = tokio::time::timeout(
            self.config.attestation_timeout,
            self.deps.aggregator.receive_signatures(&state.operator_state, batch_header_hash, replies),
        )
        .await;
        let attestation = match received {
            Ok(Ok(attestation)) => attestation,
            Ok(Err(err)) => {
                self.handle_failure(batch_id, &blobs, FailReason::FailAggregateSignatures).await;
                return Err(err.into());
            }
            Err(_) => {
                self.handle_failure(batch_id, &blobs, FailReason::FailAggregateSignatures).await;
                return Err(BatchConfirmerError::AttestationTimeout {
                    batch_id,
                    timeout: self.config.attestation_timeout,
                });
            }
        };

        let mut passed_quorums = BTreeSet::new();
        let mut num_passed = 0;
        for blob_header in &state.blob_headers {
            if blob_passes(blob_header, &attestation.quorum_results) {
                num_passed += 1;
                passed_quorums.extend(blob_header.quorum_ids());
            }
        }
        if num_passed == 0 {
            self.handle_failure(batch_id, &blobs, FailReason::FailNoSignatures).await;
            return Err(BatchConfirmerError::NoSignatures);
        }

        let non_empty_quorums: Vec<QuorumId> = passed_quorums.into_iter().collect();
        let aggregation =
            match self.deps.aggregator.aggregate_signatures(&state.operator_state, &attestation, &non_empty_quorums) {
                Ok(aggregation) => aggregation,
                Err(err) => {
                    self.handle_failure(batch_id, &blobs, FailReason::FailAggregateSignatures).await;
                    return Err(err.into());
                }
            };

        let tx = match self
            .deps
            .transactor
            .build_confirm_batch_txn(&batch_header, &aggregation.quorum_results, &aggregation)
            .await
        {
            Ok(tx) => tx,
            Err(err) => {
                self.handle_failure(batch_id, &blobs, FailReason::FailConfirmBatch).await;
                return Err(err.into());
            }
        };

        let batch_attestation = BatchAttestation {
            header_hash: batch_header_hash,
            quorum_agg_pubkeys: aggregation.quorum_agg_pubkeys.clone(),
            aggregate_signature: aggregation.agg_signature.clone(),
        };
        if let Err(err) = self.deps.minibatch_store.mark_batch_attesting(batch_id, batch_attestation).await {
            self.handle_failure(batch_id, &blobs, FailReason::FailUpdateBatchStatus).await;
            return Err(err.into());
        }

        info!(
            component = "BatchConfirmer",
            batch_id = %batch_id,
            num_passed,
            num_blobs = blobs.len(),
            quorums = ?non_empty_quorums,
            "Submitting confirmBatch transaction"
        );
        let request = TxnRequest {
            tx,
            tag: CONFIRM_BATCH_TAG.to_string(),
            value: U256::ZERO,
            metadata: ConfirmationMetadata {
                batch_id,
                batch_header,
                blobs: blobs.clone(),
                blob_headers: state.blob_headers,
                merkle_tree,
                aggregation,
            },
        };
        if let Err(err) = self.txn_manager.process_transaction(request).await {
            self.handle_failure(batch_id, &blobs, FailReason::FailConfirmBatch).await;
            return Err(err.into());
        }
        Ok(())
    }

    /// Polls until every minibatch of the batch has dispersed. `false` on timeout.
    async fn wait_for_dispersal(&self, batch_id: Uuid, num_minibatches: u32) -> Result<bool, BatchConfirmerError> {
        let poll = async {
            loop {
                if self.deps.minibatch_store.batch_dispersed(batch_id, num_minibatches).await? {
                    return Ok::<_, BatchConfirmerError>(());
                }
                tokio::time::sleep(self.config.dispersal_status_check_interval).await;
            }
        };
        match tokio::time::timeout(self.config.dispersal_timeout, poll).await {
            Ok(result) => result.map(|_| true),
            Err(_) => Ok(false),
        }
    }

    /// Consumes the outcome of a `confirmBatch` transaction and records the result on every blob.
    pub async fn process_confirmed_batch(
        &self,
        outcome: ReceiptOrErr<ConfirmationMetadata>,
    ) -> Result<(), BatchConfirmerError> {
        let metadata = outcome.metadata;
        let receipt = match outcome.result {
            Ok(receipt) => receipt,
            Err(err) => {
                self.handle_failure(metadata.batch_id, &metadata.blobs, FailReason::FailConfirmBatch).await;
                return Err(BatchConfirmerError::OnchainConfirmation(err));
            }
        };
        info!(
            component = "BatchConfirmer",
            batch_id = %metadata.batch_id,
            tx_hash = %receipt.transaction_hash,
            block_number = receipt.block_number,
            "Received confirmBatch receipt"
        );

        let blobs_to_retry = self.update_confirmation_info(&metadata, &receipt).await?;
        if !blobs_to_retry.is_empty() {
            error!(
                component = "BatchConfirmer",
                batch_id = %metadata.batch_id,
                num_blobs = blobs_to_retry.len(),
                "Failed to update confirmation info"
            );
            self.handle_failure(metadata.batch_id, &blobs_to_retry, FailReason::FailUpdateConfirmationInfo).await;
            return Ok(());
        }

        self.deps.minibatch_store.update_batch_status(metadata.batch_id, BatchStatus::Attested).await?;
        self.metrics.batches_attested.add(1, &[]);
        Ok(())
    }

    /// Attaches confirmation info to every blob of the batch. Returns the blobs that could not be
    /// updated.
    async fn update_confirmation_info(
        &self,
        metadata: &ConfirmationMetadata,
        receipt: &TxReceipt,
    ) -> Result<Vec<Arc<BlobMetadata>>, BatchConfirmerError> {
        let on_chain_batch_id = match self.get_batch_id(receipt).await {
            Ok(id) => id,
            Err(err) => {
                self.handle_failure(metadata.batch_id, &metadata.blobs, FailReason::FailGetBatchID).await;
                return Err(BatchConfirmerError::BatchId(err));
            }
        };

        let aggregation = &metadata.aggregation;
        let batch_header_hash = metadata.batch_header.hash();
        let reference_block_number = metadata.batch_header.reference_block_number as u32;
        let signatory_record_hash = compute_signatory_record_hash(reference_block_number, &aggregation.non_signers);

        let mut blobs_to_retry = Vec::new();
        let mut num_confirmed = 0;
        let mut num_insufficient = 0;
        for (blob_index, (blob, blob_header)) in metadata.blobs.iter().zip(&metadata.blob_headers).enumerate() {
            let attested = blob_passes(blob_header, &aggregation.quorum_results);
            let blob_inclusion_proof = if attested {
                match metadata.merkle_tree.generate_proof(blob_index) {
                    Ok(proof) => proof,
                    Err(err) => {
                        error!(component = "BatchConfirmer", blob_key = %blob.key(), error = %err, "Error generating inclusion proof");
                        blobs_to_retry.push(Arc::clone(blob));
                        continue;
                    }
                }
            } else {
                Vec::new()
            };

            let confirmation_info = ConfirmationInfo {
                batch_header_hash,
                blob_index: blob_index as u32,
                blob_count: metadata.blobs.len() as u32,
                signatory_record_hash,
                reference_block_number,
                batch_root: metadata.batch_header.batch_root,
                blob_inclusion_proof,
                blob_commitment: blob_header.commitments.clone(),
                batch_id: on_chain_batch_id,
                confirmation_txn_hash: receipt.transaction_hash,
                confirmation_block_number: receipt.block_number as u32,
                fee: vec![0],
                quorum_results: aggregation.quorum_results.clone(),
                blob_quorum_infos: blob_header.quorum_infos.clone(),
            };

            let updated = if attested {
                self.deps.blob_store.mark_blob_confirmed(blob, confirmation_info).await
            } else {
                self.deps.blob_store.mark_blob_insufficient_signatures(blob, confirmation_info).await
            };
            match updated {
                Ok(_) if attested => num_confirmed += 1,
                Ok(_) => num_insufficient += 1,
                Err(err) => {
                    error!(component = "BatchConfirmer", blob_key = %blob.key(), error = %err, "Error updating blob status");
                    blobs_to_retry.push(Arc::clone(blob));
                }
            }
        }

        self.metrics.record_blobs(BlobOutcome::Confirmed, num_confirmed);
        self.metrics.record_blobs(BlobOutcome::InsufficientSignatures, num_insufficient);
        info!(
            component = "BatchConfirmer",
            batch_id = %metadata.batch_id,
            on_chain_batch_id,
            num_confirmed,
            num_insufficient,
            "Updated confirmation info"
        );
        Ok(blobs_to_retry)
    }

    /// Reads the on-chain batch id from the receipt, re-fetching the receipt when it cannot be parsed.
    async fn get_batch_id(&self, receipt: &TxReceipt) -> Result<u32, TransactorError> {
        let tx_hash = receipt.transaction_hash;
        retry_with_backoff(BATCH_ID_MAX_ATTEMPTS, BATCH_ID_BASE_DELAY, |attempt| async move {
            if attempt == 0 {
                return parse_batch_id_from_receipt(receipt);
            }
            let refreshed = self.deps.eth_client.transaction_receipt(tx_hash).await?;
            parse_batch_id_from_receipt(&refreshed)
        })
        .await
    }

    /// Requeues or fails every blob and marks the batch failed.
    pub async fn handle_failure(&self, batch_id: Uuid, blobs: &[Arc<BlobMetadata>], reason: FailReason) {
        let mut retried = 0;
        let mut failed = 0;
        for blob in blobs {
            self.streamer.remove_encoded_blob(blob);
            match self.deps.blob_store.handle_blob_failure(blob, self.config.max_num_retries_per_blob).await {
                Ok(true) => retried += 1,
                Ok(false) => failed += 1,
                Err(err) => {
                    error!(component = "BatchConfirmer", blob_key = %blob.key(), error = %err, "Error handling blob failure")
                }
            }
        }
        self.metrics.record_blobs(BlobOutcome::Retried, retried);
        self.metrics.record_blobs(BlobOutcome::Failed, failed);
        warn!(
            component = "BatchConfirmer",
            batch_id = %batch_id,
            reason = %reason,
            num_blobs = blobs.len(),
            retried,
            failed,
            "Handled batch failure"
        );

        if let Err(err) = self.deps.minibatch_store.update_batch_status(batch_id, BatchStatus::Failed).await {
            error!(component = "BatchConfirmer", batch_id = %batch_id, error = %err, "Error marking batch as failed");
        }
    }
}
