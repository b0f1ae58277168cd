use std::sync::Arc;
use std::time::{Duration, Instant};

use alloy::primitives::B256;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tracing::{debug, warn};

use super::{DispatchError, Dispatcher};
use crate::types::attestation::{Signature, SigningMessage};
use crate::types::encoding::{BlobMessage, EncodedBlob};
use crate::types::header::BatchHeader;
use crate::types::operator::{IndexedOperatorInfo, IndexedOperatorState, OperatorId};

const STORE_CHUNKS_PATH: &str = "v1/store_chunks";
const ATTEST_BATCH_PATH: &str = "v1/attest_batch";

#[derive(Debug, Serialize)]
struct StoreChunksRequest<'a> {
    batch_header: &'a BatchHeader,
    blobs: &'a [BlobMessage],
}

#[derive(Debug, Deserialize)]
struct StoreChunksReply {
    signatures: Vec<Signature>,
}

#[derive(Debug, Serialize)]
struct AttestBatchRequest<'a> {
    batch_header: &'a BatchHeader,
    blob_header_hashes: &'a [B256],
}

#[derive(Debug, Deserialize)]
struct AttestBatchReply {
    signature: Signature,
}

/// `Dispatcher` speaking JSON over HTTP to each operator's dispersal socket.
#[derive(Clone)]
pub struct HttpDispatcher {
    client: reqwest::Client,
    timeout: Duration,
}

impl HttpDispatcher {
    /// `timeout` bounds every batch-wide request; per-operator dispersals pass their own.
    pub fn new(timeout: Duration) -> Self {
        Self { client: reqwest::Client::new(), timeout }
    }

    fn endpoint(socket: &str, path: &str) -> Result<url::Url, DispatchError> {
        let base = if socket.starts_with("http://") || socket.starts_with("https://") {
            socket.to_string()
        } else {
            format!("http://{socket}")
        };
        let base = url::Url::parse(&base).map_err(|_| DispatchError::InvalidSocket(socket.to_string()))?;
        base.join(path).map_err(|_| DispatchError::InvalidSocket(socket.to_string()))
    }

    async fn post<Req: Serialize + ?Sized, Reply: for<'de> Deserialize<'de>>(
        &self,
        socket: &str,
        path: &str,
        body: &Req,
        timeout: Duration,
    ) -> Result<Reply, DispatchError> {
        let response = self
            .client
            .post(Self::endpoint(socket, path)?)
            .timeout(timeout)
            .json(body)
            .send()
            .await
            .map_err(|e| DispatchError::from_reqwest_error(socket, e))?;

        let status = response.status();
        if !status.is_success() {
            let message = response.text().await.unwrap_or_default();
            return Err(DispatchError::Rejected { socket: socket.to_string(), status: status.as_u16(), message });
        }
        response
            .json()
            .await
            .map_err(|e| DispatchError::InvalidReply { socket: socket.to_string(), message: e.to_string() })
    }

    async fn attest(
        &self,
        operator: &IndexedOperatorInfo,
        blob_header_hashes: &[B256],
        batch_header: &BatchHeader,
    ) -> Result<Signature, DispatchError> {
        let request = AttestBatchRequest { batch_header, blob_header_hashes };
        let reply: AttestBatchReply = self.post(&operator.socket, ATTEST_BATCH_PATH, &request, self.timeout).await?;
        Ok(reply.signature)
    }
}

fn signing_message(
    operator: OperatorId,
    batch_header_hash: B256,
    started: Instant,
    result: Result<Signature, DispatchError>,
) -> SigningMessage {
    let attestation_latency_ms = started.elapsed().as_secs_f64() * 1000.0;
    match result {
        Ok(signature) => SigningMessage {
            operator,
            batch_header_hash,
            signature: Some(signature),
            attestation_latency_ms,
            error: None,
        },
        Err(err) => SigningMessage {
            operator,
            batch_header_hash,
            signature: None,
            attestation_latency_ms,
            error: Some(err.to_string()),
        },
    }
}

#[async_trait]
impl Dispatcher for HttpDispatcher {
    async fn disperse_batch(
        &self,
        state: Arc<IndexedOperatorState>,
        blobs: Vec<EncodedBlob>,
        batch_header: BatchHeader,
    ) -> mpsc::Receiver<SigningMessage> {
        let (tx, rx) = mpsc::channel(state.indexed_operators.len().max(1));
        let batch_header_hash = batch_header.hash();
        let blobs = Arc::new(blobs);

        for (operator_id, operator) in state.indexed_operators.clone() {
            let dispatcher = self.clone();
            let blobs = Arc::clone(&blobs);
            let tx = tx.clone();
            tokio::spawn(async move {
                let started = Instant::now();
                let messages: Vec<BlobMessage> = blobs
                    .iter()
                    .map(|blob| BlobMessage {
                        blob_header: blob.blob_header.clone(),
                        bundles: blob.bundles_by_operator.get(&operator_id).cloned().unwrap_or_default(),
                    })
                    .collect();
                let result = if blobs.iter().any(|blob| blob.bundles_by_operator.contains_key(&operator_id)) {
                    dispatcher
                        .send_blobs_to_operator(messages, batch_header, operator, dispatcher.timeout)
                        .await
                        .map(|signatures| Signature::aggregate(&signatures))
                } else {
                    Err(DispatchError::NotInAnyQuorum(operator_id))
                };
                let _ = tx.send(signing_message(operator_id, batch_header_hash, started, result)).await;
            });
        }
        rx
    }

    async fn send_blobs_to_operator(
        &self,
        blobs: Vec<BlobMessage>,
        batch_header: BatchHeader,
        operator: IndexedOperatorInfo,
        timeout: Duration,
    ) -> Result<Vec<Signature>, DispatchError> {
        debug!(component = "Dispatcher", socket = %operator.socket, num_blobs = blobs.len(), "Sending chunks to operator");
        let request = StoreChunksRequest { batch_header: &batch_header, blobs: &blobs };
        let reply: StoreChunksReply = self.post(&operator.socket, STORE_CHUNKS_PATH, &request, timeout).await?;
        if reply.signatures.len() != blobs.len() {
            return Err(DispatchError::InvalidReply {
                socket: operator.socket,
                message: format!("expected {} signatures, got {}", blobs.len(), reply.signatures.len()),
            });
        }
        Ok(reply.signatures)
    }

    async fn attest_batch(
        &self,
        state: Arc<IndexedOperatorState>,
        blob_header_hashes: Vec<B256>,
        batch_header: BatchHeader,
    ) -> Result<mpsc::Receiver<SigningMessage>, DispatchError> {
        let (tx, rx) = mpsc::channel(state.indexed_operators.len().max(1));
        let batch_header_hash = batch_header.hash();
        let blob_header_hashes = Arc::new(blob_header_hashes);

        for (operator_id, operator) in state.indexed_operators.clone() {
            let dispatcher = self.clone();
            let hashes = Arc::clone(&blob_header_hashes);
            let tx = tx.clone();
            tokio::spawn(async move {
                let started = Instant::now();
                let result = dispatcher.attest(&operator, &hashes, &batch_header).await;
                if let Err(err) = &result {
                    warn!(component = "Dispatcher", %operator_id, socket = %operator.socket, error = %err, "Attestation request failed");
                }
                let _ = tx.send(signing_message(operator_id, batch_header_hash, started, result)).await;
            });
        }
        Ok(rx)
    }
}
