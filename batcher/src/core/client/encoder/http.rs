use std::time::Duration;

use alloy::hex;
use alloy::primitives::{Bytes, U256};
use async_trait::async_trait;
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use tracing::debug;
use url::Url;

use super::{EncoderClient, EncoderError};
use crate::types::encoding::{BlobCommitments, Chunk, EncodingParams, G1Point};

const ENCODE_PATH: &str = "v1/encode";

#[derive(Debug, Serialize)]
struct EncodeBlobRequest {
    data: String,
    chunk_length: u64,
    num_chunks: u64,
}

#[derive(Debug, Deserialize)]
struct EncodedCommitment {
    x: U256,
    y: U256,
}

#[derive(Debug, Deserialize)]
struct EncodeBlobResponse {
    commitment: EncodedCommitment,
    length_commitment: Bytes,
    length_proof: Bytes,
    length: u32,
    chunks: Vec<String>,
}

/// `EncoderClient` talking JSON to a remote encoder service.
pub struct HttpEncoderClient {
    client: reqwest::Client,
    endpoint: Url,
}

impl HttpEncoderClient {
    pub fn new(base_url: &Url, request_timeout: Duration) -> Result<Self, EncoderError> {
        let endpoint = base_url.join(ENCODE_PATH).map_err(|e| EncoderError::Url(e.to_string()))?;
        let client = reqwest::Client::builder()
            .timeout(request_timeout)
            .build()
            .map_err(EncoderError::from_reqwest_error)?;
        Ok(Self { client, endpoint })
    }
}

#[async_trait]
impl EncoderClient for HttpEncoderClient {
    async fn encode_blob(
        &self,
        data: Vec<u8>,
        params: EncodingParams,
    ) -> Result<(BlobCommitments, Vec<Chunk>), EncoderError> {
        let request = EncodeBlobRequest {
            data: hex::encode(&data),
            chunk_length: params.chunk_length,
            num_chunks: params.num_chunks,
        };
        debug!(endpoint = %self.endpoint, size = data.len(), ?params, "Sending encode request");

        let response =
            self.client.post(self.endpoint.clone()).json(&request).send().await.map_err(EncoderError::from_reqwest_error)?;

        let status = response.status();
        if !status.is_success() {
            let message = response.text().await.unwrap_or_default();
            return Err(match status {
                StatusCode::TOO_MANY_REQUESTS => EncoderError::RateLimited(message),
                _ => EncoderError::Api { status, message },
            });
        }

        let body: EncodeBlobResponse = response.json().await.map_err(|e| EncoderError::Parse(e.to_string()))?;
        let chunks = body
            .chunks
            .iter()
            .map(|chunk| hex::decode(chunk).map(Bytes::from).map_err(|e| EncoderError::Parse(e.to_string())))
            .collect::<Result<Vec<Chunk>, _>>()?;

        let commitments = BlobCommitments {
            commitment: G1Point::new(body.commitment.x, body.commitment.y),
            length_commitment: body.length_commitment,
            length_proof: body.length_proof,
            length: body.length,
        };
        Ok((commitments, chunks))
    }
}
