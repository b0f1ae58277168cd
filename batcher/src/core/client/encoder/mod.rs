pub mod error;
pub mod http;

use async_trait::async_trait;
pub use error::EncoderError;

use crate::types::encoding::{BlobCommitments, Chunk, EncodingParams};

/// Erasure-codes a blob and commits to it.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait EncoderClient: Send + Sync {
    async fn encode_blob(
        &self,
        data: Vec<u8>,
        params: EncodingParams,
    ) -> Result<(BlobCommitments, Vec<Chunk>), EncoderError>;
}
