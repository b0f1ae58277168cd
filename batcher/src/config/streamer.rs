use std::time::Duration;

use crate::cli::streamer::StreamerCliArgs;
use crate::error::EncodingStreamerError;

#[derive(Debug, Clone)]
pub struct StreamerConfig {
    /// Order of the structured reference string; bounds `chunk_length * num_chunks`.
    pub srs_order: u64,
    pub encoding_request_timeout: Duration,
    pub chain_state_timeout: Duration,
    /// Maximum number of encoding jobs allowed to wait in the worker pool.
    pub encoding_queue_limit: usize,
    /// Target number of chunks per encoded blob, 0 for no target.
    pub target_num_chunks: u64,
    pub max_blobs_to_fetch_from_store: usize,
    /// Blocks subtracted from the chain head to pick the reference block.
    pub finalization_block_delay: u64,
    /// Encoded bytes that trigger a minibatch and cap its size.
    pub batch_size_limit: u64,
}

impl StreamerConfig {
    pub fn validate(&self) -> Result<(), EncodingStreamerError> {
        if self.encoding_queue_limit == 0 {
            return Err(EncodingStreamerError::InvalidConfig(
                "encoding queue limit should be greater than 0".to_string(),
            ));
        }
        Ok(())
    }
}

impl Default for StreamerConfig {
    fn default() -> Self {
        Self {
            srs_order: 268_435_456,
            encoding_request_timeout: Duration::from_secs(20),
            chain_state_timeout: Duration::from_secs(10),
            encoding_queue_limit: 100,
            target_num_chunks: 0,
            max_blobs_to_fetch_from_store: 100,
            finalization_block_delay: 75,
            batch_size_limit: 10 * 1024 * 1024,
        }
    }
}

impl From<StreamerCliArgs> for StreamerConfig {
    fn from(args: StreamerCliArgs) -> Self {
        Self {
            srs_order: args.srs_order,
            encoding_request_timeout: Duration::from_secs(args.encoding_request_timeout_seconds),
            chain_state_timeout: Duration::from_secs(args.chain_state_timeout_seconds),
            encoding_queue_limit: args.encoding_queue_limit,
            target_num_chunks: args.target_num_chunks,
            max_blobs_to_fetch_from_store: args.max_blobs_to_fetch_from_store,
            finalization_block_delay: args.finalization_block_delay,
            batch_size_limit: args.batch_size_limit_mib * 1024 * 1024,
        }
    }
}
