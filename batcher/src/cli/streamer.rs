use clap::Args;

/// Parameters of the encoding streamer.
#[derive(Debug, Clone, Args)]
pub struct StreamerCliArgs {
    /// Order of the SRS loaded by the encoders.
    #[arg(env = "DISPERSER_BATCHER_SRS_ORDER", long, default_value = "268435456")]
    pub srs_order: u64,

    /// Timeout of a single encoding request, in seconds.
    #[arg(env = "DISPERSER_BATCHER_ENCODING_REQUEST_TIMEOUT_SECONDS", long, default_value = "20")]
    pub encoding_request_timeout_seconds: u64,

    /// Timeout of operator state lookups, in seconds.
    #[arg(env = "DISPERSER_BATCHER_CHAIN_STATE_TIMEOUT_SECONDS", long, default_value = "10")]
    pub chain_state_timeout_seconds: u64,

    /// Maximum number of encoding requests waiting for a worker.
    #[arg(env = "DISPERSER_BATCHER_ENCODING_QUEUE_LIMIT", long, default_value = "100")]
    pub encoding_queue_limit: usize,

    /// Target number of chunks per blob. 0 picks the largest chunk length.
    #[arg(env = "DISPERSER_BATCHER_TARGET_NUM_CHUNKS", long, default_value = "0")]
    pub target_num_chunks: u64,

    /// Maximum number of blobs fetched from the blob store per encoding round.
    #[arg(env = "DISPERSER_BATCHER_MAX_BLOBS_TO_FETCH_FROM_STORE", long, default_value = "100")]
    pub max_blobs_to_fetch_from_store: usize,

    /// Number of blocks behind the chain head used as reference block.
    #[arg(env = "DISPERSER_BATCHER_FINALIZATION_BLOCK_DELAY", long, default_value = "75")]
    pub finalization_block_delay: u64,

    /// Encoded size, in MiB, that triggers a minibatch.
    #[arg(env = "DISPERSER_BATCHER_BATCH_SIZE_LIMIT_MIB", long, default_value = "10")]
    pub batch_size_limit_mib: u64,
}
