use clap::Args;

/// Parameters of the finalizer.
#[derive(Debug, Clone, Args)]
pub struct FinalizerCliArgs {
    /// Interval between finalization rounds, in seconds.
    #[arg(env = "DISPERSER_BATCHER_FINALIZER_INTERVAL_SECONDS", long, default_value = "360")]
    pub finalizer_interval_seconds: u64,

    /// Timeout of each finalizer RPC call, in seconds.
    #[arg(env = "DISPERSER_BATCHER_FINALIZER_TIMEOUT_SECONDS", long, default_value = "10")]
    pub finalizer_timeout_seconds: u64,

    /// Confirmed blobs fetched per page.
    #[arg(env = "DISPERSER_BATCHER_FINALIZER_NUM_BLOBS_PER_FETCH", long, default_value = "1000")]
    pub finalizer_num_blobs_per_fetch: usize,

    /// Pages processed concurrently.
    #[arg(env = "DISPERSER_BATCHER_FINALIZER_NUM_WORKERS", long, default_value = "4")]
    pub finalizer_num_workers: usize,
}
