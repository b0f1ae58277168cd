use std::time::Duration;

use crate::cli::finalizer::FinalizerCliArgs;

#[derive(Debug, Clone)]
pub struct FinalizerConfig {
    pub loop_interval: Duration,
    /// Timeout of each RPC call.
    pub timeout: Duration,
    pub num_blobs_per_fetch: usize,
    pub num_workers: usize,
}

impl Default for FinalizerConfig {
    fn default() -> Self {
        Self {
            loop_interval: Duration::from_secs(6 * 60),
            timeout: Duration::from_secs(10),
            num_blobs_per_fetch: 1000,
            num_workers: 4,
        }
    }
}

impl From<FinalizerCliArgs> for FinalizerConfig {
    fn from(args: FinalizerCliArgs) -> Self {
        Self {
            loop_interval: Duration::from_secs(args.finalizer_interval_seconds),
            timeout: Duration::from_secs(args.finalizer_timeout_seconds),
            num_blobs_per_fetch: args.finalizer_num_blobs_per_fetch,
            num_workers: args.finalizer_num_workers,
        }
    }
}
