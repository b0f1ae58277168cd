use std::time::Duration;

use crate::cli::batch_confirmer::BatchConfirmerCliArgs;

#[derive(Debug, Clone)]
pub struct BatchConfirmerConfig {
    pub pull_interval: Duration,
    /// How long a formed batch may take to finish dispersing.
    pub dispersal_timeout: Duration,
    pub dispersal_status_check_interval: Duration,
    pub attestation_timeout: Duration,
    pub max_num_retries_per_blob: u32,
}

impl Default for BatchConfirmerConfig {
    fn default() -> Self {
        Self {
            pull_interval: Duration::from_secs(5),
            dispersal_timeout: Duration::from_secs(120),
            dispersal_status_check_interval: Duration::from_secs(1),
            attestation_timeout: Duration::from_secs(20),
            max_num_retries_per_blob: 2,
        }
    }
}

impl From<BatchConfirmerCliArgs> for BatchConfirmerConfig {
    fn from(args: BatchConfirmerCliArgs) -> Self {
        Self {
            pull_interval: Duration::from_secs(args.pull_interval_seconds),
            dispersal_timeout: Duration::from_secs(args.dispersal_timeout_seconds),
            dispersal_status_check_interval: Duration::from_millis(args.dispersal_status_check_interval_ms),
            attestation_timeout: Duration::from_secs(args.attestation_timeout_seconds),
            max_num_retries_per_blob: args.max_num_retries_per_blob,
        }
    }
}
