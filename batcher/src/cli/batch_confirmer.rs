use clap::Args;

/// Parameters of the batch confirmer.
#[derive(Debug, Clone, Args)]
pub struct BatchConfirmerCliArgs {
    /// Interval between confirmation rounds, in seconds.
    #[arg(env = "DISPERSER_BATCHER_CONFIRMER_PULL_INTERVAL_SECONDS", id = "confirmer_pull_interval_seconds", long = "confirmer-pull-interval-seconds", default_value = "5")]
    pub pull_interval_seconds: u64,

    /// Time a formed batch may take to disperse, in seconds.
    #[arg(env = "DISPERSER_BATCHER_DISPERSAL_TIMEOUT_SECONDS", long, default_value = "120")]
    pub dispersal_timeout_seconds: u64,

    /// Interval between dispersal status checks, in milliseconds.
    #[arg(env = "DISPERSER_BATCHER_DISPERSAL_STATUS_CHECK_INTERVAL_MS", long, default_value = "1000")]
    pub dispersal_status_check_interval_ms: u64,

    /// Time allowed to collect attestation signatures, in seconds.
    #[arg(env = "DISPERSER_BATCHER_ATTESTATION_TIMEOUT_SECONDS", long, default_value = "20")]
    pub attestation_timeout_seconds: u64,

    /// Times a blob is requeued after a failed confirmation before it is marked failed.
    #[arg(env = "DISPERSER_BATCHER_CONFIRMER_MAX_NUM_RETRIES_PER_BLOB", id = "confirmer_max_num_retries_per_blob", long = "confirmer-max-num-retries-per-blob", default_value = "2")]
    pub max_num_retries_per_blob: u32,
}
