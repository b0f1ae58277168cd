use clap::Args;

/// Parameters of the minibatcher.
#[derive(Debug, Clone, Args)]
pub struct MinibatcherCliArgs {
    /// Interval between minibatches, in seconds. Also the first dispersal timeout.
    #[arg(env = "DISPERSER_BATCHER_PULL_INTERVAL_SECONDS", long, default_value = "5")]
    pub pull_interval_seconds: u64,

    /// Maximum number of dispersals waiting for a connection.
    #[arg(env = "DISPERSER_BATCHER_MAX_NUM_CONNECTIONS", long, default_value = "256")]
    pub max_num_connections: usize,

    /// Times a blob is requeued before it is marked failed.
    #[arg(env = "DISPERSER_BATCHER_MAX_NUM_RETRIES_PER_BLOB", long, default_value = "2")]
    pub max_num_retries_per_blob: u32,

    /// Attempts made to send a minibatch to one operator.
    #[arg(env = "DISPERSER_BATCHER_MAX_NUM_RETRIES_PER_DISPERSAL", long, default_value = "3")]
    pub max_num_retries_per_dispersal: usize,
}
