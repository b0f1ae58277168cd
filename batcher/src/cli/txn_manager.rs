use clap::Args;

/// Parameters of the transaction manager.
#[derive(Debug, Clone, Args)]
pub struct TxnManagerCliArgs {
    /// Capacity of the transaction and receipt queues.
    #[arg(env = "DISPERSER_BATCHER_TXN_QUEUE_SIZE", long = "txn-queue-size", default_value = "128")]
    pub queue_size: usize,

    /// Time a transaction may stay unmined before it is resent with more gas, in seconds.
    #[arg(env = "DISPERSER_BATCHER_TXN_REFRESH_INTERVAL_SECONDS", long, default_value = "360")]
    pub txn_refresh_interval_seconds: u64,
}
