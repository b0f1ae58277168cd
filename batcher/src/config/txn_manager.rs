use std::time::Duration;

use crate::cli::txn_manager::TxnManagerCliArgs;

#[derive(Debug, Clone)]
pub struct TxnManagerConfig {
    /// Capacity of the request and receipt queues.
    pub queue_size: usize,
    /// How long a sent transaction may stay unmined before it is resent with more gas.
    pub txn_refresh_interval: Duration,
}

impl Default for TxnManagerConfig {
    fn default() -> Self {
        Self { queue_size: 128, txn_refresh_interval: Duration::from_secs(6 * 60) }
    }
}

impl From<TxnManagerCliArgs> for TxnManagerConfig {
    fn from(args: TxnManagerCliArgs) -> Self {
        Self { queue_size: args.queue_size, txn_refresh_interval: Duration::from_secs(args.txn_refresh_interval_seconds) }
    }
}
