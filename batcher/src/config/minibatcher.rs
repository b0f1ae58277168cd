use std::time::Duration;

use crate::cli::minibatcher::MinibatcherCliArgs;

#[derive(Debug, Clone)]
pub struct MinibatcherConfig {
    pub pull_interval: Duration,
    /// Dispersals allowed to wait in the pool before an iteration is skipped.
    pub max_num_connections: usize,
    pub max_num_retries_per_blob: u32,
    pub max_num_retries_per_dispersal: usize,
}

impl Default for MinibatcherConfig {
    fn default() -> Self {
        Self {
            pull_interval: Duration::from_secs(5),
            max_num_connections: 256,
            max_num_retries_per_blob: 2,
            max_num_retries_per_dispersal: 3,
        }
    }
}

impl From<MinibatcherCliArgs> for MinibatcherConfig {
    fn from(args: MinibatcherCliArgs) -> Self {
        Self {
            pull_interval: Duration::from_secs(args.pull_interval_seconds),
            max_num_connections: args.max_num_connections,
            max_num_retries_per_blob: args.max_num_retries_per_blob,
            max_num_retries_per_dispersal: args.max_num_retries_per_dispersal,
        }
    }
}
