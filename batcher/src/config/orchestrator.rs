use std::time::Duration;

use crate::cli::RunCmd;
use crate::config::{BatchConfirmerConfig, FinalizerConfig, MinibatcherConfig, StreamerConfig, TxnManagerConfig};

/// Parameters of the whole pipeline.
#[derive(Debug, Clone)]
pub struct OrchestratorConfig {
    pub streamer: StreamerConfig,
    pub minibatcher: MinibatcherConfig,
    pub batch_confirmer: BatchConfirmerConfig,
    pub txn_manager: TxnManagerConfig,
    pub finalizer: FinalizerConfig,
    /// How long shutdown waits for background tasks before giving up on them.
    pub shutdown_timeout: Duration,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            streamer: StreamerConfig::default(),
            minibatcher: MinibatcherConfig::default(),
            batch_confirmer: BatchConfirmerConfig::default(),
            txn_manager: TxnManagerConfig::default(),
            finalizer: FinalizerConfig::default(),
            shutdown_timeout: Duration::from_secs(30),
        }
    }
}

impl From<&RunCmd> for OrchestratorConfig {
    fn from(cmd: &RunCmd) -> Self {
        Self {
            streamer: cmd.streamer_args.clone().into(),
            minibatcher: cmd.minibatcher_args.clone().into(),
            batch_confirmer: cmd.batch_confirmer_args.clone().into(),
            txn_manager: cmd.txn_manager_args.clone().into(),
            finalizer: cmd.finalizer_args.clone().into(),
            shutdown_timeout: Duration::from_secs(cmd.orchestrator_args.shutdown_timeout_seconds),
        }
    }
}
