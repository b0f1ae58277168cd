use clap::Args;

/// Parameters of the process itself.
#[derive(Debug, Clone, Args)]
pub struct OrchestratorCliArgs {
    /// Time allowed for background tasks to stop after a shutdown signal, in seconds.
    #[arg(env = "DISPERSER_BATCHER_SHUTDOWN_TIMEOUT_SECONDS", long, default_value = "30")]
    pub shutdown_timeout_seconds: u64,
}
