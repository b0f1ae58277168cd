use std::path::PathBuf;

use clap::Args;
use url::Url;

/// Endpoints of the encoder and the operator set.
#[derive(Debug, Clone, Args)]
pub struct ClientsCliArgs {
    /// Base URL of the encoder service.
    #[arg(env = "DISPERSER_BATCHER_ENCODER_URL", long)]
    pub encoder_url: Url,

    /// Timeout of the encoder HTTP client, in seconds.
    #[arg(env = "DISPERSER_BATCHER_ENCODER_TIMEOUT_SECONDS", long, default_value = "30")]
    pub encoder_timeout_seconds: u64,

    /// JSON file describing operators, their stakes and quorum aggregate keys.
    #[arg(env = "DISPERSER_BATCHER_OPERATOR_STATE_FILE", long)]
    pub operator_state_file: PathBuf,

    /// Timeout of a single operator request, in seconds.
    #[arg(env = "DISPERSER_BATCHER_OPERATOR_TIMEOUT_SECONDS", long, default_value = "10")]
    pub operator_timeout_seconds: u64,
}
