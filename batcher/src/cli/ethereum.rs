use std::time::Duration;

use alloy::primitives::Address;
use batcher_ethereum_client::EthereumClientValidatedArgs;
use clap::Args;
use url::Url;

/// Parameters of the settlement chain connection.
#[derive(Debug, Clone, Args)]
pub struct EthereumCliArgs {
    /// The URL of the Ethereum RPC node.
    #[arg(env = "DISPERSER_BATCHER_ETHEREUM_RPC_URL", long)]
    pub ethereum_rpc_url: Url,

    /// The private key of the batcher account.
    #[arg(env = "DISPERSER_BATCHER_ETHEREUM_PRIVATE_KEY", long, hide_env_values = true)]
    pub ethereum_private_key: String,

    /// The address of the service manager contract batches are confirmed on.
    #[arg(env = "DISPERSER_BATCHER_SERVICE_MANAGER_ADDRESS", long)]
    pub service_manager_address: Address,

    /// Blocks a confirmation transaction must be buried under.
    #[arg(env = "DISPERSER_BATCHER_NUM_CONFIRMATIONS", long, default_value = "0")]
    pub num_confirmations: u64,

    /// Interval between receipt polls while waiting for a transaction, in milliseconds.
    #[arg(env = "DISPERSER_BATCHER_RECEIPT_POLL_INTERVAL_MS", long, default_value = "3000")]
    pub receipt_poll_interval_ms: u64,
}

impl From<EthereumCliArgs> for EthereumClientValidatedArgs {
    fn from(args: EthereumCliArgs) -> Self {
        Self {
            rpc_url: args.ethereum_rpc_url,
            private_key: args.ethereum_private_key,
            num_confirmations: args.num_confirmations,
            receipt_poll_interval: Duration::from_millis(args.receipt_poll_interval_ms),
        }
    }
}
