use clap::{Parser, Subcommand};

pub mod batch_confirmer;
pub mod clients;
pub mod ethereum;
pub mod finalizer;
pub mod minibatcher;
pub mod orchestrator;
pub mod streamer;
pub mod txn_manager;

#[derive(Parser, Debug)]
#[command(
    name = "disperser-batcher",
    about = "Disperser batcher - encodes pending blobs, disperses them to operators and confirms batches on chain"
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Run the batching pipeline
    Run {
        #[command(flatten)]
        run_command: Box<RunCmd>,
    },
}

#[derive(Parser, Debug, Clone)]
pub struct RunCmd {
    #[clap(flatten, next_help_heading = "Encoding streamer")]
    pub streamer_args: streamer::StreamerCliArgs,

    #[clap(flatten, next_help_heading = "Minibatcher")]
    pub minibatcher_args: minibatcher::MinibatcherCliArgs,

    #[clap(flatten, next_help_heading = "Batch confirmer")]
    pub batch_confirmer_args: batch_confirmer::BatchConfirmerCliArgs,

    #[clap(flatten, next_help_heading = "Transaction manager")]
    pub txn_manager_args: txn_manager::TxnManagerCliArgs,

    #[clap(flatten, next_help_heading = "Finalizer")]
    pub finalizer_args: finalizer::FinalizerCliArgs,

    #[clap(flatten, next_help_heading = "Ethereum")]
    pub ethereum_args: ethereum::EthereumCliArgs,

    #[clap(flatten, next_help_heading = "Clients")]
    pub clients_args: clients::ClientsCliArgs,

    #[clap(flatten, next_help_heading = "Process")]
    pub orchestrator_args: orchestrator::OrchestratorCliArgs,
}
