use std::sync::Arc;
use std::time::Duration;

use batcher_chain_client_interface::EthClient;
use batcher_ethereum_client::{EthereumClient, EthereumClientValidatedArgs};
use batcher_utils::metrics::Metrics;
use clap::Parser as _;
use disperser_batcher::cli::{Cli, Commands, RunCmd};
use disperser_batcher::config::OrchestratorConfig;
use disperser_batcher::core::assignment::StdAssignmentCoordinator;
use disperser_batcher::core::client::{
    EthereumTransactor, FileChainState, HttpDispatcher, HttpEncoderClient, InMemoryBlobStore, InMemoryMinibatchStore,
    StakeSignatureAggregator,
};
use disperser_batcher::pipeline::{Collaborators, Orchestrator};
use disperser_batcher::utils::logging::init_logging;
use disperser_batcher::utils::metrics::BatcherMetrics;
use disperser_batcher::{BatcherError, BatcherResult};
use dotenvy::dotenv;
use tracing::{debug, error, info};

/// Start the batcher
#[tokio::main]
async fn main() {
    dotenv().ok();
    init_logging();
    info!("Starting disperser batcher");
    let cli = Cli::parse();

    match &cli.command {
        Commands::Run { run_command } => {
            debug!("Executing run command with args: {:?}", run_command);
            if let Err(e) = run_batcher(run_command).await {
                error!(error = %e, error_chain = ?e, "Failed to run disperser batcher");
                panic!("Failed to run disperser batcher: {}", e);
            }
        }
    }
}

async fn run_batcher(run_cmd: &RunCmd) -> BatcherResult<()> {
    let config = OrchestratorConfig::from(run_cmd);

    let ethereum_args = EthereumClientValidatedArgs::from(run_cmd.ethereum_args.clone());
    let eth_client: Arc<dyn EthClient> = Arc::new(EthereumClient::new_with_args(&ethereum_args)?);
    let clients = &run_cmd.clients_args;
    let collaborators = Collaborators {
        blob_store: Arc::new(InMemoryBlobStore::new()),
        minibatch_store: Arc::new(InMemoryMinibatchStore::new()),
        encoder_client: Arc::new(HttpEncoderClient::new(
            &clients.encoder_url,
            Duration::from_secs(clients.encoder_timeout_seconds),
        )?),
        dispatcher: Arc::new(HttpDispatcher::new(Duration::from_secs(clients.operator_timeout_seconds))),
        chain_state: Arc::new(FileChainState::new(&clients.operator_state_file, Arc::clone(&eth_client))?),
        assignment_coordinator: Arc::new(StdAssignmentCoordinator),
        aggregator: Arc::new(StakeSignatureAggregator),
        transactor: Arc::new(EthereumTransactor::new(
            Arc::clone(&eth_client),
            run_cmd.ethereum_args.service_manager_address,
        )),
        eth_client,
    };
    debug!("Collaborators initialized");

    let metrics = Arc::new(BatcherMetrics::register());
    let orchestrator = Arc::new(Orchestrator::new(config, collaborators, metrics, None)?);
    orchestrator.start().await;
    info!("Disperser batcher started");

    tokio::signal::ctrl_c()
        .await
        .map_err(|e| BatcherError::RunCommand(format!("Failed to listen for ctrl+c: {e}")))?;

    orchestrator.shutdown().await;
    info!("Disperser batcher stopped");
    Ok(())
}
