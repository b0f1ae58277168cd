use std::sync::Arc;
use std::time::SystemTime;

use batcher_chain_client_interface::EthClient;
use tokio::sync::{mpsc, Mutex};
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, error, info, warn};

use crate::config::OrchestratorConfig;
use crate::core::assignment::AssignmentCoordinator;
use crate::core::client::{
    BlobStore, Dispatcher, EncoderClient, IndexedChainState, MinibatchStore, SignatureAggregator, Transactor,
};
use crate::error::{BatcherResult, EncodingStreamerError, MinibatcherError};
use crate::pipeline::batch_confirmer::{BatchConfirmer, BatchConfirmerDeps, ConfirmationMetadata};
use crate::pipeline::encoding_streamer::EncodingStreamer;
use crate::pipeline::finalizer::Finalizer;
use crate::pipeline::minibatcher::Minibatcher;
use crate::pipeline::notifier::EncodedSizeNotifier;
use crate::pipeline::txn_manager::{ReceiptOrErr, TxnManager};
use crate::pipeline::worker_pool::WorkerPool;
use crate::utils::metrics::BatcherMetrics;

/// Everything the pipeline talks to outside of its own process.
#[derive(Clone)]
pub struct Collaborators {
    pub blob_store: Arc<dyn BlobStore>,
    pub minibatch_store: Arc<dyn MinibatchStore>,
    pub encoder_client: Arc<dyn EncoderClient>,
    pub dispatcher: Arc<dyn Dispatcher>,
    pub chain_state: Arc<dyn IndexedChainState>,
    pub assignment_coordinator: Arc<dyn AssignmentCoordinator>,
    pub aggregator: Arc<dyn SignatureAggregator>,
    pub transactor: Arc<dyn Transactor>,
    pub eth_client: Arc<dyn EthClient>,
}

/// Composition root of the pipeline. Owns the shutdown token and every background task.
pub struct Orchestrator {
    config: OrchestratorConfig,
    streamer: Arc<EncodingStreamer>,
    minibatcher: Arc<Minibatcher>,
    txn_manager: Arc<TxnManager<ConfirmationMetadata>>,
    confirmer: Arc<BatchConfirmer>,
    finalizer: Arc<Finalizer>,
    batch_trigger: Mutex<Option<mpsc::Receiver<()>>>,
    receipts: Mutex<Option<mpsc::Receiver<ReceiptOrErr<ConfirmationMetadata>>>>,
    heartbeat: Option<mpsc::Sender<SystemTime>>,
    shutdown_token: CancellationToken,
    tracker: TaskTracker,
}

impl Orchestrator {
    /// Wires every component. `heartbeat` receives a best-effort timestamp on every minibatch tick.
    pub fn new(
        config: OrchestratorConfig,
        collaborators: Collaborators,
        metrics: Arc<BatcherMetrics>,
        heartbeat: Option<mpsc::Sender<SystemTime>>,
    ) -> BatcherResult<Self> {
        let shutdown_token = CancellationToken::new();

        let (notifier, batch_trigger) = EncodedSizeNotifier::new(config.streamer.batch_size_limit);
        let streamer = Arc::new(EncodingStreamer::new(
            config.streamer.clone(),
            Arc::clone(&collaborators.blob_store),
            Arc::clone(&collaborators.chain_state),
            Arc::clone(&collaborators.encoder_client),
            Arc::clone(&collaborators.assignment_coordinator),
            notifier,
            WorkerPool::new(config.streamer.encoding_queue_limit),
            Arc::clone(&metrics),
        )?);

        let minibatcher = Arc::new(Minibatcher::new(
            config.minibatcher.clone(),
            Arc::clone(&streamer),
            Arc::clone(&collaborators.blob_store),
            Arc::clone(&collaborators.minibatch_store),
            Arc::clone(&collaborators.dispatcher),
            WorkerPool::new(config.minibatcher.max_num_connections),
            Arc::clone(&metrics),
            shutdown_token.child_token(),
        ));

        let (txn_manager, receipts) =
            TxnManager::new(config.txn_manager.clone(), Arc::clone(&collaborators.eth_client), Arc::clone(&metrics));
        let txn_manager = Arc::new(txn_manager);

        let confirmer = Arc::new(BatchConfirmer::new(
            config.batch_confirmer.clone(),
            BatchConfirmerDeps {
                blob_store: Arc::clone(&collaborators.blob_store),
                minibatch_store: Arc::clone(&collaborators.minibatch_store),
                dispatcher: Arc::clone(&collaborators.dispatcher),
                aggregator: Arc::clone(&collaborators.aggregator),
                transactor: Arc::clone(&collaborators.transactor),
                eth_client: Arc::clone(&collaborators.eth_client),
            },
            Arc::clone(&streamer),
            Arc::clone(&minibatcher),
            Arc::clone(&txn_manager),
            Arc::clone(&metrics),
        ));

        let finalizer = Arc::new(Finalizer::new(
            config.finalizer.clone(),
            Arc::clone(&collaborators.blob_store),
            Arc::clone(&collaborators.eth_client),
            metrics,
        ));

        Ok(Self {
            config,
            streamer,
            minibatcher,
            txn_manager,
            confirmer,
            finalizer,
            batch_trigger: Mutex::new(Some(batch_trigger)),
            receipts: Mutex::new(Some(receipts)),
            heartbeat,
            shutdown_token,
            tracker: TaskTracker::new(),
        })
    }

    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown_token.clone()
    }

    /// Starts every component. Returns once the tasks are spawned.
    pub async fn start(self: &Arc<Self>) {
        self.streamer.start(self.shutdown_token.child_token(), &self.tracker);
        self.txn_manager.start(self.shutdown_token.child_token(), &self.tracker).await;
        self.confirmer.start(self.shutdown_token.child_token(), &self.tracker);
        self.finalizer.start(self.shutdown_token.child_token(), &self.tracker);

        if let Some(receipts) = self.receipts.lock().await.take() {
            self.spawn_receipt_processor(receipts);
        }
        if let Some(batch_trigger) = self.batch_trigger.lock().await.take() {
            self.spawn_minibatch_loop(batch_trigger);
        }
        info!(component = "Orchestrator", "Pipeline started");
    }

    fn spawn_receipt_processor(self: &Arc<Self>, mut receipts: mpsc::Receiver<ReceiptOrErr<ConfirmationMetadata>>) {
        let orchestrator = Arc::clone(self);
        let token = self.shutdown_token.child_token();
        self.tracker.spawn(async move {
            loop {
                tokio::select! {
                    _ = token.cancelled() => break,
                    outcome = receipts.recv() => {
                        let Some(outcome) = outcome else { break };
                        if let Err(err) = orchestrator.confirmer.process_confirmed_batch(outcome).await {
                            error!(component = "Orchestrator", error = %err, "Error processing confirmed batch");
                        }
                    }
                }
            }
            debug!(component = "Orchestrator", "Receipt processor stopped");
        });
    }

    fn spawn_minibatch_loop(self: &Arc<Self>, mut batch_trigger: mpsc::Receiver<()>) {
        let orchestrator = Arc::clone(self);
        let token = self.shutdown_token.child_token();
        self.tracker.spawn(async move {
            let mut ticker = tokio::time::interval(orchestrator.config.minibatcher.pull_interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = token.cancelled() => break,
                    _ = ticker.tick() => {
                        orchestrator.handle_minibatch_tick("interval").await;
                    }
                    Some(()) = batch_trigger.recv() => {
                        orchestrator.handle_minibatch_tick("size threshold").await;
                        ticker.reset();
                    }
                }
            }
            info!(component = "Orchestrator", "Minibatch loop stopped");
        });
    }

    async fn handle_minibatch_tick(&self, trigger: &str) {
        debug!(component = "Orchestrator", trigger, "Handling minibatch");
        match self.minibatcher.handle_single_minibatch().await {
            Ok(()) => {}
            Err(MinibatcherError::EncodingStreamer(EncodingStreamerError::NoEncodedResults)) => {
                info!(component = "Orchestrator", "No encoded results to make a minibatch with")
            }
            Err(err) => error!(component = "Orchestrator", error = %err, "Error handling minibatch"),
        }
        self.signal_liveness();
    }

    fn signal_liveness(&self) {
        let Some(heartbeat) = &self.heartbeat else { return };
        match heartbeat.try_send(SystemTime::now()) {
            Ok(()) => debug!(component = "Orchestrator", "Heartbeat sent"),
            Err(_) => warn!(component = "Orchestrator", "Heartbeat skipped, receiver not keeping up"),
        }
    }

    /// Cancels every task and waits for them up to the configured shutdown timeout.
    pub async fn shutdown(&self) {
        info!(component = "Orchestrator", "Shutting down pipeline");
        self.shutdown_token.cancel();
        self.tracker.close();
        if tokio::time::timeout(self.config.shutdown_timeout, self.tracker.wait()).await.is_err() {
            warn!(component = "Orchestrator", timeout = ?self.config.shutdown_timeout, "Timed out waiting for tasks to stop");
        } else {
            info!(component = "Orchestrator", "Pipeline stopped");
        }
    }
}
