//! Runtime parameters of every pipeline component, built from the CLI argument groups.

pub mod batch_confirmer;
pub mod finalizer;
pub mod minibatcher;
pub mod orchestrator;
pub mod streamer;
pub mod txn_manager;

pub use batch_confirmer::BatchConfirmerConfig;
pub use finalizer::FinalizerConfig;
pub use minibatcher::MinibatcherConfig;
pub use orchestrator::OrchestratorConfig;
pub use streamer::StreamerConfig;
pub use txn_manager::TxnManagerConfig;
