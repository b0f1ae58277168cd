pub mod batch_confirmer;
pub mod common;
pub mod encoding_streamer;
pub mod orchestrator;
pub mod txn_manager;
