//! The batching pipeline: encoding, minibatch dispersal, attestation, confirmation and finalization.

pub mod batch_confirmer;
pub mod encoded_blob_store;
pub mod encoding_streamer;
pub mod finalizer;
pub mod minibatcher;
pub mod notifier;
pub mod orchestrator;
pub mod txn_manager;
pub mod worker_pool;

pub use orchestrator::{Collaborators, Orchestrator};
