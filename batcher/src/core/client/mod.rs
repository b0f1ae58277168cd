// Collaborator contracts consumed by the pipeline, with their production and in-memory implementations

pub mod aggregator;
pub mod blob_store;
pub mod chain_state;
pub mod dispatcher;
pub mod encoder;
pub mod minibatch_store;
pub mod transactor;

// Re-export commonly used types
pub use aggregator::{stake::StakeSignatureAggregator, SignatureAggregator};
pub use blob_store::{memory::InMemoryBlobStore, BlobStore};
pub use chain_state::{file::FileChainState, IndexedChainState};
pub use dispatcher::{http::HttpDispatcher, Dispatcher};
pub use encoder::{http::HttpEncoderClient, EncoderClient};
pub use minibatch_store::{memory::InMemoryMinibatchStore, MinibatchStore};
pub use transactor::{ethereum::EthereumTransactor, Transactor};
