pub mod cli;
pub mod config;
pub mod core;
pub mod error;
pub mod pipeline;
pub mod types;
pub mod utils;

#[cfg(test)]
pub mod tests;

// Re-export commonly used item
pub use error::{BatcherError, BatcherResult};
