pub mod assignment;
pub mod client;
pub mod merkle;
