// node/src/lib.rs
pub mod config;

pub use config::{NetworkConfig, NodeConfig};
