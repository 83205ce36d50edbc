// Core modules
pub mod db;
pub mod indicators;
pub mod ledger;
pub mod models;
pub mod notify;
pub mod sim;
pub mod strategy;
pub mod throttle;

// Re-export commonly used types
pub use models::*;
pub use sim::{EngineParams, Simulator};
pub use strategy::SignalStrategy;

// Error handling
pub type Result<T> = std::result::Result<T, Box<dyn std::error::Error + Send + Sync>>;
