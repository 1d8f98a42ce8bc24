// Core modules
pub mod config;
pub mod exchange;
pub mod lifecycle;
pub mod models;
pub mod notify;
pub mod risk;
pub mod shutdown;
pub mod sizing;
pub mod state;
pub mod stats;
pub mod strategy;

// Re-export commonly used types
pub use config::Settings;
pub use models::*;

// Error handling
pub type Result<T> = std::result::Result<T, Box<dyn std::error::Error + Send + Sync>>;
