// Core modules
pub mod config;
pub mod db;
pub mod error;
pub mod ingest;
pub mod models;
pub mod persistence;
pub mod strategy;
pub mod window;

// Re-export commonly used types
pub use error::AnalysisError;
pub use models::*;

// Error handling for service wiring (transport, bootstrap)
pub type Result<T> = std::result::Result<T, Box<dyn std::error::Error + Send + Sync>>;
