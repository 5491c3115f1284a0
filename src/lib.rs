// Core infrastructure modules
pub mod core {
    pub mod config;
    pub mod errors;
}

// Layered DAG execution
pub mod layer_dag;

// Re-exports for convenience
pub use crate::core::config::{EngineConfig, UpstreamFailurePolicy};
pub use crate::core::errors::{DagError, Result};
pub use layer_dag::*;
