use thiserror::Error;

use crate::layer_dag::layer::Layer;

/// Unified error type for the layered DAG engine
#[derive(Debug, Error)]
pub enum DagError {
    /// A dependency sits in the same or a higher layer than its dependent
    #[error(
        "Layering violation: {node_id} (layer {node_layer}) cannot depend on {dependency_id} (layer {dependency_layer})"
    )]
    LayeringViolation {
        node_id: String,
        node_layer: Layer,
        dependency_id: String,
        dependency_layer: Layer,
    },

    #[error("Node already exists: {0}")]
    DuplicateNode(String),

    #[error("Node not found: {0}")]
    NodeNotFound(String),

    /// A declared dependency was never registered
    #[error("Dependency not found: {dependency_id} (required by {node_id})")]
    MissingDependency {
        node_id: String,
        dependency_id: String,
    },

    /// A registered dependency produced no result in this run
    #[error("Upstream dependency did not complete: {dependency_id} (required by {node_id})")]
    UpstreamFailed {
        node_id: String,
        dependency_id: String,
    },

    /// The node's own action failed; the original error is kept in `error`
    #[error("Node execution failed: {node_id} - {error}")]
    NodeExecution {
        node_id: String,
        error: anyhow::Error,
    },

    #[error("Cycle detected: {node_id} could not be ordered")]
    CycleDetected { node_id: String },

    #[error("Configuration error: {message}")]
    Configuration {
        message: String,
        field: Option<String>,
    },

    #[error("Serialization failed: {format}")]
    Serialization {
        format: String,
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },

    #[error("IO operation failed: {operation}")]
    Io {
        operation: String,
        #[source]
        source: std::io::Error,
    },
}

impl DagError {
    pub fn layering_violation<S: Into<String>, D: Into<String>>(
        node_id: S,
        node_layer: Layer,
        dependency_id: D,
        dependency_layer: Layer,
    ) -> Self {
        Self::LayeringViolation {
            node_id: node_id.into(),
            node_layer,
            dependency_id: dependency_id.into(),
            dependency_layer,
        }
    }

    pub fn missing_dependency<S: Into<String>, D: Into<String>>(node_id: S, dependency_id: D) -> Self {
        Self::MissingDependency {
            node_id: node_id.into(),
            dependency_id: dependency_id.into(),
        }
    }

    pub fn upstream_failed<S: Into<String>, D: Into<String>>(node_id: S, dependency_id: D) -> Self {
        Self::UpstreamFailed {
            node_id: node_id.into(),
            dependency_id: dependency_id.into(),
        }
    }

    pub fn node_execution<S: Into<String>>(node_id: S, error: anyhow::Error) -> Self {
        Self::NodeExecution {
            node_id: node_id.into(),
            error,
        }
    }

    /// Create a configuration error
    pub fn configuration<S: Into<String>>(message: S) -> Self {
        Self::Configuration {
            message: message.into(),
            field: None,
        }
    }

    /// Create a configuration error pointing at a field
    pub fn configuration_field<S: Into<String>, F: Into<String>>(message: S, field: F) -> Self {
        Self::Configuration {
            message: message.into(),
            field: Some(field.into()),
        }
    }

    pub fn serialization<S: Into<String>, E: std::error::Error + Send + Sync + 'static>(
        format: S,
        source: E,
    ) -> Self {
        Self::Serialization {
            format: format.into(),
            source: Box::new(source),
        }
    }

    pub fn io<S: Into<String>>(operation: S, source: std::io::Error) -> Self {
        Self::Io {
            operation: operation.into(),
            source,
        }
    }

    /// The node an error is attributed to, if any
    pub fn node_id(&self) -> Option<&str> {
        match self {
            Self::LayeringViolation { node_id, .. }
            | Self::MissingDependency { node_id, .. }
            | Self::UpstreamFailed { node_id, .. }
            | Self::NodeExecution { node_id, .. }
            | Self::CycleDetected { node_id } => Some(node_id),
            Self::DuplicateNode(id) | Self::NodeNotFound(id) => Some(id),
            _ => None,
        }
    }

    /// The error returned by the node's own action, for downcasting
    pub fn node_error(&self) -> Option<&anyhow::Error> {
        match self {
            Self::NodeExecution { error, .. } => Some(error),
            _ => None,
        }
    }

    /// Get error category for metrics/logging
    pub fn category(&self) -> &'static str {
        match self {
            Self::LayeringViolation { .. } => "layering",
            Self::DuplicateNode(_) => "duplicate",
            Self::NodeNotFound(_) => "not_found",
            Self::MissingDependency { .. } => "missing_dependency",
            Self::UpstreamFailed { .. } => "upstream_failed",
            Self::NodeExecution { .. } => "execution",
            Self::CycleDetected { .. } => "cycle",
            Self::Configuration { .. } => "configuration",
            Self::Serialization { .. } => "serialization",
            Self::Io { .. } => "io",
        }
    }
}

/// Result type alias for convenience
pub type Result<T> = std::result::Result<T, DagError>;

impl From<std::io::Error> for DagError {
    fn from(err: std::io::Error) -> Self {
        Self::io("io_operation", err)
    }
}

impl From<serde_json::Error> for DagError {
    fn from(err: serde_json::Error) -> Self {
        Self::serialization("json", err)
    }
}

impl From<serde_yaml::Error> for DagError {
    fn from(err: serde_yaml::Error) -> Self {
        Self::serialization("yaml", err)
    }
}
