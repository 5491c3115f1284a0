use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::core::errors::{DagError, Result};

/// What to do with a node whose registered dependency produced no result
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum UpstreamFailurePolicy {
    /// Do not run the node; record an `UpstreamFailed` error for it
    #[default]
    Skip,
    /// Run the node with whatever inputs did resolve
    RunWithAvailableInputs,
}

/// Configuration for engine execution behavior
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Run independent nodes of the same topological wave concurrently
    #[serde(default)]
    pub enable_parallel_execution: bool,
    /// Maximum number of nodes executing at once in parallel mode
    #[serde(default = "default_max_parallel_nodes")]
    pub max_parallel_nodes: usize,
    /// Handling of nodes downstream of a failure
    #[serde(default)]
    pub upstream_failure: UpstreamFailurePolicy,
    /// A node is reported as slow once it exceeds `estimate * factor`
    #[serde(default = "default_performance_warning_factor")]
    pub performance_warning_factor: f64,
    /// Estimate applied to nodes that carry none (None = no warning for them)
    #[serde(default)]
    pub default_estimated_execution_ms: Option<u64>,
    /// Whole-run wall clock budget; exceeding it is logged
    #[serde(default = "default_run_time_budget_ms")]
    pub run_time_budget_ms: Option<u64>,
    /// Also layer-check dependencies that are not registered yet, using the
    /// layer encoded in their id
    #[serde(default)]
    pub check_unregistered_dependency_layers: bool,
}

fn default_max_parallel_nodes() -> usize {
    4
}

fn default_performance_warning_factor() -> f64 {
    1.0
}

fn default_run_time_budget_ms() -> Option<u64> {
    Some(50)
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            enable_parallel_execution: false,
            max_parallel_nodes: default_max_parallel_nodes(),
            upstream_failure: UpstreamFailurePolicy::default(),
            performance_warning_factor: default_performance_warning_factor(),
            default_estimated_execution_ms: None,
            run_time_budget_ms: default_run_time_budget_ms(),
            check_unregistered_dependency_layers: false,
        }
    }
}

impl EngineConfig {
    /// Validates configuration values
    pub fn validate(&self) -> Result<()> {
        if self.max_parallel_nodes == 0 {
            return Err(DagError::configuration_field(
                "max_parallel_nodes must be greater than 0",
                "max_parallel_nodes",
            ));
        }

        if !self.performance_warning_factor.is_finite() || self.performance_warning_factor <= 0.0 {
            return Err(DagError::configuration_field(
                "performance_warning_factor must be a positive number",
                "performance_warning_factor",
            ));
        }

        if self.run_time_budget_ms == Some(0) {
            return Err(DagError::configuration_field(
                "run_time_budget_ms must be greater than 0",
                "run_time_budget_ms",
            ));
        }

        Ok(())
    }

    /// Parse and validate a YAML document
    pub fn from_yaml_str(yaml: &str) -> Result<Self> {
        let config: Self = serde_yaml::from_str(yaml)?;
        config.validate()?;
        Ok(config)
    }

    /// Load and validate a YAML configuration file
    pub fn from_yaml_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path)
            .map_err(|e| DagError::io(format!("read config {}", path.display()), e))?;
        Self::from_yaml_str(&contents)
    }

    /// Merges two configurations, with override_with taking precedence
    pub fn merge(base: &Self, override_with: &Self) -> Result<Self> {
        let merged = Self {
            enable_parallel_execution: override_with.enable_parallel_execution,
            max_parallel_nodes: if override_with.enable_parallel_execution {
                override_with.max_parallel_nodes
            } else {
                base.max_parallel_nodes
            },
            upstream_failure: override_with.upstream_failure,
            performance_warning_factor: override_with.performance_warning_factor,
            default_estimated_execution_ms: override_with
                .default_estimated_execution_ms
                .or(base.default_estimated_execution_ms),
            run_time_budget_ms: override_with.run_time_budget_ms.or(base.run_time_budget_ms),
            check_unregistered_dependency_layers: override_with.check_unregistered_dependency_layers
                || base.check_unregistered_dependency_layers,
        };

        merged.validate()?;
        Ok(merged)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        let config = EngineConfig::default();
        assert!(config.validate().is_ok());
        assert!(!config.enable_parallel_execution);
        assert_eq!(config.run_time_budget_ms, Some(50));
        assert_eq!(config.upstream_failure, UpstreamFailurePolicy::Skip);
    }

    #[test]
    fn test_yaml_loading_fills_defaults() {
        let config = EngineConfig::from_yaml_str(
            "enable_parallel_execution: true\nmax_parallel_nodes: 8\nupstream_failure: run_with_available_inputs\n",
        )
        .unwrap();
        assert!(config.enable_parallel_execution);
        assert_eq!(config.max_parallel_nodes, 8);
        assert_eq!(config.upstream_failure, UpstreamFailurePolicy::RunWithAvailableInputs);
        assert_eq!(config.performance_warning_factor, 1.0);
    }

    #[test]
    fn test_invalid_values_rejected() {
        let err = EngineConfig::from_yaml_str("max_parallel_nodes: 0\n").unwrap_err();
        assert!(matches!(err, DagError::Configuration { field: Some(ref f), .. } if f == "max_parallel_nodes"));

        let config = EngineConfig {
            performance_warning_factor: -1.0,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_malformed_yaml_is_serialization_error() {
        let err = EngineConfig::from_yaml_str("max_parallel_nodes: [").unwrap_err();
        assert_eq!(err.category(), "serialization");
    }

    #[test]
    fn test_merge_prefers_override() {
        let base = EngineConfig {
            default_estimated_execution_ms: Some(10),
            ..Default::default()
        };
        let override_with = EngineConfig {
            enable_parallel_execution: true,
            max_parallel_nodes: 2,
            ..Default::default()
        };
        let merged = EngineConfig::merge(&base, &override_with).unwrap();
        assert!(merged.enable_parallel_execution);
        assert_eq!(merged.max_parallel_nodes, 2);
        assert_eq!(merged.default_estimated_execution_ms, Some(10));
    }
}
