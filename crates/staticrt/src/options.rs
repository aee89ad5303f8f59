use serde::{Deserialize, Serialize};

use crate::env;
use crate::error::{RuntimeError, RuntimeResult};

pub const ENV_CLEANUP_ACTIVATIONS: &str = "STATICRT_CLEANUP_ACTIVATIONS";
pub const ENV_ENABLE_OUT_VARIANT: &str = "STATICRT_ENABLE_OUT_VARIANT";
pub const ENV_OPTIMIZE_MEMORY: &str = "STATICRT_OPTIMIZE_MEMORY";
pub const ENV_OPTIMIZE_GRAPH_OUTPUT_MEMORY: &str = "STATICRT_OPTIMIZE_GRAPH_OUTPUT_MEMORY";

/// Compilation options for a [`crate::StaticModule`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StaticModuleOptions {
    /// Batch-allocate and batch-release storage of non-escaping activations every invocation.
    pub cleanup_activations: bool,
    /// Prefer destination-passing kernels. Memory planning depends on it.
    pub enable_out_variant: bool,
    /// Let activations with disjoint live ranges share storage. Requires `enable_out_variant`.
    pub optimize_memory: bool,
    /// Also batch-allocate graph output storage. Requires `optimize_memory`.
    pub optimize_graph_output_memory: bool,
}

impl Default for StaticModuleOptions {
    fn default() -> Self {
        Self {
            cleanup_activations: true,
            enable_out_variant: true,
            optimize_memory: true,
            optimize_graph_output_memory: false,
        }
    }
}

impl StaticModuleOptions {
    /// Options with every flag turned off: plain allocating kernels, nothing planned.
    pub fn disabled() -> Self {
        Self {
            cleanup_activations: false,
            enable_out_variant: false,
            optimize_memory: false,
            optimize_graph_output_memory: false,
        }
    }

    /// Default options with `STATICRT_*` environment overrides applied.
    pub fn from_env() -> Self {
        Self::default().with_env_overrides()
    }

    pub fn with_env_overrides(mut self) -> Self {
        if let Some(value) = env::bool_override(ENV_CLEANUP_ACTIVATIONS) {
            self.cleanup_activations = value;
        }
        if let Some(value) = env::bool_override(ENV_ENABLE_OUT_VARIANT) {
            self.enable_out_variant = value;
        }
        if let Some(value) = env::bool_override(ENV_OPTIMIZE_MEMORY) {
            self.optimize_memory = value;
        }
        if let Some(value) = env::bool_override(ENV_OPTIMIZE_GRAPH_OUTPUT_MEMORY) {
            self.optimize_graph_output_memory = value;
        }
        self
    }

    pub fn from_json_str(src: &str) -> RuntimeResult<Self> {
        serde_json::from_str(src).map_err(|err| RuntimeError::InvalidOptions(err.to_string()))
    }

    pub fn validate(&self) -> RuntimeResult<()> {
        if self.optimize_memory && !self.enable_out_variant {
            return Err(RuntimeError::InvalidOptions(
                "optimize_memory requires enable_out_variant".to_string(),
            ));
        }
        if self.optimize_graph_output_memory && !self.optimize_memory {
            return Err(RuntimeError::InvalidOptions(
                "optimize_graph_output_memory requires optimize_memory".to_string(),
            ));
        }
        Ok(())
    }

    /// Whether instances get a memory planner.
    pub fn plans_memory(&self) -> bool {
        self.cleanup_activations && self.enable_out_variant
    }
}
