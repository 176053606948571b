//! Engine configuration.

use std::time::Duration;

use tipledger_core::defaults;

use crate::gate::GateConfig;

/// Configuration for the reconciliation engine.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Duplicate gate tunables.
    pub gate: GateConfig,
    /// Absolute tolerance for "exact" estimate accuracy, in dollars.
    pub variance_epsilon: f64,
    /// Budget for a single cached computation.
    pub compute_budget: Duration,
    /// TTL for half-open-window aggregate cache entries, in seconds.
    pub cache_ttl_secs: i64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            gate: GateConfig::default(),
            variance_epsilon: defaults::VARIANCE_EPSILON,
            compute_budget: Duration::from_secs(defaults::COMPUTE_BUDGET_SECS),
            cache_ttl_secs: defaults::CACHE_TTL_SECS,
        }
    }
}

impl EngineConfig {
    /// Create config from environment variables (with defaults).
    ///
    /// | Variable | Default | Description |
    /// |----------|---------|-------------|
    /// | `TIPLEDGER_NEAR_DUP_TOLERANCE_PCT` | `2.0` | Near-duplicate size band |
    /// | `TIPLEDGER_RESUBMIT_WINDOW_SECS` | `300` | Rapid-resubmit window |
    /// | `TIPLEDGER_VARIANCE_EPSILON` | `0.25` | Exact-accuracy tolerance ($) |
    /// | `TIPLEDGER_COMPUTE_BUDGET_SECS` | `30` | Cached-computation budget |
    /// | `TIPLEDGER_CACHE_TTL_SECS` | `300` | Windowed-aggregate TTL |
    pub fn from_env() -> Self {
        let variance_epsilon = std::env::var("TIPLEDGER_VARIANCE_EPSILON")
            .ok()
            .and_then(|v| v.parse::<f64>().ok())
            .unwrap_or(defaults::VARIANCE_EPSILON);

        let compute_budget_secs = std::env::var("TIPLEDGER_COMPUTE_BUDGET_SECS")
            .ok()
            .and_then(|v| v.parse::<u64>().ok())
            .unwrap_or(defaults::COMPUTE_BUDGET_SECS);

        let cache_ttl_secs = std::env::var("TIPLEDGER_CACHE_TTL_SECS")
            .ok()
            .and_then(|v| v.parse::<i64>().ok())
            .unwrap_or(defaults::CACHE_TTL_SECS);

        Self {
            gate: GateConfig::from_env(),
            variance_epsilon,
            compute_budget: Duration::from_secs(compute_budget_secs),
            cache_ttl_secs,
        }
    }

    /// Set the variance epsilon.
    pub fn with_variance_epsilon(mut self, epsilon: f64) -> Self {
        self.variance_epsilon = epsilon;
        self
    }

    /// Set the compute budget.
    pub fn with_compute_budget(mut self, budget: Duration) -> Self {
        self.compute_budget = budget;
        self
    }

    /// Set the gate tunables.
    pub fn with_gate(mut self, gate: GateConfig) -> Self {
        self.gate = gate;
        self
    }
}
