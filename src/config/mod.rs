//! Core Configuration
//!
//! All tunables for the scheduling core: barrier and step deadlines,
//! container capacities, persistence sizing, and the fatigue constant.
//! Configuration is supplied in-process; no flags or environment variables
//! are read here.

use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;

/// Configuration validation errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("capacity must be non-zero: {field}")]
    ZeroCapacity { field: &'static str },

    #[error("timeout must be non-zero: {field}")]
    ZeroTimeout { field: &'static str },

    #[error("fatigue constant out of range: {value} (expected 0 < k <= 1)")]
    FatigueOutOfRange { value: f32 },
}

/// Tunables for the cognitive scheduling core
///
/// Defaults match the working ranges the scheduler was tuned against;
/// timeouts bound every suspension point so a cycle can never stall
/// indefinitely.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CoreConfig {
    /// Upper bound for the pivotal barrier (ack collection at steps 1 and 7)
    pub pivotal_timeout: Duration,

    /// Per-step engine reply deadline
    pub step_timeout: Duration,

    /// Pacing between steps when the driver task runs the ring; zero means
    /// free-running
    pub step_interval: Duration,

    /// Advisory deadline handed to the content provider (not enforced here)
    pub engine_timeout: Duration,

    /// Maximum time the orchestrator blocks on a full persistence queue
    pub persist_timeout: Duration,

    /// Persistence drain window on stop
    pub shutdown_timeout: Duration,

    /// Working memory buffer capacity
    pub working_memory_capacity: usize,

    /// Bound on the rolling past-context sequence
    pub past_context_capacity: usize,

    /// Bound on the anticipated future-options sequence
    pub future_options_capacity: usize,

    /// Bounded persistence queue depth
    pub persistence_queue_capacity: usize,

    /// Number of persistence workers draining the queue
    pub persistence_workers: usize,

    /// Fatigue accumulation constant `k` in
    /// `fatigue <- clamp(fatigue * 0.995 + load * dt * k, 0, 1)`
    pub fatigue_k: f32,
}

impl CoreConfig {
    /// Validate capacities, deadlines, and the fatigue constant
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` naming the first offending field.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.working_memory_capacity == 0 {
            return Err(ConfigError::ZeroCapacity {
                field: "working_memory_capacity",
            });
        }
        if self.past_context_capacity == 0 {
            return Err(ConfigError::ZeroCapacity {
                field: "past_context_capacity",
            });
        }
        if self.future_options_capacity == 0 {
            return Err(ConfigError::ZeroCapacity {
                field: "future_options_capacity",
            });
        }
        if self.persistence_queue_capacity == 0 {
            return Err(ConfigError::ZeroCapacity {
                field: "persistence_queue_capacity",
            });
        }
        if self.persistence_workers == 0 {
            return Err(ConfigError::ZeroCapacity {
                field: "persistence_workers",
            });
        }
        if self.pivotal_timeout.is_zero() {
            return Err(ConfigError::ZeroTimeout {
                field: "pivotal_timeout",
            });
        }
        if self.step_timeout.is_zero() {
            return Err(ConfigError::ZeroTimeout {
                field: "step_timeout",
            });
        }
        if self.persist_timeout.is_zero() {
            return Err(ConfigError::ZeroTimeout {
                field: "persist_timeout",
            });
        }
        if self.shutdown_timeout.is_zero() {
            return Err(ConfigError::ZeroTimeout {
                field: "shutdown_timeout",
            });
        }
        if self.fatigue_k <= 0.0 || self.fatigue_k > 1.0 {
            return Err(ConfigError::FatigueOutOfRange {
                value: self.fatigue_k,
            });
        }
        Ok(())
    }
}

impl Default for CoreConfig {
    fn default() -> Self {
        Self {
            pivotal_timeout: Duration::from_secs(5),
            step_timeout: Duration::from_secs(2),
            step_interval: Duration::from_millis(250),
            engine_timeout: Duration::from_secs(3),
            persist_timeout: Duration::from_millis(250),
            shutdown_timeout: Duration::from_secs(5),
            working_memory_capacity: 7,
            past_context_capacity: 10,
            future_options_capacity: 5,
            persistence_queue_capacity: 1024,
            persistence_workers: 2,
            fatigue_k: 0.05,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_is_valid() {
        let config = CoreConfig::default();
        assert!(config.validate().is_ok());
    }

    #[test]
    fn default_timeouts_match_contract() {
        let config = CoreConfig::default();
        assert_eq!(config.pivotal_timeout, Duration::from_secs(5));
        assert_eq!(config.step_timeout, Duration::from_secs(2));
        assert_eq!(config.engine_timeout, Duration::from_secs(3));
        assert_eq!(config.persist_timeout, Duration::from_millis(250));
        assert_eq!(config.shutdown_timeout, Duration::from_secs(5));
    }

    #[test]
    fn default_capacities_match_contract() {
        let config = CoreConfig::default();
        assert_eq!(config.working_memory_capacity, 7);
        assert_eq!(config.past_context_capacity, 10);
        assert_eq!(config.future_options_capacity, 5);
        assert_eq!(config.persistence_queue_capacity, 1024);
        assert_eq!(config.persistence_workers, 2);
    }

    #[test]
    fn zero_working_memory_rejected() {
        let config = CoreConfig {
            working_memory_capacity: 0,
            ..CoreConfig::default()
        };
        assert!(matches!(
            config.validate(),
            Err(ConfigError::ZeroCapacity {
                field: "working_memory_capacity"
            })
        ));
    }

    #[test]
    fn zero_pivotal_timeout_rejected() {
        let config = CoreConfig {
            pivotal_timeout: Duration::ZERO,
            ..CoreConfig::default()
        };
        assert!(matches!(
            config.validate(),
            Err(ConfigError::ZeroTimeout {
                field: "pivotal_timeout"
            })
        ));
    }

    #[test]
    fn fatigue_k_bounds_enforced() {
        let mut config = CoreConfig {
            fatigue_k: 0.0,
            ..CoreConfig::default()
        };
        assert!(config.validate().is_err());

        config.fatigue_k = 1.5;
        assert!(config.validate().is_err());

        config.fatigue_k = 0.05;
        assert!(config.validate().is_ok());
    }

    #[test]
    fn config_serde_roundtrip() {
        let config = CoreConfig::default();
        let json = serde_json::to_string(&config).unwrap();
        let parsed: CoreConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, config);
    }
}
