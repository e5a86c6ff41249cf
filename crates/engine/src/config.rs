//! Executor limits.

use tracing::warn;

/// Hard ceiling on `while` iterations; per-step and env overrides may only lower it.
pub const MAX_LOOP_ITERATIONS: u32 = 10_000;

/// Environment variable that lowers the `while` ceiling for a whole run.
pub const MAX_LOOP_ITERATIONS_ENV: &str = "TESTFLOW_MAX_LOOP_ITERATIONS";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExecutorConfig {
    pub max_loop_iterations: u32,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            max_loop_iterations: MAX_LOOP_ITERATIONS,
        }
    }
}

impl ExecutorConfig {
    /// Reads overrides from the environment, falling back to defaults.
    pub fn from_env() -> Self {
        let mut config = Self::default();
        if let Ok(raw) = std::env::var(MAX_LOOP_ITERATIONS_ENV) {
            match raw.trim().parse::<u32>() {
                Ok(limit) => config.max_loop_iterations = limit.clamp(1, MAX_LOOP_ITERATIONS),
                Err(_) => warn!(variable = MAX_LOOP_ITERATIONS_ENV, value = %raw, "ignoring invalid loop limit"),
            }
        }
        config
    }

    /// Effective cap for one `while` step.
    pub fn loop_limit(&self, step_limit: Option<u32>) -> u32 {
        let ceiling = self.max_loop_iterations.clamp(1, MAX_LOOP_ITERATIONS);
        step_limit.map_or(ceiling, |limit| limit.clamp(1, ceiling))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn from_env_clamps_and_ignores_garbage() {
        temp_env::with_var(MAX_LOOP_ITERATIONS_ENV, Some("50"), || {
            assert_eq!(ExecutorConfig::from_env().max_loop_iterations, 50);
        });
        temp_env::with_var(MAX_LOOP_ITERATIONS_ENV, Some("999999"), || {
            assert_eq!(ExecutorConfig::from_env().max_loop_iterations, MAX_LOOP_ITERATIONS);
        });
        temp_env::with_var(MAX_LOOP_ITERATIONS_ENV, Some("lots"), || {
            assert_eq!(ExecutorConfig::from_env(), ExecutorConfig::default());
        });
        temp_env::with_var(MAX_LOOP_ITERATIONS_ENV, None::<&str>, || {
            assert_eq!(ExecutorConfig::from_env(), ExecutorConfig::default());
        });
    }

    #[test]
    fn step_limit_can_only_lower_the_ceiling() {
        let config = ExecutorConfig { max_loop_iterations: 100 };
        assert_eq!(config.loop_limit(None), 100);
        assert_eq!(config.loop_limit(Some(5)), 5);
        assert_eq!(config.loop_limit(Some(500)), 100);
        assert_eq!(config.loop_limit(Some(0)), 1);
    }
}
