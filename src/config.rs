//! Process-level configuration, resolved once at startup from environment
//! variables with conservative defaults.

use serde::{Deserialize, Serialize};
use std::env;
use tracing::warn;

const ENV_DATABASE_URL: &str = "DATABASE_URL";
const ENV_WORKER_POOL_SIZE: &str = "BATCH_WORKER_POOL_SIZE";
const ENV_GRID_SIZE: &str = "BATCH_GRID_SIZE";
const ENV_STOP_MIN_RUNTIME_SECS: &str = "BATCH_STOP_MIN_RUNTIME_SECS";

/// Engine-wide tunables. Per-step settings (chunk size, skip/retry limits)
/// live on the step definitions; this covers the shared execution
/// environment.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchConfig {
    /// Postgres connection string for the durable store. `None` selects the
    /// in-memory store.
    pub database_url: Option<String>,
    /// Upper bound on concurrently running partition workers.
    pub worker_pool_size: usize,
    /// Default number of slices a partitioned step splits its input into.
    pub default_grid_size: usize,
    /// Minimum time an execution must have been running before a stop
    /// request is honored.
    pub stop_min_runtime_secs: u64,
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self {
            database_url: None,
            worker_pool_size: 4,
            default_grid_size: 4,
            stop_min_runtime_secs: 30 * 60,
        }
    }
}

impl BatchConfig {
    /// Build from the environment; unset or unparsable variables fall back
    /// to defaults with a warning rather than failing startup.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            database_url: env::var(ENV_DATABASE_URL).ok(),
            worker_pool_size: parse_env(ENV_WORKER_POOL_SIZE, defaults.worker_pool_size),
            default_grid_size: parse_env(ENV_GRID_SIZE, defaults.default_grid_size),
            stop_min_runtime_secs: parse_env(
                ENV_STOP_MIN_RUNTIME_SECS,
                defaults.stop_min_runtime_secs,
            ),
        }
    }
}

fn parse_env<T: std::str::FromStr + Copy>(key: &str, default: T) -> T {
    match env::var(key) {
        Ok(raw) => match raw.parse() {
            Ok(value) => value,
            Err(_) => {
                warn!(key, value = %raw, "Unparsable environment override, using default");
                default
            }
        },
        Err(_) => default,
    }
}
