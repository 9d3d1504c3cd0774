//! Structured logging setup for processes embedding the engine.
//!
//! Console output with an `RUST_LOG`-style filter, switchable to JSON lines
//! for log shippers. Initialization is idempotent so tests and embedders can
//! call it freely.

use std::env;
use std::sync::OnceLock;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

static LOGGER_INITIALIZED: OnceLock<()> = OnceLock::new();

const ENV_LOG_FORMAT: &str = "BATCH_LOG_FORMAT";

/// Install the global tracing subscriber. Honors `RUST_LOG` for filtering
/// (default `info`) and `BATCH_LOG_FORMAT=json` for machine-readable output.
/// Safe to call more than once; a subscriber installed by the embedding
/// process wins.
pub fn init_structured_logging() {
    LOGGER_INITIALIZED.get_or_init(|| {
        let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
        let json = env::var(ENV_LOG_FORMAT)
            .map(|format| format.eq_ignore_ascii_case("json"))
            .unwrap_or(false);

        let init_result = if json {
            tracing_subscriber::registry()
                .with(filter)
                .with(fmt::layer().with_target(true).json())
                .try_init()
        } else {
            tracing_subscriber::registry()
                .with(filter)
                .with(fmt::layer().with_target(true))
                .try_init()
        };
        if init_result.is_err() {
            tracing::debug!("Global tracing subscriber already installed, keeping it");
        }
    });
}
