//! ---
//! ems_section: "11-simulation"
//! ems_subsection: "module"
//! ems_type: "source"
//! ems_scope: "code"
//! ems_description: "Tracing subscriber setup for harness-driven tests."
//! ems_version: "v0.1.0"
//! ems_owner: "tbd"
//! ---
use tracing_subscriber::{fmt as subscriber_fmt, prelude::*, EnvFilter, Registry};

/// Environment variable holding the harness log filter.
pub const LOG_ENV: &str = "R_EMS_LOG";

const DEFAULT_FILTER: &str = "info";

/// Install a test-friendly subscriber. Filter directives come from
/// `R_EMS_LOG`, then `RUST_LOG`, then default to `info`. Later calls are
/// no-ops.
pub fn init_test_tracing() {
    let filter = std::env::var(LOG_ENV)
        .ok()
        .and_then(|directives| EnvFilter::try_new(directives).ok())
        .or_else(|| EnvFilter::try_from_default_env().ok())
        .unwrap_or_else(|| EnvFilter::new(DEFAULT_FILTER));
    let _ = Registry::default()
        .with(filter)
        .with(subscriber_fmt::layer().with_test_writer())
        .try_init();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn repeated_initialization_is_harmless() {
        init_test_tracing();
        init_test_tracing();
        tracing::info!(target: "r_ems_testharness", "tracing initialized twice");
    }
}
