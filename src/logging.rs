use tracing_subscriber::{fmt, EnvFilter};

const LOG_ENV: &str = "TILEPAINT_LOG";
const DEFAULT_FILTER: &str = "info";

/// Installs the global fmt subscriber. Later calls are no-ops.
pub fn init() {
    let filter =
        EnvFilter::try_from_env(LOG_ENV).unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER));
    let _ = fmt().with_env_filter(filter).with_target(false).try_init();
}
