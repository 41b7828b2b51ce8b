use crate::error::{QueryError, Result};
use tracing_subscriber::{fmt, EnvFilter};

/// Installs a global `tracing` subscriber writing to stderr, filtered by
/// `level` (any `EnvFilter` directive, e.g. `"info"` or `"querygate=debug"`).
pub fn init_logging(level: &str) -> Result<()> {
    fmt()
        .with_env_filter(
            EnvFilter::try_new(level)
                .map_err(|e| QueryError::Config(format!("invalid log level: {e}")))?,
        )
        .with_writer(std::io::stderr)
        .with_target(true)
        .with_thread_ids(true)
        .try_init()
        .map_err(|_| QueryError::Config("logging already initialized".into()))
}
