//! Tracing subscriber setup for binaries and tests embedding the btree.

use tracing_subscriber::{fmt, EnvFilter};

use crate::types::{InobtError, Result};

/// Installs a global fmt subscriber filtered by `filter`, an `EnvFilter`
/// directive such as `"info"` or `"inobt::insert=debug"`.
pub fn init_logging(filter: &str) -> Result<()> {
    fmt()
        .with_env_filter(
            EnvFilter::try_new(filter).map_err(|_| InobtError::Invalid("invalid log filter"))?,
        )
        .with_writer(std::io::stderr)
        .with_ansi(false)
        .with_target(true)
        .with_thread_ids(true)
        .try_init()
        .map_err(|_| InobtError::Invalid("logging already initialized"))
}
