use tracing_subscriber::EnvFilter;

use super::error::Result;

pub mod prelude {
    pub use tracing::{debug, error, info, trace, warn};
    pub use tracing::{debug_span, error_span, info_span, instrument, trace_span, warn_span};
}

/// Install a terminal subscriber filtered by `RUST_LOG` (default `info`).
/// Fails when a global subscriber is already set; tests that call this from
/// several entry points can ignore the error.
pub fn setup() -> Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .try_init()
        .map_err(|e| anyhow::anyhow!(e))?;
    Ok(())
}
