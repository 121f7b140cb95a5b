use tracing_subscriber::EnvFilter;

use crate::{JobsError, JobsResult};

/// Filter used when `RUST_LOG` is not set
pub const DEFAULT_FILTER: &str = "solar_jobs=info";

/// Install a global fmt subscriber filtered by `RUST_LOG`
///
/// With `json` set, events are written as one JSON object per line.
pub fn init_tracing(json: bool) -> JobsResult<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER));
    let builder = tracing_subscriber::fmt().with_env_filter(filter).with_target(true);

    let result = if json {
        builder.json().try_init()
    } else {
        builder.try_init()
    };

    result.map_err(|e| JobsError::Internal(format!("Failed to install tracing subscriber: {}", e)))
}
