use std::sync::Once;

use tracing_subscriber::{EnvFilter, fmt};

/// Installs the global tracing subscriber. Safe to call from multiple entry
/// points; only the first call has an effect. Filtering follows `RUST_LOG`
/// and defaults to `info`.
pub fn init() {
    static INIT: Once = Once::new();
    INIT.call_once(|| {
        let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
        fmt()
            .with_env_filter(filter)
            .with_target(false)
            .with_level(true)
            .init();
    });
}
