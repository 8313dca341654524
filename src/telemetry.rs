//! Tracing setup for binaries embedding this crate.
//!
//! The library itself never installs a global subscriber (a process can
//! only have one); this helper just mirrors the `tracing_subscriber`
//! registry + `EnvFilter` + fmt-layer pattern used throughout this
//! lineage, for CLI/binary callers to opt into.

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Installs a global `tracing` subscriber that reads `RUST_LOG`, falling
/// back to `default_filter` (e.g. `"dagflow=info"`) when unset.
///
/// Call once, near the top of `main`. Not exercised by library code paths.
pub fn init_tracing(default_filter: &str) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_filter.to_string()));

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer())
        .init();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_filter_is_used_when_env_unset() {
        std::env::remove_var("RUST_LOG");
        let filter = EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new("dagflow=info".to_string()));
        assert_eq!(filter.to_string(), "dagflow=info");
    }
}
