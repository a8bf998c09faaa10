use tracing_subscriber::EnvFilter;

/// Initialize the tracing subscriber for the embedding process.
///
/// - Debug builds: pretty-printed human-readable output
/// - Release builds: JSON lines for log aggregation
///
/// The level is controlled by `RUST_LOG`, defaulting to `info`. Call once at
/// startup; library code only emits events and never installs a subscriber.
pub fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    if cfg!(debug_assertions) {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_target(true)
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_target(false)
            .json()
            .flatten_event(true)
            .init();
    }
}
