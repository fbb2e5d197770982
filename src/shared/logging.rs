use tracing_subscriber::EnvFilter;

/// Initializes a global tracing subscriber for hosts that do not bring
/// their own. Call once, early.
pub fn init(service_name: &str) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();

    tracing::info!(service = service_name, "logging initialized");
}
