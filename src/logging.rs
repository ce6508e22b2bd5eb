use tracing::info;
use tracing_subscriber::EnvFilter;

/// Install the fmt subscriber, filtered by `RUST_LOG` (default `info`).
pub fn init(service: &'static str) {
  let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
  tracing_subscriber::fmt().with_env_filter(filter).with_target(false).init();
  info!(service, version = env!("CARGO_PKG_VERSION"), "Service starting");
}
