/// Scripted in-memory driver that records every call
pub mod mock;

pub use mock::{DriverEvent, MockDriver, MockState};

/// Install a fmt subscriber honouring `RUST_LOG` (default `info`).
///
/// Safe to call from every test; only the first call installs anything.
pub fn init_tracing() {
    use tracing_subscriber::EnvFilter;

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_test_writer()
        .try_init();
}
