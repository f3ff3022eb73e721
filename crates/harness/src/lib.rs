pub mod data;
pub mod session;

pub use data::{row, sample_rows};
pub use session::TestSession;

use tracing_subscriber::EnvFilter;

/// Installs a fmt subscriber writing through the test harness. `RUST_LOG`
/// overrides the default `warn` filter. Safe to call from every test.
pub fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_test_writer()
        .try_init();
}
