pub mod checks;
pub mod fixtures;
pub mod recorder;

pub use checks::{check_inverse_consistency, check_no_dangling};
pub use fixtures::{
    board_schema, chain_schema, cycle_schema, lazy_cycle_schema, mail_engine, mail_schema, spawner_schema,
};
pub use recorder::Recorder;

use std::sync::Once;

use tracing_subscriber::EnvFilter;

/// Install a test-friendly subscriber once per process. `RUST_LOG` picks
/// the level; warnings are shown by default.
pub fn init_tracing() {
    static INIT: Once = Once::new();
    INIT.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")))
            .with_test_writer()
            .try_init();
    });
}
