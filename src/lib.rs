//! Persistent-memory pool diagnostic, repair, sync and transform engine.
//!
//! The three entry points mirror `libpmempool`'s own surface:
//! [`check`] walks a pool-set's headers and BTT structures and can repair
//! what it finds, [`replica::sync`] rebuilds a damaged replica from a
//! healthy peer, and [`replica::transform`] reshapes a pool-set's layout
//! in place.

pub mod array;
pub mod bitmap;
pub mod check;
pub mod codec;
pub mod error;
pub mod pooldata;
pub mod poolset;
pub mod replica;

pub use check::{check_answer, check_end, check_init, check_step, CheckArgs, CheckResult, Status, StatusKind};
pub use replica::{sync, transform, SyncArgs, SyncFlags, TransformArgs, TransformFlags};

/// Initializes the `tracing` subscriber from `PMEMPOOL_LOG_LEVEL`
/// (default `info`) and, if `PMEMPOOL_LOG_FILE` is set, duplicates
/// output to that file in addition to stderr.
///
/// Safe to call more than once; later calls are no-ops.
pub fn init_logging() {
    use std::sync::Once;
    static INIT: Once = Once::new();
    INIT.call_once(|| {
        let filter = tracing_subscriber::EnvFilter::try_from_env("PMEMPOOL_LOG_LEVEL")
            .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));

        let builder = tracing_subscriber::fmt().with_env_filter(filter).with_target(false);

        if let Ok(path) = std::env::var("PMEMPOOL_LOG_FILE") {
            if let Ok(file) = std::fs::OpenOptions::new().create(true).append(true).open(&path) {
                builder.with_writer(std::sync::Mutex::new(file)).init();
                return;
            }
        }
        builder.init();
    });
}
