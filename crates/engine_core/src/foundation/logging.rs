//! Logging utilities and structured logging support
//!
//! The crate only ever emits through the `log` facade; it never installs
//! a logger itself, so embedding applications keep control of sinks and
//! formatting. `init_for_tests` exists purely so test modules across the
//! crate can opt into seeing log output without each hand-rolling an
//! `env_logger::init()` call guarded by `Once`.

pub use log::{debug, error, info, trace, warn};

/// Initialize `env_logger` once, for use from `#[cfg(test)]` modules only.
#[cfg(test)]
pub fn init_for_tests() {
    use std::sync::Once;
    static INIT: Once = Once::new();
    INIT.call_once(|| {
        let _ = env_logger::builder().is_test(true).try_init();
    });
}
