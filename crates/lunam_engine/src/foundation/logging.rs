//! Logging utilities
//!
//! The engine logs through the `log` facade with a bracketed subsystem prefix
//! (`[DEVICE]`, `[SWAPCHAIN]`, `[SHADER]`, `[PIPELINE]`, `[RENDER]`, `[UPLOAD]`).
//! Applications pick the sink; [`init`] installs `env_logger`, filtered through
//! `RUST_LOG`.

pub use log::{debug, error, info, trace, warn};

/// Initialize the logging system
pub fn init() {
    env_logger::init();
}

/// Initialize logging with a default filter used when `RUST_LOG` is unset
pub fn init_with_default(filter: &str) {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(filter)).init();
}
