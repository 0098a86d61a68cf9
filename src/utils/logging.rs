//! Logging setup and conditional logging macros.
//!
//! Modules that want switchable verbosity define a module-level flag and
//! use the crate-root macros:
//!
//! ```rust,ignore
//! const ENABLE_LOGS: bool = true;
//!
//! use rollcall::log_info;
//!
//! log_info!("logged only while ENABLE_LOGS is true");
//! ```

use log::LevelFilter;

/// Initialize env_logger for the embedding process. Reads `RUST_LOG`,
/// defaulting to info. Safe to call repeatedly; later calls are no-ops.
pub fn init_logging() {
    let _ = env_logger::Builder::from_default_env()
        .filter_level(LevelFilter::Info)
        .try_init();
}

/// Conditional info logging; checks the `ENABLE_LOGS` const in the calling
/// module.
#[macro_export]
macro_rules! log_info {
    ($($arg:tt)*) => {
        if ENABLE_LOGS {
            log::info!($($arg)*);
        }
    };
}

/// Conditional warn logging; checks the `ENABLE_LOGS` const in the calling
/// module.
#[macro_export]
macro_rules! log_warn {
    ($($arg:tt)*) => {
        if ENABLE_LOGS {
            log::warn!($($arg)*);
        }
    };
}

/// Conditional error logging; checks the `ENABLE_LOGS` const in the calling
/// module.
#[macro_export]
macro_rules! log_error {
    ($($arg:tt)*) => {
        if ENABLE_LOGS {
            log::error!($($arg)*);
        }
    };
}
