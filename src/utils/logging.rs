//! Logging macros gated by a module-level `ENABLE_LOGS` flag.
//!
//! The capture loop and the device/frame collaborators log on every tick, which is
//! noisy at `info` level. Each module that uses these macros declares its own switch:
//!
//! ```rust,ignore
//! const ENABLE_LOGS: bool = true;
//!
//! use crate::{log_debug, log_info, log_warn, log_error};
//!
//! log_info!("capture loop for session {} started", session_id);
//! ```
//!
//! Turning the flag off silences the module without touching `RUST_LOG`, while the
//! record still goes through the `log` facade (and `env_logger`) when it is on.

/// `log::debug!` when the calling module has `ENABLE_LOGS` set.
#[macro_export]
macro_rules! log_debug {
    ($($arg:tt)*) => {
        if ENABLE_LOGS {
            log::debug!($($arg)*);
        }
    };
}

/// `log::info!` when the calling module has `ENABLE_LOGS` set.
#[macro_export]
macro_rules! log_info {
    ($($arg:tt)*) => {
        if ENABLE_LOGS {
            log::info!($($arg)*);
        }
    };
}

/// `log::warn!` when the calling module has `ENABLE_LOGS` set.
#[macro_export]
macro_rules! log_warn {
    ($($arg:tt)*) => {
        if ENABLE_LOGS {
            log::warn!($($arg)*);
        }
    };
}

/// `log::error!` when the calling module has `ENABLE_LOGS` set.
#[macro_export]
macro_rules! log_error {
    ($($arg:tt)*) => {
        if ENABLE_LOGS {
            log::error!($($arg)*);
        }
    };
}
