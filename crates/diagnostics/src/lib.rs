//! Logging for the sheetstore workspace
//!
//! Thin layer over `emit` so every crate logs the same way.
//!
//! Usage:
//! - Set SHEETSTORE_LOG=off (default) - no logs
//! - Set SHEETSTORE_LOG=info - structural mutations, credential changes
//! - Set SHEETSTORE_LOG=debug - cache hits, resolver fallbacks, renumber batches

use std::sync::Once;

// Re-export emit so macros can use it
pub use emit;

static INIT: Once = Once::new();

/// Name of the environment variable holding the log level
pub const LOG_ENV: &str = "SHEETSTORE_LOG";

fn min_level(value: &str) -> Option<emit::Level> {
    match value {
        "debug" => Some(emit::Level::Debug),
        "info" => Some(emit::Level::Info),
        "warn" => Some(emit::Level::Warn),
        "error" => Some(emit::Level::Error),
        _ => None,
    }
}

/// Initialize diagnostics based on the SHEETSTORE_LOG environment variable
///
/// Safe to call more than once; only the first call configures emit.
pub fn init_diagnostics() {
    INIT.call_once(|| {
        let log_level = std::env::var(LOG_ENV).unwrap_or_else(|_| "off".to_string());
        if log_level == "off" {
            return;
        }

        let (level, known) = match min_level(&log_level) {
            Some(level) => (level, true),
            None => (emit::Level::Info, false),
        };

        let rt = emit::setup()
            .emit_to(emit_term::stderr())
            .emit_when(emit::level::min_filter(level))
            .init();

        if !known {
            let env = LOG_ENV;
            emit::warn!("Unknown {env} value {log_level}, using info");
        }

        // The runtime must outlive every emitter in the process.
        std::mem::forget(rt);
    });
}

/// Log detailed diagnostics (cache hits, resolver fallbacks, batch sizes)
#[macro_export]
macro_rules! debug {
    ($($arg:tt)*) => {
        $crate::emit::debug!($($arg)*)
    };
}

/// Log basic operations (tab created, record deleted, client built)
#[macro_export]
macro_rules! info {
    ($($arg:tt)*) => {
        $crate::emit::info!($($arg)*)
    };
}

/// Log recoverable problems (header rewritten, renumber pass incomplete)
#[macro_export]
macro_rules! warn {
    ($($arg:tt)*) => {
        $crate::emit::warn!($($arg)*)
    };
}

/// Log failures that prevent an operation from completing
#[macro_export]
macro_rules! error {
    ($($arg:tt)*) => {
        $crate::emit::error!($($arg)*)
    };
}

pub use init_diagnostics as init;
