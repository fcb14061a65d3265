//! Runtime-adjustable verbosity knob layered on top of the `log` crate.
//!
//! The manager's own diagnostic output (accept/close/dispatch traces) is
//! gated by this level rather than by `log`'s global max level, so an
//! embedding application can turn the runtime chatty without touching its
//! own logging configuration.

use std::sync::atomic::{AtomicUsize, Ordering};

pub const NONE: usize = 0;
pub const ERROR: usize = 1;
pub const INFO: usize = 2;
pub const DEBUG: usize = 3;
pub const VERBOSE: usize = 4;

static LEVEL: AtomicUsize = AtomicUsize::new(ERROR);

/// Sets the manager's log level. Values above `VERBOSE` saturate to `VERBOSE`.
pub fn log_set(level: usize) {
    LEVEL.store(level.min(VERBOSE), Ordering::Relaxed);
}

pub fn log_get() -> usize {
    LEVEL.load(Ordering::Relaxed)
}

#[doc(hidden)]
pub fn enabled(level: usize) -> bool {
    log_get() >= level
}

macro_rules! mg_error {
    ($($arg:tt)*) => {
        if crate::log::enabled(crate::log::ERROR) {
            ::log::error!($($arg)*);
        }
    };
}

macro_rules! mg_info {
    ($($arg:tt)*) => {
        if crate::log::enabled(crate::log::INFO) {
            ::log::info!($($arg)*);
        }
    };
}

macro_rules! mg_debug {
    ($($arg:tt)*) => {
        if crate::log::enabled(crate::log::DEBUG) {
            ::log::debug!($($arg)*);
        }
    };
}

macro_rules! mg_verbose {
    ($($arg:tt)*) => {
        if crate::log::enabled(crate::log::VERBOSE) {
            ::log::trace!($($arg)*);
        }
    };
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn saturates_at_verbose() {
        log_set(99);
        assert_eq!(log_get(), VERBOSE);
    }

    #[test]
    fn default_is_error() {
        log_set(ERROR);
        assert!(enabled(ERROR));
        assert!(!enabled(INFO));
    }
}
