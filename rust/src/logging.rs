//! Verbosity-gated progress output on stderr.
//!
//! Every scheduling stage takes the `verbosity` of its [`Settings`] and
//! reports through one of three macros. A message whose level is above the
//! verbosity is skipped before its arguments are evaluated.
//!
//! | Level | Macro | Reports |
//! |---|---|---|
//! | 0 | none | nothing |
//! | 1 | `log_changes!` | alloc rewrites, new constraints and links, improvements, cache writes |
//! | 2 | `log_checks!` | rounds, window sizes, cache misses |
//! | 3 | `log_debug!` | single constraints, links and rotations |
//!
//! [`Settings`]: crate::Settings

pub const VERBOSITY_SILENT: u8 = 0;
pub const VERBOSITY_CHANGES: u8 = 1;
pub const VERBOSITY_CHECKS: u8 = 2;
pub const VERBOSITY_DEBUG: u8 = 3;

/// Something in the graph or schedule changed.
#[macro_export]
macro_rules! log_changes {
    ($verbosity:expr, $($arg:tt)*) => {
        if $verbosity >= $crate::logging::VERBOSITY_CHANGES {
            eprintln!($($arg)*);
        }
    };
}

/// A stage looked for work, whether or not it found any.
#[macro_export]
macro_rules! log_checks {
    ($verbosity:expr, $($arg:tt)*) => {
        if $verbosity >= $crate::logging::VERBOSITY_CHECKS {
            eprintln!($($arg)*);
        }
    };
}

/// One line per constraint, link or rotation.
#[macro_export]
macro_rules! log_debug {
    ($verbosity:expr, $($arg:tt)*) => {
        if $verbosity >= $crate::logging::VERBOSITY_DEBUG {
            eprintln!($($arg)*);
        }
    };
}
