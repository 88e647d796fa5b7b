//! Logging abstraction layer
//!
//! The router logs through these macros so that the backend can be picked at
//! compile time:
//!
//! - `log` (default) - Uses the standard `log` crate
//! - `tracing` - Uses the `tracing` crate for structured logging
//!
//! Every record is emitted under the [`TARGET`] target, so a subscriber can
//! filter the whole crate with one directive (`RUST_LOG=datarouter=debug`).
//! The macros expand to a block and are usable anywhere an expression is.
//!
//! # Usage
//!
//! ```ignore
//! use datarouter::{debug_log, trace_log};
//!
//! trace_log!("ranking {} branches", branches.len());
//! debug_log!("navigation to '{}' committed", location.pathname);
//! ```

/// Target every record is emitted under.
pub const TARGET: &str = "datarouter";

/// Dispatch one record to whichever backend is compiled in.
///
/// Expands to a block, so the level macros work in expression position such
/// as a match arm. With both features enabled `tracing` wins.
#[doc(hidden)]
#[macro_export]
macro_rules! __datarouter_log {
    ($level:ident, $($arg:tt)+) => {{
        #[cfg(feature = "tracing")]
        {
            ::tracing::$level!(target: "datarouter", $($arg)+);
        }
        #[cfg(all(feature = "log", not(feature = "tracing")))]
        {
            ::log::$level!(target: $crate::logging::TARGET, $($arg)+);
        }
    }};
}

/// Per-segment matching, cache hits, frame encoding.
#[macro_export]
macro_rules! trace_log {
    ($($arg:tt)+) => {
        $crate::__datarouter_log!(trace, $($arg)+)
    };
}

/// Navigation and fetcher transitions.
#[macro_export]
macro_rules! debug_log {
    ($($arg:tt)+) => {
        $crate::__datarouter_log!(debug, $($arg)+)
    };
}

#[macro_export]
macro_rules! info_log {
    ($($arg:tt)+) => {
        $crate::__datarouter_log!(info, $($arg)+)
    };
}

/// Recoverable misconfiguration, such as a `/files*` pattern or a malformed
/// percent-encoded pathname.
#[macro_export]
macro_rules! warn_log {
    ($($arg:tt)+) => {
        $crate::__datarouter_log!(warn, $($arg)+)
    };
}

/// Unexpected loader/action failures on the server side.
#[macro_export]
macro_rules! error_log {
    ($($arg:tt)+) => {
        $crate::__datarouter_log!(error, $($arg)+)
    };
}
