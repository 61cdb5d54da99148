// src/macros.rs

//
// Internal diagnostics macros
//
// `logging` feature enabled  → forwarded to `tracing`
// `logging` feature disabled → warnings go to stderr, debug and trace are
//                              compiled out
//
// These cover the crate's own diagnostics. The publish trail that callers can
// observe goes through the injected `Logger` (see `logger.rs`).
//

#![allow(unused_macros)]

// --------------------
// WARN
// --------------------

#[cfg(feature = "logging")]
macro_rules! log_warn {
    ($($arg:tt)*) => {
        tracing::warn!(target: "mom_messaging", $($arg)*)
    };
}

#[cfg(not(feature = "logging"))]
macro_rules! log_warn {
    ($($arg:tt)*) => {
        eprintln!($($arg)*)
    };
}

// --------------------
// DEBUG
// --------------------

#[cfg(feature = "logging")]
macro_rules! log_debug {
    ($($arg:tt)*) => {
        tracing::debug!(target: "mom_messaging", $($arg)*)
    };
}

#[cfg(not(feature = "logging"))]
macro_rules! log_debug {
    ($($arg:tt)*) => {};
}

// --------------------
// TRACE
// --------------------

#[cfg(feature = "logging")]
macro_rules! log_trace {
    ($($arg:tt)*) => {
        tracing::trace!(target: "mom_messaging", $($arg)*)
    };
}

#[cfg(not(feature = "logging"))]
macro_rules! log_trace {
    ($($arg:tt)*) => {};
}

pub(crate) use log_debug;
pub(crate) use log_trace;
pub(crate) use log_warn;
