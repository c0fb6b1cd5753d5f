//! Feature-gated logging macros.
//!
//! With the `tracing` feature enabled these re-export the corresponding
//! macros from the `tracing` crate; without it they still type-check their
//! arguments (so bindings count as used) but emit nothing.

#[cfg(feature = "tracing")]
pub use tracing::{debug, error, info, trace, warn};

#[cfg(not(feature = "tracing"))]
#[macro_export]
macro_rules! trace {
    ($($t:tt)*) => {{
        if false {
            let _ = ::core::format_args!($($t)*);
        }
    }};
}

#[cfg(not(feature = "tracing"))]
#[macro_export]
macro_rules! debug {
    ($($t:tt)*) => {{
        if false {
            let _ = ::core::format_args!($($t)*);
        }
    }};
}

#[cfg(not(feature = "tracing"))]
#[macro_export]
macro_rules! info {
    ($($t:tt)*) => {{
        if false {
            let _ = ::core::format_args!($($t)*);
        }
    }};
}

#[cfg(not(feature = "tracing"))]
#[macro_export]
macro_rules! warn {
    ($($t:tt)*) => {{
        if false {
            let _ = ::core::format_args!($($t)*);
        }
    }};
}

#[cfg(not(feature = "tracing"))]
#[macro_export]
macro_rules! error {
    ($($t:tt)*) => {{
        if false {
            let _ = ::core::format_args!($($t)*);
        }
    }};
}

#[cfg(not(feature = "tracing"))]
pub use crate::{debug, error, info, trace, warn};
