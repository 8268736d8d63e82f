//! Logging shim shared by the flight crates.
//!
//! The macros forward to `log` when the `log` feature is on, and to `defmt` when only `defmt`
//! is enabled. The `cfg` checks are evaluated in the crate that expands the macro, so every
//! crate using them must expose the same two features.
#![allow(unused_macros)]

/// Lets `Debug`-only values be logged through `defmt`.
#[cfg(feature = "defmt")]
#[derive(defmt::Format, Debug)]
#[allow(unused)]
pub(crate) struct DebugFormat<T: core::fmt::Debug>(#[defmt(Debug2Format)] pub T);

#[cfg(not(feature = "defmt"))]
#[derive(Debug)]
#[allow(unused)]
pub(crate) struct DebugFormat<T: core::fmt::Debug>(pub T);

#[doc(hidden)]
#[macro_export]
macro_rules! __log_at {
    ($level:ident, $s:literal $(, $x:expr)* $(,)?) => {
        {
            #[cfg(feature = "log")]
            ::log::$level!($s $(, $x)*);

            #[cfg(all(feature = "defmt", not(feature = "log")))]
            ::defmt::$level!($s $(, $x)*);
        }
    };
}

#[macro_export]
macro_rules! log_trace {
    ($($arg:tt)*) => { $crate::__log_at!(trace, $($arg)*) };
}

#[macro_export]
macro_rules! log_debug {
    ($($arg:tt)*) => { $crate::__log_at!(debug, $($arg)*) };
}

#[macro_export]
macro_rules! log_info {
    ($($arg:tt)*) => { $crate::__log_at!(info, $($arg)*) };
}

#[macro_export]
macro_rules! log_warn {
    ($($arg:tt)*) => { $crate::__log_at!(warn, $($arg)*) };
}

#[macro_export]
macro_rules! log_error {
    ($($arg:tt)*) => { $crate::__log_at!(error, $($arg)*) };
}
