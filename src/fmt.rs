//! Log routing for the landing core.
//!
//! `defmt` builds log through defmt, `std` builds through `tracing`, and
//! bare `no_std` builds drop the message while still borrowing the
//! arguments so both paths type-check the same call sites. Keep format
//! strings to plain `{}` placeholders so they are valid for every backend.

#![allow(unused_macros)]

macro_rules! log_debug {
    ($($arg:tt)*) => {{
        #[cfg(feature = "defmt")]
        ::defmt::debug!($($arg)*);
        #[cfg(all(feature = "std", not(feature = "defmt")))]
        ::tracing::debug!($($arg)*);
        #[cfg(not(any(feature = "std", feature = "defmt")))]
        $crate::fmt::swallow!($($arg)*);
    }};
}

macro_rules! log_info {
    ($($arg:tt)*) => {{
        #[cfg(feature = "defmt")]
        ::defmt::info!($($arg)*);
        #[cfg(all(feature = "std", not(feature = "defmt")))]
        ::tracing::info!($($arg)*);
        #[cfg(not(any(feature = "std", feature = "defmt")))]
        $crate::fmt::swallow!($($arg)*);
    }};
}

macro_rules! log_warn {
    ($($arg:tt)*) => {{
        #[cfg(feature = "defmt")]
        ::defmt::warn!($($arg)*);
        #[cfg(all(feature = "std", not(feature = "defmt")))]
        ::tracing::warn!($($arg)*);
        #[cfg(not(any(feature = "std", feature = "defmt")))]
        $crate::fmt::swallow!($($arg)*);
    }};
}

macro_rules! swallow {
    ($fmt:literal $(, $x:expr)* $(,)?) => {{
        $( let _ = &$x; )*
    }};
}

pub(crate) use {log_debug, log_info, log_warn};
#[cfg(not(any(feature = "std", feature = "defmt")))]
pub(crate) use swallow;
