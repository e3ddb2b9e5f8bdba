#![macro_use]
#![allow(unused_macros)]

//! Logging shim.
//!
//! With the `defmt` feature the macros forward to `defmt` (on-target
//! builds); with the `log` feature they forward to the `log` facade
//! (host builds and tests). With neither feature enabled they compile
//! to nothing, though arguments are still type-checked.

macro_rules! trace {
    ($($arg:expr),* $(,)?) => {{
        #[cfg(feature = "defmt")]
        ::defmt::trace!($($arg),*);
        #[cfg(all(feature = "log", not(feature = "defmt")))]
        ::log::trace!($($arg),*);
        #[cfg(not(any(feature = "defmt", feature = "log")))]
        let _ = ($(&$arg),*);
    }};
}

macro_rules! debug {
    ($($arg:expr),* $(,)?) => {{
        #[cfg(feature = "defmt")]
        ::defmt::debug!($($arg),*);
        #[cfg(all(feature = "log", not(feature = "defmt")))]
        ::log::debug!($($arg),*);
        #[cfg(not(any(feature = "defmt", feature = "log")))]
        let _ = ($(&$arg),*);
    }};
}

macro_rules! info {
    ($($arg:expr),* $(,)?) => {{
        #[cfg(feature = "defmt")]
        ::defmt::info!($($arg),*);
        #[cfg(all(feature = "log", not(feature = "defmt")))]
        ::log::info!($($arg),*);
        #[cfg(not(any(feature = "defmt", feature = "log")))]
        let _ = ($(&$arg),*);
    }};
}

macro_rules! warn {
    ($($arg:expr),* $(,)?) => {{
        #[cfg(feature = "defmt")]
        ::defmt::warn!($($arg),*);
        #[cfg(all(feature = "log", not(feature = "defmt")))]
        ::log::warn!($($arg),*);
        #[cfg(not(any(feature = "defmt", feature = "log")))]
        let _ = ($(&$arg),*);
    }};
}

macro_rules! error {
    ($($arg:expr),* $(,)?) => {{
        #[cfg(feature = "defmt")]
        ::defmt::error!($($arg),*);
        #[cfg(all(feature = "log", not(feature = "defmt")))]
        ::log::error!($($arg),*);
        #[cfg(not(any(feature = "defmt", feature = "log")))]
        let _ = ($(&$arg),*);
    }};
}
