// SPDX-License-Identifier: Apache-2.0
// Copyright Open Network Fabric Authors

//! Item-level switches on the concurrency backend this crate was built with.
//!
//! The feature flags checked are the ones of *this* crate, not of the crate expanding the macro,
//! so a test module guarded by `with_shuttle!` only exists when the tracker was built against
//! `shuttle::sync`.

/// Keep the wrapped items only when built against `shuttle`.
///
/// ```
/// # use nattrack_concurrency::with_shuttle;
/// with_shuttle! {
///     fn explore_interleavings() {}
/// }
/// ```
#[cfg(all(feature = "shuttle", not(feature = "silence_clippy")))]
#[macro_export]
macro_rules! with_shuttle {
    ($($item:item)*) => {
        $( $item )*
    };
}

#[cfg(not(all(feature = "shuttle", not(feature = "silence_clippy"))))]
#[macro_export]
macro_rules! with_shuttle {
    ($($item:item)*) => {};
}

/// Keep the wrapped items only when built against `loom`.
#[cfg(all(feature = "loom", not(feature = "silence_clippy")))]
#[macro_export]
macro_rules! with_loom {
    ($($item:item)*) => {
        $( $item )*
    };
}

#[cfg(not(all(feature = "loom", not(feature = "silence_clippy"))))]
#[macro_export]
macro_rules! with_loom {
    ($($item:item)*) => {};
}

/// Keep the wrapped items only when built against the standard library primitives.
///
/// With `--all-features` both model checkers are on at once; the std items are kept in that case
/// so clippy still sees them.
///
/// ```
/// # use nattrack_concurrency::with_std;
/// with_std! {
///     fn run_on_real_threads() {}
/// }
/// ```
#[cfg(any(
    not(any(feature = "loom", feature = "shuttle")),
    all(feature = "loom", feature = "shuttle", feature = "silence_clippy")
))]
#[macro_export]
macro_rules! with_std {
    ($($item:item)*) => {
        $( $item )*
    };
}

#[cfg(not(any(
    not(any(feature = "loom", feature = "shuttle")),
    all(feature = "loom", feature = "shuttle", feature = "silence_clippy")
)))]
#[macro_export]
macro_rules! with_std {
    ($($item:item)*) => {};
}
