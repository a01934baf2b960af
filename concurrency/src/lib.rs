// SPDX-License-Identifier: Apache-2.0
// Copyright Open Network Fabric Authors

//! Synchronization primitives which can be swapped for model-checked versions.
//!
//! The conntrack crate takes its locks, atomics and threads from here so that the same code runs
//! on `std` in production and under `shuttle` (or `loom`) in tests.

#![deny(
    unsafe_code,
    missing_docs,
    clippy::all,
    clippy::pedantic,
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::panic
)]
#![allow(missing_docs)]

mod macros;

pub use concurrency_macros::concurrency_mode;

#[cfg(all(feature = "loom", feature = "shuttle"))]
compile_error!("Cannot enable both 'loom' and 'shuttle' features at the same time");

#[cfg(not(any(feature = "loom", feature = "shuttle")))]
pub use std::sync;

#[cfg(not(any(feature = "loom", feature = "shuttle")))]
pub use std::thread;

#[cfg(feature = "loom")]
pub use loom::sync;

#[cfg(feature = "loom")]
pub use loom::thread;

#[cfg(feature = "shuttle")]
pub use shuttle::sync;

#[cfg(feature = "shuttle")]
pub use shuttle::thread;
