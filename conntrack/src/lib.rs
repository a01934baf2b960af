// SPDX-License-Identifier: Apache-2.0
// Copyright Open Network Fabric Authors

#![deny(clippy::all, clippy::pedantic)]

//! NAT-aware connection tracking
//!
//! Sockets only ever see the pre-NAT tuple of a connection. This crate resolves the post-NAT
//! (reply-path) tuple from a table maintained in the kernel by a conntrack probe, so that the
//! true remote endpoint of a translated connection can be reported.
//!
//! The entry point is [`new_conntracker`], which builds an [`EbpfConntracker`] (or a
//! [`NoopConntracker`] when tracking is disabled) behind the [`Conntracker`] trait.
//! [`new_kernel_conntracker`] does the same from a compiled probe object, with the table size and
//! proc root taken from [`ConntrackParams`]. Building the tracker:
//!
//! 1. starts the probes and takes over their table ([`ProbeManager`]),
//! 2. resolves the root network namespace ([`NamespaceResolver`]),
//! 3. replays the kernel conntrack table of both address families ([`ConntrackDumper`]) under
//!    one deadline, so that connections older than the probes are known,
//! 4. arms a background thread which detaches the dump probe after a grace period.
//!
//! Lookups are keyed with the root namespace first, then with the namespace of the connection.

pub mod cancel;
pub mod codec;
pub mod config;
mod conntracker;
pub mod dumper;
mod errors;
pub mod netns;
mod noop;
pub mod pool;
pub mod probes;
pub mod stats;
pub mod store;
#[cfg(any(test, feature = "testing"))]
pub mod testing;
mod tracker;
pub mod tuple;
mod warmup;


pub use cancel::{CancelHandle, CancelSignal, cancellation};
pub use config::{ConntrackParams, ConntrackParamsBuilder};
pub use conntracker::{CachedTable, Conntracker, new_conntracker, new_kernel_conntracker};
pub use dumper::ConntrackDumper;
pub use errors::ConntrackError;
pub use netns::{NamespaceResolver, ProcNamespaceResolver};
pub use noop::NoopConntracker;
pub use probes::{AyaProbeManager, ProbeManager};
pub use stats::StatsSnapshot;
pub use tracker::EbpfConntracker;
pub use tuple::{AddressFamily, ConnectionTuple, IpTranslation, NamespaceId, Protocol};
pub use warmup::LoaderState;
