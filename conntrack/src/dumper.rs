// SPDX-License-Identifier: Apache-2.0
// Copyright Open Network Fabric Authors

//! Seam to the netlink conntrack consumer used to warm up the table.

use crate::tuple::AddressFamily;
use crossbeam_channel::Receiver;
use std::collections::BTreeMap;

#[derive(Debug, thiserror::Error)]
pub enum DumpError {
    #[error("failed to dump the {family} conntrack table: {source}")]
    Io {
        family: AddressFamily,
        #[source]
        source: std::io::Error,
    },
    #[error("conntrack consumer is stopped")]
    Stopped,
}

/// Signals completion of one dump: either a message or the sender hanging up.
pub type DumpDone = Receiver<()>;

/// Asks the kernel to replay its connection tracking table.
///
/// Replaying the table makes the kernel run the conntrack netlink fill path for every existing
/// entry, which is how the probe learns about connections established before it was attached.
/// The dumped messages themselves are discarded.
pub trait ConntrackDumper: Send + Sync {
    /// Start dumping the table for `family`.
    ///
    /// # Errors
    ///
    /// Fails if the dump request cannot be issued.
    fn dump_and_discard_table(&self, family: AddressFamily) -> Result<DumpDone, DumpError>;

    /// Counters of the consumer, merged into the tracker statistics.
    fn stats(&self) -> BTreeMap<String, i64>;

    /// Release the consumer. Statistics remain available.
    fn stop(&self);
}

impl<D: ConntrackDumper + ?Sized> ConntrackDumper for std::sync::Arc<D> {
    fn dump_and_discard_table(&self, family: AddressFamily) -> Result<DumpDone, DumpError> {
        (**self).dump_and_discard_table(family)
    }

    fn stats(&self) -> BTreeMap<String, i64> {
        (**self).stats()
    }

    fn stop(&self) {
        (**self).stop();
    }
}
