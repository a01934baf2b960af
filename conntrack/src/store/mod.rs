// SPDX-License-Identifier: Apache-2.0
// Copyright Open Network Fabric Authors

//! Access to the table of NAT translations populated by the kernel probe.

mod bpf;
mod memory;

pub use bpf::BpfStore;
pub use memory::MemoryStore;

use crate::codec::ConntrackTuple;

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("conntrack map operation failed: {0}")]
    Map(#[from] aya::maps::MapError),
    #[error("conntrack table backend failure: {0}")]
    Backend(String),
}

/// Counters maintained by the kernel probe, stored at index 0 of the telemetry map.
#[repr(C)]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ConntrackTelemetry {
    pub registers: u64,
    pub dropped: u64,
}

// SAFETY: `repr(C)` with two `u64` fields and no padding.
unsafe impl aya::Pod for ConntrackTelemetry {}

/// An (original, reply) pair as stored in the table.
pub type TableEntry = (ConntrackTuple, ConntrackTuple);

pub type TableIter<'a> = Box<dyn Iterator<Item = Result<TableEntry, StoreError>> + 'a>;

/// A key/value table of [`ConntrackTuple`]s, safe for concurrent lookups and deletions.
///
/// The table is written by an external producer (the kernel probe): this side only reads and
/// deletes.
pub trait TranslationStore: Send + Sync {
    /// Copy the value stored under `key` into `value`. Returns `false` on a miss.
    ///
    /// # Errors
    ///
    /// Fails if the table cannot be queried. A missing key is not an error.
    fn lookup(&self, key: &ConntrackTuple, value: &mut ConntrackTuple) -> Result<bool, StoreError>;

    /// Remove `key`. Returns `false` if it was not present.
    ///
    /// # Errors
    ///
    /// Fails if the table cannot be updated. A missing key is not an error.
    fn delete(&self, key: &ConntrackTuple) -> Result<bool, StoreError>;

    /// Iterate lazily over every entry. The scan ends after the first error
    /// it yields.
    fn iter(&self) -> TableIter<'_>;

    /// Counters from the producer side, when it exposes any.
    fn telemetry(&self) -> Option<ConntrackTelemetry> {
        None
    }
}
