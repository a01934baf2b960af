// SPDX-License-Identifier: Apache-2.0
// Copyright Open Network Fabric Authors

use super::{ConntrackTelemetry, StoreError, TableIter, TranslationStore};
use crate::codec::ConntrackTuple;
use crate::tuple::ConnectionTuple;
use dashmap::DashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::debug;

/// In-process [`TranslationStore`].
///
/// Plays the part of the kernel table where no probe can be loaded: [`MemoryStore::register`]
/// writes the same pair of records the probe writes when a NAT-ed connection is confirmed.
#[derive(Debug, Default)]
pub struct MemoryStore {
    table: DashMap<ConntrackTuple, ConntrackTuple>,
    capacity: Option<usize>,
    registers: AtomicU64,
    dropped: AtomicU64,
}

impl MemoryStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// A store which refuses new keys once it holds `capacity` records.
    #[must_use]
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            table: DashMap::with_capacity(capacity),
            capacity: Some(capacity),
            ..Self::default()
        }
    }

    /// Record a translation in both directions: `origin -> reply` and `reply -> origin`.
    ///
    /// Returns `false` if either record was dropped for lack of room.
    pub fn register(&self, origin: &ConnectionTuple, reply: &ConnectionTuple) -> bool {
        let origin = ConntrackTuple::from(origin);
        let reply = ConntrackTuple::from(reply);
        let forward = self.insert(origin, reply);
        let reverse = self.insert(reply, origin);
        forward && reverse
    }

    /// Store a single record. Returns `false` if the table is full.
    pub fn insert(&self, key: ConntrackTuple, value: ConntrackTuple) -> bool {
        if let Some(capacity) = self.capacity
            && self.table.len() >= capacity
            && !self.table.contains_key(&key)
        {
            self.dropped.fetch_add(1, Ordering::Relaxed);
            debug!("conntrack table full, dropping {key}");
            return false;
        }
        self.table.insert(key, value);
        self.registers.fetch_add(1, Ordering::Relaxed);
        true
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.table.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.table.is_empty()
    }

    #[must_use]
    pub fn contains(&self, key: &ConntrackTuple) -> bool {
        self.table.contains_key(key)
    }
}

impl TranslationStore for MemoryStore {
    fn lookup(&self, key: &ConntrackTuple, value: &mut ConntrackTuple) -> Result<bool, StoreError> {
        match self.table.get(key) {
            Some(found) => {
                *value = *found;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    fn delete(&self, key: &ConntrackTuple) -> Result<bool, StoreError> {
        Ok(self.table.remove(key).is_some())
    }

    fn iter(&self) -> TableIter<'_> {
        Box::new(
            self.table
                .iter()
                .map(|entry| Ok((*entry.key(), *entry.value()))),
        )
    }

    fn telemetry(&self) -> Option<ConntrackTelemetry> {
        Some(ConntrackTelemetry {
            registers: self.registers.load(Ordering::Relaxed),
            dropped: self.dropped.load(Ordering::Relaxed),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tuple::{NamespaceId, Protocol};

    fn udp(src: &str, dst: &str) -> ConnectionTuple {
        ConnectionTuple::new(
            Protocol::Udp,
            src.parse().unwrap(),
            dst.parse().unwrap(),
            NamespaceId::new(1),
        )
    }

    #[test]
    fn test_register_writes_both_directions() {
        let store = MemoryStore::new();
        let origin = udp("10.0.0.5:5353", "10.0.0.1:53");
        let reply = udp("10.0.0.1:53", "192.0.2.7:5353");
        assert!(store.register(&origin, &reply));
        assert_eq!(store.len(), 2);

        let mut value = ConntrackTuple::default();
        assert!(store.lookup(&(&reply).into(), &mut value).unwrap());
        assert_eq!(value, ConntrackTuple::from(&origin));

        assert!(store.delete(&(&origin).into()).unwrap());
        assert!(!store.delete(&(&origin).into()).unwrap());
        assert!(!store.lookup(&(&origin).into(), &mut value).unwrap());
    }

    #[test]
    fn test_full_table_drops_new_keys() {
        let store = MemoryStore::with_capacity(2);
        assert!(store.register(&udp("10.0.0.5:1", "10.0.0.1:2"), &udp("10.0.0.1:2", "10.0.0.9:1")));
        assert!(!store.register(&udp("10.0.0.5:3", "10.0.0.1:4"), &udp("10.0.0.1:4", "10.0.0.9:3")));
        let telemetry = store.telemetry().unwrap();
        assert_eq!(telemetry.registers, 2);
        assert_eq!(telemetry.dropped, 2);
        assert_eq!(store.iter().count(), 2);
    }
}
