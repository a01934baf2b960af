// SPDX-License-Identifier: Apache-2.0
// Copyright Open Network Fabric Authors

//! Tracker counters and their snapshot form.

use concurrency::sync::atomic::{AtomicU64, Ordering};
use serde::Serialize;
use std::collections::BTreeMap;
use std::fmt::Display;
use std::time::Duration;

/// Names of the counters reported in a [`StatsSnapshot`].
pub mod keys {
    pub const REGISTERS_TOTAL: &str = "registers_total";
    pub const REGISTERS_DROPPED: &str = "registers_dropped";
    pub const GETS_TOTAL: &str = "gets_total";
    pub const GET_TIME_TOTAL_NS: &str = "get_time_total_ns";
    pub const NANOSECONDS_PER_GET: &str = "nanoseconds_per_get";
    pub const UNREGISTERS_TOTAL: &str = "unregisters_total";
    pub const UNREGISTER_TIME_TOTAL_NS: &str = "unregister_time_total_ns";
    pub const NANOSECONDS_PER_UNREGISTER: &str = "nanoseconds_per_unregister";
}

const GETS_METRIC: &str = "nattrack_conntrack_gets_total";
const GET_LATENCY_METRIC: &str = "nattrack_conntrack_get_duration_seconds";
const UNREGISTERS_METRIC: &str = "nattrack_conntrack_unregisters_total";
const UNREGISTER_LATENCY_METRIC: &str = "nattrack_conntrack_unregister_duration_seconds";

fn nanos(elapsed: Duration) -> u64 {
    u64::try_from(elapsed.as_nanos()).unwrap_or(u64::MAX)
}

fn signed(value: u64) -> i64 {
    i64::try_from(value).unwrap_or(i64::MAX)
}

pub(crate) struct TrackerStats {
    gets: AtomicU64,
    get_time_ns: AtomicU64,
    unregisters: AtomicU64,
    unregister_time_ns: AtomicU64,
}

impl TrackerStats {
    pub(crate) fn new() -> Self {
        Self {
            gets: AtomicU64::new(0),
            get_time_ns: AtomicU64::new(0),
            unregisters: AtomicU64::new(0),
            unregister_time_ns: AtomicU64::new(0),
        }
    }

    pub(crate) fn record_get(&self, elapsed: Duration) {
        self.gets.fetch_add(1, Ordering::Relaxed);
        self.get_time_ns.fetch_add(nanos(elapsed), Ordering::Relaxed);
        metrics::counter!(GETS_METRIC).increment(1);
        metrics::histogram!(GET_LATENCY_METRIC).record(elapsed.as_secs_f64());
    }

    pub(crate) fn record_unregister(&self, elapsed: Duration) {
        self.unregisters.fetch_add(1, Ordering::Relaxed);
        self.unregister_time_ns
            .fetch_add(nanos(elapsed), Ordering::Relaxed);
        metrics::counter!(UNREGISTERS_METRIC).increment(1);
        metrics::histogram!(UNREGISTER_LATENCY_METRIC).record(elapsed.as_secs_f64());
    }

    pub(crate) fn write_into(&self, snapshot: &mut StatsSnapshot) {
        let gets = self.gets.load(Ordering::Relaxed);
        let get_time = self.get_time_ns.load(Ordering::Relaxed);
        let unregisters = self.unregisters.load(Ordering::Relaxed);
        let unregister_time = self.unregister_time_ns.load(Ordering::Relaxed);

        snapshot.insert(keys::GETS_TOTAL, signed(gets));
        snapshot.insert(keys::GET_TIME_TOTAL_NS, signed(get_time));
        if gets > 0 {
            snapshot.insert(keys::NANOSECONDS_PER_GET, signed(get_time / gets));
        }
        snapshot.insert(keys::UNREGISTERS_TOTAL, signed(unregisters));
        snapshot.insert(keys::UNREGISTER_TIME_TOTAL_NS, signed(unregister_time));
        if unregisters > 0 {
            snapshot.insert(
                keys::NANOSECONDS_PER_UNREGISTER,
                signed(unregister_time / unregisters),
            );
        }
    }
}

/// A point-in-time copy of the tracker counters, ordered by name.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct StatsSnapshot(BTreeMap<String, i64>);

impl StatsSnapshot {
    #[must_use]
    pub fn get(&self, name: &str) -> Option<i64> {
        self.0.get(name).copied()
    }

    pub fn insert(&mut self, name: impl Into<String>, value: i64) {
        self.0.insert(name.into(), value);
    }

    /// Add counters from another source. Existing names are overwritten.
    pub fn merge(&mut self, other: BTreeMap<String, i64>) {
        self.0.extend(other);
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, i64)> {
        self.0.iter().map(|(name, value)| (name.as_str(), *value))
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    #[must_use]
    pub fn into_inner(self) -> BTreeMap<String, i64> {
        self.0
    }
}

impl Display for StatsSnapshot {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        for (name, value) in &self.0 {
            writeln!(f, "{name}: {value}")?;
        }
        Ok(())
    }
}
