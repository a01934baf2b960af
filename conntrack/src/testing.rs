// SPDX-License-Identifier: Apache-2.0
// Copyright Open Network Fabric Authors

//! Stand-ins for the kernel side of the tracker: probes, netlink dumps and namespaces.

use crate::cancel::CancelHandle;
use crate::codec::ConntrackTuple;
use crate::dumper::{ConntrackDumper, DumpDone, DumpError};
use crate::netns::{NamespaceResolver, NetnsError};
use crate::probes::{CONNTRACK_MAP, ProbeError, ProbeManager};
use crate::store::{ConntrackTelemetry, MemoryStore, StoreError, TableIter, TranslationStore};
use crate::tuple::{AddressFamily, ConnectionTuple, NamespaceId};
use crossbeam_channel::Sender;
use parking_lot::Mutex;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

/// How a [`FakeDumper`] completes the dumps it is asked for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DumpBehavior {
    /// Send a completion message.
    Complete,
    /// Drop the sender without a message.
    HangUp,
    /// Never complete.
    Stall,
    /// Refuse the request.
    Fail,
}

/// A [`ConntrackDumper`] which can replay pre-existing translations into a [`MemoryStore`], the
/// way a real dump makes the kernel probe see existing connections.
#[derive(Debug)]
pub struct FakeDumper {
    behavior: DumpBehavior,
    requested: Mutex<Vec<AddressFamily>>,
    stalled: Mutex<Vec<Sender<()>>>,
    stopped: AtomicBool,
    replay: Option<(Arc<MemoryStore>, Vec<(ConnectionTuple, ConnectionTuple)>)>,
}

impl FakeDumper {
    #[must_use]
    pub fn new(behavior: DumpBehavior) -> Self {
        Self {
            behavior,
            requested: Mutex::new(Vec::new()),
            stalled: Mutex::new(Vec::new()),
            stopped: AtomicBool::new(false),
            replay: None,
        }
    }

    /// Register `existing` (original, reply) pairs into `store` when their family is dumped.
    #[must_use]
    pub fn replaying(
        mut self,
        store: Arc<MemoryStore>,
        existing: Vec<(ConnectionTuple, ConnectionTuple)>,
    ) -> Self {
        self.replay = Some((store, existing));
        self
    }

    #[must_use]
    pub fn requested(&self) -> Vec<AddressFamily> {
        self.requested.lock().clone()
    }

    #[must_use]
    pub fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::Relaxed)
    }
}

impl ConntrackDumper for FakeDumper {
    fn dump_and_discard_table(&self, family: AddressFamily) -> Result<DumpDone, DumpError> {
        if self.is_stopped() {
            return Err(DumpError::Stopped);
        }
        self.requested.lock().push(family);
        if self.behavior == DumpBehavior::Fail {
            return Err(DumpError::Io {
                family,
                source: std::io::Error::other("netlink socket closed"),
            });
        }
        if let Some((store, existing)) = &self.replay {
            for (origin, reply) in existing.iter().filter(|(o, _)| o.family == family) {
                store.register(origin, reply);
            }
        }
        let (tx, rx) = crossbeam_channel::bounded(1);
        match self.behavior {
            DumpBehavior::Complete => {
                let _ = tx.send(());
            }
            DumpBehavior::Stall => self.stalled.lock().push(tx),
            DumpBehavior::HangUp | DumpBehavior::Fail => drop(tx),
        }
        Ok(rx)
    }

    fn stats(&self) -> BTreeMap<String, i64> {
        let requests = i64::try_from(self.requested.lock().len()).unwrap_or(i64::MAX);
        BTreeMap::from([("dump_requests".to_string(), requests)])
    }

    fn stop(&self) {
        self.stopped.store(true, Ordering::Relaxed);
        self.stalled.lock().clear();
    }
}

/// What happened to a [`FakeProbes`], readable after the tracker took ownership of it.
#[derive(Debug, Default)]
pub struct ProbeEvents {
    started: AtomicUsize,
    detached: AtomicUsize,
    stopped: AtomicUsize,
}

impl ProbeEvents {
    #[must_use]
    pub fn started(&self) -> usize {
        self.started.load(Ordering::SeqCst)
    }

    #[must_use]
    pub fn detached(&self) -> usize {
        self.detached.load(Ordering::SeqCst)
    }

    #[must_use]
    pub fn stopped(&self) -> usize {
        self.stopped.load(Ordering::SeqCst)
    }
}

/// A [`ProbeManager`] handing out a caller-provided table.
pub struct FakeProbes {
    store: Option<Arc<dyn TranslationStore>>,
    events: Arc<ProbeEvents>,
    fail_start: bool,
    dump_hook: bool,
}

impl FakeProbes {
    #[must_use]
    pub fn new() -> Self {
        Self::with_store(Arc::new(MemoryStore::new()))
    }

    #[must_use]
    pub fn with_store(store: Arc<dyn TranslationStore>) -> Self {
        Self {
            store: Some(store),
            events: Arc::new(ProbeEvents::default()),
            fail_start: false,
            dump_hook: false,
        }
    }

    /// Probes that fail to attach.
    #[must_use]
    pub fn failing_start(mut self) -> Self {
        self.fail_start = true;
        self
    }

    /// Probes whose table cannot be handed over.
    #[must_use]
    pub fn without_store(mut self) -> Self {
        self.store = None;
        self
    }

    #[must_use]
    pub fn events(&self) -> Arc<ProbeEvents> {
        Arc::clone(&self.events)
    }
}

impl Default for FakeProbes {
    fn default() -> Self {
        Self::new()
    }
}

impl ProbeManager for FakeProbes {
    fn start(&mut self) -> Result<(), ProbeError> {
        self.events.started.fetch_add(1, Ordering::SeqCst);
        if self.fail_start {
            return Err(ProbeError::MissingProgram("kprobe___nf_conntrack_hash_insert"));
        }
        self.dump_hook = true;
        Ok(())
    }

    fn take_store(&mut self) -> Result<Arc<dyn TranslationStore>, ProbeError> {
        self.store.take().ok_or(ProbeError::MissingMap(CONNTRACK_MAP))
    }

    fn detach_dump_hook(&mut self) -> Result<(), ProbeError> {
        if std::mem::take(&mut self.dump_hook) {
            self.events.detached.fetch_add(1, Ordering::SeqCst);
        }
        Ok(())
    }

    fn stop(&mut self) -> Result<(), ProbeError> {
        self.dump_hook = false;
        self.events.stopped.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

/// A [`NamespaceResolver`] with a fixed pid to namespace table.
#[derive(Debug, Default, Clone)]
pub struct StaticResolver {
    namespaces: HashMap<u32, NamespaceId>,
}

impl StaticResolver {
    /// A resolver which only knows PID 1, in namespace `root`.
    #[must_use]
    pub fn root(root: NamespaceId) -> Self {
        Self {
            namespaces: HashMap::from([(1, root)]),
        }
    }
}

impl NamespaceResolver for StaticResolver {
    fn netns_for_pid(&self, pid: u32) -> Result<NamespaceId, NetnsError> {
        self.namespaces
            .get(&pid)
            .copied()
            .ok_or(NetnsError::UnknownPid(pid))
    }
}

/// Wraps a store and counts the operations going through it.
pub struct CountingStore {
    inner: Arc<dyn TranslationStore>,
    lookups: AtomicUsize,
    deletes: AtomicUsize,
}

impl CountingStore {
    #[must_use]
    pub fn new(inner: Arc<dyn TranslationStore>) -> Self {
        Self {
            inner,
            lookups: AtomicUsize::new(0),
            deletes: AtomicUsize::new(0),
        }
    }

    #[must_use]
    pub fn lookups(&self) -> usize {
        self.lookups.load(Ordering::SeqCst)
    }

    #[must_use]
    pub fn deletes(&self) -> usize {
        self.deletes.load(Ordering::SeqCst)
    }
}

impl TranslationStore for CountingStore {
    fn lookup(&self, key: &ConntrackTuple, value: &mut ConntrackTuple) -> Result<bool, StoreError> {
        self.lookups.fetch_add(1, Ordering::SeqCst);
        self.inner.lookup(key, value)
    }

    fn delete(&self, key: &ConntrackTuple) -> Result<bool, StoreError> {
        self.deletes.fetch_add(1, Ordering::SeqCst);
        self.inner.delete(key)
    }

    fn iter(&self) -> TableIter<'_> {
        self.inner.iter()
    }

    fn telemetry(&self) -> Option<ConntrackTelemetry> {
        self.inner.telemetry()
    }
}

/// A store whose point operations fail and whose scans break after `fail_after` entries.
pub struct BrokenStore {
    inner: MemoryStore,
    fail_after: usize,
}

impl BrokenStore {
    #[must_use]
    pub fn new(inner: MemoryStore, fail_after: usize) -> Self {
        Self { inner, fail_after }
    }
}

impl TranslationStore for BrokenStore {
    fn lookup(
        &self,
        _key: &ConntrackTuple,
        _value: &mut ConntrackTuple,
    ) -> Result<bool, StoreError> {
        Err(StoreError::Backend("lookup refused".to_string()))
    }

    fn delete(&self, _key: &ConntrackTuple) -> Result<bool, StoreError> {
        Err(StoreError::Backend("delete refused".to_string()))
    }

    fn iter(&self) -> TableIter<'_> {
        let failure = std::iter::once(Err(StoreError::Backend(
            "map changed during iteration".to_string(),
        )));
        Box::new(self.inner.iter().take(self.fail_after).chain(failure))
    }
}

/// Wraps a store and fires `handle` as soon as a scan yields its first entry.
pub struct CancelOnFirstEntry {
    inner: Arc<dyn TranslationStore>,
    handle: Mutex<Option<CancelHandle>>,
    scanned: AtomicUsize,
}

impl CancelOnFirstEntry {
    #[must_use]
    pub fn new(inner: Arc<dyn TranslationStore>, handle: CancelHandle) -> Self {
        Self {
            inner,
            handle: Mutex::new(Some(handle)),
            scanned: AtomicUsize::new(0),
        }
    }

    /// Entries pulled out of scans so far.
    #[must_use]
    pub fn scanned(&self) -> usize {
        self.scanned.load(Ordering::SeqCst)
    }
}

impl TranslationStore for CancelOnFirstEntry {
    fn lookup(&self, key: &ConntrackTuple, value: &mut ConntrackTuple) -> Result<bool, StoreError> {
        self.inner.lookup(key, value)
    }

    fn delete(&self, key: &ConntrackTuple) -> Result<bool, StoreError> {
        self.inner.delete(key)
    }

    fn iter(&self) -> TableIter<'_> {
        Box::new(self.inner.iter().inspect(|_| {
            self.scanned.fetch_add(1, Ordering::SeqCst);
            if let Some(handle) = self.handle.lock().take() {
                handle.cancel();
            }
        }))
    }
}
