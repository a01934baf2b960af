// SPDX-License-Identifier: Apache-2.0
// Copyright Open Network Fabric Authors

//! Conntracker backed by the table of the kernel conntrack probe.

use crate::cancel::{CancelHandle, CancelSignal, cancellation};
use crate::codec::{ConntrackTuple, DebugConntrackEntry};
use crate::config::ConntrackParams;
use crate::conntracker::{CachedTable, Conntracker};
use crate::dumper::ConntrackDumper;
use crate::errors::ConntrackError;
use crate::netns::NamespaceResolver;
use crate::pool::TuplePool;
use crate::probes::ProbeManager;
use crate::stats::{StatsSnapshot, TrackerStats, keys};
use crate::store::TranslationStore;
use crate::tuple::{ConnectionTuple, IpTranslation, NamespaceId};
use crate::warmup::{DumpHookDetacher, WarmupLoader, detach_dump_hook};
use concurrency::sync::atomic::{AtomicBool, Ordering};
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Instant;
use tracing::{Level, debug, enabled, info, trace, warn};

const ROOT_PID: u32 = 1;

/// Resolves NAT translations from the table the conntrack probe maintains.
///
/// The table is warmed up at construction by replaying the kernel conntrack table, so that
/// connections established before the probe was attached are known too.
pub struct EbpfConntracker {
    store: Arc<dyn TranslationStore>,
    probes: Arc<Mutex<Box<dyn ProbeManager>>>,
    dumper: Box<dyn ConntrackDumper>,
    root_ns: NamespaceId,
    pool: TuplePool,
    stats: TrackerStats,
    stop: Mutex<Option<CancelHandle>>,
    detacher: Mutex<Option<DumpHookDetacher>>,
    closed: AtomicBool,
}

impl EbpfConntracker {
    /// Start the probes, warm the table up and arm the delayed detach of the dump probe.
    ///
    /// The probes are stopped again if any step fails.
    ///
    /// # Errors
    ///
    /// Fails if the probes or their table are unavailable, the root namespace cannot be
    /// resolved, or the warm-up fails or exceeds `params.init_timeout`.
    #[tracing::instrument(level = "info", skip_all)]
    pub fn new(
        params: &ConntrackParams,
        mut probes: Box<dyn ProbeManager>,
        dumper: Box<dyn ConntrackDumper>,
        resolver: &dyn NamespaceResolver,
    ) -> Result<Self, ConntrackError> {
        debug!("{params}");
        let (store, root_ns) = match Self::attach(probes.as_mut(), resolver) {
            Ok(attached) => attached,
            Err(e) => {
                Self::stop_probes(probes.as_mut());
                return Err(e);
            }
        };

        let mut loader = WarmupLoader::new(dumper.as_ref(), params.init_timeout);
        let warmup = loader.run();
        dumper.stop();
        if let Err(e) = warmup {
            warn!("conntrack warm-up ended in state {:?}", loader.state());
            Self::stop_probes(probes.as_mut());
            return Err(e);
        }

        let probes = Arc::new(Mutex::new(probes));
        let (stop, stop_signal) = cancellation();
        let detacher =
            match DumpHookDetacher::spawn(Arc::clone(&probes), params.detach_grace, stop_signal) {
                Ok(detacher) => Some(detacher),
                Err(e) => {
                    warn!("could not spawn the detach thread, detaching now: {e}");
                    detach_dump_hook(&probes);
                    None
                }
            };

        info!("initialized ebpf conntrack, root netns {root_ns}");
        Ok(Self {
            store,
            probes,
            dumper,
            root_ns,
            pool: TuplePool::new(params.pool_capacity),
            stats: TrackerStats::new(),
            stop: Mutex::new(Some(stop)),
            detacher: Mutex::new(detacher),
            closed: AtomicBool::new(false),
        })
    }

    fn attach(
        probes: &mut dyn ProbeManager,
        resolver: &dyn NamespaceResolver,
    ) -> Result<(Arc<dyn TranslationStore>, NamespaceId), ConntrackError> {
        probes.start()?;
        let store = probes.take_store()?;
        let root_ns = resolver.netns_for_pid(ROOT_PID)?;
        Ok((store, root_ns))
    }

    fn stop_probes(probes: &mut dyn ProbeManager) {
        if let Err(e) = probes.stop() {
            warn!("error cleaning up ebpf conntrack: {e}");
        }
    }

    /// Namespace of PID 1, tried first for every lookup.
    #[must_use]
    pub fn root_ns(&self) -> NamespaceId {
        self.root_ns
    }

    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    fn lookup(&self, key: &ConntrackTuple, value: &mut ConntrackTuple) -> bool {
        if enabled!(Level::TRACE) {
            trace!("looking up in conntrack (tuple): {key}");
        }
        match self.store.lookup(key, value) {
            Ok(found) => found,
            Err(e) => {
                warn!("error looking up connection in ebpf conntrack map: {e}");
                false
            }
        }
    }

    fn delete(&self, key: &ConntrackTuple) {
        match self.store.delete(key) {
            Ok(true) => {}
            Ok(false) => {
                if enabled!(Level::TRACE) {
                    trace!("conntrack entry already gone: {key}");
                }
            }
            Err(e) => warn!("unable to delete conntrack entry from eBPF map: {e}"),
        }
    }

    /// Find the record of `conn`, keyed with the root namespace first, then with the
    /// namespace of the connection when it differs. On a hit, `key` holds the key that matched.
    fn find(
        &self,
        conn: &ConnectionTuple,
        key: &mut ConntrackTuple,
        value: &mut ConntrackTuple,
    ) -> bool {
        key.encode(conn);
        key.netns = self.root_ns.as_u32();
        if self.lookup(key, value) {
            return true;
        }
        if conn.netns == self.root_ns {
            return false;
        }
        key.netns = conn.netns.as_u32();
        self.lookup(key, value)
    }
}

impl Conntracker for EbpfConntracker {
    fn get_translation(&self, conn: &ConnectionTuple) -> Option<IpTranslation> {
        if self.is_closed() {
            return None;
        }
        let start = Instant::now();
        let mut key = self.pool.acquire();
        let mut value = self.pool.acquire();
        let found = self.find(conn, &mut key, &mut value);
        let translation = found.then(|| value.translation());
        self.stats.record_get(start.elapsed());
        if found && enabled!(Level::TRACE) {
            trace!("found conntrack entry for {conn}: {}", *value);
        }
        translation
    }

    fn delete_translation(&self, conn: &ConnectionTuple) {
        if self.is_closed() {
            return;
        }
        let start = Instant::now();
        let mut key = self.pool.acquire();
        let mut value = self.pool.acquire();
        if self.find(conn, &mut key, &mut value) {
            self.delete(&key);
            // the probe also keyed the translation by its reply tuple
            self.delete(&value);
        }
        self.stats.record_unregister(start.elapsed());
    }

    fn dump_cached_table(&self, cancel: &CancelSignal) -> Result<CachedTable, ConntrackError> {
        if cancel.is_cancelled() {
            return Err(ConntrackError::Cancelled);
        }
        let mut table = CachedTable::new();
        if self.is_closed() {
            return Ok(table);
        }
        for entry in self.store.iter() {
            if cancel.is_cancelled() {
                return Err(ConntrackError::Cancelled);
            }
            let (origin, reply) = entry?;
            table
                .entry(origin.netns())
                .or_default()
                .push(DebugConntrackEntry::new(&origin, &reply));
        }
        Ok(table)
    }

    fn stats(&self) -> StatsSnapshot {
        let mut snapshot = StatsSnapshot::default();
        if let Some(telemetry) = self.store.telemetry() {
            snapshot.insert(
                keys::REGISTERS_TOTAL,
                i64::try_from(telemetry.registers).unwrap_or(i64::MAX),
            );
            snapshot.insert(
                keys::REGISTERS_DROPPED,
                i64::try_from(telemetry.dropped).unwrap_or(i64::MAX),
            );
        }
        self.stats.write_into(&mut snapshot);
        snapshot.merge(self.dumper.stats());
        snapshot
    }

    fn is_sampling(&self) -> bool {
        false
    }

    fn close(&self) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        if let Some(stop) = self.stop.lock().take() {
            stop.cancel();
        }
        if let Some(mut detacher) = self.detacher.lock().take() {
            detacher.join();
        }
        Self::stop_probes(&mut **self.probes.lock());
        info!("ebpf conntrack closed");
    }
}

impl Drop for EbpfConntracker {
    fn drop(&mut self) {
        self.close();
    }
}
