// SPDX-License-Identifier: Apache-2.0
// Copyright Open Network Fabric Authors

//! Initial ingest of the kernel's existing NAT entries, and the delayed teardown of the probe
//! used for it.

use crate::cancel::CancelSignal;
use crate::dumper::ConntrackDumper;
use crate::errors::ConntrackError;
use crate::probes::ProbeManager;
use crate::tuple::AddressFamily;
use crossbeam_channel::{after, at, select};
use parking_lot::Mutex;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoaderState {
    Idle,
    Dumping(AddressFamily),
    TimedOut,
    Failed,
    Ready,
}

/// Replays the conntrack table of each address family under a single overall deadline.
pub(crate) struct WarmupLoader<'a> {
    dumper: &'a dyn ConntrackDumper,
    timeout: Duration,
    state: LoaderState,
}

impl<'a> WarmupLoader<'a> {
    pub(crate) fn new(dumper: &'a dyn ConntrackDumper, timeout: Duration) -> Self {
        Self {
            dumper,
            timeout,
            state: LoaderState::Idle,
        }
    }

    pub(crate) fn state(&self) -> LoaderState {
        self.state
    }

    pub(crate) fn run(&mut self) -> Result<(), ConntrackError> {
        let deadline = at(Instant::now() + self.timeout);
        for family in AddressFamily::ALL {
            self.state = LoaderState::Dumping(family);
            debug!("dumping {family} conntrack table");
            let done = match self.dumper.dump_and_discard_table(family) {
                Ok(done) => done,
                Err(e) => {
                    self.state = LoaderState::Failed;
                    return Err(e.into());
                }
            };
            select! {
                recv(done) -> _ => debug!("{family} conntrack table dump complete"),
                recv(deadline) -> _ => {
                    self.state = LoaderState::TimedOut;
                    return Err(ConntrackError::InitializationTimeout(self.timeout));
                }
            }
        }
        self.state = LoaderState::Ready;
        info!("conntrack warm-up complete");
        Ok(())
    }
}

/// Detach the netlink dump probe, logging failures.
pub(crate) fn detach_dump_hook(probes: &Mutex<Box<dyn ProbeManager>>) {
    if let Err(e) = probes.lock().detach_dump_hook() {
        warn!("failed to detach the conntrack dump probe: {e}");
    }
}

/// Background thread which detaches the dump probe once its grace period is over, or as soon
/// as the tracker stops.
#[derive(Debug)]
pub(crate) struct DumpHookDetacher {
    handle: Option<JoinHandle<()>>,
}

impl DumpHookDetacher {
    pub(crate) fn spawn(
        probes: Arc<Mutex<Box<dyn ProbeManager>>>,
        grace: Duration,
        stop: CancelSignal,
    ) -> std::io::Result<Self> {
        let handle = thread::Builder::new()
            .name("conntrack-detach".to_string())
            .spawn(move || {
                select! {
                    recv(after(grace)) -> _ => debug!("detaching conntrack dump probe after {grace:?}"),
                    recv(stop.receiver()) -> _ => debug!("conntrack stopped, detaching dump probe"),
                }
                detach_dump_hook(&probes);
            })?;
        Ok(Self {
            handle: Some(handle),
        })
    }

    pub(crate) fn join(&mut self) {
        if let Some(handle) = self.handle.take()
            && handle.join().is_err()
        {
            error!("conntrack detach thread panicked");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cancel::cancellation;
    use crate::testing::{DumpBehavior, FakeDumper, FakeProbes};

    #[test]
    fn test_dumps_both_families_in_order() {
        let dumper = FakeDumper::new(DumpBehavior::Complete);
        let mut loader = WarmupLoader::new(&dumper, Duration::from_secs(5));
        assert_eq!(loader.state(), LoaderState::Idle);
        loader.run().unwrap();
        assert_eq!(loader.state(), LoaderState::Ready);
        assert_eq!(
            dumper.requested(),
            vec![AddressFamily::Ipv4, AddressFamily::Ipv6]
        );
    }

    #[test]
    fn test_hang_up_counts_as_done() {
        let dumper = FakeDumper::new(DumpBehavior::HangUp);
        let mut loader = WarmupLoader::new(&dumper, Duration::from_secs(5));
        loader.run().unwrap();
        assert_eq!(loader.state(), LoaderState::Ready);
    }

    #[test]
    fn test_deadline_covers_both_families() {
        let dumper = FakeDumper::new(DumpBehavior::Stall);
        let timeout = Duration::from_millis(100);
        let mut loader = WarmupLoader::new(&dumper, timeout);
        let started = Instant::now();
        let err = loader.run().unwrap_err();
        assert!(matches!(err, ConntrackError::InitializationTimeout(t) if t == timeout));
        assert!(started.elapsed() >= timeout);
        assert!(started.elapsed() < timeout * 20);
        assert_eq!(loader.state(), LoaderState::TimedOut);
        assert_eq!(dumper.requested(), vec![AddressFamily::Ipv4]);
    }

    #[test]
    fn test_dump_failure_is_not_a_timeout() {
        let dumper = FakeDumper::new(DumpBehavior::Fail);
        let mut loader = WarmupLoader::new(&dumper, Duration::from_secs(5));
        assert!(matches!(loader.run(), Err(ConntrackError::Dump(_))));
        assert_eq!(loader.state(), LoaderState::Failed);
    }

    #[test]
    fn test_detacher_fires_on_stop() {
        let mut probes = FakeProbes::new();
        probes.start().unwrap();
        let events = probes.events();
        let probes: Arc<Mutex<Box<dyn ProbeManager>>> = Arc::new(Mutex::new(Box::new(probes)));
        let (handle, signal) = cancellation();
        let mut detacher =
            DumpHookDetacher::spawn(probes, Duration::from_secs(3600), signal).unwrap();
        handle.cancel();
        detacher.join();
        assert_eq!(events.detached(), 1);
    }

    #[test]
    fn test_detacher_fires_after_grace() {
        let mut probes = FakeProbes::new();
        probes.start().unwrap();
        let events = probes.events();
        let probes: Arc<Mutex<Box<dyn ProbeManager>>> = Arc::new(Mutex::new(Box::new(probes)));
        let (_handle, signal) = cancellation();
        let mut detacher =
            DumpHookDetacher::spawn(probes, Duration::from_millis(20), signal).unwrap();
        detacher.join();
        assert_eq!(events.detached(), 1);
    }
}
