// SPDX-License-Identifier: Apache-2.0
// Copyright Open Network Fabric Authors

use crate::cancel::CancelSignal;
use crate::codec::DebugConntrackEntry;
use crate::config::ConntrackParams;
use crate::dumper::ConntrackDumper;
use crate::errors::ConntrackError;
use crate::netns::{NamespaceResolver, ProcNamespaceResolver};
use crate::noop::NoopConntracker;
use crate::probes::{AyaProbeManager, ProbeManager};
use crate::stats::StatsSnapshot;
use crate::tracker::EbpfConntracker;
use crate::tuple::{ConnectionTuple, IpTranslation, NamespaceId};
use std::collections::BTreeMap;
use tracing::{info, warn};

/// Cached entries of a debug dump, grouped by the namespace of their original tuple.
pub type CachedTable = BTreeMap<NamespaceId, Vec<DebugConntrackEntry>>;

/// Maps locally observed connection tuples to their post-NAT translation.
pub trait Conntracker: Send + Sync {
    /// The translation of `conn`, if the connection went through NAT.
    fn get_translation(&self, conn: &ConnectionTuple) -> Option<IpTranslation>;

    /// Forget the translation of `conn`, in both directions.
    fn delete_translation(&self, conn: &ConnectionTuple);

    /// Decode every cached entry, for troubleshooting.
    ///
    /// # Errors
    ///
    /// Returns [`ConntrackError::Cancelled`] if `cancel` fires before the scan completes, and
    /// [`ConntrackError::TableScan`] if the table cannot be scanned.
    fn dump_cached_table(&self, cancel: &CancelSignal) -> Result<CachedTable, ConntrackError>;

    fn stats(&self) -> StatsSnapshot;

    /// Whether the tracker only sees a sample of the connections.
    fn is_sampling(&self) -> bool;

    /// Release every resource held. Calling it more than once is harmless.
    fn close(&self);
}

/// Build the tracker selected by `params` from already constructed collaborators.
///
/// Disabled tracking yields a [`NoopConntracker`]. So does a construction failure when
/// `ignore_init_failure` is set.
///
/// # Errors
///
/// Returns the construction error of the kernel tracker, unless it is ignored.
pub fn new_conntracker(
    params: &ConntrackParams,
    probes: Box<dyn ProbeManager>,
    dumper: Box<dyn ConntrackDumper>,
    resolver: &dyn NamespaceResolver,
) -> Result<Box<dyn Conntracker>, ConntrackError> {
    select(params, || EbpfConntracker::new(params, probes, dumper, resolver))
}

/// Build the tracker selected by `params`, loading the probes from `object` with the configured
/// table size and resolving namespaces under the configured proc root.
///
/// # Errors
///
/// Same as [`new_conntracker`]. Failing to load `object` is a construction error.
pub fn new_kernel_conntracker(
    params: &ConntrackParams,
    object: &[u8],
    dumper: Box<dyn ConntrackDumper>,
) -> Result<Box<dyn Conntracker>, ConntrackError> {
    select(params, || {
        let probes = AyaProbeManager::from_params(object, params)?;
        let resolver = ProcNamespaceResolver::from_params(params);
        EbpfConntracker::new(params, Box::new(probes), dumper, &resolver)
    })
}

fn select(
    params: &ConntrackParams,
    build: impl FnOnce() -> Result<EbpfConntracker, ConntrackError>,
) -> Result<Box<dyn Conntracker>, ConntrackError> {
    if !params.enabled {
        info!("conntrack disabled, NAT translations will not be resolved");
        return Ok(Box::new(NoopConntracker));
    }
    match build() {
        Ok(tracker) => Ok(Box::new(tracker)),
        Err(e) if params.ignore_init_failure => {
            warn!("could not initialize ebpf conntrack, continuing without it: {e}");
            Ok(Box::new(NoopConntracker))
        }
        Err(e) => Err(e),
    }
}
