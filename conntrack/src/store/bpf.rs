// SPDX-License-Identifier: Apache-2.0
// Copyright Open Network Fabric Authors

use super::{ConntrackTelemetry, StoreError, TableIter, TranslationStore};
use crate::codec::ConntrackTuple;
use aya::maps::{Array, HashMap, IterableMap, Map, MapData, MapError};
use aya::sys::SyscallError;
use nix::errno::Errno;
use parking_lot::Mutex;
use std::os::fd::AsFd;
use tracing::trace;

type ConntrackMap = HashMap<MapData, ConntrackTuple, ConntrackTuple>;
type TelemetryMap = Array<MapData, ConntrackTelemetry>;

/// [`TranslationStore`] backed by the BPF hash map the conntrack probe writes into.
///
/// Two handles are kept on the kernel map: a shared one for lookups and scans, and one behind a
/// lock for removals, which aya only allows through `&mut`. Scans therefore never hold the lock.
pub struct BpfStore {
    table: ConntrackMap,
    removals: Mutex<ConntrackMap>,
    telemetry: Option<TelemetryMap>,
}

impl BpfStore {
    /// Wrap maps taken out of a loaded eBPF object.
    ///
    /// # Errors
    ///
    /// Fails if either map does not have the expected type or layout, or if the conntrack map
    /// cannot be opened a second time.
    pub fn from_maps(table: Map, telemetry: Option<Map>) -> Result<Self, MapError> {
        let table = ConntrackMap::try_from(table)?;
        let removals = reopen(&table)?;
        let telemetry = telemetry.map(TelemetryMap::try_from).transpose()?;
        Ok(Self {
            table,
            removals: Mutex::new(removals),
            telemetry,
        })
    }
}

/// Another handle on the kernel map behind `map`, through a duplicated descriptor.
fn reopen(map: &ConntrackMap) -> Result<ConntrackMap, MapError> {
    let fd = map
        .map()
        .fd()
        .as_fd()
        .try_clone_to_owned()
        .map_err(|io_error| SyscallError {
            call: "dup",
            io_error,
        })?;
    ConntrackMap::try_from(Map::HashMap(MapData::from_fd(fd)?))
}

fn is_not_found(err: &MapError) -> bool {
    match err {
        MapError::KeyNotFound => true,
        MapError::SyscallError(e) => e.io_error.raw_os_error() == Some(Errno::ENOENT as i32),
        _ => false,
    }
}

impl TranslationStore for BpfStore {
    fn lookup(&self, key: &ConntrackTuple, value: &mut ConntrackTuple) -> Result<bool, StoreError> {
        match self.table.get(key, 0) {
            Ok(found) => {
                *value = found;
                Ok(true)
            }
            Err(e) if is_not_found(&e) => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    fn delete(&self, key: &ConntrackTuple) -> Result<bool, StoreError> {
        match self.removals.lock().remove(key) {
            Ok(()) => Ok(true),
            Err(e) if is_not_found(&e) => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    fn iter(&self) -> TableIter<'_> {
        let mut failed = false;
        Box::new(self.table.iter().map_while(move |item| {
            if failed {
                return None;
            }
            failed = item.is_err();
            Some(item.map_err(StoreError::from))
        }))
    }

    fn telemetry(&self) -> Option<ConntrackTelemetry> {
        let telemetry = self.telemetry.as_ref()?;
        match telemetry.get(&0, 0) {
            Ok(counters) => Some(counters),
            Err(e) => {
                trace!("error retrieving the telemetry struct: {e}");
                None
            }
        }
    }
}
