// SPDX-License-Identifier: Apache-2.0
// Copyright Open Network Fabric Authors

use crate::cancel::CancelSignal;
use crate::conntracker::{CachedTable, Conntracker};
use crate::errors::ConntrackError;
use crate::stats::StatsSnapshot;
use crate::tuple::{ConnectionTuple, IpTranslation};

/// A [`Conntracker`] which knows no translation.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopConntracker;

impl Conntracker for NoopConntracker {
    fn get_translation(&self, _conn: &ConnectionTuple) -> Option<IpTranslation> {
        None
    }

    fn delete_translation(&self, _conn: &ConnectionTuple) {}

    fn dump_cached_table(&self, cancel: &CancelSignal) -> Result<CachedTable, ConntrackError> {
        if cancel.is_cancelled() {
            return Err(ConntrackError::Cancelled);
        }
        Ok(CachedTable::new())
    }

    fn stats(&self) -> StatsSnapshot {
        StatsSnapshot::default()
    }

    fn is_sampling(&self) -> bool {
        false
    }

    fn close(&self) {}
}
