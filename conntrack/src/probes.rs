// SPDX-License-Identifier: Apache-2.0
// Copyright Open Network Fabric Authors

//! Lifecycle of the kernel probes that populate the conntrack table.

use crate::config::ConntrackParams;
use crate::store::{BpfStore, TranslationStore};
use aya::maps::MapError;
use aya::programs::kprobe::KProbeLinkId;
use aya::programs::{KProbe, ProgramError};
use aya::{Ebpf, EbpfError, EbpfLoader};
use std::sync::Arc;
use tracing::{debug, info, warn};

#[derive(Debug, thiserror::Error)]
pub enum ProbeError {
    #[error("failed to load the conntrack eBPF object: {0}")]
    Load(#[from] EbpfError),
    #[error("conntrack probe program error: {0}")]
    Program(#[from] ProgramError),
    #[error("conntrack map error: {0}")]
    Map(#[from] MapError),
    #[error("no program named {0} in the conntrack eBPF object")]
    MissingProgram(&'static str),
    #[error("no map named {0} in the conntrack eBPF object")]
    MissingMap(&'static str),
    #[error("conntrack probes are not loaded")]
    NotLoaded,
    #[error("invalid conntrack table size {0}")]
    InvalidTableSize(u32),
}

/// Attach/detach control over the probes feeding the conntrack table.
///
/// The tracker owns its manager behind a lock; the delayed detach of the dump hook runs on its
/// own thread.
pub trait ProbeManager: Send {
    /// Attach every probe.
    ///
    /// # Errors
    ///
    /// Fails if a probe cannot be loaded or attached.
    fn start(&mut self) -> Result<(), ProbeError>;

    /// Hand over the table the probes write into.
    ///
    /// # Errors
    ///
    /// Fails if the table is missing or has already been taken.
    fn take_store(&mut self) -> Result<Arc<dyn TranslationStore>, ProbeError>;

    /// Detach the probe on the netlink fill path. Later calls do nothing.
    ///
    /// # Errors
    ///
    /// Fails if the kernel refuses the detach.
    fn detach_dump_hook(&mut self) -> Result<(), ProbeError>;

    /// Detach everything and release all kernel resources.
    ///
    /// # Errors
    ///
    /// Fails if part of the cleanup failed. Resources are released regardless.
    fn stop(&mut self) -> Result<(), ProbeError>;
}

pub const CONNTRACK_MAP: &str = "conntrack";
pub const CONNTRACK_TELEMETRY_MAP: &str = "conntrack_telemetry";

struct Kprobe {
    program: &'static str,
    function: &'static str,
}

/// Fires when a new conntrack entry is confirmed.
const HASH_INSERT: Kprobe = Kprobe {
    program: "kprobe___nf_conntrack_hash_insert",
    function: "__nf_conntrack_hash_insert",
};

/// Fires for every entry serialized by a conntrack netlink dump.
const FILL_INFO: Kprobe = Kprobe {
    program: "kprobe_ctnetlink_fill_info",
    function: "ctnetlink_fill_info",
};

/// [`ProbeManager`] for the conntrack eBPF object, loaded with aya.
pub struct AyaProbeManager {
    ebpf: Option<Ebpf>,
    hash_insert: Option<KProbeLinkId>,
    fill_info: Option<KProbeLinkId>,
}

impl AyaProbeManager {
    /// Load the eBPF object, sizing the conntrack table to `max_state_size` entries.
    ///
    /// # Errors
    ///
    /// Fails if the table size is zero, or if the object cannot be parsed or loaded into the
    /// kernel.
    pub fn load(object: &[u8], max_state_size: u32) -> Result<Self, ProbeError> {
        if max_state_size == 0 {
            return Err(ProbeError::InvalidTableSize(max_state_size));
        }
        let ebpf = EbpfLoader::new()
            .set_max_entries(CONNTRACK_MAP, max_state_size)
            .load(object)?;
        debug!("loaded conntrack eBPF object, table size {max_state_size}");
        Ok(Self {
            ebpf: Some(ebpf),
            hash_insert: None,
            fill_info: None,
        })
    }

    /// Load the eBPF object with the table size configured in `params`.
    ///
    /// # Errors
    ///
    /// See [`AyaProbeManager::load`].
    pub fn from_params(object: &[u8], params: &ConntrackParams) -> Result<Self, ProbeError> {
        Self::load(object, params.max_state_size)
    }

    fn kprobe<'a>(ebpf: &'a mut Ebpf, probe: &Kprobe) -> Result<&'a mut KProbe, ProbeError> {
        let program = ebpf
            .program_mut(probe.program)
            .ok_or(ProbeError::MissingProgram(probe.program))?;
        Ok(program.try_into()?)
    }

    fn attach(ebpf: &mut Ebpf, probe: &Kprobe) -> Result<KProbeLinkId, ProbeError> {
        let kprobe = Self::kprobe(ebpf, probe)?;
        kprobe.load()?;
        let link = kprobe.attach(probe.function, 0)?;
        debug!("attached {} to {}", probe.program, probe.function);
        Ok(link)
    }

    fn detach(ebpf: &mut Ebpf, probe: &Kprobe, link: KProbeLinkId) -> Result<(), ProbeError> {
        Self::kprobe(ebpf, probe)?.detach(link)?;
        debug!("detached {}", probe.program);
        Ok(())
    }
}

impl ProbeManager for AyaProbeManager {
    fn start(&mut self) -> Result<(), ProbeError> {
        let ebpf = self.ebpf.as_mut().ok_or(ProbeError::NotLoaded)?;
        self.hash_insert = Some(Self::attach(ebpf, &HASH_INSERT)?);
        self.fill_info = Some(Self::attach(ebpf, &FILL_INFO)?);
        Ok(())
    }

    fn take_store(&mut self) -> Result<Arc<dyn TranslationStore>, ProbeError> {
        let ebpf = self.ebpf.as_mut().ok_or(ProbeError::NotLoaded)?;
        let table = ebpf
            .take_map(CONNTRACK_MAP)
            .ok_or(ProbeError::MissingMap(CONNTRACK_MAP))?;
        let telemetry = ebpf.take_map(CONNTRACK_TELEMETRY_MAP);
        if telemetry.is_none() {
            warn!("no {CONNTRACK_TELEMETRY_MAP} map, kernel-side counters unavailable");
        }
        Ok(Arc::new(BpfStore::from_maps(table, telemetry)?))
    }

    fn detach_dump_hook(&mut self) -> Result<(), ProbeError> {
        let (Some(ebpf), Some(link)) = (self.ebpf.as_mut(), self.fill_info.take()) else {
            return Ok(());
        };
        Self::detach(ebpf, &FILL_INFO, link)
    }

    fn stop(&mut self) -> Result<(), ProbeError> {
        let Some(mut ebpf) = self.ebpf.take() else {
            return Ok(());
        };
        let mut result = Ok(());
        for (probe, link) in [
            (&HASH_INSERT, self.hash_insert.take()),
            (&FILL_INFO, self.fill_info.take()),
        ] {
            if let Some(link) = link
                && let Err(e) = Self::detach(&mut ebpf, probe, link)
            {
                warn!("failed to detach {}: {e}", probe.program);
                result = Err(e);
            }
        }
        // unloads the programs and closes the maps not handed over
        drop(ebpf);
        info!("conntrack probes stopped");
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_table_size_comes_from_params() {
        let params = ConntrackParams::builder().max_state_size(0_u32).build().unwrap();
        assert!(matches!(
            AyaProbeManager::from_params(&[], &params),
            Err(ProbeError::InvalidTableSize(0))
        ));

        let params = ConntrackParams::builder().max_state_size(4096_u32).build().unwrap();
        assert!(matches!(
            AyaProbeManager::from_params(&[], &params),
            Err(ProbeError::Load(_))
        ));
    }
}
