// SPDX-License-Identifier: Apache-2.0
// Copyright Open Network Fabric Authors

//! Tracker configuration

use derive_builder::Builder;
use serde::Deserialize;
use std::fmt::Display;
use std::path::PathBuf;
use std::time::Duration;

pub const DEFAULT_PROC_ROOT: &str = "/proc";

/// Parameters of a conntrack tracker. N.B we derive a builder type `ConntrackParamsBuilder`
/// and provide defaults for each field.
#[derive(Builder, Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct ConntrackParams {
    #[builder(default = true)]
    pub enabled: bool,

    #[builder(default = ConntrackParams::DEFAULT_INIT_TIMEOUT)]
    pub init_timeout: Duration,

    #[builder(default = ConntrackParams::DEFAULT_DETACH_GRACE)]
    pub detach_grace: Duration,

    #[builder(default = ConntrackParams::DEFAULT_MAX_STATE_SIZE)]
    pub max_state_size: u32,

    #[builder(setter(into), default = DEFAULT_PROC_ROOT.into())]
    pub proc_root: PathBuf,

    #[builder(default = ConntrackParams::DEFAULT_POOL_CAPACITY)]
    pub pool_capacity: usize,

    #[builder(default = false)]
    pub ignore_init_failure: bool,
}

impl ConntrackParams {
    pub const DEFAULT_INIT_TIMEOUT: Duration = Duration::from_secs(10);
    pub const DEFAULT_DETACH_GRACE: Duration = Duration::from_secs(60);
    pub const DEFAULT_MAX_STATE_SIZE: u32 = 131_072;
    pub const DEFAULT_POOL_CAPACITY: usize = 64;

    #[must_use]
    pub fn builder() -> ConntrackParamsBuilder {
        ConntrackParamsBuilder::default()
    }
}

impl Default for ConntrackParams {
    fn default() -> Self {
        Self {
            enabled: true,
            init_timeout: Self::DEFAULT_INIT_TIMEOUT,
            detach_grace: Self::DEFAULT_DETACH_GRACE,
            max_state_size: Self::DEFAULT_MAX_STATE_SIZE,
            proc_root: DEFAULT_PROC_ROOT.into(),
            pool_capacity: Self::DEFAULT_POOL_CAPACITY,
            ignore_init_failure: false,
        }
    }
}

impl Display for ConntrackParams {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> Result<(), std::fmt::Error> {
        writeln!(f, "Conntrack config")?;
        writeln!(f, "  enabled        : {}", self.enabled)?;
        writeln!(f, "  init timeout   : {:?}", self.init_timeout)?;
        writeln!(f, "  detach grace   : {:?}", self.detach_grace)?;
        writeln!(f, "  max state size : {}", self.max_state_size)?;
        writeln!(f, "  proc root      : {}", self.proc_root.display())?;
        writeln!(f, "  pool capacity  : {}", self.pool_capacity)?;
        writeln!(f, "  ignore failure : {}", self.ignore_init_failure)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_builder_defaults_match_default() {
        let params = ConntrackParams::builder().build().unwrap();
        assert_eq!(params, ConntrackParams::default());
        assert_eq!(params.max_state_size, 131_072);
        assert_eq!(params.proc_root, PathBuf::from("/proc"));
    }

    #[test]
    fn test_builder_overrides() {
        let params = ConntrackParams::builder()
            .init_timeout(Duration::from_millis(250))
            .proc_root("/host/proc")
            .ignore_init_failure(true)
            .build()
            .unwrap();
        assert_eq!(params.init_timeout, Duration::from_millis(250));
        assert_eq!(params.proc_root, PathBuf::from("/host/proc"));
        assert!(params.ignore_init_failure);
        assert_eq!(params.detach_grace, ConntrackParams::DEFAULT_DETACH_GRACE);
    }

    #[test]
    fn test_partial_yaml_keeps_defaults() {
        let yaml = "enabled: false\nmax_state_size: 4096\nproc_root: /host/proc\n";
        let params: ConntrackParams = serde_yaml_ng::from_str(yaml).unwrap();
        assert!(!params.enabled);
        assert_eq!(params.max_state_size, 4096);
        assert_eq!(params.proc_root, PathBuf::from("/host/proc"));
        assert_eq!(params.init_timeout, ConntrackParams::DEFAULT_INIT_TIMEOUT);
    }

    #[test]
    fn test_display() {
        let rendered = ConntrackParams::default().to_string();
        assert!(rendered.starts_with("Conntrack config\n"));
        assert!(rendered.contains("  max state size : 131072\n"));
        assert!(rendered.contains("  proc root      : /proc\n"));
    }
}
