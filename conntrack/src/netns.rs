// SPDX-License-Identifier: Apache-2.0
// Copyright Open Network Fabric Authors

//! Network namespace identification.

use crate::config::ConntrackParams;
use crate::tuple::NamespaceId;
use nix::errno::Errno;
use nix::sys::stat::stat;
use std::path::{Path, PathBuf};

#[derive(Debug, thiserror::Error)]
pub enum NetnsError {
    #[error("no network namespace known for pid {0}")]
    UnknownPid(u32),
    #[error("failed to stat {path}: {source}")]
    Stat {
        path: PathBuf,
        #[source]
        source: Errno,
    },
    #[error("namespace inode {0} does not fit in 32 bits")]
    InodeOutOfRange(u64),
}

pub trait NamespaceResolver: Send + Sync {
    /// Identify the network namespace process `pid` lives in.
    ///
    /// # Errors
    ///
    /// Fails if the process does not exist or its namespace handle cannot be read.
    fn netns_for_pid(&self, pid: u32) -> Result<NamespaceId, NetnsError>;
}

/// Resolves namespaces from the inode of `<proc_root>/<pid>/ns/net`.
#[derive(Debug, Clone)]
pub struct ProcNamespaceResolver {
    proc_root: PathBuf,
}

impl ProcNamespaceResolver {
    pub fn new(proc_root: impl Into<PathBuf>) -> Self {
        Self {
            proc_root: proc_root.into(),
        }
    }

    #[must_use]
    pub fn from_params(params: &ConntrackParams) -> Self {
        Self::new(params.proc_root.clone())
    }

    #[must_use]
    pub fn proc_root(&self) -> &Path {
        &self.proc_root
    }
}

impl NamespaceResolver for ProcNamespaceResolver {
    fn netns_for_pid(&self, pid: u32) -> Result<NamespaceId, NetnsError> {
        let path = self
            .proc_root
            .join(pid.to_string())
            .join("ns")
            .join("net");
        let st = stat(&path).map_err(|source| match source {
            Errno::ENOENT => NetnsError::UnknownPid(pid),
            source => NetnsError::Stat { path, source },
        })?;
        #[allow(clippy::useless_conversion)]
        let ino = u64::from(st.st_ino);
        u32::try_from(ino)
            .map(NamespaceId::new)
            .map_err(|_| NetnsError::InodeOutOfRange(ino))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resolves_own_namespace() {
        let resolver = ProcNamespaceResolver::new("/proc");
        let own = resolver.netns_for_pid(std::process::id()).unwrap();
        assert_ne!(own.as_u32(), 0);
    }

    #[test]
    fn test_proc_root_comes_from_params() {
        let params = ConntrackParams::builder()
            .proc_root("/nonexistent-proc-root")
            .build()
            .unwrap();
        let resolver = ProcNamespaceResolver::from_params(&params);
        assert_eq!(resolver.proc_root(), Path::new("/nonexistent-proc-root"));
        assert!(matches!(
            resolver.netns_for_pid(1),
            Err(NetnsError::UnknownPid(1))
        ));
        let default = ProcNamespaceResolver::from_params(&ConntrackParams::default());
        assert_eq!(default.proc_root(), Path::new("/proc"));
    }

    #[test]
    fn test_stat_error_names_the_path() {
        let err = NetnsError::Stat {
            path: PathBuf::from("/host/proc/1/ns/net"),
            source: Errno::EACCES,
        };
        let rendered = err.to_string();
        assert!(rendered.starts_with("failed to stat /host/proc/1/ns/net: "));
        assert!(rendered.contains("EACCES"));
    }

    #[test]
    fn test_missing_proc_root() {
        let resolver = ProcNamespaceResolver::new("/nonexistent-proc-root");
        assert!(matches!(
            resolver.netns_for_pid(1),
            Err(NetnsError::UnknownPid(1))
        ));
    }
}
