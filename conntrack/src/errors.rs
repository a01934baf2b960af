// SPDX-License-Identifier: Apache-2.0
// Copyright Open Network Fabric Authors

//! Errors returned by the conntrack tracker

use crate::dumper::DumpError;
use crate::netns::NetnsError;
use crate::probes::ProbeError;
use crate::store::StoreError;
use std::time::Duration;

#[derive(Debug, thiserror::Error)]
pub enum ConntrackError {
    #[error("could not initialize conntrack after {0:?}")]
    InitializationTimeout(Duration),
    #[error("conntrack backing store unavailable: {0}")]
    BackingStoreUnavailable(#[from] ProbeError),
    #[error("could not find network root namespace: {0}")]
    NamespaceResolution(#[from] NetnsError),
    #[error("conntrack warm-up failed: {0}")]
    Dump(#[from] DumpError),
    #[error("conntrack table scan failed: {0}")]
    TableScan(#[from] StoreError),
    #[error("operation cancelled")]
    Cancelled,
}
