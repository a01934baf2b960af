// SPDX-License-Identifier: Apache-2.0
// Copyright Open Network Fabric Authors

//! One-shot cancellation, built on channel disconnection.

use crossbeam_channel::{Receiver, Sender, TryRecvError};

/// Create a linked handle/signal pair. The signal (and all its clones) fires when the handle is
/// cancelled or dropped.
#[must_use]
pub fn cancellation() -> (CancelHandle, CancelSignal) {
    let (tx, rx) = crossbeam_channel::bounded(0);
    (CancelHandle { tx }, CancelSignal { rx })
}

#[derive(Debug)]
pub struct CancelHandle {
    tx: Sender<()>,
}

impl CancelHandle {
    pub fn cancel(self) {
        drop(self.tx);
    }
}

#[derive(Debug, Clone)]
pub struct CancelSignal {
    rx: Receiver<()>,
}

impl CancelSignal {
    /// A signal which never fires.
    #[must_use]
    pub fn never() -> Self {
        Self {
            rx: crossbeam_channel::never(),
        }
    }

    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        match self.rx.try_recv() {
            Ok(()) | Err(TryRecvError::Disconnected) => true,
            Err(TryRecvError::Empty) => false,
        }
    }

    /// Channel end which becomes ready once cancelled, for use in `select!`.
    #[must_use]
    pub fn receiver(&self) -> &Receiver<()> {
        &self.rx
    }
}
