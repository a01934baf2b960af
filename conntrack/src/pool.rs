// SPDX-License-Identifier: Apache-2.0
// Copyright Open Network Fabric Authors

//! Reusable conntrack record buffers for the lookup path.

use crate::codec::ConntrackTuple;
use concurrency::sync::Mutex;
use concurrency::sync::atomic::{AtomicUsize, Ordering};
use std::ops::{Deref, DerefMut};

/// A bounded free-list of [`ConntrackTuple`] buffers.
///
/// Buffers are zeroed when they are returned, and dropped instead of kept once the free-list
/// holds `capacity` of them.
pub struct TuplePool {
    free: Mutex<Vec<Box<ConntrackTuple>>>,
    capacity: usize,
    allocated: AtomicUsize,
}

impl TuplePool {
    pub const DEFAULT_CAPACITY: usize = 64;

    #[must_use]
    pub fn new(capacity: usize) -> Self {
        Self {
            free: Mutex::new(Vec::with_capacity(capacity)),
            capacity,
            allocated: AtomicUsize::new(0),
        }
    }

    /// Take a zeroed buffer, allocating a fresh one if the free-list is empty.
    pub fn acquire(&self) -> PooledTuple<'_> {
        let reused = self
            .free
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .pop();
        let buf = reused.unwrap_or_else(|| {
            self.allocated.fetch_add(1, Ordering::Relaxed);
            Box::default()
        });
        PooledTuple {
            pool: self,
            buf: Some(buf),
        }
    }

    fn release(&self, mut buf: Box<ConntrackTuple>) {
        buf.reset();
        let mut free = self
            .free
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        if free.len() < self.capacity {
            free.push(buf);
        }
    }

    /// Number of buffers this pool ever had to allocate.
    pub fn allocated(&self) -> usize {
        self.allocated.load(Ordering::Relaxed)
    }

    /// Number of buffers currently waiting on the free-list.
    pub fn available(&self) -> usize {
        self.free
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .len()
    }
}

impl Default for TuplePool {
    fn default() -> Self {
        Self::new(Self::DEFAULT_CAPACITY)
    }
}

/// A buffer on loan from a [`TuplePool`]. Goes back to the pool on drop.
pub struct PooledTuple<'a> {
    pool: &'a TuplePool,
    buf: Option<Box<ConntrackTuple>>,
}

impl Deref for PooledTuple<'_> {
    type Target = ConntrackTuple;

    fn deref(&self) -> &Self::Target {
        match &self.buf {
            Some(buf) => buf,
            None => unreachable!("pooled tuple used after release"),
        }
    }
}

impl DerefMut for PooledTuple<'_> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        match &mut self.buf {
            Some(buf) => buf,
            None => unreachable!("pooled tuple used after release"),
        }
    }
}

impl Drop for PooledTuple<'_> {
    fn drop(&mut self) {
        if let Some(buf) = self.buf.take() {
            self.pool.release(buf);
        }
    }
}

#[cfg(test)]
#[concurrency::concurrency_mode(std)]
mod tests {
    use super::*;

    #[test]
    fn test_buffers_are_reused_and_zeroed() {
        let pool = TuplePool::new(4);
        {
            let mut tuple = pool.acquire();
            tuple.sport = 443;
            tuple.netns = 12;
        }
        assert_eq!(pool.allocated(), 1);
        assert_eq!(pool.available(), 1);

        let tuple = pool.acquire();
        assert_eq!(*tuple, ConntrackTuple::default());
        assert_eq!(pool.allocated(), 1);
        assert_eq!(pool.available(), 0);
    }

    #[test]
    fn test_free_list_is_bounded() {
        let pool = TuplePool::new(2);
        let held: Vec<_> = (0..5).map(|_| pool.acquire()).collect();
        assert_eq!(pool.allocated(), 5);
        drop(held);
        assert_eq!(pool.available(), 2);
    }
}
