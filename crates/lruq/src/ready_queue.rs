use crate::{Error, Result};
use bytes::Bytes;
use std::collections::{HashSet, VecDeque};

/// Workers that have reported in and are waiting for a job, in LRU order.
///
/// Addresses are appended when a worker speaks on the backend and popped from
/// the front on dispatch, so the worker that has been idle the longest is
/// always picked first.
///
/// A worker address is held at most once. Appending an address that is
/// already waiting is a no-op, which keeps a worker that repeats its
/// readiness signal from being handed two jobs at once.
#[derive(Debug, Default)]
pub struct ReadyQueue {
    order: VecDeque<Bytes>,
    members: HashSet<Bytes>,
}

impl ReadyQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends `address` to the back of the queue.
    ///
    /// Returns `false` (and leaves the queue untouched) if the address is
    /// already queued.
    pub fn append(&mut self, address: Bytes) -> bool {
        if !self.members.insert(address.clone()) {
            return false;
        }
        self.order.push_back(address);
        true
    }

    /// Removes and returns the least recently used worker.
    ///
    /// # Errors
    ///
    /// Returns [`Error::QueueEmpty`] if no worker is available. Callers in the
    /// dispatcher check [`len`](Self::len) first, so hitting this is a state
    /// machine bug.
    pub fn pop_front(&mut self) -> Result<Bytes> {
        let address = self.order.pop_front().ok_or(Error::QueueEmpty)?;
        self.members.remove(&address);
        Ok(address)
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    pub fn contains(&self, address: &[u8]) -> bool {
        self.members.contains(address)
    }

    /// Iterates from the next worker to be dispatched to the most recently
    /// returned one.
    pub fn iter(&self) -> impl ExactSizeIterator<Item = &Bytes> {
        self.order.iter()
    }

    /// Releases every held address, in LRU order.
    pub fn drain(&mut self) -> impl Iterator<Item = Bytes> + '_ {
        self.members.clear();
        self.order.drain(..)
    }
}
