//! Session id allocation and the session registry.
//!
//! Two responsibilities kept deliberately separate: [`IdAllocator`] hands
//! out the smallest currently-unused non-negative integer (and takes
//! released ids back into its free pool), while [`SessionRegistry`] is the
//! `id -> Session` map the proxy server's public operations index into. Both
//! are driven under the same lock by [`crate::server::ProxyServer`].

use std::collections::{BTreeSet, HashMap};
use std::net::TcpStream;
use std::sync::{Arc, Mutex};

use netline_core::Socket;

use crate::session::Session;

/// Smallest-free-integer id allocator, starting at 0 and recycling released
/// ids.
#[derive(Debug, Default)]
pub struct IdAllocator {
    next_fresh: u64,
    released: BTreeSet<u64>,
}

impl IdAllocator {
    /// An allocator with no ids handed out yet.
    #[must_use]
    pub fn new() -> Self {
        Self { next_fresh: 0, released: BTreeSet::new() }
    }

    /// Hand out the smallest id not currently in use.
    pub fn next_id(&mut self) -> u64 {
        match self.released.iter().next().copied() {
            Some(id) => {
                self.released.remove(&id);
                id
            },
            None => {
                let id = self.next_fresh;
                self.next_fresh += 1;
                id
            },
        }
    }

    /// Return `id` to the free pool so a future `next_id()` call can reuse
    /// it.
    pub fn release(&mut self, id: u64) {
        if id < self.next_fresh {
            self.released.insert(id);
        }
    }
}

/// The `session id -> Session` map backing [`crate::server::ProxyServer`].
///
/// Sessions are wrapped in `Arc<Mutex<_>>` rather than stored by value so a
/// caller can clone the handle out, release the registry lock, and only
/// then lock the individual session — the ordering the reference design
/// calls for to avoid a registry-lock/session-lock inversion on `send` and
/// `multicast`. Generic over the session's socket type so tests can
/// register `Session<PipeSocket>`s against the same registry code a
/// production `Session<TcpStream>` runs through.
pub struct SessionRegistry<S: Socket = TcpStream> {
    ids: IdAllocator,
    sessions: HashMap<u64, Arc<Mutex<Session<S>>>>,
}

impl<S: Socket> Default for SessionRegistry<S> {
    fn default() -> Self {
        Self::new()
    }
}

impl<S: Socket> SessionRegistry<S> {
    /// An empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self { ids: IdAllocator::new(), sessions: HashMap::new() }
    }

    /// Allocate a fresh id and insert the session `build` constructs from
    /// it, returning the id.
    pub fn insert(&mut self, build: impl FnOnce(u64) -> Session<S>) -> u64 {
        let id = self.ids.next_id();
        self.sessions.insert(id, Arc::new(Mutex::new(build(id))));
        id
    }

    /// Allocate a fresh id without inserting a session yet. Exposed as the
    /// server's `get_next_id()`.
    pub fn allocate_id(&mut self) -> u64 {
        self.ids.next_id()
    }

    /// Return `id` to the free pool without touching the session map.
    /// Exposed as the server's `release_id()`.
    pub fn release_id(&mut self, id: u64) {
        self.ids.release(id);
    }

    /// Remove the session registered under `id`, releasing the id back to
    /// the allocator. A no-op if `id` isn't registered.
    pub fn remove(&mut self, id: u64) {
        if self.sessions.remove(&id).is_some() {
            self.ids.release(id);
        }
    }

    /// Clone out the shared handle for the session registered under `id`.
    #[must_use]
    pub fn get(&self, id: u64) -> Option<Arc<Mutex<Session<S>>>> {
        self.sessions.get(&id).map(Arc::clone)
    }

    /// Every registered id, in no particular order.
    pub fn ids(&self) -> impl Iterator<Item = u64> + '_ {
        self.sessions.keys().copied()
    }

    /// Clone out a shared handle for every registered session.
    pub fn sessions(&self) -> impl Iterator<Item = Arc<Mutex<Session<S>>>> + '_ {
        self.sessions.values().map(Arc::clone)
    }

    /// Number of registered sessions.
    #[must_use]
    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    /// Whether no sessions are registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn allocator_starts_at_zero_and_increments() {
        let mut ids = IdAllocator::new();
        assert_eq!(ids.next_id(), 0);
        assert_eq!(ids.next_id(), 1);
        assert_eq!(ids.next_id(), 2);
    }

    #[test]
    fn allocator_reuses_smallest_released_id() {
        let mut ids = IdAllocator::new();
        let a = ids.next_id();
        let b = ids.next_id();
        let _c = ids.next_id();
        ids.release(b);
        ids.release(a);
        assert_eq!(ids.next_id(), a);
        assert_eq!(ids.next_id(), b);
        assert_eq!(ids.next_id(), 3);
    }
}
