//! Node-storage pool.
//!
//! Expansion churns through nodes quickly (every root advance retires a whole
//! subtree), so the interior state blocks of reclaimed nodes — chiefly their
//! three hash maps — are kept on a free list and handed back out with their
//! capacity intact. The `Arc` shell of a retired node is never reused: stale
//! references observe the retirement flag and abort, while the storage they
//! once pointed at is already serving a new node.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use crate::game::Game;
use crate::node::{Node, NodeState};

/// Shared pool of recycled node storage. One per engine.
pub(crate) struct NodePool<G: Game> {
    free: Mutex<Vec<NodeState<G>>>,
    allocated: AtomicUsize,
    recycled: AtomicUsize,
}

/// Counters describing pool activity, exposed for observability.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolStats {
    /// Nodes created fresh because the free list was empty.
    pub allocated: usize,
    /// Nodes whose storage was served from the free list.
    pub recycled: usize,
    /// Storage blocks currently parked on the free list.
    pub free: usize,
}

impl<G: Game> NodePool<G> {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            free: Mutex::new(Vec::new()),
            allocated: AtomicUsize::new(0),
            recycled: AtomicUsize::new(0),
        })
    }

    /// Hand out a reset node backed by recycled storage when available.
    pub fn acquire(self: &Arc<Self>) -> Arc<Node<G>> {
        let state = self.free.lock().unwrap().pop();
        match state {
            Some(state) => {
                self.recycled.fetch_add(1, Ordering::Relaxed);
                Node::from_state(state, Arc::downgrade(self))
            }
            None => {
                self.allocated.fetch_add(1, Ordering::Relaxed);
                Node::from_state(NodeState::fresh(), Arc::downgrade(self))
            }
        }
    }

    /// Reset a reclaimed node's storage and park it on the free list.
    pub fn release(&self, mut state: NodeState<G>) {
        state.clear_for_reuse();
        self.free.lock().unwrap().push(state);
    }

    pub fn stats(&self) -> PoolStats {
        PoolStats {
            allocated: self.allocated.load(Ordering::Relaxed),
            recycled: self.recycled.load(Ordering::Relaxed),
            free: self.free.lock().unwrap().len(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::game::MoveError;
    use crossbeam_channel::Sender;

    #[derive(Clone, Debug)]
    struct StubGame;

    impl Game for StubGame {
        type Move = u8;

        fn is_over(&self) -> bool {
            true
        }

        fn possible_moves(&self) -> Vec<u8> {
            Vec::new()
        }

        fn apply(&mut self, _mv: &u8) -> Result<(), MoveError> {
            Err(MoveError::GameOver)
        }

        fn register_move_listener(&mut self, _sink: Sender<Option<u8>>) {}
    }

    #[test]
    fn test_acquire_counts_fresh_allocations() {
        let pool: Arc<NodePool<StubGame>> = NodePool::new();

        let _a = pool.acquire();
        let _b = pool.acquire();

        let stats = pool.stats();
        assert_eq!(stats.allocated, 2);
        assert_eq!(stats.recycled, 0);
        assert_eq!(stats.free, 0);
    }

    #[test]
    fn test_release_feeds_future_acquires() {
        let pool: Arc<NodePool<StubGame>> = NodePool::new();

        pool.release(NodeState::fresh());
        assert_eq!(pool.stats().free, 1);

        let _node = pool.acquire();
        let stats = pool.stats();
        assert_eq!(stats.recycled, 1);
        assert_eq!(stats.allocated, 0);
        assert_eq!(stats.free, 0);
    }
}
