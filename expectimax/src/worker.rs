//! Expansion workers.
//!
//! Each worker owns a private reply channel. The loop is a pull handshake:
//! send the reply slot into the shared frontier-request channel, block until
//! the coordinator delivers a node, expand it, hand it back on the expanded
//! channel. Termination is cooperative; a parked worker re-checks the flag on
//! a short poll interval and exits once the coordinator has gone away.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crossbeam_channel::{bounded, RecvTimeoutError, Sender};

use crate::config::WORKER_POLL;
use crate::game::{ChildLikelihood, Game, Heuristic};
use crate::node::Node;
use crate::pool::NodePool;

pub(crate) struct ExploreWorker<G: Game> {
    frontier_requests: Sender<Sender<Arc<Node<G>>>>,
    expanded: Sender<Arc<Node<G>>>,
    terminate: Arc<AtomicBool>,
}

impl<G: Game> ExploreWorker<G> {
    pub(crate) fn new(
        frontier_requests: Sender<Sender<Arc<Node<G>>>>,
        expanded: Sender<Arc<Node<G>>>,
        terminate: Arc<AtomicBool>,
    ) -> Self {
        Self {
            frontier_requests,
            expanded,
            terminate,
        }
    }

    pub(crate) fn run(
        &self,
        heuristic: Arc<dyn Heuristic<G>>,
        likelihood: Arc<dyn ChildLikelihood<G>>,
        pool: Arc<NodePool<G>>,
    ) {
        let (reply, delivery) = bounded::<Arc<Node<G>>>(1);

        while !self.terminate.load(Ordering::Relaxed) {
            if self.frontier_requests.send(reply.clone()).is_err() {
                break;
            }

            let node = loop {
                match delivery.recv_timeout(WORKER_POLL) {
                    Ok(node) => break Some(node),
                    Err(RecvTimeoutError::Timeout) => {
                        if self.terminate.load(Ordering::Relaxed) {
                            break None;
                        }
                    }
                    Err(RecvTimeoutError::Disconnected) => break None,
                }
            };
            let Some(node) = node else { break };

            node.explore(heuristic.as_ref(), likelihood.as_ref(), &pool);

            if self.expanded.send(node).is_err() {
                break;
            }
        }
    }
}
