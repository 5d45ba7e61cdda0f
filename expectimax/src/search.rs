//! Coordinator event loop and the public engine surface.
//!
//! A single coordinator thread owns the root and is the only writer of tree
//! topology: it hands frontier nodes to workers one at a time, links their
//! results back in, advances the root when the real game moves, and answers
//! client queries. Everything crosses thread boundaries over bounded
//! channels; clients and workers block on private reply slots.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use crossbeam_channel::{bounded, never, select, tick, Receiver, Sender};
use tracing::{debug, error, info};

use crate::config::{
    SearchConfig, FRONTIER_BACKOFF, MOVE_LISTENER_CAPACITY, REQUEST_CAPACITY, WARMUP_BACKOFF,
    WORKER_COUNT,
};
use crate::game::{ChildLikelihood, Game, Heuristic};
use crate::node::{ExplorationStatus, Node};
use crate::pool::{NodePool, PoolStats};
use crate::worker::ExploreWorker;

/// Gauges mirrored out of the coordinator so queries never touch the tree.
struct SearchGauges {
    active: AtomicBool,
    descendent_count: AtomicUsize,
    has_frontier: AtomicBool,
}

/// Children reserved for expansions that are still in flight, keyed by node
/// address. A frontier pick is only handed to a worker when the root's
/// descendent count plus every outstanding reservation plus the pick's own
/// child count fits under `max_node_count + WORKER_COUNT`; the reservation is
/// released when the node comes back through the expanded queue. Commits move
/// nodes from reserved to counted without growing the sum, so the root's
/// descendent count can never exceed the budget by more than [`WORKER_COUNT`]
/// regardless of how many expansions are in flight or how wide they fan out.
struct BudgetReservations {
    total: usize,
    by_node: HashMap<usize, usize>,
}

impl BudgetReservations {
    fn new() -> Self {
        Self {
            total: 0,
            by_node: HashMap::new(),
        }
    }

    fn reserve(&mut self, key: usize, children: usize) {
        self.by_node.insert(key, children);
        self.total += children;
    }

    fn release(&mut self, key: usize) {
        if let Some(children) = self.by_node.remove(&key) {
            self.total -= children;
        }
    }
}

fn node_key<G: Game>(node: &Arc<Node<G>>) -> usize {
    Arc::as_ptr(node) as usize
}

/// Concurrent expectimax search engine.
///
/// Construction registers a move listener on the live game and snapshots it
/// for the root. [`Expectimax::run`] blocks and drives the search; clients on
/// other threads call [`Expectimax::best_move`] and
/// [`Expectimax::next_move_values`] while it runs.
pub struct Expectimax<G: Game> {
    root_game: G,
    heuristic: Arc<dyn Heuristic<G>>,
    likelihood: Arc<dyn ChildLikelihood<G>>,
    config: SearchConfig,
    pool: Arc<NodePool<G>>,

    move_events: Receiver<Option<G::Move>>,
    best_move_requests: Sender<Sender<Option<G::Move>>>,
    best_move_queue: Receiver<Sender<Option<G::Move>>>,
    value_requests: Sender<Sender<HashMap<G::Move, f64>>>,
    value_queue: Receiver<Sender<HashMap<G::Move, f64>>>,
    frontier_requests: Sender<Sender<Arc<Node<G>>>>,
    frontier_queue: Receiver<Sender<Arc<Node<G>>>>,
    expanded: Sender<Arc<Node<G>>>,
    expanded_queue: Receiver<Arc<Node<G>>>,

    terminate_workers: Arc<AtomicBool>,
    shutdown: AtomicBool,
    gauges: SearchGauges,
}

impl<G: Game> Expectimax<G> {
    /// Create an engine over `game` with the given leaf heuristic,
    /// child-likelihood function, and node budget.
    pub fn new<H, L>(game: &mut G, heuristic: H, likelihood: L, max_node_count: usize) -> Self
    where
        H: Heuristic<G> + 'static,
        L: ChildLikelihood<G> + 'static,
    {
        let (move_sink, move_events) = bounded(MOVE_LISTENER_CAPACITY);
        game.register_move_listener(move_sink);

        let (best_move_requests, best_move_queue) = bounded(REQUEST_CAPACITY);
        let (value_requests, value_queue) = bounded(REQUEST_CAPACITY);
        let (frontier_requests, frontier_queue) = bounded(WORKER_COUNT);
        let (expanded, expanded_queue) = bounded(10 * WORKER_COUNT);

        Self {
            root_game: game.clone(),
            heuristic: Arc::new(heuristic),
            likelihood: Arc::new(likelihood),
            config: SearchConfig::new(max_node_count),
            pool: NodePool::new(),
            move_events,
            best_move_requests,
            best_move_queue,
            value_requests,
            value_queue,
            frontier_requests,
            frontier_queue,
            expanded,
            expanded_queue,
            terminate_workers: Arc::new(AtomicBool::new(false)),
            shutdown: AtomicBool::new(false),
            gauges: SearchGauges {
                active: AtomicBool::new(false),
                descendent_count: AtomicUsize::new(0),
                has_frontier: AtomicBool::new(false),
            },
        }
    }

    /// Drive the search. Blocks until the game ends or [`Expectimax::shutdown`]
    /// is called; returns immediately when the root position is already
    /// terminal.
    pub fn run(&self) {
        if self.root_game.is_over() {
            info!("root position is already terminal, nothing to search");
            return;
        }

        let mut root = Node::new_root(&self.root_game, &self.pool);
        self.gauges.active.store(true, Ordering::Release);
        self.refresh_gauges(&root);

        let mut workers = Vec::with_capacity(WORKER_COUNT);
        for _ in 0..WORKER_COUNT {
            let worker = ExploreWorker::new(
                self.frontier_requests.clone(),
                self.expanded.clone(),
                Arc::clone(&self.terminate_workers),
            );
            let heuristic = Arc::clone(&self.heuristic);
            let likelihood = Arc::clone(&self.likelihood);
            let pool = Arc::clone(&self.pool);
            workers.push(thread::spawn(move || worker.run(heuristic, likelihood, pool)));
        }

        let stats_tick = tick(Duration::from_secs(1));
        let mut move_events = self.move_events.clone();
        let mut reservations = BudgetReservations::new();
        let mut explored_since_tick: u64 = 0;
        let mut explored_last_tick: u64 = 0;

        loop {
            if self.shutdown.load(Ordering::Acquire) {
                break;
            }

            let mut listener_disconnected = false;
            select! {
                recv(move_events) -> event => match event {
                    Ok(Some(mv)) => {
                        self.settle_root(&root, &mut reservations);
                        root = root.descend_to_child(&mv);
                    }
                    Ok(None) => {}
                    Err(_) => listener_disconnected = true,
                },
                recv(self.expanded_queue) -> node => if let Ok(node) = node {
                    explored_since_tick += 1;
                    reservations.release(node_key(&node));
                    node.commit_expansion(self.likelihood.as_ref());
                    node.release_ref();
                },
                recv(self.best_move_queue) -> request => if let Ok(reply) = request {
                    if !move_events.is_empty() {
                        // observed moves take effect before any answer
                        let _ = self.best_move_requests.send(reply);
                    } else {
                        self.answer_best_move(&root, reply);
                    }
                },
                recv(self.value_queue) -> request => if let Ok(reply) = request {
                    if !move_events.is_empty() {
                        let _ = self.value_requests.send(reply);
                    } else {
                        self.answer_move_values(&root, reply);
                    }
                },
                recv(self.frontier_queue) -> request => if let Ok(worker_reply) = request {
                    self.dispatch_frontier(&root, worker_reply, &mut reservations);
                },
                recv(stats_tick) -> _ => {
                    if explored_since_tick != 0 || explored_last_tick != 0 {
                        debug!(
                            explored = explored_since_tick,
                            parked_workers = self.frontier_queue.len(),
                            nodes = root.descendent_count(),
                            value = root.value(),
                            "search statistics"
                        );
                    }
                    explored_last_tick = explored_since_tick;
                    explored_since_tick = 0;
                },
            }

            if listener_disconnected {
                // the live game went away; no further moves can arrive
                move_events = never();
            }

            self.refresh_gauges(&root);

            if root.game_is_over() {
                info!("game over, stopping search");
                break;
            }
        }

        self.terminate_workers.store(true, Ordering::Release);
        while self.frontier_queue.try_recv().is_ok() {}
        for handle in workers {
            let _ = handle.join();
        }
        self.gauges.active.store(false, Ordering::Release);

        // answer any client still parked on a reply slot
        while let Ok(reply) = self.best_move_queue.try_recv() {
            let _ = reply.send(None);
        }
        while let Ok(reply) = self.value_queue.try_recv() {
            let _ = reply.send(HashMap::new());
        }
    }

    /// Best move at the current root by expected value. Blocks while the
    /// engine defers the answer during warm-up; `None` when the engine is not
    /// running or the root has no children.
    pub fn best_move(&self) -> Option<G::Move> {
        if !self.gauges.active.load(Ordering::Acquire) {
            return None;
        }
        let (reply, answer) = bounded(1);
        if self.best_move_requests.send(reply).is_err() {
            return None;
        }
        answer.recv().unwrap_or(None)
    }

    /// Expected value of every candidate move at the current root. Same
    /// warm-up semantics as [`Expectimax::best_move`]; empty when the engine
    /// is not running.
    pub fn next_move_values(&self) -> HashMap<G::Move, f64> {
        if !self.gauges.active.load(Ordering::Acquire) {
            return HashMap::new();
        }
        let (reply, answer) = bounded(1);
        if self.value_requests.send(reply).is_err() {
            return HashMap::new();
        }
        answer.recv().unwrap_or_default()
    }

    /// True while the budget is unmet and work remains: the root still has a
    /// frontier descendent, or workers hold in-flight or queued expansions.
    pub fn is_searching(&self) -> bool {
        if !self.gauges.active.load(Ordering::Acquire) {
            return false;
        }
        self.gauges.descendent_count.load(Ordering::Relaxed) < self.config.max_node_count
            && (self.gauges.has_frontier.load(Ordering::Relaxed)
                || self.frontier_queue.len() != WORKER_COUNT
                || !self.expanded_queue.is_empty())
    }

    /// Ask the engine to stop; [`Expectimax::run`] returns after the current
    /// event.
    pub fn shutdown(&self) {
        self.shutdown.store(true, Ordering::Release);
    }

    /// Total nodes below the current root.
    pub fn node_count(&self) -> usize {
        self.gauges.descendent_count.load(Ordering::Relaxed)
    }

    /// Node pool counters.
    pub fn pool_stats(&self) -> PoolStats {
        self.pool.stats()
    }

    pub fn config(&self) -> &SearchConfig {
        &self.config
    }

    fn refresh_gauges(&self, root: &Arc<Node<G>>) {
        self.gauges
            .descendent_count
            .store(root.descendent_count(), Ordering::Relaxed);
        self.gauges
            .has_frontier
            .store(root.has_frontier(), Ordering::Relaxed);
    }

    /// Make sure the root is expanded and archived before descending.
    fn settle_root(&self, root: &Arc<Node<G>>, reservations: &mut BudgetReservations) {
        match root.status() {
            ExplorationStatus::Unexplored => {
                root.explore(self.heuristic.as_ref(), self.likelihood.as_ref(), &self.pool);
                root.commit_expansion(self.likelihood.as_ref());
            }
            ExplorationStatus::Archived => {}
            _ => {
                // in flight between a worker and the expanded queue; archive
                // arrivals until the root comes back
                while root.status() != ExplorationStatus::Archived {
                    let Ok(node) = self.expanded_queue.recv() else { return };
                    reservations.release(node_key(&node));
                    node.commit_expansion(self.likelihood.as_ref());
                    node.release_ref();
                }
            }
        }
    }

    fn answer_best_move(&self, root: &Arc<Node<G>>, reply: Sender<Option<G::Move>>) {
        if root.descendent_count() < self.config.warmup_threshold() && root.has_frontier() {
            // too shallow to answer well; retry once more depth exists
            let requests = self.best_move_requests.clone();
            thread::spawn(move || {
                thread::sleep(WARMUP_BACKOFF);
                let _ = requests.send(reply);
            });
        } else {
            let _ = reply.send(root.best_child());
        }
    }

    fn answer_move_values(&self, root: &Arc<Node<G>>, reply: Sender<HashMap<G::Move, f64>>) {
        if root.descendent_count() < self.config.warmup_threshold()
            && root.has_frontier()
            && self.is_searching()
        {
            let requests = self.value_requests.clone();
            thread::spawn(move || {
                thread::sleep(WARMUP_BACKOFF);
                let _ = requests.send(reply);
            });
        } else {
            let _ = reply.send(root.child_values());
        }
    }

    /// Feed a parked worker the best frontier node, or put the worker back in
    /// the queue after a short backoff when the frontier is empty, the budget
    /// is reached, the pick was retired under us, or the pick's fan-out does
    /// not fit in the remaining budget slack.
    fn dispatch_frontier(
        &self,
        root: &Arc<Node<G>>,
        worker_reply: Sender<Arc<Node<G>>>,
        reservations: &mut BudgetReservations,
    ) {
        match self.admit_frontier_pick(root, reservations) {
            Some(node) => {
                node.set_waiting_for_exploration();
                if worker_reply.send(Arc::clone(&node)).is_err() {
                    // worker exited during shutdown
                    reservations.release(node_key(&node));
                    node.release_ref();
                }
            }
            None => {
                thread::sleep(FRONTIER_BACKOFF);
                let _ = self.frontier_requests.send(worker_reply);
            }
        }
    }

    /// Admission check for handing the root's frontier pick to a worker. The
    /// pick's child count is reserved up front, so the tree cannot grow past
    /// the budget by more than [`WORKER_COUNT`] nodes no matter how many
    /// expansions are in flight. A denied pick stays unexplored in the
    /// frontier and is retried once commits or a root advance free up slack.
    fn admit_frontier_pick(
        &self,
        root: &Arc<Node<G>>,
        reservations: &mut BudgetReservations,
    ) -> Option<Arc<Node<G>>> {
        if root.descendent_count() >= self.config.max_node_count {
            return None;
        }
        let node = root.frontier_node()?;
        if !node.try_retain() {
            return None; // retired under us; the frontier heals on commit
        }
        // this retain is released when the node comes back through the
        // expanded queue
        if node.status() != ExplorationStatus::Unexplored {
            error!(status = ?node.status(), "frontier pick is not unexplored");
            panic!("frontier pick is not unexplored");
        }

        let Some(game) = node.game_snapshot() else {
            node.release_ref();
            return None;
        };
        let children = game.possible_moves().len();
        let projected = root.descendent_count() + reservations.total + children;
        if projected > self.config.max_node_count + WORKER_COUNT {
            node.release_ref();
            return None;
        }

        reservations.reserve(node_key(&node), children);
        Some(node)
    }
}
