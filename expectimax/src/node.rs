//! Search-tree nodes.
//!
//! A node owns its children strongly and points back at its parent through a
//! weak handle that is cleared on detachment. All interior state sits behind
//! a per-node mutex; no lock spans more than one tree edge at a time, and the
//! only nested acquisition is parent-then-child, so lock order follows tree
//! order and cannot cycle.
//!
//! Lifetime is governed by an explicit reference count plus a retirement
//! flag. Every traversal or mutation is bracketed by a retain/release pair;
//! a retain fails once the node is retired, and the caller abandons the
//! operation. The last release of a retired node moves its storage back into
//! the pool while the `Arc` shell stays behind as a permanently dead husk for
//! any stale pointers.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex, Weak};
use std::thread;

use tracing::{error, warn};

use crate::config::EXPLORATION_FLOOR;
use crate::game::{ChildLikelihood, ChildView, Game, Heuristic};
use crate::pool::NodePool;

/// Where a node sits in its expansion lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ExplorationStatus {
    Unexplored,
    WaitingForExploration,
    Exploring,
    Explored,
    Archived,
}

/// Cached pick for the most likely unexplored descendent of a subtree.
/// `SelfNode` stands in for the node itself so the cache never holds a
/// strong reference cycle.
#[derive(Clone)]
pub(crate) enum FrontierTarget<G: Game> {
    SelfNode,
    Descendent(Arc<Node<G>>),
}

fn same_target<G: Game>(a: &Option<FrontierTarget<G>>, b: &Option<FrontierTarget<G>>) -> bool {
    match (a, b) {
        (None, None) => true,
        (Some(FrontierTarget::SelfNode), Some(FrontierTarget::SelfNode)) => true,
        (Some(FrontierTarget::Descendent(x)), Some(FrontierTarget::Descendent(y))) => {
            Arc::ptr_eq(x, y)
        }
        _ => false,
    }
}

/// Interior state of a node. Recycled through the pool.
pub(crate) struct NodeState<G: Game> {
    /// Snapshot of the game here, present on roots and detached nodes.
    /// Absent states are reconstructed from the parent chain plus `last_move`.
    game: Option<G>,
    parent: Option<Weak<Node<G>>>,
    children: HashMap<G::Move, Arc<Node<G>>>,
    child_likelihood: HashMap<G::Move, f64>,
    child_explore_probability: HashMap<G::Move, f64>,
    status: ExplorationStatus,
    last_move: Option<G::Move>,
    heuristic: f64,
    value: f64,
    frontier: Option<FrontierTarget<G>>,
    frontier_likelihood: f64,
    descendent_count: usize,
    average_depth: f64,
}

impl<G: Game> Default for NodeState<G> {
    /// The empty husk left behind when a retired node's storage is reclaimed.
    fn default() -> Self {
        Self {
            game: None,
            parent: None,
            children: HashMap::new(),
            child_likelihood: HashMap::new(),
            child_explore_probability: HashMap::new(),
            status: ExplorationStatus::Unexplored,
            last_move: None,
            heuristic: 0.0,
            value: 0.0,
            frontier: None,
            frontier_likelihood: 0.0,
            descendent_count: 0,
            average_depth: 0.0,
        }
    }
}

impl<G: Game> NodeState<G> {
    pub(crate) fn fresh() -> Self {
        let mut state = Self::default();
        state.clear_for_reuse();
        state
    }

    /// Reset to the initial unexplored shape, keeping map capacity. A fresh
    /// node is its own frontier with likelihood 1.
    pub(crate) fn clear_for_reuse(&mut self) {
        self.game = None;
        self.parent = None;
        self.children.clear();
        self.child_likelihood.clear();
        self.child_explore_probability.clear();
        self.status = ExplorationStatus::Unexplored;
        self.last_move = None;
        self.heuristic = 0.0;
        self.value = 0.0;
        self.frontier = Some(FrontierTarget::SelfNode);
        self.frontier_likelihood = 1.0;
        self.descendent_count = 0;
        self.average_depth = 0.0;
    }
}

/// A node in the expectimax tree.
pub(crate) struct Node<G: Game> {
    refs: AtomicU32,
    retired: AtomicBool,
    pool: Weak<NodePool<G>>,
    state: Mutex<NodeState<G>>,
}

/// RAII retain on a node; releases on drop.
pub(crate) struct NodeGuard<'a, G: Game> {
    node: &'a Node<G>,
}

impl<G: Game> Drop for NodeGuard<'_, G> {
    fn drop(&mut self) {
        self.node.release_ref();
    }
}

impl<G: Game> Node<G> {
    pub(crate) fn from_state(state: NodeState<G>, pool: Weak<NodePool<G>>) -> Arc<Self> {
        Arc::new(Self {
            refs: AtomicU32::new(0),
            retired: AtomicBool::new(false),
            pool,
            state: Mutex::new(state),
        })
    }

    /// A detached root carrying its own snapshot of the game.
    pub(crate) fn new_root(game: &G, pool: &Arc<NodePool<G>>) -> Arc<Self> {
        let node = pool.acquire();
        node.state.lock().unwrap().game = Some(game.clone());
        node
    }

    /// Begin an operation on this node. Fails once the node is retired, in
    /// which case the caller must abandon the operation.
    pub(crate) fn try_retain(&self) -> bool {
        if self.retired.load(Ordering::Acquire) {
            return false;
        }
        self.refs.fetch_add(1, Ordering::AcqRel);
        true
    }

    /// End an operation. The last release of a retired node reclaims its
    /// storage into the pool.
    pub(crate) fn release_ref(&self) {
        let prev = self.refs.fetch_sub(1, Ordering::AcqRel);
        debug_assert!(prev > 0, "node reference count underflow");
        if prev == 1 && self.retired.load(Ordering::Acquire) {
            self.reclaim();
        }
    }

    fn guard(&self) -> Option<NodeGuard<'_, G>> {
        if self.try_retain() {
            Some(NodeGuard { node: self })
        } else {
            None
        }
    }

    fn reclaim(&self) {
        let state = std::mem::take(&mut *self.state.lock().unwrap());
        let self_ptr = self as *const Node<G>;
        for child in state.children.values() {
            let mut child_state = child.state.lock().unwrap();
            let points_here = child_state
                .parent
                .as_ref()
                .map_or(false, |w| std::ptr::eq(w.as_ptr(), self_ptr));
            if points_here {
                child_state.parent = None;
            }
        }
        if let Some(pool) = self.pool.upgrade() {
            pool.release(state);
        }
    }

    pub(crate) fn status(&self) -> ExplorationStatus {
        self.state.lock().unwrap().status
    }

    pub(crate) fn value(&self) -> f64 {
        self.state.lock().unwrap().value
    }

    pub(crate) fn descendent_count(&self) -> usize {
        self.state.lock().unwrap().descendent_count
    }

    pub(crate) fn has_frontier(&self) -> bool {
        self.state.lock().unwrap().frontier.is_some()
    }

    pub(crate) fn frontier_node(self: &Arc<Self>) -> Option<Arc<Node<G>>> {
        match &self.state.lock().unwrap().frontier {
            None => None,
            Some(FrontierTarget::SelfNode) => Some(Arc::clone(self)),
            Some(FrontierTarget::Descendent(descendent)) => Some(Arc::clone(descendent)),
        }
    }

    pub(crate) fn child(&self, mv: &G::Move) -> Option<Arc<Node<G>>> {
        self.state.lock().unwrap().children.get(mv).cloned()
    }

    pub(crate) fn child_values(&self) -> HashMap<G::Move, f64> {
        let state = self.state.lock().unwrap();
        state
            .children
            .iter()
            .map(|(mv, child)| (mv.clone(), child.value()))
            .collect()
    }

    /// Move of the highest-valued child, first seen winning ties.
    pub(crate) fn best_child(&self) -> Option<G::Move> {
        let state = self.state.lock().unwrap();
        let mut best: Option<(G::Move, f64)> = None;
        for (mv, child) in &state.children {
            let value = child.value();
            match &best {
                Some((_, best_value)) if *best_value >= value => {}
                _ => best = Some((mv.clone(), value)),
            }
        }
        best.map(|(mv, _)| mv)
    }

    /// True when this node carries a game snapshot whose game has ended.
    /// Only meaningful on roots, which always carry a snapshot.
    pub(crate) fn game_is_over(&self) -> bool {
        self.state.lock().unwrap().game.as_ref().map_or(false, G::is_over)
    }

    #[cfg(test)]
    pub(crate) fn is_retired(&self) -> bool {
        self.retired.load(Ordering::Acquire)
    }

    #[cfg(test)]
    pub(crate) fn frontier_likelihood(&self) -> f64 {
        self.state.lock().unwrap().frontier_likelihood
    }

    #[cfg(test)]
    pub(crate) fn average_depth(&self) -> f64 {
        self.state.lock().unwrap().average_depth
    }

    #[cfg(test)]
    pub(crate) fn child_likelihoods(&self) -> HashMap<G::Move, f64> {
        self.state.lock().unwrap().child_likelihood.clone()
    }

    #[cfg(test)]
    pub(crate) fn child_explore_probabilities(&self) -> HashMap<G::Move, f64> {
        self.state.lock().unwrap().child_explore_probability.clone()
    }

    /// Clone of the game state at this node. Nodes without a snapshot replay
    /// `last_move` onto the parent's reconstruction. Returns `None` when any
    /// ancestor has been retired.
    pub(crate) fn game_snapshot(self: &Arc<Self>) -> Option<G> {
        let _op = self.guard()?;

        let (game, parent, last_move) = {
            let state = self.state.lock().unwrap();
            (state.game.clone(), state.parent.clone(), state.last_move.clone())
        };

        if let Some(game) = game {
            return Some(game);
        }

        let parent = parent?.upgrade()?;
        let mut game = parent.game_snapshot()?;
        let mv = last_move?;
        if let Err(err) = game.apply(&mv) {
            warn!(?err, "failed to replay a move while reconstructing a game state");
            return None;
        }
        Some(game)
    }

    /// Mark this subtree for deletion. `exempt` and its descendants survive.
    /// Storage returns to the pool as each node's last reference is released.
    pub(crate) fn delete_tree(self: &Arc<Self>, exempt: Option<&Arc<Node<G>>>) {
        let Some(_op) = self.guard() else {
            return; // already retired
        };
        self.retired.store(true, Ordering::Release);

        let children: Vec<Arc<Node<G>>> = {
            let state = self.state.lock().unwrap();
            state.children.values().cloned().collect()
        };
        for child in children {
            child.state.lock().unwrap().parent = None;
            let survives = exempt.map_or(false, |e| Arc::ptr_eq(e, &child));
            if !survives {
                child.delete_tree(None);
            }
        }
    }

    /// Repoint the tree at the child reached by `mv`: the child takes its own
    /// game snapshot, drops its parent link, and the rest of the old tree is
    /// retired on a background thread. Descending onto a retired or missing
    /// child is a contract violation of the move source.
    pub(crate) fn descend_to_child(self: &Arc<Self>, mv: &G::Move) -> Arc<Node<G>> {
        if !self.try_retain() {
            error!("root was retired before the observed move could be applied");
            panic!("descend into a retired tree");
        }

        let Some(child) = self.child(mv) else {
            error!(?mv, "observed move has no matching child");
            panic!("observed move has no matching child");
        };
        let Some(child_op) = child.guard() else {
            error!(?mv, "child for the observed move is already retired");
            panic!("descend into a retired child");
        };

        let Some(game) = child.game_snapshot() else {
            error!(?mv, "failed to materialize the new root's game state");
            panic!("failed to materialize the new root's game state");
        };
        {
            let mut child_state = child.state.lock().unwrap();
            child_state.game = Some(game);
            child_state.parent = None;
        }

        self.release_ref();
        let old_root = Arc::clone(self);
        let new_root = Arc::clone(&child);
        thread::spawn(move || old_root.delete_tree(Some(&new_root)));

        drop(child_op);
        child
    }

    /// Add newly created descendents to this node's count and every
    /// ancestor's.
    pub(crate) fn add_descendents(self: &Arc<Self>, count: usize) {
        let Some(_op) = self.guard() else { return };

        let parent = {
            let mut state = self.state.lock().unwrap();
            state.descendent_count += count;
            state.parent.clone()
        };
        if let Some(parent) = parent.and_then(|weak| weak.upgrade()) {
            parent.add_descendents(count);
        }
    }

    /// Recompute the mean subtree depth here and up the ancestor chain.
    pub(crate) fn update_average_depth(self: &Arc<Self>) {
        let Some(_op) = self.guard() else { return };

        let children: Vec<Arc<Node<G>>> = {
            let state = self.state.lock().unwrap();
            state.children.values().cloned().collect()
        };
        let depth = if children.is_empty() {
            0.0
        } else {
            let total: f64 = children
                .iter()
                .map(|child| child.state.lock().unwrap().average_depth)
                .sum();
            1.0 + total / children.len() as f64
        };

        let parent = {
            let mut state = self.state.lock().unwrap();
            state.average_depth = depth;
            state.parent.clone()
        };
        if let Some(parent) = parent.and_then(|weak| weak.upgrade()) {
            parent.update_average_depth();
        }
    }

    /// Recompute the cached most likely unexplored descendent from this
    /// node's status and its children's caches. A change propagates to the
    /// parent when `recursive`. An unexplored node is its own frontier with
    /// likelihood 1; in-flight nodes contribute nothing; explored nodes take
    /// the best path product over children that are themselves unexplored or
    /// archived.
    pub(crate) fn update_frontier(self: &Arc<Self>, recursive: bool) {
        let Some(_op) = self.guard() else { return };

        let (status, edges) = {
            let state = self.state.lock().unwrap();
            let edges: Vec<(Arc<Node<G>>, f64)> = state
                .children
                .iter()
                .map(|(mv, child)| {
                    let edge = state.child_explore_probability.get(mv).copied().unwrap_or(0.0);
                    (Arc::clone(child), edge)
                })
                .collect();
            (state.status, edges)
        };

        let (target, likelihood) = match status {
            ExplorationStatus::Unexplored => (Some(FrontierTarget::SelfNode), 1.0),
            ExplorationStatus::WaitingForExploration | ExplorationStatus::Exploring => (None, 0.0),
            ExplorationStatus::Explored | ExplorationStatus::Archived => {
                let mut best: Option<FrontierTarget<G>> = None;
                let mut best_likelihood = 0.0;
                for (child, edge_probability) in edges {
                    let (child_status, child_target, child_likelihood) = {
                        let child_state = child.state.lock().unwrap();
                        (
                            child_state.status,
                            child_state.frontier.clone(),
                            child_state.frontier_likelihood,
                        )
                    };
                    let Some(child_target) = child_target else { continue };
                    if !matches!(
                        child_status,
                        ExplorationStatus::Unexplored | ExplorationStatus::Archived
                    ) {
                        continue;
                    }
                    let resolved = match child_target {
                        FrontierTarget::SelfNode => Arc::clone(&child),
                        FrontierTarget::Descendent(descendent) => descendent,
                    };
                    let through = child_likelihood * edge_probability;
                    if best_likelihood < through {
                        best_likelihood = through;
                        best = Some(FrontierTarget::Descendent(resolved));
                    }
                }
                (best, best_likelihood)
            }
        };

        let parent = {
            let mut state = self.state.lock().unwrap();
            if same_target(&state.frontier, &target) && state.frontier_likelihood == likelihood {
                None
            } else {
                state.frontier = target;
                state.frontier_likelihood = likelihood;
                state.parent.clone()
            }
        };

        if recursive {
            if let Some(parent) = parent.and_then(|weak| weak.upgrade()) {
                parent.update_frontier(true);
            }
        }
    }

    /// Coordinator-side transition before handing the node to a worker.
    pub(crate) fn set_waiting_for_exploration(self: &Arc<Self>) {
        let Some(_op) = self.guard() else { return };
        self.state.lock().unwrap().status = ExplorationStatus::WaitingForExploration;
        self.update_frontier(true);
    }

    /// Expand this node: enumerate legal moves, create one child per move
    /// scored by the heuristic, then fold the new children into this node's
    /// own value and frontier. Runs on a worker holding the only in-flight
    /// reference; ancestors retired mid-flight abort the expansion.
    pub(crate) fn explore(
        self: &Arc<Self>,
        heuristic: &dyn Heuristic<G>,
        likelihood: &dyn ChildLikelihood<G>,
        pool: &Arc<NodePool<G>>,
    ) {
        let Some(_op) = self.guard() else { return };

        {
            let mut state = self.state.lock().unwrap();
            state.status = ExplorationStatus::Exploring;
            state.frontier = None;
            state.frontier_likelihood = 0.0;
        }

        let Some(game) = self.game_snapshot() else {
            return;
        };

        let mut created: Vec<(G::Move, Arc<Node<G>>)> = Vec::new();
        for mv in game.possible_moves() {
            let mut child_game = game.clone();
            if let Err(err) = child_game.apply(&mv) {
                warn!(?err, ?mv, "legal move failed to apply during expansion, skipping");
                continue;
            }
            let score = heuristic.evaluate(&child_game);
            if score.is_nan() {
                error!(?mv, "heuristic produced NaN");
                panic!("heuristic produced NaN");
            }

            let child = pool.acquire();
            {
                let mut child_state = child.state.lock().unwrap();
                child_state.parent = Some(Arc::downgrade(self));
                child_state.last_move = Some(mv.clone());
                child_state.heuristic = score;
                child_state.value = score;
            }
            created.push((mv, child));
        }

        {
            let mut state = self.state.lock().unwrap();
            for (mv, child) in created {
                state.child_likelihood.insert(mv.clone(), 0.0);
                state.child_explore_probability.insert(mv.clone(), 0.0);
                state.children.insert(mv, child);
            }
            state.descendent_count = state.children.len();
            state.average_depth = 1.0;
            state.status = ExplorationStatus::Explored;
        }

        self.propagate_likelihood(likelihood, false);
    }

    /// Recompute the child likelihood distribution, the exploration
    /// probabilities (likelihood floored by a uniform share), the expected
    /// value, and the frontier cache. With `recursive`, a changed value keeps
    /// sweeping toward the root and stops at the first node whose value is
    /// unchanged.
    pub(crate) fn propagate_likelihood(
        self: &Arc<Self>,
        likelihood: &dyn ChildLikelihood<G>,
        recursive: bool,
    ) {
        let Some(_op) = self.guard() else { return };

        let (mut distribution, children, leaf_score) = {
            let mut state = self.state.lock().unwrap();
            let distribution = std::mem::take(&mut state.child_likelihood);
            let children: Vec<(G::Move, Arc<Node<G>>)> = state
                .children
                .iter()
                .map(|(mv, child)| (mv.clone(), Arc::clone(child)))
                .collect();
            (distribution, children, state.heuristic)
        };

        let values: HashMap<G::Move, f64> = children
            .iter()
            .map(|(mv, child)| (mv.clone(), child.value()))
            .collect();
        let get_game = || self.game_snapshot();
        let view = ChildView::new(&values, &get_game);
        likelihood.assign(&view, &mut distribution);

        let value = if children.is_empty() {
            leaf_score
        } else {
            distribution
                .iter()
                .map(|(mv, p)| p * values.get(mv).copied().unwrap_or(0.0))
                .sum()
        };
        if value.is_nan() {
            error!("NaN value while propagating child likelihoods");
            panic!("NaN value while propagating child likelihoods");
        }

        let (value_changed, parent) = {
            let mut state = self.state.lock().unwrap();
            let k = distribution.len();
            {
                let NodeState {
                    child_explore_probability,
                    ..
                } = &mut *state;
                child_explore_probability.clear();
                for (mv, p) in &distribution {
                    let floored = EXPLORATION_FLOOR / k as f64 + (1.0 - EXPLORATION_FLOOR) * p;
                    child_explore_probability.insert(mv.clone(), floored);
                }
            }
            state.child_likelihood = distribution;
            let changed = value != state.value;
            state.value = value;
            (changed, state.parent.clone())
        };

        match parent.and_then(|weak| weak.upgrade()) {
            Some(parent) if recursive && value_changed => {
                self.update_frontier(false);
                parent.propagate_likelihood(likelihood, true);
            }
            _ => {
                self.update_frontier(recursive);
            }
        }
    }

    /// Coordinator-side completion of an expansion: archive the node, then
    /// fold its children into the ancestors' values, depths, and counts.
    pub(crate) fn commit_expansion(self: &Arc<Self>, likelihood: &dyn ChildLikelihood<G>) {
        let Some(_op) = self.guard() else { return };

        let (child_count, parent) = {
            let mut state = self.state.lock().unwrap();
            state.status = ExplorationStatus::Archived;
            (state.children.len(), state.parent.clone())
        };

        let Some(parent) = parent.and_then(|weak| weak.upgrade()) else {
            return;
        };
        let Some(_parent_op) = parent.guard() else { return };
        parent.propagate_likelihood(likelihood, true);
        parent.update_average_depth();
        parent.add_descendents(child_count);
    }
}
