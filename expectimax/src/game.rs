//! Game abstraction and evaluation seams consumed by the search engine.
//!
//! The engine is polymorphic over three things: a [`Game`] it can clone and
//! advance, a [`Heuristic`] that scores leaf states, and a [`ChildLikelihood`]
//! that assigns probabilities to the children of an expanded node. All three
//! are traits with blanket implementations for plain closures, so simple
//! callers never need a named type.

use std::collections::HashMap;
use std::fmt::Debug;
use std::hash::Hash;

use crossbeam_channel::Sender;
use thiserror::Error;

/// Errors a game can report when asked to apply a move.
#[derive(Debug, Error)]
pub enum MoveError {
    #[error("illegal move: {0}")]
    Illegal(String),

    #[error("game is already over")]
    GameOver,
}

/// A playable game position the engine can search.
///
/// The engine never interprets moves; it only stores them as tree edges,
/// hashes them as child keys, and hands them back via [`Game::apply`].
/// Implementations must be cheap to clone: the engine clones a state once per
/// expanded node and once per created child.
///
/// Moves observed in the real game are delivered through the sink registered
/// with [`Game::register_move_listener`]. A `None` sentinel on the sink is
/// ignored by the engine.
pub trait Game: Clone + Send + Sync + 'static {
    /// Opaque move identifier. Keys the children mapping of every node.
    type Move: Clone + Eq + Hash + Debug + Send + Sync + 'static;

    /// True once no further moves can be played.
    fn is_over(&self) -> bool;

    /// All legal moves from this position, in a stable order.
    /// Must be empty exactly when [`Game::is_over`] is true.
    fn possible_moves(&self) -> Vec<Self::Move>;

    /// Apply a move in place.
    fn apply(&mut self, mv: &Self::Move) -> Result<(), MoveError>;

    /// Arrange for every move applied to the *live* game to be delivered on
    /// `sink`. Clones made by the engine must not broadcast.
    fn register_move_listener(&mut self, sink: Sender<Option<Self::Move>>);
}

/// Static leaf scoring function. Must be pure and NaN-free; a NaN score is
/// treated as a fatal contract violation by the engine.
pub trait Heuristic<G: Game>: Send + Sync {
    fn evaluate(&self, game: &G) -> f64;
}

impl<G: Game, F> Heuristic<G> for F
where
    F: Fn(&G) -> f64 + Send + Sync,
{
    fn evaluate(&self, game: &G) -> f64 {
        self(game)
    }
}

/// Read-only view of a node handed to [`ChildLikelihood::assign`].
///
/// Child values are snapshotted before the callback runs, so reading them is
/// cheap and cannot block the tree. The game state is materialized lazily on
/// demand because reconstructing it may walk the node's ancestry.
pub struct ChildView<'a, G: Game> {
    values: &'a HashMap<G::Move, f64>,
    game: &'a dyn Fn() -> Option<G>,
}

impl<'a, G: Game> ChildView<'a, G> {
    /// Build a view over snapshotted child values. Exposed so that
    /// [`ChildLikelihood`] implementations can be tested directly.
    pub fn new(values: &'a HashMap<G::Move, f64>, game: &'a dyn Fn() -> Option<G>) -> Self {
        Self { values, game }
    }

    /// Clone of the game state at this node, or `None` when the node's
    /// ancestry has been retired under a concurrent root advance.
    pub fn game(&self) -> Option<G> {
        (self.game)()
    }

    /// Current estimated value of the child reached by `mv` (0.0 if unknown).
    pub fn child_value(&self, mv: &G::Move) -> f64 {
        self.values.get(mv).copied().unwrap_or(0.0)
    }

    /// The moves leading to this node's children.
    pub fn moves(&self) -> impl Iterator<Item = &G::Move> {
        self.values.keys()
    }

    pub fn child_count(&self) -> usize {
        self.values.len()
    }
}

/// Assigns a probability distribution over the children of a node.
///
/// `out` arrives keyed by the node's current children (values hold the
/// previous distribution, zeros on first call). Implementations overwrite the
/// values and are responsible for making them sum to 1. Producing a NaN is a
/// fatal contract violation.
pub trait ChildLikelihood<G: Game>: Send + Sync {
    fn assign(&self, view: &ChildView<'_, G>, out: &mut HashMap<G::Move, f64>);
}

impl<G: Game, F> ChildLikelihood<G> for F
where
    F: Fn(&ChildView<'_, G>, &mut HashMap<G::Move, f64>) + Send + Sync,
{
    fn assign(&self, view: &ChildView<'_, G>, out: &mut HashMap<G::Move, f64>) {
        self(view, out)
    }
}

/// Uniform distribution over the current children. Useful for tests and as a
/// neutral baseline when no better model of the opponent or chance process
/// exists.
#[derive(Debug, Clone, Copy, Default)]
pub struct UniformLikelihood;

impl UniformLikelihood {
    pub fn new() -> Self {
        Self
    }
}

impl<G: Game> ChildLikelihood<G> for UniformLikelihood {
    fn assign(&self, _view: &ChildView<'_, G>, out: &mut HashMap<G::Move, f64>) {
        let k = out.len();
        if k == 0 {
            return;
        }
        let p = 1.0 / k as f64;
        for weight in out.values_mut() {
            *weight = p;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_uniform_likelihood() {
        let values: HashMap<u8, f64> = [(0u8, 1.0), (1u8, 2.0), (2u8, 4.0)].into_iter().collect();
        let get_game = || -> Option<TrivialGame> { None };
        let view = ChildView::new(&values, &get_game);

        let mut out: HashMap<u8, f64> = values.keys().map(|mv| (*mv, 0.0)).collect();
        UniformLikelihood::new().assign(&view, &mut out);

        for mv in values.keys() {
            assert!((out[mv] - 1.0 / 3.0).abs() < 1e-9);
        }
        let sum: f64 = out.values().sum();
        assert!((sum - 1.0).abs() < 1e-9);
    }

    #[test]
    fn test_uniform_likelihood_no_children() {
        let values: HashMap<u8, f64> = HashMap::new();
        let get_game = || -> Option<TrivialGame> { None };
        let view = ChildView::new(&values, &get_game);

        let mut out: HashMap<u8, f64> = HashMap::new();
        UniformLikelihood::new().assign(&view, &mut out);
        assert!(out.is_empty());
    }

    #[test]
    fn test_child_view_reads_snapshot() {
        let values: HashMap<u8, f64> = [(3u8, 1.5)].into_iter().collect();
        let get_game = || -> Option<TrivialGame> { Some(TrivialGame) };
        let view = ChildView::new(&values, &get_game);

        assert!((view.child_value(&3) - 1.5).abs() < 1e-9);
        assert!((view.child_value(&9)).abs() < 1e-9);
        assert_eq!(view.child_count(), 1);
        assert!(view.game().is_some());
    }

    #[derive(Clone, Debug)]
    struct TrivialGame;

    impl Game for TrivialGame {
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
}
