//! Concurrent expectimax search for stochastic, perfect-information games.
//!
//! The engine incrementally grows a search tree rooted at the current game
//! state, always expanding the frontier node with the highest path-product
//! likelihood from the root, until a configured node budget is reached.
//! Clients ask for the best move or the value map over candidate moves while
//! the search runs, and the tree follows the real game as moves are observed.
//!
//! # Overview
//!
//! A single coordinator thread owns the tree; a pool of worker threads
//! expands nodes in parallel. Work moves over bounded channels:
//!
//! ```text
//! ┌────────────┐  reply slot   ┌─────────────────┐   node    ┌──────────┐
//! │  workers   │──────────────▶│   coordinator   │──────────▶│  worker  │
//! │ (x10)      │               │  (single writer │           │ explores │
//! │            │◀──────────────│   of the tree)  │◀──────────│  node    │
//! └────────────┘   expanded    └─────────────────┘  expanded └──────────┘
//!                                  ▲         ▲
//!                       move events│         │best-move / value requests
//!                              (live game)  (client threads)
//! ```
//!
//! Each expansion clones the node's game, creates one child per legal move
//! scored by the [`Heuristic`], and hands the node back. The coordinator
//! recomputes child likelihoods via the [`ChildLikelihood`] function, floors
//! them into exploration probabilities, backpropagates values toward the
//! root, and refreshes the frontier cache along the way.
//!
//! # Usage
//!
//! ```rust,ignore
//! use expectimax::{Expectimax, UniformLikelihood};
//! use std::sync::Arc;
//!
//! let mut game = MyGame::new();
//! let engine = Arc::new(Expectimax::new(
//!     &mut game,
//!     |g: &MyGame| g.score(),
//!     UniformLikelihood::new(),
//!     100_000,
//! ));
//!
//! let runner = {
//!     let engine = Arc::clone(&engine);
//!     std::thread::spawn(move || engine.run())
//! };
//!
//! let best = engine.best_move();
//! game.play(best.unwrap())?; // delivered to the engine via the move listener
//! ```
//!
//! # Lifetime and memory
//!
//! Nodes are reference counted with a retirement flag. Advancing the root
//! retires the abandoned siblings' subtrees asynchronously; traversals that
//! touch a retired node abort and the frontier heals on the next coordinator
//! tick. Storage of reclaimed nodes is recycled through a pool.

pub mod config;
pub mod game;

mod node;
mod pool;
mod search;
mod worker;

pub use config::{SearchConfig, EXPLORATION_FLOOR, WORKER_COUNT};
pub use game::{ChildLikelihood, ChildView, Game, Heuristic, MoveError, UniformLikelihood};
pub use pool::PoolStats;
pub use search::Expectimax;
