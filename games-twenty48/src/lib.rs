//! 2048 game implementation for the expectimax engine
//!
//! This crate provides a complete reference implementation of 2048 showing
//! how to implement the `Game` trait for the engine: the game alternates
//! between player decision levels (board shifts) and chance levels (tile
//! spawns), with the spawn distribution expressed through the
//! [`SpawnWeightedLikelihood`] child-likelihood function.
//!
//! # Usage
//!
//! ```rust
//! use games_twenty48::{heuristic, SpawnWeightedLikelihood, Twenty48};
//! use expectimax::Expectimax;
//!
//! let mut game = Twenty48::with_tiles(&[(5, 1), (10, 1)]);
//! let engine = Expectimax::new(&mut game, heuristic, SpawnWeightedLikelihood, 10_000);
//! assert!(!engine.is_searching());
//! ```

use std::collections::HashMap;

use crossbeam_channel::Sender;
use expectimax::{ChildLikelihood, ChildView, Game, MoveError};
use rand::Rng;

/// Probability that a spawned tile is a 4 rather than a 2.
pub const FOUR_PROBABILITY: f64 = 0.1;

/// Shift directions for the player's turn.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Direction {
    Up,
    Down,
    Left,
    Right,
}

impl Direction {
    pub const ALL: [Direction; 4] = [
        Direction::Up,
        Direction::Down,
        Direction::Left,
        Direction::Right,
    ];
}

/// A move in the game. Player levels shift the board; chance levels spawn a
/// tile into an empty cell.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Move {
    Shift(Direction),
    /// Spawn a 2 (or a 4 when `four`) at board cell `cell` (0..16, row-major).
    Spawn { cell: u8, four: bool },
}

/// Whose turn it is.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Turn {
    Player,
    Chance,
}

/// 2048 game state.
///
/// The board stores tile exponents (0 = empty, 1 = a "2" tile, 2 = a "4"
/// tile, ...), row-major. Moves strictly alternate between shifts and
/// spawns so that the engine sees the chance process as its own level of the
/// tree.
#[derive(Debug, Clone)]
pub struct Twenty48 {
    board: [u8; 16],
    turn: Turn,
    listener: Option<Sender<Option<Move>>>,
}

impl Twenty48 {
    /// Empty board; the first moves are the opening tile spawns.
    pub fn new() -> Self {
        Self {
            board: [0; 16],
            turn: Turn::Chance,
            listener: None,
        }
    }

    /// Board with the given `(cell, exponent)` tiles placed, player to move.
    pub fn with_tiles(tiles: &[(usize, u8)]) -> Self {
        let mut board = [0u8; 16];
        for &(cell, exponent) in tiles {
            assert!(cell < 16, "cell out of range: {cell}");
            assert!(exponent > 0, "tiles must be non-empty");
            board[cell] = exponent;
        }
        Self {
            board,
            turn: Turn::Player,
            listener: None,
        }
    }

    pub fn board(&self) -> &[u8; 16] {
        &self.board
    }

    pub fn turn(&self) -> Turn {
        self.turn
    }

    /// Face value of the largest tile (0 on an empty board).
    pub fn max_tile(&self) -> u64 {
        self.board
            .iter()
            .map(|&v| if v == 0 { 0 } else { 1u64 << v })
            .max()
            .unwrap_or(0)
    }

    /// Apply a move on the live game and broadcast it to any registered
    /// listener. Engine-internal clones advance with [`Game::apply`] instead
    /// and stay silent.
    pub fn play(&mut self, mv: Move) -> Result<(), MoveError> {
        self.apply(&mv)?;
        if let Some(sink) = &self.listener {
            let _ = sink.send(Some(mv));
        }
        Ok(())
    }

    /// Sample a spawn move the way the real game would: uniform over empty
    /// cells, a 4 with probability [`FOUR_PROBABILITY`]. `None` when it is
    /// not the chance side's turn.
    pub fn sample_spawn<R: Rng>(&self, rng: &mut R) -> Option<Move> {
        if self.turn != Turn::Chance {
            return None;
        }
        let cells = self.empty_cells();
        if cells.is_empty() {
            return None;
        }
        let cell = cells[rng.gen_range(0..cells.len())];
        let four = rng.gen::<f64>() < FOUR_PROBABILITY;
        Some(Move::Spawn { cell, four })
    }

    fn empty_cells(&self) -> Vec<u8> {
        (0..16u8).filter(|&c| self.board[c as usize] == 0).collect()
    }

    /// The board after shifting in `dir`, merging equal neighbors once.
    fn shifted(&self, dir: Direction) -> [u8; 16] {
        let mut board = [0u8; 16];
        for lane in 0..4 {
            let idx = |i: usize| -> usize {
                match dir {
                    Direction::Left => lane * 4 + i,
                    Direction::Right => lane * 4 + (3 - i),
                    Direction::Up => i * 4 + lane,
                    Direction::Down => (3 - i) * 4 + lane,
                }
            };
            let row = [
                self.board[idx(0)],
                self.board[idx(1)],
                self.board[idx(2)],
                self.board[idx(3)],
            ];
            let slid = slide_row(row);
            for (i, v) in slid.into_iter().enumerate() {
                board[idx(i)] = v;
            }
        }
        board
    }
}

impl Default for Twenty48 {
    fn default() -> Self {
        Self::new()
    }
}

/// Compact a lane toward its head, merging each equal pair once.
fn slide_row(row: [u8; 4]) -> [u8; 4] {
    let mut out = [0u8; 4];
    let mut pos = 0;
    let mut pending: Option<u8> = None;
    for v in row.into_iter().filter(|&v| v != 0) {
        match pending {
            Some(prev) if prev == v => {
                out[pos - 1] = v + 1;
                pending = None;
            }
            _ => {
                out[pos] = v;
                pending = Some(v);
                pos += 1;
            }
        }
    }
    out
}

impl Game for Twenty48 {
    type Move = Move;

    fn is_over(&self) -> bool {
        match self.turn {
            // a spawn always follows a legal shift, so an empty cell exists;
            // this arm only matters for hand-built positions
            Turn::Chance => self.empty_cells().is_empty(),
            Turn::Player => Direction::ALL.iter().all(|&d| self.shifted(d) == self.board),
        }
    }

    fn possible_moves(&self) -> Vec<Move> {
        match self.turn {
            Turn::Player => Direction::ALL
                .iter()
                .copied()
                .filter(|&d| self.shifted(d) != self.board)
                .map(Move::Shift)
                .collect(),
            Turn::Chance => self
                .empty_cells()
                .into_iter()
                .flat_map(|cell| {
                    [
                        Move::Spawn { cell, four: false },
                        Move::Spawn { cell, four: true },
                    ]
                })
                .collect(),
        }
    }

    fn apply(&mut self, mv: &Move) -> Result<(), MoveError> {
        match (*mv, self.turn) {
            (Move::Shift(dir), Turn::Player) => {
                let board = self.shifted(dir);
                if board == self.board {
                    return Err(MoveError::Illegal(format!(
                        "shift {dir:?} does not change the board"
                    )));
                }
                self.board = board;
                self.turn = Turn::Chance;
                Ok(())
            }
            (Move::Spawn { cell, four }, Turn::Chance) => {
                let cell = cell as usize;
                if cell >= 16 || self.board[cell] != 0 {
                    return Err(MoveError::Illegal(format!("cell {cell} is not empty")));
                }
                self.board[cell] = if four { 2 } else { 1 };
                self.turn = Turn::Player;
                Ok(())
            }
            _ => Err(MoveError::Illegal(
                "move does not match whose turn it is".into(),
            )),
        }
    }

    fn register_move_listener(&mut self, sink: Sender<Option<Move>>) {
        self.listener = Some(sink);
    }
}

/// Leaf score: total tile value plus a bonus per empty cell, so boards that
/// merge aggressively and keep room to maneuver score higher.
pub fn heuristic(game: &Twenty48) -> f64 {
    let mut tiles = 0.0;
    let mut empties = 0.0;
    for &v in game.board.iter() {
        if v == 0 {
            empties += 1.0;
        } else {
            tiles += (1u64 << v) as f64;
        }
    }
    tiles + 32.0 * empties
}

/// Child likelihood for 2048.
///
/// Chance levels weight each spawn by the real tile distribution: uniform
/// over empty cells, a 4 with probability [`FOUR_PROBABILITY`]. Player levels
/// put all mass on the currently best-valued shift, modelling a greedy
/// player, which makes the node value the expectimax of the subtree.
#[derive(Debug, Clone, Copy, Default)]
pub struct SpawnWeightedLikelihood;

impl ChildLikelihood<Twenty48> for SpawnWeightedLikelihood {
    fn assign(&self, view: &ChildView<'_, Twenty48>, out: &mut HashMap<Move, f64>) {
        if out.is_empty() {
            return;
        }

        let chance_level = out.keys().any(|mv| matches!(mv, Move::Spawn { .. }));
        if chance_level {
            // two spawn variants per empty cell
            let cells = out.len() as f64 / 2.0;
            for (mv, p) in out.iter_mut() {
                if let Move::Spawn { four, .. } = mv {
                    let tile_weight = if *four {
                        FOUR_PROBABILITY
                    } else {
                        1.0 - FOUR_PROBABILITY
                    };
                    *p = tile_weight / cells;
                }
            }
        } else {
            // greedy one-hot over the player's shifts, first seen on ties
            let mut best: Option<(Move, f64)> = None;
            for mv in out.keys() {
                let value = view.child_value(mv);
                match &best {
                    Some((_, best_value)) if *best_value >= value => {}
                    _ => best = Some((*mv, value)),
                }
            }
            if let Some((best_mv, _)) = best {
                for (mv, p) in out.iter_mut() {
                    *p = if *mv == best_mv { 1.0 } else { 0.0 };
                }
            }
        }
    }
}

#[cfg(test)]
mod tests;
