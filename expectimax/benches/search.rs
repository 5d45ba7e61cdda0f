//! Search benchmarks for performance profiling.
//!
//! Run with: `cargo bench -p expectimax`
//!
//! Measures end-to-end throughput of the worker pool filling the node budget
//! on a fixed binary-tree game with a trivial heuristic, so the numbers are
//! dominated by engine overhead (channels, frontier maintenance, value
//! propagation) rather than game logic.

use std::sync::Arc;
use std::thread;

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use crossbeam_channel::Sender;
use expectimax::{Expectimax, Game, MoveError, UniformLikelihood};

/// Binary tree of the given depth; leaves score their left-to-right index.
#[derive(Clone)]
struct TreeGame {
    depth: usize,
    path: Vec<u8>,
}

impl TreeGame {
    fn new(depth: usize) -> Self {
        Self {
            depth,
            path: Vec::new(),
        }
    }
}

impl Game for TreeGame {
    type Move = u8;

    fn is_over(&self) -> bool {
        self.path.len() == self.depth
    }

    fn possible_moves(&self) -> Vec<u8> {
        if self.is_over() {
            Vec::new()
        } else {
            vec![0, 1]
        }
    }

    fn apply(&mut self, mv: &u8) -> Result<(), MoveError> {
        if self.is_over() {
            return Err(MoveError::GameOver);
        }
        self.path.push(*mv);
        Ok(())
    }

    fn register_move_listener(&mut self, _sink: Sender<Option<u8>>) {}
}

fn tree_heuristic(game: &TreeGame) -> f64 {
    if game.is_over() {
        let mut index = 0usize;
        for &branch in &game.path {
            index = index * 2 + branch as usize;
        }
        (index + 1) as f64
    } else {
        0.0
    }
}

fn bench_search_to_budget(c: &mut Criterion) {
    let mut group = c.benchmark_group("search_to_budget");
    group.sample_size(10);

    for budget in [100usize, 500, 1000] {
        group.throughput(Throughput::Elements(budget as u64));
        group.bench_with_input(BenchmarkId::new("uniform", budget), &budget, |b, &budget| {
            b.iter(|| {
                let mut game = TreeGame::new(16);
                let engine = Arc::new(Expectimax::new(
                    &mut game,
                    tree_heuristic,
                    UniformLikelihood::new(),
                    budget,
                ));
                let runner = {
                    let engine = Arc::clone(&engine);
                    thread::spawn(move || engine.run())
                };

                while engine.node_count() < budget {
                    thread::yield_now();
                }

                engine.shutdown();
                runner.join().unwrap();
                black_box(engine.node_count())
            });
        });
    }

    group.finish();
}

criterion_group!(benches, bench_search_to_budget);
criterion_main!(benches);
