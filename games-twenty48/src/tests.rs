use super::*;
use crossbeam_channel::bounded;
use rand::SeedableRng;
use rand_chacha::ChaCha20Rng;

#[test]
fn test_slide_merges_pairs_toward_the_head() {
    assert_eq!(slide_row([1, 1, 0, 0]), [2, 0, 0, 0]);
    assert_eq!(slide_row([0, 1, 0, 1]), [2, 0, 0, 0]);
    assert_eq!(slide_row([1, 2, 1, 0]), [1, 2, 1, 0]);
    assert_eq!(slide_row([0, 0, 0, 3]), [3, 0, 0, 0]);
}

#[test]
fn test_slide_merges_each_pair_once() {
    // four equal tiles become two merged tiles, not one
    assert_eq!(slide_row([1, 1, 1, 1]), [2, 2, 0, 0]);
    // the already-merged tile does not merge again
    assert_eq!(slide_row([2, 1, 1, 0]), [2, 2, 0, 0]);
}

#[test]
fn test_shift_orientation() {
    // single tile at row 1, column 2
    let game = Twenty48::with_tiles(&[(6, 1)]);

    let left = game.shifted(Direction::Left);
    assert_eq!(left[4], 1);

    let right = game.shifted(Direction::Right);
    assert_eq!(right[7], 1);

    let up = game.shifted(Direction::Up);
    assert_eq!(up[2], 1);

    let down = game.shifted(Direction::Down);
    assert_eq!(down[14], 1);
}

#[test]
fn test_apply_alternates_turns() {
    let mut game = Twenty48::with_tiles(&[(0, 1), (1, 1)]);
    assert_eq!(game.turn(), Turn::Player);

    game.apply(&Move::Shift(Direction::Left)).unwrap();
    assert_eq!(game.turn(), Turn::Chance);
    assert_eq!(game.board()[0], 2);

    game.apply(&Move::Spawn {
        cell: 5,
        four: true,
    })
    .unwrap();
    assert_eq!(game.turn(), Turn::Player);
    assert_eq!(game.board()[5], 2);
}

#[test]
fn test_apply_rejects_illegal_moves() {
    let mut game = Twenty48::with_tiles(&[(0, 1), (1, 2)]);

    // left does not change this board
    assert!(game.apply(&Move::Shift(Direction::Left)).is_err());
    // spawns are not legal on the player's turn
    assert!(game
        .apply(&Move::Spawn {
            cell: 5,
            four: false
        })
        .is_err());

    game.apply(&Move::Shift(Direction::Right)).unwrap();
    // the shifted tiles now occupy cells 2 and 3
    assert!(game
        .apply(&Move::Spawn {
            cell: 3,
            four: false
        })
        .is_err());
}

#[test]
fn test_possible_moves_per_turn() {
    let game = Twenty48::with_tiles(&[(0, 1), (1, 2)]);
    let moves = game.possible_moves();
    // both tiles sit in the top-left corner: left and up are no-ops
    assert_eq!(moves.len(), 2);
    assert!(!moves.contains(&Move::Shift(Direction::Left)));
    assert!(!moves.contains(&Move::Shift(Direction::Up)));

    let mut game = game;
    game.apply(&Move::Shift(Direction::Right)).unwrap();
    let spawns = game.possible_moves();
    // two variants per empty cell
    assert_eq!(spawns.len(), 14 * 2);
    assert!(spawns
        .iter()
        .all(|mv| matches!(mv, Move::Spawn { .. })));
}

#[test]
fn test_game_over_detection() {
    // checkerboard of alternating tiles: nothing can merge or slide
    let tiles: Vec<(usize, u8)> = (0..16)
        .map(|cell| {
            let row = cell / 4;
            let exponent = if (cell + row) % 2 == 0 { 1 } else { 2 };
            (cell, exponent)
        })
        .collect();
    let game = Twenty48::with_tiles(&tiles);

    assert!(game.is_over());
    assert!(game.possible_moves().is_empty());

    let open = Twenty48::with_tiles(&[(0, 1), (4, 1)]);
    assert!(!open.is_over());
}

#[test]
fn test_play_broadcasts_to_listener() {
    let mut game = Twenty48::with_tiles(&[(0, 1), (1, 1)]);
    let (sink, events) = bounded(4);
    game.register_move_listener(sink);

    game.play(Move::Shift(Direction::Left)).unwrap();

    assert_eq!(
        events.try_recv().unwrap(),
        Some(Move::Shift(Direction::Left))
    );

    // engine-side clones stay silent
    let mut clone = game.clone();
    clone
        .apply(&Move::Spawn {
            cell: 8,
            four: false,
        })
        .unwrap();
    assert!(events.try_recv().is_err());
}

#[test]
fn test_sample_spawn_is_legal() {
    let mut game = Twenty48::with_tiles(&[(0, 1), (1, 1)]);
    assert!(game.sample_spawn(&mut ChaCha20Rng::seed_from_u64(7)).is_none());

    game.apply(&Move::Shift(Direction::Left)).unwrap();
    let mut rng = ChaCha20Rng::seed_from_u64(7);
    for _ in 0..50 {
        let mv = game.sample_spawn(&mut rng).unwrap();
        let mut probe = game.clone();
        probe.apply(&mv).unwrap();
    }
}

#[test]
fn test_heuristic_rewards_merging() {
    // same total tile value, fewer tiles on the merged board
    let merged = Twenty48::with_tiles(&[(0, 2)]);
    let split = Twenty48::with_tiles(&[(0, 1), (1, 1)]);
    assert!(heuristic(&merged) > heuristic(&split));
}

#[test]
fn test_spawn_likelihood_matches_tile_distribution() {
    let mut game = Twenty48::with_tiles(&[(0, 1), (1, 1)]);
    game.apply(&Move::Shift(Direction::Left)).unwrap();

    let moves = game.possible_moves();
    let values: std::collections::HashMap<Move, f64> =
        moves.iter().map(|&mv| (mv, 0.0)).collect();
    let mut out = values.clone();
    let get_game = || Some(game.clone());
    let view = ChildView::new(&values, &get_game);

    SpawnWeightedLikelihood.assign(&view, &mut out);

    let cells = moves.len() as f64 / 2.0;
    for (mv, p) in &out {
        match mv {
            Move::Spawn { four: false, .. } => assert!((p - 0.9 / cells).abs() < 1e-12),
            Move::Spawn { four: true, .. } => assert!((p - 0.1 / cells).abs() < 1e-12),
            Move::Shift(_) => panic!("unexpected shift on a chance level"),
        }
    }
    let total: f64 = out.values().sum();
    assert!((total - 1.0).abs() < 1e-9);
}

#[test]
fn test_shift_likelihood_is_greedy() {
    let game = Twenty48::with_tiles(&[(0, 1), (1, 1)]);
    let values: std::collections::HashMap<Move, f64> = [
        (Move::Shift(Direction::Left), 10.0),
        (Move::Shift(Direction::Right), 40.0),
        (Move::Shift(Direction::Down), 20.0),
    ]
    .into_iter()
    .collect();
    let mut out: std::collections::HashMap<Move, f64> =
        values.keys().map(|&mv| (mv, 0.0)).collect();
    let get_game = || Some(game.clone());
    let view = ChildView::new(&values, &get_game);

    SpawnWeightedLikelihood.assign(&view, &mut out);

    assert!((out[&Move::Shift(Direction::Right)] - 1.0).abs() < 1e-12);
    assert!(out[&Move::Shift(Direction::Left)].abs() < 1e-12);
    assert!(out[&Move::Shift(Direction::Down)].abs() < 1e-12);
}
