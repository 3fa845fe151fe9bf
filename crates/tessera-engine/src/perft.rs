//! Perft (performance test) for move generator validation.
//!
//! Perft counts the number of leaf nodes at a given depth, which can be
//! compared against known-correct values to validate move generation,
//! legality filtering and make/unmake together.

use crate::movegen::{generate_all, MoveList};
use crate::observer::NullObserver;
use crate::position::Position;

/// Counts the number of leaf nodes at the given depth.
pub fn perft(pos: &mut Position, depth: u32) -> u64 {
    if depth == 0 {
        return 1;
    }

    let mut moves = MoveList::new();
    generate_all(pos, &mut moves);

    let mut nodes = 0u64;
    for &mv in moves.as_slice() {
        if !pos.is_legal(mv) {
            continue;
        }
        if depth == 1 {
            nodes += 1;
            continue;
        }
        pos.make(mv, &mut NullObserver);
        nodes += perft(pos, depth - 1);
        pos.unmake(mv, &mut NullObserver);
    }
    nodes
}

/// Perft with divide: the node count below each root move. The standard
/// tool for bisecting a generator bug down to one move.
pub fn perft_divide(pos: &mut Position, depth: u32) -> Vec<(String, u64)> {
    let mut moves = MoveList::new();
    generate_all(pos, &mut moves);
    let chess960 = pos.is_chess960();

    let mut results = Vec::with_capacity(moves.len());
    for &mv in moves.as_slice() {
        if !pos.is_legal(mv) {
            continue;
        }
        pos.make(mv, &mut NullObserver);
        let nodes = if depth > 1 { perft(pos, depth - 1) } else { 1 };
        pos.unmake(mv, &mut NullObserver);
        results.push((mv.to_uci(chess960), nodes));
    }

    results.sort_by(|a, b| a.0.cmp(&b.0));
    results
}
