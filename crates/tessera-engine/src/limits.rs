//! Search limiters: the stop oracle polled by the searcher.
//!
//! A limiter answers one question, "should the search stop now?", plus two
//! bookkeeping calls the main worker makes between iterations. Internal
//! state is atomic; only the main worker mutates it, helpers merely poll.

use crate::params::{Score, TM_HARD_FRACTION_DENOM, TM_SOFT_SCALE_DENOM, TM_SOFT_SCALE_NUM,
    TM_STABILITY_MAX};
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::time::Instant;
use tessera_core::{Color, Move};

/// The stop oracle.
///
/// `stop` is polled from the search loop on every batch of nodes. Soft
/// limits (time-management targets that should only interrupt between
/// iterations) are honored only when `allow_soft` is set; hard limits fire
/// regardless.
pub trait Limiter: Send + Sync {
    fn stop(&self, nodes: u64, allow_soft: bool) -> bool;

    /// Reports a finished iteration: depth, score, best move and total
    /// nodes. Time managers rescale their soft target here.
    fn update(&self, _depth: i32, _score: Score, _best_move: Move, _nodes: u64) {}

    /// Feeds per-root-move node counts for the node-fraction heuristic.
    fn update_move_nodes(&self, _mv: Move, _nodes: u64) {}
}

/// Never stops; `go infinite` and pondering.
pub struct Infinite;

impl Limiter for Infinite {
    fn stop(&self, _nodes: u64, _allow_soft: bool) -> bool {
        false
    }
}

/// Stops when the searched node count reaches a cap.
pub struct NodeLimit {
    max_nodes: u64,
}

impl NodeLimit {
    pub fn new(max_nodes: u64) -> Self {
        NodeLimit { max_nodes }
    }
}

impl Limiter for NodeLimit {
    fn stop(&self, nodes: u64, _allow_soft: bool) -> bool {
        nodes >= self.max_nodes
    }
}

/// Stops after a fixed wall-clock budget (`go movetime`).
pub struct MoveTime {
    start: Instant,
    limit_ms: u64,
}

impl MoveTime {
    pub fn new(start: Instant, limit_ms: u64, overhead_ms: u64) -> Self {
        MoveTime {
            start,
            limit_ms: limit_ms.saturating_sub(overhead_ms).max(1),
        }
    }
}

impl Limiter for MoveTime {
    fn stop(&self, _nodes: u64, _allow_soft: bool) -> bool {
        self.start.elapsed().as_millis() as u64 >= self.limit_ms
    }
}

/// Clock-based time management with a soft and a hard bound.
///
/// The hard bound protects against flagging and is polled everywhere. The
/// soft bound is the target for starting another iteration; it shrinks
/// while the best move stays stable and grows when the best move soaks up
/// few of the searched nodes (a sign the verdict is not settled).
pub struct TimeManager {
    start: Instant,
    hard_ms: u64,
    base_soft_ms: u64,
    soft_ms: AtomicU64,
    stability: AtomicU32,
    prev_best: AtomicU32,
    /// Nodes spent per root move, indexed by a hash of the move encoding.
    move_nodes: Box<[AtomicU64]>,
}

/// Slots in the per-move node table.
const MOVE_NODES_SLOTS: usize = 4096;

impl TimeManager {
    /// Plans a budget from the UCI clock fields.
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        start: Instant,
        stm: Color,
        wtime: u64,
        btime: u64,
        winc: u64,
        binc: u64,
        movestogo: Option<u32>,
        overhead_ms: u64,
    ) -> Self {
        let (time, inc) = match stm {
            Color::White => (wtime, winc),
            Color::Black => (btime, binc),
        };
        let time = time.saturating_sub(overhead_ms).max(1);

        let horizon = u64::from(movestogo.unwrap_or(24).max(1));
        let base = time / horizon + inc * 3 / 4;
        let hard_ms = (time / TM_HARD_FRACTION_DENOM).min(base * 6).max(1);
        let base_soft_ms = (base * TM_SOFT_SCALE_NUM / TM_SOFT_SCALE_DENOM)
            .clamp(1, hard_ms);

        let move_nodes = (0..MOVE_NODES_SLOTS)
            .map(|_| AtomicU64::new(0))
            .collect::<Vec<_>>()
            .into_boxed_slice();

        TimeManager {
            start,
            hard_ms,
            base_soft_ms,
            soft_ms: AtomicU64::new(base_soft_ms),
            stability: AtomicU32::new(0),
            prev_best: AtomicU32::new(u32::MAX),
            move_nodes,
        }
    }

    #[inline]
    fn slot(mv: Move) -> usize {
        mv.raw() as usize % MOVE_NODES_SLOTS
    }
}

impl Limiter for TimeManager {
    fn stop(&self, _nodes: u64, allow_soft: bool) -> bool {
        let elapsed = self.start.elapsed().as_millis() as u64;
        if elapsed >= self.hard_ms {
            return true;
        }
        allow_soft && elapsed >= self.soft_ms.load(Ordering::Relaxed)
    }

    fn update(&self, _depth: i32, _score: Score, best_move: Move, nodes: u64) {
        // Best-move stability: every iteration confirming the move shaves
        // the soft target.
        let encoded = u32::from(best_move.raw());
        let stability = if self.prev_best.swap(encoded, Ordering::Relaxed) == encoded {
            let s = self.stability.load(Ordering::Relaxed) + 1;
            self.stability.store(s.min(TM_STABILITY_MAX), Ordering::Relaxed);
            s.min(TM_STABILITY_MAX)
        } else {
            self.stability.store(0, Ordering::Relaxed);
            0
        };

        // Fraction of the whole search spent on the best move, in percent.
        let best_nodes = self.move_nodes[Self::slot(best_move)].load(Ordering::Relaxed);
        let frac_pct = if nodes > 0 {
            (best_nodes * 100 / nodes).min(100)
        } else {
            0
        };

        // Stable move: down to ~70% of base. Unconvincing node share:
        // up to ~180% of base.
        let stability_pct = 130u64.saturating_sub(8 * u64::from(stability)).max(70);
        let node_pct = 180u64.saturating_sub(frac_pct);
        let scaled = self.base_soft_ms * stability_pct * node_pct / 10_000;
        self.soft_ms
            .store(scaled.clamp(1, self.hard_ms), Ordering::Relaxed);
    }

    fn update_move_nodes(&self, mv: Move, nodes: u64) {
        self.move_nodes[Self::slot(mv)].fetch_add(nodes, Ordering::Relaxed);
    }
}

/// OR-composition of limiters: stops as soon as any member stops.
pub struct Composite {
    inner: Vec<Box<dyn Limiter>>,
}

impl Composite {
    pub fn new(inner: Vec<Box<dyn Limiter>>) -> Self {
        Composite { inner }
    }
}

impl Limiter for Composite {
    fn stop(&self, nodes: u64, allow_soft: bool) -> bool {
        self.inner.iter().any(|l| l.stop(nodes, allow_soft))
    }

    fn update(&self, depth: i32, score: Score, best_move: Move, nodes: u64) {
        for l in &self.inner {
            l.update(depth, score, best_move, nodes);
        }
    }

    fn update_move_nodes(&self, mv: Move, nodes: u64) {
        for l in &self.inner {
            l.update_move_nodes(mv, nodes);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tessera_core::Square;

    #[test]
    fn infinite_never_stops() {
        let l = Infinite;
        assert!(!l.stop(u64::MAX, true));
    }

    #[test]
    fn node_limit_stops_at_cap() {
        let l = NodeLimit::new(1000);
        assert!(!l.stop(999, false));
        assert!(l.stop(1000, false));
        assert!(l.stop(5000, true));
    }

    #[test]
    fn movetime_allows_a_fresh_start() {
        let l = MoveTime::new(Instant::now(), 60_000, 10);
        assert!(!l.stop(0, true));
    }

    #[test]
    fn time_manager_soft_before_hard() {
        let tm = TimeManager::new(
            Instant::now(),
            Color::White,
            60_000,
            60_000,
            0,
            0,
            None,
            10,
        );
        assert!(tm.base_soft_ms <= tm.hard_ms);
        assert!(!tm.stop(0, true));
    }

    #[test]
    fn stability_shrinks_the_soft_target() {
        let tm = TimeManager::new(
            Instant::now(),
            Color::White,
            60_000,
            60_000,
            0,
            0,
            None,
            10,
        );
        let mv = Move::normal(Square::E1, Square::E8);
        tm.update(8, 20, mv, 10_000);
        let first = tm.soft_ms.load(Ordering::Relaxed);
        for d in 9..14 {
            tm.update(d, 20, mv, 10_000);
        }
        let settled = tm.soft_ms.load(Ordering::Relaxed);
        assert!(settled < first, "{settled} !< {first}");

        // A best-move flip resets the discount.
        let other = Move::normal(Square::A1, Square::A8);
        tm.update(14, 20, other, 10_000);
        assert!(tm.soft_ms.load(Ordering::Relaxed) >= settled);
    }

    #[test]
    fn node_fraction_extends_unsettled_searches() {
        let tm = TimeManager::new(
            Instant::now(),
            Color::White,
            60_000,
            60_000,
            0,
            0,
            None,
            10,
        );
        let mv = Move::normal(Square::E1, Square::E8);
        // Best move soaked up nearly all nodes: target shrinks.
        tm.update_move_nodes(mv, 95);
        tm.update(8, 0, mv, 100);
        let settled = tm.soft_ms.load(Ordering::Relaxed);

        let tm2 = TimeManager::new(
            Instant::now(),
            Color::White,
            60_000,
            60_000,
            0,
            0,
            None,
            10,
        );
        // Best move got almost no nodes: target grows relative to above.
        tm2.update_move_nodes(mv, 5);
        tm2.update(8, 0, mv, 100);
        let unsettled = tm2.soft_ms.load(Ordering::Relaxed);
        assert!(unsettled > settled);
    }

    #[test]
    fn composite_ors_members() {
        let c = Composite::new(vec![Box::new(Infinite), Box::new(NodeLimit::new(10))]);
        assert!(!c.stop(5, false));
        assert!(c.stop(10, false));
    }
}
