//! The search: iterative deepening, aspiration windows and per-thread state.
//!
//! Each worker owns everything it mutates - position clone, NNUE
//! accumulators, history tables, search stack - and shares only the
//! transposition table, the limiter and the stop flag. The recursive
//! principal-variation search lives in [`pvs`]; worker lifecycle in
//! [`threads`].

mod pvs;
pub mod threads;

use crate::history::{ContKey, Histories};
use crate::limits::Limiter;
use crate::movegen::{self, MoveList};
use crate::nnue::Evaluator;
use crate::params::{
    is_mate_score, mate_in_moves, Score, ASP_WIDENING_FACTOR, EVAL_HALFMOVE_SCALE,
    INITIAL_ASP_WINDOW, MAX_ASP_REDUCTION, MAX_ASP_WINDOW, MAX_PLY, MIN_ASP_DEPTH, SCORE_INF,
    SCORE_NONE, SCORE_WIN,
};
use crate::position::Position;
use crate::tt::TranspositionTable;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;
use tessera_core::{Color, Move};

/// Deepest nominal search depth.
pub const MAX_DEPTH: i32 = MAX_PLY as i32 - 4;

/// A principal variation: a fixed array of moves and a length.
#[derive(Clone, Copy)]
pub struct PvLine {
    moves: [Move; MAX_PLY],
    len: usize,
}

impl PvLine {
    pub const fn new() -> Self {
        PvLine {
            moves: [Move::NULL; MAX_PLY],
            len: 0,
        }
    }

    #[inline]
    pub fn clear(&mut self) {
        self.len = 0;
    }

    /// Prepends `mv` to a child line.
    pub fn load(&mut self, mv: Move, child: &PvLine) {
        self.moves[0] = mv;
        let take = child.len.min(MAX_PLY - 1);
        self.moves[1..=take].copy_from_slice(&child.moves[..take]);
        self.len = take + 1;
    }

    #[inline]
    pub fn moves(&self) -> &[Move] {
        &self.moves[..self.len]
    }

    #[inline]
    pub fn first(&self) -> Option<Move> {
        self.moves().first().copied()
    }
}

impl Default for PvLine {
    fn default() -> Self {
        Self::new()
    }
}

/// Per-ply search stack frame.
#[derive(Clone)]
pub(crate) struct Frame {
    /// PV collected below this node.
    pub pv: PvLine,
    /// Static eval at this ply (`SCORE_NONE` when in check).
    pub eval: Score,
    /// Move excluded by a singular verification search.
    pub excluded: Move,
    /// Quiet move that caused a cutoff at this ply before.
    pub killer: Move,
    /// (piece, destination) of the move played at this ply, for the
    /// continuation history of deeper plies.
    pub cont_key: Option<ContKey>,
    /// Double extensions spent on the path to this node.
    pub double_exts: u8,
}

impl Frame {
    fn empty() -> Self {
        Frame {
            pv: PvLine::new(),
            eval: SCORE_NONE,
            excluded: Move::NULL,
            killer: Move::NULL,
            cont_key: None,
            double_exts: 0,
        }
    }
}

/// One root move with its standing in the current iteration.
#[derive(Clone)]
pub struct RootMove {
    pub mv: Move,
    pub score: Score,
    pub prev_score: Score,
    pub pv: PvLine,
    pub nodes: u64,
}

/// A buffered node counter: workers count locally and flush to the shared
/// total in batches, so the aggregate is cheap to read and close enough
/// for reporting.
pub struct NodeCounter {
    local: u64,
    buffer: u64,
    global: Arc<AtomicU64>,
}

impl NodeCounter {
    const FLUSH_INTERVAL: u64 = 2048;

    pub fn new(global: Arc<AtomicU64>) -> Self {
        NodeCounter {
            local: 0,
            buffer: 0,
            global,
        }
    }

    #[inline]
    pub fn increment(&mut self) {
        self.local += 1;
        self.buffer += 1;
        if self.buffer >= Self::FLUSH_INTERVAL {
            self.global.fetch_add(self.buffer, Ordering::Relaxed);
            self.buffer = 0;
        }
    }

    /// Flushes the remainder so the global count is exact.
    pub fn flush(&mut self) {
        self.global.fetch_add(self.buffer, Ordering::Relaxed);
        self.buffer = 0;
    }

    #[inline]
    pub fn local(&self) -> u64 {
        self.local
    }

    #[inline]
    pub fn global(&self) -> u64 {
        self.global.load(Ordering::Relaxed) + self.buffer
    }
}

/// Everything the controller fixes for one `go`.
pub struct SearchJob {
    pub position: Position,
    pub max_depth: i32,
    pub limiter: Arc<dyn Limiter>,
    pub search_moves: Option<Vec<Move>>,
    pub multipv: usize,
    pub contempt: Score,
    pub show_wdl: bool,
}

/// One `info` record per completed iteration and PV slot.
pub struct SearchReport {
    pub depth: i32,
    pub seldepth: usize,
    pub multipv: usize,
    pub score: Score,
    /// Mate distance in moves when the score is a mate score.
    pub mate: Option<i32>,
    /// Set when the score fell outside the aspiration window.
    pub lowerbound: bool,
    pub upperbound: bool,
    pub nodes: u64,
    pub nps: u64,
    pub time_ms: u64,
    pub hashfull: usize,
    pub wdl: Option<(u32, u32, u32)>,
    pub pv: Vec<Move>,
    pub chess960: bool,
}

/// Where the search sends its output. The UCI front-end implements this.
pub trait InfoSink: Send + Sync {
    fn info(&self, report: &SearchReport);
    fn bestmove(&self, mv: Move, ponder: Option<Move>, chess960: bool);
}

/// Per-worker search state. The lifetime ties the worker to the shared
/// pieces (TT, limiter, stop flag, histories) owned by the pool.
pub struct ThreadData<'a> {
    pub id: usize,
    pub pos: Position,
    pub nnue: Evaluator,
    pub histories: &'a mut Histories,
    pub tt: &'a TranspositionTable,
    pub limiter: &'a dyn Limiter,
    pub stop: &'a AtomicBool,
    pub nodes: NodeCounter,
    pub seldepth: usize,
    pub root_moves: Vec<RootMove>,
    pub multipv: usize,
    pub contempt: Score,
    pub root_stm: Color,
    pub root_depth: i32,
    max_depth: i32,
    show_wdl: bool,
    pub(crate) stack: Box<[Frame]>,
    pub(crate) pv_idx: usize,
    pub(crate) aborted: bool,
    pub(crate) nmp_min_ply: usize,
    pub(crate) check_counter: u32,
}

impl<'a> ThreadData<'a> {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        id: usize,
        job: &'a SearchJob,
        network: Arc<crate::nnue::network::Network>,
        histories: &'a mut Histories,
        tt: &'a TranspositionTable,
        stop: &'a AtomicBool,
        nodes: Arc<AtomicU64>,
    ) -> Self {
        let mut pos = job.position.clone();
        pos.reserve_plies(MAX_PLY + 8);
        let mut nnue = Evaluator::new(network);
        nnue.reset(&pos);
        let root_stm = pos.side_to_move();

        let mut td = ThreadData {
            id,
            pos,
            nnue,
            histories,
            tt,
            limiter: &*job.limiter,
            stop,
            nodes: NodeCounter::new(nodes),
            seldepth: 0,
            root_moves: Vec::new(),
            multipv: job.multipv.max(1),
            contempt: job.contempt,
            root_stm,
            root_depth: 0,
            max_depth: job.max_depth.clamp(1, MAX_DEPTH),
            show_wdl: job.show_wdl,
            stack: vec![Frame::empty(); MAX_PLY + 4].into_boxed_slice(),
            pv_idx: 0,
            aborted: false,
            nmp_min_ply: 0,
            check_counter: 0,
        };
        td.init_root_moves(job.search_moves.as_deref());
        td
    }

    /// The legal moves the root is allowed to search: all of them, or the
    /// `searchmoves` subset.
    fn init_root_moves(&mut self, filter: Option<&[Move]>) {
        let mut moves = MoveList::new();
        movegen::generate_all(&self.pos, &mut moves);
        for &mv in moves.as_slice() {
            if !self.pos.is_legal(mv) {
                continue;
            }
            if let Some(allowed) = filter {
                if !allowed.contains(&mv) {
                    continue;
                }
            }
            self.root_moves.push(RootMove {
                mv,
                score: -SCORE_INF,
                prev_score: -SCORE_INF,
                pv: PvLine::new(),
                nodes: 0,
            });
        }
        self.multipv = self.multipv.min(self.root_moves.len().max(1));
    }

    #[inline]
    pub fn is_main(&self) -> bool {
        self.id == 0
    }

    /// Relaxed poll of the shared stop flag plus, on the main worker, the
    /// hard limiter. Called from every node; the limiter is consulted in
    /// batches.
    #[inline]
    pub(crate) fn should_stop(&mut self) -> bool {
        if self.aborted {
            return true;
        }
        self.check_counter += 1;
        if self.check_counter >= 1024 {
            self.check_counter = 0;
            self.nodes.flush();
            if self.stop.load(Ordering::Relaxed) {
                self.aborted = true;
            } else if self.is_main() && self.limiter.stop(self.nodes.global(), false) {
                self.stop.store(true, Ordering::Release);
                self.aborted = true;
            }
        }
        self.aborted
    }

    /// Static evaluation: NNUE, 50-move damping, correction history and
    /// contempt, clamped below the mate range.
    pub(crate) fn static_eval(&mut self) -> Score {
        let raw = self.nnue.evaluate(&self.pos);
        let damped = raw * (EVAL_HALFMOVE_SCALE - self.pos.halfmove_clock() as Score)
            / EVAL_HALFMOVE_SCALE;
        let corrected = damped + self.histories.correction(&self.pos);
        let contempt = if self.pos.side_to_move() == self.root_stm {
            self.contempt
        } else {
            -self.contempt
        };
        (corrected + contempt).clamp(-SCORE_WIN + 1, SCORE_WIN - 1)
    }

    /// Slightly off-zero draw score, oscillating with the node count so the
    /// search does not steer into (or away from) every draw line equally.
    #[inline]
    pub(crate) fn draw_score(&self) -> Score {
        2 - (self.nodes.local() & 3) as Score
    }

    /// Continuation-history key `plies_back` plies above `ply`.
    #[inline]
    pub(crate) fn cont_key_back(&self, ply: usize, plies_back: usize) -> Option<ContKey> {
        if ply >= plies_back {
            self.stack[ply - plies_back].cont_key
        } else {
            None
        }
    }

    /// Runs the iterative-deepening loop. The main worker reports through
    /// `sink` and updates the limiter; helpers run silently.
    pub fn iterative_deepening(&mut self, sink: Option<&dyn InfoSink>, start: Instant) {
        let mut last_score = 0;

        'deepening: for depth in 1..=self.max_depth {
            self.root_depth = depth;

            for pv_idx in 0..self.multipv {
                self.pv_idx = pv_idx;
                self.seldepth = 0;

                let prev = if self.root_moves[pv_idx].prev_score != -SCORE_INF {
                    self.root_moves[pv_idx].prev_score
                } else {
                    last_score
                };
                let score = self.aspiration(depth, prev);
                if self.aborted {
                    break 'deepening;
                }
                last_score = score;

                // Stable order for MultiPV reporting: best first among the
                // slots searched so far.
                self.root_moves[pv_idx..].sort_by_key(|rm| -rm.score);
                for rm in &mut self.root_moves[pv_idx..] {
                    rm.prev_score = rm.score;
                }

                if let Some(sink) = sink {
                    self.report(sink, depth, pv_idx, start, false, false);
                }
            }

            if self.is_main() {
                let best = &self.root_moves[0];
                self.limiter
                    .update(depth, best.score, best.mv, self.nodes.global());
                if self.limiter.stop(self.nodes.global(), true) {
                    self.stop.store(true, Ordering::Release);
                    break;
                }
            }
            if self.stop.load(Ordering::Relaxed) {
                break;
            }
        }

        self.nodes.flush();
    }

    /// Aspiration windows around the previous score, widened geometrically
    /// on failure.
    fn aspiration(&mut self, depth: i32, prev: Score) -> Score {
        if depth < MIN_ASP_DEPTH {
            return self.pvs_root(depth, -SCORE_INF, SCORE_INF);
        }

        let mut delta = INITIAL_ASP_WINDOW;
        let mut alpha = (prev - delta).max(-SCORE_INF);
        let mut beta = (prev + delta).min(SCORE_INF);
        let mut search_depth = depth;

        loop {
            let score = self.pvs_root(search_depth, alpha, beta);
            if self.aborted {
                return score;
            }

            if score <= alpha {
                // Fail low: pull beta toward the midpoint, retry at full
                // depth with a wider bottom.
                beta = (alpha + beta) / 2;
                alpha = (score - delta).max(-SCORE_INF);
                search_depth = depth;
            } else if score >= beta {
                beta = (score + delta).min(SCORE_INF);
                search_depth = (search_depth - 1).max(depth - MAX_ASP_REDUCTION).max(1);
            } else {
                return score;
            }

            delta = delta * ASP_WIDENING_FACTOR / 4;
            if delta > MAX_ASP_WINDOW {
                delta = SCORE_INF;
            }
        }
    }

    /// Emits one `info` record for a PV slot.
    #[allow(clippy::too_many_arguments)]
    fn report(
        &self,
        sink: &dyn InfoSink,
        depth: i32,
        pv_idx: usize,
        start: Instant,
        lowerbound: bool,
        upperbound: bool,
    ) {
        let rm = &self.root_moves[pv_idx];
        let nodes = self.nodes.global();
        let elapsed = start.elapsed();
        let time_ms = elapsed.as_millis() as u64;
        let nps = (nodes as u128 * 1_000_000 / elapsed.as_micros().max(1)) as u64;

        let score = rm.score;
        let mate = is_mate_score(score).then(|| mate_in_moves(score));
        let wdl = self.wdl(score);

        let mut pv: Vec<Move> = rm.pv.moves().to_vec();
        if pv.is_empty() && !rm.mv.is_null() {
            pv.push(rm.mv);
        }

        sink.info(&SearchReport {
            depth,
            seldepth: self.seldepth,
            multipv: pv_idx + 1,
            score,
            mate,
            lowerbound,
            upperbound,
            nodes,
            nps,
            time_ms,
            hashfull: self.tt.hashfull(),
            wdl,
            pv,
            chess960: self.pos.is_chess960(),
        })
    }

    /// Material-scaled win/draw/loss estimate in permille, if enabled.
    fn wdl(&self, score: Score) -> Option<(u32, u32, u32)> {
        self.show_wdl
            .then(|| wdl_model(score, self.pos.occupied().count()))
    }
}

/// A logistic win/draw/loss model whose midpoint and spread scale with the
/// amount of material left (normalised around 58 points of material: the
/// full starting armies).
pub fn wdl_model(score: Score, men: u32) -> (u32, u32, u32) {
    let m = f64::from(men.clamp(4, 32)) / 32.0;
    let a = 80.0 + 120.0 * m;
    let b = 55.0 + 45.0 * m;
    let s = f64::from(score.clamp(-4000, 4000));

    let win = 1000.0 / (1.0 + ((a - s) / b).exp());
    let loss = 1000.0 / (1.0 + ((a + s) / b).exp());
    let w = win.round().clamp(0.0, 1000.0) as u32;
    let l = loss.round().clamp(0.0, 1000.0) as u32;
    let d = 1000u32.saturating_sub(w).saturating_sub(l);
    (w, d, l)
}
