//! Fail-soft principal variation search and quiescence search.
//!
//! One recursive function, compile-time parameterised by (root?, pv?) so
//! the non-PV paths carry none of the PV bookkeeping. Cooperative stop:
//! on abort every frame returns immediately and the callers discard the
//! scores.

use super::ThreadData;
use crate::movegen::MoveList;
use crate::movepick::{captured_kind, MovePicker};
use crate::params::*;
use crate::see::see;
use crate::tt::Bound;
use std::sync::OnceLock;
use tessera_core::{ColoredPiece, Move, MoveFlag};

/// Late-move reduction table, indexed by depth and move number.
fn lmr_reduction(depth: i32, moves: usize) -> i32 {
    static TABLE: OnceLock<[[i8; 64]; 64]> = OnceLock::new();
    let table = TABLE.get_or_init(|| {
        let mut t = [[0i8; 64]; 64];
        for (d, row) in t.iter_mut().enumerate().skip(1) {
            for (m, entry) in row.iter_mut().enumerate().skip(1) {
                let r = LMR_BASE + (d as f64).ln() * (m as f64).ln() / LMR_DIVISOR;
                *entry = r as i8;
            }
        }
        t
    });
    i32::from(table[depth.clamp(0, 63) as usize][moves.min(63)])
}

impl ThreadData<'_> {
    /// Entry point for one aspiration probe at the root.
    pub(crate) fn pvs_root(&mut self, depth: i32, alpha: Score, beta: Score) -> Score {
        self.pvs::<true, true>(depth, 0, alpha, beta, false)
    }

    /// Fail-soft negamax with PVS windows.
    #[allow(clippy::too_many_lines)]
    fn pvs<const ROOT: bool, const PV: bool>(
        &mut self,
        mut depth: i32,
        ply: usize,
        mut alpha: Score,
        mut beta: Score,
        cutnode: bool,
    ) -> Score {
        debug_assert!(alpha < beta);
        debug_assert!(!ROOT || ply == 0);

        if depth <= 0 {
            return self.qsearch::<PV>(ply, alpha, beta);
        }

        if PV {
            self.stack[ply].pv.clear();
            self.seldepth = self.seldepth.max(ply + 1);
        }
        if self.should_stop() {
            return 0;
        }
        self.nodes.increment();

        let in_check = self.pos.in_check();

        if !ROOT {
            // Terminal draws; the slight oscillation keeps the engine from
            // treating every drawn line as identically neutral.
            if self.pos.is_fifty_move_draw()
                || self.pos.is_repetition(ply)
                || self.pos.has_insufficient_material()
            {
                return self.draw_score();
            }

            // An upcoming repetition means this node can force at least a
            // draw, which may already be enough for a cutoff.
            if self.pos.halfmove_clock() >= 3 && alpha < self.draw_score() {
                let draw = self.draw_score();
                if self.pos.has_cycle(ply) {
                    alpha = alpha.max(draw);
                    if alpha >= beta {
                        return alpha;
                    }
                }
            }

            if ply >= MAX_PLY {
                return if in_check { 0 } else { self.static_eval() };
            }

            // Mate-distance pruning.
            alpha = alpha.max(-SCORE_MATE + ply as Score);
            beta = beta.min(SCORE_MATE - ply as Score - 1);
            if alpha >= beta {
                return alpha;
            }
        }

        let excluded = self.stack[ply].excluded;

        // Transposition table probe. Singular verification searches skip it:
        // the stored entry is the one being verified.
        let mut tt_move = Move::NULL;
        let mut tt_hit = None;
        if excluded.is_null() {
            if let Some(entry) = self.tt.probe(self.pos.key(), ply) {
                tt_move = entry.mv;
                if !PV
                    && entry.depth >= depth
                    && self.pos.halfmove_clock() < 90
                    && match entry.bound {
                        Bound::Exact => true,
                        Bound::Lower => entry.score >= beta,
                        Bound::Upper => entry.score <= alpha,
                        Bound::None => false,
                    }
                {
                    return entry.score;
                }
                tt_hit = Some(entry);
            }
        }
        let tt_pv = PV || tt_hit.is_some_and(|e| e.was_pv);

        // Static evaluation, cached in the stack frame. In check there is
        // no meaningful eval and all eval-based pruning is off.
        let static_ev = if in_check {
            SCORE_NONE
        } else {
            match tt_hit {
                Some(e) if e.eval != SCORE_NONE => e.eval,
                _ => self.static_eval(),
            }
        };
        self.stack[ply].eval = static_ev;

        let improving = !in_check
            && ply >= 2
            && self.stack[ply - 2].eval != SCORE_NONE
            && static_ev > self.stack[ply - 2].eval;

        // Internal iterative reductions: a PV or expected-cut node without
        // a TT move is not worth searching at full depth yet.
        if (PV || cutnode) && depth >= MIN_IIR_DEPTH && tt_move.is_null() && excluded.is_null() {
            depth -= 1;
        }

        // Whole-node pruning, all gated on quiet circumstances.
        if !PV && !in_check && excluded.is_null() && !is_mate_score(beta) {
            // Reverse futility: so far above beta that a real search is
            // unlikely to come back down.
            if depth <= MAX_RFP_DEPTH
                && static_ev != SCORE_NONE
                && static_ev - RFP_MARGIN * (depth - i32::from(improving)) >= beta
            {
                return static_ev;
            }

            // Null move: hand over the move and search reduced. Requires
            // non-pawn material as a zugzwang guard.
            if depth >= MIN_NMP_DEPTH
                && static_ev >= beta
                && ply >= self.nmp_min_ply
                && self.stack[ply.saturating_sub(1)].cont_key.is_some()
                && self.pos.has_non_pawn_material(self.pos.side_to_move())
            {
                let reduction = NMP_BASE_REDUCTION
                    + depth / NMP_DEPTH_DENOM
                    + ((static_ev - beta) / NMP_EVAL_SCALE).min(MAX_NMP_EVAL_REDUCTION);
                let reduced = (depth - reduction).max(0);

                self.stack[ply].cont_key = None;
                self.pos.make_null(&mut self.nnue);
                let score =
                    -self.pvs::<false, false>(reduced, ply + 1, -beta, -beta + 1, !cutnode);
                self.pos.unmake_null(&mut self.nnue);
                if self.aborted {
                    return 0;
                }

                if score >= beta && !is_mate_score(score) {
                    if depth < MIN_NMP_VERIF_DEPTH || self.nmp_min_ply > 0 {
                        return score;
                    }
                    // Verification: at high depth re-search without null
                    // moves before trusting the cutoff.
                    self.nmp_min_ply = ply + (3 * reduced / 4).max(1) as usize;
                    let verified =
                        self.pvs::<false, false>(reduced, ply, beta - 1, beta, false);
                    self.nmp_min_ply = 0;
                    if self.aborted {
                        return 0;
                    }
                    if verified >= beta {
                        return score;
                    }
                }
            }

            // ProbCut: a capture that clears beta by a margin in a shallow
            // verification is almost certainly a cutoff at full depth.
            let probcut_beta = beta + PROBCUT_MARGIN;
            if depth >= MIN_PROBCUT_DEPTH
                && static_ev != SCORE_NONE
                && !tt_hit.is_some_and(|e| e.depth >= depth - 3 && e.score < probcut_beta)
            {
                let mut picker =
                    MovePicker::new_probcut(&self.pos, tt_move, probcut_beta - static_ev);
                while let Some(mv) = picker.next(&self.pos, self.histories, None, None) {
                    if !self.pos.is_legal(mv) {
                        continue;
                    }
                    let cont = continuation_identity(&self.pos, mv);
                    self.stack[ply].cont_key = Some(cont);
                    self.pos.make(mv, &mut self.nnue);
                    self.tt.prefetch(self.pos.key());

                    let mut score =
                        -self.qsearch::<false>(ply + 1, -probcut_beta, -probcut_beta + 1);
                    if score >= probcut_beta {
                        score = -self.pvs::<false, false>(
                            depth - PROBCUT_REDUCTION,
                            ply + 1,
                            -probcut_beta,
                            -probcut_beta + 1,
                            !cutnode,
                        );
                    }
                    self.pos.unmake(mv, &mut self.nnue);
                    if self.aborted {
                        return 0;
                    }
                    if score >= probcut_beta {
                        self.tt.put(
                            self.pos.key(),
                            score,
                            static_ev,
                            mv,
                            depth - 3,
                            ply,
                            Bound::Lower,
                            tt_pv,
                        );
                        return score;
                    }
                }
            }
        }

        let prev1 = self.cont_key_back(ply, 1);
        let prev2 = self.cont_key_back(ply, 2);
        let killer = self.stack[ply].killer;

        let mut picker = MovePicker::new(&self.pos, tt_move, killer);
        let tt_move = picker.tt_move();

        let mut best_score = -SCORE_INF;
        let mut best_move = Move::NULL;
        let mut legal = 0usize;
        let mut quiets_tried = MoveList::new();
        let mut noisies_tried = MoveList::new();

        while let Some(mv) = picker.next(&self.pos, self.histories, prev1, prev2) {
            if mv == excluded {
                continue;
            }
            if ROOT && !self.root_moves[self.pv_idx..].iter().any(|rm| rm.mv == mv) {
                continue;
            }
            if !self.pos.is_legal(mv) {
                continue;
            }
            legal += 1;

            let captured = captured_kind(&self.pos, mv);
            let quiet = captured.is_none() && mv.flag() != MoveFlag::PromoteQueen;
            let hist_score = if quiet {
                self.histories.quiet_score(self.pos.threats(), mv)
                    + self
                        .histories
                        .cont_score(prev1, self.pos.piece_at(mv.from()), mv.to())
            } else {
                self.histories.noisy_score(mv, captured)
            };

            // Shallow pruning of late or hopeless moves. Never prunes when
            // a mate score is on the table.
            if !ROOT && !in_check && best_score > -SCORE_MATE_IN_MAX {
                if quiet {
                    let lmp_limit =
                        LMP_MIN_MOVES_BASE + depth * depth / (2 - i32::from(improving));
                    if legal as i32 > lmp_limit {
                        picker.skip_quiets();
                        continue;
                    }
                    if depth <= MAX_FP_DEPTH
                        && static_ev != SCORE_NONE
                        && static_ev + FP_MARGIN + FP_SCALE * depth + hist_score / FP_HISTORY_SCALE
                            < alpha
                    {
                        picker.skip_quiets();
                        continue;
                    }
                    if depth <= MAX_HISTORY_PRUNING_DEPTH
                        && hist_score < HISTORY_PRUNING_MARGIN * depth
                    {
                        continue;
                    }
                    if depth <= MAX_SEE_PRUNING_DEPTH
                        && !see(&self.pos, mv, QUIET_SEE_THRESHOLD * depth)
                    {
                        continue;
                    }
                } else if depth <= MAX_SEE_PRUNING_DEPTH
                    && !see(&self.pos, mv, NOISY_SEE_THRESHOLD * depth * depth)
                {
                    continue;
                }
            }

            // Singular extension: is the TT move the only move that holds
            // its score? A failed exclusion search says yes.
            let mut extension = 0;
            if !ROOT
                && excluded.is_null()
                && mv == tt_move
                && depth >= MIN_SINGULAR_DEPTH
                && ply < 2 * self.root_depth as usize
            {
                if let Some(entry) = tt_hit {
                    if entry.depth >= depth - SINGULAR_DEPTH_MARGIN
                        && entry.bound != Bound::Upper
                        && !is_mate_score(entry.score)
                    {
                        let s_beta = entry.score - SINGULAR_BETA_SCALE * depth;
                        let s_depth = (depth - 1) / 2;

                        self.stack[ply].excluded = mv;
                        let s_score =
                            self.pvs::<false, false>(s_depth, ply, s_beta - 1, s_beta, cutnode);
                        self.stack[ply].excluded = Move::NULL;
                        if self.aborted {
                            return 0;
                        }

                        if s_score < s_beta {
                            let wide = s_score < s_beta - SINGULAR_DOUBLE_MARGIN;
                            if wide && self.stack[ply].double_exts < DOUBLE_EXTENSION_LIMIT {
                                extension = 2;
                            } else {
                                extension = 1;
                            }
                        } else if s_beta >= beta {
                            // Multi-cut: two moves beat beta at reduced
                            // depth; trust the cutoff.
                            return s_beta;
                        }
                    }
                }
            }

            let cont = continuation_identity(&self.pos, mv);
            self.stack[ply].cont_key = Some(cont);
            self.stack[ply + 1].double_exts =
                self.stack[ply].double_exts + u8::from(extension == 2);

            let nodes_before = self.nodes.local();
            self.pos.make(mv, &mut self.nnue);
            self.tt.prefetch(self.pos.key());

            // Giving check extends by one.
            if self.pos.in_check() {
                extension = extension.max(1);
            }
            let new_depth = depth - 1 + extension;

            let mut score;
            if legal == 1 {
                score = -self.pvs::<false, PV>(new_depth, ply + 1, -beta, -alpha, false);
            } else {
                // Late move reductions for the zero-window probe.
                let min_moves = if PV { MIN_LMR_MOVES_PV } else { MIN_LMR_MOVES };
                let mut reduction = 0;
                if depth >= 3 && legal >= min_moves && mv != killer {
                    reduction = lmr_reduction(depth, legal);
                    reduction -= i32::from(tt_pv);
                    reduction += i32::from(cutnode);
                    reduction += i32::from(!improving);
                    reduction -= i32::from(self.pos.in_check());
                    if quiet {
                        reduction -= hist_score / LMR_HISTORY_DIVISOR;
                    } else {
                        reduction -= 1;
                    }
                }
                let reduced = (new_depth - reduction).clamp(1, new_depth.max(1));

                score =
                    -self.pvs::<false, false>(reduced, ply + 1, -alpha - 1, -alpha, true);

                if score > alpha && reduced < new_depth {
                    // "Deeper or shallower": a reduced probe that smashed
                    // expectations earns an extra ply on the re-search.
                    let deeper = score > best_score + 40 + 2 * new_depth;
                    let re_depth = new_depth + i32::from(deeper);
                    score = -self.pvs::<false, false>(
                        re_depth,
                        ply + 1,
                        -alpha - 1,
                        -alpha,
                        !cutnode,
                    );
                }
                if PV && score > alpha {
                    score = -self.pvs::<false, PV>(new_depth, ply + 1, -beta, -alpha, false);
                }
            }

            self.pos.unmake(mv, &mut self.nnue);
            if self.aborted {
                return 0;
            }

            if ROOT {
                let spent = self.nodes.local() - nodes_before;
                if self.is_main() {
                    self.limiter.update_move_nodes(mv, spent);
                }
                let rm = self
                    .root_moves
                    .iter_mut()
                    .find(|rm| rm.mv == mv)
                    .expect("searched root move is registered");
                rm.nodes += spent;
                if legal == 1 || score > alpha {
                    rm.score = score;
                } else {
                    rm.score = -SCORE_INF;
                }
            }

            if score > best_score {
                best_score = score;
                if score > alpha {
                    best_move = mv;
                    alpha = score;
                    if PV {
                        let child_pv = self.stack[ply + 1].pv;
                        self.stack[ply].pv.load(mv, &child_pv);
                    }
                    if ROOT {
                        let pv = self.stack[0].pv;
                        let rm = self
                            .root_moves
                            .iter_mut()
                            .find(|rm| rm.mv == mv)
                            .expect("searched root move is registered");
                        rm.pv = pv;
                    }
                    if score >= beta {
                        self.update_histories(
                            depth,
                            mv,
                            quiet,
                            captured,
                            ply,
                            &quiets_tried,
                            &noisies_tried,
                        );
                        break;
                    }
                }
            }

            if quiet {
                quiets_tried.push(mv);
            } else {
                noisies_tried.push(mv);
            }
        }

        if legal == 0 {
            // With a move excluded this is a singular search that found no
            // alternative: report a fail-low, not a mate.
            if !excluded.is_null() {
                return alpha;
            }
            return if in_check {
                -SCORE_MATE + ply as Score
            } else {
                0
            };
        }

        // Every legal move was pruned away without a search: fail low
        // without polluting the table.
        if best_score == -SCORE_INF {
            return alpha;
        }

        let bound = if best_score >= beta {
            Bound::Lower
        } else if PV && !best_move.is_null() {
            Bound::Exact
        } else {
            Bound::Upper
        };

        if excluded.is_null() {
            self.tt.put(
                self.pos.key(),
                best_score,
                static_ev,
                best_move,
                depth,
                ply,
                bound,
                tt_pv,
            );

            // Correction history learns from quiet nodes whose search
            // outcome contradicts the static eval.
            let best_quiet = best_move.is_null()
                || (captured_kind(&self.pos, best_move).is_none()
                    && !best_move.flag().is_promotion());
            if !in_check
                && static_ev != SCORE_NONE
                && best_quiet
                && !is_mate_score(best_score)
                && !(bound == Bound::Lower && best_score <= static_ev)
                && !(bound == Bound::Upper && best_score >= static_ev)
            {
                self.histories
                    .update_correction(&self.pos, depth, best_score - static_ev);
            }
        }

        best_score
    }

    /// Rewards the cutoff move and punishes everything tried before it.
    #[allow(clippy::too_many_arguments)]
    fn update_histories(
        &mut self,
        depth: i32,
        mv: Move,
        quiet: bool,
        captured: Option<tessera_core::Piece>,
        ply: usize,
        quiets_tried: &MoveList,
        noisies_tried: &MoveList,
    ) {
        let bonus = crate::history::history_bonus(depth);
        let penalty = crate::history::history_penalty(depth);
        let threats = self.pos.threats();
        let prev1 = self.cont_key_back(ply, 1);
        let prev2 = self.cont_key_back(ply, 2);

        if quiet {
            self.stack[ply].killer = mv;

            let piece = self.pos.piece_at(mv.from());
            self.histories.update_quiet(threats, mv, bonus);
            self.histories.update_cont(prev1, piece, mv.to(), bonus);
            self.histories.update_cont(prev2, piece, mv.to(), bonus);

            for &failed in quiets_tried.as_slice() {
                let piece = self.pos.piece_at(failed.from());
                self.histories.update_quiet(threats, failed, -penalty);
                self.histories.update_cont(prev1, piece, failed.to(), -penalty);
                self.histories.update_cont(prev2, piece, failed.to(), -penalty);
            }
        } else {
            self.histories.update_noisy(mv, captured, bonus);
        }

        for &failed in noisies_tried.as_slice() {
            let failed_cap = captured_kind(&self.pos, failed);
            self.histories.update_noisy(failed, failed_cap, -penalty);
        }
    }

    /// Quiescence search: stand pat, then captures (or evasions in check)
    /// until the position is quiet.
    fn qsearch<const PV: bool>(&mut self, ply: usize, mut alpha: Score, beta: Score) -> Score {
        if self.should_stop() {
            return 0;
        }
        self.nodes.increment();
        self.seldepth = self.seldepth.max(ply + 1);

        if self.pos.is_fifty_move_draw()
            || self.pos.is_repetition(ply)
            || self.pos.has_insufficient_material()
        {
            return self.draw_score();
        }

        let in_check = self.pos.in_check();
        if ply >= MAX_PLY {
            return if in_check { 0 } else { self.static_eval() };
        }

        let mut tt_move = Move::NULL;
        if let Some(entry) = self.tt.probe(self.pos.key(), ply) {
            tt_move = entry.mv;
            if !PV
                && match entry.bound {
                    Bound::Exact => true,
                    Bound::Lower => entry.score >= beta,
                    Bound::Upper => entry.score <= alpha,
                    Bound::None => false,
                }
            {
                return entry.score;
            }
        }

        let static_ev = if in_check { SCORE_NONE } else { self.static_eval() };

        let mut best_score = if in_check {
            // No standing pat while in check: evasions must be searched.
            -SCORE_INF
        } else {
            if static_ev >= beta {
                self.tt.put(
                    self.pos.key(),
                    static_ev,
                    static_ev,
                    Move::NULL,
                    0,
                    ply,
                    Bound::Lower,
                    PV,
                );
                return static_ev;
            }
            alpha = alpha.max(static_ev);
            static_ev
        };

        let mut best_move = Move::NULL;
        let mut legal = 0usize;
        let mut picker = MovePicker::new_qsearch(&self.pos, tt_move);
        let prev1 = self.cont_key_back(ply, 1);
        let prev2 = self.cont_key_back(ply, 2);

        while let Some(mv) = picker.next(&self.pos, self.histories, prev1, prev2) {
            if !self.pos.is_legal(mv) {
                continue;
            }
            legal += 1;

            let cont = continuation_identity(&self.pos, mv);
            self.stack[ply].cont_key = Some(cont);
            self.pos.make(mv, &mut self.nnue);
            self.tt.prefetch(self.pos.key());
            let score = -self.qsearch::<PV>(ply + 1, -beta, -alpha);
            self.pos.unmake(mv, &mut self.nnue);
            if self.aborted {
                return 0;
            }

            if score > best_score {
                best_score = score;
                if score > alpha {
                    best_move = mv;
                    alpha = score;
                    if score >= beta {
                        break;
                    }
                }
            }
        }

        if in_check && legal == 0 {
            return -SCORE_MATE + ply as Score;
        }

        let bound = if best_score >= beta {
            Bound::Lower
        } else {
            Bound::Upper
        };
        self.tt.put(
            self.pos.key(),
            best_score,
            static_ev,
            best_move,
            0,
            ply,
            bound,
            PV,
        );

        best_score
    }
}

/// The (piece, destination) pair a move writes into the continuation
/// history: the arriving piece, promotions included.
fn continuation_identity(pos: &crate::position::Position, mv: Move) -> (ColoredPiece, tessera_core::Square) {
    let piece = match mv.flag().promotion_piece() {
        Some(promo) => ColoredPiece::new(promo, pos.side_to_move()),
        None => pos.piece_at(mv.from()),
    };
    let to = if mv.is_castle() {
        mv.king_castle_target()
    } else {
        mv.to()
    };
    (piece, to)
}
