//! History tables driving move ordering, pruning and eval correction.
//!
//! All tables use the same saturating update,
//! `v += bonus - v * |bonus| / MAX`, which behaves like an exponentially
//! weighted average clamped to `±MAX`: repeated bonuses approach the cap
//! smoothly and a change of sign decays the old signal quickly.
//!
//! Everything is per search thread; there is no cross-thread sharing.

use crate::params::{
    Score, CORRECTION_GRAIN, CORRECTION_MAX, CORRECTION_WEIGHT_SCALE, HISTORY_BONUS_DEPTH_SCALE,
    HISTORY_BONUS_OFFSET, HISTORY_MAX, HISTORY_MAX_BONUS, HISTORY_MAX_PENALTY,
    HISTORY_PENALTY_DEPTH_SCALE, HISTORY_PENALTY_OFFSET, NOISY_HISTORY_SCALE_SHIFT,
};
use crate::position::Position;
use crate::Bitboard;
use tessera_core::{Color, ColoredPiece, Move, Piece, Square};

/// Slots per correction table.
const CORR_SIZE: usize = 16384;

/// Noisy history "captured" axis: six piece kinds plus one slot for
/// non-capture queen promotions.
const NOISY_CAPTURED: usize = 7;

/// The identity of the previous move for continuation history: the piece
/// that moved and the square it landed on.
pub type ContKey = (ColoredPiece, Square);

/// All per-thread history state.
pub struct Histories {
    /// Main quiet history: [from][to][threatened from?][threatened to?].
    quiet: Box<[i16]>,
    /// Noisy history: [from][to][captured piece kind (6 = promotion)].
    noisy: Box<[i16]>,
    /// Continuation history: [prev piece][prev to][piece][to].
    continuation: Box<[i16]>,
    /// Pawn-structure eval correction, indexed by side to move.
    pawn_corr: Box<[i32]>,
    /// Non-pawn eval correction, [stm][piece color][slot].
    non_pawn_corr: Box<[i32]>,
    /// Major-piece eval correction, indexed by side to move.
    major_corr: Box<[i32]>,
}

impl Histories {
    pub fn new() -> Self {
        Histories {
            quiet: vec![0; 64 * 64 * 4].into_boxed_slice(),
            noisy: vec![0; 64 * 64 * NOISY_CAPTURED].into_boxed_slice(),
            continuation: vec![0; 12 * 64 * 12 * 64].into_boxed_slice(),
            pawn_corr: vec![0; 2 * CORR_SIZE].into_boxed_slice(),
            non_pawn_corr: vec![0; 2 * 2 * CORR_SIZE].into_boxed_slice(),
            major_corr: vec![0; 2 * CORR_SIZE].into_boxed_slice(),
        }
    }

    /// Zeroes every table. Called on `ucinewgame`.
    pub fn clear(&mut self) {
        self.quiet.fill(0);
        self.noisy.fill(0);
        self.continuation.fill(0);
        self.pawn_corr.fill(0);
        self.non_pawn_corr.fill(0);
        self.major_corr.fill(0);
    }

    // ------------------------------------------------------------------
    // Quiet history
    // ------------------------------------------------------------------

    #[inline]
    fn quiet_index(threats: Bitboard, mv: Move) -> usize {
        let from = mv.from().index() as usize;
        let to = mv.to().index() as usize;
        let tf = threats.contains(mv.from()) as usize;
        let tt = threats.contains(mv.to()) as usize;
        ((from * 64 + to) * 2 + tf) * 2 + tt
    }

    /// Ordering score of a quiet move under the current threat picture.
    #[inline]
    pub fn quiet_score(&self, threats: Bitboard, mv: Move) -> i32 {
        i32::from(self.quiet[Self::quiet_index(threats, mv)])
    }

    pub fn update_quiet(&mut self, threats: Bitboard, mv: Move, bonus: i32) {
        gravity(&mut self.quiet[Self::quiet_index(threats, mv)], bonus);
    }

    // ------------------------------------------------------------------
    // Noisy history
    // ------------------------------------------------------------------

    #[inline]
    fn noisy_index(mv: Move, captured: Option<Piece>) -> usize {
        let from = mv.from().index() as usize;
        let to = mv.to().index() as usize;
        let cap = captured.map_or(6, |p| p.index());
        (from * 64 + to) * NOISY_CAPTURED + cap
    }

    #[inline]
    pub fn noisy_score(&self, mv: Move, captured: Option<Piece>) -> i32 {
        i32::from(self.noisy[Self::noisy_index(mv, captured)])
    }

    pub fn update_noisy(&mut self, mv: Move, captured: Option<Piece>, bonus: i32) {
        gravity(
            &mut self.noisy[Self::noisy_index(mv, captured)],
            bonus >> NOISY_HISTORY_SCALE_SHIFT,
        );
    }

    // ------------------------------------------------------------------
    // Continuation history
    // ------------------------------------------------------------------

    #[inline]
    fn cont_index(prev: ContKey, piece: ColoredPiece, to: Square) -> usize {
        let (prev_piece, prev_to) = prev;
        ((prev_piece.index() * 64 + prev_to.index() as usize) * 12 + piece.index()) * 64
            + to.index() as usize
    }

    /// Continuation score of playing `piece` to `to` after `prev`.
    #[inline]
    pub fn cont_score(&self, prev: Option<ContKey>, piece: ColoredPiece, to: Square) -> i32 {
        match prev {
            Some(key) => i32::from(self.continuation[Self::cont_index(key, piece, to)]),
            None => 0,
        }
    }

    pub fn update_cont(&mut self, prev: Option<ContKey>, piece: ColoredPiece, to: Square, bonus: i32) {
        if let Some(key) = prev {
            gravity(&mut self.continuation[Self::cont_index(key, piece, to)], bonus);
        }
    }

    // ------------------------------------------------------------------
    // Correction history
    // ------------------------------------------------------------------

    /// Additive correction for the static eval of `pos`, derived from the
    /// pawn, non-pawn and major key components.
    pub fn correction(&self, pos: &Position) -> Score {
        let stm = pos.side_to_move().index();
        let keys = pos.keys();
        let mut total = self.pawn_corr[stm * CORR_SIZE + slot(keys.pawns)];
        for color in Color::ALL {
            let key = keys.non_pawn[color.index()];
            total +=
                self.non_pawn_corr[((stm * 2) + color.index()) * CORR_SIZE + slot(key)];
        }
        total += self.major_corr[stm * CORR_SIZE + slot(keys.majors)];
        total / CORRECTION_GRAIN
    }

    /// Feeds an observed `score - static_eval` residual back into the
    /// correction tables, weighted by depth.
    pub fn update_correction(&mut self, pos: &Position, depth: i32, diff: Score) {
        let stm = pos.side_to_move().index();
        let keys = pos.keys();
        let scaled = diff * CORRECTION_GRAIN;
        let weight = (depth + 1).min(16);

        blend(
            &mut self.pawn_corr[stm * CORR_SIZE + slot(keys.pawns)],
            scaled,
            weight,
        );
        for color in Color::ALL {
            let key = keys.non_pawn[color.index()];
            blend(
                &mut self.non_pawn_corr[((stm * 2) + color.index()) * CORR_SIZE + slot(key)],
                scaled,
                weight,
            );
        }
        blend(
            &mut self.major_corr[stm * CORR_SIZE + slot(keys.majors)],
            scaled,
            weight,
        );
    }
}

impl Default for Histories {
    fn default() -> Self {
        Self::new()
    }
}

/// Depth-scaled bonus for a move that caused a cutoff.
#[inline]
pub fn history_bonus(depth: i32) -> i32 {
    (depth * HISTORY_BONUS_DEPTH_SCALE - HISTORY_BONUS_OFFSET).min(HISTORY_MAX_BONUS)
}

/// Depth-scaled penalty for moves that failed to beat alpha.
#[inline]
pub fn history_penalty(depth: i32) -> i32 {
    (depth * HISTORY_PENALTY_DEPTH_SCALE - HISTORY_PENALTY_OFFSET).min(HISTORY_MAX_PENALTY)
}

/// The saturating EWMA update shared by all history tables.
#[inline]
fn gravity(entry: &mut i16, bonus: i32) {
    let current = i32::from(*entry);
    let updated = current + bonus - current * bonus.abs() / HISTORY_MAX;
    *entry = updated.clamp(-HISTORY_MAX, HISTORY_MAX) as i16;
}

/// Correction-table slot of a key component.
#[inline]
fn slot(key: u64) -> usize {
    (key % CORR_SIZE as u64) as usize
}

/// Weighted blend toward a new observation, clamped to the correction cap.
#[inline]
fn blend(entry: &mut i32, scaled_diff: i32, weight: i32) {
    let updated = (*entry * (CORRECTION_WEIGHT_SCALE - weight) + scaled_diff * weight)
        / CORRECTION_WEIGHT_SCALE;
    *entry = updated.clamp(-CORRECTION_MAX, CORRECTION_MAX);
}

#[cfg(test)]
mod tests {
    use super::*;

    fn quiet_move() -> Move {
        Move::normal(Square::E1, Square::E8)
    }

    #[test]
    fn bonus_saturates_at_cap() {
        let mut h = Histories::new();
        for _ in 0..200 {
            h.update_quiet(Bitboard::EMPTY, quiet_move(), history_bonus(12));
        }
        let score = h.quiet_score(Bitboard::EMPTY, quiet_move());
        assert!(score <= HISTORY_MAX);
        assert!(score > HISTORY_MAX / 2);
    }

    #[test]
    fn penalties_pull_back_down() {
        let mut h = Histories::new();
        h.update_quiet(Bitboard::EMPTY, quiet_move(), history_bonus(8));
        let high = h.quiet_score(Bitboard::EMPTY, quiet_move());
        h.update_quiet(Bitboard::EMPTY, quiet_move(), -history_penalty(8));
        assert!(h.quiet_score(Bitboard::EMPTY, quiet_move()) < high);
    }

    #[test]
    fn threat_axes_are_independent() {
        let mut h = Histories::new();
        let threats = Bitboard::from_square(Square::E1);
        h.update_quiet(threats, quiet_move(), 500);
        assert!(h.quiet_score(threats, quiet_move()) > 0);
        assert_eq!(h.quiet_score(Bitboard::EMPTY, quiet_move()), 0);
    }

    #[test]
    fn noisy_keyed_by_captured_piece() {
        let mut h = Histories::new();
        let mv = Move::normal(Square::E1, Square::E8);
        h.update_noisy(mv, Some(Piece::Queen), 800);
        assert!(h.noisy_score(mv, Some(Piece::Queen)) > 0);
        assert_eq!(h.noisy_score(mv, Some(Piece::Rook)), 0);
        assert_eq!(h.noisy_score(mv, None), 0);
    }

    #[test]
    fn continuation_needs_a_previous_move() {
        let mut h = Histories::new();
        let piece = ColoredPiece::WHITE_PAWN;
        let prev = (ColoredPiece::BLACK_PAWN, Square::E8);
        assert_eq!(h.cont_score(None, piece, Square::E1), 0);
        h.update_cont(Some(prev), piece, Square::E1, 600);
        assert!(h.cont_score(Some(prev), piece, Square::E1) > 0);
        h.update_cont(None, piece, Square::E1, 600);
    }

    #[test]
    fn correction_moves_toward_residual() {
        let mut h = Histories::new();
        let pos = Position::startpos();
        assert_eq!(h.correction(&pos), 0);
        for _ in 0..32 {
            h.update_correction(&pos, 10, 50);
        }
        let corr = h.correction(&pos);
        assert!(corr > 0, "correction {corr} should follow the residual");
        assert!(corr <= 50 * 4);
    }

    #[test]
    fn correction_is_bounded() {
        let mut h = Histories::new();
        let pos = Position::startpos();
        for _ in 0..10_000 {
            h.update_correction(&pos, 16, 10_000);
        }
        assert!(h.correction(&pos) <= 4 * CORRECTION_MAX / CORRECTION_GRAIN);
    }

    #[test]
    fn clear_zeroes_everything() {
        let mut h = Histories::new();
        h.update_quiet(Bitboard::EMPTY, quiet_move(), 900);
        h.update_correction(&Position::startpos(), 8, 80);
        h.clear();
        assert_eq!(h.quiet_score(Bitboard::EMPTY, quiet_move()), 0);
        assert_eq!(h.correction(&Position::startpos()), 0);
    }
}
