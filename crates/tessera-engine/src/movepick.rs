//! Staged move picking.
//!
//! The picker hands the search one move at a time, generating and scoring
//! each class of move only when the previous class has run dry: TT move,
//! winning captures, killer, quiets by history, then the losing captures
//! that were set aside. A node that fails high on the TT move never pays
//! for move generation at all.

use crate::history::{ContKey, Histories};
use crate::movegen::{generate_noisy, generate_quiet, MoveList, ScoredMove, ScoredMoveList};
use crate::params::{piece_value, Score};
use crate::position::Position;
use crate::see::see;
use tessera_core::{Move, MoveFlag, Piece};

/// Which pipeline the picker runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PickerMode {
    /// Full pipeline for the main search.
    Main,
    /// Captures only - plus every move when in check (evasions).
    Qsearch,
    /// TT move and captures clearing a caller-supplied SEE threshold.
    Probcut,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Stage {
    TtMove,
    GenNoisy,
    GoodNoisy,
    Killer,
    GenQuiet,
    Quiet,
    BadNoisy,
    Done,
}

/// Bonus pushing queen promotions to the front of the noisy list.
const PROMO_BONUS: Score = 2000;

pub struct MovePicker {
    mode: PickerMode,
    stage: Stage,
    tt_move: Move,
    killer: Move,
    see_threshold: Score,
    skip_quiets: bool,
    noisy: ScoredMoveList,
    noisy_idx: usize,
    bad_noisy: MoveList,
    bad_noisy_idx: usize,
    quiet: ScoredMoveList,
    quiet_idx: usize,
}

impl MovePicker {
    /// Creates a picker for the main search.
    pub fn new(pos: &Position, tt_move: Move, killer: Move) -> Self {
        let tt_move = validated(pos, tt_move);
        MovePicker {
            mode: PickerMode::Main,
            stage: if tt_move.is_null() {
                Stage::GenNoisy
            } else {
                Stage::TtMove
            },
            tt_move,
            killer,
            see_threshold: 0,
            skip_quiets: false,
            noisy: ScoredMoveList::new(),
            noisy_idx: 0,
            bad_noisy: MoveList::new(),
            bad_noisy_idx: 0,
            quiet: ScoredMoveList::new(),
            quiet_idx: 0,
        }
    }

    /// Creates a qsearch picker: noisy moves, or all moves when in check.
    pub fn new_qsearch(pos: &Position, tt_move: Move) -> Self {
        let mut picker = Self::new(pos, tt_move, Move::NULL);
        picker.mode = PickerMode::Qsearch;
        if !pos.in_check() {
            picker.skip_quiets = true;
            // Only a noisy TT move is worth trying before the captures.
            if !picker.tt_move.is_null() && !is_noisy(pos, picker.tt_move) {
                picker.tt_move = Move::NULL;
                picker.stage = Stage::GenNoisy;
            }
        }
        picker
    }

    /// Creates a probcut picker with a SEE floor for the captures.
    pub fn new_probcut(pos: &Position, tt_move: Move, see_threshold: Score) -> Self {
        let mut picker = Self::new(pos, tt_move, Move::NULL);
        picker.mode = PickerMode::Probcut;
        picker.see_threshold = see_threshold;
        picker.skip_quiets = true;
        if !picker.tt_move.is_null() && !is_noisy(pos, picker.tt_move) {
            picker.tt_move = Move::NULL;
            picker.stage = Stage::GenNoisy;
        }
        picker
    }

    /// The validated TT move this picker yields first, if any.
    #[inline]
    pub fn tt_move(&self) -> Move {
        self.tt_move
    }

    /// Stops yielding quiet moves (and the killer). Losing captures are
    /// still delivered.
    pub fn skip_quiets(&mut self) {
        self.skip_quiets = true;
    }

    /// Returns the next pseudo-legal move, best first within each stage.
    /// The caller is responsible for the final `is_legal` filter.
    pub fn next(
        &mut self,
        pos: &Position,
        histories: &Histories,
        prev1: Option<ContKey>,
        prev2: Option<ContKey>,
    ) -> Option<Move> {
        loop {
            match self.stage {
                Stage::TtMove => {
                    self.stage = Stage::GenNoisy;
                    return Some(self.tt_move);
                }

                Stage::GenNoisy => {
                    let mut list = MoveList::new();
                    generate_noisy(pos, &mut list);
                    for &mv in list.as_slice() {
                        if mv == self.tt_move {
                            continue;
                        }
                        self.noisy.push(mv, noisy_score(pos, histories, mv));
                    }
                    self.stage = Stage::GoodNoisy;
                }

                Stage::GoodNoisy => {
                    match self.noisy.pick_best(self.noisy_idx) {
                        Some(ScoredMove { mv, score }) => {
                            self.noisy_idx += 1;
                            let threshold = match self.mode {
                                PickerMode::Probcut => self.see_threshold,
                                _ => -score / 8,
                            };
                            if see(pos, mv, threshold) {
                                return Some(mv);
                            }
                            // Losing capture: buffer it for the tail of the
                            // stream (probcut never revisits them).
                            if self.mode == PickerMode::Main {
                                self.bad_noisy.push(mv);
                            }
                        }
                        None => {
                            self.stage = match self.mode {
                                PickerMode::Main => Stage::Killer,
                                PickerMode::Qsearch if !self.skip_quiets => Stage::GenQuiet,
                                _ => Stage::Done,
                            };
                        }
                    }
                }

                Stage::Killer => {
                    self.stage = Stage::GenQuiet;
                    if !self.skip_quiets
                        && self.killer != self.tt_move
                        && pos.is_pseudolegal(self.killer)
                        && !is_noisy(pos, self.killer)
                    {
                        return Some(self.killer);
                    }
                }

                Stage::GenQuiet => {
                    if self.skip_quiets {
                        self.stage = Stage::BadNoisy;
                        continue;
                    }
                    let mut list = MoveList::new();
                    generate_quiet(pos, &mut list);
                    let threats = pos.threats();
                    for &mv in list.as_slice() {
                        if mv == self.tt_move || mv == self.killer {
                            continue;
                        }
                        let piece = pos.piece_at(mv.from());
                        let score = histories.quiet_score(threats, mv)
                            + histories.cont_score(prev1, piece, mv.to())
                            + histories.cont_score(prev2, piece, mv.to());
                        self.quiet.push(mv, score);
                    }
                    self.stage = Stage::Quiet;
                }

                Stage::Quiet => {
                    if self.skip_quiets {
                        self.stage = Stage::BadNoisy;
                        continue;
                    }
                    match self.quiet.pick_best(self.quiet_idx) {
                        Some(ScoredMove { mv, .. }) => {
                            self.quiet_idx += 1;
                            return Some(mv);
                        }
                        None => self.stage = Stage::BadNoisy,
                    }
                }

                Stage::BadNoisy => {
                    if self.mode != PickerMode::Main {
                        self.stage = Stage::Done;
                        continue;
                    }
                    if self.bad_noisy_idx < self.bad_noisy.len() {
                        let mv = self.bad_noisy[self.bad_noisy_idx];
                        self.bad_noisy_idx += 1;
                        return Some(mv);
                    }
                    self.stage = Stage::Done;
                }

                Stage::Done => return None,
            }
        }
    }
}

/// Validates a TT/killer move against the position; anything fishy becomes
/// the null move.
fn validated(pos: &Position, mv: Move) -> Move {
    if !mv.is_null() && pos.is_pseudolegal(mv) {
        mv
    } else {
        Move::NULL
    }
}

/// A move the noisy generator would produce: captures, en passant, queen
/// promotions.
fn is_noisy(pos: &Position, mv: Move) -> bool {
    mv.flag() == MoveFlag::EnPassant
        || mv.flag() == MoveFlag::PromoteQueen
        || (mv.flag() != MoveFlag::Castle && pos.piece_at(mv.to()).is_some())
}

/// Ordering score of a noisy move: victim value, a slice of noisy history,
/// and a bump for queen promotions.
fn noisy_score(pos: &Position, histories: &Histories, mv: Move) -> Score {
    let victim = captured_kind(pos, mv);
    let value = victim.map_or(0, piece_value);
    let promo = if mv.flag() == MoveFlag::PromoteQueen {
        PROMO_BONUS
    } else {
        0
    };
    value + histories.noisy_score(mv, victim) / 8 + promo
}

/// The piece kind a noisy move captures, if any.
pub fn captured_kind(pos: &Position, mv: Move) -> Option<Piece> {
    if mv.flag() == MoveFlag::EnPassant {
        Some(Piece::Pawn)
    } else {
        let victim = pos.piece_at(mv.to());
        if victim.is_some() && mv.flag() != MoveFlag::Castle {
            Some(victim.piece())
        } else {
            None
        }
    }
}
