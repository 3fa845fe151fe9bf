//! Incremental NNUE evaluation.
//!
//! The evaluator keeps one accumulator frame per ply. Frames are filled
//! lazily: [`Position::make`](crate::Position::make) only records which
//! features were subtracted and added (at most two of each), and the walk
//! back to the last materialised frame happens when a leaf actually asks
//! for an evaluation. A king crossing the horizontal-mirror boundary
//! invalidates its whole perspective; those frames are rebuilt against a
//! refresh table instead of being replayed feature by feature.

pub mod network;

use crate::observer::BoardObserver;
use crate::position::Position;
use crate::Bitboard;
use network::{feature_index, mirrors, output_bucket, Network, L1};
use std::sync::Arc;
use tessera_core::{Color, ColoredPiece, Piece, Square};

use crate::params::MAX_PLY;

/// Accumulator frames kept beyond `MAX_PLY`, for qsearch overshoot.
const STACK_SIZE: usize = MAX_PLY + 4;

/// One recorded feature change: a piece appearing on or leaving a square.
#[derive(Debug, Clone, Copy)]
struct FeatureDelta {
    piece: ColoredPiece,
    sq: Square,
}

/// One ply's accumulator state.
#[derive(Clone)]
struct Frame {
    /// Accumulators for both perspectives (only valid when `computed`).
    accs: [[i16; L1]; 2],
    /// Whether each perspective's accumulator is materialised.
    computed: [bool; 2],
    /// Whether each perspective must be rebuilt from the refresh table.
    refresh: [bool; 2],
    /// Features removed by this frame's move (at most 2).
    subs: [FeatureDelta; 2],
    num_subs: u8,
    /// Features added by this frame's move (at most 2).
    adds: [FeatureDelta; 2],
    num_adds: u8,
    /// Piece bitboards after the move, for refreshes.
    boards: [Bitboard; 12],
    /// King squares after the move.
    kings: [Square; 2],
    /// Mirror state of each perspective after the move.
    mirror: [bool; 2],
}

impl Frame {
    fn empty() -> Self {
        Frame {
            accs: [[0; L1]; 2],
            computed: [false; 2],
            refresh: [false; 2],
            subs: [FeatureDelta {
                piece: ColoredPiece::NONE,
                sq: Square::A1,
            }; 2],
            num_subs: 0,
            adds: [FeatureDelta {
                piece: ColoredPiece::NONE,
                sq: Square::A1,
            }; 2],
            num_adds: 0,
            boards: [Bitboard::EMPTY; 12],
            kings: [Square::E1, Square::E8],
            mirror: [false; 2],
        }
    }

    #[inline]
    fn sub(&mut self, piece: ColoredPiece, sq: Square) {
        debug_assert!(self.num_subs < 2);
        self.subs[self.num_subs as usize] = FeatureDelta { piece, sq };
        self.num_subs += 1;
    }

    #[inline]
    fn add(&mut self, piece: ColoredPiece, sq: Square) {
        debug_assert!(self.num_adds < 2);
        self.adds[self.num_adds as usize] = FeatureDelta { piece, sq };
        self.num_adds += 1;
    }
}

/// One refresh-table entry: the last materialised accumulator for a
/// (perspective, mirror) bucket, along with the boards it was built from.
#[derive(Clone)]
struct RefreshEntry {
    acc: [i16; L1],
    boards: [Bitboard; 12],
}

/// The per-thread NNUE evaluator: network handle, accumulator stack and
/// refresh table. Implements [`BoardObserver`] so `Position::make` drives
/// it directly.
pub struct Evaluator {
    network: Arc<Network>,
    stack: Box<[Frame]>,
    top: usize,
    refresh_table: Box<[RefreshEntry]>,
}

impl Evaluator {
    /// Creates an evaluator over the given network. Call [`Self::reset`]
    /// before the first evaluation.
    pub fn new(network: Arc<Network>) -> Self {
        let mut bias_entry = RefreshEntry {
            acc: [0; L1],
            boards: [Bitboard::EMPTY; 12],
        };
        bias_entry.acc.copy_from_slice(network.ft_bias());

        Evaluator {
            stack: vec![Frame::empty(); STACK_SIZE].into_boxed_slice(),
            top: 0,
            refresh_table: vec![bias_entry; 4].into_boxed_slice(),
            network,
        }
    }

    /// Swaps in a different network and invalidates all cached state.
    pub fn set_network(&mut self, network: Arc<Network>) {
        self.network = network;
        for entry in self.refresh_table.iter_mut() {
            entry.acc.copy_from_slice(self.network.ft_bias());
            entry.boards = [Bitboard::EMPTY; 12];
        }
    }

    /// Rebuilds the bottom frame from the position. The search calls this
    /// once at the start of every search (and after `position` commands).
    pub fn reset(&mut self, pos: &Position) {
        self.top = 0;
        let frame = &mut self.stack[0];
        frame.num_subs = 0;
        frame.num_adds = 0;
        frame.refresh = [false; 2];
        snapshot(frame, pos);

        for persp in Color::ALL {
            let p = persp.index();
            let mirror = frame.mirror[p];
            frame.accs[p].copy_from_slice(self.network.ft_bias());
            for idx in 0..12 {
                let piece = ColoredPiece::from_index(idx);
                for sq in frame.boards[idx] {
                    let feature = feature_index(persp, piece, sq, mirror);
                    add_feature(&mut frame.accs[p], self.network.feature_weights(feature));
                }
            }
            frame.computed[p] = true;
        }
    }

    /// Evaluates the position at the current frame, materialising any lazy
    /// frames first. Returns the raw network score from the side to move's
    /// perspective, unclamped and unscaled.
    pub fn evaluate(&mut self, pos: &Position) -> i32 {
        debug_assert_eq!(self.stack[self.top].kings[0], pos.king_square(Color::White));
        self.materialise(Color::White);
        self.materialise(Color::Black);

        let frame = &self.stack[self.top];
        let stm = pos.side_to_move();
        let bucket = output_bucket(pos.occupied().count());
        self.network.forward(
            &frame.accs[stm.index()],
            &frame.accs[stm.opposite().index()],
            bucket,
        )
    }

    /// Ensures `persp`'s accumulator is computed at the top frame: walk
    /// back to the last computed frame (or a refresh boundary), then replay
    /// the recorded deltas forward.
    fn materialise(&mut self, persp: Color) {
        let p = persp.index();
        if self.stack[self.top].computed[p] {
            return;
        }

        // Find the frame to start from.
        let mut start = self.top;
        loop {
            if self.stack[start].computed[p] {
                break;
            }
            if self.stack[start].refresh[p] {
                self.refresh_frame(start, persp);
                break;
            }
            debug_assert!(start > 0, "bottom frame must always be computed");
            start -= 1;
        }

        // Replay forward.
        for i in start + 1..=self.top {
            let (before, after) = self.stack.split_at_mut(i);
            let prev = &before[i - 1];
            let frame = &mut after[0];
            debug_assert!(!frame.refresh[p]);

            let mirror = frame.mirror[p];
            frame.accs[p] = prev.accs[p];
            for d in 0..frame.num_subs as usize {
                let delta = frame.subs[d];
                let feature = feature_index(persp, delta.piece, delta.sq, mirror);
                sub_feature(&mut frame.accs[p], self.network.feature_weights(feature));
            }
            for d in 0..frame.num_adds as usize {
                let delta = frame.adds[d];
                let feature = feature_index(persp, delta.piece, delta.sq, mirror);
                add_feature(&mut frame.accs[p], self.network.feature_weights(feature));
            }
            frame.computed[p] = true;
        }
    }

    /// Rebuilds one perspective of one frame from the refresh table,
    /// applying only the difference between the cached boards and the
    /// frame's boards, then stores the result back into the table.
    fn refresh_frame(&mut self, idx: usize, persp: Color) {
        let p = persp.index();
        let frame = &mut self.stack[idx];
        let mirror = frame.mirror[p];
        let entry = &mut self.refresh_table[p * 2 + mirror as usize];

        for piece_idx in 0..12 {
            let piece = ColoredPiece::from_index(piece_idx);
            let added = frame.boards[piece_idx] & !entry.boards[piece_idx];
            let removed = entry.boards[piece_idx] & !frame.boards[piece_idx];
            for sq in added {
                let feature = feature_index(persp, piece, sq, mirror);
                add_feature(&mut entry.acc, self.network.feature_weights(feature));
            }
            for sq in removed {
                let feature = feature_index(persp, piece, sq, mirror);
                sub_feature(&mut entry.acc, self.network.feature_weights(feature));
            }
            entry.boards[piece_idx] = frame.boards[piece_idx];
        }

        frame.accs[p] = entry.acc;
        frame.computed[p] = true;
    }
}

/// Copies the position's boards, kings and mirror state into a frame.
fn snapshot(frame: &mut Frame, pos: &Position) {
    for piece in Piece::ALL {
        for color in Color::ALL {
            let cp = ColoredPiece::new(piece, color);
            frame.boards[cp.index()] = pos.pieces_of(piece, color);
        }
    }
    frame.kings = [
        pos.king_square(Color::White),
        pos.king_square(Color::Black),
    ];
    frame.mirror = [mirrors(frame.kings[0]), mirrors(frame.kings[1])];
}

#[inline]
fn add_feature(acc: &mut [i16; L1], weights: &[i16]) {
    for (a, &w) in acc.iter_mut().zip(weights) {
        *a += w;
    }
}

#[inline]
fn sub_feature(acc: &mut [i16; L1], weights: &[i16]) {
    for (a, &w) in acc.iter_mut().zip(weights) {
        *a -= w;
    }
}

impl BoardObserver for Evaluator {
    fn push_frame(&mut self) {
        self.top += 1;
        debug_assert!(self.top < STACK_SIZE);
        let frame = &mut self.stack[self.top];
        frame.computed = [false; 2];
        frame.refresh = [false; 2];
        frame.num_subs = 0;
        frame.num_adds = 0;
    }

    fn pop_frame(&mut self) {
        debug_assert!(self.top > 0);
        self.top -= 1;
    }

    fn prepare_king_move(&mut self, color: Color, from: Square, to: Square) {
        if mirrors(from) != mirrors(to) {
            self.stack[self.top].refresh[color.index()] = true;
        }
    }

    fn piece_moved(&mut self, piece: ColoredPiece, from: Square, to: Square) {
        let frame = &mut self.stack[self.top];
        frame.sub(piece, from);
        frame.add(piece, to);
    }

    fn piece_captured(&mut self, piece: ColoredPiece, from: Square, to: Square, victim: ColoredPiece) {
        let frame = &mut self.stack[self.top];
        frame.sub(piece, from);
        frame.sub(victim, to);
        frame.add(piece, to);
    }

    fn pawn_promoted(&mut self, color: Color, from: Square, to: Square, promo: Piece) {
        let frame = &mut self.stack[self.top];
        frame.sub(ColoredPiece::new(Piece::Pawn, color), from);
        frame.add(ColoredPiece::new(promo, color), to);
    }

    fn pawn_promote_captured(
        &mut self,
        color: Color,
        from: Square,
        to: Square,
        promo: Piece,
        victim: ColoredPiece,
    ) {
        let frame = &mut self.stack[self.top];
        frame.sub(ColoredPiece::new(Piece::Pawn, color), from);
        frame.sub(victim, to);
        frame.add(ColoredPiece::new(promo, color), to);
    }

    fn castled(
        &mut self,
        color: Color,
        king_from: Square,
        king_to: Square,
        rook_from: Square,
        rook_to: Square,
    ) {
        let frame = &mut self.stack[self.top];
        frame.sub(ColoredPiece::new(Piece::King, color), king_from);
        frame.sub(ColoredPiece::new(Piece::Rook, color), rook_from);
        frame.add(ColoredPiece::new(Piece::King, color), king_to);
        frame.add(ColoredPiece::new(Piece::Rook, color), rook_to);
    }

    fn en_passanted(&mut self, color: Color, from: Square, to: Square, victim_sq: Square) {
        let frame = &mut self.stack[self.top];
        frame.sub(ColoredPiece::new(Piece::Pawn, color), from);
        frame.sub(ColoredPiece::new(Piece::Pawn, color.opposite()), victim_sq);
        frame.add(ColoredPiece::new(Piece::Pawn, color), to);
    }

    fn finalize(&mut self, pos: &Position) {
        snapshot(&mut self.stack[self.top], pos);
    }
}
