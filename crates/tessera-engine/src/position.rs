//! Chess position representation.
//!
//! [`Position`] keeps the piece-on-square table and the piece/color
//! bitboards mutually consistent, maintains the zobrist key bundle
//! incrementally, and recomputes the checkers/pinned/threats caches on
//! every make and unmake. Moves are made in place; a stack of
//! [`BoardState`]s holds everything a move cannot cheaply reverse.

use crate::attacks::{
    between, bishop_attacks, king_attacks, knight_attacks, line, pawn_attacks, rook_attacks,
};
use crate::cuckoo;
use crate::movegen::{self, MoveList};
use crate::observer::BoardObserver;
use crate::zobrist::KeyBundle;
use crate::Bitboard;
use tessera_core::{
    Color, ColoredPiece, FenError, FenParser, File, Move, MoveFlag, Piece, Rank, Square,
};

/// Castling rights as four optional rook source squares, Chess960-capable.
///
/// A right exists iff the rook square is recorded; "kingside" means the rook
/// stands on a higher file than the king.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct CastlingRights {
    rooks: [[Option<Square>; 2]; 2],
}

impl CastlingRights {
    pub const NONE: CastlingRights = CastlingRights {
        rooks: [[None; 2]; 2],
    };

    /// Returns the rook square for the given right, if the right exists.
    #[inline]
    pub const fn rook(self, color: Color, kingside: bool) -> Option<Square> {
        self.rooks[color.index()][kingside as usize]
    }

    /// Grants a right.
    #[inline]
    pub fn set(&mut self, color: Color, kingside: bool, rook: Square) {
        self.rooks[color.index()][kingside as usize] = Some(rook);
    }

    /// Revokes both rights of a color.
    #[inline]
    pub fn clear_color(&mut self, color: Color) {
        self.rooks[color.index()] = [None; 2];
    }

    /// Revokes any right whose rook stands on `sq`.
    #[inline]
    pub fn clear_rook(&mut self, sq: Square) {
        for color in 0..2 {
            for side in 0..2 {
                if self.rooks[color][side] == Some(sq) {
                    self.rooks[color][side] = None;
                }
            }
        }
    }

    /// Returns true if any right remains.
    #[inline]
    pub fn any(self) -> bool {
        self != Self::NONE
    }

    /// XOR of the zobrist keys of all granted rights.
    pub fn zobrist(self) -> u64 {
        let mut key = 0;
        for color in Color::ALL {
            for kingside in [false, true] {
                if self.rook(color, kingside).is_some() {
                    key ^= crate::zobrist::ZOBRIST.castling(color, kingside);
                }
            }
        }
        key
    }
}

/// Everything a move overwrites that cannot be recomputed cheaply on unmake.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BoardState {
    captured: ColoredPiece,
    castling: CastlingRights,
    ep_square: Option<Square>,
    halfmove_clock: u32,
    keys: KeyBundle,
    checkers: Bitboard,
    pinned: Bitboard,
    threats: Bitboard,
}

/// Complete chess position with incremental caches.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Position {
    /// Piece on each square; kept in lockstep with the bitboards.
    mailbox: [ColoredPiece; 64],
    /// Bitboards for each piece type, indexed by `Piece`.
    pieces: [Bitboard; 6],
    /// Bitboards for each color's pieces.
    colors: [Bitboard; 2],
    /// The side to move.
    side_to_move: Color,
    /// Castling rights (rook source squares).
    castling: CastlingRights,
    /// En passant target square, if any.
    ep_square: Option<Square>,
    /// Halfmove clock for the 50-move rule.
    halfmove_clock: u32,
    /// Fullmove number (starts at 1, increments after Black's move).
    fullmove_number: u32,
    /// King squares, cached for both colors.
    kings: [Square; 2],
    /// The zobrist key bundle (a cache; recomputable from the rest).
    keys: KeyBundle,
    /// Opposing pieces giving check to the side to move.
    checkers: Bitboard,
    /// Our pieces whose removal would expose our king to a slider.
    pinned: Bitboard,
    /// Squares attacked by the side not to move (our king removed as a
    /// blocker, so king retreats along a checking ray stay illegal).
    threats: Bitboard,
    /// Whether castling moves print in Chess960 notation.
    chess960: bool,
    /// Saved states for unmake.
    states: Vec<BoardState>,
    /// Overall keys of all earlier positions, for repetition detection.
    key_history: Vec<u64>,
}

impl Position {
    /// Creates a position with no pieces. Only useful as a FEN target.
    fn empty() -> Self {
        Position {
            mailbox: [ColoredPiece::NONE; 64],
            pieces: [Bitboard::EMPTY; 6],
            colors: [Bitboard::EMPTY; 2],
            side_to_move: Color::White,
            castling: CastlingRights::NONE,
            ep_square: None,
            halfmove_clock: 0,
            fullmove_number: 1,
            kings: [Square::E1, Square::E8],
            keys: KeyBundle::default(),
            checkers: Bitboard::EMPTY,
            pinned: Bitboard::EMPTY,
            threats: Bitboard::EMPTY,
            chess960: false,
            states: Vec::with_capacity(256),
            key_history: Vec::with_capacity(256),
        }
    }

    /// Creates the standard starting position.
    pub fn startpos() -> Self {
        Self::from_fen(FenParser::STARTPOS).expect("STARTPOS is valid")
    }

    /// Creates a position from a FEN string and verifies it is legal.
    pub fn from_fen(fen: &str) -> Result<Self, FenError> {
        let parsed = FenParser::parse(fen)?;
        let mut pos = Position::empty();

        let ranks: Vec<&str> = parsed.piece_placement.split('/').collect();
        for (rank_idx, rank_str) in ranks.iter().enumerate() {
            let rank = 7 - rank_idx;
            let mut file = 0usize;
            for c in rank_str.chars() {
                if let Some(digit) = c.to_digit(10) {
                    file += digit as usize;
                } else if let Some((piece, color)) = Piece::from_fen_char(c) {
                    if file >= 8 {
                        return Err(FenError::InvalidPiecePlacement(rank_str.to_string()));
                    }
                    // SAFETY: rank and file are both < 8
                    let sq = unsafe { Square::from_index_unchecked((rank * 8 + file) as u8) };
                    pos.put_piece(ColoredPiece::new(piece, color), sq);
                    file += 1;
                }
            }
        }

        pos.side_to_move = match parsed.active_color {
            'w' => Color::White,
            _ => Color::Black,
        };
        if pos.side_to_move == Color::Black {
            pos.keys.toggle_side_to_move();
        }

        for color in Color::ALL {
            let king_bb = pos.pieces_of(Piece::King, color);
            if !king_bb.is_single() {
                return Err(FenError::IllegalPosition(format!(
                    "{color} does not have exactly one king"
                )));
            }
            pos.kings[color.index()] = king_bb.lsb().unwrap();
        }

        pos.parse_castling(&parsed.castling)?;
        pos.keys.all ^= pos.castling.zobrist();

        if parsed.en_passant != "-" {
            let sq = Square::from_algebraic(&parsed.en_passant)
                .ok_or_else(|| FenError::InvalidEnPassantSquare(parsed.en_passant.clone()))?;
            pos.ep_square = Some(sq);
            pos.keys.toggle_en_passant(sq.file());
        }

        pos.halfmove_clock = parsed.halfmove_clock;
        pos.fullmove_number = parsed.fullmove_number.max(1);

        pos.verify_legal()?;
        pos.recompute_masks();
        debug_assert_eq!(pos.keys, pos.recompute_keys());
        Ok(pos)
    }

    /// Resolves a FEN castling field into rook squares, accepting both the
    /// standard KQkq letters and Shredder/X-FEN file letters.
    fn parse_castling(&mut self, field: &str) -> Result<(), FenError> {
        if field == "-" {
            return Ok(());
        }
        for c in field.chars() {
            let color = if c.is_ascii_uppercase() {
                Color::White
            } else {
                Color::Black
            };
            let king = self.kings[color.index()];
            let back = Rank::from_index(color.back_rank()).unwrap();
            let rooks = self.pieces_of(Piece::Rook, color) & rank_bb(back);

            let rook = match c.to_ascii_lowercase() {
                // Outermost rook on the given side of the king.
                'k' => rooks.into_iter().filter(|&s| s > king).last(),
                'q' => rooks.into_iter().find(|&s| s < king),
                f @ 'a'..='h' => {
                    let file = File::from_char(f).unwrap();
                    Some(Square::new(file, back))
                }
                _ => return Err(FenError::InvalidCastlingRights(field.to_string())),
            };

            let rook = rook
                .filter(|&s| self.piece_at(s) == ColoredPiece::new(Piece::Rook, color))
                .ok_or_else(|| {
                    FenError::IllegalPosition(format!("castling right '{c}' has no rook"))
                })?;
            if king.rank() != back {
                return Err(FenError::IllegalPosition(format!(
                    "castling right '{c}' but the {color} king has moved"
                )));
            }
            self.castling.set(color, rook > king, rook);
        }
        Ok(())
    }

    /// Structural checks a freshly parsed position must pass.
    fn verify_legal(&self) -> Result<(), FenError> {
        for color in Color::ALL {
            let pawns = self.pieces_of(Piece::Pawn, color);
            if (pawns & (Bitboard::RANK_1 | Bitboard::RANK_8)).is_not_empty() {
                return Err(FenError::IllegalPosition(format!(
                    "{color} has a pawn on a back rank"
                )));
            }
        }

        let inactive = self.side_to_move.opposite();
        if (self.attackers_to(self.kings[inactive.index()], self.occupied())
            & self.color_bb(self.side_to_move))
        .is_not_empty()
        {
            return Err(FenError::IllegalPosition(format!(
                "{inactive} is in check but it is not their turn"
            )));
        }

        if let Some(ep) = self.ep_square {
            let victim = ep
                .offset(self.side_to_move.opposite().pawn_offset())
                .map(|s| self.piece_at(s));
            if victim != Some(ColoredPiece::new(Piece::Pawn, self.side_to_move.opposite())) {
                return Err(FenError::IllegalPosition(format!(
                    "en passant square {ep} has no capturable pawn"
                )));
            }
        }

        Ok(())
    }

    /// Serializes the position to FEN.
    pub fn to_fen(&self) -> String {
        let mut fen = String::new();

        for rank in (0..8).rev() {
            let mut empty_count = 0;
            for file in 0..8 {
                // SAFETY: rank and file are both < 8
                let sq = unsafe { Square::from_index_unchecked(rank * 8 + file) };
                let piece = self.piece_at(sq);
                if piece.is_some() {
                    if empty_count > 0 {
                        fen.push_str(&empty_count.to_string());
                        empty_count = 0;
                    }
                    fen.push(piece.to_char());
                } else {
                    empty_count += 1;
                }
            }
            if empty_count > 0 {
                fen.push_str(&empty_count.to_string());
            }
            if rank > 0 {
                fen.push('/');
            }
        }

        fen.push(' ');
        fen.push(match self.side_to_move {
            Color::White => 'w',
            Color::Black => 'b',
        });

        fen.push(' ');
        if !self.castling.any() {
            fen.push('-');
        } else {
            for (color, letters) in [(Color::White, ['K', 'Q']), (Color::Black, ['k', 'q'])] {
                for (kingside, letter) in [(true, letters[0]), (false, letters[1])] {
                    if let Some(rook) = self.castling.rook(color, kingside) {
                        if self.chess960 {
                            let c = rook.file().to_char();
                            fen.push(if color == Color::White {
                                c.to_ascii_uppercase()
                            } else {
                                c
                            });
                        } else {
                            fen.push(letter);
                        }
                    }
                }
            }
        }

        fen.push(' ');
        match self.ep_square {
            Some(sq) => fen.push_str(&sq.to_algebraic()),
            None => fen.push('-'),
        }

        fen.push(' ');
        fen.push_str(&self.halfmove_clock.to_string());
        fen.push(' ');
        fen.push_str(&self.fullmove_number.to_string());

        fen
    }

    // ------------------------------------------------------------------
    // Accessors
    // ------------------------------------------------------------------

    #[inline]
    pub fn piece_at(&self, sq: Square) -> ColoredPiece {
        self.mailbox[sq.index() as usize]
    }

    #[inline]
    pub fn piece_bb(&self, piece: Piece) -> Bitboard {
        self.pieces[piece.index()]
    }

    #[inline]
    pub fn color_bb(&self, color: Color) -> Bitboard {
        self.colors[color.index()]
    }

    #[inline]
    pub fn pieces_of(&self, piece: Piece, color: Color) -> Bitboard {
        self.pieces[piece.index()] & self.colors[color.index()]
    }

    #[inline]
    pub fn occupied(&self) -> Bitboard {
        self.colors[0] | self.colors[1]
    }

    #[inline]
    pub fn side_to_move(&self) -> Color {
        self.side_to_move
    }

    #[inline]
    pub fn king_square(&self, color: Color) -> Square {
        self.kings[color.index()]
    }

    #[inline]
    pub fn checkers(&self) -> Bitboard {
        self.checkers
    }

    #[inline]
    pub fn pinned(&self) -> Bitboard {
        self.pinned
    }

    #[inline]
    pub fn threats(&self) -> Bitboard {
        self.threats
    }

    #[inline]
    pub fn in_check(&self) -> bool {
        self.checkers.is_not_empty()
    }

    #[inline]
    pub fn keys(&self) -> &KeyBundle {
        &self.keys
    }

    /// The overall position key.
    #[inline]
    pub fn key(&self) -> u64 {
        self.keys.all
    }

    #[inline]
    pub fn halfmove_clock(&self) -> u32 {
        self.halfmove_clock
    }

    #[inline]
    pub fn fullmove_number(&self) -> u32 {
        self.fullmove_number
    }

    #[inline]
    pub fn ep_square(&self) -> Option<Square> {
        self.ep_square
    }

    #[inline]
    pub fn castling(&self) -> CastlingRights {
        self.castling
    }

    #[inline]
    pub fn is_chess960(&self) -> bool {
        self.chess960
    }

    pub fn set_chess960(&mut self, enabled: bool) {
        self.chess960 = enabled;
    }

    /// Pre-reserves space for `plies` further moves so the state stacks
    /// never reallocate inside the search.
    pub fn reserve_plies(&mut self, plies: usize) {
        self.states.reserve(plies);
        self.key_history.reserve(plies);
    }

    /// True if the side to move has any piece besides pawns and the king
    /// (the null-move zugzwang guard).
    pub fn has_non_pawn_material(&self, color: Color) -> bool {
        (self.color_bb(color)
            & !(self.piece_bb(Piece::Pawn) | self.piece_bb(Piece::King)))
        .is_not_empty()
    }

    /// All pieces of both colors attacking `sq` under the given occupancy.
    pub fn attackers_to(&self, sq: Square, occ: Bitboard) -> Bitboard {
        let queens = self.piece_bb(Piece::Queen);
        (pawn_attacks(sq, Color::Black) & self.pieces_of(Piece::Pawn, Color::White))
            | (pawn_attacks(sq, Color::White) & self.pieces_of(Piece::Pawn, Color::Black))
            | (knight_attacks(sq) & self.piece_bb(Piece::Knight))
            | (king_attacks(sq) & self.piece_bb(Piece::King))
            | (bishop_attacks(sq, occ) & (self.piece_bb(Piece::Bishop) | queens))
            | (rook_attacks(sq, occ) & (self.piece_bb(Piece::Rook) | queens))
    }

    /// Every square attacked by `color` under the given occupancy.
    fn attacks_by(&self, color: Color, occ: Bitboard) -> Bitboard {
        let pawns = self.pieces_of(Piece::Pawn, color);
        let mut attacks = match color {
            Color::White => pawns.north_east() | pawns.north_west(),
            Color::Black => pawns.south_east() | pawns.south_west(),
        };
        for sq in self.pieces_of(Piece::Knight, color) {
            attacks |= knight_attacks(sq);
        }
        let queens = self.pieces_of(Piece::Queen, color);
        for sq in self.pieces_of(Piece::Bishop, color) | queens {
            attacks |= bishop_attacks(sq, occ);
        }
        for sq in self.pieces_of(Piece::Rook, color) | queens {
            attacks |= rook_attacks(sq, occ);
        }
        attacks | king_attacks(self.kings[color.index()])
    }

    /// Recomputes the checkers/pinned/threats caches for the current side to
    /// move. Called at the end of every make/unmake.
    fn recompute_masks(&mut self) {
        let us = self.side_to_move;
        let them = us.opposite();
        let ksq = self.kings[us.index()];
        let occ = self.occupied();

        self.threats = self.attacks_by(them, occ ^ Bitboard::from_square(ksq));
        self.checkers = self.attackers_to(ksq, occ) & self.color_bb(them);
        self.pinned = self.pinned_pieces(us);
    }

    /// Pieces of `color` that shield their own king from an enemy slider.
    pub fn pinned_pieces(&self, color: Color) -> Bitboard {
        let them = color.opposite();
        let ksq = self.kings[color.index()];
        let occ = self.occupied();

        let mut pinned = Bitboard::EMPTY;
        let queens = self.pieces_of(Piece::Queen, them);
        let snipers = (rook_attacks(ksq, Bitboard::EMPTY)
            & (self.pieces_of(Piece::Rook, them) | queens))
            | (bishop_attacks(ksq, Bitboard::EMPTY)
                & (self.pieces_of(Piece::Bishop, them) | queens));
        for sniper in snipers {
            let blockers = between(ksq, sniper) & occ;
            if blockers.is_single() && (blockers & self.color_bb(color)).is_not_empty() {
                pinned |= blockers;
            }
        }
        pinned
    }

    /// Rebuilds the whole key bundle from scratch. Only used to validate the
    /// incremental updates.
    pub fn recompute_keys(&self) -> KeyBundle {
        let mut keys = KeyBundle::default();
        for idx in 0..64u8 {
            let sq = Square::from_index(idx).unwrap();
            let piece = self.piece_at(sq);
            if piece.is_some() {
                keys.toggle_piece(piece, sq);
            }
        }
        if self.side_to_move == Color::Black {
            keys.toggle_side_to_move();
        }
        keys.all ^= self.castling.zobrist();
        if let Some(ep) = self.ep_square {
            keys.toggle_en_passant(ep.file());
        }
        keys
    }

    // ------------------------------------------------------------------
    // Board surgery (mailbox + bitboards + keys together)
    // ------------------------------------------------------------------

    #[inline]
    fn put_piece(&mut self, piece: ColoredPiece, sq: Square) {
        debug_assert!(self.piece_at(sq).is_none());
        self.mailbox[sq.index() as usize] = piece;
        let bb = Bitboard::from_square(sq);
        self.pieces[piece.piece().index()] |= bb;
        self.colors[piece.color().index()] |= bb;
        self.keys.toggle_piece(piece, sq);
    }

    #[inline]
    fn remove_piece(&mut self, sq: Square) -> ColoredPiece {
        let piece = self.piece_at(sq);
        debug_assert!(piece.is_some());
        self.mailbox[sq.index() as usize] = ColoredPiece::NONE;
        let bb = Bitboard::from_square(sq);
        self.pieces[piece.piece().index()] ^= bb;
        self.colors[piece.color().index()] ^= bb;
        self.keys.toggle_piece(piece, sq);
        piece
    }

    // ------------------------------------------------------------------
    // Make / unmake
    // ------------------------------------------------------------------

    /// Makes a legal move, updating boards, keys and caches incrementally
    /// and reporting the piece movements to `observer`.
    pub fn make(&mut self, mv: Move, observer: &mut impl BoardObserver) {
        debug_assert!(!mv.is_null());
        let us = self.side_to_move;
        let them = us.opposite();
        let from = mv.from();
        let to = mv.to();
        let moving = self.piece_at(from);
        debug_assert!(moving.is_some() && moving.color() == us);

        self.key_history.push(self.keys.all);
        observer.push_frame();

        let captured = match mv.flag() {
            MoveFlag::EnPassant => ColoredPiece::new(Piece::Pawn, them),
            MoveFlag::Castle => ColoredPiece::NONE,
            _ => self.piece_at(to),
        };

        self.states.push(BoardState {
            captured,
            castling: self.castling,
            ep_square: self.ep_square,
            halfmove_clock: self.halfmove_clock,
            keys: self.keys,
            checkers: self.checkers,
            pinned: self.pinned,
            threats: self.threats,
        });

        // The en passant right lives for exactly one ply.
        if let Some(ep) = self.ep_square.take() {
            self.keys.toggle_en_passant(ep.file());
        }

        if moving.piece() == Piece::King {
            let king_to = if mv.flag() == MoveFlag::Castle {
                mv.king_castle_target()
            } else {
                to
            };
            observer.prepare_king_move(us, from, king_to);
        }

        match mv.flag() {
            MoveFlag::Castle => {
                let king_to = mv.king_castle_target();
                let rook_to = mv.rook_castle_target();
                // Remove both first: in Chess960 the target squares may
                // coincide with the source squares.
                let king = self.remove_piece(from);
                let rook = self.remove_piece(to);
                self.put_piece(king, king_to);
                self.put_piece(rook, rook_to);
                self.kings[us.index()] = king_to;
                observer.castled(us, from, king_to, to, rook_to);
            }
            MoveFlag::EnPassant => {
                // SAFETY: the victim square of a legal ep capture is on the board
                let victim_sq =
                    unsafe { Square::from_index_unchecked((to.index() as i8 - us.pawn_offset()) as u8) };
                self.remove_piece(victim_sq);
                let pawn = self.remove_piece(from);
                self.put_piece(pawn, to);
                observer.en_passanted(us, from, to, victim_sq);
            }
            flag if flag.is_promotion() => {
                let promo = flag.promotion_piece().unwrap();
                self.remove_piece(from);
                if captured.is_some() {
                    self.remove_piece(to);
                }
                self.put_piece(ColoredPiece::new(promo, us), to);
                if captured.is_some() {
                    observer.pawn_promote_captured(us, from, to, promo, captured);
                } else {
                    observer.pawn_promoted(us, from, to, promo);
                }
            }
            _ => {
                if captured.is_some() {
                    self.remove_piece(to);
                }
                let piece = self.remove_piece(from);
                self.put_piece(piece, to);
                if piece.piece() == Piece::King {
                    self.kings[us.index()] = to;
                }
                if captured.is_some() {
                    observer.piece_captured(moving, from, to, captured);
                } else {
                    observer.piece_moved(moving, from, to);
                }

                if mv.flag() == MoveFlag::DoublePush {
                    // SAFETY: the skipped square of a double push is on the board
                    let ep = unsafe {
                        Square::from_index_unchecked((from.index() as i8 + us.pawn_offset()) as u8)
                    };
                    self.ep_square = Some(ep);
                    self.keys.toggle_en_passant(ep.file());
                }
            }
        }

        // Castling rights: a moving king loses both, a moving or captured
        // rook loses its specific right.
        if self.castling.any() {
            let old = self.castling;
            if moving.piece() == Piece::King {
                self.castling.clear_color(us);
            }
            self.castling.clear_rook(from);
            self.castling.clear_rook(to);
            if self.castling != old {
                self.keys.all ^= old.zobrist() ^ self.castling.zobrist();
            }
        }

        if moving.piece() == Piece::Pawn || captured.is_some() {
            self.halfmove_clock = 0;
        } else {
            self.halfmove_clock += 1;
        }
        if us == Color::Black {
            self.fullmove_number += 1;
        }

        self.side_to_move = them;
        self.keys.toggle_side_to_move();

        self.recompute_masks();
        observer.finalize(self);
        debug_assert_eq!(self.keys, self.recompute_keys());
    }

    /// Unmakes the move most recently made with [`Self::make`].
    pub fn unmake(&mut self, mv: Move, observer: &mut impl BoardObserver) {
        observer.pop_frame();
        self.key_history.pop();
        let state = self.states.pop().expect("unmake without make");

        let them = self.side_to_move;
        let us = them.opposite();
        self.side_to_move = us;
        if us == Color::Black {
            self.fullmove_number -= 1;
        }

        let from = mv.from();
        let to = mv.to();

        match mv.flag() {
            MoveFlag::Castle => {
                let king = self.remove_piece(mv.king_castle_target());
                let rook = self.remove_piece(mv.rook_castle_target());
                self.put_piece(king, from);
                self.put_piece(rook, to);
                self.kings[us.index()] = from;
            }
            MoveFlag::EnPassant => {
                let pawn = self.remove_piece(to);
                self.put_piece(pawn, from);
                // SAFETY: victim square of the ep capture is on the board
                let victim_sq =
                    unsafe { Square::from_index_unchecked((to.index() as i8 - us.pawn_offset()) as u8) };
                self.put_piece(state.captured, victim_sq);
            }
            flag if flag.is_promotion() => {
                self.remove_piece(to);
                self.put_piece(ColoredPiece::new(Piece::Pawn, us), from);
                if state.captured.is_some() {
                    self.put_piece(state.captured, to);
                }
            }
            _ => {
                let piece = self.remove_piece(to);
                self.put_piece(piece, from);
                if piece.piece() == Piece::King {
                    self.kings[us.index()] = from;
                }
                if state.captured.is_some() {
                    self.put_piece(state.captured, to);
                }
            }
        }

        // The saved state snapshots everything else.
        self.castling = state.castling;
        self.ep_square = state.ep_square;
        self.halfmove_clock = state.halfmove_clock;
        self.keys = state.keys;
        self.checkers = state.checkers;
        self.pinned = state.pinned;
        self.threats = state.threats;
    }

    /// Makes a null move: flips the side to move, clears en passant, and
    /// recomputes the caches. The observer gets an empty frame.
    pub fn make_null(&mut self, observer: &mut impl BoardObserver) {
        self.key_history.push(self.keys.all);
        observer.push_frame();
        self.states.push(BoardState {
            captured: ColoredPiece::NONE,
            castling: self.castling,
            ep_square: self.ep_square,
            halfmove_clock: self.halfmove_clock,
            keys: self.keys,
            checkers: self.checkers,
            pinned: self.pinned,
            threats: self.threats,
        });

        if let Some(ep) = self.ep_square.take() {
            self.keys.toggle_en_passant(ep.file());
        }
        self.halfmove_clock += 1;
        self.side_to_move = self.side_to_move.opposite();
        self.keys.toggle_side_to_move();
        self.recompute_masks();
        observer.finalize(self);
    }

    /// Unmakes a null move.
    pub fn unmake_null(&mut self, observer: &mut impl BoardObserver) {
        observer.pop_frame();
        self.key_history.pop();
        let state = self.states.pop().expect("unmake_null without make_null");
        self.side_to_move = self.side_to_move.opposite();
        self.castling = state.castling;
        self.ep_square = state.ep_square;
        self.halfmove_clock = state.halfmove_clock;
        self.keys = state.keys;
        self.checkers = state.checkers;
        self.pinned = state.pinned;
        self.threats = state.threats;
    }

    // ------------------------------------------------------------------
    // Legality
    // ------------------------------------------------------------------

    /// Decides whether a pseudo-legal move is legal: it must not leave our
    /// king attacked.
    pub fn is_legal(&self, mv: Move) -> bool {
        let us = self.side_to_move;
        let them = us.opposite();
        let from = mv.from();
        let to = mv.to();
        let ksq = self.kings[us.index()];

        match mv.flag() {
            MoveFlag::Castle => {
                if self.in_check() {
                    return false;
                }
                let king_to = mv.king_castle_target();
                let path = between(from, king_to) | Bitboard::from_square(king_to);
                if (path & self.threats).is_not_empty() {
                    return false;
                }
                // The vacated rook square can unmask a slider on the back
                // rank (possible in Chess960), so test the final square with
                // the post-castling occupancy.
                let occ = self.occupied()
                    ^ Bitboard::from_square(from)
                    ^ Bitboard::from_square(to)
                    | Bitboard::from_square(king_to)
                    | Bitboard::from_square(mv.rook_castle_target());
                (self.attackers_to(king_to, occ) & self.color_bb(them) & occ).is_empty()
            }
            MoveFlag::EnPassant => {
                // SAFETY: victim square of the ep capture is on the board
                let victim_sq =
                    unsafe { Square::from_index_unchecked((to.index() as i8 - us.pawn_offset()) as u8) };
                let occ = self.occupied()
                    ^ Bitboard::from_square(from)
                    ^ Bitboard::from_square(victim_sq)
                    | Bitboard::from_square(to);
                let victim_mask =
                    !(Bitboard::from_square(victim_sq) | Bitboard::from_square(from));
                let queens = self.piece_bb(Piece::Queen);
                let sliders = ((bishop_attacks(ksq, occ)
                    & (self.piece_bb(Piece::Bishop) | queens))
                    | (rook_attacks(ksq, occ) & (self.piece_bb(Piece::Rook) | queens)))
                    & self.color_bb(them);
                let pawn_checks =
                    pawn_attacks(ksq, us) & self.pieces_of(Piece::Pawn, them) & victim_mask;
                let knight_checks = knight_attacks(ksq) & self.pieces_of(Piece::Knight, them);
                (sliders | pawn_checks | knight_checks).is_empty()
            }
            _ if from == ksq => !self.threats.contains(to),
            _ => {
                if self.pinned.contains(from) && !line(ksq, from).contains(to) {
                    return false;
                }
                if self.checkers.is_empty() {
                    true
                } else if self.checkers.is_multiple() {
                    false
                } else {
                    let checker = self.checkers.lsb().unwrap();
                    to == checker || between(ksq, checker).contains(to)
                }
            }
        }
    }

    /// Verifies that a move resurrected from the transposition table (or a
    /// killer slot) is a real pseudo-legal move of this position, without
    /// generating the move list.
    pub fn is_pseudolegal(&self, mv: Move) -> bool {
        if mv.is_null() {
            return false;
        }
        let us = self.side_to_move;
        let from = mv.from();
        let to = mv.to();
        let piece = self.piece_at(from);
        if piece.is_none() || piece.color() != us {
            return false;
        }
        let occ = self.occupied();

        match mv.flag() {
            MoveFlag::Castle => {
                if piece.piece() != Piece::King {
                    return false;
                }
                let kingside = to > from;
                if self.castling.rook(us, kingside) != Some(to) {
                    return false;
                }
                let king_to = mv.king_castle_target();
                let rook_to = mv.rook_castle_target();
                let movers = Bitboard::from_square(from) | Bitboard::from_square(to);
                let path = between(from, king_to)
                    | Bitboard::from_square(king_to)
                    | between(to, rook_to)
                    | Bitboard::from_square(rook_to);
                (path & occ & !movers).is_empty()
            }
            MoveFlag::EnPassant => {
                piece.piece() == Piece::Pawn
                    && self.ep_square == Some(to)
                    && pawn_attacks(from, us).contains(to)
            }
            MoveFlag::DoublePush => {
                if piece.piece() != Piece::Pawn {
                    return false;
                }
                let start = match us {
                    Color::White => Rank::R2,
                    Color::Black => Rank::R7,
                };
                let step = from.offset(us.pawn_offset());
                let dest = step.and_then(|s| s.offset(us.pawn_offset()));
                from.rank() == start
                    && dest == Some(to)
                    && step.is_some_and(|s| self.piece_at(s).is_none())
                    && self.piece_at(to).is_none()
            }
            flag => {
                let victim = self.piece_at(to);
                if victim.is_some() && victim.color() == us {
                    return false;
                }
                if victim.is_some() && victim.piece() == Piece::King {
                    return false;
                }
                if piece.piece() == Piece::Pawn {
                    let last = match us {
                        Color::White => Rank::R8,
                        Color::Black => Rank::R1,
                    };
                    if (to.rank() == last) != flag.is_promotion() {
                        return false;
                    }
                    if from.offset(us.pawn_offset()) == Some(to) {
                        victim.is_none()
                    } else {
                        pawn_attacks(from, us).contains(to) && victim.is_some()
                    }
                } else {
                    if flag.is_promotion() {
                        return false;
                    }
                    let attacks = match piece.piece() {
                        Piece::Knight => knight_attacks(from),
                        Piece::Bishop => bishop_attacks(from, occ),
                        Piece::Rook => rook_attacks(from, occ),
                        Piece::Queen => bishop_attacks(from, occ) | rook_attacks(from, occ),
                        Piece::King => king_attacks(from),
                        Piece::Pawn => unreachable!(),
                    };
                    attacks.contains(to)
                }
            }
        }
    }

    /// True if the side to move has at least one legal move.
    pub fn has_legal_moves(&self) -> bool {
        let mut moves = MoveList::new();
        movegen::generate_all(self, &mut moves);
        moves.as_slice().iter().any(|&m| self.is_legal(m))
    }

    /// Resolves a UCI move string against this position's legal moves,
    /// accepting both castling conventions.
    pub fn parse_uci_move(&self, s: &str) -> Option<Move> {
        let (from, to, promo) = Move::parse_uci(s)?;
        let mut moves = MoveList::new();
        movegen::generate_all(self, &mut moves);
        moves
            .as_slice()
            .iter()
            .copied()
            .find(|m| {
                if m.from() != from || m.flag().promotion_piece() != promo {
                    return false;
                }
                if m.is_castle() {
                    m.to() == to || (!self.chess960 && m.king_castle_target() == to)
                } else {
                    m.to() == to
                }
            })
            .filter(|&m| self.is_legal(m))
    }

    // ------------------------------------------------------------------
    // Draw detection
    // ------------------------------------------------------------------

    /// 50-move rule: a hundred reversible halfmoves, unless the hundredth
    /// delivers mate.
    pub fn is_fifty_move_draw(&self) -> bool {
        self.halfmove_clock >= 100 && (!self.in_check() || self.has_legal_moves())
    }

    /// Repetition detection against the key history.
    ///
    /// A single earlier occurrence inside the current search tree (closer
    /// than `ply_from_root`) already scores as a draw; positions from the
    /// game prefix must occur twice more.
    pub fn is_repetition(&self, ply_from_root: usize) -> bool {
        let len = self.key_history.len();
        let span = (self.halfmove_clock as usize).min(len);
        let mut reps = 0;
        let mut back = 4;
        while back <= span {
            if self.key_history[len - back] == self.keys.all {
                if back <= ply_from_root {
                    return true;
                }
                reps += 1;
                if reps == 2 {
                    return true;
                }
            }
            back += 2;
        }
        false
    }

    /// Insufficient mating material: KK, KNK, KBK, and KBKB with both
    /// bishops on the same square color.
    pub fn has_insufficient_material(&self) -> bool {
        if (self.piece_bb(Piece::Pawn)
            | self.piece_bb(Piece::Rook)
            | self.piece_bb(Piece::Queen))
        .is_not_empty()
        {
            return false;
        }
        let knights = self.piece_bb(Piece::Knight);
        let bishops = self.piece_bb(Piece::Bishop);
        let minors = knights | bishops;
        match minors.count() {
            0 | 1 => true,
            2 => {
                // Two bishops on the same square color cannot mate; any
                // other pair of minors can (at least in theory, via help).
                knights.is_empty()
                    && ((bishops & Bitboard::DARK_SQUARES).count() != 1)
            }
            _ => false,
        }
    }

    /// Upcoming-repetition detection: true if some reversible move from the
    /// recent history can take the game back to an already-seen position.
    pub fn has_cycle(&self, ply_from_root: usize) -> bool {
        let len = self.key_history.len();
        let span = (self.halfmove_clock as usize).min(len);
        if span < 3 {
            return false;
        }

        let occ = self.occupied();
        let cuckoo = cuckoo::table();
        let mut back = 3;
        while back <= span {
            let move_key = self.keys.all ^ self.key_history[len - back];
            if let Some((a, b)) = cuckoo.probe(move_key) {
                if (between(a, b) & occ).is_empty() {
                    if ply_from_root > back {
                        return true;
                    }
                    // Crossing the root: only our own piece can close the
                    // cycle on our turn.
                    let piece = if self.piece_at(a).is_some() {
                        self.piece_at(a)
                    } else {
                        self.piece_at(b)
                    };
                    if piece.is_some() && piece.color() == self.side_to_move {
                        return true;
                    }
                }
            }
            back += 2;
        }
        false
    }

    /// ASCII board diagram (used by the `d` debug command).
    pub fn to_diagram(&self) -> String {
        let mut out = String::new();
        for rank in (0..8).rev() {
            out.push_str(&format!("{} ", rank + 1));
            for file in 0..8 {
                // SAFETY: rank and file are both < 8
                let sq = unsafe { Square::from_index_unchecked(rank * 8 + file) };
                out.push(self.piece_at(sq).to_char());
                out.push(' ');
            }
            out.push('\n');
        }
        out.push_str("  a b c d e f g h\n");
        out
    }
}

impl Default for Position {
    fn default() -> Self {
        Self::startpos()
    }
}

impl std::fmt::Display for Position {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.to_diagram())
    }
}

/// Bitboard of a whole rank.
fn rank_bb(rank: Rank) -> Bitboard {
    Bitboard(0xFFu64 << (rank.index() * 8))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::movegen::generate_all;
    use crate::observer::NullObserver;

    fn legal_moves(pos: &Position) -> MoveList {
        let mut moves = MoveList::new();
        generate_all(pos, &mut moves);
        moves.retain(|&m| pos.is_legal(m));
        moves
    }

    #[test]
    fn startpos_basics() {
        let pos = Position::startpos();
        assert_eq!(pos.side_to_move(), Color::White);
        assert_eq!(pos.occupied().count(), 32);
        assert_eq!(pos.king_square(Color::White), Square::E1);
        assert_eq!(pos.king_square(Color::Black), Square::E8);
        assert!(!pos.in_check());
        assert!(pos.pinned().is_empty());
        assert_eq!(pos.castling().rook(Color::White, true), Some(Square::H1));
        assert_eq!(pos.castling().rook(Color::White, false), Some(Square::A1));
        assert_eq!(pos.to_fen(), FenParser::STARTPOS);
    }

    #[test]
    fn fen_roundtrip() {
        let fens = [
            "r1bqkbnr/pppp1ppp/2n5/4p3/4P3/5N2/PPPP1PPP/RNBQKB1R w KQkq - 2 3",
            "8/8/8/3K4/8/8/5k2/8 w - - 0 1",
            "rnbqkbnr/pppppppp/8/8/4P3/8/PPPP1PPP/RNBQKBNR b KQkq e3 0 1",
            "r3k2r/pppppppp/8/8/8/8/PPPPPPPP/R3K2R w - - 12 34",
        ];
        for fen in fens {
            let pos = Position::from_fen(fen).unwrap();
            assert_eq!(pos.to_fen(), fen);
        }
    }

    #[test]
    fn illegal_fens_are_rejected() {
        // No black king.
        assert!(Position::from_fen("8/8/8/8/8/8/8/4K3 w - - 0 1").is_err());
        // Two white kings.
        assert!(Position::from_fen("4k3/8/8/8/8/8/8/2K1K3 w - - 0 1").is_err());
        // Side not to move is in check.
        assert!(Position::from_fen("4k3/4R3/8/8/8/8/8/4K3 w - - 0 1").is_err());
        // Pawn on the back rank.
        assert!(Position::from_fen("4k3/8/8/8/8/8/8/P3K3 w - - 0 1").is_err());
        // Castling right without a rook.
        assert!(Position::from_fen("4k3/8/8/8/8/8/8/4K3 w K - 0 1").is_err());
    }

    #[test]
    fn make_unmake_roundtrip_startpos() {
        let mut pos = Position::startpos();
        let reference = pos.clone();
        let moves = legal_moves(&pos);
        assert_eq!(moves.len(), 20);

        for &mv in moves.as_slice() {
            pos.make(mv, &mut NullObserver);
            assert_ne!(pos.key(), reference.key());
            pos.unmake(mv, &mut NullObserver);
            assert_eq!(pos, reference);
        }
    }

    #[test]
    fn make_unmake_roundtrip_kiwipete() {
        let fen = "r3k2r/p1ppqpb1/bn2pnp1/3PN3/1p2P3/2N2Q1p/PPPBBPPP/R3K2R w KQkq - 0 1";
        let mut pos = Position::from_fen(fen).unwrap();
        let reference = pos.clone();

        for &mv in legal_moves(&pos).as_slice() {
            pos.make(mv, &mut NullObserver);
            pos.unmake(mv, &mut NullObserver);
            assert_eq!(pos, reference, "after {mv:?}");
        }
    }

    #[test]
    fn null_move_roundtrip() {
        let mut pos = Position::from_fen(
            "rnbqkbnr/pppppppp/8/8/4P3/8/PPPP1PPP/RNBQKBNR b KQkq e3 0 1",
        )
        .unwrap();
        let reference = pos.clone();
        pos.make_null(&mut NullObserver);
        assert_eq!(pos.side_to_move(), Color::White);
        assert_eq!(pos.ep_square(), None);
        pos.unmake_null(&mut NullObserver);
        assert_eq!(pos, reference);
    }

    #[test]
    fn castling_make_unmake() {
        let fen = "r3k2r/pppppppp/8/8/8/8/PPPPPPPP/R3K2R w KQkq - 0 1";
        let mut pos = Position::from_fen(fen).unwrap();
        let reference = pos.clone();

        let short = pos.parse_uci_move("e1g1").unwrap();
        assert_eq!(short.flag(), MoveFlag::Castle);
        pos.make(short, &mut NullObserver);
        assert_eq!(pos.piece_at(Square::G1), ColoredPiece::WHITE_KING);
        assert_eq!(
            pos.piece_at(Square::F1),
            ColoredPiece::new(Piece::Rook, Color::White)
        );
        assert_eq!(pos.castling().rook(Color::White, true), None);
        assert_eq!(pos.castling().rook(Color::White, false), None);
        assert_eq!(pos.castling().rook(Color::Black, true), Some(Square::H8));
        pos.unmake(short, &mut NullObserver);
        assert_eq!(pos, reference);
    }

    #[test]
    fn en_passant_make_unmake() {
        let fen = "rnbqkbnr/pppp1ppp/8/4pP2/8/8/PPPPP1PP/RNBQKBNR w KQkq e6 0 3";
        let mut pos = Position::from_fen(fen).unwrap();
        let reference = pos.clone();

        let ep = pos.parse_uci_move("f5e6").unwrap();
        assert_eq!(ep.flag(), MoveFlag::EnPassant);
        pos.make(ep, &mut NullObserver);
        assert_eq!(
            pos.piece_at(Square::from_algebraic("e6").unwrap()),
            ColoredPiece::WHITE_PAWN
        );
        assert!(pos
            .piece_at(Square::from_algebraic("e5").unwrap())
            .is_none());
        pos.unmake(ep, &mut NullObserver);
        assert_eq!(pos, reference);
    }

    #[test]
    fn promotion_make_unmake() {
        let mut pos = Position::from_fen("8/P7/8/8/8/8/8/4K2k w - - 0 1").unwrap();
        let reference = pos.clone();
        let promo = pos.parse_uci_move("a7a8q").unwrap();
        pos.make(promo, &mut NullObserver);
        assert_eq!(
            pos.piece_at(Square::A8),
            ColoredPiece::new(Piece::Queen, Color::White)
        );
        pos.unmake(promo, &mut NullObserver);
        assert_eq!(pos, reference);
    }

    #[test]
    fn pinned_piece_may_only_move_on_the_ray() {
        // Bishop on e2 is pinned by the rook on e8.
        let pos = Position::from_fen("4r1k1/8/8/8/8/8/4B3/4K3 w - - 0 1").unwrap();
        let bishop = Square::from_algebraic("e2").unwrap();
        assert!(pos.pinned().contains(bishop));
        let moves = legal_moves(&pos);
        assert!(!moves
            .as_slice()
            .iter()
            .any(|m| m.from() == bishop));
    }

    #[test]
    fn check_evasions_only() {
        // White king on e1 checked by the rook on e8.
        let pos = Position::from_fen("4r2k/8/8/8/8/8/3P4/3QK3 w - - 0 1").unwrap();
        assert!(pos.in_check());
        let moves = legal_moves(&pos);
        // King steps off the file, or the queen blocks on e2.
        for m in moves.as_slice() {
            let blocks = m.to() == Square::from_algebraic("e2").unwrap();
            let king_moves = m.from() == Square::E1;
            assert!(blocks || king_moves, "{m:?} is not an evasion");
        }
    }

    #[test]
    fn king_cannot_retreat_along_checking_ray() {
        let pos = Position::from_fen("4k3/8/8/8/4r3/8/8/4K3 w - - 0 1").unwrap();
        let moves = legal_moves(&pos);
        // Stepping straight back to e2 keeps the king on the checking ray.
        assert!(!moves
            .as_slice()
            .iter()
            .any(|m| m.to() == Square::from_algebraic("e2").unwrap()));
        assert!(moves.contains(Move::normal(Square::E1, Square::D1)));
    }

    #[test]
    fn tt_move_validation() {
        let pos = Position::startpos();
        assert!(pos.is_pseudolegal(pos.parse_uci_move("e2e4").unwrap()));
        assert!(pos.is_pseudolegal(pos.parse_uci_move("g1f3").unwrap()));
        // Moving an empty square.
        assert!(!pos.is_pseudolegal(Move::normal(
            Square::from_algebraic("e4").unwrap(),
            Square::from_algebraic("e5").unwrap()
        )));
        // Moving the opponent's piece.
        assert!(!pos.is_pseudolegal(Move::normal(
            Square::from_algebraic("e7").unwrap(),
            Square::from_algebraic("e5").unwrap()
        )));
        // A blocked slider move.
        assert!(!pos.is_pseudolegal(Move::normal(Square::A1, Square::A4)));
        // Castling with pieces in the way.
        assert!(!pos.is_pseudolegal(Move::new(Square::E1, Square::H1, MoveFlag::Castle)));
    }

    #[test]
    fn pseudolegal_never_disagrees_with_generation() {
        let fens = [
            FenParser::STARTPOS,
            "r3k2r/p1ppqpb1/bn2pnp1/3PN3/1p2P3/2N2Q1p/PPPBBPPP/R3K2R w KQkq - 0 1",
            "8/2p5/3p4/KP5r/1R3p1k/8/4P1P1/8 w - - 0 1",
            "rnbqkbnr/pppp1ppp/8/4pP2/8/8/PPPPP1PP/RNBQKBNR w KQkq e6 0 3",
        ];
        for fen in fens {
            let pos = Position::from_fen(fen).unwrap();
            let mut moves = MoveList::new();
            generate_all(&pos, &mut moves);
            for &mv in moves.as_slice() {
                assert!(pos.is_pseudolegal(mv), "{fen}: {mv:?}");
            }
        }
    }

    #[test]
    fn incremental_keys_match_scratch_recompute() {
        let mut pos = Position::from_fen(
            "r3k2r/p1ppqpb1/bn2pnp1/3PN3/1p2P3/2N2Q1p/PPPBBPPP/R3K2R w KQkq - 0 1",
        )
        .unwrap();
        for &mv in legal_moves(&pos.clone()).as_slice() {
            pos.make(mv, &mut NullObserver);
            assert_eq!(pos.keys(), &pos.recompute_keys(), "after {mv:?}");
            pos.unmake(mv, &mut NullObserver);
        }
    }

    #[test]
    fn fifty_move_rule() {
        let pos = Position::from_fen("4k3/8/8/8/8/8/8/4K2R w - - 100 80").unwrap();
        assert!(pos.is_fifty_move_draw());
        let pos = Position::from_fen("4k3/8/8/8/8/8/8/4K2R w - - 99 80").unwrap();
        assert!(!pos.is_fifty_move_draw());
    }

    #[test]
    fn repetition_by_shuffling() {
        let mut pos = Position::startpos();
        let seq = ["g1f3", "g8f6", "f3g1", "f6g8", "g1f3", "g8f6", "f3g1", "f6g8"];
        for (i, s) in seq.iter().enumerate() {
            let mv = pos.parse_uci_move(s).unwrap();
            pos.make(mv, &mut NullObserver);
            // After the fourth move the position has occurred twice; with
            // everything inside the "search tree" a single revisit counts.
            if i == 3 {
                assert!(pos.is_repetition(seq.len()));
                assert!(!pos.is_repetition(0));
            }
        }
        // Back at the start position for the third time: a true threefold.
        assert!(pos.is_repetition(0));
    }

    #[test]
    fn upcoming_repetition_cycle() {
        let mut pos = Position::startpos();
        for s in ["g1f3", "g8f6", "f3g1", "f6g8", "g1f3", "g8f6"] {
            let mv = pos.parse_uci_move(s).unwrap();
            pos.make(mv, &mut NullObserver);
        }
        // White can play Nf3-g1 to repeat: a cycle is upcoming.
        assert!(pos.has_cycle(6));
    }

    #[test]
    fn insufficient_material_cases() {
        assert!(Position::from_fen("4k3/8/8/8/8/8/8/4K3 w - - 0 1")
            .unwrap()
            .has_insufficient_material());
        assert!(Position::from_fen("4k3/8/8/8/8/8/8/3NK3 w - - 0 1")
            .unwrap()
            .has_insufficient_material());
        assert!(Position::from_fen("4k3/8/8/8/8/8/8/3BK3 w - - 0 1")
            .unwrap()
            .has_insufficient_material());
        // Same-colored bishops.
        assert!(Position::from_fen("3bk3/8/8/8/8/8/8/3BK3 w - - 0 1")
            .unwrap()
            .has_insufficient_material());
        // Opposite-colored bishops can still mate.
        assert!(!Position::from_fen("2b1k3/8/8/8/8/8/8/3BK3 w - - 0 1")
            .unwrap()
            .has_insufficient_material());
        // A single pawn is enough to play on.
        assert!(!Position::from_fen("4k3/8/8/8/8/8/4P3/4K3 w - - 0 1")
            .unwrap()
            .has_insufficient_material());
        assert!(!Position::from_fen("4k3/8/8/8/8/8/8/3QK3 w - - 0 1")
            .unwrap()
            .has_insufficient_material());
    }

    #[test]
    fn board_consistency_under_random_play() {
        // Walk a fixed pseudo-random line and verify mailbox/bitboard
        // agreement at every step.
        let mut pos = Position::startpos();
        let mut state = 0x853c_49e6_748f_ea9bu64;
        for _ in 0..60 {
            let moves = legal_moves(&pos);
            if moves.is_empty() {
                break;
            }
            state ^= state << 13;
            state ^= state >> 7;
            state ^= state << 17;
            let mv = moves[(state % moves.len() as u64) as usize];
            pos.make(mv, &mut NullObserver);

            let mut occupancy = Bitboard::EMPTY;
            for piece in Piece::ALL {
                for color in Color::ALL {
                    for sq in pos.pieces_of(piece, color) {
                        assert_eq!(pos.piece_at(sq), ColoredPiece::new(piece, color));
                        occupancy |= Bitboard::from_square(sq);
                    }
                }
            }
            assert_eq!(occupancy, pos.occupied());
            assert!((pos.color_bb(Color::White) & pos.color_bb(Color::Black)).is_empty());
            assert_eq!(pos.keys(), &pos.recompute_keys());
        }
    }

    #[test]
    fn chess960_castling_fen() {
        let mut pos =
            Position::from_fen("r3k2r/pppppppp/8/8/8/8/PPPPPPPP/R3K2R w HAha - 0 1").unwrap();
        pos.set_chess960(true);
        assert_eq!(pos.castling().rook(Color::White, true), Some(Square::H1));
        assert_eq!(pos.castling().rook(Color::White, false), Some(Square::A1));
        let mv = pos.parse_uci_move("e1h1").unwrap();
        assert!(mv.is_castle());
        assert_eq!(mv.to_uci(true), "e1h1");
        assert_eq!(mv.to_uci(false), "e1g1");
    }
}
