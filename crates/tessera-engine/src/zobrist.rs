//! Zobrist hashing for position identification.
//!
//! Every position carries a bundle of five keys, all built from the same
//! table of random numbers:
//! - the overall key over every piece, side to move, castling and en passant;
//! - a pawn-only key;
//! - non-pawn keys for each color;
//! - a "majors" key over rooks, queens and kings.
//!
//! The split keys feed the correction histories and the NNUE refresh logic;
//! the overall key indexes the transposition table and repetition checks.

use tessera_core::{Color, ColoredPiece, File, Square};

/// Zobrist hash keys, generated with a fixed seed for reproducibility.
pub struct ZobristKeys {
    /// Keys for pieces: [colored piece][square].
    pieces: [[u64; 64]; 12],
    /// Key for black to move.
    black_to_move: u64,
    /// Keys for castling rights: [color][kingside?].
    castling: [[u64; 2]; 2],
    /// Keys for the en passant file.
    en_passant: [u64; 8],
}

/// xorshift64 step, usable in const context.
const fn next_random(state: u64) -> (u64, u64) {
    let mut x = state;
    x ^= x << 13;
    x ^= x >> 7;
    x ^= x << 17;
    (x, x)
}

impl ZobristKeys {
    const fn new() -> Self {
        let mut state = 0x9E37_79B9_7F4A_7C15u64; // golden ratio seed
        let mut pieces = [[0u64; 64]; 12];
        let mut castling = [[0u64; 2]; 2];
        let mut en_passant = [0u64; 8];

        let mut piece = 0;
        while piece < 12 {
            let mut square = 0;
            while square < 64 {
                let (new_state, value) = next_random(state);
                state = new_state;
                pieces[piece][square] = value;
                square += 1;
            }
            piece += 1;
        }

        let (new_state, black_to_move) = next_random(state);
        state = new_state;

        let mut color = 0;
        while color < 2 {
            let mut side = 0;
            while side < 2 {
                let (new_state, value) = next_random(state);
                state = new_state;
                castling[color][side] = value;
                side += 1;
            }
            color += 1;
        }

        let mut file = 0;
        while file < 8 {
            let (new_state, value) = next_random(state);
            state = new_state;
            en_passant[file] = value;
            file += 1;
        }

        ZobristKeys {
            pieces,
            black_to_move,
            castling,
            en_passant,
        }
    }

    /// Returns the key for a colored piece on a square.
    #[inline]
    pub const fn piece(&self, piece: ColoredPiece, square: Square) -> u64 {
        debug_assert!(piece.is_some());
        self.pieces[piece.index()][square.index() as usize]
    }

    /// Returns the side-to-move key (XORed in when black is to move).
    #[inline]
    pub const fn side_to_move(&self) -> u64 {
        self.black_to_move
    }

    /// Returns the key for one castling right.
    #[inline]
    pub const fn castling(&self, color: Color, kingside: bool) -> u64 {
        self.castling[color.index()][kingside as usize]
    }

    /// Returns the key for an en passant file.
    #[inline]
    pub const fn en_passant(&self, file: File) -> u64 {
        self.en_passant[file.index() as usize]
    }
}

/// Global Zobrist keys (initialized at compile time).
pub static ZOBRIST: ZobristKeys = ZobristKeys::new();

/// The bundle of incrementally maintained keys carried by a position.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct KeyBundle {
    /// Key over everything: pieces, side to move, castling, en passant file.
    pub all: u64,
    /// Key over pawns only.
    pub pawns: u64,
    /// Keys over the non-pawn pieces of each color.
    pub non_pawn: [u64; 2],
    /// Key over rooks, queens and kings of both colors.
    pub majors: u64,
}

impl KeyBundle {
    /// Folds a piece placement (or removal - XOR is its own inverse) into
    /// every key component that tracks it.
    #[inline]
    pub fn toggle_piece(&mut self, piece: ColoredPiece, square: Square) {
        let key = ZOBRIST.piece(piece, square);
        self.all ^= key;
        match piece.piece() {
            tessera_core::Piece::Pawn => self.pawns ^= key,
            kind => {
                self.non_pawn[piece.color().index()] ^= key;
                if kind.is_major() {
                    self.majors ^= key;
                }
            }
        }
    }

    /// Toggles the side-to-move component of the overall key.
    #[inline]
    pub fn toggle_side_to_move(&mut self) {
        self.all ^= ZOBRIST.side_to_move();
    }

    /// Toggles one castling right in the overall key.
    #[inline]
    pub fn toggle_castling(&mut self, color: Color, kingside: bool) {
        self.all ^= ZOBRIST.castling(color, kingside);
    }

    /// Toggles an en passant file in the overall key.
    #[inline]
    pub fn toggle_en_passant(&mut self, file: File) {
        self.all ^= ZOBRIST.en_passant(file);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tessera_core::Piece;

    #[test]
    fn keys_are_nonzero() {
        assert_ne!(ZOBRIST.side_to_move(), 0);
        assert_ne!(ZOBRIST.piece(ColoredPiece::WHITE_PAWN, Square::A1), 0);
        assert_ne!(ZOBRIST.castling(Color::White, true), 0);
        assert_ne!(ZOBRIST.en_passant(File::A), 0);
    }

    #[test]
    fn keys_are_distinct() {
        let k1 = ZOBRIST.piece(ColoredPiece::WHITE_PAWN, Square::A1);
        let k2 = ZOBRIST.piece(ColoredPiece::WHITE_PAWN, Square::B1);
        let k3 = ZOBRIST.piece(ColoredPiece::BLACK_PAWN, Square::A1);
        let k4 = ZOBRIST.piece(ColoredPiece::new(Piece::Knight, Color::White), Square::A1);

        assert_ne!(k1, k2);
        assert_ne!(k1, k3);
        assert_ne!(k1, k4);
    }

    #[test]
    fn toggle_is_involution() {
        let mut bundle = KeyBundle::default();
        let before = bundle;
        let knight = ColoredPiece::new(Piece::Knight, Color::Black);

        bundle.toggle_piece(knight, Square::C1);
        assert_ne!(bundle, before);
        assert_eq!(bundle.pawns, 0);
        assert_ne!(bundle.non_pawn[Color::Black.index()], 0);
        assert_eq!(bundle.non_pawn[Color::White.index()], 0);
        assert_eq!(bundle.majors, 0);

        bundle.toggle_piece(knight, Square::C1);
        assert_eq!(bundle, before);
    }

    #[test]
    fn pawn_key_tracks_only_pawns() {
        let mut bundle = KeyBundle::default();
        bundle.toggle_piece(ColoredPiece::WHITE_PAWN, Square::E1);
        assert_ne!(bundle.pawns, 0);
        assert_eq!(bundle.non_pawn[0], 0);
        assert_eq!(bundle.majors, 0);
    }

    #[test]
    fn majors_key_tracks_rook_queen_king() {
        for piece in [Piece::Rook, Piece::Queen, Piece::King] {
            let mut bundle = KeyBundle::default();
            bundle.toggle_piece(ColoredPiece::new(piece, Color::White), Square::D1);
            assert_ne!(bundle.majors, 0, "{piece}");
        }
        let mut bundle = KeyBundle::default();
        bundle.toggle_piece(ColoredPiece::new(Piece::Bishop, Color::White), Square::D1);
        assert_eq!(bundle.majors, 0);
    }
}
