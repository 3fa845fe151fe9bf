//! Cuckoo table for upcoming-repetition detection.
//!
//! Every reversible move (a non-pawn piece moving between two squares on an
//! otherwise empty board) has a characteristic key: the XOR of the two
//! piece-square keys and the side-to-move key. If the XOR of the current
//! position key with a key from the recent history matches one of these move
//! keys, some intermediate move can repeat a previous position. The keys are
//! kept in a closed-addressing hash table probed at two slots, so membership
//! is two lookups.

use crate::attacks::{bishop_attacks, king_attacks, knight_attacks, rook_attacks};
use crate::zobrist::ZOBRIST;
use crate::Bitboard;
use std::sync::OnceLock;
use tessera_core::{Color, ColoredPiece, Piece, Square};

/// Number of slots; both hashes map into this range.
const TABLE_SIZE: usize = 8192;

/// First probe slot.
#[inline]
pub fn h1(key: u64) -> usize {
    (key & 0x1FFF) as usize
}

/// Second probe slot.
#[inline]
pub fn h2(key: u64) -> usize {
    ((key >> 16) & 0x1FFF) as usize
}

/// One reversible move: its key and the two squares it connects.
#[derive(Clone, Copy)]
struct Slot {
    key: u64,
    from: Square,
    to: Square,
}

pub struct CuckooTable {
    slots: [Option<Slot>; TABLE_SIZE],
}

static CUCKOO: OnceLock<CuckooTable> = OnceLock::new();

/// Returns the global table, building it on first use.
pub fn table() -> &'static CuckooTable {
    CUCKOO.get_or_init(CuckooTable::new)
}

impl CuckooTable {
    fn new() -> Self {
        let mut slots: [Option<Slot>; TABLE_SIZE] = [None; TABLE_SIZE];
        let mut count = 0usize;

        for color in Color::ALL {
            for piece in [
                Piece::Knight,
                Piece::Bishop,
                Piece::Rook,
                Piece::Queen,
                Piece::King,
            ] {
                for from_idx in 0..64u8 {
                    let from = Square::from_index(from_idx).unwrap();
                    let reachable = match piece {
                        Piece::Knight => knight_attacks(from),
                        Piece::Bishop => bishop_attacks(from, Bitboard::EMPTY),
                        Piece::Rook => rook_attacks(from, Bitboard::EMPTY),
                        Piece::Queen => {
                            bishop_attacks(from, Bitboard::EMPTY)
                                | rook_attacks(from, Bitboard::EMPTY)
                        }
                        Piece::King => king_attacks(from),
                        Piece::Pawn => unreachable!(),
                    };
                    for to in reachable {
                        // Each unordered pair once.
                        if to <= from {
                            continue;
                        }
                        let cp = ColoredPiece::new(piece, color);
                        let key = ZOBRIST.piece(cp, from)
                            ^ ZOBRIST.piece(cp, to)
                            ^ ZOBRIST.side_to_move();
                        insert(&mut slots, Slot { key, from, to });
                        count += 1;
                    }
                }
            }
        }

        // All reversible move pairs of both colors.
        debug_assert_eq!(count, 3668);

        CuckooTable { slots }
    }

    /// If `key` is the characteristic key of some reversible move, returns
    /// the two squares that move connects.
    #[inline]
    pub fn probe(&self, key: u64) -> Option<(Square, Square)> {
        for idx in [h1(key), h2(key)] {
            if let Some(slot) = self.slots[idx] {
                if slot.key == key {
                    return Some((slot.from, slot.to));
                }
            }
        }
        None
    }
}

/// Cuckoo insertion: displace whatever occupies the slot and re-home it at
/// its alternate slot until a free slot is found.
fn insert(slots: &mut [Option<Slot>; TABLE_SIZE], mut slot: Slot) {
    let mut idx = h1(slot.key);
    loop {
        match slots[idx].replace(slot) {
            None => return,
            Some(displaced) => {
                slot = displaced;
                idx = if idx == h1(slot.key) {
                    h2(slot.key)
                } else {
                    h1(slot.key)
                };
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn knight_move_key_is_found() {
        let cp = ColoredPiece::new(Piece::Knight, Color::White);
        let from = Square::from_algebraic("g1").unwrap();
        let to = Square::from_algebraic("f3").unwrap();
        let key = ZOBRIST.piece(cp, from) ^ ZOBRIST.piece(cp, to) ^ ZOBRIST.side_to_move();

        let (a, b) = table().probe(key).expect("reversible move key present");
        assert_eq!((a.min(b), a.max(b)), (from.min(to), from.max(to)));
    }

    #[test]
    fn pawn_move_key_is_absent() {
        let cp = ColoredPiece::WHITE_PAWN;
        let from = Square::from_algebraic("e2").unwrap();
        let to = Square::from_algebraic("e3").unwrap();
        let key = ZOBRIST.piece(cp, from) ^ ZOBRIST.piece(cp, to) ^ ZOBRIST.side_to_move();
        assert!(table().probe(key).is_none());
    }

    #[test]
    fn random_keys_mostly_miss() {
        let mut state = 0xdead_beef_cafe_f00du64;
        let mut hits = 0;
        for _ in 0..1000 {
            state ^= state << 13;
            state ^= state >> 7;
            state ^= state << 17;
            if table().probe(state).is_some() {
                hits += 1;
            }
        }
        assert_eq!(hits, 0);
    }
}
