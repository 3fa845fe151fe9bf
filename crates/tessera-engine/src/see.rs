//! Static exchange evaluation.
//!
//! Answers the threshold question "does this move win at least `threshold`
//! material in the forced exchange on its destination square?" without
//! making any moves: both sides keep recapturing with their least valuable
//! attacker, x-ray attackers are revealed as pieces leave the board, and a
//! pinned piece may only take part while the target square lies on its pin
//! ray.

use crate::attacks::{bishop_attacks, line, rook_attacks};
use crate::params::{piece_value, Score};
use crate::position::Position;
use crate::Bitboard;
use tessera_core::{Color, Move, MoveFlag, Piece, Square};

/// Returns true if the exchange started by `mv` nets at least `threshold`.
pub fn see(pos: &Position, mv: Move, threshold: Score) -> bool {
    // Castling neither wins nor loses material.
    if mv.flag() == MoveFlag::Castle {
        return threshold <= 0;
    }

    let us = pos.side_to_move();
    let from = mv.from();
    let sq = mv.to();
    let promo = mv.flag().promotion_piece();

    let gain = match mv.flag() {
        MoveFlag::EnPassant => piece_value(Piece::Pawn),
        flag if flag.is_promotion() => {
            captured_value(pos, sq) + piece_value(promo.unwrap()) - piece_value(Piece::Pawn)
        }
        _ => captured_value(pos, sq),
    };

    // If winning every exchanged piece for free is not enough, give up.
    let mut balance = gain - threshold;
    if balance < 0 {
        return false;
    }

    // If we survive losing the piece we just moved, we cannot come out
    // below the threshold.
    let first_piece = promo.unwrap_or_else(|| pos.piece_at(from).piece());
    balance -= piece_value(first_piece);
    if balance >= 0 {
        return true;
    }

    let mut occ = pos.occupied() ^ Bitboard::from_square(from);
    if mv.flag() == MoveFlag::EnPassant {
        // SAFETY: the ep victim square is on the board
        let victim =
            unsafe { Square::from_index_unchecked((sq.index() as i8 - us.pawn_offset()) as u8) };
        occ ^= Bitboard::from_square(victim);
    }

    let mut attackers = pos.attackers_to(sq, occ) & occ;
    let pinned = [
        pos.pinned_pieces(Color::White),
        pos.pinned_pieces(Color::Black),
    ];

    let diagonal = pos.piece_bb(Piece::Bishop) | pos.piece_bb(Piece::Queen);
    let orthogonal = pos.piece_bb(Piece::Rook) | pos.piece_bb(Piece::Queen);

    let mut color = us.opposite();
    loop {
        let mut my_attackers = attackers & pos.color_bb(color) & occ;

        // A pinned piece may only recapture along its pin ray.
        let restricted = my_attackers & pinned[color.index()];
        if restricted.is_not_empty() {
            my_attackers ^= restricted;
            for a in restricted {
                if line(pos.king_square(color), a).contains(sq) {
                    my_attackers |= Bitboard::from_square(a);
                }
            }
        }

        if my_attackers.is_empty() {
            break;
        }

        // Least valuable attacker first.
        let mut attacker = Piece::King;
        let mut attacker_sq = pos.king_square(color);
        for piece in Piece::ALL {
            let candidates = my_attackers & pos.piece_bb(piece);
            if let Some(found) = candidates.lsb() {
                attacker = piece;
                attacker_sq = found;
                break;
            }
        }

        occ ^= Bitboard::from_square(attacker_sq);

        // Stepping off the square can reveal an x-ray attacker behind.
        if matches!(attacker, Piece::Pawn | Piece::Bishop | Piece::Queen) {
            attackers |= bishop_attacks(sq, occ) & diagonal;
        }
        if matches!(attacker, Piece::Rook | Piece::Queen) {
            attackers |= rook_attacks(sq, occ) & orthogonal;
        }
        attackers &= occ;

        color = color.opposite();
        balance = -balance - 1 - piece_value(attacker);
        if balance >= 0 {
            // Capturing with the king is only possible if the opponent has
            // no answer left.
            if attacker == Piece::King && (attackers & pos.color_bb(color)).is_not_empty() {
                color = color.opposite();
            }
            break;
        }
    }

    // Whoever is to move when the exchange fizzles out has lost it.
    color != us
}

/// Value of the piece currently standing on `sq`, zero when empty.
#[inline]
fn captured_value(pos: &Position, sq: Square) -> Score {
    let piece = pos.piece_at(sq);
    if piece.is_some() {
        piece_value(piece.piece())
    } else {
        0
    }
}
