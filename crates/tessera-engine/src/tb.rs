//! Endgame tablebase interface.
//!
//! Probing is an external collaborator behind a deliberately narrow
//! surface: a WDL verdict for a position and an optional root move filter.
//! [`NoTablebase`] is the default implementation; it owns no files and
//! never hits.

use crate::movegen::MoveList;
use crate::position::Position;
use tessera_core::Move;

/// A tablebase verdict for the side to move.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TbWdl {
    Loss,
    Draw,
    Win,
}

/// The probing interface the engine consumes.
pub trait TablebaseProber: Send + Sync {
    /// Probes the position, if it is within the configured piece limit.
    fn probe_wdl(&self, pos: &Position) -> Option<TbWdl>;

    /// Filters the root move list down to the moves preserving the best
    /// tablebase outcome. `None` means "no opinion, search everything".
    fn probe_root(&self, pos: &Position, moves: &MoveList) -> Option<Vec<Move>>;
}

/// The default prober: no tablebases configured.
pub struct NoTablebase;

impl TablebaseProber for NoTablebase {
    fn probe_wdl(&self, _pos: &Position) -> Option<TbWdl> {
        None
    }

    fn probe_root(&self, _pos: &Position, _moves: &MoveList) -> Option<Vec<Move>> {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::movegen::generate_all;

    #[test]
    fn no_tablebase_never_hits() {
        let pos = Position::from_fen("4k3/8/8/8/8/8/8/4K2R w - - 0 1").unwrap();
        let prober = NoTablebase;
        assert_eq!(prober.probe_wdl(&pos), None);

        let mut moves = MoveList::new();
        generate_all(&pos, &mut moves);
        assert_eq!(prober.probe_root(&pos, &moves), None);
    }
}
