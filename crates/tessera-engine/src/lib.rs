//! The Tessera chess engine.
//!
//! This crate contains everything between the UCI text protocol and the
//! chessboard:
//! - [`Bitboard`] and the attack tables (magic sliding attacks, leapers,
//!   ray tables)
//! - [`Position`]: board state, zobrist key bundle, legality oracle, and
//!   incremental make/unmake with NNUE observer callbacks
//! - pseudo-legal move generation split into noisy and quiet halves
//! - [`see::see`]: the static exchange evaluator
//! - [`nnue`]: the incremental, lazily updated network evaluator
//! - [`history`]: quiet/noisy/continuation/correction history tables
//! - [`tt::TranspositionTable`]: the shared lock-free cache
//! - [`movepick::MovePicker`]: the staged move stream
//! - [`search`]: iterative deepening, aspiration windows, PVS and the
//!   lazy-SMP worker pool
//! - [`limits`]: time/node/depth stop oracles
//!
//! The crate is protocol-free: the `tessera` binary owns stdin/stdout and
//! feeds the [`search::threads::SearchPool`] through
//! [`search::SearchJob`]s.

mod bitboard;

pub mod attacks;
pub mod cuckoo;
pub mod history;
pub mod limits;
pub mod movegen;
pub mod movepick;
pub mod nnue;
pub mod observer;
pub mod params;
pub mod perft;
pub mod position;
pub mod search;
pub mod see;
pub mod tb;
pub mod tt;
pub mod zobrist;

pub use bitboard::Bitboard;
pub use position::Position;
