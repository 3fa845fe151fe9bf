//! NNUE network weights and the quantised forward pass.
//!
//! Architecture: 768 input features per perspective (12 piece kinds x 64
//! squares, horizontally mirrored when that perspective's king stands on
//! files e-h), a 768->256 feature transformer shared by both perspectives,
//! clipped-ReLU activation, and 8 output buckets selected by the number of
//! men on the board.
//!
//! Quantisation: accumulator activations are scaled by `QA`, output weights
//! by `QB`, output biases by `QA * QB`. The final score is
//! `(sum + bias) * SCALE / (QA * QB)` centipawns.

use std::io::Read;
use std::path::Path;
use thiserror::Error;
use tessera_core::{Color, ColoredPiece, Square};

/// Input features per perspective.
pub const FEATURES: usize = 768;

/// Feature transformer width (accumulator size per perspective).
pub const L1: usize = 256;

/// Number of output buckets.
pub const OUTPUT_BUCKETS: usize = 8;

/// Activation ceiling.
pub const QA: i32 = 255;

/// Output weight scale.
pub const QB: i32 = 64;

/// Centipawn scale of the raw network output.
pub const SCALE: i32 = 400;

/// Exact byte length of a weights file for this architecture.
pub const FILE_SIZE: usize =
    2 * (FEATURES * L1 + L1 + OUTPUT_BUCKETS * 2 * L1 + OUTPUT_BUCKETS);

#[derive(Debug, Error)]
pub enum NetworkError {
    #[error("failed to read network file: {0}")]
    Io(#[from] std::io::Error),
    #[error("network file has {got} bytes, expected {expected}")]
    WrongSize { got: usize, expected: usize },
}

/// A complete set of network weights.
pub struct Network {
    /// Feature transformer weights, `[feature][neuron]`.
    ft_weights: Box<[i16]>,
    /// Feature transformer biases.
    ft_bias: Box<[i16]>,
    /// Output weights, `[bucket][2 * L1]`; the side to move's view occupies
    /// the first half of each bucket row.
    out_weights: Box<[i16]>,
    /// Output biases, one per bucket.
    out_bias: [i16; OUTPUT_BUCKETS],
}

impl Network {
    /// Loads a network from raw little-endian bytes. The layout is fixed:
    /// feature weights, feature biases, output weights, output biases, all
    /// as packed i16. Corruption is detected by size.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, NetworkError> {
        if bytes.len() != FILE_SIZE {
            return Err(NetworkError::WrongSize {
                got: bytes.len(),
                expected: FILE_SIZE,
            });
        }

        let mut values = bytes
            .chunks_exact(2)
            .map(|c| i16::from_le_bytes([c[0], c[1]]));
        let mut take = |n: usize| -> Box<[i16]> {
            values.by_ref().take(n).collect::<Vec<_>>().into_boxed_slice()
        };

        let ft_weights = take(FEATURES * L1);
        let ft_bias = take(L1);
        let out_weights = take(OUTPUT_BUCKETS * 2 * L1);
        let bias_vec = take(OUTPUT_BUCKETS);
        let mut out_bias = [0i16; OUTPUT_BUCKETS];
        out_bias.copy_from_slice(&bias_vec);

        Ok(Network {
            ft_weights,
            ft_bias,
            out_weights,
            out_bias,
        })
    }

    /// Loads a network file from disk.
    pub fn from_file(path: &Path) -> Result<Self, NetworkError> {
        let mut bytes = Vec::new();
        std::fs::File::open(path)?.read_to_end(&mut bytes)?;
        Self::from_bytes(&bytes)
    }

    /// The built-in fallback network.
    ///
    /// Encodes a classical material + piece-square evaluation in network
    /// form: one pair of feature-transformer neurons carries the (clipped)
    /// material balance of each perspective, every other neuron is silent.
    /// Weak, but deterministic and self-contained, so the engine plays real
    /// chess before any `EvalFile` is configured.
    pub fn builtin() -> Self {
        let mut ft_weights = vec![0i16; FEATURES * L1].into_boxed_slice();
        let mut ft_bias = vec![0i16; L1].into_boxed_slice();
        let mut out_weights = vec![0i16; OUTPUT_BUCKETS * 2 * L1].into_boxed_slice();

        // Bias both balance neurons to the middle of the clip range so the
        // difference (n+ - n-) is linear in the balance.
        ft_bias[0] = (QA / 2) as i16;
        ft_bias[1] = (QA / 2) as i16;

        for feature in 0..FEATURES {
            let piece_idx = feature / 64;
            let sq = feature % 64;
            let kind = piece_idx / 2;
            let opponent = piece_idx % 2 == 1;

            // Features are perspective-relative, so the visually written
            // tables are indexed with a vertical flip.
            let score = (MATERIAL[kind] + PST[kind][sq ^ 56]) / BALANCE_GRAIN;
            let signed = if opponent { -score } else { score };
            ft_weights[feature * L1] = signed as i16;
            ft_weights[feature * L1 + 1] = -signed as i16;
        }

        for bucket in 0..OUTPUT_BUCKETS {
            let row = bucket * 2 * L1;
            out_weights[row] = BALANCE_OUT_WEIGHT;
            out_weights[row + 1] = -BALANCE_OUT_WEIGHT;
            out_weights[row + L1] = -BALANCE_OUT_WEIGHT;
            out_weights[row + L1 + 1] = BALANCE_OUT_WEIGHT;
        }

        Network {
            ft_weights,
            ft_bias,
            out_weights,
            out_bias: [0; OUTPUT_BUCKETS],
        }
    }

    /// Feature transformer bias vector.
    #[inline]
    pub fn ft_bias(&self) -> &[i16] {
        &self.ft_bias
    }

    /// The weight column of one input feature.
    #[inline]
    pub fn feature_weights(&self, feature: usize) -> &[i16] {
        &self.ft_weights[feature * L1..(feature + 1) * L1]
    }

    /// Runs the output head over the two finished accumulators.
    pub fn forward(&self, stm_acc: &[i16; L1], ntm_acc: &[i16; L1], bucket: usize) -> i32 {
        debug_assert!(bucket < OUTPUT_BUCKETS);
        let weights = &self.out_weights[bucket * 2 * L1..(bucket + 1) * 2 * L1];

        let mut sum = 0i64;
        for (i, &x) in stm_acc.iter().enumerate() {
            sum += i64::from(crelu(x)) * i64::from(weights[i]);
        }
        for (i, &x) in ntm_acc.iter().enumerate() {
            sum += i64::from(crelu(x)) * i64::from(weights[L1 + i]);
        }

        let scaled = (sum + i64::from(self.out_bias[bucket])) * i64::from(SCALE)
            / (i64::from(QA) * i64::from(QB));
        scaled as i32
    }
}

/// Clipped ReLU.
#[inline]
fn crelu(x: i16) -> i32 {
    i32::from(x).clamp(0, QA)
}

/// Output bucket for a given number of men on the board.
#[inline]
pub fn output_bucket(men: u32) -> usize {
    (((men.saturating_sub(2)) / 4) as usize).min(OUTPUT_BUCKETS - 1)
}

/// The input feature of a piece on a square, seen from one perspective.
///
/// The board is flipped vertically for Black's view and mirrored
/// horizontally while that perspective's king stands on files e-h.
#[inline]
pub fn feature_index(perspective: Color, piece: ColoredPiece, sq: Square, mirror: bool) -> usize {
    let sq = if perspective == Color::Black {
        sq.flip_rank()
    } else {
        sq
    };
    let sq = if mirror { sq.flip_file() } else { sq };
    let kind = piece.piece().index();
    let theirs = (piece.color() != perspective) as usize;
    (kind * 2 + theirs) * 64 + sq.index() as usize
}

/// Whether a king on `sq` puts its perspective in the mirrored half.
#[inline]
pub fn mirrors(sq: Square) -> bool {
    sq.file().index() >= 4
}

/// Granularity of the built-in balance neurons: centipawns per activation
/// step, chosen so a normal material imbalance stays inside the clip range.
const BALANCE_GRAIN: i32 = 32;

/// Output weight paired with [`BALANCE_GRAIN`] so one grain step maps back
/// to roughly its centipawn value after the global rescale.
const BALANCE_OUT_WEIGHT: i16 = 327;

/// Material values for the built-in network.
const MATERIAL: [i32; 6] = [100, 320, 330, 500, 900, 0];

/// Piece-square tables for the built-in network, written rank 8 first (as a
/// board diagram reads) and flipped on use.
#[rustfmt::skip]
const PST: [[i32; 64]; 6] = [
    // Pawn
    [
         0,  0,  0,  0,  0,  0,  0,  0,
        50, 50, 50, 50, 50, 50, 50, 50,
        10, 10, 20, 30, 30, 20, 10, 10,
         5,  5, 10, 25, 25, 10,  5,  5,
         0,  0,  0, 20, 20,  0,  0,  0,
         5, -5,-10,  0,  0,-10, -5,  5,
         5, 10, 10,-20,-20, 10, 10,  5,
         0,  0,  0,  0,  0,  0,  0,  0,
    ],
    // Knight
    [
       -50,-40,-30,-30,-30,-30,-40,-50,
       -40,-20,  0,  0,  0,  0,-20,-40,
       -30,  0, 10, 15, 15, 10,  0,-30,
       -30,  5, 15, 20, 20, 15,  5,-30,
       -30,  0, 15, 20, 20, 15,  0,-30,
       -30,  5, 10, 15, 15, 10,  5,-30,
       -40,-20,  0,  5,  5,  0,-20,-40,
       -50,-40,-30,-30,-30,-30,-40,-50,
    ],
    // Bishop
    [
       -20,-10,-10,-10,-10,-10,-10,-20,
       -10,  0,  0,  0,  0,  0,  0,-10,
       -10,  0,  5, 10, 10,  5,  0,-10,
       -10,  5,  5, 10, 10,  5,  5,-10,
       -10,  0, 10, 10, 10, 10,  0,-10,
       -10, 10, 10, 10, 10, 10, 10,-10,
       -10,  5,  0,  0,  0,  0,  5,-10,
       -20,-10,-10,-10,-10,-10,-10,-20,
    ],
    // Rook
    [
         0,  0,  0,  0,  0,  0,  0,  0,
         5, 10, 10, 10, 10, 10, 10,  5,
        -5,  0,  0,  0,  0,  0,  0, -5,
        -5,  0,  0,  0,  0,  0,  0, -5,
        -5,  0,  0,  0,  0,  0,  0, -5,
        -5,  0,  0,  0,  0,  0,  0, -5,
        -5,  0,  0,  0,  0,  0,  0, -5,
         0,  0,  0,  5,  5,  0,  0,  0,
    ],
    // Queen
    [
       -20,-10,-10, -5, -5,-10,-10,-20,
       -10,  0,  0,  0,  0,  0,  0,-10,
       -10,  0,  5,  5,  5,  5,  0,-10,
        -5,  0,  5,  5,  5,  5,  0, -5,
         0,  0,  5,  5,  5,  5,  0, -5,
       -10,  5,  5,  5,  5,  5,  0,-10,
       -10,  0,  5,  0,  0,  0,  0,-10,
       -20,-10,-10, -5, -5,-10,-10,-20,
    ],
    // King (middlegame)
    [
       -30,-40,-40,-50,-50,-40,-40,-30,
       -30,-40,-40,-50,-50,-40,-40,-30,
       -30,-40,-40,-50,-50,-40,-40,-30,
       -30,-40,-40,-50,-50,-40,-40,-30,
       -20,-30,-30,-40,-40,-30,-30,-20,
       -10,-20,-20,-20,-20,-20,-20,-10,
        20, 20,  0,  0,  0,  0, 20, 20,
        20, 30, 10,  0,  0, 10, 30, 20,
    ],
];

#[cfg(test)]
mod tests {
    use super::*;
    use tessera_core::Piece;

    #[test]
    fn file_size_matches_layout() {
        assert_eq!(FILE_SIZE, 2 * (768 * 256 + 256 + 8 * 512 + 8));
    }

    #[test]
    fn from_bytes_rejects_wrong_size() {
        assert!(matches!(
            Network::from_bytes(&[0u8; 100]),
            Err(NetworkError::WrongSize { got: 100, .. })
        ));
        assert!(Network::from_bytes(&vec![0u8; FILE_SIZE]).is_ok());
    }

    #[test]
    fn byte_roundtrip_preserves_weights() {
        let mut bytes = vec![0u8; FILE_SIZE];
        // A couple of recognizable values at the start (first two feature
        // weights) and the very end (last output bias).
        bytes[0..2].copy_from_slice(&123i16.to_le_bytes());
        bytes[2..4].copy_from_slice(&(-77i16).to_le_bytes());
        let n = bytes.len();
        bytes[n - 2..].copy_from_slice(&42i16.to_le_bytes());

        let net = Network::from_bytes(&bytes).unwrap();
        assert_eq!(net.feature_weights(0)[0], 123);
        assert_eq!(net.feature_weights(0)[1], -77);
        assert_eq!(net.out_bias[OUTPUT_BUCKETS - 1], 42);
    }

    #[test]
    fn feature_index_perspectives() {
        let wp = ColoredPiece::WHITE_PAWN;
        let e2 = Square::from_algebraic("e2").unwrap();

        // White's own pawn, no mirror: kind 0, own, square e2.
        assert_eq!(
            feature_index(Color::White, wp, e2, false),
            e2.index() as usize
        );
        // From Black's perspective the same pawn is an enemy pawn on e7.
        assert_eq!(
            feature_index(Color::Black, wp, e2, false),
            64 + e2.flip_rank().index() as usize
        );
        // Mirroring swaps e2 to d2.
        assert_eq!(
            feature_index(Color::White, wp, e2, true),
            e2.flip_file().index() as usize
        );
    }

    #[test]
    fn mirror_boundary_is_the_e_file() {
        assert!(!mirrors(Square::from_algebraic("d1").unwrap()));
        assert!(mirrors(Square::from_algebraic("e1").unwrap()));
        assert!(mirrors(Square::H8));
        assert!(!mirrors(Square::A8));
    }

    #[test]
    fn output_buckets_cover_all_piece_counts() {
        assert_eq!(output_bucket(2), 0);
        assert_eq!(output_bucket(5), 0);
        assert_eq!(output_bucket(6), 1);
        assert_eq!(output_bucket(32), 7);
    }

    #[test]
    fn builtin_balance_is_linear() {
        let net = Network::builtin();
        let bias = (QA / 2) as i16;

        // Balanced accumulators give a zero score.
        let mut stm = [0i16; L1];
        let mut ntm = [0i16; L1];
        stm[0] = bias;
        stm[1] = bias;
        ntm[0] = bias;
        ntm[1] = bias;
        assert_eq!(net.forward(&stm, &ntm, 0), 0);

        // Shift the balance by one pawn (100 cp / grain steps).
        let pawn_steps = (MATERIAL[Piece::Pawn.index()] / BALANCE_GRAIN) as i16;
        stm[0] = bias + pawn_steps;
        stm[1] = bias - pawn_steps;
        ntm[0] = bias - pawn_steps;
        ntm[1] = bias + pawn_steps;
        let score = net.forward(&stm, &ntm, 0);
        assert!((80..=120).contains(&score), "one pawn up scored {score}");
    }
}
