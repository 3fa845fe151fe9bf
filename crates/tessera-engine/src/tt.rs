//! The shared transposition table.
//!
//! A bucketed, lock-free cache of search results keyed by position hash.
//! Entries are packed into 10 bytes; three entries plus two bytes of
//! padding form a 32-byte cluster. Every field is a relaxed atomic: writers
//! never coordinate, and readers tolerate torn entries because the key tag
//! is re-checked and any resurrected move is validated with
//! `is_pseudolegal` before use.

use crate::params::{Score, SCORE_MATE_IN_MAX, SCORE_NONE};
use std::sync::atomic::{AtomicI16, AtomicU16, AtomicU8, Ordering};
use tessera_core::Move;

/// Bound kind of a stored score.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[repr(u8)]
pub enum Bound {
    #[default]
    None = 0,
    /// Fail-low: the stored score is an upper bound.
    Upper = 1,
    /// Fail-high: the stored score is a lower bound.
    Lower = 2,
    Exact = 3,
}

impl Bound {
    #[inline]
    fn from_bits(bits: u8) -> Bound {
        match bits & 0b11 {
            0 => Bound::None,
            1 => Bound::Upper,
            2 => Bound::Lower,
            _ => Bound::Exact,
        }
    }
}

/// A decoded table entry as handed to the search.
#[derive(Debug, Clone, Copy)]
pub struct TtEntry {
    pub score: Score,
    pub eval: Score,
    pub mv: Move,
    pub depth: i32,
    pub bound: Bound,
    pub was_pv: bool,
}

/// One packed slot. 10 bytes of independent relaxed atomics.
#[repr(C)]
struct Slot {
    key: AtomicU16,
    mv: AtomicU16,
    score: AtomicI16,
    eval: AtomicI16,
    depth: AtomicU8,
    /// Bits 0-1 bound, bit 2 pv, bits 3-7 age.
    info: AtomicU8,
}

impl Slot {
    fn zeroed() -> Self {
        Slot {
            key: AtomicU16::new(0),
            mv: AtomicU16::new(0),
            score: AtomicI16::new(0),
            eval: AtomicI16::new(SCORE_NONE as i16),
            depth: AtomicU8::new(0),
            info: AtomicU8::new(0),
        }
    }

    fn clear(&self) {
        self.key.store(0, Ordering::Relaxed);
        self.mv.store(0, Ordering::Relaxed);
        self.score.store(0, Ordering::Relaxed);
        self.eval.store(SCORE_NONE as i16, Ordering::Relaxed);
        self.depth.store(0, Ordering::Relaxed);
        self.info.store(0, Ordering::Relaxed);
    }

    #[inline]
    fn age(&self) -> u8 {
        self.info.load(Ordering::Relaxed) >> 3
    }

    #[inline]
    fn bound(&self) -> Bound {
        Bound::from_bits(self.info.load(Ordering::Relaxed))
    }
}

/// Slots per cluster; a cluster plus padding spans one half cache line.
const CLUSTER_SLOTS: usize = 3;

#[repr(C, align(32))]
struct Cluster {
    slots: [Slot; CLUSTER_SLOTS],
    _pad: [u8; 2],
}

impl Cluster {
    fn zeroed() -> Self {
        Cluster {
            slots: [Slot::zeroed(), Slot::zeroed(), Slot::zeroed()],
            _pad: [0; 2],
        }
    }
}

/// Age counter wraps on five bits.
const MAX_AGE: u8 = 1 << 5;

pub struct TranspositionTable {
    clusters: Box<[Cluster]>,
    age: AtomicU8,
}

impl TranspositionTable {
    /// Creates a table of the given size in MiB. All clusters are reserved
    /// up front; the search never allocates.
    pub fn new(mebibytes: usize) -> Self {
        let count = (mebibytes.max(1) * 1024 * 1024) / std::mem::size_of::<Cluster>();
        let mut clusters = Vec::with_capacity(count);
        clusters.resize_with(count, Cluster::zeroed);
        TranspositionTable {
            clusters: clusters.into_boxed_slice(),
            age: AtomicU8::new(0),
        }
    }

    /// Replaces the storage with a new size, dropping all entries.
    pub fn resize(&mut self, mebibytes: usize) {
        *self = TranspositionTable::new(mebibytes);
    }

    /// Drops all entries and resets the age. `ucinewgame`.
    pub fn clear(&self) {
        for cluster in self.clusters.iter() {
            for slot in &cluster.slots {
                slot.clear();
            }
        }
        self.age.store(0, Ordering::Relaxed);
    }

    /// Advances the age. Called once at the start of every search.
    pub fn age_up(&self) {
        self.age
            .store(self.age().wrapping_add(1) % MAX_AGE, Ordering::Relaxed);
    }

    #[inline]
    fn age(&self) -> u8 {
        self.age.load(Ordering::Relaxed)
    }

    /// Cluster index of a key: multiply-high maps the full 64-bit range
    /// evenly onto the cluster count.
    #[inline]
    fn index(&self, key: u64) -> usize {
        ((u128::from(key) * self.clusters.len() as u128) >> 64) as usize
    }

    /// Hints the cluster of `key` into cache ahead of a probe.
    #[inline]
    pub fn prefetch(&self, key: u64) {
        #[cfg(target_arch = "x86_64")]
        unsafe {
            use std::arch::x86_64::{_mm_prefetch, _MM_HINT_T0};
            let cluster = &self.clusters[self.index(key)];
            _mm_prefetch::<_MM_HINT_T0>((cluster as *const Cluster).cast());
        }
        #[cfg(not(target_arch = "x86_64"))]
        let _ = key;
    }

    /// Looks up `key`. Mate scores are translated from mate-from-root to
    /// mate-from-here using `ply`.
    pub fn probe(&self, key: u64, ply: usize) -> Option<TtEntry> {
        let cluster = &self.clusters[self.index(key)];
        let tag = key as u16;

        for slot in &cluster.slots {
            if slot.key.load(Ordering::Relaxed) != tag {
                continue;
            }
            let info = slot.info.load(Ordering::Relaxed);
            if Bound::from_bits(info) == Bound::None {
                continue;
            }

            let mut score = Score::from(slot.score.load(Ordering::Relaxed));
            if score >= SCORE_MATE_IN_MAX {
                score -= ply as Score;
            } else if score <= -SCORE_MATE_IN_MAX {
                score += ply as Score;
            }

            return Some(TtEntry {
                score,
                eval: Score::from(slot.eval.load(Ordering::Relaxed)),
                mv: Move::from_raw(slot.mv.load(Ordering::Relaxed)),
                depth: i32::from(slot.depth.load(Ordering::Relaxed)),
                bound: Bound::from_bits(info),
                was_pv: info & 0b100 != 0,
            });
        }
        None
    }

    /// Stores a search result. Within the cluster, a slot holding the same
    /// key is always reused; otherwise the slot minimising
    /// `depth - 4 * age_distance` is evicted.
    #[allow(clippy::too_many_arguments)]
    pub fn put(
        &self,
        key: u64,
        mut score: Score,
        eval: Score,
        mv: Move,
        depth: i32,
        ply: usize,
        bound: Bound,
        pv: bool,
    ) {
        debug_assert!(bound != Bound::None);
        let cluster = &self.clusters[self.index(key)];
        let tag = key as u16;
        let age = self.age();

        let mut victim = 0;
        let mut victim_value = i32::MAX;
        let mut matched = false;
        for (i, slot) in cluster.slots.iter().enumerate() {
            if slot.key.load(Ordering::Relaxed) == tag && slot.bound() != Bound::None {
                victim = i;
                matched = true;
                break;
            }
            let age_distance = i32::from((MAX_AGE + age - slot.age()) % MAX_AGE);
            let value = i32::from(slot.depth.load(Ordering::Relaxed)) - 4 * age_distance;
            if value < victim_value {
                victim_value = value;
                victim = i;
            }
        }
        let slot = &cluster.slots[victim];

        // Keep the old best move when the new result has none to offer.
        let stored_mv = if mv.is_null() && matched && bound != Bound::Exact {
            slot.mv.load(Ordering::Relaxed)
        } else {
            mv.raw()
        };

        // Mate scores are stored relative to this node so they stay valid
        // wherever the entry is probed.
        if score >= SCORE_MATE_IN_MAX {
            score += ply as Score;
        } else if score <= -SCORE_MATE_IN_MAX {
            score -= ply as Score;
        }

        let info = (age << 3) | (u8::from(pv) << 2) | bound as u8;
        slot.key.store(tag, Ordering::Relaxed);
        slot.mv.store(stored_mv, Ordering::Relaxed);
        slot.score.store(score as i16, Ordering::Relaxed);
        slot.eval.store(eval as i16, Ordering::Relaxed);
        slot.depth.store(depth.clamp(0, 255) as u8, Ordering::Relaxed);
        slot.info.store(info, Ordering::Relaxed);
    }

    /// Estimated fill rate in permille, sampled from the first thousand
    /// slots. Only current-age entries of nonzero depth count.
    pub fn hashfull(&self) -> usize {
        let age = self.age();
        self.clusters
            .iter()
            .flat_map(|c| c.slots.iter())
            .take(1000)
            .filter(|s| {
                s.bound() != Bound::None
                    && s.depth.load(Ordering::Relaxed) > 0
                    && s.age() == age
            })
            .count()
    }
}
