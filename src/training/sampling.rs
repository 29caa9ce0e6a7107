//! Row and feature sampling.
//!
//! Row sampling is a pure hash of `(row, tree)`: every thread and every run
//! agrees on which rows a tree uses without sharing any random state.
//! Feature sampling draws from a `Xoshiro256PlusPlus` stream seeded by
//! `(seed, tree, layer)`, so it too is independent of thread scheduling.

use rand::prelude::*;
use rand_xoshiro::Xoshiro256PlusPlus;

// ============================================================================
// RowSampler
// ============================================================================

/// Deterministic per-tree row filter.
///
/// A row is kept when `((row + 137) * (7 * tree + 1) + 79) & 0xff` is at most
/// `floor(256 * ratio)`, computed with wrapping `u32` arithmetic.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RowSampler {
    multiplier: u32,
    threshold: u32,
}

impl RowSampler {
    pub fn new(tree: usize, ratio: f32) -> Self {
        let sample_const = (tree as u32).wrapping_mul(7);
        Self {
            multiplier: sample_const.wrapping_add(1),
            threshold: (256.0 * ratio.clamp(0.0, 1.0)) as u32,
        }
    }

    /// Every row is kept.
    #[inline]
    pub fn is_full(&self) -> bool {
        self.threshold >= 0xff
    }

    #[inline]
    pub fn is_sampled(&self, row: u32) -> bool {
        let hash = row
            .wrapping_add(137)
            .wrapping_mul(self.multiplier)
            .wrapping_add(79)
            & 0xff;
        hash <= self.threshold
    }
}

// ============================================================================
// FeatureSampler
// ============================================================================

/// Picks the dimensions searched in one layer.
#[derive(Debug, Clone)]
pub struct FeatureSampler {
    ratio: f32,
    seed: u64,
}

impl FeatureSampler {
    pub fn new(ratio: f32, seed: u64) -> Self {
        Self { ratio, seed }
    }

    /// Select from `candidates` (ascending dimension ids).
    ///
    /// Each candidate is kept with probability `ratio`, up to
    /// `floor(ratio * candidates.len())` of them (at least one when `ratio`
    /// is positive). With `ratio == 1` every candidate is returned.
    pub fn sample(&self, candidates: &[usize], tree: usize, layer: usize) -> Vec<usize> {
        if self.ratio >= 1.0 {
            return candidates.to_vec();
        }
        let cap = match (candidates.len() as f64 * f64::from(self.ratio)) as usize {
            0 if self.ratio > 0.0 => 1,
            n => n,
        };
        let mut rng = Xoshiro256PlusPlus::seed_from_u64(self.layer_seed(tree, layer));
        let mut selected = Vec::new();
        for &d in candidates {
            if selected.len() >= cap {
                break;
            }
            if rng.gen::<f32>() < self.ratio {
                selected.push(d);
            }
        }
        selected
    }

    fn layer_seed(&self, tree: usize, layer: usize) -> u64 {
        self.seed
            .wrapping_add((tree as u64).wrapping_mul(0x9E3779B97F4A7C15))
            .wrapping_add((layer as u64).wrapping_mul(0xBF58476D1CE4E5B9))
    }
}
