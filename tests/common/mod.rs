//! Shared dataset generators and metrics for integration tests.

#![allow(dead_code)]

use rand::{Rng, SeedableRng};
use rand_xoshiro::Xoshiro256PlusPlus;

use presort_boost::Row;

/// Sparse binary classification rows.
///
/// Each of the `dim` features is present with probability 0.7 and takes a
/// value in `[0, 1)` rounded to two decimals, so columns contain ties and
/// absent entries read as 0. The label is 1 when
/// `x0 + 0.5 * x1 - 0.3 * x2 + noise > 0.6`.
pub fn classification_rows(n: usize, dim: usize, seed: u64) -> Vec<Row> {
    let mut rng = Xoshiro256PlusPlus::seed_from_u64(seed);
    (0..n)
        .map(|_| {
            let mut row = Row::new(0.0);
            for d in 0..dim {
                if rng.gen::<f32>() < 0.7 {
                    let value = (rng.gen::<f32>() * 100.0).floor() / 100.0;
                    row.push(d as i32, value);
                }
            }
            let signal = row.value_of(0) + 0.5 * row.value_of(1) - 0.3 * row.value_of(2);
            let noise = (rng.gen::<f32>() - 0.5) * 0.4;
            row.label = if signal + noise > 0.6 { 1.0 } else { 0.0 };
            row
        })
        .collect()
}

/// Dense regression rows with distinct values in every column.
pub fn regression_rows(n: usize, dim: usize, seed: u64) -> Vec<Row> {
    let mut rng = Xoshiro256PlusPlus::seed_from_u64(seed);
    (0..n)
        .map(|_| {
            let values: Vec<f32> = (0..dim).map(|_| rng.gen_range(1.0..10.0)).collect();
            let label = values.iter().enumerate().map(|(d, v)| v * (d + 1) as f32).sum::<f32>()
                + rng.gen_range(-1.0..1.0);
            let pairs: Vec<(i32, f32)> = values.iter().enumerate().map(|(d, &v)| (d as i32, v)).collect();
            Row::from_pairs(label, &pairs)
        })
        .collect()
}

/// Area under the ROC curve of `(label, score)` pairs; labels are 0 or 1.
/// Tied scores share their average rank.
pub fn auc(scored: &[(f32, f32)]) -> f64 {
    let mut sorted: Vec<(f32, f32)> = scored.to_vec();
    sorted.sort_by(|a, b| a.1.total_cmp(&b.1));

    let mut rank_sum = 0.0;
    let mut i = 0;
    while i < sorted.len() {
        let mut j = i;
        while j < sorted.len() && sorted[j].1 == sorted[i].1 {
            j += 1;
        }
        // Ranks i+1..=j averaged.
        let rank = (i + 1 + j) as f64 / 2.0;
        rank_sum += sorted[i..j].iter().filter(|p| p.0 > 0.5).count() as f64 * rank;
        i = j;
    }

    let pos = sorted.iter().filter(|p| p.0 > 0.5).count() as f64;
    let neg = sorted.len() as f64 - pos;
    (rank_sum - pos * (pos + 1.0) / 2.0) / (pos * neg)
}

/// Sum of squared deviations from the mean.
pub fn sse(values: &[f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    let mean = values.iter().sum::<f64>() / values.len() as f64;
    values.iter().map(|v| (v - mean) * (v - mean)).sum()
}
