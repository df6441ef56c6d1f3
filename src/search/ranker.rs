//! Exact similarity ranking.
//!
//! 1. Score every query row against every corpus row (cosine or dot product).
//! 2. Replace NaN scores with [`NAN_SENTINEL`] so they sink instead of aborting.
//! 3. Keep the `k + 1` best rows per query in a bounded min-heap; the extra slot
//!    leaves room for dropping a self-match.
//! 4. Drop rows whose id equals the query id, then cut to `k`.
//! 5. Return hits in descending score order when sorted output was requested,
//!    otherwise in corpus row order.
//!
//! Ties are broken by corpus row index (lower row wins), so a given input always
//! yields the same selection.

use std::borrow::Cow;
use std::cmp::Ordering;
use std::collections::BinaryHeap;
use std::fmt;
use std::str::FromStr;

use anyhow::{Result, bail};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::matrix::EmbeddingMatrix;

/// Score assigned to undefined (NaN) similarities.
pub const NAN_SENTINEL: f32 = -1.0;

/// Below this many score cells the matrix is computed on the calling thread.
const PARALLEL_THRESHOLD: usize = 100_000;

/// Set RETRIEVER_PARALLEL_SCORE=0 to always score sequentially.
static PARALLEL_SCORE_ENABLED: once_cell::sync::Lazy<bool> = once_cell::sync::Lazy::new(|| {
    dotenvy::var("RETRIEVER_PARALLEL_SCORE")
        .map(|v| v != "0" && v.to_lowercase() != "false")
        .unwrap_or(true)
});

/// Set RETRIEVER_SIMD_DOT=0 to use the scalar dot product.
static SIMD_DOT_ENABLED: once_cell::sync::Lazy<bool> = once_cell::sync::Lazy::new(|| {
    dotenvy::var("RETRIEVER_SIMD_DOT")
        .map(|v| v != "0" && v.to_lowercase() != "false")
        .unwrap_or(true)
});

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum ScoreFunction {
    #[default]
    #[serde(rename = "cos_sim")]
    CosSim,
    #[serde(rename = "dot")]
    Dot,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error(
    "score function: {0} must be either (cos_sim) for cosine similarity or (dot) for dot product"
)]
pub struct InvalidScoreFunction(pub String);

impl ScoreFunction {
    pub fn as_str(self) -> &'static str {
        match self {
            ScoreFunction::CosSim => "cos_sim",
            ScoreFunction::Dot => "dot",
        }
    }

    pub fn description(self) -> &'static str {
        match self {
            ScoreFunction::CosSim => "Cosine Similarity",
            ScoreFunction::Dot => "Dot Product",
        }
    }

    /// Row-major `queries.len() × corpus.len()` similarity matrix, NaN sanitized.
    pub fn score_matrix(self, queries: &EmbeddingMatrix, corpus: &EmbeddingMatrix) -> Result<Vec<f32>> {
        if queries.dimension() != corpus.dimension() {
            bail!(
                "query dimension {} does not match corpus dimension {}",
                queries.dimension(),
                corpus.dimension()
            );
        }
        let (q, c): (Cow<'_, EmbeddingMatrix>, Cow<'_, EmbeddingMatrix>) = match self {
            ScoreFunction::Dot => (Cow::Borrowed(queries), Cow::Borrowed(corpus)),
            ScoreFunction::CosSim => (
                Cow::Owned(queries.l2_normalized()),
                Cow::Owned(corpus.l2_normalized()),
            ),
        };

        let cols = c.len();
        let mut scores = vec![0.0f32; q.len() * cols];
        if cols == 0 {
            return Ok(scores);
        }

        let score_row = |(q_row, out): (&[f32], &mut [f32])| {
            for (slot, c_row) in out.iter_mut().zip(c.rows()) {
                let s = dot_product(q_row, c_row);
                *slot = if s.is_nan() { NAN_SENTINEL } else { s };
            }
        };

        if *PARALLEL_SCORE_ENABLED && scores.len() >= PARALLEL_THRESHOLD {
            q.as_slice()
                .par_chunks(q.dimension())
                .zip(scores.par_chunks_mut(cols))
                .for_each(score_row);
        } else {
            q.rows().zip(scores.chunks_mut(cols)).for_each(score_row);
        }
        Ok(scores)
    }
}

impl fmt::Display for ScoreFunction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ScoreFunction {
    type Err = InvalidScoreFunction;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "cos_sim" => Ok(ScoreFunction::CosSim),
            "dot" => Ok(ScoreFunction::Dot),
            other => Err(InvalidScoreFunction(other.to_string())),
        }
    }
}

/// A corpus row selected for a query.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RankedRow {
    pub row: usize,
    pub score: f32,
}

#[derive(Debug, Clone, Copy)]
struct ScoredEntry {
    score: f32,
    row: usize,
}

impl PartialEq for ScoredEntry {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for ScoredEntry {}

impl PartialOrd for ScoredEntry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for ScoredEntry {
    /// Greater means better: higher score, then lower row index.
    fn cmp(&self, other: &Self) -> Ordering {
        self.score
            .total_cmp(&other.score)
            .then_with(|| other.row.cmp(&self.row))
    }
}

/// Best `limit` entries of one score row, best first.
fn top_entries(scores: &[f32], limit: usize) -> Vec<ScoredEntry> {
    let mut heap = BinaryHeap::with_capacity(limit + 1);
    for (row, &score) in scores.iter().enumerate() {
        heap.push(std::cmp::Reverse(ScoredEntry { score, row }));
        if heap.len() > limit {
            heap.pop();
        }
    }
    // Ascending `Reverse` order is best-first.
    heap.into_sorted_vec().into_iter().map(|r| r.0).collect()
}

/// Rank `corpus` rows for every `queries` row.
///
/// The result has one list per query row, in query row order. Each list holds at
/// most `k` rows, never one whose corpus id equals the query id. When the `k + 1`
/// candidates contain more than one self-match the list is shorter than `k`.
pub fn rank(
    queries: &EmbeddingMatrix,
    corpus: &EmbeddingMatrix,
    score_function: ScoreFunction,
    k: usize,
    sorted: bool,
) -> Result<Vec<Vec<RankedRow>>> {
    if k == 0 || corpus.is_empty() {
        return Ok(vec![Vec::new(); queries.len()]);
    }
    let scores = score_function.score_matrix(queries, corpus)?;
    let candidates = k.saturating_add(1).min(corpus.len());
    debug!(
        queries = queries.len(),
        corpus = corpus.len(),
        candidates,
        score_function = %score_function,
        "ranking"
    );

    let ranked = scores
        .chunks(corpus.len())
        .zip(queries.ids())
        .map(|(row_scores, query_id)| {
            let mut hits: Vec<RankedRow> = top_entries(row_scores, candidates)
                .into_iter()
                .filter(|e| corpus.id(e.row) != Some(query_id.as_str()))
                .take(k)
                .map(|e| RankedRow {
                    row: e.row,
                    score: e.score,
                })
                .collect();
            if !sorted {
                hits.sort_unstable_by_key(|hit| hit.row);
            }
            hits
        })
        .collect();
    Ok(ranked)
}

#[inline]
fn dot_product_scalar(a: &[f32], b: &[f32]) -> f32 {
    a.iter().zip(b.iter()).map(|(x, y)| x * y).sum()
}

/// 8-wide SIMD dot product. Reorders FP additions, so results can differ from the
/// scalar version by ~1e-7 relative error.
#[inline]
fn dot_product_simd(a: &[f32], b: &[f32]) -> f32 {
    use wide::f32x8;

    let chunks_a = a.chunks_exact(8);
    let chunks_b = b.chunks_exact(8);
    let remainder_a = chunks_a.remainder();
    let remainder_b = chunks_b.remainder();

    let mut sum = f32x8::ZERO;
    for (ca, cb) in chunks_a.zip(chunks_b) {
        let arr_a = [ca[0], ca[1], ca[2], ca[3], ca[4], ca[5], ca[6], ca[7]];
        let arr_b = [cb[0], cb[1], cb[2], cb[3], cb[4], cb[5], cb[6], cb[7]];
        sum += f32x8::from(arr_a) * f32x8::from(arr_b);
    }

    let mut scalar_sum: f32 = sum.reduce_add();
    for (x, y) in remainder_a.iter().zip(remainder_b) {
        scalar_sum += x * y;
    }
    scalar_sum
}

#[inline]
fn dot_product(a: &[f32], b: &[f32]) -> f32 {
    if *SIMD_DOT_ENABLED {
        dot_product_simd(a, b)
    } else {
        dot_product_scalar(a, b)
    }
}

/// Bench-only wrapper for scalar dot product.
#[doc(hidden)]
pub fn dot_product_scalar_bench(a: &[f32], b: &[f32]) -> f32 {
    dot_product_scalar(a, b)
}

/// Bench-only wrapper for SIMD dot product.
#[doc(hidden)]
pub fn dot_product_simd_bench(a: &[f32], b: &[f32]) -> f32 {
    dot_product_simd(a, b)
}
