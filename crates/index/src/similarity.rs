//! Cosine similarity matrices and nearest-neighbour lookup.

use anyhow::Result;
use ndarray::{Array2, ArrayView1, ArrayView2, Axis};

/// Stack equally sized vectors into a row matrix.
pub fn to_matrix(rows: &[Vec<f32>]) -> Result<Array2<f32>> {
    let dim = rows.first().map_or(0, Vec::len);
    if let Some(bad) = rows.iter().find(|r| r.len() != dim) {
        anyhow::bail!("Embedding dimension mismatch: expected {}, got {}", dim, bad.len());
    }
    let flat: Vec<f32> = rows.iter().flatten().copied().collect();
    Ok(Array2::from_shape_vec((rows.len(), dim), flat)?)
}

/// Cosine similarity of two vectors; `0.0` if either is zero or the
/// lengths differ.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }
    let a = ArrayView1::from(a);
    let b = ArrayView1::from(b);
    let norm = a.dot(&a).sqrt() * b.dot(&b).sqrt();
    if norm == 0.0 { 0.0 } else { a.dot(&b) / norm }
}

/// Row-wise cosine similarity: entry `(i, j)` compares row `i` of `x` with
/// row `j` of `y`. Pairs involving a zero row score `0.0`.
pub fn similarity(x: ArrayView2<f32>, y: ArrayView2<f32>) -> Array2<f32> {
    let x_norms = x.map_axis(Axis(1), |row| row.dot(&row).sqrt());
    let y_norms = y.map_axis(Axis(1), |row| row.dot(&row).sqrt());

    let mut sims = x.dot(&y.t());
    for ((i, j), value) in sims.indexed_iter_mut() {
        let norm = x_norms[i] * y_norms[j];
        *value = if norm == 0.0 { 0.0 } else { *value / norm };
    }
    sims
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Retrieval {
    /// Per query row: selected target indices.
    pub indices: Vec<Vec<usize>>,
    /// Per query row: scores aligned with `indices`.
    pub scores: Vec<Vec<f32>>,
}

/// Select targets per query row.
///
/// `top_k` is applied first (descending score, ties by ascending target
/// index), then `threshold` keeps scores `>=` it from that candidate set.
/// With neither, every target is returned in original order.
pub fn retrieve(
    query: ArrayView2<f32>,
    target: ArrayView2<f32>,
    top_k: Option<usize>,
    threshold: Option<f32>,
) -> Retrieval {
    let sims = similarity(query, target);
    let mut result = Retrieval::default();

    for row in sims.rows() {
        let mut candidates: Vec<usize> = (0..row.len()).collect();
        if let Some(k) = top_k {
            // Stable sort keeps ascending index order among equal scores
            candidates.sort_by(|&a, &b| row[b].total_cmp(&row[a]));
            candidates.truncate(k);
        }
        if let Some(t) = threshold {
            candidates.retain(|&i| row[i] >= t);
        }

        result.scores.push(candidates.iter().map(|&i| row[i]).collect());
        result.indices.push(candidates);
    }

    result
}

/// Target vectors prepared once for repeated nearest-neighbour queries.
#[derive(Debug, Clone)]
pub struct SimilarityIndex {
    targets: Array2<f32>,
}

impl SimilarityIndex {
    pub fn new(targets: &[Vec<f32>]) -> Result<Self> {
        Ok(Self {
            targets: to_matrix(targets)?,
        })
    }

    pub fn len(&self) -> usize {
        self.targets.nrows()
    }

    pub fn is_empty(&self) -> bool {
        self.targets.nrows() == 0
    }

    pub fn search(
        &self,
        queries: &[Vec<f32>],
        top_k: Option<usize>,
        threshold: Option<f32>,
    ) -> Result<Retrieval> {
        let queries = to_matrix(queries)?;
        if self.is_empty() {
            return Ok(Retrieval {
                indices: vec![Vec::new(); queries.nrows()],
                scores: vec![Vec::new(); queries.nrows()],
            });
        }
        if queries.ncols() != self.targets.ncols() {
            anyhow::bail!(
                "Query dimension {} does not match index dimension {}",
                queries.ncols(),
                self.targets.ncols()
            );
        }
        Ok(retrieve(queries.view(), self.targets.view(), top_k, threshold))
    }
}
