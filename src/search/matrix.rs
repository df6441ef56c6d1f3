//! Row-major embedding matrix with its row order.
//!
//! Row `i` of an [`EmbeddingMatrix`] belongs to `ids()[i]`. The order is part of
//! the value: corpus matrices are stored longest-document-first, query matrices in
//! caller order, and that order travels with the matrix into the cache.

use anyhow::{Result, anyhow, bail};

#[derive(Debug, Clone, PartialEq)]
pub struct EmbeddingMatrix {
    dimension: usize,
    ids: Vec<String>,
    data: Vec<f32>,
}

impl EmbeddingMatrix {
    pub fn empty(dimension: usize) -> Result<Self> {
        Self::from_flat(dimension, Vec::new(), Vec::new())
    }

    /// Build from one vector per id. Every row must have `dimension` components.
    pub fn from_rows(dimension: usize, ids: Vec<String>, rows: Vec<Vec<f32>>) -> Result<Self> {
        if ids.len() != rows.len() {
            bail!(
                "row count mismatch: {} ids for {} vectors",
                ids.len(),
                rows.len()
            );
        }
        let capacity = rows
            .len()
            .checked_mul(dimension)
            .ok_or_else(|| anyhow!("matrix size overflow"))?;
        let mut data = Vec::with_capacity(capacity);
        for (idx, row) in rows.into_iter().enumerate() {
            if row.len() != dimension {
                bail!(
                    "row {idx} dimension mismatch: expected {dimension}, got {}",
                    row.len()
                );
            }
            data.extend(row);
        }
        Self::from_flat(dimension, ids, data)
    }

    pub fn from_flat(dimension: usize, ids: Vec<String>, data: Vec<f32>) -> Result<Self> {
        if dimension == 0 {
            bail!("dimension must be non-zero");
        }
        let expected = ids
            .len()
            .checked_mul(dimension)
            .ok_or_else(|| anyhow!("matrix size overflow"))?;
        if data.len() != expected {
            bail!(
                "matrix data length mismatch: expected {expected}, got {}",
                data.len()
            );
        }
        Ok(Self {
            dimension,
            ids,
            data,
        })
    }

    /// Append `other`'s rows after this matrix's rows.
    pub fn append(&mut self, other: EmbeddingMatrix) -> Result<()> {
        if other.dimension != self.dimension {
            bail!(
                "cannot concatenate matrices of dimension {} and {}",
                self.dimension,
                other.dimension
            );
        }
        self.ids.extend(other.ids);
        self.data.extend(other.data);
        Ok(())
    }

    pub fn dimension(&self) -> usize {
        self.dimension
    }

    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    pub fn ids(&self) -> &[String] {
        &self.ids
    }

    pub fn id(&self, row: usize) -> Option<&str> {
        self.ids.get(row).map(String::as_str)
    }

    pub fn row(&self, row: usize) -> Option<&[f32]> {
        let start = row.checked_mul(self.dimension)?;
        self.data.get(start..start + self.dimension)
    }

    pub fn rows(&self) -> std::slice::ChunksExact<'_, f32> {
        self.data.chunks_exact(self.dimension)
    }

    pub fn as_slice(&self) -> &[f32] {
        &self.data
    }

    /// Copy with every row scaled to unit L2 length. Zero rows become NaN rows.
    pub fn l2_normalized(&self) -> Self {
        let mut data = self.data.clone();
        for row in data.chunks_exact_mut(self.dimension) {
            let norm = row.iter().map(|x| x * x).sum::<f32>().sqrt();
            for x in row.iter_mut() {
                *x /= norm;
            }
        }
        Self {
            dimension: self.dimension,
            ids: self.ids.clone(),
            data,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ids(names: &[&str]) -> Vec<String> {
        names.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn from_rows_rejects_ragged_input() {
        let err = EmbeddingMatrix::from_rows(2, ids(&["a", "b"]), vec![vec![1.0, 2.0], vec![3.0]])
            .unwrap_err();
        assert!(err.to_string().contains("row 1"));
        assert!(EmbeddingMatrix::from_rows(2, ids(&["a"]), vec![]).is_err());
        assert!(EmbeddingMatrix::empty(0).is_err());
    }

    #[test]
    fn append_preserves_order() {
        let mut m = EmbeddingMatrix::from_rows(2, ids(&["a"]), vec![vec![1.0, 2.0]]).unwrap();
        let tail =
            EmbeddingMatrix::from_rows(2, ids(&["b", "c"]), vec![vec![3.0, 4.0], vec![5.0, 6.0]])
                .unwrap();
        m.append(tail).unwrap();
        assert_eq!(m.ids(), &ids(&["a", "b", "c"])[..]);
        assert_eq!(m.row(2), Some(&[5.0, 6.0][..]));
        assert_eq!(m.row(3), None);
        assert_eq!(m.rows().count(), 3);
    }

    #[test]
    fn append_rejects_dimension_mismatch() {
        let mut m = EmbeddingMatrix::empty(2).unwrap();
        let other = EmbeddingMatrix::empty(3).unwrap();
        assert!(m.append(other).is_err());
    }

    #[test]
    fn normalization_turns_zero_rows_into_nan() {
        let m = EmbeddingMatrix::from_rows(2, ids(&["unit", "zero"]), vec![
            vec![3.0, 4.0],
            vec![0.0, 0.0],
        ])
        .unwrap();
        let n = m.l2_normalized();
        assert_eq!(n.row(0), Some(&[0.6, 0.8][..]));
        assert!(n.row(1).unwrap().iter().all(|x| x.is_nan()));
    }
}
