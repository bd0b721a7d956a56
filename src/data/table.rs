//! In-memory numeric tables
//!
//! `FeatureTable` holds the training rows for the SVM solvers in sparse form
//! together with their squared norms. Dense and CSR inputs are both accepted
//! and normalised to the same representation. `CsrMatrix` is the read-only
//! sparse affinity matrix consumed by t-SNE.

use crate::core::{DalError, Result, SparseVector};
use serde::{Deserialize, Serialize};

/// Feature rows with cached squared norms
#[derive(Debug, Clone)]
pub struct FeatureTable {
    rows: Vec<SparseVector>,
    norms: Vec<f64>,
    n_features: usize,
}

impl FeatureTable {
    /// Build a table from sparse rows; the feature count is inferred
    pub fn from_rows(rows: Vec<SparseVector>) -> Self {
        let n_features = rows.iter().map(SparseVector::dim).max().unwrap_or(0);
        let norms = rows.iter().map(SparseVector::norm_squared).collect();
        Self {
            rows,
            norms,
            n_features,
        }
    }

    /// Build a table from a row-major dense buffer of `n_rows * n_cols` values
    pub fn from_dense(values: &[f64], n_rows: usize, n_cols: usize) -> Result<Self> {
        if values.len() != n_rows * n_cols {
            return Err(DalError::DimensionMismatch {
                expected: n_rows * n_cols,
                actual: values.len(),
            });
        }
        if n_cols == 0 {
            return Err(DalError::InvalidDataset(
                "dense table must have at least one column".to_string(),
            ));
        }
        let rows = values.chunks(n_cols).map(SparseVector::from_dense).collect();
        let mut table = Self::from_rows(rows);
        table.n_features = n_cols;
        Ok(table)
    }

    /// Build a table from CSR arrays with zero-based column indices
    pub fn from_csr(
        row_offsets: &[usize],
        col_indices: &[usize],
        values: &[f64],
        n_cols: usize,
    ) -> Result<Self> {
        let csr = CsrMatrix::new(row_offsets.to_vec(), col_indices.to_vec(), values.to_vec())?;
        if let Some(&bad) = col_indices.iter().find(|&&c| c >= n_cols) {
            return Err(DalError::InvalidDataset(format!(
                "column index {bad} out of range for {n_cols} columns"
            )));
        }
        let rows = (0..csr.n_rows())
            .map(|i| {
                let (cols, vals) = csr.row(i);
                SparseVector::new(cols.to_vec(), vals.to_vec())
            })
            .collect();
        let mut table = Self::from_rows(rows);
        table.n_features = table.n_features.max(n_cols);
        Ok(table)
    }

    pub fn n_rows(&self) -> usize {
        self.rows.len()
    }

    pub fn n_features(&self) -> usize {
        self.n_features
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn row(&self, i: usize) -> &SparseVector {
        &self.rows[i]
    }

    pub fn rows(&self) -> &[SparseVector] {
        &self.rows
    }

    /// Squared L2 norm of row `i`
    pub fn norm_squared(&self, i: usize) -> f64 {
        self.norms[i]
    }
}

/// Compressed sparse row matrix with zero-based indices
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CsrMatrix {
    pub row_offsets: Vec<usize>,
    pub col_indices: Vec<usize>,
    pub values: Vec<f64>,
}

impl CsrMatrix {
    /// Validate the CSR structure and wrap it
    pub fn new(row_offsets: Vec<usize>, col_indices: Vec<usize>, values: Vec<f64>) -> Result<Self> {
        let matrix = Self {
            row_offsets,
            col_indices,
            values,
        };
        matrix.check_structure()?;
        Ok(matrix)
    }

    fn check_structure(&self) -> Result<()> {
        if self.row_offsets.first() != Some(&0) {
            return Err(DalError::InvalidDataset(
                "CSR row offsets must start at 0".to_string(),
            ));
        }
        if self.row_offsets.windows(2).any(|w| w[0] > w[1]) {
            return Err(DalError::InvalidDataset(
                "CSR row offsets must be non-decreasing".to_string(),
            ));
        }
        let nnz = self.row_offsets[self.row_offsets.len() - 1];
        if self.col_indices.len() != nnz {
            return Err(DalError::DimensionMismatch {
                expected: nnz,
                actual: self.col_indices.len(),
            });
        }
        if self.values.len() != nnz {
            return Err(DalError::DimensionMismatch {
                expected: nnz,
                actual: self.values.len(),
            });
        }
        Ok(())
    }

    /// Check that this is a square `n x n` matrix with in-range columns
    pub fn validate_square(&self, n: usize) -> Result<()> {
        self.check_structure()?;
        if self.n_rows() != n {
            return Err(DalError::DimensionMismatch {
                expected: n,
                actual: self.n_rows(),
            });
        }
        if let Some(&bad) = self.col_indices.iter().find(|&&c| c >= n) {
            return Err(DalError::InvalidDataset(format!(
                "column index {bad} out of range for {n} points"
            )));
        }
        if self.values.iter().any(|v| !v.is_finite() || *v < 0.0) {
            return Err(DalError::InvalidDataset(
                "affinities must be finite and non-negative".to_string(),
            ));
        }
        Ok(())
    }

    pub fn n_rows(&self) -> usize {
        self.row_offsets.len().saturating_sub(1)
    }

    pub fn nnz(&self) -> usize {
        self.values.len()
    }

    /// Column indices and values of row `i`
    pub fn row(&self, i: usize) -> (&[usize], &[f64]) {
        let range = self.row_offsets[i]..self.row_offsets[i + 1];
        (&self.col_indices[range.clone()], &self.values[range])
    }
}
