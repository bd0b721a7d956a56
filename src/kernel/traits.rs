//! Kernel trait definition

use crate::core::SparseVector;
use crate::data::FeatureTable;

/// Kernel function trait
///
/// A kernel function K(x, y) must satisfy Mercer's condition to be valid for SVM.
pub trait Kernel: Send + Sync {
    /// Compute kernel value K(x, y)
    fn compute(&self, x: &SparseVector, y: &SparseVector) -> f64;

    /// Compute K(x, y) using precomputed squared norms
    ///
    /// Distance-based kernels override this to avoid a second sparse merge.
    fn compute_with_norms(
        &self,
        x: &SparseVector,
        y: &SparseVector,
        x_norm_sq: f64,
        y_norm_sq: f64,
    ) -> f64 {
        let _ = (x_norm_sq, y_norm_sq);
        self.compute(x, y)
    }

    /// Fill `out[j] = K(x_i, x_j)` for every row `j` of `table`
    fn compute_row(&self, table: &FeatureTable, i: usize, out: &mut [f64]) {
        debug_assert_eq!(out.len(), table.n_rows());
        let x = table.row(i);
        let x_norm = table.norm_squared(i);
        for (j, value) in out.iter_mut().enumerate() {
            *value = self.compute_with_norms(x, table.row(j), x_norm, table.norm_squared(j));
        }
    }

    /// Diagonal of the kernel matrix over `table`
    fn diagonal(&self, table: &FeatureTable) -> Vec<f64> {
        (0..table.n_rows())
            .map(|i| {
                let norm = table.norm_squared(i);
                self.compute_with_norms(table.row(i), table.row(i), norm, norm)
            })
            .collect()
    }
}

impl<K: Kernel + ?Sized> Kernel for &K {
    fn compute(&self, x: &SparseVector, y: &SparseVector) -> f64 {
        (**self).compute(x, y)
    }

    fn compute_with_norms(
        &self,
        x: &SparseVector,
        y: &SparseVector,
        x_norm_sq: f64,
        y_norm_sq: f64,
    ) -> f64 {
        (**self).compute_with_norms(x, y, x_norm_sq, y_norm_sq)
    }
}
