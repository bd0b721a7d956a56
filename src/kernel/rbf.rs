//! RBF (Gaussian) kernel implementation
//!
//! K(x, y) = exp(-||x - y||² / (2σ²))

use crate::core::{DalError, Result, SparseVector};
use crate::kernel::Kernel;

/// Gaussian kernel parameterised by its width `sigma`
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RbfKernel {
    sigma: f64,
    coeff: f64,
}

impl RbfKernel {
    /// Create an RBF kernel; `sigma` must be positive and finite
    pub fn new(sigma: f64) -> Result<Self> {
        if !(sigma > 0.0) || !sigma.is_finite() {
            return Err(DalError::InvalidParameter(format!(
                "RBF sigma must be positive, got {sigma}"
            )));
        }
        Ok(Self {
            sigma,
            coeff: -0.5 / (sigma * sigma),
        })
    }

    pub fn sigma(&self) -> f64 {
        self.sigma
    }
}

impl Default for RbfKernel {
    fn default() -> Self {
        Self {
            sigma: 1.0,
            coeff: -0.5,
        }
    }
}

impl Kernel for RbfKernel {
    fn compute(&self, x: &SparseVector, y: &SparseVector) -> f64 {
        self.compute_with_norms(x, y, x.norm_squared(), y.norm_squared())
    }

    fn compute_with_norms(
        &self,
        x: &SparseVector,
        y: &SparseVector,
        x_norm_sq: f64,
        y_norm_sq: f64,
    ) -> f64 {
        // ||x - y||² = ||x||² + ||y||² - 2 x^T y, clamped against rounding
        let squared_distance = (x_norm_sq + y_norm_sq - 2.0 * x.dot(y)).max(0.0);
        (self.coeff * squared_distance).exp()
    }
}
