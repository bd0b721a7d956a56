//! Polynomial kernel implementation
//!
//! K(x, y) = (scale * <x, y> + shift)^degree

use crate::core::{DalError, Result, SparseVector};
use crate::kernel::traits::Kernel;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PolynomialKernel {
    pub degree: u32,
    pub scale: f64,
    pub shift: f64,
}

impl PolynomialKernel {
    /// Create a polynomial kernel; the degree must be at least 1
    pub fn new(degree: u32, scale: f64, shift: f64) -> Result<Self> {
        if degree == 0 {
            return Err(DalError::InvalidParameter(
                "polynomial degree must be positive".to_string(),
            ));
        }
        if !scale.is_finite() || !shift.is_finite() {
            return Err(DalError::InvalidParameter(
                "polynomial scale and shift must be finite".to_string(),
            ));
        }
        Ok(Self {
            degree,
            scale,
            shift,
        })
    }
}

impl Kernel for PolynomialKernel {
    fn compute(&self, x: &SparseVector, y: &SparseVector) -> f64 {
        (self.scale * x.dot(y) + self.shift).powi(self.degree as i32)
    }
}
