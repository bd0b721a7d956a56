//! Linear kernel implementation

use crate::core::SparseVector;
use crate::kernel::Kernel;

/// Linear kernel: K(x, y) = scale * x^T y + shift
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LinearKernel {
    pub scale: f64,
    pub shift: f64,
}

impl LinearKernel {
    /// Plain dot-product kernel
    pub fn new() -> Self {
        Self::with_params(1.0, 0.0)
    }

    pub fn with_params(scale: f64, shift: f64) -> Self {
        Self { scale, shift }
    }
}

impl Default for LinearKernel {
    fn default() -> Self {
        Self::new()
    }
}

impl Kernel for LinearKernel {
    fn compute(&self, x: &SparseVector, y: &SparseVector) -> f64 {
        self.scale * x.dot(y) + self.shift
    }
}
