//! Tagged kernel choice
//!
//! `KernelKind` is the serializable form of the built-in kernels. It is what
//! model files and the CLI carry around; it implements `Kernel` by delegating.

use crate::core::{Result, SparseVector};
use crate::kernel::{Kernel, LinearKernel, PolynomialKernel, RbfKernel};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum KernelKind {
    Linear { scale: f64, shift: f64 },
    Rbf { sigma: f64 },
    Polynomial { degree: u32, scale: f64, shift: f64 },
}

impl KernelKind {
    /// Check the parameters by building the concrete kernel
    pub fn validate(&self) -> Result<()> {
        match *self {
            KernelKind::Linear { .. } => Ok(()),
            KernelKind::Rbf { sigma } => RbfKernel::new(sigma).map(|_| ()),
            KernelKind::Polynomial {
                degree,
                scale,
                shift,
            } => PolynomialKernel::new(degree, scale, shift).map(|_| ()),
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            KernelKind::Linear { .. } => "linear",
            KernelKind::Rbf { .. } => "rbf",
            KernelKind::Polynomial { .. } => "polynomial",
        }
    }
}

impl Default for KernelKind {
    fn default() -> Self {
        KernelKind::Linear {
            scale: 1.0,
            shift: 0.0,
        }
    }
}

impl From<LinearKernel> for KernelKind {
    fn from(k: LinearKernel) -> Self {
        KernelKind::Linear {
            scale: k.scale,
            shift: k.shift,
        }
    }
}

impl From<RbfKernel> for KernelKind {
    fn from(k: RbfKernel) -> Self {
        KernelKind::Rbf { sigma: k.sigma() }
    }
}

impl From<PolynomialKernel> for KernelKind {
    fn from(k: PolynomialKernel) -> Self {
        KernelKind::Polynomial {
            degree: k.degree,
            scale: k.scale,
            shift: k.shift,
        }
    }
}

impl Kernel for KernelKind {
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
        match *self {
            KernelKind::Linear { scale, shift } => scale * x.dot(y) + shift,
            KernelKind::Rbf { sigma } => {
                let squared_distance = (x_norm_sq + y_norm_sq - 2.0 * x.dot(y)).max(0.0);
                (-0.5 * squared_distance / (sigma * sigma)).exp()
            }
            KernelKind::Polynomial {
                degree,
                scale,
                shift,
            } => (scale * x.dot(y) + shift).powi(degree as i32),
        }
    }
}
