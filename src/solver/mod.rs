//! SVM dual solvers
//!
//! Two strategies share one contract, [`SvmSolver::solve`]:
//!
//! * [`BoserSolver`] - classic SMO: one maximal-violating / second-order pair
//!   per iteration, with shrinking and gradient reconstruction.
//! * [`ThunderSolver`] - block working sets solved locally with SMO, merged
//!   back into the global gradient once per outer iteration.
//!
//! [`solver_for`] picks the strategy from [`SolverMethod`].

pub mod shrinking;
pub mod smo;
pub mod thunder;
pub mod working_set;

pub use self::shrinking::*;
pub use self::smo::*;
pub use self::thunder::*;
pub use self::working_set::*;

use crate::core::{OptimizationResult, Result, SolverMethod, SvmConfig};
use crate::data::FeatureTable;
use crate::kernel::Kernel;

/// A binary training problem with labels already mapped to {-1, +1}
pub struct SvmProblem<'a, K: Kernel> {
    pub kernel: &'a K,
    pub table: &'a FeatureTable,
    /// Labels in {-1, +1}
    pub y: Vec<f64>,
    /// Per-sample upper bounds `C * weight_i`
    pub c_bounds: Vec<f64>,
}

impl<'a, K: Kernel> SvmProblem<'a, K> {
    /// Problem with uniform weights
    pub fn new(kernel: &'a K, table: &'a FeatureTable, y: Vec<f64>, c: f64) -> Self {
        let c_bounds = vec![c; y.len()];
        Self {
            kernel,
            table,
            y,
            c_bounds,
        }
    }

    pub fn len(&self) -> usize {
        self.y.len()
    }

    pub fn is_empty(&self) -> bool {
        self.y.is_empty()
    }
}

/// Common contract of the SMO solver variants
pub trait SvmSolver<K: Kernel>: Send + Sync {
    fn solve(&self, problem: &SvmProblem<'_, K>, config: &SvmConfig) -> Result<OptimizationResult>;
}

/// Solver strategy for `method`
pub fn solver_for<K: Kernel>(method: SolverMethod) -> Box<dyn SvmSolver<K>> {
    match method {
        SolverMethod::Boser => Box::new(BoserSolver),
        SolverMethod::Thunder => Box::new(ThunderSolver),
    }
}

/// Indices with a non-zero multiplier
pub(crate) fn support_indices(alpha: &[f64]) -> Vec<usize> {
    alpha
        .iter()
        .enumerate()
        .filter_map(|(i, &a)| if a > 0.0 { Some(i) } else { None })
        .collect()
}
