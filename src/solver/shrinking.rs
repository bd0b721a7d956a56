//! Shrinking heuristic and gradient reconstruction
//!
//! A bounded multiplier whose gradient keeps it pinned to its bound is
//! removed from the active set, so working-set selection and gradient updates
//! only touch the remaining vectors. Shrunk gradients go stale; they are
//! rebuilt from scratch with [`reconstruct_gradient`] before the solver either
//! declares convergence or re-activates every vector.
//!
//! Reconstruction relies on `g_bar`, the part of the gradient contributed by
//! multipliers at their upper bound: `g_bar_t = sum_{a_j = C_j} C_j Q_tj`.
//! Since every shrunk multiplier sits on a bound,
//! `G_t = g_bar_t - 1 + sum_{j free} a_j Q_tj`.

use crate::cache::KernelRowCache;
use crate::core::Result;
use crate::data::FeatureTable;
use crate::kernel::Kernel;
use crate::solver::working_set::{find_maximum_violating_pair, AlphaStatus};
use log::debug;

/// Indices of the vectors still taking part in optimisation
#[derive(Debug, Clone)]
pub struct ActiveSet {
    indices: Vec<usize>,
    n_total: usize,
    unshrunk: bool,
}

impl ActiveSet {
    pub fn new(n_total: usize) -> Self {
        Self {
            indices: (0..n_total).collect(),
            n_total,
            unshrunk: false,
        }
    }

    #[cfg(test)]
    pub(crate) fn from_indices(n_total: usize, indices: Vec<usize>) -> Self {
        Self {
            indices,
            n_total,
            unshrunk: false,
        }
    }

    pub fn indices(&self) -> &[usize] {
        &self.indices
    }

    pub fn len(&self) -> usize {
        self.indices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.indices.is_empty()
    }

    pub fn is_full(&self) -> bool {
        self.indices.len() == self.n_total
    }

    /// Re-activate every vector
    pub fn reset(&mut self) {
        self.indices.clear();
        self.indices.extend(0..self.n_total);
    }

    /// Indices not in the active set, in ascending order
    pub fn inactive(&self) -> Vec<usize> {
        let mut mask = vec![false; self.n_total];
        for &t in &self.indices {
            mask[t] = true;
        }
        (0..self.n_total).filter(|&t| !mask[t]).collect()
    }

    /// One shrinking pass
    ///
    /// Returns `true` when the gap fell below `10 * eps` for the first time;
    /// the caller must then rebuild the gradient and call [`reset`](Self::reset)
    /// before the pass removes anything.
    pub fn needs_unshrink(&mut self, y: &[f64], grad: &[f64], status: &[AlphaStatus], eps: f64) -> bool {
        let pair = find_maximum_violating_pair(self.indices.iter().copied(), y, grad, status);
        if !self.unshrunk && pair.gap() <= 10.0 * eps {
            self.unshrunk = true;
            return true;
        }
        false
    }

    /// Drop every vector the current gradient pins to its bound
    pub fn shrink(&mut self, y: &[f64], grad: &[f64], status: &[AlphaStatus]) -> usize {
        let pair = find_maximum_violating_pair(self.indices.iter().copied(), y, grad, status);
        let gmax_up = pair.max_up;
        let gmax_low = -pair.min_low;

        let before = self.indices.len();
        self.indices
            .retain(|&t| !be_shrunk(status[t], y[t], grad[t], gmax_up, gmax_low));
        let removed = before - self.indices.len();
        if removed > 0 {
            debug!(
                "shrinking removed {removed} vectors, {} remain active",
                self.indices.len()
            );
        }
        removed
    }
}

/// Whether a bounded multiplier can be taken out of the active set
fn be_shrunk(status: AlphaStatus, y: f64, g: f64, gmax_up: f64, gmax_low: f64) -> bool {
    match status {
        AlphaStatus::UpperBound if y > 0.0 => -g > gmax_up,
        AlphaStatus::UpperBound => -g > gmax_low,
        AlphaStatus::LowerBound if y > 0.0 => g > gmax_low,
        AlphaStatus::LowerBound => g > gmax_up,
        AlphaStatus::Fixed => true,
        AlphaStatus::Free => false,
    }
}

/// Rebuild the gradient of every inactive vector from `g_bar` and the free multipliers
#[allow(clippy::too_many_arguments)]
pub fn reconstruct_gradient<K: Kernel>(
    cache: &mut KernelRowCache,
    kernel: &K,
    table: &FeatureTable,
    active: &ActiveSet,
    alpha: &[f64],
    y: &[f64],
    status: &[AlphaStatus],
    g_bar: &[f64],
    grad: &mut [f64],
) -> Result<()> {
    if active.is_full() {
        return Ok(());
    }
    let inactive = active.inactive();
    for &t in &inactive {
        grad[t] = g_bar[t] - 1.0;
    }

    let free: Vec<usize> = (0..alpha.len())
        .filter(|&j| status[j] == AlphaStatus::Free)
        .collect();
    debug!(
        "reconstructing gradient of {} inactive vectors from {} free multipliers",
        inactive.len(),
        free.len()
    );
    for &j in &free {
        let rows = cache.get_rows_block(kernel, table, &[j])?;
        let k_j = rows.row(0);
        let scale = alpha[j] * y[j];
        for &t in &inactive {
            grad[t] += scale * y[t] * k_j[t];
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_active_set_reset_and_inactive() {
        let mut active = ActiveSet::new(5);
        assert!(active.is_full());

        let y = [1.0, -1.0, 1.0, -1.0, 1.0];
        // Vector 4 is at its lower bound with a large positive gradient
        let grad = [-1.0, -1.0, -0.2, 0.1, 5.0];
        let status = [
            AlphaStatus::Free,
            AlphaStatus::Free,
            AlphaStatus::Free,
            AlphaStatus::Free,
            AlphaStatus::LowerBound,
        ];
        let removed = active.shrink(&y, &grad, &status);
        assert_eq!(removed, 1);
        assert_eq!(active.inactive(), vec![4]);
        assert!(!active.is_full());

        active.reset();
        assert!(active.is_full());
        assert!(active.inactive().is_empty());
    }

    #[test]
    fn test_free_vectors_are_never_shrunk() {
        assert!(!be_shrunk(AlphaStatus::Free, 1.0, 100.0, 0.0, 0.0));
        assert!(be_shrunk(AlphaStatus::Fixed, 1.0, 0.0, 0.0, 0.0));
    }

    #[test]
    fn test_be_shrunk_upper_bound() {
        // y = +1 at C: stays there while -G exceeds every up-set violation
        assert!(be_shrunk(AlphaStatus::UpperBound, 1.0, -3.0, 1.0, 1.0));
        assert!(!be_shrunk(AlphaStatus::UpperBound, 1.0, -0.5, 1.0, 1.0));
    }

    #[test]
    fn test_needs_unshrink_only_once() {
        let mut active = ActiveSet::new(2);
        let y = [1.0, -1.0];
        let grad = [0.0, 0.0];
        let status = [AlphaStatus::Free, AlphaStatus::Free];
        assert!(active.needs_unshrink(&y, &grad, &status, 0.1));
        assert!(!active.needs_unshrink(&y, &grad, &status, 0.1));
    }
}
