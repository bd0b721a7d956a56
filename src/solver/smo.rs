//! Classic Sequential Minimal Optimization (Boser variant)
//!
//! Each iteration picks `i` as the maximal violator in `I_up` and `j` by
//! second-order working-set selection in `I_low`, solves the two-variable
//! subproblem in closed form and propagates the change into the gradient of
//! the active vectors. Kernel rows come from the shared LRU row cache.
//! Shrinking runs every `min(n, shrinking_iterations)` iterations.

use crate::cache::KernelRowCache;
use crate::core::{try_filled, try_zeroed, OptimizationResult, Result, SvmConfig, TrainingStatus};
use crate::kernel::Kernel;
use crate::solver::shrinking::{reconstruct_gradient, ActiveSet};
use crate::solver::working_set::{
    compute_bias, curvature, dual_objective, find_maximum_violating_pair, select_second_order,
    update_pair, AlphaStatus,
};
use crate::solver::{support_indices, SvmProblem, SvmSolver};
use log::{debug, info, warn};
use rayon::prelude::*;

/// Two-variable SMO solver with shrinking
#[derive(Debug, Clone, Copy, Default)]
pub struct BoserSolver;

impl<K: Kernel> SvmSolver<K> for BoserSolver {
    fn solve(&self, problem: &SvmProblem<'_, K>, config: &SvmConfig) -> Result<OptimizationResult> {
        let n = problem.len();
        let mut cache = KernelRowCache::with_memory_limit(n, config.cache_size, 2)?;
        let alpha = try_zeroed(n, "alpha")?;
        let mut state = BoserState::new(problem, &mut cache, alpha)?;
        state.run(problem, config, &mut cache)
    }
}

/// Outcome of one working-set selection
#[derive(Debug, Clone, Copy)]
enum Selection {
    Pair { i: usize, j: usize, max_up: f64, gap: f64 },
    Optimal { gap: f64 },
    Degenerate { gap: f64 },
}

struct BoserState {
    alpha: Vec<f64>,
    grad: Vec<f64>,
    g_bar: Vec<f64>,
    status: Vec<AlphaStatus>,
    diag: Vec<f64>,
}

impl BoserState {
    /// Build gradient and `g_bar` for a feasible starting point `alpha`
    fn new<K: Kernel>(
        problem: &SvmProblem<'_, K>,
        cache: &mut KernelRowCache,
        alpha: Vec<f64>,
    ) -> Result<Self> {
        let n = problem.len();
        let y = &problem.y;
        let mut grad = try_filled(n, -1.0, "gradient")?;
        let mut g_bar = try_zeroed(n, "gradient of bounded multipliers")?;
        let status: Vec<AlphaStatus> = alpha
            .iter()
            .zip(&problem.c_bounds)
            .map(|(&a, &c)| AlphaStatus::of(a, c))
            .collect();

        for j in 0..n {
            if alpha[j] <= 0.0 {
                continue;
            }
            let rows = cache.get_rows_block(problem.kernel, problem.table, &[j])?;
            let k_j = rows.row(0);
            for t in 0..n {
                let q_tj = y[t] * y[j] * k_j[t];
                grad[t] += alpha[j] * q_tj;
                if status[j] == AlphaStatus::UpperBound {
                    g_bar[t] += problem.c_bounds[j] * q_tj;
                }
            }
        }

        Ok(Self {
            alpha,
            grad,
            g_bar,
            status,
            diag: problem.kernel.diagonal(problem.table),
        })
    }

    fn run<K: Kernel>(
        &mut self,
        problem: &SvmProblem<'_, K>,
        config: &SvmConfig,
        cache: &mut KernelRowCache,
    ) -> Result<OptimizationResult> {
        let n = problem.len();
        let shrinking = config.shrinking && !config.track_objective;
        if config.shrinking && !shrinking {
            debug!("shrinking disabled while the dual objective is tracked");
        }
        let shrink_every = config.shrinking_iterations.min(n).max(1);
        let mut counter = shrink_every;
        let mut active = ActiveSet::new(n);
        let mut iterations = 0usize;
        let mut history = Vec::new();
        let mut gap = f64::INFINITY;

        let status = loop {
            if iterations >= config.max_iterations {
                break TrainingStatus::MaxIterationsReached;
            }

            if shrinking {
                counter -= 1;
                if counter == 0 {
                    counter = shrink_every;
                    self.shrink(problem, config, cache, &mut active)?;
                }
            }

            let mut selection = self.select_pair(problem, config, cache, &active)?;
            if !matches!(selection, Selection::Pair { .. }) && !active.is_full() {
                // The shrunk problem is solved; check the full one before stopping
                self.reconstruct(problem, cache, &active)?;
                active.reset();
                selection = self.select_pair(problem, config, cache, &active)?;
                if matches!(selection, Selection::Pair { .. }) {
                    counter = 1;
                }
            }

            match selection {
                Selection::Pair { i, j, max_up, gap: g } => {
                    gap = g;
                    self.take_step(problem, config, cache, &active, i, j, max_up)?;
                }
                Selection::Optimal { gap: g } => {
                    gap = g;
                    break TrainingStatus::Converged;
                }
                Selection::Degenerate { gap: g } => {
                    gap = g;
                    break TrainingStatus::NoWorkingSet;
                }
            }

            iterations += 1;
            if config.track_objective {
                history.push(dual_objective(&self.alpha, &self.grad));
            }
            if iterations % 1000 == 0 {
                debug!("iteration {iterations}: gap {gap:.6e}, {} active", active.len());
            }
        };

        if !active.is_full() {
            self.reconstruct(problem, cache, &active)?;
        }

        match status {
            TrainingStatus::MaxIterationsReached => warn!(
                "SMO reached the iteration limit of {} with gap {gap:.6e}",
                config.max_iterations
            ),
            _ => info!("SMO finished after {iterations} iterations ({status:?}), gap {gap:.6e}"),
        }
        let stats = cache.stats();
        debug!(
            "kernel cache: {} hits, {} misses, {} rows",
            stats.hits, stats.misses, stats.capacity
        );

        Ok(OptimizationResult {
            b: compute_bias(&problem.y, &self.grad, &self.status),
            support_vectors: support_indices(&self.alpha),
            objective_value: dual_objective(&self.alpha, &self.grad),
            alpha: self.alpha.clone(),
            iterations,
            gap,
            status,
            objective_history: history,
        })
    }

    fn select_pair<K: Kernel>(
        &self,
        problem: &SvmProblem<'_, K>,
        config: &SvmConfig,
        cache: &mut KernelRowCache,
        active: &ActiveSet,
    ) -> Result<Selection> {
        let y = &problem.y;
        let pair = find_maximum_violating_pair(
            active.indices().iter().copied(),
            y,
            &self.grad,
            &self.status,
        );
        let gap = pair.gap();
        let i = match pair.i {
            Some(i) if gap >= config.accuracy_threshold => i,
            _ => return Ok(Selection::Optimal { gap }),
        };

        let rows = cache.get_rows_block(problem.kernel, problem.table, &[i])?;
        let k_i = rows.row(0);
        let j = select_second_order(
            active.indices().iter().copied(),
            pair.max_up,
            self.diag[i],
            y,
            &self.grad,
            &self.status,
            |t| k_i[t],
            |t| self.diag[t],
            config.tau,
        );
        Ok(match j {
            Some(j) => Selection::Pair {
                i,
                j,
                max_up: pair.max_up,
                gap,
            },
            None => Selection::Degenerate { gap },
        })
    }

    #[allow(clippy::too_many_arguments)]
    fn take_step<K: Kernel>(
        &mut self,
        problem: &SvmProblem<'_, K>,
        config: &SvmConfig,
        cache: &mut KernelRowCache,
        active: &ActiveSet,
        i: usize,
        j: usize,
        max_up: f64,
    ) -> Result<()> {
        let y = &problem.y;
        let c = &problem.c_bounds;
        let rows = cache.get_rows_block(problem.kernel, problem.table, &[i, j])?;
        let (k_i, k_j) = (rows.row(0), rows.row(1));

        let b = max_up + y[j] * self.grad[j];
        let a = curvature(self.diag[i], self.diag[j], k_i[j], config.tau);
        let (mut alpha_i, mut alpha_j) = (self.alpha[i], self.alpha[j]);
        let (d_i, d_j) = update_pair(&mut alpha_i, &mut alpha_j, y[i], y[j], c[i], c[j], b, a);
        self.alpha[i] = alpha_i;
        self.alpha[j] = alpha_j;
        debug_assert!((0.0..=c[i]).contains(&alpha_i) && (0.0..=c[j]).contains(&alpha_j));

        let (w_i, w_j) = (y[i] * d_i, y[j] * d_j);
        if active.is_full() {
            self.grad
                .par_iter_mut()
                .zip(y.par_iter())
                .enumerate()
                .for_each(|(t, (g, &y_t))| *g += y_t * (w_i * k_i[t] + w_j * k_j[t]));
        } else {
            for &t in active.indices() {
                self.grad[t] += y[t] * (w_i * k_i[t] + w_j * k_j[t]);
            }
        }

        for (index, k_row) in [(i, k_i), (j, k_j)] {
            let was_upper = self.status[index] == AlphaStatus::UpperBound;
            self.status[index] = AlphaStatus::of(self.alpha[index], c[index]);
            let is_upper = self.status[index] == AlphaStatus::UpperBound;
            if was_upper != is_upper {
                let sign = if is_upper { 1.0 } else { -1.0 };
                let scale = sign * c[index] * y[index];
                self.g_bar
                    .par_iter_mut()
                    .zip(y.par_iter())
                    .enumerate()
                    .for_each(|(t, (g, &y_t))| *g += scale * y_t * k_row[t]);
            }
        }
        Ok(())
    }

    fn shrink<K: Kernel>(
        &mut self,
        problem: &SvmProblem<'_, K>,
        config: &SvmConfig,
        cache: &mut KernelRowCache,
        active: &mut ActiveSet,
    ) -> Result<()> {
        if active.needs_unshrink(&problem.y, &self.grad, &self.status, config.accuracy_threshold) {
            self.reconstruct(problem, cache, active)?;
            active.reset();
        }
        active.shrink(&problem.y, &self.grad, &self.status);
        Ok(())
    }

    fn reconstruct<K: Kernel>(
        &mut self,
        problem: &SvmProblem<'_, K>,
        cache: &mut KernelRowCache,
        active: &ActiveSet,
    ) -> Result<()> {
        reconstruct_gradient(
            cache,
            problem.kernel,
            problem.table,
            active,
            &self.alpha,
            &problem.y,
            &self.status,
            &self.g_bar,
            &mut self.grad,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::FeatureTable;
    use crate::kernel::{LinearKernel, RbfKernel};
    use crate::solver::test_support::{exact_gradient, overlapping_table, square_problem_table};
    use approx::assert_relative_eq;

    fn decision<K: Kernel>(problem: &SvmProblem<'_, K>, result: &OptimizationResult, t: usize) -> f64 {
        result
            .support_vectors
            .iter()
            .map(|&s| {
                result.alpha[s]
                    * problem.y[s]
                    * problem
                        .kernel
                        .compute(problem.table.row(s), problem.table.row(t))
            })
            .sum::<f64>()
            + result.b
    }

    #[test]
    fn test_square_dataset_is_separated() {
        let table = square_problem_table();
        let kernel = LinearKernel::new();
        let problem = SvmProblem::new(&kernel, &table, vec![-1.0, -1.0, 1.0, 1.0], 1.0);

        let result = BoserSolver.solve(&problem, &SvmConfig::default()).unwrap();

        assert_eq!(result.status, TrainingStatus::Converged);
        assert!(result.iterations <= 20);
        assert!((2..=4).contains(&result.support_vectors.len()));
        for t in 0..4 {
            assert!(decision(&problem, &result, t) * problem.y[t] > 0.0);
        }
    }

    #[test]
    fn test_box_constraints_with_weights() {
        let (table, y) = overlapping_table(20);
        let kernel = RbfKernel::new(0.7).unwrap();
        let mut problem = SvmProblem::new(&kernel, &table, y, 2.0);
        for (t, c) in problem.c_bounds.iter_mut().enumerate() {
            *c *= if t % 3 == 0 { 0.25 } else { 1.0 };
        }

        let result = BoserSolver.solve(&problem, &SvmConfig { c: 2.0, ..SvmConfig::default() }).unwrap();
        for (t, &a) in result.alpha.iter().enumerate() {
            assert!(a >= 0.0 && a <= problem.c_bounds[t], "alpha[{t}] = {a}");
        }
        // Equality constraint
        let balance: f64 = result.alpha.iter().zip(&problem.y).map(|(a, y)| a * y).sum();
        assert!(balance.abs() < 1e-9);
    }

    #[test]
    fn test_dual_objective_is_monotone() {
        let (table, y) = overlapping_table(15);
        let kernel = LinearKernel::new();
        let problem = SvmProblem::new(&kernel, &table, y, 0.5);
        let config = SvmConfig {
            c: 0.5,
            track_objective: true,
            ..SvmConfig::default()
        };

        let result = BoserSolver.solve(&problem, &config).unwrap();
        assert_eq!(result.objective_history.len(), result.iterations);
        for pair in result.objective_history.windows(2) {
            assert!(pair[1] >= pair[0] - 1e-10, "{} -> {}", pair[0], pair[1]);
        }
    }

    #[test]
    fn test_tracking_objective_turns_shrinking_off() {
        let (table, y) = overlapping_table(20);
        let kernel = RbfKernel::new(0.7).unwrap();
        let problem = SvmProblem::new(&kernel, &table, y, 1.0);
        let tracked = |shrinking| SvmConfig {
            shrinking,
            shrinking_iterations: 3,
            track_objective: true,
            ..SvmConfig::default()
        };

        let requested = BoserSolver.solve(&problem, &tracked(true)).unwrap();
        let plain = BoserSolver.solve(&problem, &tracked(false)).unwrap();
        assert_eq!(requested.alpha, plain.alpha);
        assert_eq!(requested.iterations, plain.iterations);
        assert_eq!(requested.objective_history, plain.objective_history);
    }

    #[test]
    fn test_gradient_reconstruction_matches_exact_gradient() {
        let (table, y) = overlapping_table(6);
        let kernel = RbfKernel::new(1.0).unwrap();
        let problem = SvmProblem::new(&kernel, &table, y, 1.0);
        let n = problem.len();

        // Feasible point mixing free, upper-bound and lower-bound multipliers
        let mut alpha = vec![0.0; n];
        alpha[0] = 1.0;
        alpha[1] = 1.0;
        alpha[2] = 0.4;
        alpha[3] = 0.4;

        let mut cache = KernelRowCache::new(n, 3).unwrap();
        let mut state = BoserState::new(&problem, &mut cache, alpha.clone()).unwrap();
        let exact = exact_gradient(&problem, &alpha);

        // Keep the free pair active; everything at a bound is shrunk
        let active = ActiveSet::from_indices(n, vec![2, 3]);
        assert!(!active.is_full());
        for t in active.inactive() {
            state.grad[t] = f64::NAN;
        }

        state.reconstruct(&problem, &mut cache, &active).unwrap();
        for t in 0..n {
            assert_relative_eq!(state.grad[t], exact[t], epsilon = 1e-10);
        }
    }

    #[test]
    fn test_incremental_gradient_with_shrinking_stays_exact() {
        let (table, y) = overlapping_table(25);
        let kernel = RbfKernel::new(0.5).unwrap();
        let problem = SvmProblem::new(&kernel, &table, y, 1.0);
        let config = SvmConfig {
            shrinking_iterations: 5,
            cache_size: 1024,
            ..SvmConfig::default()
        };

        let n = problem.len();
        let mut cache = KernelRowCache::with_memory_limit(n, config.cache_size, 2).unwrap();
        let mut state = BoserState::new(&problem, &mut cache, vec![0.0; n]).unwrap();
        let result = state.run(&problem, &config, &mut cache).unwrap();

        let exact = exact_gradient(&problem, &result.alpha);
        for t in 0..n {
            assert_relative_eq!(state.grad[t], exact[t], epsilon = 1e-8);
        }
    }

    #[test]
    fn test_shrinking_does_not_change_solution() {
        let (table, y) = overlapping_table(20);
        let kernel = LinearKernel::new();
        let problem = SvmProblem::new(&kernel, &table, y, 1.0);

        let with = BoserSolver
            .solve(&problem, &SvmConfig { shrinking_iterations: 3, ..SvmConfig::default() })
            .unwrap();
        let without = BoserSolver
            .solve(&problem, &SvmConfig { shrinking: false, ..SvmConfig::default() })
            .unwrap();

        assert_relative_eq!(with.objective_value, without.objective_value, epsilon = 1e-3);
        assert_relative_eq!(with.b, without.b, epsilon = 0.05);
    }

    #[test]
    fn test_iteration_limit_is_not_an_error() {
        let (table, y) = overlapping_table(10);
        let kernel = LinearKernel::new();
        let problem = SvmProblem::new(&kernel, &table, y, 1.0);
        let config = SvmConfig {
            max_iterations: 1,
            ..SvmConfig::default()
        };

        let result = BoserSolver.solve(&problem, &config).unwrap();
        assert_eq!(result.status, TrainingStatus::MaxIterationsReached);
        assert_eq!(result.iterations, 1);
        assert!(!result.support_vectors.is_empty());
    }

    #[test]
    fn test_duplicate_points_use_tau() {
        let table = FeatureTable::from_dense(&[1.0, 1.0, 1.0, 1.0], 2, 2).unwrap();
        let kernel = LinearKernel::new();
        let problem = SvmProblem::new(&kernel, &table, vec![1.0, -1.0], 1.0);

        let result = BoserSolver.solve(&problem, &SvmConfig::default()).unwrap();
        // Identical points with opposite labels both end at C
        assert_eq!(result.alpha, vec![1.0, 1.0]);
        assert_ne!(result.status, TrainingStatus::MaxIterationsReached);
    }
}
