//! Block working-set solver
//!
//! Every outer iteration picks a working set of up to `max_block_size`
//! violators, fetches their kernel rows in one cache call and solves the
//! subproblem restricted to the block with plain SMO in local buffers. The
//! accumulated change of the block is then pushed into the global gradient
//! in a single parallel sweep.

use crate::cache::KernelRowCache;
use crate::core::{try_filled, try_zeroed, OptimizationResult, Result, SvmConfig, TrainingStatus};
use crate::kernel::Kernel;
use crate::solver::working_set::{
    compute_bias, curvature, dual_objective, find_maximum_violating_pair, select_second_order,
    update_pair, AlphaStatus,
};
use crate::solver::{support_indices, SvmProblem, SvmSolver};
use log::{debug, info, warn};
use rayon::prelude::*;
use std::cmp::Ordering;

/// Block SMO solver
#[derive(Debug, Clone, Copy, Default)]
pub struct ThunderSolver;

/// Working-set size: the largest power of two not above `n`, capped by `max_block_size`
pub fn working_set_size(n: usize, max_block_size: usize) -> usize {
    if n == 0 {
        return 0;
    }
    let pow2 = 1usize << (usize::BITS - 1 - n.leading_zeros());
    pow2.min(max_block_size).max(2.min(n))
}

impl<K: Kernel> SvmSolver<K> for ThunderSolver {
    fn solve(&self, problem: &SvmProblem<'_, K>, config: &SvmConfig) -> Result<OptimizationResult> {
        let n = problem.len();
        let y = &problem.y;
        let c = &problem.c_bounds;
        let eps = config.accuracy_threshold;
        let block = working_set_size(n, config.max_block_size);
        let mut cache = KernelRowCache::with_memory_limit(n, config.cache_size, block)?;
        debug!("block solver: {n} vectors, working set of {block}");

        let mut alpha: Vec<f64> = try_zeroed(n, "alpha")?;
        let mut grad = try_filled(n, -1.0, "gradient")?;
        let mut status: Vec<AlphaStatus> = c.iter().map(|&c_t| AlphaStatus::of(0.0, c_t)).collect();
        let diag = problem.kernel.diagonal(problem.table);

        let mut selector = BlockSelector::new(n, block);
        let mut history = Vec::new();
        let mut iterations = 0usize;
        let mut gap = f64::INFINITY;
        let mut previous_gap = f64::NAN;
        let mut unchanged = 0usize;

        let status_out = loop {
            gap = find_maximum_violating_pair(0..n, y, &grad, &status).gap();
            if gap < eps {
                break TrainingStatus::Converged;
            }
            if (gap - previous_gap).abs() < eps * 1e-2 {
                unchanged += 1;
                if unchanged >= config.n_no_changes {
                    break TrainingStatus::Stalled;
                }
            } else {
                unchanged = 0;
            }
            previous_gap = gap;
            if iterations >= config.max_iterations {
                break TrainingStatus::MaxIterationsReached;
            }

            let ws = selector.select(y, &grad, &status).to_vec();
            let rows = cache.get_rows_block(problem.kernel, problem.table, &ws)?;

            let mut local = LocalProblem::gather(&ws, &rows, &alpha, &grad, y, c, &diag);
            let inner = local.solve(config);
            let delta = local.delta();

            let mut updates: Vec<(f64, &[f64])> = Vec::new();
            for (k, (&w, &d)) in ws.iter().zip(&delta).enumerate() {
                if d != 0.0 {
                    updates.push((y[w] * d, rows.row(k)));
                }
            }
            if updates.is_empty() {
                break TrainingStatus::NoWorkingSet;
            }

            grad.par_iter_mut()
                .zip(y.par_iter())
                .enumerate()
                .for_each(|(t, (g, &y_t))| {
                    let sum: f64 = updates.iter().map(|&(coeff, row)| coeff * row[t]).sum();
                    *g += y_t * sum;
                });
            for (k, &w) in ws.iter().enumerate() {
                alpha[w] = local.alpha[k];
                status[w] = AlphaStatus::of(alpha[w], c[w]);
            }

            iterations += 1;
            if config.track_objective {
                history.push(dual_objective(&alpha, &grad));
            }
            debug!("outer iteration {iterations}: gap {gap:.6e}, {inner} local steps");
        };

        match status_out {
            TrainingStatus::MaxIterationsReached => warn!(
                "block solver reached the iteration limit of {} with gap {gap:.6e}",
                config.max_iterations
            ),
            _ => info!("block solver finished after {iterations} iterations ({status_out:?}), gap {gap:.6e}"),
        }

        Ok(OptimizationResult {
            b: compute_bias(y, &grad, &status),
            support_vectors: support_indices(&alpha),
            objective_value: dual_objective(&alpha, &grad),
            alpha,
            iterations,
            gap,
            status: status_out,
            objective_history: history,
        })
    }
}

/// Chooses the working set of each outer iteration
///
/// Half of the previous set is kept, free multipliers first, so that
/// consecutive blocks overlap. The rest is filled alternately with the
/// strongest remaining violators of `I_up` and of `I_low`.
#[derive(Debug, Clone)]
pub struct BlockSelector {
    size: usize,
    previous: Vec<usize>,
    chosen: Vec<bool>,
}

impl BlockSelector {
    pub fn new(n: usize, size: usize) -> Self {
        Self {
            size: size.min(n),
            previous: Vec::new(),
            chosen: vec![false; n],
        }
    }

    pub fn select(&mut self, y: &[f64], grad: &[f64], status: &[AlphaStatus]) -> &[usize] {
        self.chosen.iter_mut().for_each(|c| *c = false);
        let mut next = Vec::with_capacity(self.size);

        let keep = self.size / 2;
        let (free, bounded): (Vec<usize>, Vec<usize>) = self
            .previous
            .iter()
            .copied()
            .partition(|&t| status[t] == AlphaStatus::Free);
        for t in free.into_iter().chain(bounded).take(keep) {
            self.chosen[t] = true;
            next.push(t);
        }

        let n = y.len();
        let score = |t: usize| -y[t] * grad[t];
        let mut up: Vec<usize> = (0..n).filter(|&t| status[t].is_up(y[t])).collect();
        let mut low: Vec<usize> = (0..n).filter(|&t| status[t].is_low(y[t])).collect();
        up.sort_by(|&a, &b| compare_scores(score(b), score(a)).then(a.cmp(&b)));
        low.sort_by(|&a, &b| compare_scores(score(a), score(b)).then(a.cmp(&b)));

        let (mut up_iter, mut low_iter) = (up.into_iter(), low.into_iter());
        let mut exhausted = (false, false);
        while next.len() < self.size && !(exhausted.0 && exhausted.1) {
            if !exhausted.0 {
                exhausted.0 = !take_next(&mut up_iter, &mut self.chosen, &mut next);
            }
            if next.len() < self.size && !exhausted.1 {
                exhausted.1 = !take_next(&mut low_iter, &mut self.chosen, &mut next);
            }
        }

        self.previous = next;
        &self.previous
    }
}

fn compare_scores(a: f64, b: f64) -> Ordering {
    a.partial_cmp(&b).unwrap_or(Ordering::Equal)
}

/// Push the first not-yet-chosen index; `false` once the iterator runs dry
fn take_next<I: Iterator<Item = usize>>(iter: &mut I, chosen: &mut [bool], out: &mut Vec<usize>) -> bool {
    for t in iter.by_ref() {
        if !chosen[t] {
            chosen[t] = true;
            out.push(t);
            return true;
        }
    }
    false
}

/// The subproblem restricted to one working set
struct LocalProblem {
    alpha: Vec<f64>,
    start: Vec<f64>,
    grad: Vec<f64>,
    y: Vec<f64>,
    c: Vec<f64>,
    diag: Vec<f64>,
    /// Row-major `m x m` kernel block
    kernel: Vec<f64>,
}

impl LocalProblem {
    fn gather(
        ws: &[usize],
        rows: &crate::cache::CachedRows<'_>,
        alpha: &[f64],
        grad: &[f64],
        y: &[f64],
        c: &[f64],
        diag: &[f64],
    ) -> Self {
        let pick = |values: &[f64]| ws.iter().map(|&w| values[w]).collect::<Vec<_>>();
        let m = ws.len();
        let mut kernel = Vec::with_capacity(m * m);
        for a in 0..m {
            let row = rows.row(a);
            kernel.extend(ws.iter().map(|&w| row[w]));
        }
        let local_alpha = pick(alpha);
        Self {
            start: local_alpha.clone(),
            alpha: local_alpha,
            grad: pick(grad),
            y: pick(y),
            c: pick(c),
            diag: pick(diag),
            kernel,
        }
    }

    fn len(&self) -> usize {
        self.y.len()
    }

    /// Local SMO; returns the number of pair updates taken
    fn solve(&mut self, config: &SvmConfig) -> usize {
        let m = self.len();
        let status = |alpha: &[f64], c: &[f64]| -> Vec<AlphaStatus> {
            alpha.iter().zip(c).map(|(&a, &c)| AlphaStatus::of(a, c)).collect()
        };
        let mut local_status = status(&self.alpha, &self.c);
        let mut local_eps = config.accuracy_threshold;
        let mut previous_diff = f64::NAN;
        let mut unchanged = 0usize;
        let mut steps = 0usize;

        for iter in 0..config.inner_iterations {
            let pair = find_maximum_violating_pair(0..m, &self.y, &self.grad, &local_status);
            let diff = pair.gap();
            if iter == 0 {
                local_eps = local_eps.max(0.1 * diff);
            }
            if diff < local_eps {
                break;
            }
            if (diff - previous_diff).abs() < config.accuracy_threshold * 1e-2 {
                unchanged += 1;
                if unchanged >= config.n_no_changes {
                    break;
                }
            } else {
                unchanged = 0;
            }
            previous_diff = diff;

            let Some(i) = pair.i else { break };
            let k_i = &self.kernel[i * m..(i + 1) * m];
            let j = select_second_order(
                0..m,
                pair.max_up,
                self.diag[i],
                &self.y,
                &self.grad,
                &local_status,
                |t| k_i[t],
                |t| self.diag[t],
                config.tau,
            );
            let Some(j) = j else { break };
            let k_j = &self.kernel[j * m..(j + 1) * m];

            let b = pair.max_up + self.y[j] * self.grad[j];
            let a = curvature(self.diag[i], self.diag[j], k_i[j], config.tau);
            let (mut alpha_i, mut alpha_j) = (self.alpha[i], self.alpha[j]);
            let (d_i, d_j) = update_pair(
                &mut alpha_i,
                &mut alpha_j,
                self.y[i],
                self.y[j],
                self.c[i],
                self.c[j],
                b,
                a,
            );
            self.alpha[i] = alpha_i;
            self.alpha[j] = alpha_j;
            local_status[i] = AlphaStatus::of(alpha_i, self.c[i]);
            local_status[j] = AlphaStatus::of(alpha_j, self.c[j]);

            let (w_i, w_j) = (self.y[i] * d_i, self.y[j] * d_j);
            for t in 0..m {
                self.grad[t] += self.y[t] * (w_i * k_i[t] + w_j * k_j[t]);
            }
            steps += 1;
        }
        steps
    }

    fn delta(&self) -> Vec<f64> {
        self.alpha.iter().zip(&self.start).map(|(a, s)| a - s).collect()
    }
}
