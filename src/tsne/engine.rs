//! Barnes-Hut t-SNE gradient descent
//!
//! One iteration is a strict pipeline of parallel stages: bounding box and
//! tree build, summarisation, repulsion, attraction, then integration. The
//! first `exploration_iter` iterations use early exaggeration and momentum
//! 0.5, the rest momentum 0.8 without exaggeration. Convergence is checked
//! every `n_iter_check` iterations and on the last one.

use crate::core::{try_filled, DalError, Result};
use crate::data::CsrMatrix;
use crate::exec::ExecutionContext;
use crate::tsne::forces::{attraction, repulsion};
use crate::tsne::quadtree::{QuadTree, MAX_ENTRIES};
use log::{debug, info};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

const EXPLORATION_MOMENTUM: f64 = 0.5;
const REFINEMENT_MOMENTUM: f64 = 0.8;
const MIN_GAIN: f64 = 0.01;

/// Schedule and numeric parameters of the gradient descent
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TsneParams {
    /// Total number of iterations
    pub max_iter: usize,
    /// Iterations run with early exaggeration
    pub exploration_iter: usize,
    /// Refinement iterations without a divergence improvement before stopping
    pub n_iter_without_progress: usize,
    /// Convergence check period
    pub n_iter_check: usize,
    pub early_exaggeration: f64,
    pub learning_rate: f64,
    pub min_grad_norm: f64,
    /// Barnes-Hut opening angle; 0 computes the exact repulsion
    pub angle: f64,
}

impl Default for TsneParams {
    fn default() -> Self {
        Self {
            max_iter: 1000,
            exploration_iter: 250,
            n_iter_without_progress: 300,
            n_iter_check: 50,
            early_exaggeration: 12.0,
            learning_rate: 200.0,
            min_grad_norm: 1e-7,
            angle: 0.5,
        }
    }
}

impl TsneParams {
    pub fn validate(&self) -> Result<()> {
        let positive = |name: &str, v: f64| {
            if v > 0.0 && v.is_finite() {
                Ok(())
            } else {
                Err(DalError::InvalidParameter(format!(
                    "{name} must be positive and finite, got {v}"
                )))
            }
        };
        if self.max_iter == 0 {
            return Err(DalError::InvalidParameter(
                "max_iter must be at least 1".to_string(),
            ));
        }
        if self.n_iter_check == 0 {
            return Err(DalError::InvalidParameter(
                "n_iter_check must be at least 1".to_string(),
            ));
        }
        positive("early_exaggeration", self.early_exaggeration)?;
        positive("learning_rate", self.learning_rate)?;
        if !(self.min_grad_norm >= 0.0 && self.min_grad_norm.is_finite()) {
            return Err(DalError::InvalidParameter(format!(
                "min_grad_norm must be non-negative, got {}",
                self.min_grad_norm
            )));
        }
        if !(self.angle >= 0.0 && self.angle.is_finite()) {
            return Err(DalError::InvalidParameter(format!(
                "angle must be non-negative, got {}",
                self.angle
            )));
        }
        Ok(())
    }
}

/// Diagnostics of a finished run
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TsneResult {
    /// Number of iterations performed
    pub cur_iter: usize,
    /// KL divergence at the last check
    pub divergence: f64,
    /// Gradient norm of the last iteration
    pub grad_norm: f64,
}

/// Optimise `embedding` in place against the affinity matrix
///
/// Every input is validated before the first write; on error the embedding
/// is left untouched.
pub fn tsne_gradient_descent(
    context: &ExecutionContext,
    embedding: &mut [[f64; 2]],
    affinity: &CsrMatrix,
    params: &TsneParams,
) -> Result<TsneResult> {
    params.validate()?;
    let n = embedding.len();
    if n == 0 {
        return Err(DalError::EmptyDataset);
    }
    if n > MAX_ENTRIES {
        return Err(DalError::InvalidParameter(format!(
            "at most {MAX_ENTRIES} points are supported, got {n}"
        )));
    }
    if let Some(i) = embedding.iter().position(|p| !p[0].is_finite() || !p[1].is_finite()) {
        return Err(DalError::InvalidDataset(format!(
            "embedding row {i} is not finite"
        )));
    }
    affinity.validate_square(n)?;
    info!(
        "t-SNE on {n} points, {} affinities, {} iterations",
        affinity.nnz(),
        params.max_iter
    );

    let mut state = DescentState::new(embedding)?;
    let result = context.install(|| state.run(affinity, params))?;
    embedding.copy_from_slice(&state.points);
    Ok(result)
}

/// Buffers that live for the whole run
struct DescentState {
    points: Vec<[f64; 2]>,
    gains: Vec<[f64; 2]>,
    velocity: Vec<[f64; 2]>,
    attractive: Vec<[f64; 2]>,
    repulsive: Vec<[f64; 2]>,
    gradient: Vec<[f64; 2]>,
    z_terms: Vec<f64>,
    kl_terms: Vec<f64>,
}

impl DescentState {
    fn new(embedding: &[[f64; 2]]) -> Result<Self> {
        let n = embedding.len();
        let mut points = try_filled(n, [0.0; 2], "embedding copy")?;
        points.copy_from_slice(embedding);
        Ok(Self {
            points,
            gains: try_filled(n, [1.0; 2], "gains")?,
            velocity: try_filled(n, [0.0; 2], "velocity")?,
            attractive: try_filled(n, [0.0; 2], "attractive forces")?,
            repulsive: try_filled(n, [0.0; 2], "repulsive forces")?,
            gradient: try_filled(n, [0.0; 2], "gradient")?,
            z_terms: try_filled(n, 0.0, "normalisation terms")?,
            kl_terms: try_filled(n, 0.0, "divergence terms")?,
        })
    }

    fn run(&mut self, affinity: &CsrMatrix, params: &TsneParams) -> Result<TsneResult> {
        let mut result = TsneResult {
            cur_iter: 0,
            divergence: 0.0,
            grad_norm: 0.0,
        };
        let mut best_divergence = f64::INFINITY;
        let mut best_iter = 0;

        for iter in 0..params.max_iter {
            let exploring = iter < params.exploration_iter;
            let (exaggeration, momentum) = if exploring {
                (params.early_exaggeration, EXPLORATION_MOMENTUM)
            } else {
                (1.0, REFINEMENT_MOMENTUM)
            };
            let check = (iter + 1) % params.n_iter_check == 0 || iter + 1 == params.max_iter;

            let divergence = self.compute_gradient(affinity, params.angle, exaggeration, check)?;
            result.grad_norm = self.gradient_norm();
            self.integrate(momentum, params.learning_rate);
            result.cur_iter = iter + 1;

            let Some(divergence) = divergence else { continue };
            result.divergence = divergence;
            debug!(
                "iteration {}: divergence {divergence:.6}, gradient norm {:.6e}",
                iter + 1,
                result.grad_norm
            );
            if result.grad_norm <= params.min_grad_norm {
                info!(
                    "t-SNE stopped at iteration {}: gradient norm {:.3e} below {:.3e}",
                    iter + 1,
                    result.grad_norm,
                    params.min_grad_norm
                );
                break;
            }
            if !exploring {
                if divergence < best_divergence {
                    best_divergence = divergence;
                    best_iter = iter;
                } else if iter - best_iter > params.n_iter_without_progress {
                    info!(
                        "t-SNE stopped at iteration {}: no progress for {} iterations",
                        iter + 1,
                        iter - best_iter
                    );
                    break;
                }
            }
        }

        info!(
            "t-SNE finished after {} iterations, divergence {:.6}",
            result.cur_iter, result.divergence
        );
        Ok(result)
    }

    /// Fill the gradient; returns the divergence when `with_divergence` is set
    fn compute_gradient(
        &mut self,
        affinity: &CsrMatrix,
        angle: f64,
        exaggeration: f64,
        with_divergence: bool,
    ) -> Result<Option<f64>> {
        let mut tree = QuadTree::build(&self.points)?;
        tree.summarize(&self.points)?;

        let z_norm = repulsion(
            &tree,
            &self.points,
            angle,
            &mut self.repulsive,
            &mut self.z_terms,
        )
        .max(f64::MIN_POSITIVE);

        let kl_terms = if with_divergence {
            Some(self.kl_terms.as_mut_slice())
        } else {
            None
        };
        attraction(affinity, &self.points, z_norm, &mut self.attractive, kl_terms);

        let inv_z = 1.0 / z_norm;
        self.gradient
            .par_iter_mut()
            .zip(self.attractive.par_iter().zip(self.repulsive.par_iter()))
            .for_each(|(g, (attr, rep))| {
                for d in 0..2 {
                    g[d] = 4.0 * (exaggeration * attr[d] - rep[d] * inv_z);
                }
            });

        Ok(with_divergence.then(|| self.kl_terms.iter().sum::<f64>()))
    }

    /// Euclidean norm of the gradient, summed in point order
    fn gradient_norm(&self) -> f64 {
        self.gradient
            .iter()
            .map(|g| g[0] * g[0] + g[1] * g[1])
            .sum::<f64>()
            .sqrt()
    }

    /// Momentum step with per-coordinate adaptive gains
    fn integrate(&mut self, momentum: f64, learning_rate: f64) {
        self.points
            .par_iter_mut()
            .zip(self.velocity.par_iter_mut())
            .zip(self.gains.par_iter_mut().zip(self.gradient.par_iter()))
            .for_each(|((p, u), (gain, g))| {
                for d in 0..2 {
                    gain[d] = if g[d] * u[d] < 0.0 {
                        gain[d] + 0.2
                    } else {
                        gain[d] * 0.8
                    };
                    gain[d] = gain[d].max(MIN_GAIN);
                    u[d] = momentum * u[d] - learning_rate * gain[d] * g[d];
                    p[d] += u[d];
                }
            });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn uniform_affinity(n: usize) -> CsrMatrix {
        let p = 1.0 / (n * (n - 1)) as f64;
        let mut offsets = vec![0];
        let mut cols = Vec::new();
        let mut values = Vec::new();
        for i in 0..n {
            for j in 0..n {
                if i != j {
                    cols.push(j);
                    values.push(p);
                }
            }
            offsets.push(cols.len());
        }
        CsrMatrix::new(offsets, cols, values).unwrap()
    }

    #[test]
    fn test_default_params_are_valid() {
        assert!(TsneParams::default().validate().is_ok());
        let bad = TsneParams {
            learning_rate: 0.0,
            ..TsneParams::default()
        };
        assert!(bad.validate().is_err());
        let bad = TsneParams {
            angle: f64::NAN,
            ..TsneParams::default()
        };
        assert!(bad.validate().is_err());
    }

    #[test]
    fn test_gain_rule() {
        let mut state = DescentState::new(&[[0.0, 0.0]]).unwrap();
        state.velocity[0] = [1.0, -1.0];
        state.gradient[0] = [-2.0, -2.0];

        state.integrate(0.5, 10.0);
        // x: gradient opposes velocity, gain grows; y: same sign, gain shrinks
        assert_relative_eq!(state.gains[0][0], 1.2);
        assert_relative_eq!(state.gains[0][1], 0.8);
        assert_relative_eq!(state.velocity[0][0], 0.5 + 10.0 * 1.2 * 2.0);
        assert_relative_eq!(state.points[0][1], -0.5 + 10.0 * 0.8 * 2.0);
    }

    #[test]
    fn test_gain_floor() {
        let mut state = DescentState::new(&[[0.0, 0.0]]).unwrap();
        state.gains[0] = [0.011, 0.011];
        state.velocity[0] = [1.0, 1.0];
        state.gradient[0] = [1.0, 1.0];
        state.integrate(0.8, 1.0);
        assert_eq!(state.gains[0], [MIN_GAIN, MIN_GAIN]);
    }

    #[test]
    fn test_four_point_scenario() {
        let mut embedding = vec![[0.0, 0.0], [1.0, 0.2], [0.1, 1.3], [-0.8, 0.5]];
        let params = TsneParams {
            max_iter: 10,
            exploration_iter: 5,
            angle: 0.0,
            ..TsneParams::default()
        };

        let result = tsne_gradient_descent(
            &ExecutionContext::global(),
            &mut embedding,
            &uniform_affinity(4),
            &params,
        )
        .unwrap();
        assert_eq!(result.cur_iter, 10);
        assert!(result.divergence.is_finite());
        assert!(result.divergence >= 0.0);
        assert!(embedding.iter().all(|p| p[0].is_finite() && p[1].is_finite()));
    }

    #[test]
    fn test_invalid_input_leaves_embedding_untouched() {
        let original = vec![[0.0, 0.0], [1.0, 1.0], [2.0, 0.0]];
        let mut embedding = original.clone();
        // Column 3 is out of range for three points
        let affinity = CsrMatrix::new(vec![0, 1, 1, 1], vec![3], vec![1.0]).unwrap();

        let err = tsne_gradient_descent(
            &ExecutionContext::global(),
            &mut embedding,
            &affinity,
            &TsneParams::default(),
        );
        assert!(err.is_err());
        assert_eq!(embedding, original);

        let mut empty: Vec<[f64; 2]> = Vec::new();
        assert!(matches!(
            tsne_gradient_descent(
                &ExecutionContext::global(),
                &mut empty,
                &uniform_affinity(2),
                &TsneParams::default()
            ),
            Err(DalError::EmptyDataset)
        ));
    }

    #[test]
    fn test_min_grad_norm_stops_early() {
        let mut embedding = vec![[0.0, 0.0], [3.0, 0.0], [0.0, 3.0]];
        let params = TsneParams {
            max_iter: 500,
            n_iter_check: 10,
            min_grad_norm: 1e3,
            ..TsneParams::default()
        };
        let result = tsne_gradient_descent(
            &ExecutionContext::global(),
            &mut embedding,
            &uniform_affinity(3),
            &params,
        )
        .unwrap();
        assert_eq!(result.cur_iter, 10);
    }
}
