//! Core type definitions shared by the SVM solvers

use crate::core::error::{DalError, Result};
use serde::{Deserialize, Serialize};

/// Prediction result containing label and decision value
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Prediction {
    /// Predicted class label, expressed in the caller's raw label domain
    pub label: f64,
    /// Raw decision function value
    pub decision_value: f64,
}

impl Prediction {
    /// Create a new prediction
    pub fn new(label: f64, decision_value: f64) -> Self {
        Self {
            label,
            decision_value,
        }
    }

    /// Get confidence as absolute value of decision value
    pub fn confidence(&self) -> f64 {
        self.decision_value.abs()
    }
}

/// Sparse vector representation with sorted indices
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SparseVector {
    /// Sorted indices of non-zero elements
    pub indices: Vec<usize>,
    /// Values corresponding to indices
    pub values: Vec<f64>,
}

impl SparseVector {
    /// Create a new sparse vector, ensuring indices are sorted
    ///
    /// # Panics
    /// Panics if `indices` and `values` differ in length.
    pub fn new(indices: Vec<usize>, values: Vec<f64>) -> Self {
        assert_eq!(
            indices.len(),
            values.len(),
            "Indices and values must have same length"
        );

        let mut pairs: Vec<_> = indices.into_iter().zip(values).collect();
        pairs.sort_by_key(|&(idx, _)| idx);

        let (indices, values): (Vec<_>, Vec<_>) = pairs.into_iter().unzip();
        Self { indices, values }
    }

    /// Build a sparse vector from a dense row, dropping exact zeros
    pub fn from_dense(row: &[f64]) -> Self {
        let (indices, values) = row
            .iter()
            .enumerate()
            .filter(|(_, &v)| v != 0.0)
            .map(|(i, &v)| (i, v))
            .unzip();
        Self { indices, values }
    }

    /// Create an empty sparse vector
    pub fn empty() -> Self {
        Self {
            indices: Vec::new(),
            values: Vec::new(),
        }
    }

    /// Get the value at a specific index (0 if not present)
    pub fn get(&self, index: usize) -> f64 {
        match self.indices.binary_search(&index) {
            Ok(pos) => self.values[pos],
            Err(_) => 0.0,
        }
    }

    /// Compute squared L2 norm
    pub fn norm_squared(&self) -> f64 {
        self.values.iter().map(|&v| v * v).sum()
    }

    /// Dot product with another sparse vector, merging the sorted index lists
    pub fn dot(&self, other: &SparseVector) -> f64 {
        let mut result = 0.0;
        let (mut i, mut j) = (0, 0);
        while i < self.indices.len() && j < other.indices.len() {
            match self.indices[i].cmp(&other.indices[j]) {
                std::cmp::Ordering::Equal => {
                    result += self.values[i] * other.values[j];
                    i += 1;
                    j += 1;
                }
                std::cmp::Ordering::Less => i += 1,
                std::cmp::Ordering::Greater => j += 1,
            }
        }
        result
    }

    /// Largest index plus one, i.e. the minimal dense dimension holding this vector
    pub fn dim(&self) -> usize {
        self.indices.last().map_or(0, |&i| i + 1)
    }

    /// Number of non-zero elements
    pub fn nnz(&self) -> usize {
        self.indices.len()
    }

    /// Check if vector is empty
    pub fn is_empty(&self) -> bool {
        self.indices.is_empty()
    }
}

/// Training sample with features and label
#[derive(Clone, Debug)]
pub struct Sample {
    /// Feature vector (sparse representation)
    pub features: SparseVector,
    /// Raw class label as supplied by the caller
    pub label: f64,
}

impl Sample {
    /// Create a new sample
    pub fn new(features: SparseVector, label: f64) -> Self {
        Self { features, label }
    }
}

/// Which SMO variant trains the model
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum SolverMethod {
    /// Classic two-variable SMO with second-order pair selection and shrinking
    #[default]
    Boser,
    /// Block working-set solver that runs SMO locally on up to `max_block_size` vectors
    Thunder,
}

/// How a training run ended
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TrainingStatus {
    /// The duality gap dropped below the accuracy threshold
    Converged,
    /// `max_iterations` was reached first; the model is the best found so far
    MaxIterationsReached,
    /// No admissible working set remained (every candidate pair was degenerate)
    NoWorkingSet,
    /// The block solver saw the gap unchanged for `n_no_changes` outer iterations
    Stalled,
}

impl TrainingStatus {
    pub fn is_converged(self) -> bool {
        self == TrainingStatus::Converged
    }
}

/// Configuration for SVM training
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SvmConfig {
    /// Regularization parameter (upper bound for alpha, scaled by the sample weight)
    pub c: f64,
    /// Duality-gap threshold that stops training
    pub accuracy_threshold: f64,
    /// Floor on the second-order denominator
    pub tau: f64,
    /// Maximum number of solver iterations
    pub max_iterations: usize,
    /// Kernel cache size in bytes
    pub cache_size: usize,
    /// Enable shrinking heuristic (Boser only)
    pub shrinking: bool,
    /// Number of iterations between shrinking passes
    pub shrinking_iterations: usize,
    /// Solver variant
    pub method: SolverMethod,
    /// Upper bound on the block working-set size (Thunder only)
    pub max_block_size: usize,
    /// Maximum local SMO iterations per block (Thunder only)
    pub inner_iterations: usize,
    /// Consecutive unchanged gap checks that count as local convergence (Thunder only)
    pub n_no_changes: usize,
    /// Record the dual objective after every outer iteration
    ///
    /// The Boser solver turns shrinking off while this is set, so every
    /// recorded value is the objective of the full problem.
    pub track_objective: bool,
}

impl Default for SvmConfig {
    fn default() -> Self {
        Self {
            c: 1.0,
            accuracy_threshold: 0.001,
            tau: 1e-6,
            max_iterations: 1_000_000,
            cache_size: 8 * 1024 * 1024, // 8MB
            shrinking: true,
            shrinking_iterations: 1000,
            method: SolverMethod::Boser,
            max_block_size: 2048,
            inner_iterations: 1000,
            n_no_changes: 5,
            track_objective: false,
        }
    }
}

impl SvmConfig {
    /// Reject parameter combinations the solvers cannot run with
    pub fn validate(&self) -> Result<()> {
        if !(self.c > 0.0) || !self.c.is_finite() {
            return Err(DalError::InvalidParameter(format!(
                "C must be positive and finite, got {}",
                self.c
            )));
        }
        if !(self.accuracy_threshold > 0.0) {
            return Err(DalError::InvalidParameter(format!(
                "accuracy threshold must be positive, got {}",
                self.accuracy_threshold
            )));
        }
        if !(self.tau > 0.0) {
            return Err(DalError::InvalidParameter(format!(
                "tau must be positive, got {}",
                self.tau
            )));
        }
        if self.max_iterations == 0 {
            return Err(DalError::InvalidParameter(
                "max_iterations must be at least 1".to_string(),
            ));
        }
        if self.cache_size == 0 {
            return Err(DalError::InvalidParameter(
                "cache size must be non-zero".to_string(),
            ));
        }
        if self.method == SolverMethod::Thunder {
            if self.max_block_size < 2 {
                return Err(DalError::InvalidParameter(format!(
                    "block size must be at least 2, got {}",
                    self.max_block_size
                )));
            }
            if self.inner_iterations == 0 || self.n_no_changes == 0 {
                return Err(DalError::InvalidParameter(
                    "inner iterations and no-change window must be non-zero".to_string(),
                ));
            }
        }
        Ok(())
    }
}

/// Result of the optimization process, indexed like the training table
#[derive(Debug, Clone)]
pub struct OptimizationResult {
    /// Lagrange multipliers (alpha values)
    pub alpha: Vec<f64>,
    /// Bias term (b) of the decision function `sum(alpha_i y_i K(x_i, x)) + b`
    pub b: f64,
    /// Indices of support vectors (where alpha != 0)
    pub support_vectors: Vec<usize>,
    /// Number of iterations performed
    pub iterations: usize,
    /// Final dual objective value
    pub objective_value: f64,
    /// Final duality-gap estimate
    pub gap: f64,
    /// How training ended
    pub status: TrainingStatus,
    /// Dual objective after each outer iteration, when tracking is enabled
    pub objective_history: Vec<f64>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sparse_vector_creation() {
        let sv = SparseVector::new(vec![2, 0, 4], vec![2.0, 1.0, 3.0]);

        // Check that indices are sorted
        assert_eq!(sv.indices, vec![0, 2, 4]);
        assert_eq!(sv.values, vec![1.0, 2.0, 3.0]);
        assert_eq!(sv.dim(), 5);
    }

    #[test]
    fn test_sparse_vector_from_dense() {
        let sv = SparseVector::from_dense(&[0.0, 1.5, 0.0, -2.0]);
        assert_eq!(sv.indices, vec![1, 3]);
        assert_eq!(sv.values, vec![1.5, -2.0]);
        assert_eq!(sv.get(0), 0.0);
        assert_eq!(sv.get(3), -2.0);
    }

    #[test]
    fn test_sparse_vector_dot() {
        let x = SparseVector::new(vec![0, 2, 5], vec![1.0, 3.0, 2.0]);
        let y = SparseVector::new(vec![2, 3, 5], vec![2.0, 1.0, 4.0]);

        // Overlapping at indices 2 and 5: 3*2 + 2*4
        assert_eq!(x.dot(&y), 14.0);
        assert_eq!(x.dot(&SparseVector::empty()), 0.0);
        assert_eq!(x.norm_squared(), 14.0);
    }

    #[test]
    fn test_prediction() {
        let pred = Prediction::new(1.0, 2.5);
        assert_eq!(pred.confidence(), 2.5);

        let neg_pred = Prediction::new(-1.0, -1.8);
        assert_eq!(neg_pred.confidence(), 1.8);
    }

    #[test]
    fn test_svm_config_default() {
        let config = SvmConfig::default();
        assert_eq!(config.c, 1.0);
        assert_eq!(config.accuracy_threshold, 0.001);
        assert_eq!(config.method, SolverMethod::Boser);
        assert_eq!(config.max_block_size, 2048);
        assert_eq!(config.n_no_changes, 5);
        assert!(config.shrinking);
        assert!(!config.track_objective);
    }

    #[test]
    fn test_svm_config_validation() {
        assert!(SvmConfig::default().validate().is_ok());

        let mut config = SvmConfig::default();
        config.c = 0.0;
        assert!(matches!(config.validate(), Err(DalError::InvalidParameter(_))));

        let mut config = SvmConfig::default();
        config.tau = -1.0;
        assert!(config.validate().is_err());

        let mut config = SvmConfig::default();
        config.method = SolverMethod::Thunder;
        config.max_block_size = 1;
        assert!(config.validate().is_err());
    }

    #[test]
    #[should_panic(expected = "Indices and values must have same length")]
    fn test_sparse_vector_length_mismatch() {
        SparseVector::new(vec![0, 1], vec![1.0, 2.0, 3.0]);
    }
}
