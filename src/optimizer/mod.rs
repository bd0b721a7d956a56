//! SVM training entry point
//!
//! [`SvmTrainer`] ties a kernel, a configuration and an execution context
//! together. It validates the inputs, maps the caller's two raw label values
//! onto {-1, +1}, runs the configured solver and packs the support vectors,
//! coefficients and bias into a [`TrainedSvm`].

use crate::core::{
    Dataset, DalError, OptimizationResult, Prediction, Result, Sample, SparseVector, SvmConfig,
    SvmModel, TrainingStatus,
};
use crate::data::{FeatureTable, LibSVMDataset};
use crate::exec::ExecutionContext;
use crate::kernel::Kernel;
use crate::solver::{solver_for, SvmProblem};
use log::info;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Mapping between the caller's two class values and {-1, +1}
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LabelMap {
    /// Raw label mapped to -1
    pub negative: f64,
    /// Raw label mapped to +1
    pub positive: f64,
}

impl LabelMap {
    /// Learn the mapping from raw labels
    ///
    /// Exactly two distinct finite values are required. The smaller one
    /// becomes -1, so labels already in {-1, +1} map onto themselves.
    pub fn fit(labels: &[f64]) -> Result<Self> {
        let mut classes: Vec<f64> = Vec::with_capacity(2);
        for &label in labels {
            if !label.is_finite() {
                return Err(DalError::InvalidLabel(label));
            }
            if classes.contains(&label) {
                continue;
            }
            if classes.len() == 2 {
                return Err(DalError::InvalidLabel(label));
            }
            classes.push(label);
        }
        match classes[..] {
            [a, b] => Ok(Self {
                negative: a.min(b),
                positive: a.max(b),
            }),
            _ => Err(DalError::InvalidDataset(
                "training needs samples of exactly two classes".to_string(),
            )),
        }
    }

    pub fn encode(&self, label: f64) -> Result<f64> {
        if label == self.positive {
            Ok(1.0)
        } else if label == self.negative {
            Ok(-1.0)
        } else {
            Err(DalError::InvalidLabel(label))
        }
    }

    pub fn decode(&self, decision_value: f64) -> f64 {
        if decision_value >= 0.0 {
            self.positive
        } else {
            self.negative
        }
    }
}

impl Default for LabelMap {
    fn default() -> Self {
        Self {
            negative: -1.0,
            positive: 1.0,
        }
    }
}

/// Trains binary SVM classifiers
pub struct SvmTrainer<K: Kernel> {
    kernel: Arc<K>,
    config: SvmConfig,
    context: ExecutionContext,
}

impl<K: Kernel> SvmTrainer<K> {
    pub fn new(kernel: K, config: SvmConfig) -> Self {
        Self {
            kernel: Arc::new(kernel),
            config,
            context: ExecutionContext::global(),
        }
    }

    /// Trainer with the default configuration
    pub fn with_kernel(kernel: K) -> Self {
        Self::new(kernel, SvmConfig::default())
    }

    /// Run the parallel stages inside `context`
    pub fn with_context(mut self, context: ExecutionContext) -> Self {
        self.context = context;
        self
    }

    pub fn config(&self) -> &SvmConfig {
        &self.config
    }

    pub fn kernel(&self) -> &K {
        &self.kernel
    }

    /// Train on any [`Dataset`], honouring its sample weights
    pub fn train<D: Dataset>(&self, dataset: &D) -> Result<TrainedSvm<K>> {
        let samples: Vec<Sample> = (0..dataset.len()).map(|i| dataset.get_sample(i)).collect();
        let table = FeatureTable::from_rows(samples.into_iter().map(|s| s.features).collect());
        let weights = dataset.get_weights();
        self.train_table(&table, &dataset.get_labels(), weights.as_deref())
    }

    /// Train on a loaded LibSVM file, reusing its rows as the feature table
    pub fn train_libsvm(&self, dataset: &LibSVMDataset) -> Result<TrainedSvm<K>> {
        self.train_table(&dataset.to_table(), &dataset.get_labels(), None)
    }

    pub fn train_samples(&self, samples: &[Sample]) -> Result<TrainedSvm<K>> {
        let table = FeatureTable::from_rows(samples.iter().map(|s| s.features.clone()).collect());
        let labels: Vec<f64> = samples.iter().map(|s| s.label).collect();
        self.train_table(&table, &labels, None)
    }

    /// Train on a feature table with raw labels and optional per-sample weights
    ///
    /// Every parameter and input check runs before any solver buffer is
    /// allocated. Hitting the iteration limit is reported through
    /// [`TrainedSvm::status`], not as an error.
    pub fn train_table(
        &self,
        table: &FeatureTable,
        labels: &[f64],
        weights: Option<&[f64]>,
    ) -> Result<TrainedSvm<K>> {
        self.config.validate()?;
        if table.is_empty() {
            return Err(DalError::EmptyDataset);
        }
        let n = table.n_rows();
        if labels.len() != n {
            return Err(DalError::DimensionMismatch {
                expected: n,
                actual: labels.len(),
            });
        }
        let classes = LabelMap::fit(labels)?;
        let y = labels
            .iter()
            .map(|&label| classes.encode(label))
            .collect::<Result<Vec<f64>>>()?;
        let c_bounds = match weights {
            Some(w) => {
                if w.len() != n {
                    return Err(DalError::DimensionMismatch {
                        expected: n,
                        actual: w.len(),
                    });
                }
                if let Some(bad) = w.iter().find(|v| !v.is_finite() || **v < 0.0) {
                    return Err(DalError::InvalidParameter(format!(
                        "sample weights must be finite and non-negative, got {bad}"
                    )));
                }
                w.iter().map(|&w_i| self.config.c * w_i).collect()
            }
            None => vec![self.config.c; n],
        };

        let problem = SvmProblem {
            kernel: self.kernel.as_ref(),
            table,
            y,
            c_bounds,
        };
        info!(
            "training {:?} SVM on {n} samples with {} features",
            self.config.method,
            table.n_features()
        );
        let solver = solver_for::<K>(self.config.method);
        let config = &self.config;
        let result = self.context.install(|| solver.solve(&problem, config))?;

        Ok(TrainedSvm::from_result(
            Arc::clone(&self.kernel),
            table,
            &problem.y,
            classes,
            result,
        ))
    }
}

/// A trained binary classifier
#[derive(Debug, Clone)]
pub struct TrainedSvm<K: Kernel> {
    kernel: Arc<K>,
    support_vectors: Vec<SparseVector>,
    coefficients: Vec<f64>,
    bias: f64,
    support_indices: Vec<usize>,
    classes: LabelMap,
    status: TrainingStatus,
    iterations: usize,
    objective_value: f64,
}

impl<K: Kernel> TrainedSvm<K> {
    fn from_result(
        kernel: Arc<K>,
        table: &FeatureTable,
        y: &[f64],
        classes: LabelMap,
        result: OptimizationResult,
    ) -> Self {
        let support_vectors = result
            .support_vectors
            .iter()
            .map(|&i| table.row(i).clone())
            .collect();
        let coefficients = result
            .support_vectors
            .iter()
            .map(|&i| result.alpha[i] * y[i])
            .collect();
        Self {
            kernel,
            support_vectors,
            coefficients,
            bias: result.b,
            support_indices: result.support_vectors,
            classes,
            status: result.status,
            iterations: result.iterations,
            objective_value: result.objective_value,
        }
    }

    /// Rebuild a model from stored parts
    #[allow(clippy::too_many_arguments)]
    pub fn from_parts(
        kernel: K,
        support_vectors: Vec<SparseVector>,
        coefficients: Vec<f64>,
        bias: f64,
        support_indices: Vec<usize>,
        classes: LabelMap,
        status: TrainingStatus,
        iterations: usize,
        objective_value: f64,
    ) -> Result<Self> {
        if support_vectors.len() != coefficients.len() {
            return Err(DalError::DimensionMismatch {
                expected: support_vectors.len(),
                actual: coefficients.len(),
            });
        }
        Ok(Self {
            kernel: Arc::new(kernel),
            support_vectors,
            coefficients,
            bias,
            support_indices,
            classes,
            status,
            iterations,
            objective_value,
        })
    }

    /// `sum_i coef_i K(sv_i, x) + bias`
    pub fn decision_function(&self, features: &SparseVector) -> f64 {
        let x_norm = features.norm_squared();
        self.support_vectors
            .iter()
            .zip(&self.coefficients)
            .map(|(sv, &coef)| {
                coef * self
                    .kernel
                    .compute_with_norms(sv, features, sv.norm_squared(), x_norm)
            })
            .sum::<f64>()
            + self.bias
    }

    /// Predict a raw class label for a feature vector
    pub fn predict_features(&self, features: &SparseVector) -> Prediction {
        let decision_value = self.decision_function(features);
        Prediction::new(self.classes.decode(decision_value), decision_value)
    }

    pub fn support_vectors(&self) -> &[SparseVector] {
        &self.support_vectors
    }

    /// `alpha_i * y_i` for each support vector
    pub fn coefficients(&self) -> &[f64] {
        &self.coefficients
    }

    /// Row indices of the support vectors in the training table
    pub fn support_vector_indices(&self) -> &[usize] {
        &self.support_indices
    }

    pub fn classes(&self) -> LabelMap {
        self.classes
    }

    pub fn status(&self) -> TrainingStatus {
        self.status
    }

    pub fn iterations(&self) -> usize {
        self.iterations
    }

    pub fn objective_value(&self) -> f64 {
        self.objective_value
    }

    pub fn kernel(&self) -> &K {
        &self.kernel
    }
}

impl<K: Kernel> SvmModel for TrainedSvm<K> {
    fn predict(&self, sample: &Sample) -> Prediction {
        self.predict_features(&sample.features)
    }

    fn n_support_vectors(&self) -> usize {
        self.support_vectors.len()
    }

    fn bias(&self) -> f64 {
        self.bias
    }
}
