//! High-level API for training, prediction and embedding
//!
//! This module wraps the solvers and the t-SNE engine behind builder-style
//! facades for the common tasks.
//!
//! # Quick Start
//!
//! ```rust,no_run
//! use dalkit::api::Svm;
//! use dalkit::core::SolverMethod;
//! use dalkit::kernel::KernelKind;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let model = Svm::new()
//!     .with_kernel_kind(KernelKind::Rbf { sigma: 0.5 })
//!     .with_c(10.0)
//!     .with_method(SolverMethod::Thunder)
//!     .train_from_file("data.libsvm")?;
//!
//! let metrics = model.evaluate_detailed_from_file("test.libsvm")?;
//! println!("Accuracy: {:.2}%", metrics.accuracy() * 100.0);
//! # Ok(())
//! # }
//! ```

use crate::core::{Dataset, Prediction, Result, Sample, SolverMethod, SvmConfig, SvmModel};
use crate::data::{CsrMatrix, FeatureTable, LibSVMDataset};
use crate::exec::ExecutionContext;
use crate::kernel::{Kernel, KernelKind};
use crate::optimizer::{SvmTrainer, TrainedSvm};
use crate::persistence::ModelFile;
use crate::tsne::{tsne_gradient_descent, TsneParams, TsneResult};
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::BufReader;
use std::path::Path;

/// High-level SVM interface with builder pattern
pub struct Svm<K: Kernel = KernelKind> {
    kernel: K,
    config: SvmConfig,
    n_threads: usize,
}

impl Svm<KernelKind> {
    /// Linear kernel and default parameters
    pub fn new() -> Self {
        Self::with_kernel(KernelKind::default())
    }

    pub fn with_kernel_kind(mut self, kernel: KernelKind) -> Self {
        self.kernel = kernel;
        self
    }
}

impl Default for Svm<KernelKind> {
    fn default() -> Self {
        Self::new()
    }
}

impl<K: Kernel> Svm<K> {
    /// Create SVM with custom kernel
    pub fn with_kernel(kernel: K) -> Self {
        Self {
            kernel,
            config: SvmConfig::default(),
            n_threads: 0,
        }
    }

    /// Replace the whole configuration
    pub fn with_config(mut self, config: SvmConfig) -> Self {
        self.config = config;
        self
    }

    /// Set regularization parameter C
    pub fn with_c(mut self, c: f64) -> Self {
        self.config.c = c;
        self
    }

    /// Set the duality-gap stopping threshold
    pub fn with_accuracy_threshold(mut self, threshold: f64) -> Self {
        self.config.accuracy_threshold = threshold;
        self
    }

    pub fn with_tau(mut self, tau: f64) -> Self {
        self.config.tau = tau;
        self
    }

    /// Set maximum number of iterations
    pub fn with_max_iterations(mut self, max_iterations: usize) -> Self {
        self.config.max_iterations = max_iterations;
        self
    }

    /// Set kernel cache size in bytes
    pub fn with_cache_size(mut self, cache_size: usize) -> Self {
        self.config.cache_size = cache_size;
        self
    }

    pub fn with_shrinking(mut self, shrinking: bool) -> Self {
        self.config.shrinking = shrinking;
        self
    }

    pub fn with_method(mut self, method: SolverMethod) -> Self {
        self.config.method = method;
        self
    }

    /// Working-set size limit of the block solver
    pub fn with_max_block_size(mut self, max_block_size: usize) -> Self {
        self.config.max_block_size = max_block_size;
        self
    }

    /// Worker threads for training; 0 uses the global pool
    pub fn with_threads(mut self, n_threads: usize) -> Self {
        self.n_threads = n_threads;
        self
    }

    pub fn config(&self) -> &SvmConfig {
        &self.config
    }

    fn trainer(self) -> Result<(SvmTrainer<K>, SvmConfig)> {
        let context = ExecutionContext::new(self.n_threads)?;
        let config = self.config.clone();
        Ok((
            SvmTrainer::new(self.kernel, self.config).with_context(context),
            config,
        ))
    }

    /// Train on a dataset
    pub fn train<D: Dataset>(self, dataset: &D) -> Result<TrainedModel<K>> {
        let (trainer, config) = self.trainer()?;
        let model = trainer.train(dataset)?;
        Ok(TrainedModel { model, config })
    }

    /// Train on samples
    pub fn train_samples(self, samples: &[Sample]) -> Result<TrainedModel<K>> {
        let (trainer, config) = self.trainer()?;
        let model = trainer.train_samples(samples)?;
        Ok(TrainedModel { model, config })
    }

    /// Train on a feature table with raw labels and optional weights
    pub fn train_table(
        self,
        table: &FeatureTable,
        labels: &[f64],
        weights: Option<&[f64]>,
    ) -> Result<TrainedModel<K>> {
        let (trainer, config) = self.trainer()?;
        let model = trainer.train_table(table, labels, weights)?;
        Ok(TrainedModel { model, config })
    }

    /// Train on a loaded LibSVM dataset
    pub fn train_libsvm(self, dataset: &LibSVMDataset) -> Result<TrainedModel<K>> {
        let (trainer, config) = self.trainer()?;
        let model = trainer.train_libsvm(dataset)?;
        Ok(TrainedModel { model, config })
    }

    /// Train from LibSVM format file
    pub fn train_from_file<P: AsRef<Path>>(self, path: P) -> Result<TrainedModel<K>> {
        let dataset = LibSVMDataset::from_file(path)?;
        self.train_libsvm(&dataset)
    }
}

/// Trained SVM model with high-level prediction interface
pub struct TrainedModel<K: Kernel> {
    model: TrainedSvm<K>,
    config: SvmConfig,
}

impl<K: Kernel> TrainedModel<K> {
    /// Predict a single sample
    pub fn predict(&self, sample: &Sample) -> Prediction {
        self.model.predict(sample)
    }

    /// Predict multiple samples
    pub fn predict_batch(&self, samples: &[Sample]) -> Vec<Prediction> {
        self.model.predict_batch(samples)
    }

    /// Predict from dataset
    pub fn predict_dataset<D: Dataset>(&self, dataset: &D) -> Vec<Prediction> {
        (0..dataset.len())
            .map(|i| self.model.predict(&dataset.get_sample(i)))
            .collect()
    }

    /// Predict from LibSVM file
    pub fn predict_from_file<P: AsRef<Path>>(&self, path: P) -> Result<Vec<Prediction>> {
        let dataset = LibSVMDataset::from_file(path)?;
        Ok(self.predict_dataset(&dataset))
    }

    /// Fraction of correctly classified samples
    pub fn evaluate<D: Dataset>(&self, dataset: &D) -> f64 {
        self.evaluate_detailed(dataset).accuracy()
    }

    /// Evaluate accuracy from LibSVM file
    pub fn evaluate_from_file<P: AsRef<Path>>(&self, path: P) -> Result<f64> {
        let dataset = LibSVMDataset::from_file(path)?;
        Ok(self.evaluate(&dataset))
    }

    /// Confusion counts, taking the larger raw class as positive
    pub fn evaluate_detailed<D: Dataset>(&self, dataset: &D) -> EvaluationMetrics {
        let predictions = self.predict_dataset(dataset);
        let positive = self.model.classes().positive;
        let mut metrics = EvaluationMetrics::default();

        for (pred, actual) in predictions.iter().zip(dataset.get_labels()) {
            match (pred.label == positive, actual == positive) {
                (true, true) => metrics.true_positives += 1,
                (false, false) => metrics.true_negatives += 1,
                (true, false) => metrics.false_positives += 1,
                (false, true) => metrics.false_negatives += 1,
            }
        }
        metrics
    }

    pub fn evaluate_detailed_from_file<P: AsRef<Path>>(&self, path: P) -> Result<EvaluationMetrics> {
        let dataset = LibSVMDataset::from_file(path)?;
        Ok(self.evaluate_detailed(&dataset))
    }

    /// Get model information
    pub fn info(&self) -> ModelInfo {
        ModelInfo {
            n_support_vectors: self.model.n_support_vectors(),
            bias: self.model.bias(),
            support_vector_indices: self.model.support_vector_indices().to_vec(),
            converged: self.model.status().is_converged(),
            iterations: self.model.iterations(),
        }
    }

    /// Configuration the model was trained with
    pub fn config(&self) -> &SvmConfig {
        &self.config
    }

    /// Get the underlying trained model
    pub fn inner(&self) -> &TrainedSvm<K> {
        &self.model
    }
}

impl TrainedModel<KernelKind> {
    /// Save as JSON
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        ModelFile::from_model(&self.model, &self.config).save_to_file(path)
    }

    /// Load a model written by [`save`](Self::save)
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let file = ModelFile::load_from_file(path)?;
        let config = file.metadata.training_params.clone();
        Ok(Self {
            model: file.into_model()?,
            config,
        })
    }
}

/// Detailed evaluation metrics
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EvaluationMetrics {
    pub true_positives: usize,
    pub true_negatives: usize,
    pub false_positives: usize,
    pub false_negatives: usize,
}

impl EvaluationMetrics {
    pub fn new(tp: usize, tn: usize, fp: usize, fn_: usize) -> Self {
        Self {
            true_positives: tp,
            true_negatives: tn,
            false_positives: fp,
            false_negatives: fn_,
        }
    }

    /// Calculate accuracy: (TP + TN) / (TP + TN + FP + FN)
    pub fn accuracy(&self) -> f64 {
        let total =
            self.true_positives + self.true_negatives + self.false_positives + self.false_negatives;
        ratio(self.true_positives + self.true_negatives, total)
    }

    /// Calculate precision: TP / (TP + FP)
    pub fn precision(&self) -> f64 {
        ratio(self.true_positives, self.true_positives + self.false_positives)
    }

    /// Calculate recall (sensitivity): TP / (TP + FN)
    pub fn recall(&self) -> f64 {
        ratio(self.true_positives, self.true_positives + self.false_negatives)
    }

    /// Calculate F1 score: 2 * (precision * recall) / (precision + recall)
    pub fn f1_score(&self) -> f64 {
        let p = self.precision();
        let r = self.recall();
        if p + r == 0.0 {
            0.0
        } else {
            2.0 * (p * r) / (p + r)
        }
    }

    /// Calculate specificity: TN / (TN + FP)
    pub fn specificity(&self) -> f64 {
        ratio(self.true_negatives, self.true_negatives + self.false_positives)
    }
}

fn ratio(num: usize, den: usize) -> f64 {
    if den == 0 {
        0.0
    } else {
        num as f64 / den as f64
    }
}

/// Model information
#[derive(Debug, Clone)]
pub struct ModelInfo {
    pub n_support_vectors: usize,
    pub bias: f64,
    pub support_vector_indices: Vec<usize>,
    pub converged: bool,
    pub iterations: usize,
}

/// Initial embedding plus affinity matrix, as read by the CLI
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TsneInput {
    pub embedding: Vec<[f64; 2]>,
    pub affinity: CsrMatrix,
}

impl TsneInput {
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let file = File::open(path)?;
        serde_json::from_reader(BufReader::new(file))
            .map_err(|e| crate::core::DalError::Parse(e.to_string()))
    }
}

/// Builder-style front end of [`tsne_gradient_descent`]
#[derive(Debug, Clone, Default)]
pub struct Tsne {
    params: TsneParams,
    n_threads: usize,
}

impl Tsne {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_params(mut self, params: TsneParams) -> Self {
        self.params = params;
        self
    }

    pub fn with_max_iter(mut self, max_iter: usize) -> Self {
        self.params.max_iter = max_iter;
        self
    }

    pub fn with_exploration_iter(mut self, exploration_iter: usize) -> Self {
        self.params.exploration_iter = exploration_iter;
        self
    }

    pub fn with_early_exaggeration(mut self, early_exaggeration: f64) -> Self {
        self.params.early_exaggeration = early_exaggeration;
        self
    }

    pub fn with_learning_rate(mut self, learning_rate: f64) -> Self {
        self.params.learning_rate = learning_rate;
        self
    }

    /// Barnes-Hut opening angle; 0 is exact
    pub fn with_angle(mut self, angle: f64) -> Self {
        self.params.angle = angle;
        self
    }

    pub fn with_min_grad_norm(mut self, min_grad_norm: f64) -> Self {
        self.params.min_grad_norm = min_grad_norm;
        self
    }

    pub fn with_threads(mut self, n_threads: usize) -> Self {
        self.n_threads = n_threads;
        self
    }

    pub fn params(&self) -> &TsneParams {
        &self.params
    }

    /// Optimise `embedding` in place
    pub fn run(&self, embedding: &mut [[f64; 2]], affinity: &CsrMatrix) -> Result<TsneResult> {
        let context = ExecutionContext::new(self.n_threads)?;
        tsne_gradient_descent(&context, embedding, affinity, &self.params)
    }

    pub fn run_input(&self, input: &mut TsneInput) -> Result<TsneResult> {
        self.run(&mut input.embedding, &input.affinity)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{DalError, SparseVector};
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn line_samples() -> Vec<Sample> {
        vec![
            Sample::new(SparseVector::new(vec![0], vec![2.0]), 1.0),
            Sample::new(SparseVector::new(vec![0], vec![-2.0]), -1.0),
            Sample::new(SparseVector::new(vec![0], vec![1.5]), 1.0),
            Sample::new(SparseVector::new(vec![0], vec![-1.5]), -1.0),
        ]
    }

    #[test]
    fn test_svm_builder_pattern() {
        let svm = Svm::new()
            .with_c(2.0)
            .with_accuracy_threshold(0.01)
            .with_max_iterations(5000)
            .with_method(SolverMethod::Thunder);

        assert_eq!(svm.config().c, 2.0);
        assert_eq!(svm.config().accuracy_threshold, 0.01);
        assert_eq!(svm.config().max_iterations, 5000);
        assert_eq!(svm.config().method, SolverMethod::Thunder);
    }

    #[test]
    fn test_training_and_info() {
        let model = Svm::new()
            .with_threads(2)
            .train_samples(&line_samples())
            .expect("Training should succeed");

        let test_sample = Sample::new(SparseVector::new(vec![0], vec![1.0]), 1.0);
        assert_eq!(model.predict(&test_sample).label, 1.0);

        let info = model.info();
        assert!(info.n_support_vectors > 0);
        assert!(info.converged);
    }

    #[test]
    fn test_evaluation_metrics() {
        let metrics = EvaluationMetrics::new(10, 5, 2, 3);

        assert_eq!(metrics.accuracy(), 0.75);
        assert_eq!(metrics.precision(), 10.0 / 12.0);
        assert_eq!(metrics.recall(), 10.0 / 13.0);
        assert!(metrics.f1_score() > 0.0);
        assert_eq!(metrics.specificity(), 5.0 / 7.0);
        assert_eq!(EvaluationMetrics::default().accuracy(), 0.0);
    }

    #[test]
    fn test_file_operations() {
        let mut temp_file = NamedTempFile::new().expect("Failed to create temp file");
        writeln!(temp_file, "2 1:2.0").expect("Failed to write");
        writeln!(temp_file, "1 1:-2.0").expect("Failed to write");
        writeln!(temp_file, "2 1:1.5").expect("Failed to write");
        writeln!(temp_file, "1 1:-1.5").expect("Failed to write");
        temp_file.flush().expect("Failed to flush");

        let model = Svm::new()
            .train_from_file(temp_file.path())
            .expect("Training should succeed");
        let metrics = model
            .evaluate_detailed_from_file(temp_file.path())
            .expect("Evaluation should succeed");
        assert_eq!(metrics, EvaluationMetrics::new(2, 2, 0, 0));

        let model_file = NamedTempFile::new().expect("Failed to create temp file");
        model.save(model_file.path()).expect("Save should succeed");
        let loaded = TrainedModel::load(model_file.path()).expect("Load should succeed");
        assert_eq!(loaded.evaluate_from_file(temp_file.path()).unwrap(), 1.0);
    }

    #[test]
    fn test_tsne_facade() {
        let affinity = CsrMatrix::new(
            vec![0, 2, 4, 6],
            vec![1, 2, 0, 2, 0, 1],
            vec![1.0 / 6.0; 6],
        )
        .unwrap();
        let mut input = TsneInput {
            embedding: vec![[0.0, 0.0], [1.0, 0.0], [0.0, 1.0]],
            affinity,
        };

        let result = Tsne::new()
            .with_max_iter(20)
            .with_exploration_iter(10)
            .with_threads(1)
            .run_input(&mut input)
            .unwrap();
        assert_eq!(result.cur_iter, 20);

        let bad = Tsne::new().with_learning_rate(-1.0).run_input(&mut input);
        assert!(matches!(bad, Err(DalError::InvalidParameter(_))));
    }
}
