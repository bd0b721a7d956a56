//! Integration tests for the dalkit SVM pipeline
//!
//! These tests exercise loading, training with both solvers, prediction,
//! persistence and evaluation through the public API.

use approx::assert_relative_eq;
use dalkit::api::{Svm, TrainedModel};
use dalkit::core::{DalError, SolverMethod, SvmConfig, SvmModel, TrainingStatus};
use dalkit::data::FeatureTable;
use dalkit::kernel::KernelKind;
use dalkit::optimizer::SvmTrainer;
use dalkit::{LibSVMDataset, Sample, SparseVector};
use std::io::Write;
use tempfile::NamedTempFile;

/// Two interleaved clusters that an RBF kernel separates and a line does not
fn xor_table() -> (FeatureTable, Vec<f64>) {
    let mut values = Vec::new();
    let mut labels = Vec::new();
    for (cx, cy, label) in [(1.0, 1.0, 1.0), (-1.0, -1.0, 1.0), (1.0, -1.0, -1.0), (-1.0, 1.0, -1.0)] {
        for k in 0..10 {
            let t = k as f64;
            values.push(cx + 0.15 * (t * 1.7).sin());
            values.push(cy + 0.15 * (t * 2.3).cos());
            labels.push(label);
        }
    }
    let n = labels.len();
    (FeatureTable::from_dense(&values, n, 2).unwrap(), labels)
}

fn write_libsvm(lines: &[&str]) -> NamedTempFile {
    let mut file = NamedTempFile::new().expect("Failed to create temp file");
    for line in lines {
        writeln!(file, "{line}").expect("Failed to write");
    }
    file.flush().expect("Failed to flush");
    file
}

/// Test complete workflow: data loading -> training -> evaluation -> persistence
#[test]
fn test_complete_workflow_libsvm() {
    let train = write_libsvm(&[
        "+1 1:2.0 2:1.0",
        "+1 1:1.8 2:1.1",
        "+1 1:2.2 2:0.9",
        "-1 1:-2.0 2:-1.0",
        "-1 1:-1.8 2:-1.1",
        "-1 1:-2.2 2:-0.9",
    ]);

    let model = Svm::new()
        .with_c(1.0)
        .with_accuracy_threshold(0.001)
        .train_from_file(train.path())
        .expect("Training should succeed");

    let accuracy = model
        .evaluate_from_file(train.path())
        .expect("Evaluation should succeed");
    assert_eq!(accuracy, 1.0);

    let info = model.info();
    assert!(info.converged);
    assert!(info.n_support_vectors > 0 && info.n_support_vectors <= 6);

    let saved = NamedTempFile::new().expect("Failed to create temp file");
    model.save(saved.path()).expect("Save should succeed");
    let loaded = TrainedModel::load(saved.path()).expect("Load should succeed");

    let dataset = LibSVMDataset::from_file(train.path()).expect("Failed to load dataset");
    for (a, b) in loaded
        .predict_dataset(&dataset)
        .iter()
        .zip(model.predict_dataset(&dataset))
    {
        assert_eq!(a.label, b.label);
        assert_relative_eq!(a.decision_value, b.decision_value, epsilon = 1e-9);
    }
    assert_eq!(loaded.config().c, 1.0);
}

#[test]
fn test_rbf_solvers_agree_on_xor() {
    let (table, labels) = xor_table();

    let mut objectives = Vec::new();
    for method in [SolverMethod::Boser, SolverMethod::Thunder] {
        let config = SvmConfig {
            c: 10.0,
            method,
            max_block_size: 16,
            ..SvmConfig::default()
        };
        let model = SvmTrainer::new(KernelKind::Rbf { sigma: 0.5 }, config)
            .train_table(&table, &labels, None)
            .expect("Training should succeed");

        assert_ne!(model.status(), TrainingStatus::MaxIterationsReached);
        for (row, &label) in table.rows().iter().zip(&labels) {
            assert_eq!(model.predict_features(row).label, label);
        }
        objectives.push(model.objective_value());
    }
    assert_relative_eq!(objectives[0], objectives[1], max_relative = 1e-2);
}

#[test]
fn test_linear_kernel_cannot_fit_xor() {
    let (table, labels) = xor_table();
    let model = SvmTrainer::with_kernel(KernelKind::default())
        .train_table(&table, &labels, None)
        .expect("Training should succeed");

    let correct = table
        .rows()
        .iter()
        .zip(&labels)
        .filter(|(row, &label)| model.predict_features(row).label == label)
        .count();
    assert!(correct < labels.len());
}

#[test]
fn test_dense_and_sparse_tables_train_identically() {
    let dense = [1.0, 0.0, 0.0, 2.0, -1.0, 0.0, 0.0, -2.0];
    let labels = [1.0, 1.0, -1.0, -1.0];
    let from_dense = FeatureTable::from_dense(&dense, 4, 2).unwrap();
    let from_csr =
        FeatureTable::from_csr(&[0, 1, 2, 3, 4], &[0, 1, 0, 1], &[1.0, 2.0, -1.0, -2.0], 2).unwrap();

    let trainer = SvmTrainer::with_kernel(KernelKind::Rbf { sigma: 1.0 });
    let a = trainer.train_table(&from_dense, &labels, None).unwrap();
    let b = trainer.train_table(&from_csr, &labels, None).unwrap();

    assert_eq!(a.coefficients(), b.coefficients());
    assert_eq!(a.bias(), b.bias());
}

#[test]
fn test_thread_count_does_not_change_the_model() {
    let (table, labels) = xor_table();
    let train = |threads| {
        Svm::with_kernel(KernelKind::Rbf { sigma: 0.5 })
            .with_c(5.0)
            .with_threads(threads)
            .train_table(&table, &labels, None)
            .expect("Training should succeed")
    };

    let single = train(1);
    let many = train(4);
    assert_eq!(single.inner().coefficients(), many.inner().coefficients());
    assert_eq!(single.inner().bias(), many.inner().bias());
    assert_eq!(single.info().iterations, many.info().iterations);
}

#[test]
fn test_weights_scale_the_box() {
    let (table, labels) = xor_table();
    let weights: Vec<f64> = (0..labels.len()).map(|i| if i < 10 { 0.1 } else { 1.0 }).collect();
    let c = 2.0;
    let model = SvmTrainer::new(
        KernelKind::Rbf { sigma: 0.5 },
        SvmConfig {
            c,
            ..SvmConfig::default()
        },
    )
    .train_table(&table, &labels, Some(&weights))
    .unwrap();

    for (&i, &coef) in model.support_vector_indices().iter().zip(model.coefficients()) {
        assert!(coef.abs() <= c * weights[i] + 1e-12);
    }
    assert_relative_eq!(model.coefficients().iter().sum::<f64>(), 0.0, epsilon = 1e-9);
}

#[test]
fn test_raw_labels_are_preserved() {
    let samples = vec![
        Sample::new(SparseVector::new(vec![0], vec![3.0]), 7.0),
        Sample::new(SparseVector::new(vec![0], vec![-3.0]), 3.0),
        Sample::new(SparseVector::new(vec![0], vec![2.0]), 7.0),
        Sample::new(SparseVector::new(vec![0], vec![-2.0]), 3.0),
    ];
    let model = Svm::new().train_samples(&samples).unwrap();

    let labels: Vec<f64> = model.predict_batch(&samples).iter().map(|p| p.label).collect();
    assert_eq!(labels, vec![7.0, 3.0, 7.0, 3.0]);
}

#[test]
fn test_raw_labels_from_file() {
    let file = write_libsvm(&["7 1:3.0", "3 1:-3.0", "7 1:2.0", "3 1:-2.0"]);
    let model = Svm::new().train_from_file(file.path()).unwrap();

    let labels: Vec<f64> = model
        .predict_from_file(file.path())
        .unwrap()
        .iter()
        .map(|p| p.label)
        .collect();
    assert_eq!(labels, vec![7.0, 3.0, 7.0, 3.0]);

    let metrics = model.evaluate_detailed_from_file(file.path()).unwrap();
    assert_eq!(metrics.true_positives, 2);
    assert_eq!(metrics.true_negatives, 2);
}

#[test]
fn test_invalid_inputs_are_rejected() {
    let file = write_libsvm(&["1 1:1.0", "2 1:2.0", "3 1:3.0"]);
    assert!(matches!(
        Svm::new().train_from_file(file.path()),
        Err(DalError::InvalidLabel(_))
    ));

    let single = write_libsvm(&["1 1:1.0", "1 1:2.0"]);
    assert!(matches!(
        Svm::new().train_from_file(single.path()),
        Err(DalError::InvalidDataset(_))
    ));

    let file = write_libsvm(&["1 1:1.0", "-1 1:2.0"]);
    assert!(matches!(
        Svm::new().with_c(-1.0).train_from_file(file.path()),
        Err(DalError::InvalidParameter(_))
    ));

    assert!(Svm::new().train_from_file("/nonexistent/file.libsvm").is_err());
}

#[test]
fn test_iteration_cap_is_reported_not_raised() {
    let (table, labels) = xor_table();
    let model = Svm::with_kernel(KernelKind::Rbf { sigma: 0.5 })
        .with_max_iterations(2)
        .train_table(&table, &labels, None)
        .expect("Hitting the cap is not an error");

    assert!(!model.info().converged);
    assert_eq!(model.inner().status(), TrainingStatus::MaxIterationsReached);
}

#[test]
fn test_four_point_linear_scenario() {
    let samples = vec![
        Sample::new(SparseVector::from_dense(&[0.0, 0.0]), -1.0),
        Sample::new(SparseVector::from_dense(&[1.0, 0.0]), -1.0),
        Sample::new(SparseVector::from_dense(&[0.0, 1.0]), 1.0),
        Sample::new(SparseVector::from_dense(&[1.0, 1.0]), 1.0),
    ];

    for method in [SolverMethod::Boser, SolverMethod::Thunder] {
        let model = Svm::new()
            .with_c(1.0)
            .with_method(method)
            .train_samples(&samples)
            .expect("Training should succeed");

        let info = model.info();
        assert!(info.converged);
        assert!(info.iterations <= 100);
        assert!((2..=4).contains(&info.n_support_vectors));
        for sample in &samples {
            let prediction = model.predict(sample);
            assert!(prediction.decision_value * sample.label > 0.0);
            assert_eq!(prediction.label, sample.label);
        }
    }
}
