//! Model serialization and persistence
//!
//! Trained models are stored as pretty-printed JSON: the kernel, the support
//! vectors with their coefficients, the bias, the raw class values and the
//! configuration that produced them.

use crate::core::{DalError, Result, SparseVector, SvmConfig, SvmModel, TrainingStatus};
use crate::kernel::KernelKind;
use crate::optimizer::{LabelMap, TrainedSvm};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::fs::File;
use std::io::{BufReader, BufWriter, Read, Write};
use std::path::Path;

/// On-disk representation of a trained SVM
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelFile {
    pub kernel: KernelKind,
    pub support_vectors: Vec<SparseVector>,
    /// `alpha_i * y_i` per support vector
    pub coefficients: Vec<f64>,
    pub bias: f64,
    /// Row indices of the support vectors in the training data
    pub support_indices: Vec<usize>,
    pub classes: LabelMap,
    pub status: TrainingStatus,
    pub iterations: usize,
    pub objective_value: f64,
    pub metadata: ModelMetadata,
}

/// Model metadata for tracking and validation
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelMetadata {
    /// Library version used to create the model
    pub library_version: String,
    pub n_support_vectors: usize,
    /// Training parameters used
    pub training_params: SvmConfig,
    /// Creation timestamp (RFC 3339)
    pub created_at: String,
}

impl ModelFile {
    pub fn from_model(model: &TrainedSvm<KernelKind>, config: &SvmConfig) -> Self {
        Self {
            kernel: *model.kernel(),
            support_vectors: model.support_vectors().to_vec(),
            coefficients: model.coefficients().to_vec(),
            bias: model.bias(),
            support_indices: model.support_vector_indices().to_vec(),
            classes: model.classes(),
            status: model.status(),
            iterations: model.iterations(),
            objective_value: model.objective_value(),
            metadata: ModelMetadata {
                library_version: env!("CARGO_PKG_VERSION").to_string(),
                n_support_vectors: model.support_vectors().len(),
                training_params: config.clone(),
                created_at: chrono::Utc::now().to_rfc3339(),
            },
        }
    }

    pub fn to_writer<W: Write>(&self, writer: W) -> Result<()> {
        serde_json::to_writer_pretty(writer, self)
            .map_err(|e| DalError::Serialization(e.to_string()))
    }

    pub fn from_reader<R: Read>(reader: R) -> Result<Self> {
        serde_json::from_reader(reader).map_err(|e| DalError::Serialization(e.to_string()))
    }

    /// Save model to file
    pub fn save_to_file<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let file = File::create(path)?;
        let mut writer = BufWriter::new(file);
        self.to_writer(&mut writer)?;
        writer.flush()?;
        Ok(())
    }

    /// Load model from file
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let file = File::open(path)?;
        Self::from_reader(BufReader::new(file))
    }

    /// Rebuild the trained model, checking what JSON alone cannot guarantee
    pub fn into_model(self) -> Result<TrainedSvm<KernelKind>> {
        self.kernel.validate()?;
        for (k, sv) in self.support_vectors.iter().enumerate() {
            let sorted = sv.indices.windows(2).all(|w| w[0] < w[1]);
            if sv.indices.len() != sv.values.len() || !sorted {
                return Err(DalError::Serialization(format!(
                    "support vector {k} is not a valid sparse vector"
                )));
            }
        }
        if !self.bias.is_finite() || self.coefficients.iter().any(|c| !c.is_finite()) {
            return Err(DalError::Serialization(
                "model coefficients must be finite".to_string(),
            ));
        }
        TrainedSvm::from_parts(
            self.kernel,
            self.support_vectors,
            self.coefficients,
            self.bias,
            self.support_indices,
            self.classes,
            self.status,
            self.iterations,
            self.objective_value,
        )
    }
}

impl fmt::Display for ModelFile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let params = &self.metadata.training_params;
        writeln!(f, "=== SVM Model Summary ===")?;
        writeln!(f, "Kernel: {:?}", self.kernel)?;
        writeln!(f, "Support Vectors: {}", self.metadata.n_support_vectors)?;
        writeln!(f, "Bias: {:.6}", self.bias)?;
        writeln!(
            f,
            "Classes: {} (-1), {} (+1)",
            self.classes.negative, self.classes.positive
        )?;
        writeln!(f, "Status: {:?} after {} iterations", self.status, self.iterations)?;
        writeln!(f, "Dual Objective: {:.6}", self.objective_value)?;
        writeln!(f, "Library Version: {}", self.metadata.library_version)?;
        writeln!(f, "Created: {}", self.metadata.created_at)?;
        writeln!(f, "Training Parameters:")?;
        writeln!(f, "  C: {}", params.c)?;
        writeln!(f, "  Method: {:?}", params.method)?;
        writeln!(f, "  Accuracy Threshold: {}", params.accuracy_threshold)?;
        write!(f, "  Max Iterations: {}", params.max_iterations)
    }
}
