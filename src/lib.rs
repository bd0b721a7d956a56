//! Support vector machine training and Barnes-Hut t-SNE
//!
//! The SVM side solves the C-SVC dual with either the classic two-variable
//! SMO of Boser et al. (shrinking, second-order pair selection) or a block
//! working-set solver in the style of ThunderSVM. The t-SNE side performs
//! gradient descent on a 2-D embedding with a Morton-ordered quad-tree.

pub mod api;
pub mod cache;
pub mod core;
pub mod data;
pub mod exec;
pub mod kernel;
pub mod optimizer;
pub mod persistence;
pub mod solver;
pub mod tsne;

// Re-export main types for convenience
pub use crate::api::{EvaluationMetrics, ModelInfo, Svm, TrainedModel, Tsne};
pub use crate::cache::{CacheStats, KernelRowCache};
pub use crate::core::traits::*;
pub use crate::core::types::*;
pub use crate::core::{DalError, Result};
pub use crate::data::{CsrMatrix, FeatureTable, LibSVMDataset};
pub use crate::exec::ExecutionContext;
pub use crate::kernel::{Kernel, KernelKind, LinearKernel, PolynomialKernel, RbfKernel};
pub use crate::optimizer::{LabelMap, SvmTrainer, TrainedSvm};
pub use crate::tsne::{tsne_gradient_descent, TsneParams, TsneResult};

// Version info
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
