//! dalkit command line interface
//!
//! Trains, evaluates and inspects SVM models stored as JSON, and runs
//! Barnes-Hut t-SNE gradient descent on an embedding read from JSON.

use clap::{Args, Parser, Subcommand, ValueEnum};
use dalkit::api::{Svm, TrainedModel, Tsne, TsneInput};
use dalkit::core::{DalError, Result, SolverMethod};
use dalkit::kernel::KernelKind;
use dalkit::persistence::ModelFile;
use dalkit::tsne::TsneResult;
use dalkit::{Dataset, LibSVMDataset};
use env_logger::Env;
use log::{error, info};
use serde::Serialize;
use std::fs::File;
use std::io::{self, BufWriter, Write};
use std::path::PathBuf;
use std::process;

#[derive(Parser)]
#[command(name = "dalkit")]
#[command(about = "SVM training and Barnes-Hut t-SNE")]
#[command(version = env!("CARGO_PKG_VERSION"))]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Enable debug output
    #[arg(short, long, global = true)]
    debug: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Train a new SVM model
    Train(TrainArgs),
    /// Make predictions using a trained model
    Predict(PredictArgs),
    /// Evaluate a model on test data
    Evaluate(EvaluateArgs),
    /// Display model information
    Info(InfoArgs),
    /// Run t-SNE gradient descent on a JSON embedding and affinity matrix
    Tsne(TsneArgs),
}

#[derive(Args)]
struct TrainArgs {
    /// Training data file (LibSVM format)
    #[arg(long)]
    data: PathBuf,

    /// Output model file
    #[arg(short, long)]
    output: PathBuf,

    /// Kernel function
    #[arg(short, long, default_value = "linear")]
    kernel: CliKernel,

    /// RBF width
    #[arg(long, default_value = "1.0")]
    sigma: f64,

    /// Polynomial degree
    #[arg(long, default_value = "3")]
    degree: u32,

    /// Scale of the inner product (linear and polynomial)
    #[arg(long, default_value = "1.0")]
    scale: f64,

    /// Shift added to the scaled inner product (linear and polynomial)
    #[arg(long, default_value = "0.0")]
    shift: f64,

    /// Regularization parameter C
    #[arg(short = 'C', long, default_value = "1.0")]
    c: f64,

    /// Duality-gap stopping threshold
    #[arg(short, long, default_value = "0.001")]
    epsilon: f64,

    /// Maximum iterations
    #[arg(short, long, default_value = "1000000")]
    max_iterations: usize,

    /// Kernel cache size in MB
    #[arg(long, default_value = "8")]
    cache_size: usize,

    /// Solver
    #[arg(long, default_value = "boser")]
    method: CliMethod,

    /// Largest working set of the thunder solver
    #[arg(long, default_value = "2048")]
    max_block_size: usize,

    /// Disable shrinking in the boser solver
    #[arg(long)]
    no_shrinking: bool,

    /// Worker threads (0 uses all cores)
    #[arg(short, long, default_value = "0")]
    threads: usize,
}

#[derive(ValueEnum, Clone, Copy, Debug)]
enum CliKernel {
    Linear,
    Rbf,
    Polynomial,
}

#[derive(ValueEnum, Clone, Copy, Debug)]
enum CliMethod {
    /// Classic two-variable SMO with shrinking
    Boser,
    /// Block working sets solved by a local SMO
    Thunder,
}

impl From<CliMethod> for SolverMethod {
    fn from(method: CliMethod) -> Self {
        match method {
            CliMethod::Boser => SolverMethod::Boser,
            CliMethod::Thunder => SolverMethod::Thunder,
        }
    }
}

impl TrainArgs {
    fn kernel_kind(&self) -> KernelKind {
        match self.kernel {
            CliKernel::Linear => KernelKind::Linear {
                scale: self.scale,
                shift: self.shift,
            },
            CliKernel::Rbf => KernelKind::Rbf { sigma: self.sigma },
            CliKernel::Polynomial => KernelKind::Polynomial {
                degree: self.degree,
                scale: self.scale,
                shift: self.shift,
            },
        }
    }
}

#[derive(Args)]
struct PredictArgs {
    /// Trained model file
    #[arg(short, long)]
    model: PathBuf,

    /// Input data file
    #[arg(long)]
    data: PathBuf,

    /// Output predictions file (optional, prints to stdout if not specified)
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// Show confidence scores
    #[arg(long)]
    confidence: bool,
}

#[derive(Args)]
struct EvaluateArgs {
    /// Trained model file
    #[arg(short, long)]
    model: PathBuf,

    /// Test data file
    #[arg(long)]
    data: PathBuf,

    /// Show detailed metrics
    #[arg(long)]
    detailed: bool,
}

#[derive(Args)]
struct InfoArgs {
    /// Model file
    model: PathBuf,
}

#[derive(Args)]
struct TsneArgs {
    /// JSON file with `embedding` and `affinity`
    #[arg(short, long)]
    input: PathBuf,

    /// Output JSON file (optional, prints to stdout if not specified)
    #[arg(short, long)]
    output: Option<PathBuf>,

    #[arg(long, default_value = "1000")]
    max_iter: usize,

    /// Iterations with early exaggeration
    #[arg(long, default_value = "250")]
    exploration_iter: usize,

    #[arg(long, default_value = "12.0")]
    early_exaggeration: f64,

    #[arg(long, default_value = "200.0")]
    learning_rate: f64,

    /// Barnes-Hut opening angle (0 is exact)
    #[arg(long, default_value = "0.5")]
    angle: f64,

    /// Worker threads (0 uses all cores)
    #[arg(short, long, default_value = "0")]
    threads: usize,
}

#[derive(Serialize)]
struct TsneOutput {
    embedding: Vec<[f64; 2]>,
    result: TsneResult,
}

fn main() {
    let cli = Cli::parse();

    let log_level = if cli.debug {
        "debug"
    } else if cli.verbose {
        "info"
    } else {
        "warn"
    };

    env_logger::Builder::from_env(Env::default().default_filter_or(log_level)).init();

    let result = match cli.command {
        Commands::Train(args) => train_command(args),
        Commands::Predict(args) => predict_command(args),
        Commands::Evaluate(args) => evaluate_command(args),
        Commands::Info(args) => info_command(args),
        Commands::Tsne(args) => tsne_command(args),
    };

    if let Err(e) = result {
        error!("Error: {e}");
        process::exit(1);
    }
}

fn train_command(args: TrainArgs) -> Result<()> {
    info!("Training SVM model...");
    info!("Data file: {:?}", args.data);
    info!(
        "Parameters: C={}, epsilon={}, max_iter={}, method={:?}",
        args.c, args.epsilon, args.max_iterations, args.method
    );

    let kernel = args.kernel_kind();
    info!("Kernel: {} ({kernel:?})", kernel.name());

    let dataset = LibSVMDataset::from_file(&args.data)?;
    info!(
        "Loaded {} samples with {} dimensions",
        dataset.len(),
        dataset.dim()
    );

    let model = Svm::new()
        .with_kernel_kind(kernel)
        .with_c(args.c)
        .with_accuracy_threshold(args.epsilon)
        .with_max_iterations(args.max_iterations)
        .with_cache_size(args.cache_size * 1024 * 1024)
        .with_method(args.method.into())
        .with_max_block_size(args.max_block_size)
        .with_shrinking(!args.no_shrinking)
        .with_threads(args.threads)
        .train_libsvm(&dataset)?;

    let info = model.info();
    info!("Training finished after {} iterations", info.iterations);
    info!("Support vectors: {}", info.n_support_vectors);
    info!("Bias: {:.6}", info.bias);

    model.save(&args.output)?;
    info!("Model saved to: {:?}", args.output);

    let accuracy = model.evaluate(&dataset);
    info!("Training accuracy: {:.2}%", accuracy * 100.0);

    Ok(())
}

fn predict_command(args: PredictArgs) -> Result<()> {
    info!("Loading model from: {:?}", args.model);
    let model = TrainedModel::load(&args.model)?;

    info!("Loading prediction data from: {:?}", args.data);
    let predictions = model.predict_from_file(&args.data)?;

    let mut writer: Box<dyn Write> = match &args.output {
        Some(path) => Box::new(BufWriter::new(File::create(path)?)),
        None => Box::new(io::stdout().lock()),
    };

    writeln!(writer, "# Predictions for {} samples", predictions.len())?;
    writeln!(
        writer,
        "# Format: sample_index predicted_label{}",
        if args.confidence { " confidence" } else { "" }
    )?;
    for (i, pred) in predictions.iter().enumerate() {
        if args.confidence {
            writeln!(writer, "{} {} {:.6}", i, pred.label, pred.confidence())?;
        } else {
            writeln!(writer, "{} {}", i, pred.label)?;
        }
    }
    writer.flush()?;

    if let Some(path) = args.output {
        info!("Predictions saved to: {path:?}");
    }
    Ok(())
}

fn evaluate_command(args: EvaluateArgs) -> Result<()> {
    info!("Loading model from: {:?}", args.model);
    let file = ModelFile::load_from_file(&args.model)?;
    let summary = file.to_string();
    let model = TrainedModel::load(&args.model)?;

    info!("Loading test data from: {:?}", args.data);
    let metrics = model.evaluate_detailed_from_file(&args.data)?;

    println!("=== Model Evaluation ===");
    println!("{summary}");

    println!("\nTest Results:");
    println!("  Accuracy: {:.2}%", metrics.accuracy() * 100.0);

    if args.detailed {
        println!("\nDetailed Metrics:");
        println!("  True Positives:  {}", metrics.true_positives);
        println!("  True Negatives:  {}", metrics.true_negatives);
        println!("  False Positives: {}", metrics.false_positives);
        println!("  False Negatives: {}", metrics.false_negatives);
        println!("  Precision:       {:.4}", metrics.precision());
        println!("  Recall:          {:.4}", metrics.recall());
        println!("  F1 Score:        {:.4}", metrics.f1_score());
        println!("  Specificity:     {:.4}", metrics.specificity());
    }

    Ok(())
}

fn info_command(args: InfoArgs) -> Result<()> {
    info!("Loading model from: {:?}", args.model);
    let file = ModelFile::load_from_file(&args.model)?;

    println!("{file}");

    println!("\nSupport Vector Details:");
    println!("  Total: {}", file.support_vectors.len());
    if let Some(first_sv) = file.support_vectors.first() {
        println!("  First SV non-zeros: {}", first_sv.nnz());
        println!(
            "  First SV indices: {:?}",
            &first_sv.indices[..first_sv.indices.len().min(5)]
        );
        if first_sv.indices.len() > 5 {
            println!("    ... ({} more)", first_sv.indices.len() - 5);
        }
    }

    println!("\nCoefficients (alpha*y):");
    let n_show = file.coefficients.len().min(10);
    for (i, coef) in file.coefficients.iter().take(n_show).enumerate() {
        println!("  sv {}: {coef:.6}", file.support_indices.get(i).copied().unwrap_or(i));
    }
    if file.coefficients.len() > n_show {
        println!("  ... ({} more)", file.coefficients.len() - n_show);
    }

    Ok(())
}

fn tsne_command(args: TsneArgs) -> Result<()> {
    info!("Loading t-SNE input from: {:?}", args.input);
    let mut input = TsneInput::from_file(&args.input)?;

    let result = Tsne::new()
        .with_max_iter(args.max_iter)
        .with_exploration_iter(args.exploration_iter)
        .with_early_exaggeration(args.early_exaggeration)
        .with_learning_rate(args.learning_rate)
        .with_angle(args.angle)
        .with_threads(args.threads)
        .run_input(&mut input)?;
    info!(
        "t-SNE stopped after {} iterations: divergence {:.6}, gradient norm {:.3e}",
        result.cur_iter, result.divergence, result.grad_norm
    );

    let output = TsneOutput {
        embedding: input.embedding,
        result,
    };
    let writer: Box<dyn Write> = match &args.output {
        Some(path) => Box::new(BufWriter::new(File::create(path)?)),
        None => Box::new(io::stdout().lock()),
    };
    write_json(writer, &output)?;

    if let Some(path) = args.output {
        info!("Embedding saved to: {path:?}");
    }
    Ok(())
}

fn write_json<W: Write, T: Serialize>(mut writer: W, value: &T) -> Result<()> {
    serde_json::to_writer_pretty(&mut writer, value)
        .map_err(|e| DalError::Serialization(e.to_string()))?;
    writeln!(writer)?;
    writer.flush()?;
    Ok(())
}
