use std::path::PathBuf;

use anyhow::Context;
use clap::{Parser, Subcommand};

use student_score_predictor::{dataset, report, serve, store, train, TrainConfig};

const MODEL_PATH_ENV: &str = "STUDENT_SCORE_MODEL";

#[derive(Parser)]
#[command(name = "student-score")]
#[command(about = "Train and serve the student final score model", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Train a model from a CSV dataset and save it to the model store
    Train {
        #[arg(long)]
        csv: PathBuf,
        /// JSON file with training options
        #[arg(long)]
        config: Option<PathBuf>,
        #[arg(long)]
        out: Option<PathBuf>,
        #[arg(long)]
        test_fraction: Option<f64>,
        #[arg(long)]
        seed: Option<u64>,
        #[arg(long)]
        n_estimators: Option<usize>,
        #[arg(long)]
        max_depth: Option<usize>,
        /// Replace an existing artifact at the output path
        #[arg(long)]
        force: bool,
        /// Also write a markdown training report
        #[arg(long)]
        report: Option<PathBuf>,
    },
    /// Predict the final score for one record given as a JSON object
    Predict {
        #[arg(long)]
        model: Option<PathBuf>,
        #[arg(long)]
        record: String,
    },
    /// Answer JSON-line prediction requests from stdin
    Serve {
        #[arg(long)]
        model: Option<PathBuf>,
    },
    /// Write a markdown report for a saved model
    Report {
        #[arg(long)]
        model: Option<PathBuf>,
        #[arg(long, default_value = "report.md")]
        out: PathBuf,
    },
}

fn model_path(arg: Option<PathBuf>) -> PathBuf {
    arg.or_else(|| std::env::var_os(MODEL_PATH_ENV).map(PathBuf::from))
        .unwrap_or_else(|| PathBuf::from(train::DEFAULT_OUTPUT_PATH))
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let cli = Cli::parse();

    match cli.command {
        Commands::Train {
            csv,
            config,
            out,
            test_fraction,
            seed,
            n_estimators,
            max_depth,
            force,
            report: report_out,
        } => {
            let mut config = match &config {
                Some(path) => TrainConfig::from_json_file(path, model_path(None))?,
                None => TrainConfig {
                    output_path: model_path(None),
                    ..TrainConfig::default()
                },
            };
            if let Some(out) = out {
                config.output_path = out;
            }
            if let Some(value) = test_fraction {
                config.test_fraction = value;
            }
            if let Some(value) = seed {
                config.random_seed = value;
            }
            if let Some(value) = n_estimators {
                config.n_estimators = value;
            }
            if max_depth.is_some() {
                config.max_depth = max_depth;
            }
            config.overwrite |= force;

            let examples = dataset::load_csv(&csv)?;
            let output_path = config.output_path.clone();
            let pipeline = tokio::task::spawn_blocking(move || train::train(&examples, &config))
                .await
                .context("training task failed")??;

            println!(
                "Model {} version {} saved to {}.",
                pipeline.metadata().model_name,
                pipeline.metadata().version,
                output_path.display()
            );
            if let Some(metrics) = &pipeline.metadata().metrics {
                println!(
                    "Holdout of {} rows: MAE {:.2}, RMSE {:.2}.",
                    metrics.rows, metrics.mae, metrics.rmse
                );
            }
            if let Some(path) = report_out {
                std::fs::write(&path, report::build_report(&pipeline))
                    .with_context(|| format!("failed to write report {}", path.display()))?;
                println!("Report written to {}.", path.display());
            }
        }
        Commands::Predict { model, record } => {
            let pipeline = store::load(&model_path(model))?;
            let payload: serde_json::Value =
                serde_json::from_str(&record).context("--record must be a JSON object")?;
            let response = serve::handle_payload(&pipeline, &payload)?;
            println!("{}", serde_json::to_string(&response)?);
        }
        Commands::Serve { model } => {
            let path = model_path(model);
            let pipeline = store::load(&path)?;
            log::info!("serving predictions from {} on stdin", path.display());

            let stdin = tokio::io::BufReader::new(tokio::io::stdin());
            let answered = serve::serve_lines(&pipeline, stdin, tokio::io::stdout())
                .await
                .context("failed while serving requests")?;
            log::info!("answered {answered} requests");
        }
        Commands::Report { model, out } => {
            let pipeline = store::load(&model_path(model))?;
            std::fs::write(&out, report::build_report(&pipeline))
                .with_context(|| format!("failed to write report {}", out.display()))?;
            println!("Report written to {}.", out.display());
        }
    }

    Ok(())
}
