use std::fmt::Write;

use crate::models::ScoreBand;
use crate::pipeline::TrainedPipeline;

pub fn build_report(pipeline: &TrainedPipeline) -> String {
    let meta = pipeline.metadata();
    let mut output = String::new();

    let _ = writeln!(output, "# Student Score Model Report");
    let _ = writeln!(
        output,
        "Model {} version {} (trained {})",
        meta.model_name,
        meta.version,
        meta.trained_at.format("%Y-%m-%d %H:%M UTC")
    );
    let _ = writeln!(output);
    let _ = writeln!(output, "## Training Split");
    let _ = writeln!(
        output,
        "- {} training rows, {} holdout rows (test fraction {:.2}, seed {})",
        meta.train_rows, meta.holdout_rows, meta.test_fraction, meta.random_seed
    );
    let _ = writeln!(
        output,
        "- {} trees over {} encoded features",
        pipeline.forest().params.n_estimators,
        pipeline.forest().n_features
    );

    let _ = writeln!(output);
    let _ = writeln!(output, "## Holdout Accuracy");

    match &meta.metrics {
        None => {
            let _ = writeln!(output, "No holdout rows were available for evaluation.");
        }
        Some(metrics) => {
            let _ = writeln!(output, "- MAE {:.2}", metrics.mae);
            let _ = writeln!(output, "- RMSE {:.2}", metrics.rmse);
            match metrics.r2 {
                Some(r2) => {
                    let _ = writeln!(output, "- R² {r2:.3}");
                }
                None => {
                    let _ = writeln!(output, "- R² not defined for this holdout");
                }
            }
        }
    }

    let _ = writeln!(output);
    let _ = writeln!(output, "## Feature Importance");

    let importances: Vec<(String, f64)> = pipeline
        .feature_importances()
        .into_iter()
        .filter(|(_, weight)| *weight > 0.0)
        .collect();
    if importances.is_empty() {
        let _ = writeln!(output, "No feature moved the predicted score.");
    } else {
        for (name, weight) in importances.iter().take(10) {
            let _ = writeln!(output, "- {}: {:.1}%", name, weight * 100.0);
        }
    }

    let _ = writeln!(output);
    let _ = writeln!(output, "## Past vs Predicted Scores");

    if meta.holdout.is_empty() {
        let _ = writeln!(output, "No holdout rows were available for evaluation.");
    } else {
        for row in &meta.holdout {
            let _ = writeln!(
                output,
                "- past {:.0}, actual {:.0}, predicted {:.1} ({})",
                row.past_scores,
                row.actual,
                row.predicted,
                ScoreBand::for_score(row.predicted).label()
            );
        }
    }

    output
}
