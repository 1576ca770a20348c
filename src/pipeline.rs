use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::ModelError;
use crate::forest::ScoreForest;
use crate::models::{FeatureRecord, TrainingExample};
use crate::preprocess::Preprocessor;
use crate::schema::{self, FeatureSchema};

pub const SCORE_MIN: f64 = 0.0;
pub const SCORE_MAX: f64 = 100.0;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HoldoutRow {
    pub past_scores: f64,
    pub actual: f64,
    pub predicted: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HoldoutMetrics {
    pub rows: usize,
    pub mae: f64,
    pub rmse: f64,
    /// Absent when the holdout is too small or has no target variance.
    pub r2: Option<f64>,
}

impl HoldoutMetrics {
    pub fn from_pairs(pairs: &[(f64, f64)]) -> Option<Self> {
        if pairs.is_empty() {
            return None;
        }
        let n = pairs.len() as f64;
        let mae = pairs.iter().map(|(a, p)| (a - p).abs()).sum::<f64>() / n;
        let sse = pairs.iter().map(|(a, p)| (a - p).powi(2)).sum::<f64>();
        let mean = pairs.iter().map(|(a, _)| a).sum::<f64>() / n;
        let sst = pairs.iter().map(|(a, _)| (a - mean).powi(2)).sum::<f64>();
        let r2 = (pairs.len() >= 2 && sst > f64::EPSILON).then(|| 1.0 - sse / sst);
        Some(Self {
            rows: pairs.len(),
            mae,
            rmse: (sse / n).sqrt(),
            r2,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipelineMetadata {
    pub model_name: String,
    pub version: Uuid,
    pub trained_at: DateTime<Utc>,
    pub random_seed: u64,
    pub test_fraction: f64,
    pub train_rows: usize,
    pub holdout_rows: usize,
    pub metrics: Option<HoldoutMetrics>,
    pub holdout: Vec<HoldoutRow>,
}

/// Fitted preprocessing and estimator, persisted and loaded as one unit.
/// Immutable after construction; shared across threads by reference.
#[derive(Debug, Serialize, Deserialize)]
pub struct TrainedPipeline {
    pub(crate) metadata: PipelineMetadata,
    pub(crate) schema: FeatureSchema,
    pub(crate) preprocessor: Preprocessor,
    pub(crate) forest: ScoreForest,
}

impl TrainedPipeline {
    pub(crate) fn new(
        metadata: PipelineMetadata,
        preprocessor: Preprocessor,
        forest: ScoreForest,
    ) -> Self {
        Self {
            metadata,
            schema: FeatureSchema::student(),
            preprocessor,
            forest,
        }
    }

    pub fn metadata(&self) -> &PipelineMetadata {
        &self.metadata
    }

    pub fn schema(&self) -> &FeatureSchema {
        &self.schema
    }

    pub fn preprocessor(&self) -> &Preprocessor {
        &self.preprocessor
    }

    pub fn forest(&self) -> &ScoreForest {
        &self.forest
    }

    /// Feature names paired with their importances, highest first.
    pub fn feature_importances(&self) -> Vec<(String, f64)> {
        let mut pairs: Vec<(String, f64)> = self
            .preprocessor
            .feature_names()
            .into_iter()
            .zip(self.forest.feature_importances.iter().copied())
            .collect();
        pairs.sort_by(|a, b| b.1.total_cmp(&a.1));
        pairs
    }

    /// Estimator output before clipping.
    pub fn predict_raw(&self, record: &FeatureRecord) -> Result<f64, ModelError> {
        schema::validate_record(record)?;
        for (field, value) in self.preprocessor.unseen_categories(record) {
            log::warn!("unseen {field} `{value}`; encoding as all-zero indicators");
        }
        let row = self.preprocessor.transform(record);
        self.forest.predict(&row)
    }

    /// Predicted final score, clipped to the valid score range.
    pub fn predict(&self, record: &FeatureRecord) -> Result<f64, ModelError> {
        let raw = self.predict_raw(record)?;
        Ok(clip_score(raw))
    }

    pub(crate) fn evaluate(
        &self,
        holdout: &[TrainingExample],
    ) -> Result<Vec<HoldoutRow>, ModelError> {
        let rows: Vec<Vec<f64>> = holdout
            .iter()
            .map(|example| self.preprocessor.transform(&example.record))
            .collect();
        let predicted = self.forest.predict_rows(&rows)?;
        Ok(holdout
            .iter()
            .zip(predicted)
            .map(|(example, raw)| HoldoutRow {
                past_scores: example.record.past_scores,
                actual: example.final_score,
                predicted: clip_score(raw),
            })
            .collect())
    }
}

pub fn clip_score(raw: f64) -> f64 {
    if raw.is_nan() {
        return SCORE_MIN;
    }
    raw.clamp(SCORE_MIN, SCORE_MAX)
}
