use std::path::{Path, PathBuf};

use chrono::Utc;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::dataset;
use crate::error::{ModelError, SchemaError};
use crate::forest::{ForestParams, ScoreForest};
use crate::models::{FeatureRecord, TrainingExample};
use crate::pipeline::{HoldoutMetrics, PipelineMetadata, TrainedPipeline};
use crate::preprocess::Preprocessor;
use crate::schema;
use crate::store;

pub const DEFAULT_OUTPUT_PATH: &str = "models/rf_model.json";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct TrainConfig {
    pub model_name: String,
    pub test_fraction: f64,
    pub random_seed: u64,
    pub n_estimators: usize,
    pub max_depth: Option<usize>,
    pub min_samples_leaf: usize,
    pub output_path: PathBuf,
    pub overwrite: bool,
}

impl Default for TrainConfig {
    fn default() -> Self {
        Self {
            model_name: "student-score".to_string(),
            test_fraction: 0.2,
            random_seed: 42,
            n_estimators: 100,
            max_depth: None,
            min_samples_leaf: 1,
            output_path: PathBuf::from(DEFAULT_OUTPUT_PATH),
            overwrite: false,
        }
    }
}

impl TrainConfig {
    /// Reads a JSON config; `default_output` applies when the file names no
    /// `output_path`.
    pub fn from_json_file(path: &Path, default_output: PathBuf) -> Result<Self, ModelError> {
        let text = std::fs::read_to_string(path).map_err(|e| {
            ModelError::InvalidConfig(format!("cannot read {}: {e}", path.display()))
        })?;
        let value: serde_json::Value = serde_json::from_str(&text).map_err(|e| {
            ModelError::InvalidConfig(format!("cannot parse {}: {e}", path.display()))
        })?;
        let names_output = value.get("output_path").is_some_and(|v| !v.is_null());
        let mut config: TrainConfig = serde_json::from_value(value).map_err(|e| {
            ModelError::InvalidConfig(format!("cannot parse {}: {e}", path.display()))
        })?;
        if !names_output {
            config.output_path = default_output;
        }
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ModelError> {
        if !(self.test_fraction > 0.0 && self.test_fraction < 1.0) {
            return Err(ModelError::InvalidConfig(format!(
                "test_fraction must be in (0, 1), got {}",
                self.test_fraction
            )));
        }
        if self.n_estimators == 0 {
            return Err(ModelError::InvalidConfig(
                "n_estimators must be positive".to_string(),
            ));
        }
        if self.min_samples_leaf == 0 {
            return Err(ModelError::InvalidConfig(
                "min_samples_leaf must be positive".to_string(),
            ));
        }
        if self.max_depth == Some(0) {
            return Err(ModelError::InvalidConfig(
                "max_depth must be positive when set".to_string(),
            ));
        }
        if self.model_name.trim().is_empty() {
            return Err(ModelError::InvalidConfig(
                "model_name must not be empty".to_string(),
            ));
        }
        Ok(())
    }

    fn forest_params(&self) -> ForestParams {
        ForestParams {
            n_estimators: self.n_estimators,
            max_depth: self.max_depth,
            min_samples_leaf: self.min_samples_leaf,
            seed: self.random_seed,
        }
    }
}

/// Fits a pipeline in memory without touching the model store.
pub fn fit(
    examples: &[TrainingExample],
    config: &TrainConfig,
) -> Result<TrainedPipeline, ModelError> {
    config.validate()?;
    if examples.is_empty() {
        return Err(SchemaError::EmptyDataset.into());
    }
    for (index, example) in examples.iter().enumerate() {
        schema::validate_example(example).map_err(|e| e.at_row(index + 1))?;
    }

    let split = dataset::train_test_split(examples, config.test_fraction, config.random_seed);
    log::debug!(
        "split {} examples into {} train / {} holdout (seed {})",
        examples.len(),
        split.train.len(),
        split.test.len(),
        config.random_seed
    );

    let records: Vec<&FeatureRecord> = split.train.iter().map(|e| &e.record).collect();
    let preprocessor = Preprocessor::fit(&records);
    let rows: Vec<Vec<f64>> = records.iter().map(|r| preprocessor.transform(r)).collect();
    let targets: Vec<f64> = split.train.iter().map(|e| e.final_score).collect();
    let forest = ScoreForest::fit(&rows, &targets, config.forest_params())?;

    let metadata = PipelineMetadata {
        model_name: config.model_name.clone(),
        version: Uuid::new_v4(),
        trained_at: Utc::now(),
        random_seed: config.random_seed,
        test_fraction: config.test_fraction,
        train_rows: split.train.len(),
        holdout_rows: split.test.len(),
        metrics: None,
        holdout: Vec::new(),
    };
    let mut pipeline = TrainedPipeline::new(metadata, preprocessor, forest);

    let holdout = pipeline.evaluate(&split.test)?;
    let pairs: Vec<(f64, f64)> = holdout.iter().map(|r| (r.actual, r.predicted)).collect();
    pipeline.metadata.metrics = HoldoutMetrics::from_pairs(&pairs);
    pipeline.metadata.holdout = holdout;

    if let Some(metrics) = &pipeline.metadata.metrics {
        log::info!(
            "holdout of {} rows: mae {:.2}, rmse {:.2}",
            metrics.rows,
            metrics.mae,
            metrics.rmse
        );
    }
    Ok(pipeline)
}

/// Fits a pipeline and writes it to `config.output_path`.
pub fn train(
    examples: &[TrainingExample],
    config: &TrainConfig,
) -> Result<TrainedPipeline, ModelError> {
    let pipeline = fit(examples, config)?;
    store::save(&config.output_path, &pipeline, config.overwrite)?;
    log::info!(
        "trained {} version {} on {} rows, saved to {}",
        pipeline.metadata.model_name,
        pipeline.metadata.version,
        pipeline.metadata.train_rows,
        config.output_path.display()
    );
    Ok(pipeline)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dataset::tests::sample_examples;

    fn config_in(dir: &Path) -> TrainConfig {
        TrainConfig {
            output_path: dir.join("nested").join("rf_model.json"),
            ..TrainConfig::default()
        }
    }

    fn query() -> FeatureRecord {
        FeatureRecord {
            study_time: 40.0,
            absences: 4,
            past_scores: 88.0,
            online_courses_completed: 3,
            assignment_completion_rate: 66.0,
            social_media_hours: 14.0,
            self_reported_stress_level: "Low".to_string(),
            gender: "Male".to_string(),
            school_type: "Public".to_string(),
        }
    }

    #[test]
    fn sample_scenario_predicts_in_range() {
        let dir = tempfile::tempdir().unwrap();
        let pipeline = train(&sample_examples(), &config_in(dir.path())).unwrap();
        assert_eq!(pipeline.metadata().train_rows, 8);
        assert_eq!(pipeline.metadata().holdout_rows, 2);

        let score = pipeline.predict(&query()).unwrap();
        assert!((0.0..=100.0).contains(&score), "score {score}");
        assert!(score.is_finite());
        // leaves average training targets, which span 65..=98
        assert!((65.0..=98.0).contains(&score));
    }

    #[test]
    fn training_records_predict_in_range_after_reload() {
        let dir = tempfile::tempdir().unwrap();
        let config = config_in(dir.path());
        let examples = sample_examples();
        train(&examples, &config).unwrap();
        let loaded = store::load(&config.output_path).unwrap();
        for example in &examples {
            let score = loaded.predict(&example.record).unwrap();
            assert!((0.0..=100.0).contains(&score));
        }
    }

    #[test]
    fn same_seed_gives_identical_predictions() {
        let examples = sample_examples();
        let config = TrainConfig::default();
        let a = fit(&examples, &config).unwrap();
        let b = fit(&examples, &config).unwrap();
        assert_eq!(a.predict(&query()).unwrap(), b.predict(&query()).unwrap());
        for example in &examples {
            assert_eq!(
                a.predict_raw(&example.record).unwrap(),
                b.predict_raw(&example.record).unwrap()
            );
        }
        assert_eq!(a.forest().feature_importances, b.forest().feature_importances);
        assert_eq!(a.preprocessor(), b.preprocessor());
        assert_ne!(a.metadata().version, b.metadata().version);
    }

    #[test]
    fn loaded_pipeline_matches_in_memory_pipeline() {
        let dir = tempfile::tempdir().unwrap();
        let config = config_in(dir.path());
        let examples = sample_examples();
        let trained = train(&examples, &config).unwrap();
        let loaded = store::load(&config.output_path).unwrap();
        assert_eq!(
            trained.predict(&query()).unwrap(),
            loaded.predict(&query()).unwrap()
        );
        for example in &examples {
            assert_eq!(
                trained.predict_raw(&example.record).unwrap(),
                loaded.predict_raw(&example.record).unwrap()
            );
        }
        assert_eq!(trained.metadata(), loaded.metadata());
        assert_eq!(trained.preprocessor(), loaded.preprocessor());
        assert_eq!(
            trained.forest().feature_importances,
            loaded.forest().feature_importances
        );
    }

    #[test]
    fn smallest_batch_trains_with_one_row_each_side() {
        let examples: Vec<TrainingExample> = sample_examples().into_iter().take(2).collect();
        let pipeline = fit(&examples, &TrainConfig::default()).unwrap();
        assert_eq!(pipeline.metadata().train_rows, 1);
        assert_eq!(pipeline.metadata().holdout_rows, 1);
        let score = pipeline.predict(&examples[0].record).unwrap();
        assert!((0.0..=100.0).contains(&score));
    }

    #[test]
    fn empty_batch_is_a_schema_error() {
        let err = fit(&[], &TrainConfig::default()).unwrap_err();
        assert!(matches!(err, ModelError::Schema(SchemaError::EmptyDataset)));
    }

    #[test]
    fn out_of_vocabulary_training_label_is_rejected() {
        let mut examples = sample_examples();
        examples[4].record.school_type = "Charter".to_string();
        let err = fit(&examples, &TrainConfig::default()).unwrap_err();
        match err {
            ModelError::Schema(SchemaError::Row { row, source }) => {
                assert_eq!(row, 5);
                assert!(matches!(
                    *source,
                    SchemaError::UnknownCategory {
                        field: "school_type",
                        ..
                    }
                ));
            }
            other => panic!("unexpected error {other:?}"),
        }
    }

    #[test]
    fn missing_past_scores_fails_prediction() {
        let pipeline = fit(&sample_examples(), &TrainConfig::default()).unwrap();
        let payload = serde_json::json!({
            "study_time": 40, "absences": 4, "online_courses_completed": 3,
            "assignment_completion_rate": 66, "social_media_hours": 14,
            "gender": "Male", "school_type": "Public", "stress_level": "Low"
        });
        let err = crate::serve::handle_payload(&pipeline, &payload).unwrap_err();
        assert!(matches!(
            err,
            ModelError::Schema(SchemaError::MissingField { field: "past_scores" })
        ));
    }

    #[test]
    fn unknown_gender_uses_fallback() {
        let pipeline = fit(&sample_examples(), &TrainConfig::default()).unwrap();
        let mut record = query();
        record.gender = "Nonbinary".to_string();
        let score = pipeline.predict(&record).unwrap();
        assert!(score.is_finite());
        assert!((0.0..=100.0).contains(&score));
    }

    #[test]
    fn extreme_inputs_stay_in_score_range() {
        let mut examples = sample_examples();
        for (index, example) in examples.iter_mut().enumerate() {
            example.final_score = if index % 2 == 0 { 0.0 } else { 100.0 };
        }
        let pipeline = fit(&examples, &TrainConfig::default()).unwrap();

        let mut engineered = query();
        engineered.study_time = 1.0e9;
        engineered.social_media_hours = 1.0e9;
        let raw = pipeline.predict_raw(&engineered).unwrap();
        let score = pipeline.predict(&engineered).unwrap();
        assert_eq!(score, crate::pipeline::clip_score(raw));
        assert!((0.0..=100.0).contains(&score));
    }

    #[test]
    fn adjacent_study_times_train_without_overflow() {
        let base = sample_examples().remove(0);
        let close = f64::from_bits(5.002_f64.to_bits() + 1);
        let mut examples = Vec::new();
        for (study_time, score) in [(0.0, 60.0), (40.0, 95.0), (5.002, 70.0), (close, 80.0)] {
            for _ in 0..5 {
                let mut example = base.clone();
                example.record.study_time = study_time;
                example.final_score = score;
                examples.push(example);
            }
        }
        let config = TrainConfig {
            n_estimators: 10,
            test_fraction: 0.01,
            ..TrainConfig::default()
        };
        let pipeline = fit(&examples, &config).unwrap();
        assert_eq!(pipeline.metadata().holdout_rows, 1);
        for example in &examples {
            let score = pipeline.predict(&example.record).unwrap();
            assert!((60.0..=95.0).contains(&score), "score {score}");
        }
    }

    #[test]
    fn concurrent_predictions_share_one_pipeline() {
        let pipeline = fit(&sample_examples(), &TrainConfig::default()).unwrap();
        let expected = pipeline.predict(&query()).unwrap();
        std::thread::scope(|scope| {
            let handles: Vec<_> = (0..4)
                .map(|_| scope.spawn(|| pipeline.predict(&query()).unwrap()))
                .collect();
            for handle in handles {
                assert_eq!(handle.join().unwrap(), expected);
            }
        });
    }

    #[test]
    fn holdout_metrics_are_recorded() {
        let pipeline = fit(&sample_examples(), &TrainConfig::default()).unwrap();
        let metrics = pipeline.metadata().metrics.as_ref().unwrap();
        assert_eq!(metrics.rows, 2);
        assert!(metrics.mae >= 0.0);
        assert!(metrics.rmse >= metrics.mae);
        assert_eq!(pipeline.metadata().holdout.len(), 2);
    }

    #[test]
    fn config_rejects_bad_values() {
        let bad_fraction = TrainConfig {
            test_fraction: 1.0,
            ..TrainConfig::default()
        };
        assert!(matches!(bad_fraction.validate(), Err(ModelError::InvalidConfig(_))));

        let no_trees = TrainConfig {
            n_estimators: 0,
            ..TrainConfig::default()
        };
        assert!(matches!(no_trees.validate(), Err(ModelError::InvalidConfig(_))));
        assert!(TrainConfig::default().validate().is_ok());
    }

    #[test]
    fn config_file_applies_defaults_and_rejects_unknown_keys() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("train.json");
        std::fs::write(&path, r#"{"random_seed": 7, "n_estimators": 25}"#).unwrap();
        let fallback = dir.path().join("env").join("model.json");
        let config = TrainConfig::from_json_file(&path, fallback.clone()).unwrap();
        assert_eq!(config.random_seed, 7);
        assert_eq!(config.n_estimators, 25);
        assert_eq!(config.test_fraction, 0.2);
        assert_eq!(config.output_path, fallback);

        std::fs::write(&path, r#"{"learning_rate": 0.1}"#).unwrap();
        let err = TrainConfig::from_json_file(&path, fallback).unwrap_err();
        assert!(matches!(err, ModelError::InvalidConfig(_)));
    }

    #[test]
    fn config_file_output_path_beats_fallback() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("train.json");
        std::fs::write(&path, r#"{"output_path": "store/model.json"}"#).unwrap();
        let config = TrainConfig::from_json_file(&path, dir.path().join("other.json")).unwrap();
        assert_eq!(config.output_path, PathBuf::from("store/model.json"));
    }
}
