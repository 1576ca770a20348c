//! Random-forest estimator over the encoded feature matrix.
//!
//! Tree growing and bagging come from smartcore; this module owns the
//! parameters, the seeded permutation importances and the checks run on a
//! reloaded model.

use rand::seq::SliceRandom;
use rand::{rngs::StdRng, SeedableRng};
use serde::{Deserialize, Serialize};
use smartcore::ensemble::random_forest_regressor::{
    RandomForestRegressor, RandomForestRegressorParameters,
};
use smartcore::linalg::basic::matrix::DenseMatrix;

use crate::error::ModelError;

pub type Regressor = RandomForestRegressor<f64, f64, DenseMatrix<f64>, Vec<f64>>;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ForestParams {
    pub n_estimators: usize,
    pub max_depth: Option<usize>,
    pub min_samples_leaf: usize,
    pub seed: u64,
}

impl Default for ForestParams {
    fn default() -> Self {
        Self {
            n_estimators: 100,
            max_depth: None,
            min_samples_leaf: 1,
            seed: 42,
        }
    }
}

impl ForestParams {
    /// Every split considers all columns, as a regression forest should.
    fn to_smartcore(self, n_features: usize) -> RandomForestRegressorParameters {
        let mut params = RandomForestRegressorParameters::default()
            .with_n_trees(self.n_estimators)
            .with_min_samples_leaf(self.min_samples_leaf.max(1))
            .with_m(n_features.max(1))
            .with_seed(self.seed);
        if let Some(depth) = self.max_depth {
            params = params.with_max_depth(u16::try_from(depth).unwrap_or(u16::MAX));
        }
        params
    }
}

fn estimator_error(e: smartcore::error::Failed) -> ModelError {
    ModelError::Estimator(e.to_string())
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ScoreForest {
    pub params: ForestParams,
    pub n_features: usize,
    /// Normalized rise in training MSE when one column is shuffled.
    pub feature_importances: Vec<f64>,
    model: Regressor,
}

impl ScoreForest {
    /// Fits the forest. `rows` and `targets` must be non-empty and equally long.
    pub fn fit(
        rows: &[Vec<f64>],
        targets: &[f64],
        params: ForestParams,
    ) -> Result<Self, ModelError> {
        let n_features = rows.first().map_or(0, Vec::len);
        if rows.is_empty() || n_features == 0 || rows.len() != targets.len() {
            return Err(ModelError::Estimator(format!(
                "cannot fit {} rows x {} features against {} targets",
                rows.len(),
                n_features,
                targets.len()
            )));
        }

        let x = DenseMatrix::from_2d_vec(&rows.to_vec());
        let y = targets.to_vec();
        let model = Regressor::fit(&x, &y, params.to_smartcore(n_features))
            .map_err(estimator_error)?;

        let mut forest = Self {
            params,
            n_features,
            feature_importances: vec![0.0; n_features],
            model,
        };
        forest.feature_importances = forest.permutation_importances(rows, targets)?;

        log::debug!(
            "fitted {} trees on {} rows x {} features",
            params.n_estimators,
            rows.len(),
            n_features
        );
        Ok(forest)
    }

    pub fn predict_rows(&self, rows: &[Vec<f64>]) -> Result<Vec<f64>, ModelError> {
        if let Some(bad) = rows.iter().find(|r| r.len() != self.n_features) {
            return Err(ModelError::Estimator(format!(
                "row has {} columns, estimator expects {}",
                bad.len(),
                self.n_features
            )));
        }
        if rows.is_empty() {
            return Ok(Vec::new());
        }
        let x = DenseMatrix::from_2d_vec(&rows.to_vec());
        self.model.predict(&x).map_err(estimator_error)
    }

    pub fn predict(&self, row: &[f64]) -> Result<f64, ModelError> {
        let predictions = self.predict_rows(&[row.to_vec()])?;
        predictions
            .first()
            .copied()
            .ok_or_else(|| ModelError::Estimator("estimator returned no prediction".to_string()))
    }

    /// A reloaded model must score a neutral row to a finite value and carry
    /// one importance per column.
    pub fn is_well_formed(&self) -> bool {
        self.n_features > 0
            && self.feature_importances.len() == self.n_features
            && self.feature_importances.iter().all(|v| v.is_finite())
            && self
                .predict(&vec![0.0; self.n_features])
                .is_ok_and(f64::is_finite)
    }

    fn permutation_importances(
        &self,
        rows: &[Vec<f64>],
        targets: &[f64],
    ) -> Result<Vec<f64>, ModelError> {
        let baseline = mean_squared_error(&self.predict_rows(rows)?, targets);
        let mut importances = Vec::with_capacity(self.n_features);

        for column in 0..self.n_features {
            let mut values: Vec<f64> = rows.iter().map(|r| r[column]).collect();
            let mut rng = StdRng::seed_from_u64(self.params.seed.wrapping_add(column as u64));
            values.shuffle(&mut rng);

            let shuffled: Vec<Vec<f64>> = rows
                .iter()
                .zip(values)
                .map(|(row, value)| {
                    let mut row = row.clone();
                    row[column] = value;
                    row
                })
                .collect();
            let error = mean_squared_error(&self.predict_rows(&shuffled)?, targets);
            importances.push((error - baseline).max(0.0));
        }

        let total: f64 = importances.iter().sum();
        if total > 0.0 {
            importances.iter_mut().for_each(|v| *v /= total);
        }
        Ok(importances)
    }
}

fn mean_squared_error(predicted: &[f64], actual: &[f64]) -> f64 {
    if actual.is_empty() {
        return 0.0;
    }
    let sse: f64 = predicted
        .iter()
        .zip(actual)
        .map(|(p, a)| (p - a).powi(2))
        .sum();
    sse / actual.len() as f64
}
