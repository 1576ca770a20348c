use serde::{Deserialize, Serialize};

use crate::models::FeatureRecord;
use crate::schema::{CATEGORICAL_FIELDS, NUMERIC_FIELDS};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScalerColumn {
    pub name: String,
    pub mean: f64,
    pub scale: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EncoderColumn {
    pub name: String,
    /// Sorted labels observed in the training subset.
    pub categories: Vec<String>,
}

/// Fitted column transform: standardized numerics followed by one-hot
/// blocks. Labels absent from a block's vocabulary encode as all zeros.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Preprocessor {
    pub numeric: Vec<ScalerColumn>,
    pub categorical: Vec<EncoderColumn>,
}

impl Preprocessor {
    /// Fits on the given records only; callers pass the training subset.
    pub fn fit(records: &[&FeatureRecord]) -> Self {
        let n = records.len().max(1) as f64;

        let numeric = NUMERIC_FIELDS
            .iter()
            .enumerate()
            .map(|(col, field)| {
                let values: Vec<f64> = records.iter().map(|r| r.numeric_values()[col]).collect();
                let mean = values.iter().sum::<f64>() / n;
                let variance = values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / n;
                let std = variance.sqrt();
                ScalerColumn {
                    name: field.name.to_string(),
                    mean,
                    scale: if std > f64::EPSILON { std } else { 1.0 },
                }
            })
            .collect();

        let categorical = CATEGORICAL_FIELDS
            .iter()
            .enumerate()
            .map(|(col, field)| {
                let mut categories: Vec<String> = records
                    .iter()
                    .map(|r| r.categorical_values()[col].to_string())
                    .collect();
                categories.sort();
                categories.dedup();
                EncoderColumn {
                    name: field.name.to_string(),
                    categories,
                }
            })
            .collect();

        Self {
            numeric,
            categorical,
        }
    }

    pub fn output_width(&self) -> usize {
        self.numeric.len()
            + self
                .categorical
                .iter()
                .map(|c| c.categories.len())
                .sum::<usize>()
    }

    pub fn feature_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.numeric.iter().map(|c| c.name.clone()).collect();
        for column in &self.categorical {
            for category in &column.categories {
                names.push(format!("{}={}", column.name, category));
            }
        }
        names
    }

    /// Columns of `record` whose label is not in the fitted vocabulary.
    pub fn unseen_categories<'a>(&self, record: &'a FeatureRecord) -> Vec<(&str, &'a str)> {
        self.categorical
            .iter()
            .zip(record.categorical_values())
            .filter(|(column, value)| !column.categories.iter().any(|c| c == value))
            .map(|(column, value)| (column.name.as_str(), value))
            .collect()
    }

    pub fn transform(&self, record: &FeatureRecord) -> Vec<f64> {
        let mut row = Vec::with_capacity(self.output_width());
        for (column, value) in self.numeric.iter().zip(record.numeric_values()) {
            row.push((value - column.mean) / column.scale);
        }
        for (column, value) in self.categorical.iter().zip(record.categorical_values()) {
            row.extend(
                column
                    .categories
                    .iter()
                    .map(|c| if c == value { 1.0 } else { 0.0 }),
            );
        }
        row
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dataset::tests::sample_examples;

    fn fitted() -> (Preprocessor, Vec<FeatureRecord>) {
        let records: Vec<FeatureRecord> =
            sample_examples().into_iter().map(|e| e.record).collect();
        let refs: Vec<&FeatureRecord> = records.iter().collect();
        (Preprocessor::fit(&refs), records)
    }

    #[test]
    fn standardizes_to_zero_mean_unit_variance() {
        let (pre, records) = fitted();
        let rows: Vec<Vec<f64>> = records.iter().map(|r| pre.transform(r)).collect();
        for col in 0..pre.numeric.len() {
            let mean = rows.iter().map(|r| r[col]).sum::<f64>() / rows.len() as f64;
            let var = rows.iter().map(|r| (r[col] - mean).powi(2)).sum::<f64>() / rows.len() as f64;
            assert!(mean.abs() < 1e-9, "column {col} mean {mean}");
            assert!((var - 1.0).abs() < 1e-9, "column {col} variance {var}");
        }
    }

    #[test]
    fn vocabulary_is_sorted_and_one_hot() {
        let (pre, records) = fitted();
        assert_eq!(pre.categorical[0].categories, ["Female", "Male"]);
        assert_eq!(pre.categorical[2].categories, ["High", "Low", "Medium"]);
        assert_eq!(pre.output_width(), 6 + 2 + 2 + 3);

        let row = pre.transform(&records[0]);
        assert_eq!(&row[6..8], &[0.0, 1.0]);
        assert_eq!(&row[10..13], &[1.0, 0.0, 0.0]);
    }

    #[test]
    fn unseen_label_encodes_as_zeros() {
        let (pre, records) = fitted();
        let mut record = records[0].clone();
        record.gender = "Other".to_string();
        let row = pre.transform(&record);
        assert_eq!(&row[6..8], &[0.0, 0.0]);
        assert_eq!(pre.unseen_categories(&record), vec![("gender", "Other")]);
    }

    #[test]
    fn constant_column_keeps_unit_scale() {
        let (_, records) = fitted();
        let first = records[0].clone();
        let refs = vec![&first, &first];
        let pre = Preprocessor::fit(&refs);
        assert!(pre.numeric.iter().all(|c| c.scale == 1.0));
        assert!(pre.transform(&first)[..6].iter().all(|v| *v == 0.0));
    }

    #[test]
    fn feature_names_match_width() {
        let (pre, _) = fitted();
        let names = pre.feature_names();
        assert_eq!(names.len(), pre.output_width());
        assert_eq!(names[6], "gender=Female");
    }
}
