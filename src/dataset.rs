use std::io::Read;
use std::path::Path;

use anyhow::Context;
use rand::seq::SliceRandom;
use rand::{rngs::StdRng, SeedableRng};

use crate::models::TrainingExample;
use crate::schema::{self, Fields};

pub fn load_csv(path: &Path) -> anyhow::Result<Vec<TrainingExample>> {
    let file = std::fs::File::open(path)
        .with_context(|| format!("failed to open dataset {}", path.display()))?;
    read_csv(file).with_context(|| format!("failed to read dataset {}", path.display()))
}

/// Reads training examples from CSV with a header row. Columns outside the
/// schema (such as `student_id`) are ignored.
pub fn read_csv<R: Read>(reader: R) -> anyhow::Result<Vec<TrainingExample>> {
    let mut reader = csv::ReaderBuilder::new().trim(csv::Trim::All).from_reader(reader);
    let headers = reader.headers()?.clone();
    let mut examples = Vec::new();

    for (index, result) in reader.records().enumerate() {
        let row = result?;
        let fields = Fields::from_csv(&headers, &row);
        let example = schema::parse_example(&fields).map_err(|e| e.at_row(index + 1))?;
        examples.push(example);
    }

    log::debug!("read {} training examples", examples.len());
    Ok(examples)
}

#[derive(Debug, Clone)]
pub struct Split<T> {
    pub train: Vec<T>,
    pub test: Vec<T>,
}

pub fn holdout_size(len: usize, test_fraction: f64) -> usize {
    let wanted = (test_fraction * len as f64).ceil() as usize;
    wanted.min(len.saturating_sub(1))
}

/// Seeded shuffle split; the same seed and input always give the same split.
pub fn train_test_split<T: Clone>(items: &[T], test_fraction: f64, seed: u64) -> Split<T> {
    let mut order: Vec<usize> = (0..items.len()).collect();
    let mut rng = StdRng::seed_from_u64(seed);
    order.shuffle(&mut rng);

    let n_test = holdout_size(items.len(), test_fraction);
    let (test_idx, train_idx) = order.split_at(n_test);
    Split {
        train: train_idx.iter().map(|&i| items[i].clone()).collect(),
        test: test_idx.iter().map(|&i| items[i].clone()).collect(),
    }
}
