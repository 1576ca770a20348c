//! Train a student final-score regressor from tabular records, persist it as
//! a versioned artifact, and serve clipped predictions from the loaded model.

pub mod dataset;
pub mod error;
pub mod forest;
pub mod models;
pub mod pipeline;
pub mod preprocess;
pub mod report;
pub mod schema;
pub mod serve;
pub mod store;
pub mod train;

pub use error::{ModelError, SchemaError};
pub use models::{FeatureRecord, PredictionResponse, ScoreBand, TrainingExample};
pub use pipeline::TrainedPipeline;
pub use store::load;
pub use train::{fit, train, TrainConfig};
