//! Filesystem model store.
//!
//! Artifacts are JSON envelopes carrying a format tag, a format version and
//! the writing library's version next to the pipeline itself, so a stale or
//! foreign file is reported as corrupt instead of failing mid-decode.

use std::ffi::OsString;
use std::fs::{self, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::ModelError;
use crate::pipeline::TrainedPipeline;
use crate::schema::{FeatureSchema, CATEGORICAL_FIELDS, NUMERIC_FIELDS};

pub const ARTIFACT_FORMAT: &str = "student-score-pipeline";
pub const FORMAT_VERSION: u32 = 1;
pub const LIBRARY_VERSION: &str = env!("CARGO_PKG_VERSION");

#[derive(Serialize)]
struct EnvelopeOut<'a> {
    format: &'a str,
    format_version: u32,
    library_version: &'a str,
    pipeline: &'a TrainedPipeline,
}

#[derive(Deserialize)]
struct EnvelopeHeader {
    format: String,
    format_version: u32,
    library_version: String,
}

#[derive(Deserialize)]
struct EnvelopeIn {
    pipeline: TrainedPipeline,
}

/// Hidden sibling of `path`, unique per call.
fn temp_path(path: &Path) -> PathBuf {
    let mut name = OsString::from(".");
    name.push(path.file_name().unwrap_or_default());
    name.push(format!(".{}.tmp", Uuid::new_v4().simple()));
    path.with_file_name(name)
}

fn write_synced(path: &Path, bytes: &[u8]) -> io::Result<()> {
    let mut file = OpenOptions::new().create_new(true).write(true).open(path)?;
    file.write_all(bytes)?;
    file.sync_all()
}

/// Moves a fully written temp file into place. Without `overwrite` the
/// hard link fails with `AlreadyExists` if another artifact got there first.
fn publish(tmp: &Path, path: &Path, overwrite: bool) -> io::Result<()> {
    if overwrite {
        fs::rename(tmp, path)
    } else {
        fs::hard_link(tmp, path)
    }
}

/// Writes `pipeline` to `path`, creating parent directories. An existing
/// artifact is only replaced when `overwrite` is set. Readers never see a
/// partial file.
pub fn save(path: &Path, pipeline: &TrainedPipeline, overwrite: bool) -> Result<(), ModelError> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent).map_err(|e| ModelError::persistence(parent, e))?;
    }

    let envelope = EnvelopeOut {
        format: ARTIFACT_FORMAT,
        format_version: FORMAT_VERSION,
        library_version: LIBRARY_VERSION,
        pipeline,
    };
    let bytes = serde_json::to_vec(&envelope)
        .map_err(|e| ModelError::persistence(path, io::Error::new(io::ErrorKind::Other, e)))?;

    let tmp = temp_path(path);
    let written = write_synced(&tmp, &bytes).and_then(|()| publish(&tmp, path, overwrite));
    // after a rename there is nothing left to remove
    let _ = fs::remove_file(&tmp);
    written.map_err(|e| ModelError::persistence(path, e))?;

    log::debug!("wrote {} bytes to {}", bytes.len(), path.display());
    Ok(())
}

fn same_release_line(a: &str, b: &str) -> bool {
    let line = |v: &str| v.split('.').take(2).collect::<Vec<_>>().join(".");
    line(a) == line(b)
}

pub fn load(path: &Path) -> Result<TrainedPipeline, ModelError> {
    let bytes = fs::read(path).map_err(|e| match e.kind() {
        io::ErrorKind::NotFound => ModelError::ArtifactNotFound {
            path: path.to_path_buf(),
        },
        _ => ModelError::persistence(path, e),
    })?;

    let header: EnvelopeHeader = serde_json::from_slice(&bytes)
        .map_err(|e| ModelError::corrupt(path, format!("unreadable envelope: {e}")))?;
    if header.format != ARTIFACT_FORMAT {
        return Err(ModelError::corrupt(
            path,
            format!("unexpected artifact format `{}`", header.format),
        ));
    }
    if header.format_version != FORMAT_VERSION {
        return Err(ModelError::corrupt(
            path,
            format!(
                "artifact format version {} is not supported (expected {FORMAT_VERSION})",
                header.format_version
            ),
        ));
    }
    if !same_release_line(&header.library_version, LIBRARY_VERSION) {
        return Err(ModelError::corrupt(
            path,
            format!(
                "artifact written by version {}, this build is {}; retrain the model",
                header.library_version, LIBRARY_VERSION
            ),
        ));
    }

    let envelope: EnvelopeIn = serde_json::from_slice(&bytes)
        .map_err(|e| ModelError::corrupt(path, format!("unreadable pipeline: {e}")))?;
    check_integrity(&envelope.pipeline).map_err(|reason| ModelError::corrupt(path, reason))?;

    log::info!(
        "loaded {} version {} from {}",
        envelope.pipeline.metadata().model_name,
        envelope.pipeline.metadata().version,
        path.display()
    );
    Ok(envelope.pipeline)
}

fn check_integrity(pipeline: &TrainedPipeline) -> Result<(), String> {
    if pipeline.schema() != &FeatureSchema::student() {
        return Err("embedded feature schema differs from this build".to_string());
    }
    let pre = pipeline.preprocessor();
    let numeric_match = pre
        .numeric
        .iter()
        .map(|c| c.name.as_str())
        .eq(NUMERIC_FIELDS.iter().map(|f| f.name));
    let categorical_match = pre
        .categorical
        .iter()
        .map(|c| c.name.as_str())
        .eq(CATEGORICAL_FIELDS.iter().map(|f| f.name));
    let names_match = numeric_match && categorical_match;
    if !names_match {
        return Err("preprocessor columns do not follow the feature schema".to_string());
    }
    if pre
        .numeric
        .iter()
        .any(|c| !c.mean.is_finite() || !c.scale.is_finite() || c.scale <= 0.0)
    {
        return Err("preprocessor holds invalid scaling parameters".to_string());
    }
    if pre.output_width() != pipeline.forest().n_features {
        return Err(format!(
            "preprocessor emits {} columns but the estimator expects {}",
            pre.output_width(),
            pipeline.forest().n_features
        ));
    }
    if !pipeline.forest().is_well_formed() {
        return Err("estimator does not produce finite scores".to_string());
    }
    Ok(())
}
