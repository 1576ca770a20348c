//! Request handling for a loaded pipeline.
//!
//! The line protocol takes one JSON object per line and answers one JSON
//! object per line, either `{"predicted_score", "band"}` or
//! `{"error": {"kind", "message"}}`.

use serde::Serialize;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt};

use crate::error::{ModelError, SchemaError};
use crate::models::PredictionResponse;
use crate::pipeline::TrainedPipeline;
use crate::schema::{self, Fields};

#[derive(Debug, Serialize)]
struct ErrorBody<'a> {
    kind: &'a str,
    message: String,
}

#[derive(Debug, Serialize)]
struct ErrorResponse<'a> {
    error: ErrorBody<'a>,
}

pub fn handle_payload(
    pipeline: &TrainedPipeline,
    payload: &serde_json::Value,
) -> Result<PredictionResponse, ModelError> {
    let fields = Fields::from_json(payload)?;
    let record = schema::parse_record(&fields)?;
    let score = pipeline.predict(&record)?;
    Ok(PredictionResponse::new(score))
}

fn malformed_request(reason: String) -> ModelError {
    SchemaError::Malformed {
        field: "record",
        reason,
    }
    .into()
}

pub fn handle_line(pipeline: &TrainedPipeline, line: &str) -> String {
    let outcome = serde_json::from_str::<serde_json::Value>(line)
        .map_err(|e| malformed_request(format!("invalid JSON: {e}")))
        .and_then(|payload| handle_payload(pipeline, &payload));
    encode_outcome(&outcome)
}

fn encode_outcome(outcome: &Result<PredictionResponse, ModelError>) -> String {
    let encoded = match outcome {
        Ok(response) => serde_json::to_string(response),
        Err(err) => {
            log::warn!("rejected request: {err}");
            serde_json::to_string(&ErrorResponse {
                error: ErrorBody {
                    kind: err.kind(),
                    message: err.to_string(),
                },
            })
        }
    };
    encoded.unwrap_or_else(|e| format!(r#"{{"error":{{"kind":"internal","message":"{e}"}}}}"#))
}

/// Answers requests one at a time until `input` is exhausted. Blank lines
/// are skipped and a line that is not UTF-8 gets a `schema_error` reply.
/// Returns the number of requests answered.
pub async fn serve_lines<R, W>(
    pipeline: &TrainedPipeline,
    mut input: R,
    mut output: W,
) -> std::io::Result<usize>
where
    R: AsyncBufRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let mut buf = Vec::new();
    let mut answered = 0usize;

    loop {
        buf.clear();
        if input.read_until(b'\n', &mut buf).await? == 0 {
            break;
        }
        let mut reply = match std::str::from_utf8(&buf) {
            Ok(line) if line.trim().is_empty() => continue,
            Ok(line) => handle_line(pipeline, line.trim_end_matches(['\r', '\n'])),
            Err(e) => encode_outcome(&Err(malformed_request(format!(
                "request is not valid UTF-8: {e}"
            )))),
        };
        reply.push('\n');
        output.write_all(reply.as_bytes()).await?;
        output.flush().await?;
        answered += 1;
    }

    Ok(answered)
}
