use base64::{engine::general_purpose, Engine as _};
use chrono::Utc;
use regex::Regex;
use serde::Deserialize;
use serde_json::{json, Map, Value};
use std::sync::LazyLock;
use uuid::Uuid;

use crate::blobs::{content_type_for, ObjectMetadata};
use crate::error::{BlobError, HandlerError};
use crate::types::RequestContext;
use crate::AppState;

static FILENAME_UNSAFE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[^a-zA-Z0-9_.-]").expect("filename pattern compiles"));

#[derive(Debug, Deserialize)]
pub struct UploadRequest {
    /// Base64 file contents
    pub file: String,
    #[serde(default)]
    pub filename: String,
    #[serde(default)]
    pub metadata: Map<String, Value>,
}

/// Base name of a client supplied path with unsafe characters replaced
pub fn safe_file_name(filename: &str) -> String {
    let base = filename.rsplit(['/', '\\']).next().unwrap_or(filename);
    FILENAME_UNSAFE.replace_all(base, "_").into_owned()
}

/// Object metadata values are always strings
pub fn stringify_metadata(metadata: &Map<String, Value>) -> ObjectMetadata {
    metadata
        .iter()
        .map(|(k, v)| {
            let value = match v {
                Value::String(s) => s.clone(),
                other => other.to_string(),
            };
            (k.clone(), value)
        })
        .collect()
}

/// Store a student submission in the submissions bucket
pub async fn upload(state: &AppState, ctx: &RequestContext) -> Result<Value, HandlerError> {
    let request: UploadRequest = ctx.json_body()?;

    let extension = request
        .filename
        .rsplit_once('.')
        .map(|(_, ext)| ext.to_ascii_lowercase())
        .unwrap_or_default();
    let content_type = content_type_for(&extension)
        .ok_or_else(|| BlobError::UnsupportedFileType(request.filename.clone()))?;

    let bytes = general_purpose::STANDARD
        .decode(request.file.trim())
        .map_err(|e| HandlerError::BadRequest(format!("file is not valid base64: {}", e)))?;

    let key = format!(
        "assignments/{}/{}_{}",
        Utc::now().format("%Y-%m-%d"),
        Uuid::new_v4().simple(),
        safe_file_name(&request.filename)
    );

    let url = state
        .blobs
        .put(
            &state.config.buckets.submitted,
            &key,
            bytes,
            content_type,
            stringify_metadata(&request.metadata),
        )
        .await?;
    tracing::info!("Stored submission {} ({})", key, content_type);

    Ok(json!({ "url": url }))
}
