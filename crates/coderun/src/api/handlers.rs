//! HTTP handlers.

use axum::{
    Json,
    extract::{Multipart, State},
};
use log::{debug, info};
use serde::{Deserialize, Serialize};

use crate::exec::{EMPTY_CODE_MESSAGE, RunEnd, TIMEOUT_MESSAGE, launch};
use crate::upload::{ImageUpload, UploadOutcome};

use super::error::{ApiError, ApiResult};
use super::state::AppState;

/// Multipart field carrying images.
pub const IMAGES_FIELD: &str = "images";

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub version: &'static str,
}

/// GET /health
pub async fn health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
    })
}

#[derive(Debug, Deserialize)]
pub struct CompileRequest {
    #[serde(default)]
    pub code: String,
}

#[derive(Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct CompileResponse {
    pub output: String,
    pub errors: String,
}

/// POST /compile-code
///
/// Runs the code once with stdin closed and returns everything it printed.
pub async fn compile_code(
    State(state): State<AppState>,
    Json(request): Json<CompileRequest>,
) -> ApiResult<Json<CompileResponse>> {
    if request.code.trim().is_empty() {
        return Err(ApiError::bad_request(EMPTY_CODE_MESSAGE));
    }

    let execution = launch(&state.compile, &request.code)
        .await
        .map_err(|e| ApiError::internal(e.to_string()))?;
    let report = execution.run_to_completion().await;
    debug!("compile-code finished: {:?}", report.end);

    match report.end {
        RunEnd::Exited(_) => Ok(Json(CompileResponse {
            output: report.output,
            errors: report.errors,
        })),
        RunEnd::TimedOut => Err(ApiError::RequestTimeout(TIMEOUT_MESSAGE.to_string())),
        RunEnd::Failed(reason) => Err(ApiError::Internal(reason)),
    }
}

/// POST /upload-image
pub async fn upload_image(
    State(state): State<AppState>,
    mut multipart: Multipart,
) -> ApiResult<Json<UploadOutcome>> {
    let mut images = Vec::new();

    while let Some(field) = multipart.next_field().await? {
        if field.name() != Some(IMAGES_FIELD) {
            debug!("Skipping multipart field {:?}", field.name());
            continue;
        }
        let name = match field.file_name() {
            Some(name) if !name.is_empty() => name.to_string(),
            _ => continue,
        };
        let data = field.bytes().await?;
        if data.is_empty() {
            continue;
        }
        images.push(ImageUpload { name, data });
    }

    info!("Received {} image(s) for upload", images.len());
    let outcome = state.uploads.process(images).await?;
    Ok(Json(outcome))
}
