use crate::AppState;
use crate::api::error::AppError;
use crate::services::pipeline::{BatchResult, ConversionOutcome, FileOutcome};
use crate::utils::auth::Claims;
use axum::{
    Extension, Json,
    extract::{Multipart, State},
    http::StatusCode,
    response::{IntoResponse, Redirect, Response},
};
use futures::TryStreamExt;
use serde::Serialize;
use tokio_util::io::StreamReader;
use utoipa::ToSchema;

pub const SIGNIN_PATH: &str = "/signin";
pub const UPLOAD_PATH: &str = "/projects/upload";

/// Per-file result of an upload.
#[derive(Debug, Serialize, ToSchema)]
pub struct FileOutcomeResponse {
    /// Declared file name
    pub name: String,
    /// converted, already_published, no_raster_found, unsupported_input or failed
    pub status: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub artifact_key: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl From<&FileOutcome> for FileOutcomeResponse {
    fn from(outcome: &FileOutcome) -> Self {
        match outcome {
            FileOutcome::Success { name, outcome } => {
                let status = match outcome {
                    ConversionOutcome::Converted { .. } => "converted",
                    ConversionOutcome::AlreadyPublished { .. } => "already_published",
                    ConversionOutcome::NoRasterFound => "no_raster_found",
                    ConversionOutcome::UnsupportedInput => "unsupported_input",
                };
                Self {
                    name: name.clone(),
                    status: status.to_string(),
                    artifact_key: outcome.artifact_key().map(str::to_string),
                    error: None,
                }
            }
            FileOutcome::Failure { name, error } => Self {
                name: name.clone(),
                status: "failed".to_string(),
                artifact_key: None,
                error: Some(error.to_string()),
            },
        }
    }
}

#[derive(Debug, Serialize, ToSchema)]
pub struct ProjectResponse {
    pub name: String,
    /// Artifact key; blobs are `<url>.dat`, `<url>.json`, `<url>.png`
    pub url: String,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct AddProjectResponse {
    pub upload_url: String,
    pub method: String,
    pub accepted_extensions: Vec<String>,
    pub max_file_size: usize,
}

fn batch_response(batch: &BatchResult) -> Response {
    let body: Vec<FileOutcomeResponse> = batch.outcomes.iter().map(Into::into).collect();
    let status = if batch.has_service_failure() {
        StatusCode::SERVICE_UNAVAILABLE
    } else {
        StatusCode::OK
    };
    (status, Json(body)).into_response()
}

#[utoipa::path(
    post,
    path = "/projects/upload",
    request_body(content = Multipart, description = "One or more zip archives or GeoTIFF files"),
    responses(
        (status = 200, description = "Per-file outcomes", body = [FileOutcomeResponse]),
        (status = 400, description = "No file provided"),
        (status = 401, description = "Unauthorized"),
        (status = 503, description = "Storage unavailable, per-file outcomes in body", body = [FileOutcomeResponse])
    ),
    security(
        ("jwt" = [])
    ),
    tag = "projects"
)]
pub async fn upload_project_files(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    mut multipart: Multipart,
) -> Result<Response, AppError> {
    let pipeline = state.pipeline.clone();
    let mut staged = Vec::new();
    let mut file_parts = 0usize;

    while let Some(field) = multipart.next_field().await.map_err(|e| {
        let err_msg = e.to_string();
        if err_msg.contains("length limit exceeded") {
            AppError::PayloadTooLarge("Request body exceeds the maximum allowed limit".to_string())
        } else {
            AppError::BadRequest(err_msg)
        }
    })? {
        // Parts without a file name are form values, not files
        let Some(file_name) = field.file_name().map(|s| s.to_string()) else {
            continue;
        };
        file_parts += 1;

        let body_with_io_error = field.map_err(std::io::Error::other);
        let reader = StreamReader::new(body_with_io_error);

        match pipeline.receiver().stage(&file_name, reader).await {
            Ok(Some(upload)) => staged.push(Ok(upload)),
            Ok(None) => {}
            Err(e) => staged.push(Err(pipeline.failure(&file_name, e))),
        }
    }

    if file_parts == 0 {
        return Err(AppError::BadRequest("No file provided".to_string()));
    }

    let batch = pipeline.process_batch(claims.owner_id(), staged).await;
    Ok(batch_response(&batch))
}

#[utoipa::path(
    get,
    path = "/projects",
    responses(
        (status = 200, description = "Projects of the signed-in owner", body = [ProjectResponse]),
        (status = 401, description = "Unauthorized"),
        (status = 503, description = "Catalog unavailable")
    ),
    security(
        ("jwt" = [])
    ),
    tag = "projects"
)]
pub async fn list_projects(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
) -> Result<Json<Vec<ProjectResponse>>, AppError> {
    let entries = state
        .catalog
        .list(claims.owner_id())
        .await
        .map_err(|e| AppError::ServiceUnavailable(format!("Catalog unavailable: {}", e)))?;

    Ok(Json(
        entries
            .into_iter()
            .map(|entry| ProjectResponse {
                name: entry.display_name,
                url: entry.artifact_key,
            })
            .collect(),
    ))
}

#[utoipa::path(
    get,
    path = "/projects/add",
    responses(
        (status = 200, description = "Where and how to upload", body = AddProjectResponse),
        (status = 303, description = "Not signed in, redirect to sign-in")
    ),
    tag = "projects"
)]
pub async fn add_project(
    State(state): State<AppState>,
    claims: Option<Extension<Claims>>,
) -> Response {
    if claims.is_none() {
        return Redirect::to(SIGNIN_PATH).into_response();
    }

    let config = state.pipeline.config();
    let mut accepted_extensions = vec![crate::utils::validation::ARCHIVE_EXTENSION.to_string()];
    if config.non_archive_policy == crate::config::NonArchivePolicy::DirectRaster {
        accepted_extensions.extend(config.raster_extensions.iter().cloned());
    }

    Json(AddProjectResponse {
        upload_url: UPLOAD_PATH.to_string(),
        method: "POST".to_string(),
        accepted_extensions,
        max_file_size: config.max_file_size,
    })
    .into_response()
}
