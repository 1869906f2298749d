use axum::{
    extract::{multipart::MultipartError, DefaultBodyLimit, Multipart, Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use axum_tracing_opentelemetry::middleware::OtelAxumLayer;
use chrono::{DateTime, Utc};
use docket_core::{
    entities::DOCKET_VERSION, DocumentType, ExtractionMode, JobError, JobId, JobManager, JobPage,
    JobSnapshot, JobState, JobStats, ProcessOptions, SUPPORTED_EXTENSIONS,
};
use serde::{Deserialize, Serialize};
use tower_http::trace::TraceLayer;

/// Room left for multipart boundaries and the small option fields.
const MULTIPART_OVERHEAD: usize = 64 * 1024;
const DEFAULT_PAGE_SIZE: usize = 20;

#[derive(Debug, Serialize, Deserialize)]
pub struct ApiResponse<T> {
    pub success: bool,
    pub data: Option<T>,
    pub error: Option<String>,
}

type ApiError = (StatusCode, Json<ApiResponse<()>>);

fn error_response(status: StatusCode, error: impl Into<String>) -> ApiError {
    (
        status,
        Json(ApiResponse {
            success: false,
            data: None,
            error: Some(error.into()),
        }),
    )
}

fn job_error(e: JobError) -> ApiError {
    let status = match &e {
        JobError::UnsupportedFormat(_) | JobError::EmptyContent | JobError::InvalidPage { .. } => {
            StatusCode::BAD_REQUEST
        }
        JobError::FileTooLarge { .. } => StatusCode::PAYLOAD_TOO_LARGE,
        JobError::NotFound(_) => StatusCode::NOT_FOUND,
        JobError::Closed => StatusCode::INTERNAL_SERVER_ERROR,
    };
    error_response(status, e.to_string())
}

fn multipart_error(e: MultipartError) -> ApiError {
    error_response(e.status(), format!("Failed to read upload: {}", e.body_text()))
}

fn ok<T: Serialize>(data: T) -> Json<ApiResponse<T>> {
    Json(ApiResponse {
        success: true,
        data: Some(data),
        error: None,
    })
}

#[derive(Clone)]
pub struct AppState {
    pub manager: JobManager,
}

pub fn create_router(state: AppState) -> Router {
    let body_limit = usize::try_from(state.manager.config().max_file_size)
        .unwrap_or(usize::MAX)
        .saturating_add(MULTIPART_OVERHEAD);

    Router::new()
        .route("/", get(service_info))
        .route("/api/v1/health", get(health_check))
        .route("/api/v1/documents/upload", post(upload_document))
        .route("/api/v1/documents/tasks", get(list_tasks))
        .route("/api/v1/documents/tasks/:task_id", get(get_task))
        .with_state(state)
        .layer(TraceLayer::new_for_http())
        .layer(OtelAxumLayer::default())
        .layer(DefaultBodyLimit::max(body_limit))
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ServiceInfo {
    pub name: String,
    pub version: String,
    pub endpoints: Vec<String>,
}

#[tracing::instrument(skip_all)]
async fn service_info() -> impl IntoResponse {
    ok(ServiceInfo {
        name: "docket".to_owned(),
        version: DOCKET_VERSION.to_owned(),
        endpoints: [
            "POST /api/v1/documents/upload",
            "GET /api/v1/documents/tasks/{task_id}",
            "GET /api/v1/documents/tasks",
            "GET /api/v1/health",
        ]
        .map(String::from)
        .to_vec(),
    })
}

#[derive(Debug, Serialize, Deserialize)]
pub struct HealthStatus {
    pub status: String,
    pub timestamp: DateTime<Utc>,
    pub version: String,
    pub supported_formats: Vec<String>,
    pub jobs: JobStats,
}

#[tracing::instrument(skip_all)]
async fn health_check(State(state): State<AppState>) -> impl IntoResponse {
    ok(HealthStatus {
        status: "healthy".to_owned(),
        timestamp: Utc::now(),
        version: DOCKET_VERSION.to_owned(),
        supported_formats: SUPPORTED_EXTENSIONS
            .iter()
            .map(|ext| format!(".{ext}"))
            .collect(),
        jobs: state.manager.stats(),
    })
}

#[derive(Debug, Serialize, Deserialize)]
pub struct UploadResponse {
    pub task_id: JobId,
    pub filename: String,
    pub file_size: u64,
    pub document_type: DocumentType,
    pub status: JobState,
    pub upload_time: DateTime<Utc>,
}

fn parse_flag(name: &str, value: &str) -> Result<bool, ApiError> {
    match value.trim().to_ascii_lowercase().as_str() {
        "true" | "1" | "yes" => Ok(true),
        "false" | "0" | "no" => Ok(false),
        other => Err(error_response(
            StatusCode::BAD_REQUEST,
            format!("Invalid value {other:?} for {name}: expected true or false"),
        )),
    }
}

#[tracing::instrument(skip_all)]
async fn upload_document(
    State(state): State<AppState>,
    mut multipart: Multipart,
) -> Result<impl IntoResponse, ApiError> {
    let mut upload = None;
    let mut options = ProcessOptions::default();

    while let Some(field) = multipart.next_field().await.map_err(multipart_error)? {
        let name = field.name().unwrap_or("").to_string();

        match name.as_str() {
            "file" => {
                let filename = field
                    .file_name()
                    .map(str::to_owned)
                    .filter(|f| !f.is_empty())
                    .ok_or_else(|| {
                        error_response(StatusCode::BAD_REQUEST, "Uploaded file has no filename")
                    })?;
                let data = field.bytes().await.map_err(multipart_error)?;
                upload = Some((filename, data));
            }
            "extraction_mode" => {
                let value = field.text().await.map_err(multipart_error)?;
                options.extraction_mode = value
                    .parse::<ExtractionMode>()
                    .map_err(|e| error_response(StatusCode::BAD_REQUEST, e.to_string()))?;
            }
            "extract_images" => {
                options.extract_images =
                    parse_flag(&name, &field.text().await.map_err(multipart_error)?)?;
            }
            "extract_tables" => {
                options.extract_tables =
                    parse_flag(&name, &field.text().await.map_err(multipart_error)?)?;
            }
            "preserve_layout" => {
                options.preserve_layout =
                    parse_flag(&name, &field.text().await.map_err(multipart_error)?)?;
            }
            "ocr_language" => {
                options.ocr_language = field.text().await.map_err(multipart_error)?;
            }
            _ => continue,
        }
    }

    let (filename, data) =
        upload.ok_or_else(|| error_response(StatusCode::BAD_REQUEST, "No file provided"))?;
    let task_id = state
        .manager
        .submit(data.to_vec(), &filename, options)
        .map_err(job_error)?;
    let snapshot = state.manager.get_status(task_id).map_err(job_error)?;

    Ok((
        StatusCode::CREATED,
        ok(UploadResponse {
            task_id,
            filename: snapshot.filename,
            file_size: snapshot.file_size,
            document_type: snapshot.document_type,
            status: snapshot.state,
            upload_time: snapshot.submitted_at,
        }),
    ))
}

#[tracing::instrument(skip(state))]
async fn get_task(
    State(state): State<AppState>,
    Path(task_id): Path<String>,
) -> Result<Json<ApiResponse<JobSnapshot>>, ApiError> {
    let task_id = task_id.parse::<JobId>().map_err(|e| {
        error_response(
            StatusCode::BAD_REQUEST,
            format!("Invalid task id {task_id:?}: {e}"),
        )
    })?;
    let snapshot = state.manager.get_status(task_id).map_err(job_error)?;
    Ok(ok(snapshot))
}

#[derive(Debug, Deserialize)]
pub struct ListParams {
    pub page: Option<usize>,
    pub page_size: Option<usize>,
}

#[tracing::instrument(skip(state))]
async fn list_tasks(
    State(state): State<AppState>,
    Query(params): Query<ListParams>,
) -> Result<Json<ApiResponse<JobPage>>, ApiError> {
    let page = state
        .manager
        .list_page(
            params.page.unwrap_or(1),
            params.page_size.unwrap_or(DEFAULT_PAGE_SIZE),
        )
        .map_err(job_error)?;
    Ok(ok(page))
}
