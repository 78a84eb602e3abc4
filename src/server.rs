//! HTTP API.
//!
//! # Endpoints
//!
//! | Method | Path | Description |
//! |--------|------|-------------|
//! | `POST` | `/ask` | Answer a question over the indexed documents |
//! | `POST` | `/upload` | Add a file (multipart field `file`) |
//! | `PUT` | `/update` | Replace an existing file's content |
//! | `DELETE` | `/delete/{filename}` | Remove a file from both stores |
//! | `GET` | `/files` | Recorded filenames |
//! | `GET` | `/documents` | Full metadata records |
//! | `POST` | `/reconcile` | Re-create a missing metadata row for an indexed document |
//! | `GET` | `/task-types` | Valid `task_type` values |
//! | `GET` | `/tools/list` | Registered tools with input schemas |
//! | `POST` | `/tools/{name}` | Call a tool |
//! | `GET` | `/health` | Liveness, version and readiness |
//!
//! # Error contract
//!
//! ```json
//! { "error": { "code": "already_exists", "message": "document already exists: a.txt" }, "status": "failed" }
//! ```
//!
//! Malformed JSON or multipart bodies use the same shape with `bad_request`,
//! and bodies over `server.max_upload_bytes` answer `413 payload_too_large`.
//!
//! `persistence_failure` responses also carry the `document_id` the index
//! kept, which is what `POST /reconcile` needs.
//!
//! Until the initial bootstrap finishes, document and question endpoints
//! answer `503 not_ready`.

use axum::{
    extract::{
        multipart::{MultipartError, MultipartRejection},
        rejection::JsonRejection,
        DefaultBodyLimit, Multipart, Path, State,
    },
    http::{HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    routing::{delete, get, post, put},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tower_http::cors::{AllowOrigin, Any, CorsLayer};

use crate::app::App;
use crate::assistant::{AskError, Assistant};
use crate::config::{Config, ServerConfig};
use crate::error::SyncError;
use crate::evaluator::QualityReport;
use crate::models::DocumentRecord;
use crate::prompts::TaskType;
use crate::sync::SyncManager;
use crate::tools::{validate_params, ToolContext, ToolInfo, ToolRegistry};

const BOOTSTRAP_RETRY: Duration = Duration::from_secs(30);

/// Shared state handed to every handler.
#[derive(Clone)]
pub struct AppState {
    pub sync: Arc<SyncManager>,
    pub assistant: Arc<Assistant>,
    pub tools: Arc<ToolRegistry>,
    pub tool_context: Arc<ToolContext>,
    pub max_upload_bytes: usize,
}

impl AppState {
    pub fn new(sync: Arc<SyncManager>, assistant: Arc<Assistant>, tools: Arc<ToolRegistry>) -> Self {
        let tool_context = Arc::new(ToolContext::new(sync.files().clone()));
        Self {
            sync,
            assistant,
            tools,
            tool_context,
            max_upload_bytes: ServerConfig::default().max_upload_bytes,
        }
    }

    pub fn with_max_upload_bytes(mut self, max_upload_bytes: usize) -> Self {
        self.max_upload_bytes = max_upload_bytes;
        self
    }
}

impl From<&App> for AppState {
    fn from(app: &App) -> Self {
        Self {
            sync: app.sync.clone(),
            assistant: app.assistant.clone(),
            tools: app.tools.clone(),
            tool_context: app.tool_context.clone(),
            max_upload_bytes: ServerConfig::default().max_upload_bytes,
        }
    }
}

/// Builds the router. An empty `cors_origins` allows any origin.
pub fn router(state: AppState, cors_origins: &[String]) -> Router {
    let body_limit = DefaultBodyLimit::max(state.max_upload_bytes);
    let origins: Vec<HeaderValue> = cors_origins
        .iter()
        .filter_map(|o| HeaderValue::from_str(o).ok())
        .collect();
    let allow_origin = if origins.is_empty() {
        AllowOrigin::from(Any)
    } else {
        AllowOrigin::list(origins)
    };
    let cors = CorsLayer::new()
        .allow_origin(allow_origin)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/ask", post(handle_ask))
        .route("/upload", post(handle_upload))
        .route("/update", put(handle_update))
        .route("/delete/{filename}", delete(handle_delete))
        .route("/files", get(handle_files))
        .route("/documents", get(handle_documents))
        .route("/reconcile", post(handle_reconcile))
        .route("/task-types", get(handle_task_types))
        .route("/tools/list", get(handle_list_tools))
        .route("/tools/{name}", post(handle_tool_call))
        .route("/health", get(handle_health))
        .layer(body_limit)
        .layer(cors)
        .with_state(state)
}

/// Opens the stores, starts bootstrap in the background and serves until
/// the process is stopped.
pub async fn run_server(config: &Config) -> anyhow::Result<()> {
    let app = App::open(config).await?;
    let state = AppState::from(&app).with_max_upload_bytes(config.server.max_upload_bytes);

    spawn_bootstrap(state.sync.clone());

    let listener = tokio::net::TcpListener::bind(&config.server.bind).await?;
    tracing::info!(bind = %config.server.bind, "listening");
    println!("docsync listening on http://{}", config.server.bind);

    axum::serve(listener, router(state, &config.server.cors_origins)).await?;
    app.close().await;
    Ok(())
}

/// Runs bootstrap until it succeeds. Requests see `503` meanwhile.
pub fn spawn_bootstrap(sync: Arc<SyncManager>) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            match sync.load_or_create_index().await {
                Ok(report) => {
                    tracing::info!(
                        attached = report.attached,
                        indexed = report.indexed,
                        reindexed = report.reindexed,
                        failed = report.failed,
                        documents = report.document_count,
                        "index ready"
                    );
                    return;
                }
                Err(SyncError::NotReady) => return,
                Err(e) => {
                    tracing::error!(error = %e, retry_in_secs = BOOTSTRAP_RETRY.as_secs(), "bootstrap failed");
                    tokio::time::sleep(BOOTSTRAP_RETRY).await;
                }
            }
        }
    })
}

// ============ Error response ============

#[derive(Serialize)]
struct ErrorBody {
    error: ErrorDetail,
    status: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    document_id: Option<String>,
}

#[derive(Serialize)]
struct ErrorDetail {
    code: String,
    message: String,
}

struct AppError {
    status: StatusCode,
    code: String,
    message: String,
    document_id: Option<String>,
}

impl AppError {
    fn new(status: StatusCode, code: &str, message: impl Into<String>) -> Self {
        Self {
            status,
            code: code.to_string(),
            message: message.into(),
            document_id: None,
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let body = ErrorBody {
            error: ErrorDetail {
                code: self.code,
                message: self.message,
            },
            status: "failed",
            document_id: self.document_id,
        };
        (self.status, Json(body)).into_response()
    }
}

fn bad_request(message: impl Into<String>) -> AppError {
    AppError::new(StatusCode::BAD_REQUEST, "bad_request", message)
}

fn not_found(message: impl Into<String>) -> AppError {
    AppError::new(StatusCode::NOT_FOUND, "not_found", message)
}

fn not_ready() -> AppError {
    AppError::from(SyncError::NotReady)
}

/// Extractor failures keep their status; only the body is reshaped.
fn rejected(status: StatusCode, message: String) -> AppError {
    let code = match status {
        StatusCode::PAYLOAD_TOO_LARGE => "payload_too_large",
        StatusCode::UNSUPPORTED_MEDIA_TYPE => "unsupported_media_type",
        _ => "bad_request",
    };
    AppError::new(status, code, message)
}

impl From<JsonRejection> for AppError {
    fn from(rejection: JsonRejection) -> Self {
        rejected(rejection.status(), rejection.body_text())
    }
}

impl From<MultipartRejection> for AppError {
    fn from(rejection: MultipartRejection) -> Self {
        rejected(rejection.status(), rejection.body_text())
    }
}

impl From<MultipartError> for AppError {
    fn from(err: MultipartError) -> Self {
        rejected(err.status(), err.body_text())
    }
}

impl From<SyncError> for AppError {
    fn from(err: SyncError) -> Self {
        let status = match &err {
            SyncError::AlreadyExists { .. } => StatusCode::CONFLICT,
            SyncError::NotFound { .. } => StatusCode::NOT_FOUND,
            SyncError::InvalidFilename(_) | SyncError::InvalidContent { .. } => {
                StatusCode::BAD_REQUEST
            }
            SyncError::NotReady | SyncError::MetadataUnavailable { .. } => {
                StatusCode::SERVICE_UNAVAILABLE
            }
            SyncError::IndexingFailure { .. } | SyncError::IndexDeletionFailure { .. } => {
                StatusCode::BAD_GATEWAY
            }
            SyncError::PersistenceFailure { .. }
            | SyncError::StorageFailure { .. }
            | SyncError::BootstrapFailure { .. } => StatusCode::INTERNAL_SERVER_ERROR,
        };
        Self {
            status,
            code: err.code().to_string(),
            message: err.to_string(),
            document_id: err.document_id().map(str::to_string),
        }
    }
}

impl From<AskError> for AppError {
    fn from(err: AskError) -> Self {
        match &err {
            AskError::EmptyMessage => bad_request(err.to_string()),
            AskError::Retrieval(_) => {
                AppError::new(StatusCode::BAD_GATEWAY, "retrieval_failure", err.to_string())
            }
            AskError::Completion(_) => {
                AppError::new(StatusCode::BAD_GATEWAY, "completion_failure", err.to_string())
            }
        }
    }
}

/// Maps tool errors to client or server errors by their message.
fn classify_tool_error(tool_name: &str, err: anyhow::Error) -> AppError {
    let msg = format!("{:#}", err);
    if msg.contains("not found") {
        not_found(format!("{}: {}", tool_name, msg))
    } else if msg.contains("invalid") || msg.contains("must not be empty") {
        bad_request(format!("{}: {}", tool_name, msg))
    } else {
        AppError::new(
            StatusCode::INTERNAL_SERVER_ERROR,
            "tool_error",
            format!("{}: {}", tool_name, msg),
        )
    }
}

// ============ POST /ask ============

#[derive(Deserialize)]
struct AskRequest {
    message: String,
    #[serde(default)]
    task_type: Option<String>,
    #[serde(default)]
    evaluate_context: bool,
}

#[derive(Serialize)]
struct AskResponse {
    response: String,
    task_type: TaskType,
    #[serde(skip_serializing_if = "Option::is_none")]
    evaluation: Option<QualityReport>,
    status: &'static str,
}

async fn handle_ask(
    State(state): State<AppState>,
    body: Result<Json<AskRequest>, JsonRejection>,
) -> Result<Json<AskResponse>, AppError> {
    let Json(req) = body?;
    let task_type = match req.task_type.as_deref() {
        None | Some("") => TaskType::Default,
        Some(name) => name.parse::<TaskType>().map_err(|e| {
            AppError::new(StatusCode::BAD_REQUEST, "invalid_task_type", e.to_string())
        })?,
    };
    if !state.sync.is_ready() {
        return Err(not_ready());
    }

    let answer = state
        .assistant
        .ask(&req.message, task_type, req.evaluate_context)
        .await?;

    Ok(Json(AskResponse {
        response: answer.response,
        task_type: answer.task_type,
        evaluation: answer.evaluation,
        status: "success",
    }))
}

// ============ Documents ============

#[derive(Serialize)]
struct DocumentResponse {
    filename: String,
    document_id: String,
    status: &'static str,
}

impl From<DocumentRecord> for DocumentResponse {
    fn from(record: DocumentRecord) -> Self {
        Self {
            filename: record.filename,
            document_id: record.document_id,
            status: "success",
        }
    }
}

/// Pulls the `file` field out of a multipart body.
async fn read_upload(
    multipart: Result<Multipart, MultipartRejection>,
) -> Result<(String, Vec<u8>), AppError> {
    let mut multipart = multipart?;
    while let Some(field) = multipart.next_field().await? {
        if field.name() != Some("file") {
            continue;
        }
        let filename = field
            .file_name()
            .map(str::to_string)
            .ok_or_else(|| bad_request("multipart field 'file' has no filename"))?;
        let bytes = field.bytes().await?;
        return Ok((filename, bytes.to_vec()));
    }
    Err(bad_request("multipart field 'file' is required"))
}

async fn handle_upload(
    State(state): State<AppState>,
    multipart: Result<Multipart, MultipartRejection>,
) -> Result<Json<DocumentResponse>, AppError> {
    let (filename, bytes) = read_upload(multipart).await?;
    let record = state.sync.add_document(&filename, &bytes).await?;
    Ok(Json(record.into()))
}

async fn handle_update(
    State(state): State<AppState>,
    multipart: Result<Multipart, MultipartRejection>,
) -> Result<Json<DocumentResponse>, AppError> {
    let (filename, bytes) = read_upload(multipart).await?;
    let record = state.sync.update_document(&filename, &bytes).await?;
    Ok(Json(record.into()))
}

async fn handle_delete(
    State(state): State<AppState>,
    Path(filename): Path<String>,
) -> Result<Json<DocumentResponse>, AppError> {
    let record = state.sync.delete_document(&filename).await?;
    Ok(Json(record.into()))
}

#[derive(Serialize)]
struct FilesResponse {
    files: Vec<String>,
}

async fn handle_files(State(state): State<AppState>) -> Result<Json<FilesResponse>, AppError> {
    Ok(Json(FilesResponse {
        files: state.sync.list_filenames().await?,
    }))
}

#[derive(Serialize)]
struct DocumentsResponse {
    documents: Vec<DocumentRecord>,
}

async fn handle_documents(
    State(state): State<AppState>,
) -> Result<Json<DocumentsResponse>, AppError> {
    Ok(Json(DocumentsResponse {
        documents: state.sync.list_documents().await?,
    }))
}

#[derive(Deserialize)]
struct ReconcileRequest {
    filename: String,
    document_id: String,
}

async fn handle_reconcile(
    State(state): State<AppState>,
    body: Result<Json<ReconcileRequest>, JsonRejection>,
) -> Result<Json<DocumentResponse>, AppError> {
    let Json(req) = body?;
    let record = state.sync.reconcile(&req.filename, &req.document_id).await?;
    Ok(Json(record.into()))
}

// ============ GET /task-types ============

#[derive(Serialize)]
struct TaskTypesResponse {
    task_types: Vec<&'static str>,
    default: &'static str,
}

async fn handle_task_types() -> Json<TaskTypesResponse> {
    Json(TaskTypesResponse {
        task_types: TaskType::ALL.iter().map(|t| t.as_str()).collect(),
        default: TaskType::default().as_str(),
    })
}

// ============ Tools ============

#[derive(Serialize)]
struct ToolListResponse {
    tools: Vec<ToolInfo>,
}

async fn handle_list_tools(State(state): State<AppState>) -> Json<ToolListResponse> {
    Json(ToolListResponse {
        tools: state.tools.list(),
    })
}

async fn handle_tool_call(
    State(state): State<AppState>,
    Path(name): Path<String>,
    body: Result<Json<serde_json::Value>, JsonRejection>,
) -> Result<Json<serde_json::Value>, AppError> {
    let Json(params) = body?;
    let tool = state
        .tools
        .find(&name)
        .ok_or_else(|| not_found(format!("no tool registered with name: {}", name)))?;

    let params = validate_params(&tool.parameters_schema(), &params)
        .map_err(|e| bad_request(e.to_string()))?;

    let result = tool
        .execute(params, &state.tool_context)
        .await
        .map_err(|e| classify_tool_error(&name, e))?;

    Ok(Json(serde_json::json!({ "result": result })))
}

// ============ GET /health ============

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    version: &'static str,
    ready: bool,
}

async fn handle_health(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
        ready: state.sync.is_ready(),
    })
}
