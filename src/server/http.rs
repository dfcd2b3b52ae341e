//! HTTP handlers

use axum::{
    extract::{
        rejection::{JsonRejection, QueryRejection},
        Json, Path, Query, State,
    },
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::catalog::{CatalogDocument, ModuleFilter};
use crate::error::{CatalogError, ProgressError};
use crate::progress::ProgressEvent;
use crate::server::ServerState;
use crate::types::{LearnerId, ModuleId, ModuleStatus};

/// Error returned by a handler, rendered as `{"error", "details"}`
#[derive(Debug)]
pub enum ApiError {
    Catalog(CatalogError),
    Progress(ProgressError),
    BadRequest(String),
    /// Request body or query string the extractors could not decode
    Rejected { status: StatusCode, details: String },
    LearnerNotFound(LearnerId),
}

impl From<CatalogError> for ApiError {
    fn from(e: CatalogError) -> Self {
        ApiError::Catalog(e)
    }
}

impl From<ProgressError> for ApiError {
    fn from(e: ProgressError) -> Self {
        ApiError::Progress(e)
    }
}

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        ApiError::Rejected {
            status: rejection.status(),
            details: rejection.body_text(),
        }
    }
}

impl From<QueryRejection> for ApiError {
    fn from(rejection: QueryRejection) -> Self {
        ApiError::Rejected {
            status: rejection.status(),
            details: rejection.body_text(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, body) = match self {
            ApiError::Catalog(e) => match &e {
                CatalogError::CycleDetected { cycle } => (
                    StatusCode::CONFLICT,
                    json!({
                        "error": "CycleDetected",
                        "details": e.to_string(),
                        "cycle": cycle,
                    }),
                ),
                CatalogError::DuplicateModule(id) => (
                    StatusCode::BAD_REQUEST,
                    json!({
                        "error": "DuplicateModule",
                        "details": e.to_string(),
                        "moduleId": id,
                    }),
                ),
                CatalogError::NotFound(id) => (
                    StatusCode::NOT_FOUND,
                    json!({
                        "error": "NotFound",
                        "details": e.to_string(),
                        "moduleId": id,
                    }),
                ),
                CatalogError::Parse(_) => (
                    StatusCode::BAD_REQUEST,
                    json!({ "error": "InvalidCatalog", "details": e.to_string() }),
                ),
            },
            ApiError::Progress(e) => match &e {
                ProgressError::ModuleNotFound(id) => (
                    StatusCode::NOT_FOUND,
                    json!({
                        "error": "NotFound",
                        "details": e.to_string(),
                        "moduleId": id,
                    }),
                ),
                ProgressError::InvalidProgress { module, reason } => (
                    StatusCode::UNPROCESSABLE_ENTITY,
                    json!({
                        "error": "InvalidProgress",
                        "details": e.to_string(),
                        "moduleId": module,
                        "reason": reason,
                    }),
                ),
            },
            ApiError::BadRequest(details) => (
                StatusCode::BAD_REQUEST,
                json!({ "error": "BadRequest", "details": details }),
            ),
            ApiError::Rejected { status, details } => (
                status,
                json!({ "error": "InvalidRequest", "details": details }),
            ),
            ApiError::LearnerNotFound(id) => (
                StatusCode::NOT_FOUND,
                json!({
                    "error": "NotFound",
                    "details": format!("no progress recorded for learner {}", id),
                }),
            ),
        };
        (status, Json(body)).into_response()
    }
}

/// Query of the learner module listing
#[derive(Debug, Default, Deserialize)]
pub struct ModuleQuery {
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub difficulty: Option<String>,
    #[serde(default)]
    pub course: Option<String>,
    #[serde(default)]
    pub q: Option<String>,
}

impl ModuleQuery {
    fn filter(&self) -> ModuleFilter {
        ModuleFilter {
            q: self.q.clone(),
            difficulty: self.difficulty.clone(),
            course: self.course.clone(),
        }
    }

    fn status(&self) -> Result<Option<ModuleStatus>, ApiError> {
        match self.status.as_deref() {
            None | Some("all") => Ok(None),
            Some(s) => ModuleStatus::parse(s)
                .map(Some)
                .ok_or_else(|| ApiError::BadRequest(format!("unknown status '{}'", s))),
        }
    }
}

/// Query of the recommendation endpoint
#[derive(Debug, Default, Deserialize)]
pub struct RecommendationQuery {
    #[serde(default)]
    pub k: Option<usize>,
    #[serde(default)]
    pub preview: bool,
}

/// Status response
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusResponse {
    pub status: String,
    pub version: String,
    pub catalog_version: u64,
    pub modules: usize,
    pub learners: usize,
}

/// Service status
pub async fn status_handler(State(state): State<ServerState>) -> impl IntoResponse {
    let catalog = state.service.catalog().await;
    let response = StatusResponse {
        status: "running".to_string(),
        version: crate::VERSION.to_string(),
        catalog_version: catalog.version(),
        modules: catalog.len(),
        learners: state.service.progress().learner_count().await,
    };
    (StatusCode::OK, Json(response))
}

/// Every module with the learner's status
pub async fn learner_modules_handler(
    State(state): State<ServerState>,
    Path(learner): Path<String>,
    query: Result<Query<ModuleQuery>, QueryRejection>,
) -> Result<impl IntoResponse, ApiError> {
    let Query(query) = query?;
    let status = query.status()?;
    let view = state
        .service
        .module_view(&LearnerId::new(learner), &query.filter(), status)
        .await;
    Ok(Json(view))
}

/// Record a progress event
pub async fn progress_handler(
    State(state): State<ServerState>,
    Path(learner): Path<String>,
    event: Result<Json<ProgressEvent>, JsonRejection>,
) -> Result<impl IntoResponse, ApiError> {
    let Json(event) = event?;
    let outcome = state
        .service
        .apply_progress(&LearnerId::new(learner), event)
        .await?;
    Ok(Json(outcome))
}

/// Ranked next actions
pub async fn recommendations_handler(
    State(state): State<ServerState>,
    Path(learner): Path<String>,
    query: Result<Query<RecommendationQuery>, QueryRejection>,
) -> Result<impl IntoResponse, ApiError> {
    let Query(query) = query?;
    let set = state
        .service
        .recommend(&LearnerId::new(learner), query.k, query.preview)
        .await;
    Ok(Json(set))
}

/// Erase a learner's progress
pub async fn erase_learner_handler(
    State(state): State<ServerState>,
    Path(learner): Path<String>,
) -> Result<StatusCode, ApiError> {
    let learner = LearnerId::new(learner);
    if state.service.erase_learner(&learner).await {
        Ok(StatusCode::NO_CONTENT)
    } else {
        Err(ApiError::LearnerNotFound(learner))
    }
}

/// Summary of the active catalog
pub async fn catalog_handler(State(state): State<ServerState>) -> impl IntoResponse {
    Json(state.service.catalog_summary().await)
}

/// Replace the catalog. The body is a JSON catalog document.
pub async fn replace_catalog_handler(
    State(state): State<ServerState>,
    body: String,
) -> Result<impl IntoResponse, ApiError> {
    let document = CatalogDocument::from_json(&body)?;
    let summary = state.service.replace_catalog(document.modules).await?;
    Ok(Json(summary))
}

/// Catalog modules matching a filter
pub async fn list_modules_handler(
    State(state): State<ServerState>,
    filter: Result<Query<ModuleFilter>, QueryRejection>,
) -> Result<impl IntoResponse, ApiError> {
    let Query(filter) = filter?;
    let modules = state.service.list_modules(&filter).await;
    Ok(Json(json!({ "modules": modules })))
}

/// A single catalog module
pub async fn get_module_handler(
    State(state): State<ServerState>,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let module = state.service.get_module(&ModuleId::new(id)).await?;
    Ok(Json(module))
}
