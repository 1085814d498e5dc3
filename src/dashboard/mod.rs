//! JSON API over the board service, used by the kanban front end and the
//! approval workflow.

use std::net::SocketAddr;
use std::sync::Arc;

use axum::{
    body::Bytes,
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use chrono::{Local, NaiveDate};
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use tower_http::cors::{Any, CorsLayer};

use crate::error::BoardError;
use crate::scheduler::{DeviceId, Job, JobId, LaneDay, Phase, SpreadingMethod};
use crate::service::{BoardService, MoveRequest, StatusUpdate};
use crate::store::MemoryStore;

pub type SharedService = Arc<BoardService<MemoryStore>>;

#[derive(Clone)]
pub struct DashboardState {
    pub service: SharedService,
}

#[derive(Serialize)]
struct ErrorResponse {
    error: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    live_status: Option<Phase>,
    #[serde(skip_serializing_if = "Option::is_none")]
    live_device: Option<DeviceId>,
}

impl IntoResponse for BoardError {
    fn into_response(self) -> Response {
        let status = match &self {
            BoardError::Validation(_) => StatusCode::BAD_REQUEST,
            BoardError::NotFound(_) => StatusCode::NOT_FOUND,
            BoardError::NoActivePhase(_)
            | BoardError::Conflict { .. }
            | BoardError::AssignmentConflict { .. }
            | BoardError::DeviceBusy { .. } => StatusCode::CONFLICT,
            BoardError::IncompatibleDevice { .. } => StatusCode::UNPROCESSABLE_ENTITY,
            BoardError::TransientStore(_) => StatusCode::SERVICE_UNAVAILABLE,
            BoardError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };
        let (live_status, live_device) = match &self {
            BoardError::Conflict {
                live, live_device, ..
            } => (Some(*live), live_device.clone()),
            _ => (None, None),
        };
        if status.is_server_error() {
            tracing::error!(error = %self, "Request failed");
        }
        (
            status,
            Json(ErrorResponse {
                error: self.to_string(),
                live_status,
                live_device,
            }),
        )
            .into_response()
    }
}

#[derive(Deserialize)]
struct BoardQuery {
    day: Option<LaneDay>,
}

#[derive(Deserialize)]
struct RegisterJobRequest {
    id: JobId,
    reference: String,
    spreading_method: SpreadingMethod,
}

#[derive(Deserialize)]
struct ApproveRequest {
    job_ids: Vec<JobId>,
    #[serde(default)]
    operator: Option<String>,
}

#[derive(Deserialize)]
struct MoveBody {
    target_device: DeviceId,
    lane_day: LaneDay,
    #[serde(default)]
    lane_shift: Option<String>,
    #[serde(default)]
    position: Option<u32>,
    #[serde(default)]
    operator: Option<String>,
}

#[derive(Deserialize)]
struct StatusBody {
    new_phase: Phase,
    #[serde(default)]
    operator: Option<String>,
    #[serde(default)]
    device: Option<DeviceId>,
    #[serde(default)]
    expected_current_phase: Option<Phase>,
}

#[derive(Deserialize)]
struct WidthChangeBody {
    #[serde(default)]
    requested_by: Option<String>,
}

#[derive(Deserialize, Default)]
struct RolloverBody {
    /// Defaults to the server's local date.
    #[serde(default)]
    today: Option<NaiveDate>,
}

pub fn router(state: DashboardState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/api/board", get(board_handler))
        .route("/api/jobs", post(register_job_handler))
        .route("/api/jobs/approve", post(approve_handler))
        .route("/api/jobs/{id}", get(job_status_handler))
        .route("/api/jobs/{id}/move", post(move_handler))
        .route("/api/jobs/{id}/status", post(update_status_handler))
        .route("/api/jobs/{id}/width-change", post(width_change_handler))
        .route(
            "/api/jobs/{id}/width-change/resolve",
            post(resolve_width_change_handler),
        )
        .route("/api/maintenance/rollover", post(rollover_handler))
        .route("/api/maintenance/cleanup", post(cleanup_handler))
        .layer(cors)
        .with_state(state)
}

pub async fn run_dashboard(
    addr: SocketAddr,
    state: DashboardState,
    shutdown: CancellationToken,
) -> std::io::Result<()> {
    let app = router(state);
    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::info!(addr = %addr, "Board API listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(async move { shutdown.cancelled().await })
        .await
}

async fn board_handler(
    State(state): State<DashboardState>,
    Query(query): Query<BoardQuery>,
) -> impl IntoResponse {
    Json(state.service.get_board(query.day).await)
}

async fn register_job_handler(
    State(state): State<DashboardState>,
    Json(payload): Json<RegisterJobRequest>,
) -> Result<impl IntoResponse, BoardError> {
    let job = Job::new(payload.id, payload.reference, payload.spreading_method);
    state.service.register_job(job).await?;
    let view = state.service.job_status(payload.id).await?;
    Ok((StatusCode::CREATED, Json(view)))
}

async fn approve_handler(
    State(state): State<DashboardState>,
    Json(payload): Json<ApproveRequest>,
) -> Result<impl IntoResponse, BoardError> {
    let outcome = state
        .service
        .approve(&payload.job_ids, payload.operator.as_deref())
        .await?;
    Ok(Json(outcome))
}

async fn job_status_handler(
    State(state): State<DashboardState>,
    Path(job_id): Path<JobId>,
) -> Result<impl IntoResponse, BoardError> {
    Ok(Json(state.service.job_status(job_id).await?))
}

async fn move_handler(
    State(state): State<DashboardState>,
    Path(job_id): Path<JobId>,
    Json(body): Json<MoveBody>,
) -> Result<impl IntoResponse, BoardError> {
    let request = MoveRequest {
        job_id,
        target_device: body.target_device,
        lane_day: body.lane_day,
        lane_shift: body.lane_shift,
        position: body.position,
        operator: body.operator,
    };
    state.service.move_job(&request).await?;
    Ok(Json(state.service.job_status(job_id).await?))
}

async fn update_status_handler(
    State(state): State<DashboardState>,
    Path(job_id): Path<JobId>,
    Json(body): Json<StatusBody>,
) -> Result<impl IntoResponse, BoardError> {
    let update = StatusUpdate {
        job_id,
        new_phase: body.new_phase,
        operator: body.operator,
        device: body.device,
        expected_current_phase: body.expected_current_phase,
    };
    Ok(Json(state.service.update_status(&update).await?))
}

async fn width_change_handler(
    State(state): State<DashboardState>,
    Path(job_id): Path<JobId>,
    Json(body): Json<WidthChangeBody>,
) -> Result<impl IntoResponse, BoardError> {
    let outcome = state
        .service
        .request_width_change(job_id, body.requested_by.as_deref())
        .await?;
    Ok(Json(outcome))
}

async fn resolve_width_change_handler(
    State(state): State<DashboardState>,
    Path(job_id): Path<JobId>,
) -> Result<impl IntoResponse, BoardError> {
    state.service.resolve_width_change(job_id).await?;
    Ok(Json(state.service.job_status(job_id).await?))
}

async fn rollover_handler(
    State(state): State<DashboardState>,
    body: Bytes,
) -> Result<impl IntoResponse, BoardError> {
    let body: RolloverBody = if body.is_empty() {
        RolloverBody::default()
    } else {
        serde_json::from_slice(&body)
            .map_err(|e| BoardError::Validation(format!("invalid rollover request: {}", e)))?
    };
    let today = body.today.unwrap_or_else(|| Local::now().date_naive());
    Ok(Json(state.service.day_rollover_check(today).await?))
}

async fn cleanup_handler(State(state): State<DashboardState>) -> Result<impl IntoResponse, BoardError> {
    Ok(Json(state.service.cleanup().await?))
}
