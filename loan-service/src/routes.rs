use axum::{
    Router,
    extract::{Path, State},
    http::StatusCode,
    response::Json,
    routing::{get, post},
};
use loan_flow::{FlowError, FlowRunner, ScreenView, Session, StepStatus, UserAction, render};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::{error, info, warn};
use uuid::Uuid;

type ApiError = (StatusCode, Json<Value>);
type ApiResult<T> = Result<Json<T>, ApiError>;

#[derive(Clone)]
pub struct AppState {
    pub runner: FlowRunner,
}

#[derive(Debug, Deserialize)]
pub struct ExecuteRequest {
    pub session_id: String,
    pub action: UserAction,
}

#[derive(Debug, Serialize)]
pub struct SessionResponse {
    pub session_id: String,
    pub status: StepStatus,
    pub session: Session,
    pub view: ScreenView,
}

fn flow_error(err: FlowError) -> ApiError {
    let status = match &err {
        FlowError::SessionNotFound(_) => StatusCode::NOT_FOUND,
        FlowError::UnknownLanguage(_) => StatusCode::BAD_REQUEST,
        FlowError::DecisionInFlight(_) | FlowError::NoPendingDecision(_) => StatusCode::CONFLICT,
        FlowError::Translation(_)
        | FlowError::Identity(_)
        | FlowError::StorageError(_)
        | FlowError::InvalidPolicy(_) => StatusCode::INTERNAL_SERVER_ERROR,
    };

    if status.is_server_error() {
        error!(error = %err, "Request failed");
    } else {
        warn!(error = %err, "Request rejected");
    }

    (status, Json(json!({ "error": err.to_string() })))
}

fn validate_session_id(session_id: &str) -> Result<(), ApiError> {
    if Uuid::parse_str(session_id).is_err() {
        warn!(session_id = %session_id, "Invalid session ID format");
        return Err((
            StatusCode::BAD_REQUEST,
            Json(json!({ "error": "session_id must be a UUID", "session_id": session_id })),
        ));
    }
    Ok(())
}

fn respond(state: &AppState, session: Session, status: StepStatus) -> SessionResponse {
    let view = render(&session, state.runner.controller().translations());
    SessionResponse {
        session_id: session.id.clone(),
        status,
        session,
        view,
    }
}

pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health_check))
        .route("/session", post(open_session))
        .route("/session/{id}", get(get_session))
        .route("/execute", post(execute))
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn health_check() -> &'static str {
    "OK"
}

async fn open_session(State(state): State<AppState>) -> ApiResult<SessionResponse> {
    let result = state.runner.open(None).await.map_err(flow_error)?;

    info!(
        session_id = %result.session.id,
        user_id = ?result.session.user_id,
        profile_saved = result.session.profile_saved,
        "Session opened"
    );

    Ok(Json(respond(&state, result.session, result.status)))
}

async fn execute(
    State(state): State<AppState>,
    Json(request): Json<ExecuteRequest>,
) -> ApiResult<SessionResponse> {
    info!(
        session_id = %request.session_id,
        action = request.action.name(),
        "Processing execute request"
    );

    validate_session_id(&request.session_id)?;

    let result = state
        .runner
        .submit(&request.session_id, &request.action)
        .await
        .map_err(flow_error)?;

    info!(
        session_id = %request.session_id,
        status = ?result.status,
        screen = %result.session.screen,
        "Request completed successfully"
    );

    Ok(Json(respond(&state, result.session, result.status)))
}

async fn get_session(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
) -> ApiResult<SessionResponse> {
    validate_session_id(&session_id)?;

    let session = state.runner.load(&session_id).await.map_err(flow_error)?;
    let status = StepStatus::of(&session);
    Ok(Json(respond(&state, session, status)))
}
