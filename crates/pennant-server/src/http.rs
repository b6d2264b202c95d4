//! HTTP binding for the evaluation operations.

use std::sync::Arc;

use axum::extract::{Path, State};
use axum::routing::{get, post};
use axum::{Json, Router};
use tower_http::trace::TraceLayer;

use pennant_core::{
    EvaluationRequest, EvaluationResponse, EvaluationsResponse, FlagKey, ValidationError,
};
use pennant_storage::{
    EvaluationRepository, FlagRepository, SegmentRepository, UserRepository,
};

use crate::error::ApiError;
use crate::service::FlagService;

/// Builds the evaluation API router.
pub fn router<F, S, E, U>(service: Arc<FlagService<F, S, E, U>>) -> Router
where
    F: FlagRepository + 'static,
    S: SegmentRepository + 'static,
    E: EvaluationRepository + 'static,
    U: UserRepository + 'static,
{
    Router::new()
        .route("/healthz", get(healthz))
        .route(
            "/api/v1/evaluation/:flag_key",
            post(evaluate_one::<F, S, E, U>),
        )
        .route("/api/v1/evaluation", post(evaluate_all::<F, S, E, U>))
        .layer(TraceLayer::new_for_http())
        .with_state(service)
}

async fn healthz() -> &'static str {
    "ok"
}

async fn evaluate_one<F, S, E, U>(
    State(service): State<Arc<FlagService<F, S, E, U>>>,
    Path(flag_key): Path<String>,
    Json(req): Json<EvaluationRequest>,
) -> Result<Json<EvaluationResponse>, ApiError>
where
    F: FlagRepository + 'static,
    S: SegmentRepository + 'static,
    E: EvaluationRepository + 'static,
    U: UserRepository + 'static,
{
    let key = FlagKey::try_new(flag_key.as_str())
        .ok_or_else(|| ValidationError::InvalidFlagKey(flag_key.clone()))?;
    Ok(Json(service.evaluate(&key, &req).await?))
}

async fn evaluate_all<F, S, E, U>(
    State(service): State<Arc<FlagService<F, S, E, U>>>,
    Json(req): Json<EvaluationRequest>,
) -> Result<Json<EvaluationsResponse>, ApiError>
where
    F: FlagRepository + 'static,
    S: SegmentRepository + 'static,
    E: EvaluationRepository + 'static,
    U: UserRepository + 'static,
{
    Ok(Json(service.evaluate_all(&req).await?))
}
