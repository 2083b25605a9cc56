//! Health & readiness handlers.
//!
//! - GET /healthz  -> simple liveness ("ok")
//! - GET /readyz   -> readiness that checks the catalog database

use crate::{Catalog, errors::AppError};
use axum::{Json, extract::State, http::StatusCode, response::IntoResponse};
use serde::Serialize;

/// `GET /healthz`
///
/// Liveness only, never touches the database.
pub async fn healthz() -> impl IntoResponse {
    (
        StatusCode::OK,
        Json(HealthResponse {
            status: "ok".into(),
        }),
    )
}

/// `GET /readyz`
///
/// Runs `SELECT 1` and checks that the schema is in place. Answers 503 with
/// the failing check when either is not the case.
pub async fn readyz(State(catalog): State<Catalog>) -> Result<Json<ReadyResponse>, AppError> {
    match sqlx::query_scalar::<_, i64>("SELECT 1")
        .fetch_one(catalog.pool())
        .await
    {
        Ok(1) => {}
        Ok(v) => return Err(AppError::unavailable(format!("sqlite: unexpected result {}", v))),
        Err(e) => return Err(AppError::unavailable(format!("sqlite: {}", e))),
    }

    let buckets = sqlx::query_scalar::<_, i64>("SELECT COUNT(*) FROM buckets")
        .fetch_one(catalog.pool())
        .await
        .map_err(|e| AppError::unavailable(format!("schema: {}", e)))?;

    Ok(Json(ReadyResponse {
        status: "ok".into(),
        buckets,
    }))
}

#[derive(Serialize)]
struct HealthResponse {
    status: String,
}

#[derive(Serialize, Debug)]
pub struct ReadyResponse {
    status: String,
    buckets: i64,
}
