pub mod offramp;
pub mod onramp;
pub mod prices;
pub mod transactions;

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::Json;
use chrono::Utc;
use serde::Serialize;
use serde_json::json;
use std::time::Duration;

use crate::AppState;

/// `{success: true, data}` — the envelope every endpoint responds with.
pub fn success<T: Serialize>(data: T) -> Json<serde_json::Value> {
    Json(json!({ "success": true, "data": data }))
}

pub fn success_message(message: &str) -> Json<serde_json::Value> {
    Json(json!({ "success": true, "message": message }))
}

pub fn created<T: Serialize>(data: T) -> impl IntoResponse {
    (StatusCode::CREATED, success(data))
}

pub async fn health(State(state): State<AppState>) -> impl IntoResponse {
    let database = match tokio::time::timeout(
        Duration::from_secs(2),
        sqlx::query("SELECT 1").execute(&state.db),
    )
    .await
    {
        Ok(Ok(_)) => "healthy",
        Ok(Err(_)) => "unhealthy",
        Err(_) => "timeout",
    };

    success(json!({
        "status": if database == "healthy" { "ok" } else { "degraded" },
        "version": env!("CARGO_PKG_VERSION"),
        "env": state.config.server.env,
        "uptimeSeconds": state.started_at.elapsed().as_secs(),
        "timestamp": Utc::now().to_rfc3339(),
        "database": database,
    }))
}
