use axum::extract::{Path, Query, State};
use axum::response::IntoResponse;
use serde::Deserialize;
use serde_json::json;

use crate::db::models::TokenKind;
use crate::error::AppError;
use crate::handlers::success;
use crate::AppState;

pub async fn get_prices(State(state): State<AppState>) -> impl IntoResponse {
    let book = state.oracle.get_current().await;
    success(book)
}

pub async fn get_price(
    State(state): State<AppState>,
    Path(token): Path<String>,
) -> Result<impl IntoResponse, AppError> {
    let token: TokenKind = token.parse().map_err(AppError::Validation)?;
    let book = state.oracle.get_current().await;

    Ok(success(json!({
        "token": token,
        "price": book.token(token),
        "usdToNgn": book.usd_to_ngn,
        "fetchedAt": book.fetched_at,
        "fromCache": book.from_cache,
    })))
}

#[derive(Debug, Deserialize)]
pub struct HistoryQuery {
    pub hours: Option<i64>,
}

pub async fn get_history(
    State(state): State<AppState>,
    Path(token): Path<String>,
    Query(query): Query<HistoryQuery>,
) -> Result<impl IntoResponse, AppError> {
    let token: TokenKind = token.parse().map_err(AppError::Validation)?;
    let hours = query.hours.unwrap_or(24);
    let snapshots = state.oracle.get_history(token, hours).await?;

    Ok(success(json!({
        "token": token,
        "hours": hours.clamp(1, 168),
        "snapshots": snapshots,
    })))
}

/// Admin-only forced refresh; routed behind the internal key gate.
pub async fn refresh(State(state): State<AppState>) -> Result<impl IntoResponse, AppError> {
    let book = state.oracle.force_refresh().await?;
    Ok(success(book))
}
