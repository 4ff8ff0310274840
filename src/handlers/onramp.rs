use axum::body::Bytes;
use axum::extract::{Path, Query, State};
use axum::http::HeaderMap;
use axum::response::IntoResponse;
use bigdecimal::BigDecimal;
use serde::Deserialize;
use serde_json::json;

use crate::db::models::{Direction, TokenKind};
use crate::db::queries;
use crate::error::AppError;
use crate::handlers::offramp::{paged_history, HistoryQuery};
use crate::handlers::{created, success, success_message};
use crate::services::onramp::{InitializeOnrampRequest, OnrampService, OnrampWebhookOutcome};
use crate::AppState;

const MONNIFY_SIGNATURE_HEADER: &str = "monnify-signature";

fn onramp_service(state: &AppState) -> Result<&OnrampService, AppError> {
    state.onramp.as_deref().ok_or_else(|| {
        AppError::ConfigMissing("onramp is not configured on this deployment".to_string())
    })
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RateQuery {
    pub token: String,
    pub token_amount: BigDecimal,
}

pub async fn rate(
    State(state): State<AppState>,
    Query(query): Query<RateQuery>,
) -> Result<impl IntoResponse, AppError> {
    let onramp = onramp_service(&state)?;
    let token: TokenKind = query.token.parse().map_err(AppError::Validation)?;
    let quote = onramp.quote_onramp(token, &query.token_amount).await?;
    Ok(success(quote))
}

pub async fn initialize(
    State(state): State<AppState>,
    axum::Json(req): axum::Json<InitializeOnrampRequest>,
) -> Result<impl IntoResponse, AppError> {
    let onramp = onramp_service(&state)?;
    let (transaction, instructions) = onramp.initialize(req).await?;

    Ok(created(json!({
        "transaction": transaction,
        "paymentInstructions": instructions,
    })))
}

pub async fn monnify_webhook(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<impl IntoResponse, AppError> {
    let onramp = onramp_service(&state)?;
    let signature = headers
        .get(MONNIFY_SIGNATURE_HEADER)
        .and_then(|h| h.to_str().ok());

    match onramp.handle_payment_webhook(&body, signature).await? {
        OnrampWebhookOutcome::TokensSent(transaction) => Ok(success(json!({
            "transaction": transaction,
            "message": "tokens sent",
        }))),
        OnrampWebhookOutcome::AlreadyProcessed => Ok(success_message("already processed")),
        OnrampWebhookOutcome::Ignored => Ok(success_message("event ignored")),
    }
}

pub async fn status(
    State(state): State<AppState>,
    Path(reference): Path<String>,
) -> Result<impl IntoResponse, AppError> {
    let transaction = queries::find_by_reference(&state.db, &reference)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("no transaction for reference {reference}")))?;

    Ok(success(transaction))
}

pub async fn history(
    State(state): State<AppState>,
    Query(query): Query<HistoryQuery>,
) -> Result<impl IntoResponse, AppError> {
    paged_history(&state, query, Some(Direction::Onramp)).await
}
