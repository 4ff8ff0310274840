use axum::body::Bytes;
use axum::extract::{Path, Query, State};
use axum::http::HeaderMap;
use axum::response::IntoResponse;
use bigdecimal::BigDecimal;
use serde::Deserialize;
use serde_json::json;

use crate::db::models::{Direction, TokenKind, TxStatus};
use crate::db::queries::{self, AddressFilter};
use crate::error::AppError;
use crate::handlers::{created, success, success_message};
use crate::services::settlement::{
    ConfirmOutcome, ConfirmReceipt, ConfirmationSource, InitializeOfframpRequest, NotifyOutcome,
    WebhookOutcome,
};
use crate::validation;
use crate::AppState;

const LENCO_SIGNATURE_HEADER: &str = "x-lenco-signature";
const DEFAULT_PAGE_SIZE: i64 = 20;
const MAX_PAGE_SIZE: i64 = 100;

pub async fn banks(State(state): State<AppState>) -> Result<impl IntoResponse, AppError> {
    let banks = state
        .lenco
        .list_banks()
        .await
        .map_err(|err| AppError::UpstreamUnavailable(err.to_string()))?;
    Ok(success(banks))
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
    let token: TokenKind = query.token.parse().map_err(AppError::Validation)?;
    let quote = state.engine.quote_offramp(token, &query.token_amount).await?;
    Ok(success(quote))
}

/// Public float view: exposes only whether orders can be taken and the
/// max order size, never the raw balance.
pub async fn liquidity(State(state): State<AppState>) -> impl IntoResponse {
    let max_order = state.liquidity.max_order_ngn().await;

    success(json!({
        "available": max_order.is_some(),
        "maxOrderNGN": max_order.unwrap_or(0),
        "minBufferNGN": state.liquidity.min_buffer_ngn(),
    }))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VerifyAccountRequest {
    pub bank_code: String,
    pub account_number: String,
}

pub async fn verify_account(
    State(state): State<AppState>,
    axum::Json(req): axum::Json<VerifyAccountRequest>,
) -> Result<impl IntoResponse, AppError> {
    validation::validate_bank_code(&req.bank_code)?;
    validation::validate_account_number(&req.account_number)?;

    let resolved = state
        .lenco
        .resolve_account(
            &validation::sanitize_string(&req.bank_code),
            &validation::sanitize_string(&req.account_number),
        )
        .await
        .map_err(|err| AppError::Validation(err.to_string()))?;

    Ok(success(json!({
        "accountName": resolved.account_name,
        "bankName": resolved.bank_name,
    })))
}

pub async fn initialize(
    State(state): State<AppState>,
    axum::Json(req): axum::Json<InitializeOfframpRequest>,
) -> Result<impl IntoResponse, AppError> {
    let (transaction, instructions) = state.engine.initialize_offramp(req).await?;

    Ok(created(json!({
        "transaction": transaction,
        "depositInstructions": instructions,
    })))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NotifyTxRequest {
    pub reference: String,
    pub chain_tx_id: String,
}

pub async fn notify_tx(
    State(state): State<AppState>,
    axum::Json(req): axum::Json<NotifyTxRequest>,
) -> Result<impl IntoResponse, AppError> {
    match state
        .engine
        .notify_tx_broadcast(&req.reference, &req.chain_tx_id)
        .await?
    {
        NotifyOutcome::Watching(transaction) => Ok(success(json!({
            "transaction": transaction,
            "watching": true,
        }))),
        NotifyOutcome::AlreadyProcessing(status) => Ok(success(json!({
            "status": status,
            "message": "already processing",
        }))),
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConfirmReceiptRequest {
    pub reference: String,
    pub chain_tx_id: String,
    pub token: String,
    pub token_amount: BigDecimal,
    pub sender_address: String,
}

/// Internal channel (indexer replicas, operators); gated by the
/// `x-internal-key` middleware at the router.
pub async fn confirm_receipt(
    State(state): State<AppState>,
    axum::Json(req): axum::Json<ConfirmReceiptRequest>,
) -> Result<impl IntoResponse, AppError> {
    let token: TokenKind = req.token.parse().map_err(AppError::Validation)?;

    let receipt = ConfirmReceipt {
        reference: req.reference,
        chain_tx_id: req.chain_tx_id,
        token,
        token_amount: req.token_amount,
        sender_address: req.sender_address,
        source: ConfirmationSource::Api,
    };

    match state.engine.confirm_receipt(receipt).await? {
        ConfirmOutcome::PayoutInitiated(transaction) => Ok(success(json!({
            "transaction": transaction,
            "message": "payout initiated",
        }))),
        ConfirmOutcome::AlreadyProcessed => Ok(success_message("already processed")),
    }
}

pub async fn lenco_webhook(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<impl IntoResponse, AppError> {
    let signature = headers
        .get(LENCO_SIGNATURE_HEADER)
        .and_then(|h| h.to_str().ok());

    match state.engine.handle_payout_webhook(&body, signature).await? {
        WebhookOutcome::Confirmed => Ok(success_message("transfer confirmed")),
        WebhookOutcome::AlreadyConfirmed => Ok(success_message("already confirmed")),
        WebhookOutcome::Failed => Ok(success_message("transfer failure recorded")),
        WebhookOutcome::Ignored => Ok(success_message("event ignored")),
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

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HistoryQuery {
    pub address: String,
    pub page: Option<i64>,
    pub limit: Option<i64>,
    pub status: Option<String>,
    pub token: Option<String>,
}

pub async fn history(
    State(state): State<AppState>,
    Query(query): Query<HistoryQuery>,
) -> Result<impl IntoResponse, AppError> {
    paged_history(&state, query, Some(Direction::Offramp)).await
}

pub(crate) async fn paged_history(
    state: &AppState,
    query: HistoryQuery,
    direction: Option<Direction>,
) -> Result<axum::Json<serde_json::Value>, AppError> {
    validation::validate_required("address", &query.address)?;

    let status = query
        .status
        .as_deref()
        .map(|s| s.parse::<TxStatus>())
        .transpose()
        .map_err(AppError::Validation)?;
    let token = query
        .token
        .as_deref()
        .map(|s| s.parse::<TokenKind>())
        .transpose()
        .map_err(AppError::Validation)?;

    let page = query.page.unwrap_or(1).max(1);
    let limit = query
        .limit
        .unwrap_or(DEFAULT_PAGE_SIZE)
        .clamp(1, MAX_PAGE_SIZE);
    let offset = (page - 1) * limit;

    let filter = AddressFilter {
        direction,
        status,
        token,
    };
    let address = validation::sanitize_string(&query.address);

    let items = queries::find_by_address(&state.db, &address, &filter, limit, offset).await?;
    let total = queries::count_by_address(&state.db, &address, &filter).await?;

    Ok(success(json!({
        "items": items,
        "page": page,
        "limit": limit,
        "total": total,
    })))
}
