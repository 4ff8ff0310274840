use axum::extract::{Path, Query, State};
use axum::response::IntoResponse;
use bigdecimal::BigDecimal;
use chrono::Utc;
use serde::Deserialize;
use serde_json::json;
use uuid::Uuid;

use crate::db::models::{Direction, TokenKind, Transaction, TransactionPatch, TxStatus};
use crate::db::queries;
use crate::error::AppError;
use crate::handlers::{created, success};
use crate::utils::reference;
use crate::validation;
use crate::AppState;

#[derive(Debug, Deserialize)]
pub struct ListQuery {
    pub page: Option<i64>,
    pub limit: Option<i64>,
}

pub async fn list(
    State(state): State<AppState>,
    Query(query): Query<ListQuery>,
) -> Result<impl IntoResponse, AppError> {
    let page = query.page.unwrap_or(1).max(1);
    let limit = query.limit.unwrap_or(20).clamp(1, 100);
    let offset = (page - 1) * limit;

    let items = queries::list_transactions(&state.db, limit, offset).await?;
    let total = queries::count_all(&state.db).await?;

    Ok(success(json!({
        "items": items,
        "page": page,
        "limit": limit,
        "total": total,
    })))
}

/// Generic record create for the simple swap model; the offramp/onramp
/// initialize endpoints are the full-fat paths.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateTransactionRequest {
    pub token: String,
    pub direction: String,
    pub token_amount: BigDecimal,
    pub ngn_amount: i64,
    pub rate_at_time: BigDecimal,
    pub sender_address: String,
    pub recipient_address: String,
}

pub async fn create(
    State(state): State<AppState>,
    axum::Json(req): axum::Json<CreateTransactionRequest>,
) -> Result<impl IntoResponse, AppError> {
    let token: TokenKind = req.token.parse().map_err(AppError::Validation)?;
    let direction: Direction = req.direction.parse().map_err(AppError::Validation)?;
    validation::validate_stacks_address("senderAddress", &req.sender_address)?;
    validation::validate_stacks_address("recipientAddress", &req.recipient_address)?;
    if req.ngn_amount < 0 {
        return Err(AppError::Validation("ngnAmount must not be negative".to_string()));
    }

    let now = Utc::now();
    let record = Transaction {
        id: Uuid::new_v4(),
        reference: match direction {
            Direction::Offramp => reference::offramp_reference(),
            Direction::Onramp => reference::onramp_reference(),
        },
        token,
        direction,
        token_amount: req.token_amount,
        ngn_amount: req.ngn_amount,
        fee_ngn: state.config.offramp.flat_fee_ngn,
        rate_at_time: req.rate_at_time,
        sender_address: validation::sanitize_string(&req.sender_address),
        recipient_address: validation::sanitize_string(&req.recipient_address),
        chain_tx_id: None,
        payout_provider_tx_id: None,
        provider_reference: None,
        status: TxStatus::Pending,
        bank_code: None,
        account_number: None,
        account_name: None,
        bank_name: None,
        expires_at: None,
        meta: json!({}),
        created_at: now,
        updated_at: now,
        confirmed_at: None,
    };

    let record = queries::create(&state.db, &record).await?;
    Ok(created(record))
}

pub async fn get(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<impl IntoResponse, AppError> {
    let transaction = queries::find_by_id(&state.db, id)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("transaction {id} not found")))?;

    Ok(success(transaction))
}

#[derive(Debug, Deserialize)]
pub struct UpdateStatusRequest {
    pub status: String,
}

/// Transition-validated status patch; rejects any edge the machine does
/// not allow, atomically.
pub async fn update_status(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    axum::Json(req): axum::Json<UpdateStatusRequest>,
) -> Result<impl IntoResponse, AppError> {
    let next: TxStatus = req.status.parse().map_err(AppError::Validation)?;

    let record = queries::find_by_id(&state.db, id)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("transaction {id} not found")))?;

    if !record.status.can_transition_to(next) {
        return Err(AppError::ConflictOfState(format!(
            "cannot transition from {} to {}",
            record.status, next
        )));
    }

    let mut patch = TransactionPatch::to(next);
    if next == TxStatus::Confirmed {
        patch = patch.confirmed_now();
    }

    let updated = queries::conditional_update(&state.db, &record.reference, record.status, patch)
        .await?
        .ok_or_else(|| {
            AppError::ConflictOfState("transaction changed concurrently, retry".to_string())
        })?;

    Ok(success(updated))
}

pub async fn stats(State(state): State<AppState>) -> Result<impl IntoResponse, AppError> {
    let stats = queries::token_stats(&state.db).await?;
    Ok(success(stats))
}
