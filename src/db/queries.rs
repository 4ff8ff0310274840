use chrono::{DateTime, Duration, Utc};
use serde_json::json;
use sqlx::{PgPool, Result};
use uuid::Uuid;

use crate::db::models::{
    Direction, PriceSnapshot, TokenKind, TokenStats, Transaction, TransactionPatch, TxStatus,
};

// --- Transaction queries ---

pub async fn create(pool: &PgPool, tx: &Transaction) -> Result<Transaction> {
    sqlx::query_as::<_, Transaction>(
        r#"
        INSERT INTO transactions (
            id, reference, token, direction, token_amount, ngn_amount, fee_ngn,
            rate_at_time, sender_address, recipient_address, chain_tx_id,
            payout_provider_tx_id, provider_reference, status, bank_code,
            account_number, account_name, bank_name, expires_at, meta,
            created_at, updated_at, confirmed_at
        ) VALUES (
            $1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15,
            $16, $17, $18, $19, $20, $21, $22, $23
        )
        RETURNING *
        "#,
    )
    .bind(tx.id)
    .bind(&tx.reference)
    .bind(tx.token)
    .bind(tx.direction)
    .bind(&tx.token_amount)
    .bind(tx.ngn_amount)
    .bind(tx.fee_ngn)
    .bind(&tx.rate_at_time)
    .bind(&tx.sender_address)
    .bind(&tx.recipient_address)
    .bind(&tx.chain_tx_id)
    .bind(&tx.payout_provider_tx_id)
    .bind(&tx.provider_reference)
    .bind(tx.status)
    .bind(&tx.bank_code)
    .bind(&tx.account_number)
    .bind(&tx.account_name)
    .bind(&tx.bank_name)
    .bind(tx.expires_at)
    .bind(&tx.meta)
    .bind(tx.created_at)
    .bind(tx.updated_at)
    .bind(tx.confirmed_at)
    .fetch_one(pool)
    .await
}

pub async fn find_by_reference(pool: &PgPool, reference: &str) -> Result<Option<Transaction>> {
    sqlx::query_as::<_, Transaction>("SELECT * FROM transactions WHERE reference = $1")
        .bind(reference)
        .fetch_optional(pool)
        .await
}

pub async fn find_by_id(pool: &PgPool, id: Uuid) -> Result<Option<Transaction>> {
    sqlx::query_as::<_, Transaction>("SELECT * FROM transactions WHERE id = $1")
        .bind(id)
        .fetch_optional(pool)
        .await
}

pub struct AddressFilter {
    pub direction: Option<Direction>,
    pub status: Option<TxStatus>,
    pub token: Option<TokenKind>,
}

pub async fn find_by_address(
    pool: &PgPool,
    address: &str,
    filter: &AddressFilter,
    limit: i64,
    offset: i64,
) -> Result<Vec<Transaction>> {
    sqlx::query_as::<_, Transaction>(
        r#"
        SELECT * FROM transactions
        WHERE (sender_address = $1 OR recipient_address = $1)
          AND ($2::tx_direction IS NULL OR direction = $2)
          AND ($3::tx_status IS NULL OR status = $3)
          AND ($4::token_kind IS NULL OR token = $4)
        ORDER BY created_at DESC
        LIMIT $5 OFFSET $6
        "#,
    )
    .bind(address)
    .bind(filter.direction)
    .bind(filter.status)
    .bind(filter.token)
    .bind(limit)
    .bind(offset)
    .fetch_all(pool)
    .await
}

pub async fn count_by_address(
    pool: &PgPool,
    address: &str,
    filter: &AddressFilter,
) -> Result<i64> {
    sqlx::query_scalar::<_, i64>(
        r#"
        SELECT COUNT(*) FROM transactions
        WHERE (sender_address = $1 OR recipient_address = $1)
          AND ($2::tx_direction IS NULL OR direction = $2)
          AND ($3::tx_status IS NULL OR status = $3)
          AND ($4::token_kind IS NULL OR token = $4)
        "#,
    )
    .bind(address)
    .bind(filter.direction)
    .bind(filter.status)
    .bind(filter.token)
    .fetch_one(pool)
    .await
}

pub async fn list_transactions(pool: &PgPool, limit: i64, offset: i64) -> Result<Vec<Transaction>> {
    sqlx::query_as::<_, Transaction>(
        "SELECT * FROM transactions ORDER BY created_at DESC LIMIT $1 OFFSET $2",
    )
    .bind(limit)
    .bind(offset)
    .fetch_all(pool)
    .await
}

pub async fn count_all(pool: &PgPool) -> Result<i64> {
    sqlx::query_scalar::<_, i64>("SELECT COUNT(*) FROM transactions")
        .fetch_one(pool)
        .await
}

pub async fn token_stats(pool: &PgPool) -> Result<Vec<TokenStats>> {
    sqlx::query_as::<_, TokenStats>(
        r#"
        SELECT token,
               COUNT(*) AS count,
               COALESCE(SUM(token_amount), 0) AS total_token_amount,
               COALESCE(SUM(ngn_amount), 0)::BIGINT AS total_ngn
        FROM transactions
        WHERE status = 'confirmed'
        GROUP BY token
        "#,
    )
    .fetch_all(pool)
    .await
}

/// The exactly-once primitive: a single atomic update that only applies
/// when the record is still in `required`. Returns the updated row on a
/// win, `None` when another task got there first (or the record is in a
/// different state). Set-once columns are never overwritten.
pub async fn conditional_update(
    pool: &PgPool,
    reference: &str,
    required: TxStatus,
    patch: TransactionPatch,
) -> Result<Option<Transaction>> {
    sqlx::query_as::<_, Transaction>(
        r#"
        UPDATE transactions
        SET status = $3,
            chain_tx_id = COALESCE(chain_tx_id, $4),
            payout_provider_tx_id = COALESCE(payout_provider_tx_id, $5),
            provider_reference = COALESCE(provider_reference, $6),
            confirmed_at = COALESCE($7, confirmed_at),
            meta = meta || $8,
            updated_at = NOW()
        WHERE reference = $1 AND status = $2
        RETURNING *
        "#,
    )
    .bind(reference)
    .bind(required)
    .bind(patch.status)
    .bind(patch.chain_tx_id)
    .bind(patch.payout_provider_tx_id)
    .bind(patch.provider_reference)
    .bind(patch.confirmed_at)
    .bind(patch.meta)
    .fetch_optional(pool)
    .await
}

/// Records the user-reported broadcast id. `chain_tx_id` is set once and
/// never reassigned.
pub async fn set_chain_tx_id(
    pool: &PgPool,
    reference: &str,
    chain_tx_id: &str,
) -> Result<Option<Transaction>> {
    sqlx::query_as::<_, Transaction>(
        r#"
        UPDATE transactions
        SET chain_tx_id = COALESCE(chain_tx_id, $2), updated_at = NOW()
        WHERE reference = $1
        RETURNING *
        "#,
    )
    .bind(reference)
    .bind(chain_tx_id)
    .fetch_optional(pool)
    .await
}

/// Reaper sweep: offramps whose deposit window has elapsed with no
/// receipt move to `failed`. Late confirm-receipts then observe a
/// non-pending status and are rejected.
pub async fn fail_expired_offramps(pool: &PgPool) -> Result<Vec<Transaction>> {
    sqlx::query_as::<_, Transaction>(
        r#"
        UPDATE transactions
        SET status = 'failed', meta = meta || $1, updated_at = NOW()
        WHERE direction = 'offramp'
          AND status = 'pending'
          AND expires_at IS NOT NULL
          AND expires_at < NOW()
        RETURNING *
        "#,
    )
    .bind(json!({"failure_reason": "expired"}))
    .fetch_all(pool)
    .await
}

// --- Price snapshot queries ---

pub async fn insert_price_snapshot(pool: &PgPool, snapshot: &PriceSnapshot) -> Result<()> {
    sqlx::query(
        r#"
        INSERT INTO price_snapshots (id, token, price_usd, price_ngn, usd_to_ngn, fetched_at)
        VALUES ($1, $2, $3, $4, $5, $6)
        "#,
    )
    .bind(snapshot.id)
    .bind(snapshot.token)
    .bind(&snapshot.price_usd)
    .bind(&snapshot.price_ngn)
    .bind(&snapshot.usd_to_ngn)
    .bind(snapshot.fetched_at)
    .execute(pool)
    .await?;

    Ok(())
}

pub async fn price_history(
    pool: &PgPool,
    token: TokenKind,
    hours: i64,
) -> Result<Vec<PriceSnapshot>> {
    let since: DateTime<Utc> = Utc::now() - Duration::hours(hours);

    sqlx::query_as::<_, PriceSnapshot>(
        r#"
        SELECT * FROM price_snapshots
        WHERE token = $1 AND fetched_at >= $2
        ORDER BY fetched_at DESC
        "#,
    )
    .bind(token)
    .bind(since)
    .fetch_all(pool)
    .await
}
