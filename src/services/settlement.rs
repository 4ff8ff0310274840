use bigdecimal::{BigDecimal, ToPrimitive};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::json;
use sqlx::PgPool;
use std::fmt;
use std::sync::Arc;

use crate::config::Config;
use crate::db::models::{
    BankDetails, Direction, TokenKind, Transaction, TransactionPatch, TxStatus,
};
use crate::db::queries;
use crate::error::AppError;
use crate::providers::lenco::{LencoClient, LencoError};
use crate::services::liquidity::{LiquidityDecision, LiquidityGuard};
use crate::services::oracle::PriceOracle;
use crate::services::watcher;
use crate::stacks::StacksClient;
use crate::validation;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InitializeOfframpRequest {
    pub token: String,
    pub token_amount: BigDecimal,
    pub sender_address: String,
    pub bank_code: String,
    pub account_number: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DepositInstructions {
    pub deposit_address: String,
    pub token: TokenKind,
    pub token_amount: BigDecimal,
    /// Must be attached verbatim as the chain memo.
    pub memo: String,
    pub expires_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OfframpQuote {
    pub token: TokenKind,
    pub token_amount: BigDecimal,
    pub rate_ngn: BigDecimal,
    pub gross_ngn: BigDecimal,
    pub fee_ngn: i64,
    pub ngn_amount: i64,
    pub from_cache: bool,
}

/// Who observed the deposit. Recorded in `meta` for audit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfirmationSource {
    Indexer,
    Watcher,
    Api,
}

impl fmt::Display for ConfirmationSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfirmationSource::Indexer => f.write_str("indexer"),
            ConfirmationSource::Watcher => f.write_str("watcher"),
            ConfirmationSource::Api => f.write_str("api"),
        }
    }
}

#[derive(Debug)]
pub struct ConfirmReceipt {
    pub reference: String,
    pub chain_tx_id: String,
    pub token: TokenKind,
    pub token_amount: BigDecimal,
    pub sender_address: String,
    pub source: ConfirmationSource,
}

#[derive(Debug)]
pub enum ConfirmOutcome {
    /// This caller won the claim and the payout was issued.
    PayoutInitiated(Box<Transaction>),
    /// Another task already claimed the deposit; idempotent no-op.
    AlreadyProcessed,
}

#[derive(Debug)]
pub enum NotifyOutcome {
    Watching(Box<Transaction>),
    AlreadyProcessing(TxStatus),
}

#[derive(Debug, PartialEq, Eq)]
pub enum WebhookOutcome {
    Confirmed,
    AlreadyConfirmed,
    Failed,
    Ignored,
}

#[derive(Debug, Deserialize)]
struct LencoWebhook {
    event: String,
    data: LencoWebhookData,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct LencoWebhookData {
    #[serde(default)]
    reference: Option<String>,
    #[serde(default)]
    id: Option<String>,
    #[serde(default)]
    reason_for_failure: Option<String>,
}

/// Owner of the offramp status machine. All transitions funnel through
/// `queries::conditional_update`; the store is the lock.
pub struct SettlementEngine {
    pub(crate) pool: PgPool,
    pub(crate) oracle: Arc<PriceOracle>,
    pub(crate) lenco: Arc<LencoClient>,
    pub(crate) liquidity: Arc<LiquidityGuard>,
    pub(crate) stacks: Arc<StacksClient>,
    pub(crate) config: Arc<Config>,
}

impl SettlementEngine {
    pub fn new(
        pool: PgPool,
        oracle: Arc<PriceOracle>,
        lenco: Arc<LencoClient>,
        liquidity: Arc<LiquidityGuard>,
        stacks: Arc<StacksClient>,
        config: Arc<Config>,
    ) -> Self {
        Self {
            pool,
            oracle,
            lenco,
            liquidity,
            stacks,
            config,
        }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Live quote: `ngn_amount = floor(tokenAmount * rate - fee)`. The
    /// provider only accepts whole-NGN amounts.
    pub async fn quote_offramp(
        &self,
        token: TokenKind,
        token_amount: &BigDecimal,
    ) -> Result<OfframpQuote, AppError> {
        validation::validate_token_amount(
            token_amount,
            &self.config.offramp.min_token,
            &self.config.offramp.max_token,
        )?;

        let book = self.oracle.get_current().await;
        let rate_ngn = book.rate_ngn(token).ok_or_else(|| {
            AppError::UpstreamUnavailable("no NGN rate available for token".to_string())
        })?;

        let fee_ngn = self.config.offramp.flat_fee_ngn;
        let (gross_ngn, ngn_amount) = net_ngn(token_amount, &rate_ngn, fee_ngn);
        if ngn_amount <= 0 {
            return Err(AppError::Validation(
                "amount is too small to cover the service fee".to_string(),
            ));
        }

        Ok(OfframpQuote {
            token,
            token_amount: token_amount.clone(),
            rate_ngn,
            gross_ngn,
            fee_ngn,
            ngn_amount,
            from_cache: book.from_cache,
        })
    }

    pub async fn initialize_offramp(
        &self,
        req: InitializeOfframpRequest,
    ) -> Result<(Transaction, DepositInstructions), AppError> {
        let token: TokenKind = req.token.parse().map_err(AppError::Validation)?;
        validation::validate_token_amount(
            &req.token_amount,
            &self.config.offramp.min_token,
            &self.config.offramp.max_token,
        )?;
        validation::validate_stacks_address("senderAddress", &req.sender_address)?;
        validation::validate_bank_code(&req.bank_code)?;
        validation::validate_account_number(&req.account_number)?;

        let sender_address = validation::sanitize_string(&req.sender_address);
        let bank_code = validation::sanitize_string(&req.bank_code);
        let account_number = validation::sanitize_string(&req.account_number);

        let resolved = self
            .lenco
            .resolve_account(&bank_code, &account_number)
            .await
            .map_err(|err| match err {
                LencoError::Request(inner) => AppError::UpstreamUnavailable(inner.to_string()),
                other => AppError::Validation(other.to_string()),
            })?;

        let deposit_address = self
            .config
            .stacks
            .platform_address
            .clone()
            .ok_or_else(|| {
                AppError::ConfigMissing("platform deposit address is not configured".to_string())
            })?;

        let quote = self.quote_offramp(token, &req.token_amount).await?;

        let available = match self.liquidity.check(quote.ngn_amount).await {
            LiquidityDecision::Ok { available_ngn } => available_ngn,
            LiquidityDecision::Insufficient { available_ngn, .. } => {
                return Err(AppError::InsufficientLiquidity {
                    max_order_ngn: Some(
                        (available_ngn - self.liquidity.min_buffer_ngn()).max(0),
                    ),
                });
            }
            LiquidityDecision::Unknown => {
                return Err(AppError::ServiceUnavailable(
                    "platform balance is currently unavailable".to_string(),
                ));
            }
        };

        let mut record = Transaction::new_offramp(
            token,
            req.token_amount.clone(),
            quote.ngn_amount,
            quote.fee_ngn,
            quote.rate_ngn.clone(),
            sender_address,
            deposit_address.clone(),
            BankDetails {
                bank_code,
                account_number,
                account_name: resolved.account_name,
                bank_name: resolved.bank_name,
            },
            self.config.offramp.expiry_minutes,
        );
        record.meta["balance_at_order_time"] = json!(available);

        let record = queries::create(&self.pool, &record).await?;

        tracing::info!(
            reference = %record.reference,
            token = %record.token,
            token_amount = %record.token_amount,
            ngn_amount = record.ngn_amount,
            "offramp initialized"
        );

        let instructions = DepositInstructions {
            deposit_address,
            token,
            token_amount: record.token_amount.clone(),
            memo: record.reference.clone(),
            expires_at: record.expires_at,
        };

        Ok((record, instructions))
    }

    /// The user's wallet reports a broadcast. Records the txid and spawns
    /// the per-transaction watcher; responds immediately.
    pub async fn notify_tx_broadcast(
        self: &Arc<Self>,
        reference: &str,
        chain_tx_id: &str,
    ) -> Result<NotifyOutcome, AppError> {
        validation::validate_required("chainTxId", chain_tx_id)?;

        let record = queries::find_by_reference(&self.pool, reference)
            .await?
            .ok_or_else(|| {
                AppError::NotFound(format!("no transaction for reference {reference}"))
            })?;

        if record.status.has_receipt() {
            return Ok(NotifyOutcome::AlreadyProcessing(record.status));
        }

        let updated = queries::set_chain_tx_id(&self.pool, reference, chain_tx_id)
            .await?
            .ok_or_else(|| {
                AppError::NotFound(format!("no transaction for reference {reference}"))
            })?;

        tokio::spawn(watcher::watch_offramp(
            Arc::clone(self),
            reference.to_string(),
            chain_tx_id.to_string(),
        ));

        tracing::info!(reference, chain_tx_id, "watcher spawned for broadcast tx");
        Ok(NotifyOutcome::Watching(Box::new(updated)))
    }

    /// Claims a confirmed deposit and issues the payout, exactly once per
    /// reference. Safe to call any number of times from any source: only
    /// the caller that wins the `pending -> processing` update proceeds.
    pub async fn confirm_receipt(
        &self,
        receipt: ConfirmReceipt,
    ) -> Result<ConfirmOutcome, AppError> {
        // Direction is immutable, so this is checked before claiming: a
        // claim on a non-offramp record could never be settled or rolled
        // back and would strand it in processing.
        let existing = queries::find_by_reference(&self.pool, &receipt.reference)
            .await?
            .ok_or_else(|| {
                AppError::NotFound(format!(
                    "no transaction for reference {}",
                    receipt.reference
                ))
            })?;
        if existing.direction != Direction::Offramp {
            return Err(AppError::ConflictOfState(
                "reference does not belong to an offramp".to_string(),
            ));
        }

        let claim = TransactionPatch::to(TxStatus::Processing)
            .chain_tx_id(receipt.chain_tx_id.as_str())
            .meta("token_received_at", json!(Utc::now().to_rfc3339()))
            .meta("confirmation_source", json!(receipt.source.to_string()));

        let Some(record) =
            queries::conditional_update(&self.pool, &receipt.reference, TxStatus::Pending, claim)
                .await?
        else {
            return match queries::find_by_reference(&self.pool, &receipt.reference).await? {
                None => Err(AppError::NotFound(format!(
                    "no transaction for reference {}",
                    receipt.reference
                ))),
                Some(existing) if existing.status.has_receipt() => {
                    tracing::debug!(
                        reference = %receipt.reference,
                        source = %receipt.source,
                        status = %existing.status,
                        "deposit already claimed"
                    );
                    Ok(ConfirmOutcome::AlreadyProcessed)
                }
                Some(existing) => Err(AppError::ConflictOfState(format!(
                    "transaction is {}",
                    existing.status
                ))),
            };
        };

        if record.token != receipt.token {
            tracing::warn!(
                reference = %record.reference,
                expected = %record.token,
                delivered = %receipt.token,
                "deposit token differs from the order"
            );
        }

        // Under/over-delivery is flagged, never blocked: the NGN amount was
        // fixed at init, so a mismatch is a manual-review item.
        let mismatch = exceeds_tolerance(&record.token_amount, &receipt.token_amount);
        if mismatch {
            tracing::warn!(
                reference = %record.reference,
                expected = %record.token_amount,
                delivered = %receipt.token_amount,
                "deposit amount outside tolerance"
            );
        }

        let (Some(bank_code), Some(account_number)) =
            (record.bank_code.clone(), record.account_number.clone())
        else {
            let patch = TransactionPatch::to(TxStatus::Failed)
                .meta("failure_reason", json!("offramp record missing bank details"))
                .meta("requires_manual_settlement", json!(true));
            queries::conditional_update(&self.pool, &record.reference, TxStatus::Processing, patch)
                .await?;
            return Err(AppError::Internal(
                "offramp record missing bank details".to_string(),
            ));
        };

        let narration = format!("StackSwap offramp {}", record.reference);
        match self
            .lenco
            .initiate_transfer(
                record.ngn_amount,
                &bank_code,
                &account_number,
                &record.reference,
                &narration,
            )
            .await
        {
            Ok(transfer) => {
                // The float just shrank; the next liquidity check must see it.
                self.lenco.invalidate_balance().await;

                let mut patch = TransactionPatch::to(TxStatus::Settling)
                    .payout(transfer.id.clone(), transfer.transaction_reference.clone());
                if mismatch {
                    patch = patch.meta(
                        "amount_mismatch",
                        json!({
                            "expected": record.token_amount.to_string(),
                            "delivered": receipt.token_amount.to_string(),
                        }),
                    );
                }

                let settling = queries::conditional_update(
                    &self.pool,
                    &record.reference,
                    TxStatus::Processing,
                    patch,
                )
                .await?;

                tracing::info!(
                    reference = %record.reference,
                    transfer_id = %transfer.id,
                    ngn_amount = record.ngn_amount,
                    source = %receipt.source,
                    "payout initiated"
                );

                match settling {
                    Some(updated) => Ok(ConfirmOutcome::PayoutInitiated(Box::new(updated))),
                    None => {
                        tracing::error!(
                            reference = %record.reference,
                            "record left processing while payout was in flight"
                        );
                        Ok(ConfirmOutcome::PayoutInitiated(Box::new(record)))
                    }
                }
            }
            Err(err) => {
                let reason = err.to_string();
                let patch = TransactionPatch::to(TxStatus::Failed)
                    .meta("failure_reason", json!(reason.clone()))
                    .meta("requires_manual_settlement", json!(true));
                queries::conditional_update(
                    &self.pool,
                    &record.reference,
                    TxStatus::Processing,
                    patch,
                )
                .await?;

                // Tokens are in custody with no payout issued. Everything a
                // human needs to reconcile goes in one log entry.
                tracing::error!(
                    reference = %record.reference,
                    chain_tx_id = %receipt.chain_tx_id,
                    ngn_amount = record.ngn_amount,
                    bank_code = %bank_code,
                    account_number = %account_number,
                    error = %reason,
                    "payout failed after tokens received; manual settlement required"
                );

                Err(AppError::PayoutFailed(reason))
            }
        }
    }

    /// Finalizes a payout from the provider's webhook. Idempotent on
    /// replayed `transfer.completed` events.
    pub async fn handle_payout_webhook(
        &self,
        raw_body: &[u8],
        signature: Option<&str>,
    ) -> Result<WebhookOutcome, AppError> {
        if self.config.lenco.webhook_secret.is_none() {
            return Err(AppError::ConfigMissing(
                "LENCO_WEBHOOK_SECRET is not configured".to_string(),
            ));
        }

        let signature = signature
            .ok_or_else(|| AppError::Unauthorized("missing x-lenco-signature header".to_string()))?;
        if !self.lenco.verify_webhook_signature(raw_body, signature) {
            return Err(AppError::Unauthorized("invalid webhook signature".to_string()));
        }

        let payload: LencoWebhook = serde_json::from_slice(raw_body)
            .map_err(|err| AppError::Validation(format!("malformed webhook payload: {err}")))?;
        let reference = payload.data.reference.clone().ok_or_else(|| {
            AppError::Validation("webhook payload is missing the transfer reference".to_string())
        })?;

        match payload.event.as_str() {
            "transfer.completed" => {
                let patch = TransactionPatch::to(TxStatus::Confirmed).confirmed_now();
                match queries::conditional_update(&self.pool, &reference, TxStatus::Settling, patch)
                    .await?
                {
                    Some(record) => {
                        tracing::info!(
                            reference = %record.reference,
                            transfer_id = ?payload.data.id,
                            "offramp confirmed"
                        );
                        Ok(WebhookOutcome::Confirmed)
                    }
                    None => match queries::find_by_reference(&self.pool, &reference).await? {
                        Some(existing) if existing.status == TxStatus::Confirmed => {
                            Ok(WebhookOutcome::AlreadyConfirmed)
                        }
                        Some(existing) => Err(AppError::ConflictOfState(format!(
                            "transaction is {}",
                            existing.status
                        ))),
                        None => Err(AppError::NotFound(format!(
                            "no transaction for reference {reference}"
                        ))),
                    },
                }
            }
            "transfer.failed" | "transfer.reversed" => {
                let reason = payload
                    .data
                    .reason_for_failure
                    .clone()
                    .unwrap_or_else(|| payload.event.clone());
                let patch = TransactionPatch::to(TxStatus::Failed)
                    .meta("failure_reason", json!(reason.clone()))
                    .meta("requires_manual_refund", json!(true));

                match queries::conditional_update(&self.pool, &reference, TxStatus::Settling, patch)
                    .await?
                {
                    Some(record) => {
                        tracing::error!(
                            reference = %record.reference,
                            sender_address = %record.sender_address,
                            reason = %reason,
                            "payout failed after initiation; manual refund of received tokens required"
                        );
                        Ok(WebhookOutcome::Failed)
                    }
                    None => match queries::find_by_reference(&self.pool, &reference).await? {
                        Some(existing) if existing.status == TxStatus::Failed => {
                            Ok(WebhookOutcome::Failed)
                        }
                        Some(existing) => Err(AppError::ConflictOfState(format!(
                            "transaction is {}",
                            existing.status
                        ))),
                        None => Err(AppError::NotFound(format!(
                            "no transaction for reference {reference}"
                        ))),
                    },
                }
            }
            other => {
                tracing::debug!(event = other, "ignoring unhandled webhook event");
                Ok(WebhookOutcome::Ignored)
            }
        }
    }
}

/// Gross NGN value and the integer net after the flat fee, floored.
pub fn net_ngn(
    token_amount: &BigDecimal,
    rate_ngn: &BigDecimal,
    fee_ngn: i64,
) -> (BigDecimal, i64) {
    let gross = token_amount * rate_ngn;
    let net = (&gross - BigDecimal::from(fee_ngn))
        .with_scale_round(0, bigdecimal::RoundingMode::Floor);
    (gross, net.to_i64().unwrap_or(0))
}

/// True when `|delivered - expected| > 0.1% of expected`.
pub fn exceeds_tolerance(expected: &BigDecimal, delivered: &BigDecimal) -> bool {
    (delivered - expected).abs() * BigDecimal::from(1_000) > *expected
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    fn dec(s: &str) -> BigDecimal {
        BigDecimal::from_str(s).unwrap()
    }

    #[test]
    fn quote_floors_net_ngn_after_fee() {
        let (gross, net) = net_ngn(&dec("100"), &dec("1847.35"), 100);
        assert_eq!(gross, dec("184735.00"));
        assert_eq!(net, 184_635);
    }

    #[test]
    fn quote_floors_fractional_gross() {
        let (_, net) = net_ngn(&dec("1.5"), &dec("1847.33"), 100);
        // 2770.995 - 100 = 2670.995 -> 2670
        assert_eq!(net, 2_670);
    }

    #[test]
    fn net_goes_nonpositive_for_dust_amounts() {
        let (_, net) = net_ngn(&dec("0.05"), &dec("1847.35"), 100);
        assert!(net <= 0);
    }

    #[test]
    fn tolerance_allows_a_tenth_of_a_percent() {
        let expected = dec("100");
        assert!(!exceeds_tolerance(&expected, &dec("100")));
        assert!(!exceeds_tolerance(&expected, &dec("100.1")));
        assert!(!exceeds_tolerance(&expected, &dec("99.9")));
        assert!(exceeds_tolerance(&expected, &dec("99.89")));
        assert!(exceeds_tolerance(&expected, &dec("100.11")));
        assert!(exceeds_tolerance(&expected, &dec("50")));
    }

    #[test]
    fn confirmation_source_names() {
        assert_eq!(ConfirmationSource::Indexer.to_string(), "indexer");
        assert_eq!(ConfirmationSource::Watcher.to_string(), "watcher");
        assert_eq!(ConfirmationSource::Api.to_string(), "api");
    }

    #[test]
    fn webhook_payload_parses_lenco_shape() {
        let payload: LencoWebhook = serde_json::from_str(
            r#"{
                "event": "transfer.completed",
                "data": {
                    "id": "trf_123",
                    "reference": "SSWAP_OFFRAMP_lx2a9f_0a1b2c3d",
                    "status": "successful"
                }
            }"#,
        )
        .unwrap();

        assert_eq!(payload.event, "transfer.completed");
        assert_eq!(
            payload.data.reference.as_deref(),
            Some("SSWAP_OFFRAMP_lx2a9f_0a1b2c3d")
        );
    }
}
