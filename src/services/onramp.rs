use bigdecimal::{BigDecimal, ToPrimitive};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::json;
use sqlx::PgPool;
use std::sync::Arc;

use crate::config::Config;
use crate::db::models::{TokenKind, Transaction, TransactionPatch, TxStatus};
use crate::db::queries;
use crate::error::AppError;
use crate::providers::monnify;
use crate::services::oracle::PriceOracle;
use crate::services::watcher;
use crate::stacks::client::MICRO_UNITS_PER_TOKEN;
use crate::stacks::{StacksClient, StacksWallet};
use crate::validation;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InitializeOnrampRequest {
    pub token: String,
    pub token_amount: BigDecimal,
    pub recipient_address: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OnrampQuote {
    pub token: TokenKind,
    pub token_amount: BigDecimal,
    pub rate_ngn: BigDecimal,
    pub gross_ngn: BigDecimal,
    pub fee_ngn: i64,
    /// Total NGN the user must pay: ceil(gross) + fee.
    pub ngn_total: i64,
    pub from_cache: bool,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PaymentInstructions {
    /// Used as the provider payment reference.
    pub reference: String,
    pub ngn_amount: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub contract_code: Option<String>,
}

#[derive(Debug)]
pub enum OnrampWebhookOutcome {
    TokensSent(Box<Transaction>),
    AlreadyProcessed,
    Ignored,
}

/// Fiat-in, tokens-out. The payment provider's webhook drives a signed
/// blockchain send; the shared quote cache prices the order. This is the
/// only component holding a wallet handle.
pub struct OnrampService {
    pool: PgPool,
    oracle: Arc<PriceOracle>,
    stacks: Arc<StacksClient>,
    wallet: Arc<dyn StacksWallet>,
    config: Arc<Config>,
}

impl OnrampService {
    pub fn new(
        pool: PgPool,
        oracle: Arc<PriceOracle>,
        stacks: Arc<StacksClient>,
        wallet: Arc<dyn StacksWallet>,
        config: Arc<Config>,
    ) -> Self {
        Self {
            pool,
            oracle,
            stacks,
            wallet,
            config,
        }
    }

    pub async fn quote_onramp(
        &self,
        token: TokenKind,
        token_amount: &BigDecimal,
    ) -> Result<OnrampQuote, AppError> {
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
        let (gross_ngn, ngn_total) = gross_plus_fee_ngn(token_amount, &rate_ngn, fee_ngn);
        if ngn_total <= fee_ngn {
            return Err(AppError::Validation(
                "amount is too small to purchase".to_string(),
            ));
        }

        Ok(OnrampQuote {
            token,
            token_amount: token_amount.clone(),
            rate_ngn,
            gross_ngn,
            fee_ngn,
            ngn_total,
            from_cache: book.from_cache,
        })
    }

    pub async fn initialize(
        &self,
        req: InitializeOnrampRequest,
    ) -> Result<(Transaction, PaymentInstructions), AppError> {
        let token: TokenKind = req.token.parse().map_err(AppError::Validation)?;
        validation::validate_stacks_address("recipientAddress", &req.recipient_address)?;
        let recipient_address = validation::sanitize_string(&req.recipient_address);

        let platform_address = self
            .config
            .stacks
            .platform_address
            .clone()
            .ok_or_else(|| {
                AppError::ConfigMissing("platform address is not configured".to_string())
            })?;

        let quote = self.quote_onramp(token, &req.token_amount).await?;

        let record = Transaction::new_onramp(
            token,
            req.token_amount.clone(),
            quote.ngn_total,
            quote.fee_ngn,
            quote.rate_ngn.clone(),
            platform_address,
            recipient_address,
            self.config.offramp.expiry_minutes,
        );
        let record = queries::create(&self.pool, &record).await?;

        tracing::info!(
            reference = %record.reference,
            token = %record.token,
            ngn_amount = record.ngn_amount,
            "onramp initialized"
        );

        let instructions = PaymentInstructions {
            reference: record.reference.clone(),
            ngn_amount: record.ngn_amount,
            contract_code: self.config.monnify.contract_code.clone(),
        };

        Ok((record, instructions))
    }

    /// Payment-provider webhook: on a successful payment, claim the record
    /// and send the tokens. The CAS makes replayed webhooks no-ops.
    pub async fn handle_payment_webhook(
        &self,
        raw_body: &[u8],
        signature: Option<&str>,
    ) -> Result<OnrampWebhookOutcome, AppError> {
        let secret = self.config.monnify.secret_key.as_deref().ok_or_else(|| {
            AppError::ConfigMissing("MONNIFY_SECRET_KEY is not configured".to_string())
        })?;
        let signature = signature.ok_or_else(|| {
            AppError::Unauthorized("missing monnify-signature header".to_string())
        })?;
        if !monnify::verify_signature(secret, raw_body, signature) {
            return Err(AppError::Unauthorized("invalid webhook signature".to_string()));
        }

        let payload: monnify::MonnifyWebhook = serde_json::from_slice(raw_body)
            .map_err(|err| AppError::Validation(format!("malformed webhook payload: {err}")))?;

        if !payload.is_successful_payment() {
            tracing::debug!(event = %payload.event_type, "ignoring non-payment webhook event");
            return Ok(OnrampWebhookOutcome::Ignored);
        }

        let reference = payload.event_data.payment_reference.clone();

        let mut claim = TransactionPatch::to(TxStatus::Processing)
            .meta("fiat_received_at", json!(Utc::now().to_rfc3339()));
        if let Some(provider_ref) = payload.event_data.transaction_reference.clone() {
            claim = claim.payout(provider_ref, None);
        }

        let Some(record) =
            queries::conditional_update(&self.pool, &reference, TxStatus::Pending, claim).await?
        else {
            return match queries::find_by_reference(&self.pool, &reference).await? {
                None => Err(AppError::NotFound(format!(
                    "no transaction for reference {reference}"
                ))),
                Some(existing) if existing.status.has_receipt() => {
                    Ok(OnrampWebhookOutcome::AlreadyProcessed)
                }
                Some(existing) => Err(AppError::ConflictOfState(format!(
                    "transaction is {}",
                    existing.status
                ))),
            };
        };

        let Some(micro_amount) = tokens_to_micro(&record.token_amount) else {
            let patch = TransactionPatch::to(TxStatus::Failed)
                .meta("failure_reason", json!("unrepresentable token amount"))
                .meta("requires_manual_settlement", json!(true));
            queries::conditional_update(&self.pool, &reference, TxStatus::Processing, patch)
                .await?;
            return Err(AppError::Internal(
                "unrepresentable token amount".to_string(),
            ));
        };

        let send_result = match record.token {
            TokenKind::Stx => {
                self.wallet
                    .send_stx(&record.recipient_address, micro_amount, &record.reference)
                    .await
            }
            TokenKind::Usdc => {
                self.wallet
                    .send_sip010(
                        &self.config.stacks.usdc_contract_id(),
                        &record.recipient_address,
                        micro_amount,
                        &record.reference,
                    )
                    .await
            }
        };

        match send_result {
            Ok(chain_tx_id) => {
                let patch = TransactionPatch::to(TxStatus::Settling)
                    .chain_tx_id(chain_tx_id.clone());
                let settling = queries::conditional_update(
                    &self.pool,
                    &reference,
                    TxStatus::Processing,
                    patch,
                )
                .await?;

                tracing::info!(
                    reference = %reference,
                    chain_tx_id = %chain_tx_id,
                    "onramp tokens sent"
                );

                tokio::spawn(watcher::watch_onramp_send(
                    Arc::clone(&self.stacks),
                    self.pool.clone(),
                    reference.clone(),
                    chain_tx_id,
                ));

                Ok(OnrampWebhookOutcome::TokensSent(Box::new(
                    settling.unwrap_or(record),
                )))
            }
            Err(err) => {
                let reason = err.to_string();
                let patch = TransactionPatch::to(TxStatus::Failed)
                    .meta("failure_reason", json!(reason.clone()))
                    .meta("requires_manual_settlement", json!(true));
                queries::conditional_update(&self.pool, &reference, TxStatus::Processing, patch)
                    .await?;

                tracing::error!(
                    reference = %reference,
                    recipient = %record.recipient_address,
                    ngn_amount = record.ngn_amount,
                    error = %reason,
                    "token send failed after fiat was received; manual settlement required"
                );

                Err(AppError::Internal(format!("token send failed: {reason}")))
            }
        }
    }
}

/// Gross NGN (ceiled in the platform's favor) plus the flat fee.
pub fn gross_plus_fee_ngn(
    token_amount: &BigDecimal,
    rate_ngn: &BigDecimal,
    fee_ngn: i64,
) -> (BigDecimal, i64) {
    let gross = token_amount * rate_ngn;
    let ceiled = gross
        .with_scale_round(0, bigdecimal::RoundingMode::Ceiling)
        .to_i64()
        .unwrap_or(0);
    (gross, ceiled.saturating_add(fee_ngn))
}

pub fn tokens_to_micro(amount: &BigDecimal) -> Option<u64> {
    (amount * BigDecimal::from(MICRO_UNITS_PER_TOKEN))
        .with_scale_round(0, bigdecimal::RoundingMode::Floor)
        .to_u64()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    fn dec(s: &str) -> BigDecimal {
        BigDecimal::from_str(s).unwrap()
    }

    #[test]
    fn onramp_total_ceils_gross_then_adds_fee() {
        let (gross, total) = gross_plus_fee_ngn(&dec("100"), &dec("1847.35"), 100);
        assert_eq!(gross, dec("184735.00"));
        assert_eq!(total, 184_835);

        let (_, total) = gross_plus_fee_ngn(&dec("1.5"), &dec("1847.33"), 100);
        // ceil(2770.995) + 100
        assert_eq!(total, 2_871);
    }

    #[test]
    fn converts_tokens_to_micro_units() {
        assert_eq!(tokens_to_micro(&dec("100")), Some(100_000_000));
        assert_eq!(tokens_to_micro(&dec("1.5")), Some(1_500_000));
        assert_eq!(tokens_to_micro(&dec("0.000001")), Some(1));
        assert_eq!(tokens_to_micro(&dec("-1")), None);
    }
}
