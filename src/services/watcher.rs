use bigdecimal::BigDecimal;
use serde_json::json;
use sqlx::PgPool;
use std::sync::Arc;
use std::time::Duration;

use crate::db::models::{TokenKind, TransactionPatch, TxStatus};
use crate::db::queries;
use crate::services::settlement::{
    ConfirmReceipt, ConfirmationSource, SettlementEngine,
};
use crate::stacks::client::micro_to_tokens;
use crate::stacks::{ApiTransaction, ChainTxStatus, StacksClient, StacksError};

const MAX_ATTEMPTS: u32 = 120;
const POLL_INTERVAL: Duration = Duration::from_secs(5);

/// Fire-and-forget poller for the specific tx the user reported. Races
/// the indexer to claim the deposit; whichever loses observes the updated
/// status and exits. Not restarted after a crash: the indexer catches up.
pub async fn watch_offramp(engine: Arc<SettlementEngine>, reference: String, chain_tx_id: String) {
    let min_confirmations = engine.config.stacks.min_confirmations;

    for attempt in 1..=MAX_ATTEMPTS {
        match engine.stacks.get_transaction(&chain_tx_id).await {
            Ok(tx) => match &tx.tx_status {
                ChainTxStatus::Success => {
                    if !confirmed_enough(&engine.stacks, &tx, min_confirmations).await {
                        tokio::time::sleep(POLL_INTERVAL).await;
                        continue;
                    }
                    handle_success(&engine, &reference, &chain_tx_id, &tx, attempt).await;
                    return;
                }
                status if status.is_abort() => {
                    let patch = TransactionPatch::to(TxStatus::Failed).meta(
                        "failure_reason",
                        json!(format!("transaction {}", status.reason())),
                    );
                    match queries::conditional_update(
                        &engine.pool,
                        &reference,
                        TxStatus::Pending,
                        patch,
                    )
                    .await
                    {
                        Ok(Some(_)) => {
                            tracing::info!(reference, chain_tx_id, reason = status.reason(), "offramp tx aborted on chain");
                        }
                        Ok(None) => {}
                        Err(err) => {
                            tracing::warn!(reference, error = %err, "failed to record abort");
                        }
                    }
                    return;
                }
                status if status.is_dropped() => {
                    // May be rebroadcast with a higher fee; keep polling.
                    tracing::debug!(reference, chain_tx_id, reason = status.reason(), "tx dropped from mempool");
                }
                _ => {}
            },
            Err(StacksError::NotFound(_)) => {
                // Not yet visible to the API; keep polling.
            }
            Err(err) => {
                tracing::debug!(reference, chain_tx_id, error = %err, "chain poll failed");
            }
        }

        tokio::time::sleep(POLL_INTERVAL).await;
    }

    // Exhausted: conditionally fail, leaving non-pending records untouched.
    let patch = TransactionPatch::to(TxStatus::Failed).meta("failure_reason", json!("poll timeout"));
    match queries::conditional_update(&engine.pool, &reference, TxStatus::Pending, patch).await {
        Ok(Some(_)) => {
            tracing::warn!(reference, chain_tx_id, "watcher timed out waiting for confirmation");
        }
        Ok(None) => {}
        Err(err) => {
            tracing::warn!(reference, error = %err, "failed to record poll timeout");
        }
    }
}

async fn handle_success(
    engine: &Arc<SettlementEngine>,
    reference: &str,
    chain_tx_id: &str,
    tx: &ApiTransaction,
    attempt: u32,
) {
    let record = match queries::find_by_reference(&engine.pool, reference).await {
        Ok(Some(record)) => record,
        Ok(None) => {
            tracing::warn!(reference, "watched record disappeared");
            return;
        }
        Err(err) => {
            tracing::warn!(reference, error = %err, "failed to re-read record");
            return;
        }
    };

    // The indexer (or a concurrent watcher) may already have claimed it.
    if record.status.has_receipt() {
        tracing::debug!(reference, status = %record.status, "deposit already claimed, watcher exiting");
        return;
    }
    if record.status != TxStatus::Pending {
        tracing::debug!(reference, status = %record.status, "record is terminal, watcher exiting");
        return;
    }

    let platform = engine
        .config
        .stacks
        .platform_address
        .clone()
        .unwrap_or_default();
    let usdc_contract_id = engine.config.stacks.usdc_contract_id();

    let (token, token_amount) = match derive_deposit(&platform, &usdc_contract_id, tx) {
        Some(found) => found,
        None => {
            tracing::warn!(
                reference,
                chain_tx_id,
                "could not derive deposit from tx events, using recorded amount"
            );
            (record.token, record.token_amount.clone())
        }
    };

    let receipt = ConfirmReceipt {
        reference: reference.to_string(),
        chain_tx_id: chain_tx_id.to_string(),
        token,
        token_amount,
        sender_address: tx.sender_address.clone(),
        source: ConfirmationSource::Watcher,
    };

    match engine.confirm_receipt(receipt).await {
        Ok(_) => {
            tracing::info!(reference, chain_tx_id, attempt, "watcher confirmed deposit");
        }
        Err(err) => {
            tracing::warn!(reference, chain_tx_id, error = %err, "watcher confirm-receipt failed");
        }
    }
}

/// What the success payload says was deposited to the platform address.
pub(crate) fn derive_deposit(
    platform_address: &str,
    usdc_contract_id: &str,
    tx: &ApiTransaction,
) -> Option<(TokenKind, BigDecimal)> {
    if let Some(transfer) = tx.native_transfer_to(platform_address) {
        if let Ok(raw) = transfer.amount.parse::<u64>() {
            return Some((TokenKind::Stx, micro_to_tokens(raw)));
        }
    }

    let raw = tx.sip010_amount_to(usdc_contract_id, platform_address);
    if raw > 0 {
        return Some((TokenKind::Usdc, micro_to_tokens(raw)));
    }

    None
}

async fn confirmed_enough(
    stacks: &StacksClient,
    tx: &ApiTransaction,
    min_confirmations: u32,
) -> bool {
    if min_confirmations <= 1 {
        return true;
    }
    let Some(height) = tx.block_height else {
        return false;
    };
    match stacks.get_tip_height().await {
        Ok(tip) => tip.saturating_sub(height) + 1 >= u64::from(min_confirmations),
        Err(err) => {
            tracing::debug!(error = %err, "tip height unavailable for depth check");
            false
        }
    }
}

/// Onramp counterpart: polls the platform's own outbound send and
/// finalizes `settling -> confirmed` (or `failed` on abort). No payout is
/// involved; a timeout leaves the record settling for manual review.
pub async fn watch_onramp_send(
    stacks: Arc<StacksClient>,
    pool: PgPool,
    reference: String,
    chain_tx_id: String,
) {
    for _ in 1..=MAX_ATTEMPTS {
        match stacks.get_transaction(&chain_tx_id).await {
            Ok(tx) => match &tx.tx_status {
                ChainTxStatus::Success => {
                    let patch = TransactionPatch::to(TxStatus::Confirmed).confirmed_now();
                    match queries::conditional_update(&pool, &reference, TxStatus::Settling, patch)
                        .await
                    {
                        Ok(Some(_)) => {
                            tracing::info!(reference, chain_tx_id, "onramp send confirmed");
                        }
                        Ok(None) => {
                            tracing::debug!(reference, "onramp record not settling, watcher exiting");
                        }
                        Err(err) => {
                            tracing::warn!(reference, error = %err, "failed to confirm onramp send");
                        }
                    }
                    return;
                }
                status if status.is_abort() => {
                    let patch = TransactionPatch::to(TxStatus::Failed)
                        .meta(
                            "failure_reason",
                            json!(format!("send {}", status.reason())),
                        )
                        .meta("requires_manual_settlement", json!(true));
                    let _ = queries::conditional_update(
                        &pool,
                        &reference,
                        TxStatus::Settling,
                        patch,
                    )
                    .await;
                    tracing::error!(
                        reference,
                        chain_tx_id,
                        reason = status.reason(),
                        "onramp send aborted after fiat was received; manual settlement required"
                    );
                    return;
                }
                _ => {}
            },
            Err(StacksError::NotFound(_)) => {}
            Err(err) => {
                tracing::debug!(reference, error = %err, "chain poll failed");
            }
        }

        tokio::time::sleep(POLL_INTERVAL).await;
    }

    tracing::warn!(
        reference,
        chain_tx_id,
        "onramp send watcher timed out; record left settling for manual review"
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn hex_memo(memo: &str) -> String {
        let mut bytes = memo.as_bytes().to_vec();
        bytes.resize(34, 0);
        format!("0x{}", hex::encode(bytes))
    }

    #[test]
    fn derives_native_stx_deposit() {
        let tx: ApiTransaction = serde_json::from_value(json!({
            "tx_id": "0xaaa",
            "tx_status": "success",
            "tx_type": "token_transfer",
            "sender_address": "SP2SENDER",
            "token_transfer": {
                "recipient_address": "SPPLATFORM",
                "amount": "100000000",
                "memo": hex_memo("SSWAP_OFFRAMP_x_deadbeef")
            }
        }))
        .unwrap();

        let (token, amount) =
            derive_deposit("SPPLATFORM", "SP3Y.token-aeusdc", &tx).unwrap();
        assert_eq!(token, TokenKind::Stx);
        assert_eq!(amount, BigDecimal::from(100));
    }

    #[test]
    fn derives_usdc_deposit_from_events() {
        let tx: ApiTransaction = serde_json::from_value(json!({
            "tx_id": "0xbbb",
            "tx_status": "success",
            "tx_type": "contract_call",
            "sender_address": "SP2SENDER",
            "contract_call": {
                "contract_id": "SP3Y.token-aeusdc",
                "function_name": "transfer",
                "function_args": []
            },
            "events": [
                {"event_type": "fungible_token_asset",
                 "asset": {"asset_id": "SP3Y.token-aeusdc::aeusdc",
                            "recipient": "SPPLATFORM", "amount": "25000000"}}
            ]
        }))
        .unwrap();

        let (token, amount) =
            derive_deposit("SPPLATFORM", "SP3Y.token-aeusdc", &tx).unwrap();
        assert_eq!(token, TokenKind::Usdc);
        assert_eq!(amount, BigDecimal::from(25));
    }

    #[test]
    fn returns_none_for_unrelated_tx() {
        let tx: ApiTransaction = serde_json::from_value(json!({
            "tx_id": "0xccc",
            "tx_status": "success",
            "tx_type": "token_transfer",
            "sender_address": "SP2SENDER",
            "token_transfer": {
                "recipient_address": "SPSOMEONEELSE",
                "amount": "100000000",
                "memo": hex_memo("rent")
            }
        }))
        .unwrap();

        assert!(derive_deposit("SPPLATFORM", "SP3Y.token-aeusdc", &tx).is_none());
    }
}
