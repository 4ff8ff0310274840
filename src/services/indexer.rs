use bigdecimal::BigDecimal;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

use crate::config::StacksConfig;
use crate::db::models::TokenKind;
use crate::db::queries;
use crate::error::AppError;
use crate::services::settlement::{ConfirmReceipt, ConfirmationSource, SettlementEngine};
use crate::stacks::client::{decode_memo, micro_to_tokens};
use crate::stacks::{ApiTransaction, StacksClient, StacksError};
use crate::utils::reference;

#[derive(Debug, Clone, PartialEq)]
pub(crate) struct IndexedDeposit {
    pub reference: String,
    pub token: TokenKind,
    pub amount: BigDecimal,
    pub sender: String,
}

/// Singleton scanner over the platform deposit address. Catches deposits
/// whose notify-tx call never arrived (closed tab, crashed watcher). The
/// processed set is memory-only: confirm-receipt is idempotent, so
/// re-scanning everything after a restart is safe.
pub struct ChainIndexer {
    engine: Arc<SettlementEngine>,
    stacks: Arc<StacksClient>,
    platform_address: String,
    usdc_contract_id: String,
    poll_interval: Duration,
    page_limit: u32,
    min_confirmations: u32,
    processed: HashSet<String>,
}

impl ChainIndexer {
    pub fn new(
        engine: Arc<SettlementEngine>,
        stacks: Arc<StacksClient>,
        config: &StacksConfig,
        platform_address: String,
    ) -> Self {
        Self {
            engine,
            stacks,
            platform_address,
            usdc_contract_id: config.usdc_contract_id(),
            poll_interval: Duration::from_millis(config.indexer_poll_interval_ms.max(1_000)),
            page_limit: config.indexer_page_limit,
            min_confirmations: config.min_confirmations,
            processed: HashSet::new(),
        }
    }

    pub async fn run(mut self, cancel: CancellationToken) {
        tracing::info!(
            platform = %self.platform_address,
            poll_interval_ms = self.poll_interval.as_millis() as u64,
            "chain indexer started"
        );

        let mut ticker = tokio::time::interval(self.poll_interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    tracing::info!("chain indexer shutting down");
                    return;
                }
                _ = ticker.tick() => {
                    self.cycle().await;
                }
            }
        }
    }

    async fn cycle(&mut self) {
        let tip = if self.min_confirmations > 1 {
            self.stacks.get_tip_height().await.ok()
        } else {
            None
        };

        let mut candidates = Vec::new();
        for principal in [self.platform_address.clone(), self.usdc_contract_id.clone()] {
            match self
                .stacks
                .get_address_transactions(&principal, self.page_limit, 0)
                .await
            {
                Ok(mut txs) => candidates.append(&mut txs),
                Err(err) => {
                    tracing::warn!(principal = %principal, error = %err, "address scan failed");
                }
            }
        }

        for tx in candidates {
            if !tx.is_success() || self.processed.contains(&tx.tx_id) {
                continue;
            }
            if self.min_confirmations > 1 {
                let deep_enough = match (tip, tx.block_height) {
                    (Some(tip), Some(height)) => {
                        tip.saturating_sub(height) + 1 >= u64::from(self.min_confirmations)
                    }
                    _ => false,
                };
                if !deep_enough {
                    continue;
                }
            }
            self.process_tx(tx).await;
        }

        self.sweep_expired().await;
    }

    async fn process_tx(&mut self, tx: ApiTransaction) {
        let deposit = match self.extract(&tx).await {
            Ok(Some(deposit)) => deposit,
            Ok(None) => {
                // Definitively not an offramp deposit; never look again.
                self.processed.insert(tx.tx_id);
                return;
            }
            Err(err) => {
                tracing::warn!(tx_id = %tx.tx_id, error = %err, "event lookup failed, will retry");
                return;
            }
        };

        let receipt = ConfirmReceipt {
            reference: deposit.reference.clone(),
            chain_tx_id: tx.tx_id.clone(),
            token: deposit.token,
            token_amount: deposit.amount.clone(),
            sender_address: deposit.sender.clone(),
            source: ConfirmationSource::Indexer,
        };

        match self.engine.confirm_receipt(receipt).await {
            Ok(_) => {
                tracing::info!(
                    reference = %deposit.reference,
                    tx_id = %tx.tx_id,
                    token = %deposit.token,
                    amount = %deposit.amount,
                    "indexer handed deposit to settlement"
                );
                self.processed.insert(tx.tx_id);
            }
            Err(AppError::NotFound(_)) => {
                // Initialization race: the record may not be persisted yet.
                tracing::debug!(
                    reference = %deposit.reference,
                    tx_id = %tx.tx_id,
                    "no record for deposit yet, retrying next cycle"
                );
            }
            Err(err) => {
                tracing::warn!(
                    reference = %deposit.reference,
                    tx_id = %tx.tx_id,
                    error = %err,
                    "confirm-receipt failed, will retry"
                );
            }
        }
    }

    /// `Ok(None)` means definitively not ours; errors are transient and
    /// leave the tx unprocessed for the next cycle.
    async fn extract(&self, tx: &ApiTransaction) -> Result<Option<IndexedDeposit>, StacksError> {
        if tx.token_transfer.is_some() {
            return Ok(native_deposit(&self.platform_address, tx));
        }

        let Some(call) = tx.contract_call.as_ref() else {
            return Ok(None);
        };
        if call.function_name != "transfer" {
            return Ok(None);
        }

        // Address listings omit events; fetch the full tx when needed.
        let fetched;
        let tx = if tx.events.is_empty() && tx.event_count.unwrap_or(1) > 0 {
            fetched = self.stacks.get_transaction(&tx.tx_id).await?;
            &fetched
        } else {
            tx
        };

        Ok(sip010_deposit(
            &self.platform_address,
            &self.usdc_contract_id,
            tx,
        ))
    }

    async fn sweep_expired(&self) {
        match queries::fail_expired_offramps(self.engine.pool()).await {
            Ok(expired) => {
                for record in &expired {
                    tracing::info!(
                        reference = %record.reference,
                        "offramp expired with no deposit"
                    );
                }
            }
            Err(err) => {
                tracing::warn!(error = %err, "expiry sweep failed");
            }
        }
    }
}

/// Native STX deposit: a `token_transfer` to the platform whose memo is an
/// offramp reference.
pub(crate) fn native_deposit(
    platform_address: &str,
    tx: &ApiTransaction,
) -> Option<IndexedDeposit> {
    let transfer = tx.native_transfer_to(platform_address)?;
    let memo = decode_memo(&transfer.memo)?;
    if !reference::is_offramp_reference(&memo) {
        return None;
    }
    let raw = transfer.amount.parse::<u64>().ok()?;
    Some(IndexedDeposit {
        reference: memo,
        token: TokenKind::Stx,
        amount: micro_to_tokens(raw),
        sender: tx.sender_address.clone(),
    })
}

/// SIP-010 deposit: a `transfer` call with at least one fungible-token
/// event paying the platform under the USDC contract, memo in the fourth
/// argument.
pub(crate) fn sip010_deposit(
    platform_address: &str,
    usdc_contract_id: &str,
    tx: &ApiTransaction,
) -> Option<IndexedDeposit> {
    let raw = tx.sip010_amount_to(usdc_contract_id, platform_address);
    if raw == 0 {
        return None;
    }
    let memo = tx.sip010_memo()?;
    if !reference::is_offramp_reference(&memo) {
        return None;
    }
    Some(IndexedDeposit {
        reference: memo,
        token: TokenKind::Usdc,
        amount: micro_to_tokens(raw),
        sender: tx.sender_address.clone(),
    })
}
