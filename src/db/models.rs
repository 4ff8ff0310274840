use bigdecimal::BigDecimal;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use serde_json::json;
use sqlx::FromRow;
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

use crate::utils::reference;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "token_kind", rename_all = "UPPERCASE")]
#[serde(rename_all = "UPPERCASE")]
pub enum TokenKind {
    Stx,
    Usdc,
}

impl TokenKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            TokenKind::Stx => "STX",
            TokenKind::Usdc => "USDC",
        }
    }
}

impl fmt::Display for TokenKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TokenKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "STX" => Ok(TokenKind::Stx),
            "USDC" => Ok(TokenKind::Usdc),
            other => Err(format!("unsupported token: {other}")),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "tx_direction", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    Onramp,
    Offramp,
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Direction::Onramp => f.write_str("onramp"),
            Direction::Offramp => f.write_str("offramp"),
        }
    }
}

impl FromStr for Direction {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "onramp" => Ok(Direction::Onramp),
            "offramp" => Ok(Direction::Offramp),
            other => Err(format!("unsupported direction: {other}")),
        }
    }
}

/// Swap lifecycle. Transitions are restricted; every edge is enforced by a
/// conditional update keyed on the prior status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "tx_status", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum TxStatus {
    Pending,
    Processing,
    Settling,
    Confirmed,
    Failed,
}

impl TxStatus {
    pub fn can_transition_to(self, next: TxStatus) -> bool {
        use TxStatus::*;
        matches!(
            (self, next),
            (Pending, Processing)
                | (Pending, Failed)
                | (Processing, Settling)
                | (Processing, Failed)
                | (Settling, Confirmed)
                | (Settling, Failed)
        )
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, TxStatus::Confirmed | TxStatus::Failed)
    }

    /// Statuses that imply the chain deposit has already been claimed.
    pub fn has_receipt(self) -> bool {
        matches!(
            self,
            TxStatus::Processing | TxStatus::Settling | TxStatus::Confirmed
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            TxStatus::Pending => "pending",
            TxStatus::Processing => "processing",
            TxStatus::Settling => "settling",
            TxStatus::Confirmed => "confirmed",
            TxStatus::Failed => "failed",
        }
    }
}

impl fmt::Display for TxStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TxStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "pending" => Ok(TxStatus::Pending),
            "processing" => Ok(TxStatus::Processing),
            "settling" => Ok(TxStatus::Settling),
            "confirmed" => Ok(TxStatus::Confirmed),
            "failed" => Ok(TxStatus::Failed),
            other => Err(format!("unsupported status: {other}")),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BankDetails {
    pub bank_code: String,
    pub account_number: String,
    pub account_name: String,
    pub bank_name: Option<String>,
}

#[derive(Debug, Clone, FromRow, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Transaction {
    pub id: Uuid,
    pub reference: String,
    pub token: TokenKind,
    pub direction: Direction,
    pub token_amount: BigDecimal,
    pub ngn_amount: i64,
    pub fee_ngn: i64,
    pub rate_at_time: BigDecimal,
    pub sender_address: String,
    pub recipient_address: String,
    pub chain_tx_id: Option<String>,
    pub payout_provider_tx_id: Option<String>,
    pub provider_reference: Option<String>,
    pub status: TxStatus,
    pub bank_code: Option<String>,
    pub account_number: Option<String>,
    pub account_name: Option<String>,
    pub bank_name: Option<String>,
    pub expires_at: Option<DateTime<Utc>>,
    pub meta: serde_json::Value,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub confirmed_at: Option<DateTime<Utc>>,
}

impl Transaction {
    #[allow(clippy::too_many_arguments)]
    pub fn new_offramp(
        token: TokenKind,
        token_amount: BigDecimal,
        ngn_amount: i64,
        fee_ngn: i64,
        rate_at_time: BigDecimal,
        sender_address: String,
        deposit_address: String,
        bank: BankDetails,
        expiry_minutes: i64,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            reference: reference::offramp_reference(),
            token,
            direction: Direction::Offramp,
            token_amount,
            ngn_amount,
            fee_ngn,
            rate_at_time,
            sender_address,
            recipient_address: deposit_address,
            chain_tx_id: None,
            payout_provider_tx_id: None,
            provider_reference: None,
            status: TxStatus::Pending,
            bank_code: Some(bank.bank_code),
            account_number: Some(bank.account_number),
            account_name: Some(bank.account_name),
            bank_name: bank.bank_name,
            expires_at: Some(now + Duration::minutes(expiry_minutes)),
            meta: json!({}),
            created_at: now,
            updated_at: now,
            confirmed_at: None,
        }
    }

    pub fn new_onramp(
        token: TokenKind,
        token_amount: BigDecimal,
        ngn_amount: i64,
        fee_ngn: i64,
        rate_at_time: BigDecimal,
        sender_address: String,
        recipient_address: String,
        expiry_minutes: i64,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            reference: reference::onramp_reference(),
            token,
            direction: Direction::Onramp,
            token_amount,
            ngn_amount,
            fee_ngn,
            rate_at_time,
            sender_address,
            recipient_address,
            chain_tx_id: None,
            payout_provider_tx_id: None,
            provider_reference: None,
            status: TxStatus::Pending,
            bank_code: None,
            account_number: None,
            account_name: None,
            bank_name: None,
            expires_at: Some(now + Duration::minutes(expiry_minutes)),
            meta: json!({}),
            created_at: now,
            updated_at: now,
            confirmed_at: None,
        }
    }
}

/// Mutation applied by a conditional status transition. Set-once fields
/// (`chain_tx_id`, payout ids) are only filled when still null; `meta` is
/// merged into the existing document.
#[derive(Debug, Clone)]
pub struct TransactionPatch {
    pub status: TxStatus,
    pub chain_tx_id: Option<String>,
    pub payout_provider_tx_id: Option<String>,
    pub provider_reference: Option<String>,
    pub confirmed_at: Option<DateTime<Utc>>,
    pub meta: serde_json::Value,
}

impl TransactionPatch {
    pub fn to(status: TxStatus) -> Self {
        Self {
            status,
            chain_tx_id: None,
            payout_provider_tx_id: None,
            provider_reference: None,
            confirmed_at: None,
            meta: json!({}),
        }
    }

    pub fn chain_tx_id(mut self, chain_tx_id: impl Into<String>) -> Self {
        self.chain_tx_id = Some(chain_tx_id.into());
        self
    }

    pub fn payout(
        mut self,
        transfer_id: impl Into<String>,
        provider_reference: Option<String>,
    ) -> Self {
        self.payout_provider_tx_id = Some(transfer_id.into());
        self.provider_reference = provider_reference;
        self
    }

    pub fn confirmed_now(mut self) -> Self {
        self.confirmed_at = Some(Utc::now());
        self
    }

    pub fn meta(mut self, key: &str, value: serde_json::Value) -> Self {
        self.meta[key] = value;
        self
    }
}

#[derive(Debug, Clone, FromRow, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PriceSnapshot {
    pub id: Uuid,
    pub token: TokenKind,
    pub price_usd: BigDecimal,
    pub price_ngn: BigDecimal,
    pub usd_to_ngn: BigDecimal,
    pub fetched_at: DateTime<Utc>,
}

#[derive(Debug, Clone, FromRow, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TokenStats {
    pub token: TokenKind,
    pub count: i64,
    pub total_token_amount: BigDecimal,
    pub total_ngn: i64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_machine_allows_only_specified_edges() {
        use TxStatus::*;

        assert!(Pending.can_transition_to(Processing));
        assert!(Pending.can_transition_to(Failed));
        assert!(Processing.can_transition_to(Settling));
        assert!(Processing.can_transition_to(Failed));
        assert!(Settling.can_transition_to(Confirmed));
        assert!(Settling.can_transition_to(Failed));

        assert!(!Pending.can_transition_to(Settling));
        assert!(!Pending.can_transition_to(Confirmed));
        assert!(!Processing.can_transition_to(Confirmed));
        assert!(!Processing.can_transition_to(Pending));
        assert!(!Settling.can_transition_to(Processing));
        assert!(!Confirmed.can_transition_to(Failed));
        assert!(!Failed.can_transition_to(Pending));
        assert!(!Failed.can_transition_to(Processing));
    }

    #[test]
    fn receipt_statuses() {
        assert!(!TxStatus::Pending.has_receipt());
        assert!(TxStatus::Processing.has_receipt());
        assert!(TxStatus::Settling.has_receipt());
        assert!(TxStatus::Confirmed.has_receipt());
        assert!(!TxStatus::Failed.has_receipt());
    }

    #[test]
    fn enums_serialize_to_wire_names() {
        assert_eq!(serde_json::to_string(&TokenKind::Stx).unwrap(), "\"STX\"");
        assert_eq!(serde_json::to_string(&TokenKind::Usdc).unwrap(), "\"USDC\"");
        assert_eq!(
            serde_json::to_string(&Direction::Offramp).unwrap(),
            "\"offramp\""
        );
        assert_eq!(
            serde_json::to_string(&TxStatus::Settling).unwrap(),
            "\"settling\""
        );
    }

    #[test]
    fn token_parses_case_insensitively() {
        assert_eq!("stx".parse::<TokenKind>().unwrap(), TokenKind::Stx);
        assert_eq!("USDC".parse::<TokenKind>().unwrap(), TokenKind::Usdc);
        assert!("DOGE".parse::<TokenKind>().is_err());
    }

    #[test]
    fn new_offramp_record_is_pending_with_expiry() {
        let bank = BankDetails {
            bank_code: "058".to_string(),
            account_number: "0123456789".to_string(),
            account_name: "ADA OBI".to_string(),
            bank_name: Some("GTBank".to_string()),
        };
        let tx = Transaction::new_offramp(
            TokenKind::Stx,
            BigDecimal::from(100),
            184_635,
            100,
            BigDecimal::from(1847),
            "SP2J6ZY48GV1EZ5V2V5RB9MP66SW86PYKKNRV9EJ7".to_string(),
            "SP000000000000000000002Q6VF78".to_string(),
            bank,
            30,
        );

        assert_eq!(tx.status, TxStatus::Pending);
        assert_eq!(tx.direction, Direction::Offramp);
        assert!(tx.reference.starts_with("SSWAP_OFFRAMP_"));
        assert!(tx.expires_at.unwrap() > tx.created_at);
        assert!(tx.chain_tx_id.is_none());
    }

    #[test]
    fn transaction_serializes_camel_case() {
        let tx = Transaction::new_onramp(
            TokenKind::Usdc,
            BigDecimal::from(50),
            80_000,
            100,
            BigDecimal::from(1600),
            "SP000000000000000000002Q6VF78".to_string(),
            "SP2J6ZY48GV1EZ5V2V5RB9MP66SW86PYKKNRV9EJ7".to_string(),
            30,
        );
        let value = serde_json::to_value(&tx).unwrap();

        assert!(value.get("tokenAmount").is_some());
        assert!(value.get("ngnAmount").is_some());
        assert!(value.get("senderAddress").is_some());
        assert!(value.get("token_amount").is_none());
    }

    #[test]
    fn patch_builder_accumulates_meta() {
        let patch = TransactionPatch::to(TxStatus::Processing)
            .chain_tx_id("0xabc")
            .meta("confirmation_source", json!("indexer"))
            .meta("token_received_at", json!("2026-08-02T00:00:00Z"));

        assert_eq!(patch.status, TxStatus::Processing);
        assert_eq!(patch.chain_tx_id.as_deref(), Some("0xabc"));
        assert_eq!(patch.meta["confirmation_source"], json!("indexer"));
        assert_eq!(patch.meta["token_received_at"], json!("2026-08-02T00:00:00Z"));
    }
}
