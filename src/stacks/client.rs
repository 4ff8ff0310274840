use bigdecimal::BigDecimal;
use reqwest::Client;
use serde::Deserialize;
use thiserror::Error;

/// Token amounts on chain are 6-decimal micro-units.
pub const MICRO_UNITS_PER_TOKEN: u64 = 1_000_000;

#[derive(Error, Debug)]
pub enum StacksError {
    #[error("HTTP request failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("Transaction not found: {0}")]
    NotFound(String),
    #[error("Stacks API returned status {0}")]
    Upstream(u16),
    #[error("Invalid response from Stacks API: {0}")]
    InvalidResponse(String),
}

/// `tx_status` values of the extended API. Unknown values are preserved so
/// new dropped/abort reasons degrade to polling rather than a parse error.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(from = "String")]
pub enum ChainTxStatus {
    Success,
    Pending,
    AbortByResponse,
    AbortByPostCondition,
    DroppedReplaceByFee,
    DroppedTooExpensive,
    Other(String),
}

impl From<String> for ChainTxStatus {
    fn from(raw: String) -> Self {
        match raw.as_str() {
            "success" => ChainTxStatus::Success,
            "pending" => ChainTxStatus::Pending,
            "abort_by_response" => ChainTxStatus::AbortByResponse,
            "abort_by_post_condition" => ChainTxStatus::AbortByPostCondition,
            "dropped_replace_by_fee" => ChainTxStatus::DroppedReplaceByFee,
            "dropped_too_expensive" => ChainTxStatus::DroppedTooExpensive,
            _ => ChainTxStatus::Other(raw),
        }
    }
}

impl ChainTxStatus {
    pub fn is_abort(&self) -> bool {
        match self {
            ChainTxStatus::AbortByResponse | ChainTxStatus::AbortByPostCondition => true,
            ChainTxStatus::Other(raw) => raw.starts_with("abort_"),
            _ => false,
        }
    }

    /// Dropped from the mempool; the sender may still rebroadcast.
    pub fn is_dropped(&self) -> bool {
        match self {
            ChainTxStatus::DroppedReplaceByFee | ChainTxStatus::DroppedTooExpensive => true,
            ChainTxStatus::Other(raw) => raw.starts_with("dropped_"),
            _ => false,
        }
    }

    pub fn reason(&self) -> &str {
        match self {
            ChainTxStatus::Success => "success",
            ChainTxStatus::Pending => "pending",
            ChainTxStatus::AbortByResponse => "abort_by_response",
            ChainTxStatus::AbortByPostCondition => "abort_by_post_condition",
            ChainTxStatus::DroppedReplaceByFee => "dropped_replace_by_fee",
            ChainTxStatus::DroppedTooExpensive => "dropped_too_expensive",
            ChainTxStatus::Other(raw) => raw,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct TokenTransferPayload {
    pub recipient_address: String,
    pub amount: String,
    /// Hex-encoded 34-byte null-padded buffer.
    pub memo: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct FunctionArg {
    pub repr: String,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(rename = "type", default)]
    pub arg_type: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ContractCallPayload {
    pub contract_id: String,
    pub function_name: String,
    #[serde(default)]
    pub function_args: Vec<FunctionArg>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct FtAssetEvent {
    pub asset_id: String,
    #[serde(default)]
    pub sender: Option<String>,
    #[serde(default)]
    pub recipient: Option<String>,
    #[serde(default)]
    pub amount: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TxEvent {
    pub event_type: String,
    #[serde(default)]
    pub asset: Option<FtAssetEvent>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ApiTransaction {
    pub tx_id: String,
    pub tx_status: ChainTxStatus,
    pub tx_type: String,
    pub sender_address: String,
    #[serde(default)]
    pub block_height: Option<u64>,
    #[serde(default)]
    pub token_transfer: Option<TokenTransferPayload>,
    #[serde(default)]
    pub contract_call: Option<ContractCallPayload>,
    #[serde(default)]
    pub events: Vec<TxEvent>,
    #[serde(default)]
    pub event_count: Option<u32>,
}

impl ApiTransaction {
    pub fn is_success(&self) -> bool {
        self.tx_status == ChainTxStatus::Success
    }

    /// The native STX transfer payload, if this tx pays the given recipient.
    pub fn native_transfer_to(&self, recipient: &str) -> Option<&TokenTransferPayload> {
        self.token_transfer
            .as_ref()
            .filter(|t| t.recipient_address == recipient)
    }

    /// Memo of a SIP-010 `transfer(amount, from, to, memo)` call, decoded
    /// from the fourth argument.
    pub fn sip010_memo(&self) -> Option<String> {
        let call = self.contract_call.as_ref()?;
        if call.function_name != "transfer" {
            return None;
        }
        let arg = call.function_args.get(3)?;
        memo_from_repr(&arg.repr)
    }

    /// Sum of fungible-token amounts transferred to `recipient` for assets
    /// under the given contract id.
    pub fn sip010_amount_to(&self, asset_id_prefix: &str, recipient: &str) -> u64 {
        self.events
            .iter()
            .filter(|e| e.event_type == "fungible_token_asset")
            .filter_map(|e| e.asset.as_ref())
            .filter(|a| a.asset_id.starts_with(asset_id_prefix))
            .filter(|a| a.recipient.as_deref() == Some(recipient))
            .filter_map(|a| a.amount.as_deref()?.parse::<u64>().ok())
            .sum()
    }
}

/// Decodes a hex memo to UTF-8, stripping the null padding of the fixed
/// 34-byte buffer. A valid reference must never be rejected for trailing
/// nulls.
pub fn decode_memo(raw: &str) -> Option<String> {
    let raw = raw.strip_prefix("0x").unwrap_or(raw);
    if raw.is_empty() {
        return None;
    }
    let bytes = hex::decode(raw).ok()?;
    let trimmed: Vec<u8> = bytes.into_iter().take_while(|b| *b != 0).collect();
    let memo = String::from_utf8(trimmed).ok()?;
    if memo.is_empty() {
        None
    } else {
        Some(memo)
    }
}

/// Extracts a memo from a Clarity value repr such as `(some 0x5353…)`.
pub fn memo_from_repr(repr: &str) -> Option<String> {
    let start = repr.find("0x")?;
    let hex_part: String = repr[start + 2..]
        .chars()
        .take_while(|c| c.is_ascii_hexdigit())
        .collect();
    decode_memo(&hex_part)
}

pub fn micro_to_tokens(raw: u64) -> BigDecimal {
    BigDecimal::from(raw) / BigDecimal::from(MICRO_UNITS_PER_TOKEN)
}

#[derive(Debug, Deserialize)]
struct AddressTransactionsResponse {
    #[serde(default)]
    results: Vec<ApiTransaction>,
}

#[derive(Debug, Deserialize)]
struct CoreInfoResponse {
    stacks_tip_height: u64,
}

/// Read-side client for the Stacks blockchain REST API.
#[derive(Clone)]
pub struct StacksClient {
    client: Client,
    base_url: String,
}

impl StacksClient {
    pub fn new(base_url: String) -> Self {
        let client = Client::builder()
            .timeout(std::time::Duration::from_secs(15))
            .build()
            .unwrap_or_default();

        StacksClient { client, base_url }
    }

    /// Recent transactions involving a principal, most recent first.
    pub async fn get_address_transactions(
        &self,
        principal: &str,
        limit: u32,
        offset: u32,
    ) -> Result<Vec<ApiTransaction>, StacksError> {
        let url = format!(
            "{}/extended/v1/address/{}/transactions",
            self.base_url.trim_end_matches('/'),
            principal
        );

        let response = self
            .client
            .get(&url)
            .query(&[("limit", limit), ("offset", offset)])
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(StacksError::Upstream(response.status().as_u16()));
        }

        let body = response.json::<AddressTransactionsResponse>().await?;
        Ok(body.results)
    }

    pub async fn get_transaction(&self, tx_id: &str) -> Result<ApiTransaction, StacksError> {
        let url = format!(
            "{}/extended/v1/tx/{}",
            self.base_url.trim_end_matches('/'),
            tx_id
        );

        let response = self.client.get(&url).send().await?;

        if response.status() == 404 {
            return Err(StacksError::NotFound(tx_id.to_string()));
        }
        if !response.status().is_success() {
            return Err(StacksError::Upstream(response.status().as_u16()));
        }

        let tx = response.json::<ApiTransaction>().await?;
        Ok(tx)
    }

    /// Current canonical chain height; used for confirmation depth checks.
    pub async fn get_tip_height(&self) -> Result<u64, StacksError> {
        let url = format!("{}/v2/info", self.base_url.trim_end_matches('/'));

        let response = self.client.get(&url).send().await?;
        if !response.status().is_success() {
            return Err(StacksError::Upstream(response.status().as_u16()));
        }

        let info = response.json::<CoreInfoResponse>().await?;
        Ok(info.stacks_tip_height)
    }
}
