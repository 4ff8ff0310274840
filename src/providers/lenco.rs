use bigdecimal::{BigDecimal, ToPrimitive};
use hmac::{Hmac, Mac};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use std::str::FromStr;
use std::time::{Duration, Instant};
use thiserror::Error;
use tokio::sync::RwLock;

use crate::config::LencoConfig;

type HmacSha256 = Hmac<Sha256>;

const BANKS_CACHE_TTL: Duration = Duration::from_secs(24 * 60 * 60);
const BALANCE_CACHE_TTL: Duration = Duration::from_secs(30);

/// Fintech banks surfaced first in the bank list; most offramp users cash
/// out to one of these.
const FINTECH_PRIORITY: &[&str] = &[
    "OPay",
    "PalmPay",
    "Moniepoint",
    "Kuda",
    "Carbon",
    "Sparkle",
    "VFD Microfinance Bank",
];

#[derive(Error, Debug)]
pub enum LencoError {
    #[error("HTTP request failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("Bank account verification failed: {0}")]
    BankVerificationFailed(String),
    #[error("Payout failed: {0}")]
    PayoutFailed(String),
    #[error("Invalid response from Lenco: {0}")]
    InvalidResponse(String),
}

#[derive(Debug, Deserialize)]
#[serde(bound(deserialize = "T: Deserialize<'de>"))]
struct Envelope<T> {
    status: bool,
    #[serde(default)]
    message: Option<String>,
    #[serde(default)]
    data: Option<T>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Bank {
    pub code: String,
    pub name: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResolvedAccount {
    pub account_name: String,
    #[serde(default)]
    pub bank_name: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransferReceipt {
    pub id: String,
    #[serde(default)]
    pub transaction_reference: Option<String>,
    pub status: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct BalanceData {
    available_balance: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct TransferRequest<'a> {
    account_id: &'a str,
    account_number: &'a str,
    bank_code: &'a str,
    /// Whole-NGN amount as a decimal integer string.
    amount: String,
    narration: &'a str,
    reference: &'a str,
}

struct BanksCache {
    fetched_at: Instant,
    banks: Vec<Bank>,
}

struct BalanceCache {
    fetched_at: Instant,
    balance_ngn: i64,
}

/// Thin client over the Lenco payout API. Network-level failures are
/// retried once; 4xx responses never are.
pub struct LencoClient {
    client: Client,
    config: LencoConfig,
    banks_cache: RwLock<Option<BanksCache>>,
    balance_cache: RwLock<Option<BalanceCache>>,
}

/// Retries once on transport-level failures (connect/timeout). 4xx and
/// other HTTP responses are never retried; payout replays are additionally
/// guarded by the provider-side idempotency reference.
async fn send_with_retry(
    builder: reqwest::RequestBuilder,
) -> Result<reqwest::Response, reqwest::Error> {
    let retry = builder.try_clone();
    match builder.send().await {
        Ok(response) => Ok(response),
        Err(err) if err.is_connect() || err.is_timeout() => match retry {
            Some(builder) => builder.send().await,
            None => Err(err),
        },
        Err(err) => Err(err),
    }
}

impl LencoClient {
    pub fn new(config: LencoConfig) -> Self {
        let client = Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .unwrap_or_default();

        Self {
            client,
            config,
            banks_cache: RwLock::new(None),
            balance_cache: RwLock::new(None),
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.config.api_url.trim_end_matches('/'), path)
    }

    /// Synchronous account-name lookup.
    pub async fn resolve_account(
        &self,
        bank_code: &str,
        account_number: &str,
    ) -> Result<ResolvedAccount, LencoError> {
        let request = self
            .client
            .get(self.url("resolve"))
            .bearer_auth(&self.config.api_key)
            .query(&[("accountNumber", account_number), ("bankCode", bank_code)])
            .timeout(Duration::from_secs(15));
        let response = send_with_retry(request).await?;

        let status = response.status();
        let envelope = response
            .json::<Envelope<ResolvedAccount>>()
            .await
            .map_err(|e| LencoError::BankVerificationFailed(e.to_string()))?;

        if !status.is_success() || !envelope.status {
            return Err(LencoError::BankVerificationFailed(
                envelope
                    .message
                    .unwrap_or_else(|| format!("provider returned status {status}")),
            ));
        }

        envelope.data.ok_or_else(|| {
            LencoError::BankVerificationFailed("resolve response had no data".to_string())
        })
    }

    /// Supported banks, fintech-first. Cached for 24 hours.
    pub async fn list_banks(&self) -> Result<Vec<Bank>, LencoError> {
        {
            let cache = self.banks_cache.read().await;
            if let Some(cached) = cache.as_ref() {
                if cached.fetched_at.elapsed() < BANKS_CACHE_TTL {
                    return Ok(cached.banks.clone());
                }
            }
        }

        let request = self
            .client
            .get(self.url("banks"))
            .bearer_auth(&self.config.api_key);
        let response = send_with_retry(request).await?;

        let status = response.status();
        let envelope = response
            .json::<Envelope<Vec<Bank>>>()
            .await
            .map_err(|e| LencoError::InvalidResponse(e.to_string()))?;

        if !status.is_success() || !envelope.status {
            return Err(LencoError::InvalidResponse(
                envelope
                    .message
                    .unwrap_or_else(|| format!("bank list returned status {status}")),
            ));
        }

        let mut banks = envelope.data.unwrap_or_default();
        sort_banks(&mut banks);

        let mut cache = self.banks_cache.write().await;
        *cache = Some(BanksCache {
            fetched_at: Instant::now(),
            banks: banks.clone(),
        });

        Ok(banks)
    }

    /// Initiates an NGN transfer. `reference` is the provider-side
    /// idempotency key; replaying it never issues a second payout.
    pub async fn initiate_transfer(
        &self,
        amount_ngn: i64,
        bank_code: &str,
        account_number: &str,
        reference: &str,
        narration: &str,
    ) -> Result<TransferReceipt, LencoError> {
        let body = TransferRequest {
            account_id: &self.config.account_id,
            account_number,
            bank_code,
            amount: amount_ngn.to_string(),
            narration,
            reference,
        };

        let request = self
            .client
            .post(self.url("transactions"))
            .bearer_auth(&self.config.api_key)
            .json(&body)
            .timeout(Duration::from_secs(30));
        let response = send_with_retry(request).await?;

        let status = response.status();
        let envelope = response
            .json::<Envelope<TransferReceipt>>()
            .await
            .map_err(|e| LencoError::PayoutFailed(e.to_string()))?;

        if !status.is_success() || !envelope.status {
            return Err(LencoError::PayoutFailed(
                envelope
                    .message
                    .unwrap_or_else(|| format!("transfer returned status {status}")),
            ));
        }

        envelope
            .data
            .ok_or_else(|| LencoError::PayoutFailed("transfer response had no data".to_string()))
    }

    /// Available NGN balance of the platform account. The provider reports
    /// kobo; the result is floored to whole NGN. An error here means
    /// "unknown", which callers must treat differently from zero.
    pub async fn get_account_balance(&self) -> Result<i64, LencoError> {
        {
            let cache = self.balance_cache.read().await;
            if let Some(cached) = cache.as_ref() {
                if cached.fetched_at.elapsed() < BALANCE_CACHE_TTL {
                    return Ok(cached.balance_ngn);
                }
            }
        }

        let path = format!("accounts/{}/balance", self.config.account_id);
        let request = self
            .client
            .get(self.url(&path))
            .bearer_auth(&self.config.api_key)
            .timeout(Duration::from_secs(10));
        let response = send_with_retry(request).await?;

        let status = response.status();
        let envelope = response
            .json::<Envelope<BalanceData>>()
            .await
            .map_err(|e| LencoError::InvalidResponse(e.to_string()))?;

        if !status.is_success() || !envelope.status {
            return Err(LencoError::InvalidResponse(
                envelope
                    .message
                    .unwrap_or_else(|| format!("balance returned status {status}")),
            ));
        }

        let data = envelope
            .data
            .ok_or_else(|| LencoError::InvalidResponse("balance response had no data".to_string()))?;
        let balance_ngn = kobo_to_ngn(&data.available_balance)
            .ok_or_else(|| LencoError::InvalidResponse(format!(
                "unparseable balance: {}",
                data.available_balance
            )))?;

        let mut cache = self.balance_cache.write().await;
        *cache = Some(BalanceCache {
            fetched_at: Instant::now(),
            balance_ngn,
        });

        Ok(balance_ngn)
    }

    /// Drops the cached balance. Must be called after initiating a payout
    /// so the next liquidity check sees the debit.
    pub async fn invalidate_balance(&self) {
        let mut cache = self.balance_cache.write().await;
        *cache = None;
    }

    /// HMAC-SHA256 over the raw body bytes, hex-encoded. Comparison is
    /// constant-time via `Mac::verify_slice`.
    pub fn verify_webhook_signature(&self, raw_body: &[u8], signature: &str) -> bool {
        let Some(secret) = self.config.webhook_secret.as_deref() else {
            return false;
        };
        verify_hmac_sha256(secret.as_bytes(), raw_body, signature)
    }
}

pub fn verify_hmac_sha256(secret: &[u8], raw_body: &[u8], signature_hex: &str) -> bool {
    let Ok(expected) = hex::decode(signature_hex.trim()) else {
        return false;
    };
    let Ok(mut mac) = HmacSha256::new_from_slice(secret) else {
        return false;
    };
    mac.update(raw_body);
    mac.verify_slice(&expected).is_ok()
}

/// Converts a kobo amount string (1/100 NGN) to whole NGN, flooring.
pub fn kobo_to_ngn(raw: &str) -> Option<i64> {
    let kobo = BigDecimal::from_str(raw.trim()).ok()?;
    (kobo / BigDecimal::from(100))
        .with_scale_round(0, bigdecimal::RoundingMode::Floor)
        .to_i64()
}

/// Priority fintechs first, in their listed order, then the rest
/// alphabetically.
pub fn sort_banks(banks: &mut [Bank]) {
    let priority = |bank: &Bank| {
        FINTECH_PRIORITY
            .iter()
            .position(|p| bank.name.eq_ignore_ascii_case(p))
            .unwrap_or(FINTECH_PRIORITY.len())
    };
    banks.sort_by(|a, b| {
        priority(a)
            .cmp(&priority(b))
            .then_with(|| a.name.cmp(&b.name))
    });
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bank(name: &str) -> Bank {
        Bank {
            code: name.len().to_string(),
            name: name.to_string(),
        }
    }

    #[test]
    fn sorts_fintechs_first_in_priority_order() {
        let mut banks = vec![
            bank("Zenith Bank"),
            bank("Kuda"),
            bank("Access Bank"),
            bank("OPay"),
            bank("GTBank"),
            bank("PalmPay"),
        ];
        sort_banks(&mut banks);

        let names: Vec<&str> = banks.iter().map(|b| b.name.as_str()).collect();
        assert_eq!(
            names,
            vec!["OPay", "PalmPay", "Kuda", "Access Bank", "GTBank", "Zenith Bank"]
        );
    }

    #[test]
    fn sort_is_stable_across_calls() {
        let mut a = vec![bank("GTBank"), bank("OPay"), bank("Access Bank")];
        let mut b = a.clone();
        sort_banks(&mut a);
        sort_banks(&mut b);
        assert_eq!(a, b);
    }

    #[test]
    fn converts_kobo_to_whole_ngn() {
        assert_eq!(kobo_to_ngn("2000000"), Some(20_000));
        assert_eq!(kobo_to_ngn("2000000.00"), Some(20_000));
        assert_eq!(kobo_to_ngn("150"), Some(1));
        assert_eq!(kobo_to_ngn("99"), Some(0));
        assert_eq!(kobo_to_ngn("0"), Some(0));
        assert_eq!(kobo_to_ngn("not-a-number"), None);
    }

    #[test]
    fn verifies_matching_signature() {
        let secret = b"whsec_test";
        let body = br#"{"event":"transfer.completed"}"#;

        let mut mac = HmacSha256::new_from_slice(secret).unwrap();
        mac.update(body);
        let signature = hex::encode(mac.finalize().into_bytes());

        assert!(verify_hmac_sha256(secret, body, &signature));
    }

    #[test]
    fn rejects_tampered_body() {
        let secret = b"whsec_test";
        let body = br#"{"event":"transfer.completed"}"#;
        let tampered = br#"{"event":"transfer.reversed"}"#;

        let mut mac = HmacSha256::new_from_slice(secret).unwrap();
        mac.update(body);
        let signature = hex::encode(mac.finalize().into_bytes());

        assert!(!verify_hmac_sha256(secret, tampered, &signature));
        assert!(!verify_hmac_sha256(secret, body, "deadbeef"));
        assert!(!verify_hmac_sha256(secret, body, "not hex at all"));
    }

    #[test]
    fn signature_check_requires_secret() {
        let client = LencoClient::new(LencoConfig {
            api_url: "https://api.lenco.co/access/v1".to_string(),
            api_key: "key".to_string(),
            account_id: "acct".to_string(),
            webhook_secret: None,
            min_balance_ngn: 5_000,
        });
        assert!(!client.verify_webhook_signature(b"{}", "00"));
    }
}
