use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum WalletError {
    #[error("HTTP request failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("Signer rejected the transfer: {0}")]
    Rejected(String),
}

/// Outbound transfer primitive. The platform key never enters this
/// process: signing happens in a sidecar that applies equal-to-amount
/// post-conditions before broadcasting. Only the onramp path holds a
/// wallet handle.
#[async_trait]
pub trait StacksWallet: Send + Sync {
    /// Sends native STX (micro-units) with a memo; returns the broadcast txid.
    async fn send_stx(&self, to: &str, micro_amount: u64, memo: &str)
        -> Result<String, WalletError>;

    /// Sends a SIP-010 token (micro-units) with a memo; returns the broadcast txid.
    async fn send_sip010(
        &self,
        contract_id: &str,
        to: &str,
        micro_amount: u64,
        memo: &str,
    ) -> Result<String, WalletError>;
}

#[derive(Debug, Serialize)]
struct SendRequest<'a> {
    #[serde(skip_serializing_if = "Option::is_none")]
    contract: Option<&'a str>,
    to: &'a str,
    amount: u64,
    memo: &'a str,
}

#[derive(Debug, Deserialize)]
struct SendResponse {
    txid: String,
}

/// HTTP client for the signing sidecar.
#[derive(Clone)]
pub struct SignerClient {
    client: Client,
    base_url: String,
}

impl SignerClient {
    pub fn new(base_url: String) -> Self {
        let client = Client::builder()
            .timeout(std::time::Duration::from_secs(30))
            .build()
            .unwrap_or_default();

        SignerClient { client, base_url }
    }

    async fn post_send(
        &self,
        path: &str,
        body: &SendRequest<'_>,
    ) -> Result<String, WalletError> {
        let url = format!("{}/{}", self.base_url.trim_end_matches('/'), path);

        let response = self.client.post(&url).json(body).send().await?;

        if !response.status().is_success() {
            let message = response.text().await.unwrap_or_default();
            return Err(WalletError::Rejected(message));
        }

        let body = response.json::<SendResponse>().await?;
        Ok(body.txid)
    }
}

#[async_trait]
impl StacksWallet for SignerClient {
    async fn send_stx(
        &self,
        to: &str,
        micro_amount: u64,
        memo: &str,
    ) -> Result<String, WalletError> {
        self.post_send(
            "send-stx",
            &SendRequest {
                contract: None,
                to,
                amount: micro_amount,
                memo,
            },
        )
        .await
    }

    async fn send_sip010(
        &self,
        contract_id: &str,
        to: &str,
        micro_amount: u64,
        memo: &str,
    ) -> Result<String, WalletError> {
        self.post_send(
            "send-sip010",
            &SendRequest {
                contract: Some(contract_id),
                to,
                amount: micro_amount,
                memo,
            },
        )
        .await
    }
}
