use hmac::{Hmac, Mac};
use serde::Deserialize;
use sha2::Sha512;

type HmacSha512 = Hmac<Sha512>;

pub const EVENT_SUCCESSFUL_TRANSACTION: &str = "SUCCESSFUL_TRANSACTION";

/// Monnify collection webhook. Only the fields the onramp path consumes.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MonnifyWebhook {
    pub event_type: String,
    pub event_data: MonnifyEventData,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MonnifyEventData {
    /// Our `SSWAP_ONRAMP_…` reference, passed as the payment reference.
    pub payment_reference: String,
    #[serde(default)]
    pub transaction_reference: Option<String>,
    #[serde(default)]
    pub payment_status: Option<String>,
    #[serde(default)]
    pub amount_paid: Option<f64>,
}

impl MonnifyWebhook {
    pub fn is_successful_payment(&self) -> bool {
        self.event_type == EVENT_SUCCESSFUL_TRANSACTION
            && self
                .event_data
                .payment_status
                .as_deref()
                .map(|s| s.eq_ignore_ascii_case("PAID"))
                .unwrap_or(true)
    }
}

/// Monnify signs webhooks with HMAC-SHA512 of the raw body, hex-encoded
/// in the `monnify-signature` header. Constant-time comparison.
pub fn verify_signature(secret: &str, raw_body: &[u8], signature_hex: &str) -> bool {
    let Ok(expected) = hex::decode(signature_hex.trim()) else {
        return false;
    };
    let Ok(mut mac) = HmacSha512::new_from_slice(secret.as_bytes()) else {
        return false;
    };
    mac.update(raw_body);
    mac.verify_slice(&expected).is_ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sign(secret: &str, body: &[u8]) -> String {
        let mut mac = HmacSha512::new_from_slice(secret.as_bytes()).unwrap();
        mac.update(body);
        hex::encode(mac.finalize().into_bytes())
    }

    #[test]
    fn verifies_valid_signature() {
        let secret = "monnify_secret";
        let body = br#"{"eventType":"SUCCESSFUL_TRANSACTION"}"#;
        let signature = sign(secret, body);

        assert!(verify_signature(secret, body, &signature));
    }

    #[test]
    fn rejects_wrong_secret_or_body() {
        let body = br#"{"eventType":"SUCCESSFUL_TRANSACTION"}"#;
        let signature = sign("monnify_secret", body);

        assert!(!verify_signature("other_secret", body, &signature));
        assert!(!verify_signature("monnify_secret", b"{}", &signature));
        assert!(!verify_signature("monnify_secret", body, "zz"));
    }

    #[test]
    fn parses_webhook_payload() {
        let payload: MonnifyWebhook = serde_json::from_str(
            r#"{
                "eventType": "SUCCESSFUL_TRANSACTION",
                "eventData": {
                    "paymentReference": "SSWAP_ONRAMP_lx2a9f_0a1b2c3d",
                    "transactionReference": "MNFY|001",
                    "paymentStatus": "PAID",
                    "amountPaid": 184735.0
                }
            }"#,
        )
        .unwrap();

        assert!(payload.is_successful_payment());
        assert_eq!(
            payload.event_data.payment_reference,
            "SSWAP_ONRAMP_lx2a9f_0a1b2c3d"
        );
    }

    #[test]
    fn failed_payment_is_not_successful() {
        let payload: MonnifyWebhook = serde_json::from_str(
            r#"{
                "eventType": "FAILED_TRANSACTION",
                "eventData": {"paymentReference": "SSWAP_ONRAMP_x_00000000"}
            }"#,
        )
        .unwrap();

        assert!(!payload.is_successful_payment());
    }
}
