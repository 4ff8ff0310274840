use mockito::{Matcher, Server};

use stackswap::stacks::{ChainTxStatus, StacksClient, StacksError};

fn hex_memo(memo: &str) -> String {
    let mut bytes = memo.as_bytes().to_vec();
    bytes.resize(34, 0);
    format!("0x{}", hex::encode(bytes))
}

#[tokio::test]
async fn lists_address_transactions() {
    let mut server = Server::new_async().await;
    let body = format!(
        r#"{{
            "limit": 50,
            "offset": 0,
            "total": 1,
            "results": [{{
                "tx_id": "0xabc123",
                "tx_status": "success",
                "tx_type": "token_transfer",
                "sender_address": "SP2SENDER",
                "block_height": 4200,
                "token_transfer": {{
                    "recipient_address": "SPPLATFORM",
                    "amount": "100000000",
                    "memo": "{}"
                }}
            }}]
        }}"#,
        hex_memo("SSWAP_OFFRAMP_x_deadbeef")
    );

    let _mock = server
        .mock(
            "GET",
            Matcher::Regex(r"/extended/v1/address/SPPLATFORM/transactions".into()),
        )
        .match_query(Matcher::Any)
        .with_status(200)
        .with_header("content-type", "application/json")
        .with_body(body)
        .create_async()
        .await;

    let client = StacksClient::new(server.url());
    let txs = client
        .get_address_transactions("SPPLATFORM", 50, 0)
        .await
        .unwrap();

    assert_eq!(txs.len(), 1);
    let tx = &txs[0];
    assert_eq!(tx.tx_status, ChainTxStatus::Success);
    assert!(tx.is_success());
    assert_eq!(tx.block_height, Some(4200));

    let transfer = tx.native_transfer_to("SPPLATFORM").unwrap();
    assert_eq!(transfer.amount, "100000000");
    assert_eq!(
        stackswap::stacks::client::decode_memo(&transfer.memo).as_deref(),
        Some("SSWAP_OFFRAMP_x_deadbeef")
    );
}

#[tokio::test]
async fn single_transaction_includes_events() {
    let mut server = Server::new_async().await;
    let body = format!(
        r#"{{
            "tx_id": "0xdef456",
            "tx_status": "success",
            "tx_type": "contract_call",
            "sender_address": "SP2SENDER",
            "block_height": 4300,
            "event_count": 1,
            "contract_call": {{
                "contract_id": "SP3Y.token-aeusdc",
                "function_name": "transfer",
                "function_args": [
                    {{"repr": "u5000000"}},
                    {{"repr": "'SP2SENDER"}},
                    {{"repr": "'SPPLATFORM"}},
                    {{"repr": "(some {})"}}
                ]
            }},
            "events": [{{
                "event_type": "fungible_token_asset",
                "asset": {{
                    "asset_id": "SP3Y.token-aeusdc::aeusdc",
                    "sender": "SP2SENDER",
                    "recipient": "SPPLATFORM",
                    "amount": "5000000"
                }}
            }}]
        }}"#,
        hex_memo("SSWAP_OFFRAMP_x_11112222")
    );

    let _mock = server
        .mock("GET", "/extended/v1/tx/0xdef456")
        .with_status(200)
        .with_header("content-type", "application/json")
        .with_body(body)
        .create_async()
        .await;

    let client = StacksClient::new(server.url());
    let tx = client.get_transaction("0xdef456").await.unwrap();

    assert_eq!(tx.sip010_amount_to("SP3Y.token-aeusdc", "SPPLATFORM"), 5_000_000);
    assert_eq!(tx.sip010_memo().as_deref(), Some("SSWAP_OFFRAMP_x_11112222"));
}

#[tokio::test]
async fn missing_transaction_maps_to_not_found() {
    let mut server = Server::new_async().await;
    let _mock = server
        .mock("GET", Matcher::Regex(r"/extended/v1/tx/.*".into()))
        .with_status(404)
        .create_async()
        .await;

    let client = StacksClient::new(server.url());
    let result = client.get_transaction("0xmissing").await;

    assert!(matches!(result, Err(StacksError::NotFound(_))));
}

#[tokio::test]
async fn aborted_status_parses_from_listing() {
    let mut server = Server::new_async().await;
    let _mock = server
        .mock(
            "GET",
            Matcher::Regex(r"/extended/v1/address/.*/transactions".into()),
        )
        .match_query(Matcher::Any)
        .with_status(200)
        .with_header("content-type", "application/json")
        .with_body(
            r#"{"results": [{
                "tx_id": "0x999",
                "tx_status": "abort_by_post_condition",
                "tx_type": "contract_call",
                "sender_address": "SP2SENDER"
            }]}"#,
        )
        .create_async()
        .await;

    let client = StacksClient::new(server.url());
    let txs = client.get_address_transactions("SPX", 50, 0).await.unwrap();

    assert!(txs[0].tx_status.is_abort());
    assert!(!txs[0].is_success());
}

#[tokio::test]
async fn reads_chain_tip_height() {
    let mut server = Server::new_async().await;
    let _mock = server
        .mock("GET", "/v2/info")
        .with_status(200)
        .with_header("content-type", "application/json")
        .with_body(r#"{"stacks_tip_height": 123456, "network_id": 1}"#)
        .create_async()
        .await;

    let client = StacksClient::new(server.url());
    assert_eq!(client.get_tip_height().await.unwrap(), 123_456);
}
