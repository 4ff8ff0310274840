use mockito::{Matcher, Server};

use stackswap::config::LencoConfig;
use stackswap::providers::lenco::{LencoClient, LencoError};

fn client(url: &str) -> LencoClient {
    LencoClient::new(LencoConfig {
        api_url: url.to_string(),
        api_key: "test-key".to_string(),
        account_id: "acct-1".to_string(),
        webhook_secret: Some("whsec_test".to_string()),
        min_balance_ngn: 5_000,
    })
}

#[tokio::test]
async fn resolves_account_name() {
    let mut server = Server::new_async().await;
    let _mock = server
        .mock("GET", "/resolve")
        .match_query(Matcher::AllOf(vec![
            Matcher::UrlEncoded("accountNumber".into(), "0123456789".into()),
            Matcher::UrlEncoded("bankCode".into(), "058".into()),
        ]))
        .with_status(200)
        .with_header("content-type", "application/json")
        .with_body(r#"{"status": true, "data": {"accountName": "ADA OBI", "bankName": "GTBank"}}"#)
        .create_async()
        .await;

    let resolved = client(&server.url())
        .resolve_account("058", "0123456789")
        .await
        .unwrap();

    assert_eq!(resolved.account_name, "ADA OBI");
    assert_eq!(resolved.bank_name.as_deref(), Some("GTBank"));
}

#[tokio::test]
async fn resolve_surfaces_provider_message_on_4xx() {
    let mut server = Server::new_async().await;
    let _mock = server
        .mock("GET", "/resolve")
        .match_query(Matcher::Any)
        .with_status(400)
        .with_header("content-type", "application/json")
        .with_body(r#"{"status": false, "message": "Account not found"}"#)
        .create_async()
        .await;

    let err = client(&server.url())
        .resolve_account("058", "0123456789")
        .await
        .unwrap_err();

    match err {
        LencoError::BankVerificationFailed(message) => {
            assert!(message.contains("Account not found"));
        }
        other => panic!("unexpected error: {other:?}"),
    }
}

#[tokio::test]
async fn bank_list_is_sorted_and_cached() {
    let mut server = Server::new_async().await;
    let mock = server
        .mock("GET", "/banks")
        .with_status(200)
        .with_header("content-type", "application/json")
        .with_body(
            r#"{"status": true, "data": [
                {"code": "058", "name": "GTBank"},
                {"code": "100004", "name": "OPay"},
                {"code": "044", "name": "Access Bank"},
                {"code": "50211", "name": "Kuda"}
            ]}"#,
        )
        .expect(1)
        .create_async()
        .await;

    let client = client(&server.url());

    let banks = client.list_banks().await.unwrap();
    let names: Vec<&str> = banks.iter().map(|b| b.name.as_str()).collect();
    assert_eq!(names, vec!["OPay", "Kuda", "Access Bank", "GTBank"]);

    // Second call inside the cache window: same order, no upstream call.
    let again = client.list_banks().await.unwrap();
    assert_eq!(banks, again);

    mock.assert_async().await;
}

#[tokio::test]
async fn initiates_transfer_with_reference() {
    let mut server = Server::new_async().await;
    let _mock = server
        .mock("POST", "/transactions")
        .match_body(Matcher::AllOf(vec![
            Matcher::PartialJsonString(r#"{"amount": "184635"}"#.to_string()),
            Matcher::PartialJsonString(
                r#"{"reference": "SSWAP_OFFRAMP_x_deadbeef"}"#.to_string(),
            ),
        ]))
        .with_status(200)
        .with_header("content-type", "application/json")
        .with_body(
            r#"{"status": true, "data": {"id": "trf_1", "transactionReference": "L-REF-1", "status": "pending"}}"#,
        )
        .create_async()
        .await;

    let receipt = client(&server.url())
        .initiate_transfer(
            184_635,
            "058",
            "0123456789",
            "SSWAP_OFFRAMP_x_deadbeef",
            "StackSwap offramp",
        )
        .await
        .unwrap();

    assert_eq!(receipt.id, "trf_1");
    assert_eq!(receipt.transaction_reference.as_deref(), Some("L-REF-1"));
}

#[tokio::test]
async fn transfer_failure_carries_provider_message() {
    let mut server = Server::new_async().await;
    let _mock = server
        .mock("POST", "/transactions")
        .with_status(500)
        .with_header("content-type", "application/json")
        .with_body(r#"{"status": false, "message": "Insufficient funds"}"#)
        .create_async()
        .await;

    let err = client(&server.url())
        .initiate_transfer(1_000, "058", "0123456789", "SSWAP_OFFRAMP_x_f00dbabe", "n")
        .await
        .unwrap_err();

    match err {
        LencoError::PayoutFailed(message) => assert!(message.contains("Insufficient funds")),
        other => panic!("unexpected error: {other:?}"),
    }
}

#[tokio::test]
async fn balance_converts_kobo_and_caches() {
    let mut server = Server::new_async().await;
    let mock = server
        .mock("GET", "/accounts/acct-1/balance")
        .with_status(200)
        .with_header("content-type", "application/json")
        .with_body(r#"{"status": true, "data": {"availableBalance": "2000000"}}"#)
        .expect(1)
        .create_async()
        .await;

    let client = client(&server.url());

    assert_eq!(client.get_account_balance().await.unwrap(), 20_000);
    // cached
    assert_eq!(client.get_account_balance().await.unwrap(), 20_000);
    mock.assert_async().await;
}

#[tokio::test]
async fn invalidation_forces_a_refetch_and_errors_mean_unknown() {
    let mut server = Server::new_async().await;
    let ok = server
        .mock("GET", "/accounts/acct-1/balance")
        .with_status(200)
        .with_header("content-type", "application/json")
        .with_body(r#"{"status": true, "data": {"availableBalance": "2000000"}}"#)
        .expect(1)
        .create_async()
        .await;

    let client = client(&server.url());
    assert_eq!(client.get_account_balance().await.unwrap(), 20_000);

    ok.remove_async().await;
    let _down = server
        .mock("GET", "/accounts/acct-1/balance")
        .with_status(500)
        .with_body(r#"{"status": false, "message": "upstream error"}"#)
        .create_async()
        .await;

    // The cache would have hidden the outage; invalidation exposes it.
    client.invalidate_balance().await;
    assert!(client.get_account_balance().await.is_err());
}
