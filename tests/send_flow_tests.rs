// Plan -> sign -> broadcast against a mocked Esplora endpoint.

mod common;

use common::{Harness, ABANDON_BTC, DEST};
use httpmock::{Method, MockServer};
use serde_json::json;
use sovereign_enclave::blockchain::bitcoin::psbt::estimate_vbytes;
use sovereign_enclave::blockchain::bitcoin::send::{plan_send, SendRequest};
use sovereign_enclave::blockchain::{ChainDataProvider, EsploraProvider, FeePriority, ResilientProvider};
use sovereign_enclave::core::config::ProviderConfig;
use sovereign_enclave::core::domain::Network;
use sovereign_enclave::core::errors::WalletError;
use sovereign_enclave::signing::SignRequest;

fn provider_config(server: &MockServer) -> ProviderConfig {
    ProviderConfig {
        base_url: server.base_url(),
        timeout_ms: 2_000,
        max_attempts: 3,
        initial_backoff_ms: 10,
        max_backoff_ms: 50,
    }
}

#[tokio::test]
async fn test_plan_sign_broadcast() {
    let server = MockServer::start_async().await;
    server
        .mock_async(|when, then| {
            when.method(Method::GET).path("/fee-estimates");
            then.status(200).json_body(json!({ "1": 25.0, "3": 12.0, "6": 8.5, "144": 1.2 }));
        })
        .await;
    server
        .mock_async(|when, then| {
            when.method(Method::GET).path(format!("/address/{}/utxo", ABANDON_BTC));
            then.status(200).json_body(json!([
                { "txid": "11".repeat(32), "vout": 0, "value": 40_000, "status": { "confirmed": true } },
                { "txid": "22".repeat(32), "vout": 1, "value": 90_000, "status": { "confirmed": true } }
            ]));
        })
        .await;

    let config = provider_config(&server);
    let provider = ResilientProvider::new(EsploraProvider::new(&config).unwrap(), config.retry_policy());

    let mut request = SendRequest::new(ABANDON_BTC, DEST, 50_000, Network::Mainnet);
    request.priority = FeePriority::Hour;
    let unsigned = plan_send(&provider, &request).await.unwrap();
    assert_eq!(unsigned.fee_sats, (estimate_vbytes(unsigned.input_count, 2) as f64 * 8.5).floor() as u64);
    assert_eq!(unsigned.change_sats, unsigned.total_in - 50_000 - unsigned.fee_sats);
    assert!(unsigned.rbf);

    let h = Harness::onboarded_native().await;
    let signed = h
        .dispatcher
        .sign(SignRequest::psbt(unsigned.psbt_base64.clone(), "pay 50k sats"))
        .await
        .unwrap();
    let tx_hex = signed.broadcast_ready_hex.unwrap();
    let txid = signed.txid.unwrap();

    let broadcast = server
        .mock_async(|when, then| {
            when.method(Method::POST).path("/tx").body(tx_hex.clone());
            then.status(200).body(txid.clone());
        })
        .await;
    assert_eq!(provider.broadcast(&tx_hex).await.unwrap(), txid);
    broadcast.assert_async().await;
}

#[tokio::test]
async fn test_server_errors_are_retried_then_surfaced() {
    let server = MockServer::start_async().await;
    let fees = server
        .mock_async(|when, then| {
            when.method(Method::GET).path("/fee-estimates");
            then.status(503);
        })
        .await;

    let config = provider_config(&server);
    let provider = ResilientProvider::new(EsploraProvider::new(&config).unwrap(), config.retry_policy());
    let err = provider.get_fee_estimate().await.unwrap_err();
    assert!(matches!(err, WalletError::NetworkError(_)));
    fees.assert_hits_async(3).await;
}

#[tokio::test]
async fn test_rejected_broadcast_is_not_retried() {
    let server = MockServer::start_async().await;
    let tx = server
        .mock_async(|when, then| {
            when.method(Method::POST).path("/tx");
            then.status(400).body("bad-txns-inputs-missingorspent");
        })
        .await;

    let config = provider_config(&server);
    let provider = ResilientProvider::new(EsploraProvider::new(&config).unwrap(), config.retry_policy());
    let err = provider.broadcast("00").await.unwrap_err();
    assert!(matches!(err, WalletError::ValidationError(ref msg) if msg.contains("missingorspent")));
    tx.assert_hits_async(1).await;
}
