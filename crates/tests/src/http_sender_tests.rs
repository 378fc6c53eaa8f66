//! Integration tests for the HTTP request path: retries, failover and the deny-list.

use async_trait::async_trait;
use serde_json::{json, Value};
use std::sync::{
    atomic::{AtomicUsize, Ordering},
    Arc,
};
use tether_core::{
    rpc::BatchPart,
    sender::{CallbackProvider, ProviderCallback, RequestProvider, SecondaryProvider},
    types::{JsonRpcResponse, Payload, PayloadResponse},
    Client, TetherError,
};

use crate::mock_infrastructure::{init_test_logging, test_config, RpcMockBuilder};

/// Secondary provider answering every request with a fixed value.
struct FixedProvider {
    result: Value,
    calls: Arc<AtomicUsize>,
}

#[async_trait]
impl RequestProvider for FixedProvider {
    async fn request(&self, _method: &str, _params: Vec<Value>) -> Result<Value, TetherError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(self.result.clone())
    }
}

/// Callback-style wallet that signs everything with the same signature.
struct SigningWallet;

impl CallbackProvider for SigningWallet {
    fn send_async(&self, payload: Payload, callback: ProviderCallback) {
        let Payload::Single(request) = payload else {
            callback(Err(TetherError::Secondary("batches unsupported".to_string())));
            return;
        };
        let id = request.id.unwrap_or_default();
        callback(Ok(PayloadResponse::Single(JsonRpcResponse::success(json!("0xsigned"), id))));
    }
}

async fn http_client(mock: &RpcMockBuilder) -> Client {
    Client::connect(&mock.url(), test_config()).await.expect("http client")
}

#[tokio::test]
async fn test_rate_limit_exhausts_after_configured_retries() {
    init_test_logging();
    let mut mock = RpcMockBuilder::new().await;
    mock.mock_rate_limited("eth_blockNumber", 3);
    let client = http_client(&mock).await;

    let result = client.request("eth_blockNumber", vec![]).await;

    assert!(matches!(result, Err(TetherError::RateLimitExhausted { attempts: 3 })));
    mock.assert_all().await;
}

#[tokio::test]
async fn test_rate_limit_is_not_failed_over() {
    let mut mock = RpcMockBuilder::new().await;
    mock.mock_rate_limited("eth_chainId", 3);
    let client = http_client(&mock).await;

    let calls = Arc::new(AtomicUsize::new(0));
    client.set_secondary_provider(Some(SecondaryProvider::request(FixedProvider {
        result: json!("0x1"),
        calls: calls.clone(),
    })));

    let result = client.request("eth_chainId", vec![]).await;

    assert!(matches!(result, Err(TetherError::RateLimitExhausted { .. })));
    assert_eq!(calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_server_error_fails_over_to_secondary() {
    let mut mock = RpcMockBuilder::new().await;
    mock.mock_status("eth_chainId", 500, 1);
    let client = http_client(&mock).await;

    let calls = Arc::new(AtomicUsize::new(0));
    client.set_secondary_provider(Some(SecondaryProvider::request(FixedProvider {
        result: json!("0x89"),
        calls: calls.clone(),
    })));

    let result = client.request("eth_chainId", vec![]).await.unwrap();

    assert_eq!(result, json!("0x89"));
    assert_eq!(calls.load(Ordering::SeqCst), 1);
    mock.assert_all().await;
}

#[tokio::test]
async fn test_server_error_without_secondary_is_network_failure() {
    let mut mock = RpcMockBuilder::new().await;
    mock.mock_server_error();
    let client = http_client(&mock).await;

    let result = client.request("eth_chainId", vec![]).await;

    match result {
        Err(TetherError::NetworkFailure { status, .. }) => assert_eq!(status, 500),
        other => panic!("expected network failure, got {other:?}"),
    }
}

#[tokio::test]
async fn test_rpc_error_code_429_in_ok_body_is_retried() {
    let mut mock = RpcMockBuilder::new().await;
    mock.mock_rpc_error("eth_call", 429, "exceeded capacity");
    let client = http_client(&mock).await;

    let result = client.request("eth_call", vec![json!({}), json!("latest")]).await;

    assert!(matches!(result, Err(TetherError::RateLimitExhausted { attempts: 3 })));
}

#[tokio::test]
async fn test_rpc_error_is_returned_to_caller() {
    let mut mock = RpcMockBuilder::new().await;
    mock.mock_rpc_error("eth_call", -32000, "execution reverted");
    let client = http_client(&mock).await;

    let result = client.request("eth_call", vec![json!({}), json!("latest")]).await;

    match result {
        Err(TetherError::Rpc { code, message }) => {
            assert_eq!(code, -32000);
            assert_eq!(message, "execution reverted");
        }
        other => panic!("expected rpc error, got {other:?}"),
    }
}

#[tokio::test]
async fn test_denied_method_without_secondary_never_reaches_primary() {
    let mut mock = RpcMockBuilder::new().await;
    mock.mock_status("eth_sendTransaction", 200, 0);
    let client = http_client(&mock).await;

    let result = client.request("eth_sendTransaction", vec![json!({})]).await;

    match result {
        Err(TetherError::NoProviderAvailable { method }) => {
            assert_eq!(method, "eth_sendTransaction");
        }
        other => panic!("expected no provider, got {other:?}"),
    }
    mock.assert_all().await;
}

#[tokio::test]
async fn test_denied_method_goes_to_callback_secondary() {
    let mut mock = RpcMockBuilder::new().await;
    mock.mock_status("eth_sign", 200, 0);
    let client = http_client(&mock).await;
    client.set_secondary_provider(Some(SecondaryProvider::callback(SigningWallet)));

    let result = client.request("eth_sign", vec![json!("0xabc"), json!("0xdead")]).await.unwrap();

    assert_eq!(result, json!("0xsigned"));
    mock.assert_all().await;
}

#[tokio::test]
async fn test_batch_results_follow_request_order() {
    let mut mock = RpcMockBuilder::new().await;
    mock.mock_node(|method, params| match method {
        "eth_chainId" => json!("0x1"),
        "eth_getBalance" => json!(format!("balance:{}", params[0].as_str().unwrap_or_default())),
        _ => Value::Null,
    });
    let client = http_client(&mock).await;

    let results = client
        .batch(vec![
            BatchPart::new("eth_getBalance", vec![json!("0xaa"), json!("latest")]),
            BatchPart::new("eth_chainId", vec![]),
            BatchPart::new("eth_getBalance", vec![json!("0xbb"), json!("latest")]),
        ])
        .await
        .unwrap();

    assert_eq!(results, vec![json!("balance:0xaa"), json!("0x1"), json!("balance:0xbb")]);
}

#[tokio::test]
async fn test_http_client_has_no_subscriptions() {
    let mut mock = RpcMockBuilder::new().await;
    mock.mock_block_number(42);
    let client = http_client(&mock).await;

    assert!(client.subscriptions().is_none());
    assert!(client.subscribe(vec![json!("newHeads")]).await.is_err());
    assert_eq!(client.rpc().block_number().await.unwrap(), 42);
}
