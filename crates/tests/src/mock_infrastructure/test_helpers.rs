//! Test Helper Functions and Utilities
//!
//! Common helpers for creating test data, fast configurations and waiting on conditions.

use serde_json::{json, Value};
use std::time::Duration;
use tether_core::TetherConfig;

/// Configuration with short delays so retry and reconnect paths finish quickly in tests.
#[must_use]
pub fn test_config() -> TetherConfig {
    let mut config = TetherConfig::default();
    config.retry.max_retries = 2;
    config.retry.retry_interval_ms = 10;
    config.retry.retry_jitter_ms = 5;
    config.connection.initial_reconnect_delay_ms = 20;
    config.connection.max_reconnect_delay_ms = 200;
    config.subscriptions.backfill_initial_backoff_ms = 20;
    config.subscriptions.backfill_max_backoff_ms = 100;
    config
}

/// Installs a test subscriber once so `RUST_LOG=debug` shows library logs.
pub fn init_test_logging() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .with_test_writer()
        .try_init();
}

/// Polls `condition` until it holds or `timeout` elapses. Returns whether it held.
pub async fn wait_until<F>(timeout: Duration, mut condition: F) -> bool
where
    F: FnMut() -> bool,
{
    let deadline = tokio::time::Instant::now() + timeout;
    while tokio::time::Instant::now() < deadline {
        if condition() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    condition()
}

/// Deterministic block hash for `number` on chain `fork` (0 is the original chain).
#[must_use]
pub fn block_hash(number: u64, fork: u64) -> String {
    format!("0x{fork:08x}{number:056x}")
}

/// Creates a block as returned by `eth_getBlockByNumber(n, false)`.
#[must_use]
pub fn create_test_block(number: u64, hash: &str) -> Value {
    json!({
        "number": format!("0x{number:x}"),
        "hash": hash,
        "parentHash": format!("0x{:064x}", number.saturating_sub(1)),
        "timestamp": format!("0x{:x}", 1_600_000_000 + number),
        "gasLimit": "0x1c9c380",
        "gasUsed": "0x0",
        "baseFeePerGas": "0x7",
        "totalDifficulty": "0x0",
        "size": "0x220",
        "transactions": [],
        "uncles": []
    })
}

/// Creates a single test log.
#[must_use]
pub fn create_test_log(block_number: u64, block_hash: &str, log_index: u64) -> Value {
    json!({
        "address": "0x0000000000000000000000000000000000000001",
        "blockNumber": format!("0x{block_number:x}"),
        "blockHash": block_hash,
        "logIndex": format!("0x{log_index:x}"),
        "transactionHash": format!("0x{:064x}", block_number * 100 + log_index),
        "transactionIndex": "0x0",
        "topics": [format!("0x{log_index:064x}")],
        "data": "0x",
        "removed": false
    })
}

/// Creates an `eth_subscription` push.
#[must_use]
pub fn create_subscription_push(subscription: &str, result: &Value) -> Value {
    json!({
        "jsonrpc": "2.0",
        "method": "eth_subscription",
        "params": { "subscription": subscription, "result": result }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_block_hash_differs_per_fork() {
        assert_ne!(block_hash(5, 0), block_hash(5, 1));
        assert_eq!(block_hash(5, 0).len(), 66);
    }

    #[test]
    fn test_create_test_log() {
        let log = create_test_log(100, "0xabc", 5);
        assert_eq!(log["blockNumber"], "0x64");
        assert_eq!(log["logIndex"], "0x5");
        assert_eq!(log["blockHash"], "0xabc");
    }

    #[test]
    fn test_test_config_is_valid() {
        assert!(test_config().validate().is_ok());
    }
}
