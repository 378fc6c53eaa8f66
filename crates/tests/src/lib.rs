//! Integration Tests for Tether
//!
//! This crate contains various test modules:
//!
//! - `config_tests`: Configuration files and environment overrides
//! - `http_sender_tests`: Retry, failover and deny-list behavior over HTTP
//! - `ws_subscription_tests`: Request correlation, subscriptions, reconnects and backfill over
//!   WebSocket
//! - `mock_infrastructure`: Reusable mock endpoints (HTTP via mockito, WebSocket node)
//!
//! ## Running Tests
//!
//! ```bash
//! cargo test --package tests
//! ```
//!
//! Set `RUST_LOG=tether_core=debug` to see the client's logs.


#[cfg(test)]
mod http_sender_tests;
