//! # Tether Core
//!
//! Resilient JSON-RPC transport and subscription layer for Ethereum-style nodes.
//!
//! This crate provides:
//!
//! - **[`transport`]**: Single-attempt senders over HTTP and over a persistent WebSocket
//!   connection, with request/response correlation by id (canonical ids for batches).
//!
//! - **[`sender`]**: Retry on rate limiting, routing of signing methods to a secondary
//!   provider, and failover to it on network failures.
//!
//! - **[`subscription`]**: Subscriptions with stable ids across reconnects. Missed `newHeads`
//!   and `logs` events are backfilled (see [`backfill`]), including reorg corrections, and a
//!   heartbeat forces reconnects on silent connections.
//!
//! - **[`client`]**: Builds the right stack for an `http(s)://` or `ws(s)://` endpoint.
//!
//! - **[`config`]**: TOML configuration with `TETHER__` environment overrides.
//!
//! ## Architecture
//!
//! ```text
//! ┌────────────────────────────────────────────────────────┐
//! │                        Client                          │
//! │  ┌──────────────────────┐   ┌───────────────────────┐  │
//! │  │      RpcClient       │◄──┤ SubscriptionProvider  │  │
//! │  └──────────┬───────────┘   │  history · backfill   │  │
//! │             │               │  heartbeat            │  │
//! │  ┌──────────▼───────────┐   └───────────┬───────────┘  │
//! │  │    PayloadSender     │──► Secondary  │ events       │
//! │  └──────────┬───────────┘   provider    │              │
//! │             │                           │              │
//! │  ┌──────────▼───────────┐   ┌───────────▼───────────┐  │
//! │  │ HttpTransport /      │──►│ PersistentConnection  │  │
//! │  │ WsTransport          │   │ (WsConnection)        │  │
//! │  └──────────────────────┘   └───────────────────────┘  │
//! └────────────────────────────────────────────────────────┘
//! ```

pub mod backfill;
pub mod client;
pub mod config;
pub mod connection;
pub mod errors;
pub mod history;
pub mod id;
pub mod rpc;
pub mod sender;
pub mod subscription;
pub mod transport;
pub mod types;
pub mod utils;

#[cfg(test)]
mod test_utils;

pub use client::Client;
pub use config::TetherConfig;
pub use errors::TetherError;
