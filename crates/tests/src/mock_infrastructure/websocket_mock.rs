//! Mock WebSocket Node for Testing
//!
//! A small in-process Ethereum node speaking JSON-RPC over WebSocket. It answers the methods
//! the subscription layer uses, can push subscription notifications, and can drop every open
//! connection to exercise reconnects.

use futures_util::{SinkExt, StreamExt};
use parking_lot::Mutex;
use serde_json::{json, Value};
use std::{
    collections::BTreeMap,
    net::SocketAddr,
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc,
    },
};
use tokio::{
    net::{TcpListener, TcpStream},
    sync::{broadcast, mpsc},
    task::JoinHandle,
};
use tokio_tungstenite::{accept_async, tungstenite::Message};

use super::test_helpers::{create_subscription_push, create_test_block};

/// Chain and subscription state of the mock node.
#[derive(Debug, Default)]
pub struct NodeState {
    /// Canonical chain: block number to block hash.
    pub blocks: BTreeMap<u64, String>,
    /// Logs by block number.
    pub logs: BTreeMap<u64, Vec<Value>>,
    subscription_counter: u64,
    active_subscriptions: Vec<String>,
}

impl NodeState {
    pub fn head(&self) -> u64 {
        self.blocks.keys().next_back().copied().unwrap_or(0)
    }

    /// Sets the canonical block at `number`, replacing any previous one.
    pub fn set_block(&mut self, number: u64, hash: impl Into<String>) {
        self.blocks.insert(number, hash.into());
    }

    fn answer(&mut self, method: &str, params: &[Value]) -> Result<Value, (i64, String)> {
        match method {
            "eth_blockNumber" => Ok(json!(format!("0x{:x}", self.head()))),
            "eth_chainId" => Ok(json!("0x1")),
            "web3_clientVersion" => Ok(json!("MockNode/v1.0.0")),
            "eth_subscribe" => {
                self.subscription_counter += 1;
                let id = format!("0x{:032x}", self.subscription_counter);
                self.active_subscriptions.push(id.clone());
                Ok(json!(id))
            }
            "eth_unsubscribe" => {
                let id = params.first().and_then(Value::as_str).unwrap_or_default();
                let before = self.active_subscriptions.len();
                self.active_subscriptions.retain(|active| active != id);
                Ok(json!(before != self.active_subscriptions.len()))
            }
            "eth_getBlockByNumber" => {
                let number = params
                    .first()
                    .and_then(Value::as_str)
                    .and_then(|hex| u64::from_str_radix(hex.trim_start_matches("0x"), 16).ok())
                    .ok_or((-32602, "invalid block number".to_string()))?;
                Ok(self
                    .blocks
                    .get(&number)
                    .map_or(Value::Null, |hash| create_test_block(number, hash)))
            }
            "eth_getLogs" => {
                let filter = params.first().cloned().unwrap_or(Value::Null);
                let bound = |field: &str| {
                    filter[field]
                        .as_str()
                        .and_then(|hex| u64::from_str_radix(hex.trim_start_matches("0x"), 16).ok())
                };
                let from = bound("fromBlock").unwrap_or(0);
                let to = bound("toBlock").unwrap_or_else(|| self.head());
                let logs: Vec<Value> =
                    self.logs.range(from..=to).flat_map(|(_, logs)| logs.clone()).collect();
                Ok(Value::Array(logs))
            }
            other => Err((-32601, format!("the method {other} does not exist"))),
        }
    }

    fn respond(&mut self, request: &Value) -> Option<Value> {
        let id = request.get("id")?.clone();
        let method = request["method"].as_str().unwrap_or_default();
        let params = request["params"].as_array().map(Vec::as_slice).unwrap_or_default();

        Some(match self.answer(method, params) {
            Ok(result) => json!({ "jsonrpc": "2.0", "id": id, "result": result }),
            Err((code, message)) => {
                json!({ "jsonrpc": "2.0", "id": id, "error": { "code": code, "message": message } })
            }
        })
    }
}

/// A mock JSON-RPC node served over WebSocket.
pub struct MockNodeServer {
    addr: SocketAddr,
    state: Arc<Mutex<NodeState>>,
    received: Arc<Mutex<Vec<Value>>>,
    connections: Arc<Mutex<Vec<mpsc::UnboundedSender<Message>>>>,
    accepted: Arc<AtomicUsize>,
    server_handle: JoinHandle<()>,
    shutdown_tx: broadcast::Sender<()>,
}

impl MockNodeServer {
    /// Starts the node on a random available port.
    ///
    /// # Errors
    ///
    /// Returns an error if the server cannot bind to a local port or retrieve the bound address.
    pub async fn new() -> Result<Self, std::io::Error> {
        let listener = TcpListener::bind("127.0.0.1:0").await?;
        let addr = listener.local_addr()?;

        let state = Arc::new(Mutex::new(NodeState::default()));
        let received = Arc::new(Mutex::new(Vec::new()));
        let connections = Arc::new(Mutex::new(Vec::new()));
        let accepted = Arc::new(AtomicUsize::new(0));
        let (shutdown_tx, _) = broadcast::channel(1);

        let server_handle = tokio::spawn(Self::accept_loop(
            listener,
            ConnectionContext {
                state: state.clone(),
                received: received.clone(),
                connections: connections.clone(),
                accepted: accepted.clone(),
            },
            shutdown_tx.subscribe(),
        ));

        Ok(Self { addr, state, received, connections, accepted, server_handle, shutdown_tx })
    }

    async fn accept_loop(
        listener: TcpListener,
        context: ConnectionContext,
        mut shutdown_rx: broadcast::Receiver<()>,
    ) {
        loop {
            tokio::select! {
                result = listener.accept() => {
                    if let Ok((stream, _)) = result {
                        tokio::spawn(handle_connection(stream, context.clone()));
                    }
                }
                _ = shutdown_rx.recv() => break,
            }
        }
    }

    /// Returns the WebSocket URL for connecting to this server.
    #[must_use]
    pub fn url(&self) -> String {
        format!("ws://{}", self.addr)
    }

    /// Mutates the node state.
    pub fn with_state<R>(&self, f: impl FnOnce(&mut NodeState) -> R) -> R {
        f(&mut self.state.lock())
    }

    /// Id returned by the most recent `eth_subscribe`.
    #[must_use]
    pub fn latest_subscription_id(&self) -> Option<String> {
        self.state.lock().active_subscriptions.last().cloned()
    }

    /// Pushes an `eth_subscription` notification to every open connection.
    pub fn push(&self, subscription: &str, result: &Value) {
        let text = create_subscription_push(subscription, result).to_string();
        self.connections
            .lock()
            .retain(|connection| connection.send(Message::Text(text.clone().into())).is_ok());
    }

    /// Pushes a `newHeads` notification for the canonical block at `number`.
    pub fn push_head(&self, subscription: &str, number: u64) {
        let hash = self.state.lock().blocks.get(&number).cloned().unwrap_or_default();
        self.push(subscription, &create_test_block(number, &hash));
    }

    /// Drops every open connection without a close handshake.
    pub fn drop_connections(&self) {
        self.connections.lock().clear();
    }

    /// Number of connections accepted so far.
    #[must_use]
    pub fn accepted_connections(&self) -> usize {
        self.accepted.load(Ordering::SeqCst)
    }

    /// Every request received, batches flattened.
    #[must_use]
    pub fn received_requests(&self) -> Vec<Value> {
        self.received.lock().clone()
    }

    /// Methods of every request received.
    #[must_use]
    pub fn received_methods(&self) -> Vec<String> {
        self.received
            .lock()
            .iter()
            .filter_map(|request| request["method"].as_str().map(String::from))
            .collect()
    }

    /// Shuts down the server.
    pub fn shutdown(self) {
        let _ = self.shutdown_tx.send(());
        self.server_handle.abort();
    }
}

impl Drop for MockNodeServer {
    fn drop(&mut self) {
        let _ = self.shutdown_tx.send(());
        self.server_handle.abort();
        self.connections.lock().clear();
    }
}

#[derive(Clone)]
struct ConnectionContext {
    state: Arc<Mutex<NodeState>>,
    received: Arc<Mutex<Vec<Value>>>,
    connections: Arc<Mutex<Vec<mpsc::UnboundedSender<Message>>>>,
    accepted: Arc<AtomicUsize>,
}

async fn handle_connection(stream: TcpStream, context: ConnectionContext) {
    let Ok(ws_stream) = accept_async(stream).await else { return };
    context.accepted.fetch_add(1, Ordering::SeqCst);

    let (tx, mut pushes) = mpsc::unbounded_channel();
    context.connections.lock().push(tx);
    let (mut write, mut read) = ws_stream.split();

    loop {
        tokio::select! {
            push = pushes.recv() => {
                // Sender dropped: the test asked for this connection to go away.
                let Some(push) = push else { return };
                if write.send(push).await.is_err() {
                    return;
                }
            }
            frame = read.next() => {
                let text = match frame {
                    Some(Ok(Message::Text(text))) => text.to_string(),
                    Some(Ok(Message::Close(_)) | Err(_)) | None => return,
                    Some(Ok(_)) => continue,
                };

                let Some(reply) = reply_to(&context, &text) else { continue };
                if write.send(Message::Text(reply.to_string().into())).await.is_err() {
                    return;
                }
            }
        }
    }
}

fn reply_to(context: &ConnectionContext, text: &str) -> Option<Value> {
    let payload: Value = serde_json::from_str(text).ok()?;
    let mut state = context.state.lock();

    match payload {
        Value::Array(requests) => {
            context.received.lock().extend(requests.iter().cloned());
            let responses: Vec<Value> =
                requests.iter().filter_map(|request| state.respond(request)).collect();
            (!responses.is_empty()).then_some(Value::Array(responses))
        }
        request => {
            context.received.lock().push(request.clone());
            state.respond(&request)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio_tungstenite::connect_async;

    #[tokio::test]
    async fn test_mock_node_answers_requests() {
        let server = MockNodeServer::new().await.unwrap();
        server.with_state(|state| state.set_block(16, "0x10"));

        let (mut ws_stream, _) = connect_async(&server.url()).await.expect("Failed to connect");
        let request = json!({ "jsonrpc": "2.0", "id": 7, "method": "eth_blockNumber", "params": [] });
        ws_stream.send(Message::Text(request.to_string().into())).await.unwrap();

        let Some(Ok(Message::Text(text))) = ws_stream.next().await else {
            panic!("Expected text message");
        };
        let response: Value = serde_json::from_str(&text).unwrap();
        assert_eq!(response["id"], 7);
        assert_eq!(response["result"], "0x10");
    }

    #[tokio::test]
    async fn test_mock_node_answers_batches() {
        let server = MockNodeServer::new().await.unwrap();
        let (mut ws_stream, _) = connect_async(&server.url()).await.expect("Failed to connect");

        let batch = json!([
            { "jsonrpc": "2.0", "id": 1, "method": "eth_chainId", "params": [] },
            { "jsonrpc": "2.0", "id": 2, "method": "nope", "params": [] }
        ]);
        ws_stream.send(Message::Text(batch.to_string().into())).await.unwrap();

        let Some(Ok(Message::Text(text))) = ws_stream.next().await else {
            panic!("Expected text message");
        };
        let responses: Value = serde_json::from_str(&text).unwrap();
        assert_eq!(responses[0]["result"], "0x1");
        assert_eq!(responses[1]["error"]["code"], -32601);
        assert_eq!(server.received_methods(), vec!["eth_chainId", "nope"]);
    }

    #[tokio::test]
    async fn test_drop_connections_closes_socket() {
        let server = MockNodeServer::new().await.unwrap();
        let (mut ws_stream, _) = connect_async(&server.url()).await.expect("Failed to connect");

        while server.accepted_connections() == 0 {
            tokio::time::sleep(std::time::Duration::from_millis(5)).await;
        }
        server.drop_connections();

        let next = tokio::time::timeout(std::time::Duration::from_secs(2), ws_stream.next())
            .await
            .expect("socket should close");
        assert!(!matches!(next, Some(Ok(Message::Text(_)))));
    }
}
