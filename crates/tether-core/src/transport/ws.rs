use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::Value;
use std::{collections::HashMap, sync::Arc};
use tokio::{
    sync::{mpsc, oneshot},
    task::JoinHandle,
};

use super::{SendOutcome, Transport};
use crate::{
    connection::{ConnectionEvent, PersistentConnection},
    errors::TetherError,
    id::{canonical_request_id, canonical_response_id},
    types::{InboundMessage, JsonRpcResponse, Payload, PayloadResponse, RequestId},
};

type PendingMap = HashMap<RequestId, oneshot::Sender<SendOutcome>>;

/// Request/response correlation over a [`PersistentConnection`].
///
/// Each outgoing payload is registered under its id (the canonical id for batches) and the
/// caller is resumed when the response with the matching id arrives. Subscription pushes are
/// not this layer's concern and are skipped.
pub struct WsTransport {
    connection: Arc<dyn PersistentConnection>,
    pending: Arc<Mutex<PendingMap>>,
    router: JoinHandle<()>,
}

impl WsTransport {
    /// Creates the transport and starts routing responses from `connection`.
    #[must_use]
    pub fn new(connection: Arc<dyn PersistentConnection>) -> Self {
        let pending = Arc::new(Mutex::new(HashMap::new()));
        let events = connection.listen();
        let router = tokio::spawn(route_responses(events, Arc::clone(&pending)));
        Self { connection, pending, router }
    }

    /// Number of requests awaiting a response.
    #[must_use]
    pub fn pending_count(&self) -> usize {
        self.pending.lock().len()
    }

    fn register(&self, id: RequestId) -> oneshot::Receiver<SendOutcome> {
        let (tx, rx) = oneshot::channel();
        let previous = self.pending.lock().insert(id.clone(), tx);

        if let Some(previous) = previous {
            let error = TetherError::SubscriptionIdCollision { id: id.clone() };
            tracing::warn!(id = %id, error = %error, "request id reused while still pending");
            let _ = previous.send(SendOutcome::network_error(
                0,
                format!(
                    "Another request was made with the same id ({id}) before a response was received."
                ),
            ));
        }

        rx
    }
}

impl Drop for WsTransport {
    fn drop(&mut self) {
        self.router.abort();
    }
}

#[async_trait]
impl Transport for WsTransport {
    async fn send(&self, payload: &Payload) -> SendOutcome {
        let id = match payload {
            Payload::Single(request) => request.id.clone(),
            Payload::Batch(requests) => canonical_request_id(requests),
        };

        let text = match serde_json::to_string(payload) {
            Ok(text) => text,
            Err(e) => return SendOutcome::network_error(0, format!("failed to serialize: {e}")),
        };

        let Some(id) = id else {
            // Nothing to correlate a response with: fire and forget.
            tracing::debug!(payload = %payload.describe(), "sending uncorrelated payload");
            if let Err(e) = self.connection.send_text(text) {
                return SendOutcome::network_error(0, e.to_string());
            }
            return SendOutcome::Success(match payload {
                Payload::Single(_) => {
                    PayloadResponse::Single(JsonRpcResponse::success(Value::Null, RequestId::Null))
                }
                Payload::Batch(_) => PayloadResponse::Batch(Vec::new()),
            });
        };

        let response = self.register(id.clone());
        tracing::debug!(id = %id, payload = %payload.describe(), "sending websocket request");

        if let Err(e) = self.connection.send_text(text) {
            self.pending.lock().remove(&id);
            return SendOutcome::network_error(0, e.to_string());
        }

        response.await.unwrap_or_else(|_| {
            SendOutcome::network_error(
                0,
                format!("connection closed before response for request with id: {id}"),
            )
        })
    }
}

async fn route_responses(
    mut events: mpsc::UnboundedReceiver<ConnectionEvent>,
    pending: Arc<Mutex<PendingMap>>,
) {
    while let Some(event) = events.recv().await {
        match event {
            ConnectionEvent::Message(text) => {
                let InboundMessage::Response(response) = InboundMessage::parse(&text) else {
                    continue;
                };
                let id = match &response {
                    PayloadResponse::Single(single) => Some(single.id.clone()),
                    PayloadResponse::Batch(responses) => canonical_response_id(responses),
                };
                let Some(id) = id else { continue };

                let resolver = pending.lock().remove(&id);
                match resolver {
                    Some(resolver) => {
                        let _ = resolver.send(SendOutcome::from_response(response));
                    }
                    None => tracing::debug!(id = %id, "response for unknown request id"),
                }
            }
            ConnectionEvent::Down => fail_pending(&pending),
            ConnectionEvent::Reopen => {}
        }
    }

    fail_pending(&pending);
}

fn fail_pending(pending: &Mutex<PendingMap>) {
    let drained: Vec<_> = pending.lock().drain().collect();
    if !drained.is_empty() {
        tracing::debug!(count = drained.len(), "failing pending requests after connection loss");
    }
    for (id, resolver) in drained {
        let _ = resolver.send(SendOutcome::network_error(
            0,
            format!("connection closed before response for request with id: {id}"),
        ));
    }
}
