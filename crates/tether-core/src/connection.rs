//! Persistent connection primitive.
//!
//! [`PersistentConnection`] is the seam between the transport/subscription layers and an
//! actual socket. Listeners receive every inbound text frame plus two lifecycle signals:
//! [`ConnectionEvent::Down`] when a live socket is lost and [`ConnectionEvent::Reopen`] once a
//! replacement socket is open and writable.
//!
//! [`WsConnection`] implements it over tokio-tungstenite with an automatic reconnect loop.

use futures_util::{SinkExt, StreamExt};
use parking_lot::Mutex;
use std::{sync::Arc, time::Duration};
use tokio::{
    net::TcpStream,
    sync::{mpsc, Notify},
};
use tokio_tungstenite::{tungstenite::Message, MaybeTlsStream, WebSocketStream};
use tokio_util::sync::CancellationToken;

use crate::{config::ConnectionConfig, errors::ConnectionError};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Inbound traffic and lifecycle signals of a persistent connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectionEvent {
    /// A text frame received from the peer.
    Message(String),
    /// The open socket was lost. A reconnect is in progress unless the connection was closed.
    Down,
    /// A new socket is open after a previous `Down`.
    Reopen,
}

/// A full-duplex, self-healing text connection.
pub trait PersistentConnection: Send + Sync {
    /// Queues a text frame for sending.
    ///
    /// # Errors
    ///
    /// Returns [`ConnectionError::NotConnected`] while no socket is open and
    /// [`ConnectionError::Closed`] after [`PersistentConnection::close`].
    fn send_text(&self, text: String) -> Result<(), ConnectionError>;

    /// Drops the current socket and starts reconnecting.
    fn reconnect(&self);

    /// Closes the connection for good. No further events are delivered.
    fn close(&self);

    /// Registers a listener. Every listener sees every event, in order.
    fn listen(&self) -> mpsc::UnboundedReceiver<ConnectionEvent>;
}

/// Tracks consecutive reconnect failures and computes the backoff delay.
#[derive(Debug)]
pub struct ReconnectTracker {
    consecutive_failures: u32,
    max_consecutive_failures: u32,
    initial_delay: Duration,
    max_delay: Duration,
}

impl ReconnectTracker {
    #[must_use]
    pub fn new(config: &ConnectionConfig) -> Self {
        Self {
            consecutive_failures: 0,
            max_consecutive_failures: config.max_consecutive_failures,
            initial_delay: Duration::from_millis(config.initial_reconnect_delay_ms),
            max_delay: Duration::from_millis(config.max_reconnect_delay_ms),
        }
    }

    pub fn record_failure(&mut self) {
        self.consecutive_failures = self.consecutive_failures.saturating_add(1);
    }

    pub fn record_success(&mut self) {
        self.consecutive_failures = 0;
    }

    /// Returns whether reconnecting should be abandoned.
    #[must_use]
    pub fn should_stop_retrying(&self) -> bool {
        self.consecutive_failures >= self.max_consecutive_failures
    }

    /// Delay before the next reconnect attempt: doubles per consecutive failure, capped.
    #[must_use]
    pub fn next_delay(&self) -> Duration {
        let exponent = self.consecutive_failures.min(16);
        self.initial_delay.saturating_mul(1 << exponent).min(self.max_delay)
    }

    #[must_use]
    pub fn get_failure_count(&self) -> u32 {
        self.consecutive_failures
    }
}

struct Shared {
    url: String,
    listeners: Mutex<Vec<mpsc::UnboundedSender<ConnectionEvent>>>,
    outgoing: Mutex<Option<mpsc::UnboundedSender<Message>>>,
    reconnect_requested: Notify,
    shutdown: CancellationToken,
}

impl Shared {
    fn broadcast(&self, event: &ConnectionEvent) {
        self.listeners.lock().retain(|listener| listener.send(event.clone()).is_ok());
    }
}

/// WebSocket connection with automatic reconnection.
#[derive(Clone)]
pub struct WsConnection {
    shared: Arc<Shared>,
}

impl WsConnection {
    /// Opens the first socket and spawns the connection task.
    ///
    /// # Errors
    ///
    /// Returns [`ConnectionError::ConnectFailed`] if the initial handshake fails.
    pub async fn connect(url: &str, config: &ConnectionConfig) -> Result<Self, ConnectionError> {
        let stream = open_socket(url).await?;

        let shared = Arc::new(Shared {
            url: url.to_string(),
            listeners: Mutex::new(Vec::new()),
            outgoing: Mutex::new(None),
            reconnect_requested: Notify::new(),
            shutdown: CancellationToken::new(),
        });

        let tracker = ReconnectTracker::new(config);
        tokio::spawn(run_connection(Arc::clone(&shared), stream, tracker));

        Ok(Self { shared })
    }
}

impl PersistentConnection for WsConnection {
    fn send_text(&self, text: String) -> Result<(), ConnectionError> {
        if self.shared.shutdown.is_cancelled() {
            return Err(ConnectionError::Closed);
        }
        let outgoing = self.shared.outgoing.lock();
        let sender = outgoing.as_ref().ok_or(ConnectionError::NotConnected)?;
        sender.send(Message::Text(text.into())).map_err(|_| ConnectionError::NotConnected)
    }

    fn reconnect(&self) {
        tracing::info!(url = %self.shared.url, "reconnect requested");
        self.shared.reconnect_requested.notify_one();
    }

    fn close(&self) {
        self.shared.shutdown.cancel();
        self.shared.outgoing.lock().take();
    }

    fn listen(&self) -> mpsc::UnboundedReceiver<ConnectionEvent> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.shared.listeners.lock().push(tx);
        rx
    }
}

async fn open_socket(url: &str) -> Result<WsStream, ConnectionError> {
    tracing::info!(ws_url = url, "connecting to websocket");

    match tokio_tungstenite::connect_async(url).await {
        Ok((stream, response)) => {
            tracing::info!(status = response.status().as_u16(), "websocket connected");
            Ok(stream)
        }
        Err(e) => {
            tracing::warn!(error = %e, "websocket connection failed");
            Err(ConnectionError::ConnectFailed(e.to_string()))
        }
    }
}

/// Owns the socket for the lifetime of the connection, reconnecting as needed.
async fn run_connection(shared: Arc<Shared>, first: WsStream, mut tracker: ReconnectTracker) {
    let mut stream = first;
    let mut reopened = false;

    loop {
        // The outgoing channel must be writable before listeners react to the reopen.
        let (tx, rx) = mpsc::unbounded_channel();
        *shared.outgoing.lock() = Some(tx);
        if reopened {
            tracing::info!(url = %shared.url, "websocket connection reopened");
            shared.broadcast(&ConnectionEvent::Reopen);
        }

        run_session(&shared, stream, rx).await;

        shared.outgoing.lock().take();
        if shared.shutdown.is_cancelled() {
            tracing::info!(url = %shared.url, "websocket connection closed");
            shared.listeners.lock().clear();
            return;
        }

        tracing::warn!(url = %shared.url, "websocket connection down");
        shared.broadcast(&ConnectionEvent::Down);

        let Some(next) = reconnect(&shared, &mut tracker).await else {
            shared.listeners.lock().clear();
            return;
        };
        stream = next;
        reopened = true;
    }
}

/// Retries the handshake with exponential backoff until it succeeds, the tracker gives up or
/// the connection is closed.
async fn reconnect(shared: &Shared, tracker: &mut ReconnectTracker) -> Option<WsStream> {
    loop {
        if tracker.should_stop_retrying() {
            tracing::error!(
                url = %shared.url,
                failure_count = tracker.get_failure_count(),
                "websocket reconnect failed repeatedly, giving up"
            );
            shared.shutdown.cancel();
            return None;
        }

        let delay = tracker.next_delay();
        tokio::select! {
            biased;
            () = shared.shutdown.cancelled() => return None,
            () = tokio::time::sleep(delay) => {}
        }

        match open_socket(&shared.url).await {
            Ok(stream) => {
                tracker.record_success();
                return Some(stream);
            }
            Err(_) => {
                tracker.record_failure();
                tracing::debug!(
                    url = %shared.url,
                    failure_count = tracker.get_failure_count(),
                    "websocket reconnect attempt failed"
                );
            }
        }
    }
}

/// Pumps frames between the socket and the listeners until the socket drops, a reconnect is
/// requested or the connection is closed.
async fn run_session(
    shared: &Shared,
    stream: WsStream,
    mut outgoing: mpsc::UnboundedReceiver<Message>,
) {
    let (mut write, mut read) = stream.split();

    loop {
        tokio::select! {
            biased;

            () = shared.shutdown.cancelled() => {
                let _ = write.send(Message::Close(None)).await;
                return;
            }

            () = shared.reconnect_requested.notified() => {
                let _ = write.send(Message::Close(None)).await;
                return;
            }

            frame = outgoing.recv() => {
                let Some(frame) = frame else { return };
                if let Err(e) = write.send(frame).await {
                    tracing::warn!(error = %e, "websocket send failed");
                    return;
                }
            }

            msg = read.next() => {
                match msg {
                    Some(Ok(Message::Text(text))) => {
                        shared.broadcast(&ConnectionEvent::Message(text.as_str().to_owned()));
                    }
                    Some(Ok(Message::Close(_))) | None => {
                        tracing::debug!("websocket closed by peer");
                        return;
                    }
                    Some(Err(e)) => {
                        tracing::warn!(error = %e, "websocket read error");
                        return;
                    }
                    Some(Ok(_)) => {}
                }
            }
        }
    }
}
