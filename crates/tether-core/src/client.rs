use serde_json::Value;
use std::sync::Arc;
use url::Url;

use crate::{
    config::TetherConfig,
    connection::{PersistentConnection, WsConnection},
    errors::TetherError,
    rpc::{BatchPart, RpcClient},
    sender::{PayloadSender, SecondaryProvider},
    subscription::{Subscription, SubscriptionProvider},
    transport::{http::HttpTransport, rest::RestSender, ws::WsTransport, Transport},
};

/// Everything needed to talk to one endpoint.
///
/// HTTP(S) endpoints get request/batch support only; WebSocket endpoints additionally get
/// persistent subscriptions.
pub struct Client {
    url: String,
    config: TetherConfig,
    rpc: Arc<RpcClient>,
    subscriptions: Option<SubscriptionProvider>,
}

impl Client {
    /// Builds the transport stack for `url`.
    ///
    /// # Errors
    ///
    /// - [`TetherError::Config`] if `config` is invalid
    /// - [`TetherError::UnsupportedUrl`] for schemes other than `http`, `https`, `ws`, `wss`
    /// - [`TetherError::Connection`] if the initial WebSocket handshake fails
    pub async fn connect(url: &str, config: TetherConfig) -> Result<Self, TetherError> {
        config.validate().map_err(TetherError::Config)?;
        let parsed = Url::parse(url).map_err(|e| TetherError::UnsupportedUrl(e.to_string()))?;

        let (rpc, subscriptions) = match parsed.scheme() {
            "http" | "https" => {
                let transport: Arc<dyn Transport> = Arc::new(HttpTransport::new(url, &config.http)?);
                (Self::rpc_client(transport, &config), None)
            }
            "ws" | "wss" => {
                let connection: Arc<dyn PersistentConnection> =
                    Arc::new(WsConnection::connect(url, &config.connection).await?);
                let transport: Arc<dyn Transport> =
                    Arc::new(WsTransport::new(Arc::clone(&connection)));
                let rpc = Self::rpc_client(transport, &config);
                let provider = SubscriptionProvider::new(
                    connection,
                    Arc::clone(&rpc),
                    config.subscriptions.clone(),
                );
                (rpc, Some(provider))
            }
            other => {
                return Err(TetherError::UnsupportedUrl(format!(
                    "{url}: scheme {other} is not supported, use http(s) or ws(s)"
                )))
            }
        };

        tracing::info!(url = url, subscriptions = subscriptions.is_some(), "client ready");
        Ok(Self { url: url.to_string(), config, rpc, subscriptions })
    }

    fn rpc_client(transport: Arc<dyn Transport>, config: &TetherConfig) -> Arc<RpcClient> {
        let sender = Arc::new(PayloadSender::new(transport, config.retry.clone()));
        Arc::new(RpcClient::new(sender))
    }

    #[must_use]
    pub fn url(&self) -> &str {
        &self.url
    }

    #[must_use]
    pub fn rpc(&self) -> &Arc<RpcClient> {
        &self.rpc
    }

    /// The subscription provider, present for WebSocket endpoints only.
    #[must_use]
    pub fn subscriptions(&self) -> Option<&SubscriptionProvider> {
        self.subscriptions.as_ref()
    }

    /// Installs or removes the provider used for denied methods and failover.
    pub fn set_secondary_provider(&self, secondary: Option<SecondaryProvider>) {
        self.rpc.sender().set_secondary_provider(secondary);
    }

    pub async fn request(&self, method: &str, params: Vec<Value>) -> Result<Value, TetherError> {
        self.rpc.request(method, params).await
    }

    pub async fn batch(&self, parts: Vec<BatchPart>) -> Result<Vec<Value>, TetherError> {
        self.rpc.batch(parts).await
    }

    /// Subscribes with `eth_subscribe`.
    ///
    /// # Errors
    ///
    /// Returns [`TetherError::UnsupportedUrl`] for HTTP endpoints.
    pub async fn subscribe(&self, params: Vec<Value>) -> Result<Subscription, TetherError> {
        self.subscription_provider()?.subscribe(params).await
    }

    pub async fn unsubscribe(&self, virtual_id: &str) -> Result<bool, TetherError> {
        self.subscription_provider()?.unsubscribe(virtual_id).await
    }

    /// REST sender for provider endpoints next to this JSON-RPC endpoint.
    ///
    /// # Errors
    ///
    /// Returns [`TetherError::UnsupportedUrl`] for WebSocket endpoints.
    pub fn rest(&self) -> Result<RestSender, TetherError> {
        RestSender::new(&self.url, self.config.retry.clone(), &self.config.http)
    }

    /// Stops background tasks and closes the connection, if any.
    pub fn disconnect(&self) {
        if let Some(provider) = &self.subscriptions {
            provider.disconnect();
        }
    }

    fn subscription_provider(&self) -> Result<&SubscriptionProvider, TetherError> {
        self.subscriptions.as_ref().ok_or_else(|| {
            TetherError::UnsupportedUrl(format!(
                "{}: subscriptions require a WebSocket endpoint",
                self.url
            ))
        })
    }
}
