use std::sync::Arc;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

use super::Inner;

const HEARTBEAT_METHOD: &str = "web3_clientVersion";

impl Inner {
    /// Starts a fresh heartbeat task, stopping any previous one.
    pub(super) fn start_heartbeat(self: &Arc<Self>) {
        let token = self.shutdown.child_token();
        if let Some(previous) = self.heartbeat_token.lock().replace(token.clone()) {
            previous.cancel();
        }
        tokio::spawn(run_heartbeat(Arc::clone(self), token));
    }

    pub(super) fn stop_heartbeat(&self) {
        if let Some(token) = self.heartbeat_token.lock().take() {
            token.cancel();
        }
    }
}

/// Probes the connection every heartbeat interval and forces a reconnect when a probe fails
/// or times out.
async fn run_heartbeat(inner: Arc<Inner>, token: CancellationToken) {
    let period = inner.config.heartbeat_interval();
    let timeout = inner.config.heartbeat_timeout();
    let mut ticker = interval_at(Instant::now() + period, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            biased;
            () = token.cancelled() => return,
            _ = ticker.tick() => {}
        }

        let probe =
            tokio::time::timeout(timeout, inner.rpc.request(HEARTBEAT_METHOD, Vec::new())).await;
        if token.is_cancelled() {
            return;
        }

        match probe {
            Ok(Ok(_)) => tracing::trace!("heartbeat ok"),
            Ok(Err(error)) => {
                tracing::warn!(error = %error, "heartbeat failed, reconnecting");
                inner.connection.reconnect();
            }
            Err(_) => {
                tracing::warn!(
                    timeout_ms = u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX),
                    "heartbeat timed out, reconnecting"
                );
                inner.connection.reconnect();
            }
        }
    }
}
