use clap::ValueEnum;
use serde_json::{json, Value};
use tether_core::{types::LogFilter, Client};

use super::utils::{print_info, CliResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum WatchKind {
    NewHeads,
    Logs,
}

#[derive(Debug, Clone)]
pub struct WatchOptions {
    pub kind: WatchKind,
    pub address: Option<String>,
    pub topics: Vec<String>,
    /// Stop after this many events.
    pub count: Option<usize>,
}

/// Builds `eth_subscribe` params for the options.
pub fn subscription_params(options: &WatchOptions) -> CliResult<Vec<Value>> {
    match options.kind {
        WatchKind::NewHeads => Ok(vec![json!("newHeads")]),
        WatchKind::Logs => {
            let filter = LogFilter {
                address: options.address.clone().map(Value::String),
                topics: (!options.topics.is_empty()).then(|| json!(options.topics)),
            };
            Ok(vec![json!("logs"), serde_json::to_value(filter)?])
        }
    }
}

/// Streams subscription events to stdout, one JSON object per line, until `count` events were
/// printed or Ctrl-C.
pub async fn run_watch(client: &Client, options: WatchOptions) -> CliResult<()> {
    let params = subscription_params(&options)?;
    let mut subscription = client.subscribe(params).await?;
    print_info(&format!("Subscribed with id {}", subscription.id()));

    let mut received = 0usize;
    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => break,
            event = subscription.recv() => {
                let Some(event) = event else { break };
                println!("{}", serde_json::to_string(&event)?);
                received += 1;
                if options.count.is_some_and(|count| received >= count) {
                    break;
                }
            }
        }
    }

    client.unsubscribe(subscription.id()).await?;
    client.disconnect();
    print_info(&format!("Received {received} events"));
    Ok(())
}
