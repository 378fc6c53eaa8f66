use serde_json::Value;
use tether_core::Client;

use super::utils::{CliError, CliResult};

/// Parses `params` as a JSON array. An empty string means no params.
pub fn parse_params(params: &str) -> CliResult<Vec<Value>> {
    if params.trim().is_empty() {
        return Ok(Vec::new());
    }

    match serde_json::from_str(params)? {
        Value::Array(params) => Ok(params),
        other => Err(CliError::General(format!("params must be a JSON array, got {other}"))),
    }
}

pub async fn run_call(client: &Client, method: &str, params: &str) -> CliResult<()> {
    let params = parse_params(params)?;
    tracing::debug!(method = method, params = params.len(), "calling");

    let result = client.request(method, params).await?;
    println!("{}", serde_json::to_string_pretty(&result)?);
    Ok(())
}
