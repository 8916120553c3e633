//! RPC commands: call, job, subscribe, version, ping.

use std::io::Write;
use std::time::Instant;

use serde_json::Value;
use tracing::debug;

use mwrpc_client::Transport;

use crate::error::{CliError, CliResult};

/// Parses a JSON parameter argument. Missing means no parameters; a value
/// that is not an array becomes the only element of one.
pub fn parse_params(raw: Option<&str>) -> CliResult<Value> {
    let Some(raw) = raw else {
        return Ok(Value::Array(Vec::new()));
    };
    let value: Value = serde_json::from_str(raw).map_err(|source| CliError::InvalidJson {
        what: "params",
        source,
    })?;
    Ok(match value {
        Value::Array(_) => value,
        other => Value::Array(vec![other]),
    })
}

/// Parses an optional JSON filter. Missing means no filter.
pub fn parse_filter(raw: Option<&str>) -> CliResult<Value> {
    match raw {
        Some(raw) => serde_json::from_str(raw).map_err(|source| CliError::InvalidJson {
            what: "filter",
            source,
        }),
        None => Ok(Value::Null),
    }
}

fn print_json(out: &mut dyn Write, value: &Value) -> CliResult<()> {
    let text = serde_json::to_string_pretty(value).map_err(|source| CliError::InvalidJson {
        what: "result",
        source,
    })?;
    writeln!(out, "{}", text)?;
    Ok(())
}

/// Calls `method` and prints the result.
pub async fn call(
    transport: &dyn Transport,
    method: &str,
    params: Value,
    out: &mut dyn Write,
) -> CliResult<()> {
    let result = transport.call(method, params).await?;
    print_json(out, &result)
}

/// Runs a job and prints its result once it finishes.
pub async fn job(
    transport: &dyn Transport,
    method: &str,
    params: Value,
    out: &mut dyn Write,
) -> CliResult<()> {
    let started = Instant::now();
    let result = transport.call_and_wait(method, params).await?;
    debug!(method = %method, elapsed_ms = started.elapsed().as_millis() as u64, "job finished");
    print_json(out, &result)
}

/// Prints events of `collection` until `count` events were seen or the
/// subscription ends.
pub async fn subscribe(
    transport: &dyn Transport,
    collection: &str,
    filter: Value,
    count: Option<usize>,
    out: &mut dyn Write,
) -> CliResult<()> {
    let mut subscription = transport.subscribe(collection, filter).await?;
    let mut seen = 0;
    while count.is_none_or(|limit| seen < limit) {
        let Some(event) = subscription.recv().await else {
            break;
        };
        writeln!(out, "{}", event)?;
        out.flush()?;
        seen += 1;
    }
    if subscription.dropped() > 0 {
        debug!(dropped = subscription.dropped(), "events dropped while printing");
    }
    subscription.close();
    Ok(())
}

/// Prints the server version detected at connect time.
pub fn version(transport: &dyn Transport, out: &mut dyn Write) -> CliResult<()> {
    writeln!(out, "{}", transport.version())?;
    Ok(())
}

/// Pings the server and prints the round trip time.
pub async fn ping(transport: &dyn Transport, out: &mut dyn Write) -> CliResult<()> {
    let started = Instant::now();
    let reply = transport.call(mwrpc_client::methods::PING, Value::Null).await?;
    let elapsed = started.elapsed();
    match reply.as_str() {
        Some(text) => writeln!(out, "{} ({} ms)", text, elapsed.as_millis())?,
        None => writeln!(out, "{} ({} ms)", reply, elapsed.as_millis())?,
    }
    Ok(())
}
