//! JSON in and out of `sealrpc call`.

use anyhow::{bail, Context, Result};
use sealrpc_client::Reply;
use sealrpc_common::{RefKind, Value};

/// Parses the `--args` option: a JSON array of positional arguments.
pub fn parse_args(args: &str) -> Result<Vec<Value>> {
    let json: serde_json::Value = serde_json::from_str(args).context("Invalid JSON in args")?;
    match json {
        serde_json::Value::Array(items) => Ok(items.into_iter().map(Value::from).collect()),
        other => bail!("args must be a JSON array, got {}", other),
    }
}

/// Renders a reply. Handles are shown as the reference they stand for.
pub fn reply_to_json(reply: &Reply) -> serde_json::Value {
    match reply {
        Reply::Value(value) => value.to_json(),
        Reply::Secret(secret) => Value::reference(RefKind::Secret, secret.object().clone()).to_json(),
        Reply::Proxy(proxy) => Value::reference(RefKind::Proxy, proxy.object().clone()).to_json(),
        Reply::Tuple(items) => serde_json::Value::Array(items.iter().map(reply_to_json).collect()),
    }
}
