use anyhow::{Context, Result};
use serde::Serialize;

pub fn render_json<T: Serialize + ?Sized>(value: &T) -> Result<String> {
    Ok(serde_json::to_string_pretty(value)?)
}

/// Voting options as stored in the `options` CSV column, e.g. `["For","Against"]`.
pub fn encode_options(options: &[String]) -> Result<String> {
    Ok(serde_json::to_string(options)?)
}

pub fn decode_options(raw: &str) -> Result<Vec<String>> {
    serde_json::from_str(raw).with_context(|| format!("options column is not a JSON array: {raw}"))
}
