//! Paginated GraphQL access to the KlimaDAO subgraph on The Graph gateway.

pub mod protocol_metrics;
pub mod treasury;

use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::Client;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;
use thiserror::Error;

use crate::config::SubgraphConfig;

const DEFAULT_CONNECT_TIMEOUT_SECS: u64 = 6;

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct GraphQlRequest {
    pub query: String,
    pub variables: Value,
}

#[derive(Debug, Error)]
pub enum GraphQlError {
    #[error("subgraph returned errors: {}", .0.join("; "))]
    Query(Vec<String>),
    #[error("subgraph response has no data")]
    MissingData,
}

#[derive(Debug, Deserialize)]
struct GraphQlMessage {
    message: String,
}

#[derive(Debug, Deserialize)]
struct GraphQlResponse {
    #[serde(default)]
    data: Option<Value>,
    #[serde(default)]
    errors: Option<Vec<GraphQlMessage>>,
}

/// A GraphQL endpoint answering with the `data` object of each response.
#[async_trait]
pub trait SubgraphQuery: Send + Sync {
    async fn query(&self, request: &GraphQlRequest) -> Result<Value>;
}

/// Pagination knobs shared by both time-series fetchers.
#[derive(Debug, Clone)]
pub struct PageOptions {
    pub page_size: u32,
    pub pause: Duration,
}

impl From<&SubgraphConfig> for PageOptions {
    fn from(config: &SubgraphConfig) -> Self {
        Self {
            page_size: config.page_size.max(1),
            pause: config.request_pause(),
        }
    }
}

pub struct GatewayClient {
    client: Client,
    endpoint: String,
}

impl GatewayClient {
    pub fn new(endpoint: impl Into<String>, timeout: Duration) -> Result<Self> {
        let client = Client::builder()
            .user_agent(concat!("kip-harvest/", env!("CARGO_PKG_VERSION")))
            .timeout(timeout)
            .connect_timeout(Duration::from_secs(DEFAULT_CONNECT_TIMEOUT_SECS))
            .build()
            .context("failed to build HTTP client")?;
        Ok(Self {
            client,
            endpoint: endpoint.into(),
        })
    }

    pub fn from_config(config: &SubgraphConfig) -> Result<Self> {
        config.ensure_credentials()?;
        Self::new(config.endpoint(), Duration::from_secs(config.timeout_secs))
    }
}

#[async_trait]
impl SubgraphQuery for GatewayClient {
    async fn query(&self, request: &GraphQlRequest) -> Result<Value> {
        let response = self
            .client
            .post(&self.endpoint)
            .json(request)
            .send()
            .await
            .context("failed POST to subgraph gateway")?;
        let status = response.status();
        let body = response
            .text()
            .await
            .context("failed reading subgraph response body")?;
        if !status.is_success() {
            let preview: String = body.chars().take(180).collect();
            return Err(anyhow!("subgraph gateway returned {status}: {preview}"));
        }
        let parsed: GraphQlResponse =
            serde_json::from_str(&body).context("invalid JSON from subgraph gateway")?;
        if let Some(errors) = parsed.errors.filter(|e| !e.is_empty()) {
            return Err(GraphQlError::Query(errors.into_iter().map(|e| e.message).collect()).into());
        }
        parsed.data.ok_or_else(|| GraphQlError::MissingData.into())
    }
}

/// Decode the entity list under `field` of a `data` object.
pub fn entities<T>(data: &Value, field: &str) -> Result<Vec<T>>
where
    T: for<'de> Deserialize<'de>,
{
    let list = data
        .get(field)
        .ok_or_else(|| anyhow!("subgraph response is missing `{field}`"))?;
    serde_json::from_value(list.clone()).with_context(|| format!("malformed `{field}` entities"))
}

pub fn to_datetime(timestamp: i64) -> Option<DateTime<Utc>> {
    DateTime::<Utc>::from_timestamp(timestamp, 0)
}

/// `2021-10-01 00:00:00 UTC`, for progress lines.
pub fn format_utc(timestamp: i64) -> String {
    to_datetime(timestamp)
        .map(|dt| dt.format("%Y-%m-%d %H:%M:%S UTC").to_string())
        .unwrap_or_else(|| timestamp.to_string())
}

/// Subgraph `BigInt` scalars arrive as JSON strings; accept bare numbers too.
pub(crate) fn de_big_int<'de, D>(deserializer: D) -> Result<i64, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Value::deserialize(deserializer)?;
    match &value {
        Value::Number(n) => n
            .as_i64()
            .or_else(|| n.as_f64().map(|f| f as i64))
            .ok_or_else(|| serde::de::Error::custom(format!("invalid BigInt: {n}"))),
        Value::String(s) => s
            .trim()
            .parse::<i64>()
            .map_err(|_| serde::de::Error::custom(format!("invalid BigInt: {s}"))),
        other => Err(serde::de::Error::custom(format!("invalid BigInt: {other}"))),
    }
}

/// Subgraph `BigDecimal` scalars arrive as JSON strings; `null` stays missing.
pub(crate) fn de_big_decimal<'de, D>(deserializer: D) -> Result<Option<f64>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Value::deserialize(deserializer)?;
    match &value {
        Value::Null => Ok(None),
        Value::Number(n) => n
            .as_f64()
            .map(Some)
            .ok_or_else(|| serde::de::Error::custom(format!("invalid BigDecimal: {n}"))),
        Value::String(s) => s
            .trim()
            .parse::<f64>()
            .map(Some)
            .map_err(|_| serde::de::Error::custom(format!("invalid BigDecimal: {s}"))),
        other => Err(serde::de::Error::custom(format!("invalid BigDecimal: {other}"))),
    }
}
