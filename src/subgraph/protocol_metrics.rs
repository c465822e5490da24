use std::path::Path;

use anyhow::Result;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::info;

use crate::output::csv::{write_protocol_metrics, ExportSummary};
use crate::subgraph::{
    de_big_decimal, de_big_int, entities, format_utc, to_datetime, GraphQlRequest, PageOptions,
    SubgraphQuery,
};

const QUERY: &str = r#"query ProtocolMetrics($first: Int!, $where: ProtocolMetric_filter) {
  protocolMetrics(first: $first, where: $where, orderBy: timestamp, orderDirection: asc) {
    id
    timestamp
    klimaCirculatingSupply
    sKlimaCirculatingSupply
    totalSupply
    totalKlimaUnstaked
    klimaPrice
    marketCap
    klimaIndex
    treasuryBalanceKLIMA
    treasuryBalanceUSDC
    treasuryCarbon
    treasuryCarbonCustodied
    treasuryMarketValue
    treasuryUSDCInLP
    totalValueLocked
    totalKlimaInLP
    runwayCurrent
  }
}"#;

pub const COLUMNS: [&str; 19] = [
    "id",
    "timestamp",
    "klimaCirculatingSupply",
    "sKlimaCirculatingSupply",
    "totalSupply",
    "totalKlimaUnstaked",
    "klimaPrice",
    "marketCap",
    "klimaIndex",
    "treasuryBalanceKLIMA",
    "treasuryBalanceUSDC",
    "treasuryCarbon",
    "treasuryCarbonCustodied",
    "treasuryMarketValue",
    "treasuryUSDCInLP",
    "totalValueLocked",
    "totalKlimaInLP",
    "runwayCurrent",
    "datetime",
];

/// One daily protocol snapshot from the `protocolMetrics` collection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProtocolMetric {
    pub id: String,
    #[serde(deserialize_with = "de_big_int")]
    pub timestamp: i64,
    #[serde(deserialize_with = "de_big_decimal")]
    pub klima_circulating_supply: Option<f64>,
    #[serde(deserialize_with = "de_big_decimal")]
    pub s_klima_circulating_supply: Option<f64>,
    #[serde(deserialize_with = "de_big_decimal")]
    pub total_supply: Option<f64>,
    #[serde(deserialize_with = "de_big_decimal")]
    pub total_klima_unstaked: Option<f64>,
    #[serde(deserialize_with = "de_big_decimal")]
    pub klima_price: Option<f64>,
    #[serde(deserialize_with = "de_big_decimal")]
    pub market_cap: Option<f64>,
    #[serde(deserialize_with = "de_big_decimal")]
    pub klima_index: Option<f64>,
    #[serde(rename = "treasuryBalanceKLIMA", deserialize_with = "de_big_decimal")]
    pub treasury_balance_klima: Option<f64>,
    #[serde(rename = "treasuryBalanceUSDC", deserialize_with = "de_big_decimal")]
    pub treasury_balance_usdc: Option<f64>,
    #[serde(deserialize_with = "de_big_decimal")]
    pub treasury_carbon: Option<f64>,
    #[serde(deserialize_with = "de_big_decimal")]
    pub treasury_carbon_custodied: Option<f64>,
    #[serde(deserialize_with = "de_big_decimal")]
    pub treasury_market_value: Option<f64>,
    #[serde(rename = "treasuryUSDCInLP", deserialize_with = "de_big_decimal")]
    pub treasury_usdc_in_lp: Option<f64>,
    #[serde(deserialize_with = "de_big_decimal")]
    pub total_value_locked: Option<f64>,
    #[serde(rename = "totalKlimaInLP", deserialize_with = "de_big_decimal")]
    pub total_klima_in_lp: Option<f64>,
    #[serde(deserialize_with = "de_big_decimal")]
    pub runway_current: Option<f64>,
}

impl ProtocolMetric {
    pub fn numeric_fields(&self) -> [Option<f64>; 16] {
        [
            self.klima_circulating_supply,
            self.s_klima_circulating_supply,
            self.total_supply,
            self.total_klima_unstaked,
            self.klima_price,
            self.market_cap,
            self.klima_index,
            self.treasury_balance_klima,
            self.treasury_balance_usdc,
            self.treasury_carbon,
            self.treasury_carbon_custodied,
            self.treasury_market_value,
            self.treasury_usdc_in_lp,
            self.total_value_locked,
            self.total_klima_in_lp,
            self.runway_current,
        ]
    }
}

/// A fetched metric plus its derived UTC datetime.
#[derive(Debug, Clone, PartialEq)]
pub struct ProtocolMetricRow {
    pub metric: ProtocolMetric,
    pub datetime: Option<DateTime<Utc>>,
}

/// Page filter: everything after the cursor, or everything on the first page.
///
/// Known gap: the strict `timestamp_gt` cursor skips any record that shares
/// the last timestamp of the previous page.
pub fn page_filter(cursor: Option<i64>) -> Value {
    match cursor {
        Some(ts) => json!({ "timestamp_gt": ts.to_string() }),
        None => json!({}),
    }
}

pub fn page_request(cursor: Option<i64>, page_size: u32) -> GraphQlRequest {
    GraphQlRequest {
        query: QUERY.to_string(),
        variables: json!({ "first": page_size, "where": page_filter(cursor) }),
    }
}

/// Walk the whole collection, `page_size` records at a time, until a page comes back empty.
pub async fn fetch_all<C>(client: &C, opts: &PageOptions) -> Result<Vec<ProtocolMetric>>
where
    C: SubgraphQuery + ?Sized,
{
    let mut cursor: Option<i64> = None;
    let mut out: Vec<ProtocolMetric> = Vec::new();
    let mut batch = 1u32;

    loop {
        info!("fetching protocol metrics batch {batch}");
        let data = client.query(&page_request(cursor, opts.page_size)).await?;
        let page: Vec<ProtocolMetric> = entities(&data, "protocolMetrics")?;
        let (Some(first), Some(last)) = (page.first(), page.last()) else {
            info!("no more data available");
            break;
        };
        info!(
            "fetched {} records, time range {} to {}",
            page.len(),
            format_utc(first.timestamp),
            format_utc(last.timestamp)
        );
        cursor = Some(last.timestamp);
        out.extend(page);
        batch += 1;

        tokio::time::sleep(opts.pause).await;
    }

    Ok(out)
}

pub fn normalize(metrics: Vec<ProtocolMetric>) -> Vec<ProtocolMetricRow> {
    metrics
        .into_iter()
        .map(|metric| ProtocolMetricRow {
            datetime: to_datetime(metric.timestamp),
            metric,
        })
        .collect()
}

pub async fn run<C>(client: &C, opts: &PageOptions, output: &Path) -> Result<ExportSummary>
where
    C: SubgraphQuery + ?Sized,
{
    let metrics = fetch_all(client, opts).await?;
    let rows = normalize(metrics);
    write_protocol_metrics(output, &rows)
}
