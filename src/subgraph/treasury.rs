use std::path::Path;

use anyhow::Result;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::{info, warn};

use crate::output::csv::{write_treasury_assets, ExportSummary};
use crate::subgraph::{
    de_big_decimal, de_big_int, entities, format_utc, GraphQlRequest, PageOptions, SubgraphQuery,
};

const QUERY: &str = r#"query TreasuryAssets($first: Int!, $where: TreasuryAsset_filter) {
  treasuryAssets(first: $first, where: $where, orderBy: timestamp, orderDirection: asc) {
    id
    timestamp
    token
    tokenBalance
  }
}"#;

pub const COLUMNS: [&str; 5] = ["id", "timestamp", "token", "tokenBalance", "token_name"];

/// Treasury token and LP addresses on Polygon.
pub const TOKEN_SYMBOLS: [(&str, &str); 15] = [
    ("0x251ca6a70cbd93ccd7039b6b708d4cb9683c266c", "NBO/KLIMA"),
    ("0x9803c7ae526049210a1725f7487af26fe2c24614", "BCT/KLIMA"),
    ("0x1e67124681b402064cd0abe8ed1b5c79d2e02f64", "BCT/USDC"),
    ("0x2b3ecb0991af0498ece9135bcd04013d7993110c", "UBO"),
    ("0xaa7dbd1598251f856c12f63557a4c4397c253cea", "MCO2"),
    ("0x5400a05b8b45eaf9105315b4f2e31f806ab706de", "UBO/KLIMA"),
    ("0xb2d0d5c86d933b0acefe9b95bec160d514d152e1", "NCT/KLIMA"),
    ("0xd838290e877e0188a4a44700463419ed96c16107", "NCT"),
    ("0x5786b267d35f9d011c4750e0b0ba584e1fdbead1", "KLIMA/USDC.e"),
    ("0x64a3b8ca5a7e406a78e660ae10c7563d9153a739", "MCO2/KLIMA"),
    ("0x82b37070e43c1ba0ea9e2283285b674ef7f1d4e2", "CCO2"),
    ("0x6bca3b77c1909ce1a4ba1a20d1103bde8d222e48", "NBO"),
    ("0x2791bca1f2de4661ed88a30c99a7a9449aa84174", "USDC.e"),
    ("0x4e78011ce80ee02d2c3e649fb657e45898257815", "Klima"),
    ("0x2f800db0fdb5223b3c3f354886d907a671414a7f", "BCT"),
];

pub fn token_symbol(address: &str) -> Option<&'static str> {
    let address = address.trim();
    TOKEN_SYMBOLS
        .iter()
        .find(|(known, _)| known.eq_ignore_ascii_case(address))
        .map(|(_, symbol)| *symbol)
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TreasuryAsset {
    pub id: String,
    #[serde(deserialize_with = "de_big_int")]
    pub timestamp: i64,
    pub token: String,
    #[serde(deserialize_with = "de_big_decimal")]
    pub token_balance: Option<f64>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct TreasuryAssetRow {
    pub asset: TreasuryAsset,
    pub token_name: Option<&'static str>,
}

/// Half-open `[start, end)` range of unix timestamps.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimeWindow {
    pub start: i64,
    pub end: i64,
}

impl TimeWindow {
    pub fn request(&self, page_size: u32) -> GraphQlRequest {
        GraphQlRequest {
            query: QUERY.to_string(),
            variables: json!({
                "first": page_size,
                "where": {
                    "timestamp_gte": self.start.to_string(),
                    "timestamp_lt": self.end.to_string(),
                }
            }),
        }
    }
}

/// Contiguous windows of `width` seconds from `start` up to `now`; the last
/// window is clamped to `now`.
pub fn sweep_windows(start: i64, now: i64, width: i64) -> Vec<TimeWindow> {
    let width = width.max(1);
    let mut windows = Vec::new();
    let mut current = start;
    while current < now {
        let end = current.saturating_add(width).min(now);
        windows.push(TimeWindow {
            start: current,
            end,
        });
        current = end;
    }
    windows
}

#[derive(Debug, Clone)]
pub struct SweepOptions {
    pub page: PageOptions,
    pub start: i64,
    pub window_secs: i64,
}

pub async fn fetch_all<C>(client: &C, opts: &SweepOptions, now: i64) -> Result<Vec<TreasuryAsset>>
where
    C: SubgraphQuery + ?Sized,
{
    let mut out = Vec::new();
    for (idx, window) in sweep_windows(opts.start, now, opts.window_secs)
        .into_iter()
        .enumerate()
    {
        info!(
            "fetching treasury batch {}: {} to {}",
            idx + 1,
            format_utc(window.start),
            format_utc(window.end)
        );
        let data = client.query(&window.request(opts.page.page_size)).await?;
        let assets: Vec<TreasuryAsset> = entities(&data, "treasuryAssets")?;
        if assets.is_empty() {
            info!("no data fetched for this window");
        } else {
            info!("fetched {} records", assets.len());
            if assets.len() >= opts.page.page_size as usize {
                warn!(
                    "window {} to {} hit the page size; later records in it are not fetched",
                    format_utc(window.start),
                    format_utc(window.end)
                );
            }
            out.extend(assets);
        }

        tokio::time::sleep(opts.page.pause).await;
    }
    Ok(out)
}

pub fn normalize(assets: Vec<TreasuryAsset>) -> Vec<TreasuryAssetRow> {
    assets
        .into_iter()
        .map(|asset| TreasuryAssetRow {
            token_name: token_symbol(&asset.token),
            asset,
        })
        .collect()
}

pub async fn run<C>(
    client: &C,
    opts: &SweepOptions,
    now: i64,
    output: &Path,
) -> Result<ExportSummary>
where
    C: SubgraphQuery + ?Sized,
{
    let assets = fetch_all(client, opts, now).await?;
    let rows = normalize(assets);
    write_treasury_assets(output, &rows)
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use chrono::{TimeZone, Utc};
    use serde_json::{json, Value};

    use super::*;
    use crate::subgraph::tests::MockSubgraph;

    const NINETY_DAYS: i64 = 90 * 24 * 60 * 60;

    fn ts(y: i32, m: u32, d: u32) -> i64 {
        Utc.with_ymd_and_hms(y, m, d, 0, 0, 0)
            .single()
            .expect("valid date")
            .timestamp()
    }

    fn opts() -> SweepOptions {
        SweepOptions {
            page: PageOptions {
                page_size: 1000,
                pause: Duration::ZERO,
            },
            start: ts(2021, 10, 1),
            window_secs: NINETY_DAYS,
        }
    }

    fn asset(id: &str, timestamp: i64, token: &str, balance: &str) -> Value {
        json!({
            "id": id,
            "timestamp": timestamp.to_string(),
            "token": token,
            "tokenBalance": balance,
        })
    }

    #[test]
    fn exactly_one_interval_is_one_window() {
        let windows = sweep_windows(ts(2021, 10, 1), ts(2021, 12, 30), NINETY_DAYS);
        assert_eq!(
            windows,
            vec![TimeWindow {
                start: ts(2021, 10, 1),
                end: ts(2021, 12, 30),
            }]
        );
    }

    #[test]
    fn last_window_is_clamped_to_now() {
        let now = ts(2022, 1, 5);
        let windows = sweep_windows(ts(2021, 10, 1), now, NINETY_DAYS);
        assert_eq!(windows.len(), 2);
        assert_eq!(windows[0].end, ts(2021, 12, 30));
        assert_eq!(windows[1].start, windows[0].end);
        assert_eq!(windows[1].end, now);
    }

    #[test]
    fn no_windows_when_start_is_not_in_the_past() {
        assert!(sweep_windows(100, 100, NINETY_DAYS).is_empty());
        assert!(sweep_windows(200, 100, NINETY_DAYS).is_empty());
    }

    #[test]
    fn known_addresses_map_to_symbols() {
        assert_eq!(
            token_symbol("0x2f800db0fdb5223b3c3f354886d907a671414a7f"),
            Some("BCT")
        );
        assert_eq!(
            token_symbol("0x5786B267D35F9D011C4750E0B0BA584E1FDBEAD1"),
            Some("KLIMA/USDC.e")
        );
        assert_eq!(token_symbol("0x0000000000000000000000000000000000000000"), None);
        assert_eq!(token_symbol(""), None);
    }

    #[tokio::test]
    async fn sweeps_every_window_and_skips_empty_ones() {
        let now = ts(2022, 1, 5);
        let client = MockSubgraph::new(vec![
            json!({ "treasuryAssets": [] }),
            json!({ "treasuryAssets": [
                asset("a-1", ts(2022, 1, 1), "0xd838290e877e0188a4a44700463419ed96c16107", "12.5"),
                asset("a-2", ts(2022, 1, 2), "0xdeadbeef", "3"),
            ]}),
        ]);
        let assets = fetch_all(&client, &opts(), now).await.expect("fetch succeeds");
        assert_eq!(assets.len(), 2);

        let calls = client.calls();
        assert_eq!(calls.len(), 2);
        assert_eq!(
            calls[1].variables["where"],
            json!({
                "timestamp_gte": ts(2021, 12, 30).to_string(),
                "timestamp_lt": now.to_string(),
            })
        );

        let rows = normalize(assets);
        assert_eq!(rows[0].token_name, Some("NCT"));
        assert_eq!(rows[1].token_name, None);
    }

    #[tokio::test]
    async fn empty_sweep_writes_no_file() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("protocol_metrics_treasury_all.csv");
        let client = MockSubgraph::new(vec![json!({ "treasuryAssets": [] })]);
        let summary = run(&client, &opts(), ts(2021, 12, 30), &path)
            .await
            .expect("run succeeds");
        assert_eq!(summary, ExportSummary::Empty);
        assert!(!path.exists());
    }

    #[tokio::test]
    async fn writes_blank_name_for_unmapped_tokens() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("protocol_metrics_treasury_all.csv");
        let client = MockSubgraph::new(vec![json!({ "treasuryAssets": [
            asset("a-1", ts(2021, 10, 2), "0xaa7dbd1598251f856c12f63557a4c4397c253cea", "7.25"),
            asset("a-2", ts(2021, 10, 3), "0x1234", "1"),
        ]})]);
        run(&client, &opts(), ts(2021, 12, 30), &path)
            .await
            .expect("run succeeds");

        let written = std::fs::read_to_string(&path).expect("file written");
        let lines: Vec<&str> = written.lines().collect();
        assert_eq!(lines[0], "id,timestamp,token,tokenBalance,token_name");
        assert_eq!(
            lines[1],
            "a-1,1633132800,0xaa7dbd1598251f856c12f63557a4c4397c253cea,7.25,MCO2"
        );
        assert_eq!(lines[2], "a-2,1633219200,0x1234,1,");
    }

    #[tokio::test]
    async fn null_balance_is_written_as_empty_cell() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("protocol_metrics_treasury_all.csv");
        let mut row = asset(
            "a-1",
            ts(2021, 10, 2),
            "0x2f800db0fdb5223b3c3f354886d907a671414a7f",
            "0",
        );
        row["tokenBalance"] = Value::Null;
        let client = MockSubgraph::new(vec![json!({ "treasuryAssets": [row] })]);
        run(&client, &opts(), ts(2021, 12, 30), &path)
            .await
            .expect("run succeeds");

        let written = std::fs::read_to_string(&path).expect("file written");
        assert_eq!(
            written.lines().nth(1),
            Some("a-1,1633132800,0x2f800db0fdb5223b3c3f354886d907a671414a7f,,BCT")
        );
    }
}
