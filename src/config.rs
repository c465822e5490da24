use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use chrono::{NaiveDate, TimeZone, Utc};
use serde::{Deserialize, Serialize};

pub const API_KEY_PLACEHOLDER: &str = "input_your_api_key_here";
pub const SUBGRAPH_ID_PLACEHOLDER: &str = "input_your_subgraph_id_here";

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    #[serde(default)]
    pub subgraph: SubgraphConfig,
    #[serde(default)]
    pub crawler: CrawlerConfig,
    #[serde(default)]
    pub treasury: TreasuryConfig,
    #[serde(default)]
    pub output: OutputConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubgraphConfig {
    #[serde(default = "default_gateway_url")]
    pub gateway_url: String,
    #[serde(default = "default_api_key")]
    pub api_key: String,
    #[serde(default = "default_subgraph_id")]
    pub subgraph_id: String,
    #[serde(default = "default_page_size")]
    pub page_size: u32,
    #[serde(default = "default_request_pause_ms")]
    pub request_pause_ms: u64,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CrawlerConfig {
    #[serde(default = "default_listing_url")]
    pub listing_url: String,
    #[serde(default = "default_prefix")]
    pub prefix: String,
    #[serde(default = "default_stop_at")]
    pub stop_at: String,
    #[serde(default = "default_timeout_secs")]
    pub render_timeout_secs: u64,
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
    #[serde(default = "default_scroll_pause_ms")]
    pub scroll_pause_ms: u64,
    #[serde(default = "default_page_settle_ms")]
    pub page_settle_ms: u64,
    #[serde(default = "default_request_pause_ms")]
    pub request_pause_ms: u64,
    #[serde(default = "default_true")]
    pub headless: bool,
    #[serde(default)]
    pub chrome_path: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TreasuryConfig {
    #[serde(default = "default_start_date")]
    pub start_date: String,
    #[serde(default = "default_window_days")]
    pub window_days: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutputConfig {
    #[serde(default = "default_output_dir")]
    pub dir: String,
    #[serde(default = "default_proposals_file")]
    pub proposals_file: String,
    #[serde(default = "default_protocol_metrics_file")]
    pub protocol_metrics_file: String,
    #[serde(default = "default_treasury_assets_file")]
    pub treasury_assets_file: String,
}

#[derive(Debug, Clone, Default)]
pub struct ConfigOverrides {
    pub api_key: Option<String>,
    pub subgraph_id: Option<String>,
    pub output_dir: Option<String>,
}

impl Config {
    pub fn default_path() -> PathBuf {
        let home = dirs::home_dir().unwrap_or_else(|| PathBuf::from("."));
        home.join(".config/kip-harvest/config.toml")
    }

    pub fn load(path: Option<&Path>) -> Result<Self> {
        let path = path
            .map(|p| p.to_path_buf())
            .unwrap_or_else(Self::default_path);
        if !path.exists() {
            return Ok(Self::default());
        }
        let data = fs::read_to_string(&path)
            .with_context(|| format!("failed reading config: {}", path.display()))?;
        let parsed: Self = toml::from_str(&data)
            .with_context(|| format!("failed parsing TOML config: {}", path.display()))?;
        Ok(parsed)
    }

    pub fn apply_overrides(&mut self, overrides: ConfigOverrides) {
        if let Some(api_key) = overrides.api_key {
            self.subgraph.api_key = api_key;
        }
        if let Some(subgraph_id) = overrides.subgraph_id {
            self.subgraph.subgraph_id = subgraph_id;
        }
        if let Some(dir) = overrides.output_dir {
            self.output.dir = dir;
        }
    }

    pub fn write_template(path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).with_context(|| {
                format!("failed creating config directory: {}", parent.display())
            })?;
        }
        fs::write(path, Self::default_template())
            .with_context(|| format!("failed writing config template: {}", path.display()))
    }

    pub fn default_template() -> String {
        let template = r#"[subgraph]
gateway_url = "https://gateway.thegraph.com"
api_key = "input_your_api_key_here"
subgraph_id = "input_your_subgraph_id_here"
page_size = 1000
request_pause_ms = 1000
timeout_secs = 30

[crawler]
listing_url = "https://snapshot.org/#/klimadao.eth/proposals"
prefix = "KIP"
stop_at = "KIP-1"
render_timeout_secs = 30
poll_interval_ms = 500
scroll_pause_ms = 2000
page_settle_ms = 3000
request_pause_ms = 1000
headless = true
# chrome_path = "/usr/bin/chromium"

[treasury]
start_date = "2021-10-01"
window_days = 90

[output]
dir = "."
proposals_file = "kip_proposals_detailed.csv"
protocol_metrics_file = "protocol_metrics_all.csv"
treasury_assets_file = "protocol_metrics_treasury_all.csv"
"#;
        template.to_string()
    }

    pub fn output_path(&self, file_name: &str) -> PathBuf {
        expand_tilde(&self.output.dir).join(file_name)
    }
}

impl SubgraphConfig {
    /// Fails while the credentials are still the shipped placeholders.
    pub fn ensure_credentials(&self) -> Result<()> {
        if self.api_key.trim().is_empty() || self.api_key == API_KEY_PLACEHOLDER {
            return Err(anyhow!(
                "subgraph.api_key is not set; edit the config file or pass --api-key"
            ));
        }
        if self.subgraph_id.trim().is_empty() || self.subgraph_id == SUBGRAPH_ID_PLACEHOLDER {
            return Err(anyhow!(
                "subgraph.subgraph_id is not set; edit the config file or pass --subgraph-id"
            ));
        }
        Ok(())
    }

    pub fn endpoint(&self) -> String {
        format!(
            "{}/api/{}/subgraphs/id/{}",
            self.gateway_url.trim_end_matches('/'),
            self.api_key,
            self.subgraph_id
        )
    }

    pub fn request_pause(&self) -> Duration {
        Duration::from_millis(self.request_pause_ms)
    }
}

impl TreasuryConfig {
    /// Unix timestamp of `start_date` at midnight UTC.
    pub fn start_timestamp(&self) -> Result<i64> {
        let date = NaiveDate::parse_from_str(self.start_date.trim(), "%Y-%m-%d")
            .with_context(|| format!("invalid treasury.start_date: {}", self.start_date))?;
        let midnight = date
            .and_hms_opt(0, 0, 0)
            .ok_or_else(|| anyhow!("invalid treasury.start_date: {}", self.start_date))?;
        Ok(Utc.from_utc_datetime(&midnight).timestamp())
    }

    pub fn window_secs(&self) -> i64 {
        i64::from(self.window_days.max(1)) * 24 * 60 * 60
    }
}

pub fn expand_tilde(path: &str) -> PathBuf {
    if let Some(stripped) = path.strip_prefix("~/") {
        if let Some(home) = dirs::home_dir() {
            return home.join(stripped);
        }
    }
    PathBuf::from(path)
}

impl Default for SubgraphConfig {
    fn default() -> Self {
        Self {
            gateway_url: default_gateway_url(),
            api_key: default_api_key(),
            subgraph_id: default_subgraph_id(),
            page_size: default_page_size(),
            request_pause_ms: default_request_pause_ms(),
            timeout_secs: default_timeout_secs(),
        }
    }
}

impl Default for CrawlerConfig {
    fn default() -> Self {
        Self {
            listing_url: default_listing_url(),
            prefix: default_prefix(),
            stop_at: default_stop_at(),
            render_timeout_secs: default_timeout_secs(),
            poll_interval_ms: default_poll_interval_ms(),
            scroll_pause_ms: default_scroll_pause_ms(),
            page_settle_ms: default_page_settle_ms(),
            request_pause_ms: default_request_pause_ms(),
            headless: true,
            chrome_path: None,
        }
    }
}

impl Default for TreasuryConfig {
    fn default() -> Self {
        Self {
            start_date: default_start_date(),
            window_days: default_window_days(),
        }
    }
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            dir: default_output_dir(),
            proposals_file: default_proposals_file(),
            protocol_metrics_file: default_protocol_metrics_file(),
            treasury_assets_file: default_treasury_assets_file(),
        }
    }
}

fn default_gateway_url() -> String {
    "https://gateway.thegraph.com".to_string()
}

fn default_api_key() -> String {
    API_KEY_PLACEHOLDER.to_string()
}

fn default_subgraph_id() -> String {
    SUBGRAPH_ID_PLACEHOLDER.to_string()
}

fn default_page_size() -> u32 {
    1000
}

fn default_request_pause_ms() -> u64 {
    1000
}

fn default_timeout_secs() -> u64 {
    30
}

fn default_listing_url() -> String {
    "https://snapshot.org/#/klimadao.eth/proposals".to_string()
}

fn default_prefix() -> String {
    "KIP".to_string()
}

fn default_stop_at() -> String {
    "KIP-1".to_string()
}

fn default_poll_interval_ms() -> u64 {
    500
}

fn default_scroll_pause_ms() -> u64 {
    2000
}

fn default_page_settle_ms() -> u64 {
    3000
}

fn default_start_date() -> String {
    "2021-10-01".to_string()
}

fn default_window_days() -> u32 {
    90
}

fn default_output_dir() -> String {
    ".".to_string()
}

fn default_proposals_file() -> String {
    "kip_proposals_detailed.csv".to_string()
}

fn default_protocol_metrics_file() -> String {
    "protocol_metrics_all.csv".to_string()
}

fn default_treasury_assets_file() -> String {
    "protocol_metrics_treasury_all.csv".to_string()
}

fn default_true() -> bool {
    true
}
