use std::path::PathBuf;

use anyhow::Result;
use chrono::Utc;
use clap::{Parser, Subcommand};
use kip_harvest::config::{Config, ConfigOverrides};
use kip_harvest::crawler;
use kip_harvest::output::json::render_json;
use kip_harvest::output::table::{render_export_summary, render_proposals_table};
use kip_harvest::subgraph::treasury::SweepOptions;
use kip_harvest::subgraph::{protocol_metrics, treasury, GatewayClient, PageOptions};
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Debug, Parser)]
#[command(
    name = "kip-harvest",
    about = "Harvest KlimaDAO governance proposals and subgraph time series into CSV"
)]
struct Cli {
    #[arg(short, long)]
    config: Option<PathBuf>,
    #[arg(long = "api-key")]
    api_key: Option<String>,
    #[arg(long = "subgraph-id")]
    subgraph_id: Option<String>,
    #[arg(short, long = "output-dir")]
    output_dir: Option<String>,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Crawl Snapshot for KIP proposals
    Proposals,
    /// Fetch the full protocolMetrics history
    ProtocolMetrics,
    /// Fetch treasury asset balances in fixed time windows
    TreasuryAssets,
    /// Write a config template or print the effective config
    Config {
        #[arg(long)]
        init: bool,
        #[arg(long)]
        show: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();
    let cli = Cli::parse();

    let config_path = cli.config.clone().unwrap_or_else(Config::default_path);
    let mut config = Config::load(Some(&config_path))?;
    config.apply_overrides(ConfigOverrides {
        api_key: cli.api_key.clone(),
        subgraph_id: cli.subgraph_id.clone(),
        output_dir: cli.output_dir.clone(),
    });

    match &cli.command {
        Commands::Proposals => {
            let output = config.output_path(&config.output.proposals_file);
            let (proposals, summary) = crawler::run(&config.crawler, &output).await?;
            println!("{}", render_export_summary("KIP proposals", &summary));
            if !proposals.is_empty() {
                println!("{}", render_proposals_table(&proposals));
            }
        }
        Commands::ProtocolMetrics => {
            let client = GatewayClient::from_config(&config.subgraph)?;
            let output = config.output_path(&config.output.protocol_metrics_file);
            let summary =
                protocol_metrics::run(&client, &PageOptions::from(&config.subgraph), &output)
                    .await?;
            println!("{}", render_export_summary("protocol metric records", &summary));
        }
        Commands::TreasuryAssets => {
            let client = GatewayClient::from_config(&config.subgraph)?;
            let output = config.output_path(&config.output.treasury_assets_file);
            let opts = SweepOptions {
                page: PageOptions::from(&config.subgraph),
                start: config.treasury.start_timestamp()?,
                window_secs: config.treasury.window_secs(),
            };
            let now = Utc::now().timestamp();
            info!("sweeping treasury assets up to {now}");
            let summary = treasury::run(&client, &opts, now, &output).await?;
            println!("{}", render_export_summary("treasury asset records", &summary));
        }
        Commands::Config { init, show } => {
            if *init {
                Config::write_template(&config_path)?;
                println!("Wrote config template to {}", config_path.display());
            }
            if *show || !*init {
                println!("{}", render_json(&config)?);
            }
        }
    }

    Ok(())
}
