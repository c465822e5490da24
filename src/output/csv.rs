use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};

use crate::crawler::Proposal;
use crate::output::json::{decode_options, encode_options};
use crate::subgraph::protocol_metrics::{self, ProtocolMetricRow};
use crate::subgraph::treasury::{self, TreasuryAssetRow};

pub const PROPOSAL_COLUMNS: [&str; 5] = ["text", "href", "content", "votes", "options"];

/// Result of an export: either a file was written or there was nothing to write.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExportSummary {
    Written { path: PathBuf, rows: usize },
    Empty,
}

fn write_records<W, I>(sink: W, header: &[&str], records: I) -> Result<()>
where
    W: Write,
    I: IntoIterator<Item = Result<Vec<String>>>,
{
    let mut writer = csv::Writer::from_writer(sink);
    writer.write_record(header)?;
    for record in records {
        writer.write_record(record?)?;
    }
    writer.flush()?;
    Ok(())
}

/// Overwrite `path` with the table, or leave the filesystem untouched when `rows` is zero.
fn export<I>(path: &Path, header: &[&str], rows: usize, records: I) -> Result<ExportSummary>
where
    I: IntoIterator<Item = Result<Vec<String>>>,
{
    if rows == 0 {
        return Ok(ExportSummary::Empty);
    }
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)
            .with_context(|| format!("failed creating output directory: {}", parent.display()))?;
    }
    let file = fs::File::create(path)
        .with_context(|| format!("failed creating output file: {}", path.display()))?;
    write_records(file, header, records)
        .with_context(|| format!("failed writing CSV: {}", path.display()))?;
    Ok(ExportSummary::Written {
        path: path.to_path_buf(),
        rows,
    })
}

fn proposal_record(proposal: &Proposal) -> Result<Vec<String>> {
    Ok(vec![
        proposal.text.clone(),
        proposal.href.clone(),
        proposal.content.clone(),
        proposal.votes.to_string(),
        encode_options(&proposal.options)?,
    ])
}

/// Missing decimals are written as empty cells, not zero.
fn decimal_cell(value: &Option<f64>) -> String {
    value.map(|v| v.to_string()).unwrap_or_default()
}

fn protocol_metric_record(row: &ProtocolMetricRow) -> Vec<String> {
    let mut record = Vec::with_capacity(protocol_metrics::COLUMNS.len());
    record.push(row.metric.id.clone());
    record.push(row.metric.timestamp.to_string());
    record.extend(row.metric.numeric_fields().iter().map(decimal_cell));
    record.push(
        row.datetime
            .map(|dt| dt.format("%Y-%m-%d %H:%M:%S%:z").to_string())
            .unwrap_or_default(),
    );
    record
}

fn treasury_asset_record(row: &TreasuryAssetRow) -> Vec<String> {
    vec![
        row.asset.id.clone(),
        row.asset.timestamp.to_string(),
        row.asset.token.clone(),
        decimal_cell(&row.asset.token_balance),
        row.token_name.unwrap_or_default().to_string(),
    ]
}

pub fn write_proposals(path: &Path, proposals: &[Proposal]) -> Result<ExportSummary> {
    export(
        path,
        &PROPOSAL_COLUMNS,
        proposals.len(),
        proposals.iter().map(proposal_record),
    )
}

pub fn write_protocol_metrics(path: &Path, rows: &[ProtocolMetricRow]) -> Result<ExportSummary> {
    export(
        path,
        &protocol_metrics::COLUMNS,
        rows.len(),
        rows.iter().map(|row| Ok(protocol_metric_record(row))),
    )
}

pub fn write_treasury_assets(path: &Path, rows: &[TreasuryAssetRow]) -> Result<ExportSummary> {
    export(
        path,
        &treasury::COLUMNS,
        rows.len(),
        rows.iter().map(|row| Ok(treasury_asset_record(row))),
    )
}

/// Read back a proposals export written by [`write_proposals`].
pub fn read_proposals(path: &Path) -> Result<Vec<Proposal>> {
    let mut reader = csv::Reader::from_path(path)
        .with_context(|| format!("failed opening CSV: {}", path.display()))?;
    let mut out = Vec::new();
    for record in reader.records() {
        let record = record?;
        let field = |idx: usize| record.get(idx).unwrap_or_default().to_string();
        out.push(Proposal {
            text: field(0),
            href: field(1),
            content: field(2),
            votes: field(3).parse().unwrap_or(0),
            options: decode_options(&field(4))?,
        });
    }
    Ok(out)
}
