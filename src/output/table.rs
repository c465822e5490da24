use comfy_table::presets::UTF8_FULL;
use comfy_table::{Cell, CellAlignment, ContentArrangement, Table};

use crate::crawler::Proposal;
use crate::output::csv::ExportSummary;

pub fn render_proposals_table(proposals: &[Proposal]) -> String {
    let mut table = Table::new();
    table
        .load_preset(UTF8_FULL)
        .set_content_arrangement(ContentArrangement::Dynamic);
    table.set_header(vec!["Proposal", "Votes", "Options"]);
    for p in proposals {
        table.add_row(vec![
            Cell::new(&p.text),
            Cell::new(p.votes).set_alignment(CellAlignment::Right),
            Cell::new(p.options.len()).set_alignment(CellAlignment::Right),
        ]);
    }
    table.to_string()
}

pub fn render_export_summary(what: &str, summary: &ExportSummary) -> String {
    match summary {
        ExportSummary::Written { path, rows } => {
            format!("Saved {rows} {what} to {}", path.display())
        }
        ExportSummary::Empty => format!("No {what} found; nothing written."),
    }
}
