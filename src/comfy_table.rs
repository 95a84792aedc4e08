use comfy_table::{
    Attribute, Cell, CellAlignment, Color, ContentArrangement, Table, modifiers::UTF8_ROUND_CORNERS,
    presets::UTF8_BORDERS_ONLY,
};

use crate::bias_table::BiasTable;
use crate::detectors::DetectorRegistry;
use crate::filter_utils::{Highlight, HighlightThresholds, TableRow};
use crate::models::{AnalysisSummary, PatternHit};
use crate::scoring::{CategoryBounds, categorize_score};

fn base_table(headers: &[&str]) -> Table {
    let mut table = Table::new();
    table
        .load_preset(UTF8_BORDERS_ONLY)
        .apply_modifier(UTF8_ROUND_CORNERS)
        .set_content_arrangement(ContentArrangement::Dynamic)
        .set_header(
            headers
                .iter()
                .map(|h| Cell::new(h).add_attribute(Attribute::Bold))
                .collect::<Vec<_>>(),
        );
    table
}

fn score_color(highlight: Highlight) -> Color {
    match highlight {
        Highlight::Positive => Color::Rgb { r: 0, g: 220, b: 90 },
        Highlight::Negative => Color::Rgb { r: 235, g: 70, b: 70 },
        Highlight::Plain => Color::Rgb { r: 170, g: 170, b: 170 },
    }
}

fn fmt_opt(value: Option<f64>, decimals: usize) -> String {
    value
        .map(|v| format!("{v:.decimals$}"))
        .unwrap_or_else(|| "—".to_string())
}

/// Screener table, one line per row in the given order.
pub fn rows_table(rows: &[TableRow], highlight: &HighlightThresholds) -> Table {
    let mut table = base_table(&[
        "#", "Symbol", "Name", "Market", "Score", "Patterns", "Last date", "Close",
    ]);
    for (i, row) in rows.iter().enumerate() {
        let color = score_color(highlight.classify(row.score));
        let mut symbol_cell = Cell::new(&row.symbol).fg(Color::Cyan);
        if highlight.classify(row.score) != Highlight::Plain {
            symbol_cell = symbol_cell.add_attribute(Attribute::Bold);
        }
        table.add_row(vec![
            Cell::new(i + 1).fg(Color::DarkGrey),
            symbol_cell,
            Cell::new(&row.name),
            Cell::new(&row.market).fg(Color::DarkGrey),
            Cell::new(&row.label).fg(color),
            Cell::new(&row.patterns),
            Cell::new(
                row.last_date
                    .map(|d| d.to_string())
                    .unwrap_or_else(|| "—".to_string()),
            ),
            Cell::new(fmt_opt(row.close, 2)).set_alignment(CellAlignment::Right),
        ]);
    }
    table
}

fn hit_cells(hit: &PatternHit) -> Vec<Cell> {
    let direction = hit.variant.map(|v| v.as_str()).unwrap_or("—");
    vec![
        Cell::new(hit.display_name()),
        Cell::new(direction),
        Cell::new(hit.value).set_alignment(CellAlignment::Right),
        Cell::new(hit.base_score).set_alignment(CellAlignment::Right),
        Cell::new(fmt_opt(hit.weighted_score, 2)).set_alignment(CellAlignment::Right),
        Cell::new(hit.next_move.as_deref().unwrap_or("")),
    ]
}

/// Today's hits for one symbol.
pub fn hits_table(summary: &AnalysisSummary) -> Table {
    let mut table = base_table(&["Pattern", "Direction", "Value", "Base", "Weighted", "Next move"]);
    for hit in &summary.hits {
        table.add_row(hit_cells(hit));
    }
    table
}

/// Day-by-day history timeline, newest first.
pub fn history_table(summary: &AnalysisSummary, bounds: &CategoryBounds) -> Table {
    let mut table = base_table(&["Date", "Score", "Patterns"]);
    for entry in summary.history.iter().rev() {
        let (_, label) = categorize_score(Some(entry.total_score), bounds);
        let names = entry
            .hits
            .iter()
            .map(|h| format!("{} ({:+})", h.display_name(), h.value))
            .collect::<Vec<_>>()
            .join(", ");
        table.add_row(vec![Cell::new(entry.date), Cell::new(label), Cell::new(names)]);
    }
    table
}

/// Registered detectors with their bias entries.
pub fn patterns_table(registry: &DetectorRegistry, bias: &BiasTable) -> Table {
    let mut table = base_table(&["Detector", "Variant", "Score", "Name", "Typical setup"]);
    for id in registry.ids() {
        let entries = bias.entries_for(id);
        if entries.is_empty() {
            table.add_row(vec![
                Cell::new(id).fg(Color::Cyan),
                Cell::new("—"),
                Cell::new(0).set_alignment(CellAlignment::Right),
                Cell::new("(no bias entry)").fg(Color::DarkGrey),
                Cell::new(""),
            ]);
            continue;
        }
        for (variant, entry) in entries {
            table.add_row(vec![
                Cell::new(id).fg(Color::Cyan),
                Cell::new(variant.as_str()),
                Cell::new(entry.score).set_alignment(CellAlignment::Right),
                Cell::new(entry.english.as_deref().unwrap_or("")),
                Cell::new(entry.typical_setup.as_deref().unwrap_or("")),
            ]);
        }
    }
    table
}
