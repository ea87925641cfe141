use comfy_table::{modifiers::UTF8_ROUND_CORNERS, presets::UTF8_FULL, Attribute, Cell, Color, Table};

use crate::sync::SyncReport;

/// Render the per-target outcome of a pass
pub fn report_table(report: &SyncReport) -> Table {
    let mut table = Table::new();
    table
        .load_preset(UTF8_FULL)
        .apply_modifier(UTF8_ROUND_CORNERS)
        .set_header(vec![
            Cell::new("SECRET").add_attribute(Attribute::Bold),
            Cell::new("REGISTRY").add_attribute(Attribute::Bold),
            Cell::new("RESULT").add_attribute(Attribute::Bold),
        ]);

    for item in &report.items {
        let result = match &item.result {
            Ok(outcome) => Cell::new(outcome).fg(Color::Green),
            Err(e) => Cell::new(format!("failed: {}", e)).fg(Color::Red),
        };
        table.add_row(vec![
            Cell::new(item.target()),
            Cell::new(&item.endpoint),
            result,
        ]);
    }

    for rejected in &report.rejected {
        table.add_row(vec![
            Cell::new("-"),
            Cell::new(rejected.endpoint().unwrap_or("-")),
            Cell::new(format!("rejected: {}", rejected)).fg(Color::Red),
        ]);
    }

    table
}
