//! Plain aligned-text rendering for terminal output.

use csvcatalog_core::types::{Row, Table};

/// Placeholder for SQL NULL.
const NULL: &str = "NULL";

/// Render a grid with a header line and a dashed separator.
pub fn grid(headers: &[&str], rows: &[Vec<String>]) -> String {
    let mut widths: Vec<usize> = headers.iter().map(|h| h.chars().count()).collect();
    for row in rows {
        for (i, cell) in row.iter().enumerate() {
            let len = cell.chars().count();
            match widths.get_mut(i) {
                Some(w) => *w = (*w).max(len),
                None => widths.push(len),
            }
        }
    }

    let mut out = String::new();
    push_line(&mut out, headers.iter().copied(), &widths);
    let dashes: Vec<String> = widths.iter().map(|w| "-".repeat(*w)).collect();
    push_line(&mut out, dashes.iter().map(String::as_str), &widths);
    for row in rows {
        push_line(&mut out, row.iter().map(String::as_str), &widths);
    }
    out
}

fn push_line<'a>(out: &mut String, cells: impl Iterator<Item = &'a str>, widths: &[usize]) {
    let line = cells
        .zip(widths)
        .map(|(cell, w)| format!("{:<width$}", cell, width = *w))
        .collect::<Vec<_>>()
        .join("  ");
    out.push_str(line.trim_end());
    out.push('\n');
}

/// Render result rows; column headers come from the first row.
pub fn rows(rows: &[Row]) -> String {
    let Some(first) = rows.first() else {
        return "(no rows)\n".to_string();
    };
    let headers: Vec<&str> = first.columns().collect();
    let body: Vec<Vec<String>> = rows
        .iter()
        .map(|r| {
            r.values()
                .map(|v| v.unwrap_or(NULL).to_string())
                .collect()
        })
        .collect();
    grid(&headers, &body)
}

/// Render the table listing.
pub fn tables(tables: &[Table]) -> String {
    if tables.is_empty() {
        return "(no tables)\n".to_string();
    }
    let body: Vec<Vec<String>> = tables
        .iter()
        .map(|t| {
            vec![
                t.name.clone(),
                t.count.to_string(),
                t.columns.join(", "),
                t.created_at.format("%Y-%m-%d %H:%M:%S").to_string(),
                t.description.clone().unwrap_or_default(),
            ]
        })
        .collect();
    grid(&["table", "rows", "columns", "created", "description"], &body)
}
