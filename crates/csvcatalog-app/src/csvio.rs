//! CSV reading and writing.
//!
//! Reading is line-oriented: a line is split on the separator with no
//! quoting rules, so a separator inside a field is always a field boundary.
//! Writing quotes any field that needs it.

use std::fs;
use std::io::{self, Write};
use std::path::Path;

/// Header and data lines of a CSV file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CsvData {
    pub headers: Vec<String>,
    pub records: Vec<Vec<String>>,
}

/// Read `path`, splitting every line on `separator`.
///
/// A UTF-8 byte order mark is stripped and blank lines are skipped.
pub fn read_csv(path: &Path, separator: &str) -> io::Result<CsvData> {
    if separator.is_empty() {
        return Err(io::Error::new(
            io::ErrorKind::InvalidInput,
            "separator must not be empty",
        ));
    }
    let content = fs::read_to_string(path)?;
    let content = content.strip_prefix('\u{feff}').unwrap_or(&content);

    let mut lines = content.lines().map(str::trim).filter(|l| !l.is_empty());
    let headers: Vec<String> = match lines.next() {
        Some(line) => line.split(separator).map(|h| h.trim().to_string()).collect(),
        None => {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                format!("'{}' is empty", path.display()),
            ))
        }
    };
    let records = lines
        .map(|line| line.split(separator).map(str::to_string).collect())
        .collect();

    Ok(CsvData { headers, records })
}

/// Write a header line and records, comma separated.
pub fn write_csv<W: Write + ?Sized>(
    out: &mut W,
    headers: &[&str],
    records: &[Vec<Option<&str>>],
) -> io::Result<()> {
    write_record(out, headers.iter().map(|h| Some(*h)))?;
    for record in records {
        write_record(out, record.iter().copied())?;
    }
    out.flush()
}

fn write_record<'a, W: Write + ?Sized>(
    out: &mut W,
    fields: impl Iterator<Item = Option<&'a str>>,
) -> io::Result<()> {
    let line = fields
        .map(|f| quote_field(f.unwrap_or("")))
        .collect::<Vec<_>>()
        .join(",");
    writeln!(out, "{}", line)
}

fn quote_field(field: &str) -> String {
    if field.contains(&[',', '"', '\n', '\r'][..]) {
        format!("\"{}\"", field.replace('"', "\"\""))
    } else {
        field.to_string()
    }
}
