use std::path::{Path, PathBuf};

use calamine::{open_workbook_auto, Data, Reader};

use crate::error::{Error, Result};

/// A header row plus data rows read from a CSV or workbook.
/// Blank cells are `None`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Sheet {
    pub headers: Vec<String>,
    pub rows: Vec<Vec<Option<String>>>,
}

/// Normalize a column header: trimmed, lower-cased, spaces become underscores.
pub fn normalize_header(h: &str) -> String {
    h.trim().to_lowercase().replace(' ', "_")
}

fn lower_extension(path: &Path) -> String {
    path.extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_lowercase())
        .unwrap_or_default()
}

/// File name suffixes of the formats [`read_sheet`] understands.
pub const SHEET_SUFFIXES: [&str; 3] = [".csv", ".xlsx", ".xls"];

/// Files anywhere under `dir` whose names end with one of `suffixes`,
/// compared case-insensitively. Sorted by path.
pub fn glob_files(dir: &Path, suffixes: &[&str]) -> Result<Vec<PathBuf>> {
    let root = dir
        .to_str()
        .ok_or_else(|| Error::Config(format!("{} is not valid UTF-8", dir.display())))?;
    let root = glob::Pattern::escape(root.trim_end_matches('/'));
    let options = glob::MatchOptions {
        case_sensitive: false,
        require_literal_separator: true,
        require_literal_leading_dot: false,
    };
    let mut out = Vec::new();
    for suffix in suffixes {
        for entry in glob::glob_with(&format!("{root}/**/*{suffix}"), options)? {
            let path = entry?;
            if path.is_file() {
                out.push(path);
            }
        }
    }
    out.sort();
    out.dedup();
    Ok(out)
}

/// Read the first sheet of a CSV, XLSX or XLS file with normalized headers.
pub fn read_sheet(path: &Path) -> Result<Sheet> {
    match lower_extension(path).as_str() {
        "csv" => read_csv(path),
        "xlsx" | "xls" => read_workbook(path),
        other => Err(Error::Other(format!(
            "unsupported file type `{other}`: {}",
            path.display()
        ))),
    }
}

/// Decode file contents as UTF-8, falling back to Windows-1252 (a superset
/// of ISO-8859-1) when the bytes are not valid UTF-8.
pub fn decode_text(bytes: &[u8], path: &Path) -> String {
    match std::str::from_utf8(bytes) {
        Ok(s) => s.trim_start_matches('\u{feff}').to_string(),
        Err(_) => {
            log::warn!(
                "{} is not valid UTF-8, reading as ISO-8859-1",
                path.display()
            );
            let (text, _, _) = encoding_rs::WINDOWS_1252.decode(bytes);
            text.into_owned()
        }
    }
}

fn read_csv(path: &Path) -> Result<Sheet> {
    let bytes = std::fs::read(path)?;
    let text = decode_text(&bytes, path);
    parse_csv(&text)
}

/// Parse CSV text into a [`Sheet`]. Short rows are padded, long rows truncated.
pub fn parse_csv(text: &str) -> Result<Sheet> {
    let mut rdr = csv::ReaderBuilder::new()
        .flexible(true)
        .from_reader(text.as_bytes());
    let headers: Vec<String> = rdr.headers()?.iter().map(normalize_header).collect();
    let mut rows = Vec::new();
    for record in rdr.records() {
        let record = record?;
        if record.iter().all(|f| f.trim().is_empty()) {
            continue;
        }
        let row: Vec<Option<String>> = (0..headers.len())
            .map(|i| {
                record
                    .get(i)
                    .map(str::trim)
                    .filter(|v| !v.is_empty())
                    .map(str::to_string)
            })
            .collect();
        rows.push(row);
    }
    Ok(Sheet { headers, rows })
}

fn cell_text(cell: &Data) -> Option<String> {
    let text = match cell {
        Data::Empty | Data::Error(_) => return None,
        Data::String(s) => s.trim().to_string(),
        Data::Bool(b) => b.to_string(),
        Data::Int(i) => i.to_string(),
        // Identifiers come back as floats; keep them integral
        Data::Float(f) if f.is_finite() && f.fract() == 0.0 && f.abs() < 1e15 => {
            format!("{}", *f as i64)
        }
        Data::Float(f) => f.to_string(),
        Data::DateTime(dt) => dt.as_datetime()?.format("%Y-%m-%d %H:%M:%S").to_string(),
        other => other.to_string().trim().to_string(),
    };
    (!text.is_empty()).then_some(text)
}

fn read_workbook(path: &Path) -> Result<Sheet> {
    let mut workbook = open_workbook_auto(path)?;
    let first = workbook
        .sheet_names()
        .first()
        .cloned()
        .ok_or_else(|| Error::Spreadsheet(format!("{} has no sheets", path.display())))?;
    let range = workbook.worksheet_range(&first)?;

    let mut rows_iter = range.rows();
    let headers: Vec<String> = match rows_iter.next() {
        Some(row) => row
            .iter()
            .map(|c| normalize_header(&cell_text(c).unwrap_or_default()))
            .collect(),
        None => return Ok(Sheet::default()),
    };
    let rows = rows_iter
        .map(|row| {
            (0..headers.len())
                .map(|i| row.get(i).and_then(cell_text))
                .collect::<Vec<_>>()
        })
        .filter(|row| row.iter().any(|c| c.is_some()))
        .collect();
    Ok(Sheet { headers, rows })
}
