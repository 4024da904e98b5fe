//! Registry file readers
//!
//! Reads CSV and Excel registry exports into [`RawRow`]s with normalized
//! header keys. CSV delimiters are sniffed from the header line; legacy
//! exports encoded as ISO-8859-1 are decoded with a byte-to-char fallback
//! when the file is not valid UTF-8. Excel workbooks are read from the
//! first sheet only, first row as header.

use std::path::Path;

use calamine::{open_workbook_auto, Data, Reader};
use tracing::debug;

use crate::error::ImportError;

use super::normalize::raw_row;
use super::types::RawRow;

/// Read a registry export into raw rows, dispatching on file extension.
///
/// Fails before any network activity: unsupported extensions and header
/// problems are fatal here, so no rate-limited quota is consumed for a file
/// that cannot be imported.
pub fn read_registry_file(path: &Path) -> Result<Vec<RawRow>, ImportError> {
    let extension = path
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_ascii_lowercase())
        .unwrap_or_default();

    match extension.as_str() {
        "csv" => read_csv(path),
        "xlsx" | "xls" => read_excel(path),
        _ => Err(ImportError::UnsupportedFile { extension }),
    }
}

/// Decode file bytes as UTF-8, falling back to ISO-8859-1.
///
/// Latin-1 maps byte-for-byte onto the first 256 Unicode code points, which
/// covers æøå in the legacy exports.
fn decode_text(bytes: Vec<u8>) -> String {
    match String::from_utf8(bytes) {
        Ok(s) => s,
        Err(e) => e.into_bytes().iter().map(|&b| b as char).collect(),
    }
}

/// Pick the delimiter that occurs most often in the header line.
fn sniff_delimiter(header_line: &str) -> u8 {
    let candidates = [b';', b',', b'\t'];
    candidates
        .into_iter()
        .max_by_key(|&d| header_line.bytes().filter(|&b| b == d).count())
        .unwrap_or(b';')
}

fn read_csv(path: &Path) -> Result<Vec<RawRow>, ImportError> {
    let bytes = std::fs::read(path).map_err(|e| ImportError::Csv(csv::Error::from(e)))?;
    let text = decode_text(bytes);

    let header_line = text.lines().next().unwrap_or("");
    if header_line.trim().is_empty() {
        return Err(ImportError::MissingHeader {
            path: path.display().to_string(),
        });
    }
    let delimiter = sniff_delimiter(header_line);
    debug!(delimiter = %char::from(delimiter), path = %path.display(), "sniffed csv delimiter");

    let mut reader = csv::ReaderBuilder::new()
        .delimiter(delimiter)
        .flexible(true)
        .trim(csv::Trim::All)
        .from_reader(text.as_bytes());

    let headers: Vec<String> = reader
        .headers()?
        .iter()
        .map(|h| h.to_string())
        .collect();

    let mut rows = Vec::new();
    for record in reader.records() {
        let record = record?;
        let values: Vec<String> = record.iter().map(|v| v.to_string()).collect();
        rows.push(raw_row(&headers, &values));
    }
    Ok(rows)
}

/// Render a spreadsheet cell as the string the CSV path would have seen.
fn cell_to_string(cell: &Data) -> String {
    match cell {
        Data::Empty => String::new(),
        Data::String(s) => s.clone(),
        // Share counts arrive as floats from Excel; render whole numbers
        // without a trailing ".0" so digit extraction sees them intact.
        Data::Float(f) if f.fract() == 0.0 => format!("{}", *f as i64),
        Data::Float(f) => f.to_string(),
        Data::Int(i) => i.to_string(),
        Data::Bool(b) => b.to_string(),
        Data::DateTime(dt) => dt.as_f64().to_string(),
        Data::DateTimeIso(s) | Data::DurationIso(s) => s.clone(),
        Data::Error(_) => String::new(),
    }
}

fn read_excel(path: &Path) -> Result<Vec<RawRow>, ImportError> {
    let mut workbook = open_workbook_auto(path)?;
    let range = workbook
        .worksheet_range_at(0)
        .ok_or_else(|| ImportError::MissingHeader {
            path: path.display().to_string(),
        })??;

    let mut rows_iter = range.rows();
    let headers: Vec<String> = rows_iter
        .next()
        .ok_or_else(|| ImportError::MissingHeader {
            path: path.display().to_string(),
        })?
        .iter()
        .map(cell_to_string)
        .collect();

    let mut rows = Vec::new();
    for row in rows_iter {
        let values: Vec<String> = row.iter().map(cell_to_string).collect();
        rows.push(raw_row(&headers, &values));
    }
    Ok(rows)
}
