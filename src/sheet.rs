use calamine::{Data, Reader, open_workbook_auto};
use std::collections::HashMap;
use std::path::Path;
use thiserror::Error;

/// One spreadsheet line as read: column header → cell text, untrimmed.
pub type RawRow = HashMap<String, String>;

#[derive(Debug, Error)]
pub enum SheetError {
    #[error("unable to open spreadsheet: {0}")]
    Open(String),
    #[error("unable to read spreadsheet: {0}")]
    Read(String),
    #[error("spreadsheet has no sheets")]
    NoSheet,
}

/// Reads an uploaded spreadsheet into raw rows.
///
/// `.csv` goes through the csv crate; everything else is handed to calamine,
/// which auto-detects xlsx/xls/ods. Only the first sheet of a workbook is
/// read, and the first line is always treated as the header row. Cells with
/// no value come back as empty strings so validation sees a uniform shape.
pub fn read_rows(path: &Path) -> Result<Vec<RawRow>, SheetError> {
    let is_csv = path
        .extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| ext.eq_ignore_ascii_case("csv"))
        .unwrap_or(false);

    if is_csv {
        read_csv(path)
    } else {
        read_workbook(path)
    }
}

fn read_csv(path: &Path) -> Result<Vec<RawRow>, SheetError> {
    let mut reader = csv::ReaderBuilder::new()
        .flexible(true)
        .from_path(path)
        .map_err(|err| SheetError::Open(err.to_string()))?;

    let headers: Vec<String> = reader
        .headers()
        .map_err(|err| SheetError::Read(err.to_string()))?
        .iter()
        .map(|header| header.to_string())
        .collect();

    let mut rows = Vec::new();
    for record in reader.records() {
        let record = record.map_err(|err| SheetError::Read(err.to_string()))?;
        let mut row = RawRow::with_capacity(headers.len());
        for (idx, header) in headers.iter().enumerate() {
            let value = record.get(idx).unwrap_or("");
            row.insert(header.clone(), value.to_string());
        }
        rows.push(row);
    }
    Ok(rows)
}

fn read_workbook(path: &Path) -> Result<Vec<RawRow>, SheetError> {
    let mut workbook = open_workbook_auto(path).map_err(|err| SheetError::Open(err.to_string()))?;
    let sheet_name = workbook
        .sheet_names()
        .first()
        .cloned()
        .ok_or(SheetError::NoSheet)?;
    let range = workbook
        .worksheet_range(&sheet_name)
        .map_err(|err| SheetError::Read(err.to_string()))?;

    let mut row_iter = range.rows();
    let Some(header_row) = row_iter.next() else {
        return Ok(Vec::new());
    };
    let headers: Vec<String> = header_row.iter().map(cell_text).collect();

    let mut rows = Vec::new();
    for cells in row_iter {
        let mut row = RawRow::with_capacity(headers.len());
        let mut any_value = false;
        for (idx, header) in headers.iter().enumerate() {
            if header.is_empty() {
                continue;
            }
            let value = cells.get(idx).map(cell_text).unwrap_or_default();
            any_value |= !value.is_empty();
            row.insert(header.clone(), value);
        }
        // Trailing formatting-only lines are common in hand-edited workbooks.
        if any_value {
            rows.push(row);
        }
    }
    Ok(rows)
}

fn cell_text(cell: &Data) -> String {
    match cell {
        Data::Empty => String::new(),
        Data::String(value) => value.clone(),
        Data::Float(value) if value.fract() == 0.0 => format!("{}", *value as i64),
        other => other.to_string(),
    }
}
