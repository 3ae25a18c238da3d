use std::path::Path;

use anyhow::{Context, Result, anyhow, bail};
use calamine::{Data, DataType, Reader, open_workbook_auto};
use encoding_rs::Encoding;
use log::{debug, info};

use crate::{
    data::parse_temporal,
    dataset::{Dataset, RawCell},
    io_utils,
};

const WORKBOOK_EXTENSIONS: &[&str] = &["xlsx", "xlsm", "xlsb", "xls", "ods"];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceKind {
    Delimited,
    Workbook,
}

impl SourceKind {
    pub fn detect(path: &Path) -> Self {
        match path.extension().and_then(|ext| ext.to_str()) {
            Some(ext)
                if WORKBOOK_EXTENSIONS
                    .iter()
                    .any(|known| ext.eq_ignore_ascii_case(known)) =>
            {
                SourceKind::Workbook
            }
            _ => SourceKind::Delimited,
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct LoadOptions<'a> {
    /// Worksheet to read; the first sheet when `None`. Ignored for CSV input.
    pub sheet: Option<&'a str>,
    pub delimiter: Option<u8>,
    pub encoding: &'static Encoding,
}

pub fn load_dataset(path: &Path, options: &LoadOptions<'_>) -> Result<Dataset> {
    let dataset = match SourceKind::detect(path) {
        SourceKind::Workbook => load_workbook(path, options.sheet)?,
        SourceKind::Delimited => {
            if options.sheet.is_some() {
                debug!("Ignoring --sheet for delimited input {path:?}");
            }
            load_delimited(path, options.delimiter, options.encoding)?
        }
    };
    info!(
        "Loaded {} row(s) across {} column(s) from {:?}",
        dataset.row_count(),
        dataset.columns().len(),
        path
    );
    Ok(dataset)
}

pub fn sheet_names(path: &Path) -> Result<Vec<String>> {
    if SourceKind::detect(path) != SourceKind::Workbook {
        bail!("{path:?} is not a workbook; only spreadsheet files contain sheets");
    }
    let workbook =
        open_workbook_auto(path).with_context(|| format!("Opening workbook {path:?}"))?;
    Ok(workbook.sheet_names())
}

fn load_delimited(path: &Path, delimiter: Option<u8>, encoding: &'static Encoding) -> Result<Dataset> {
    let delimiter = io_utils::resolve_input_delimiter(path, delimiter);
    debug!(
        "Reading delimited input {:?} with delimiter '{}'",
        path,
        crate::printable_delimiter(delimiter)
    );
    let mut reader = io_utils::open_csv_reader_from_path(path, delimiter, true)?;
    let headers = io_utils::reader_headers(&mut reader, encoding)
        .with_context(|| format!("Reading header row of {path:?}"))?;
    if headers.is_empty() {
        bail!("{path:?} has no header row");
    }
    let mut rows = Vec::new();
    for (row_idx, record) in reader.byte_records().enumerate() {
        let record = record.with_context(|| format!("Reading row {}", row_idx + 2))?;
        let decoded = io_utils::decode_record(&record, encoding)
            .with_context(|| format!("Decoding row {}", row_idx + 2))?;
        rows.push(decoded.iter().map(|field| RawCell::from(field.as_str())).collect());
    }
    Dataset::from_rows(headers, rows).with_context(|| format!("Building dataset from {path:?}"))
}

fn load_workbook(path: &Path, sheet: Option<&str>) -> Result<Dataset> {
    let mut workbook =
        open_workbook_auto(path).with_context(|| format!("Opening workbook {path:?}"))?;
    let names = workbook.sheet_names();
    let sheet_name = match sheet {
        Some(requested) => names
            .iter()
            .find(|name| name.as_str() == requested)
            .cloned()
            .ok_or_else(|| {
                anyhow!(
                    "Sheet '{requested}' not found in {path:?} (available: {})",
                    names.join(", ")
                )
            })?,
        None => names
            .first()
            .cloned()
            .ok_or_else(|| anyhow!("Workbook {path:?} contains no sheets"))?,
    };
    debug!("Reading sheet '{sheet_name}' from {path:?}");
    let range = workbook
        .worksheet_range(&sheet_name)
        .with_context(|| format!("Reading sheet '{sheet_name}' from {path:?}"))?;

    let mut rows = range.rows();
    let headers = rows
        .next()
        .ok_or_else(|| anyhow!("Sheet '{sheet_name}' in {path:?} is empty"))?
        .iter()
        .map(header_text)
        .collect::<Vec<_>>();
    let body = rows
        .map(|row| row.iter().map(workbook_cell).collect())
        .collect::<Vec<Vec<RawCell>>>();
    Dataset::from_rows(headers, body)
        .with_context(|| format!("Building dataset from sheet '{sheet_name}'"))
}

fn header_text(cell: &Data) -> String {
    match cell {
        Data::Empty => String::new(),
        other => other.to_string(),
    }
}

fn workbook_cell(cell: &Data) -> RawCell {
    match cell {
        Data::Empty | Data::Error(_) => RawCell::Empty,
        Data::Int(i) => RawCell::Integer(*i),
        Data::Float(f) => RawCell::Number(*f),
        Data::Bool(b) => RawCell::Bool(*b),
        Data::String(s) if s.is_empty() => RawCell::Empty,
        Data::String(s) => RawCell::String(s.clone()),
        Data::DateTime(_) => cell
            .as_datetime()
            .map(RawCell::Temporal)
            .unwrap_or_else(|| RawCell::String(cell.to_string())),
        Data::DateTimeIso(raw) => parse_temporal(raw)
            .map(RawCell::Temporal)
            .unwrap_or_else(|| RawCell::String(raw.clone())),
        Data::DurationIso(raw) => RawCell::String(raw.clone()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    #[test]
    fn detect_recognizes_workbook_extensions() {
        assert_eq!(SourceKind::detect(&PathBuf::from("book.XLSX")), SourceKind::Workbook);
        assert_eq!(SourceKind::detect(&PathBuf::from("book.ods")), SourceKind::Workbook);
        assert_eq!(SourceKind::detect(&PathBuf::from("rows.csv")), SourceKind::Delimited);
        assert_eq!(SourceKind::detect(&PathBuf::from("-")), SourceKind::Delimited);
    }

    #[test]
    fn workbook_cells_keep_native_types() {
        assert_eq!(workbook_cell(&Data::Int(4)), RawCell::Integer(4));
        assert_eq!(workbook_cell(&Data::Float(2.5)), RawCell::Number(2.5));
        assert_eq!(workbook_cell(&Data::Empty), RawCell::Empty);
        assert_eq!(
            workbook_cell(&Data::String("4010".into())),
            RawCell::String("4010".into())
        );
        assert!(matches!(
            workbook_cell(&Data::DateTimeIso("2024-03-01T00:00:00".into())),
            RawCell::Temporal(_)
        ));
    }

    #[test]
    fn sheet_names_rejects_delimited_files() {
        assert!(sheet_names(&PathBuf::from("rows.csv")).is_err());
    }
}
