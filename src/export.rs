use std::{
    io::{Read, Write},
    path::Path,
};

use anyhow::{Context, Result, anyhow, bail};
use log::info;

use crate::{
    aggregate::MonthlyTotal,
    data::format_number,
    io_utils,
    months::Month,
};

pub const MONTH_HEADER: &str = "Month";

pub fn write_monthly_csv<W: Write>(
    writer: W,
    measure_column: &str,
    monthly: &[MonthlyTotal],
) -> Result<()> {
    let mut writer = csv::WriterBuilder::new().delimiter(b',').from_writer(writer);
    writer
        .write_record([MONTH_HEADER, measure_column])
        .context("Writing summary header")?;
    for entry in monthly {
        writer
            .write_record([entry.month.label(), format_number(entry.total)])
            .with_context(|| format!("Writing summary row for {}", entry.month))?;
    }
    writer.flush().context("Flushing summary CSV")?;
    Ok(())
}

pub fn monthly_csv_bytes(measure_column: &str, monthly: &[MonthlyTotal]) -> Result<Vec<u8>> {
    let mut buffer = Vec::new();
    write_monthly_csv(&mut buffer, measure_column, monthly)?;
    Ok(buffer)
}

pub fn export_monthly_csv(path: &Path, measure_column: &str, monthly: &[MonthlyTotal]) -> Result<()> {
    let output = io_utils::open_output(path)?;
    write_monthly_csv(output, measure_column, monthly)
        .with_context(|| format!("Exporting monthly summary to {path:?}"))?;
    info!("Wrote {} month(s) to {:?}", monthly.len(), path);
    Ok(())
}

/// Reads a summary written by [`write_monthly_csv`], returning the measure
/// column name and the rows in file order.
pub fn read_monthly_csv<R: Read>(reader: R) -> Result<(String, Vec<MonthlyTotal>)> {
    let mut reader = csv::ReaderBuilder::new().has_headers(true).from_reader(reader);
    let headers = reader.headers().context("Reading summary header")?.clone();
    if headers.len() != 2 || headers.get(0) != Some(MONTH_HEADER) {
        bail!("Summary header must be '{MONTH_HEADER},<measure>', found {headers:?}");
    }
    let measure = headers
        .get(1)
        .ok_or_else(|| anyhow!("Summary header is missing the measure column"))?
        .to_string();
    let mut rows = Vec::new();
    for (idx, record) in reader.records().enumerate() {
        let record = record.with_context(|| format!("Reading summary row {}", idx + 2))?;
        let month = record
            .get(0)
            .ok_or_else(|| anyhow!("Summary row {} has no month", idx + 2))?
            .parse::<Month>()?;
        let total = record
            .get(1)
            .ok_or_else(|| anyhow!("Summary row {} has no total", idx + 2))?
            .parse::<f64>()
            .with_context(|| format!("Parsing total on summary row {}", idx + 2))?;
        rows.push(MonthlyTotal { month, total });
    }
    Ok((measure, rows))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(year: i32, month: u32, total: f64) -> MonthlyTotal {
        MonthlyTotal {
            month: Month::new(year, month).unwrap(),
            total,
        }
    }

    #[test]
    fn writes_header_and_calendar_rows() {
        let bytes = monthly_csv_bytes(
            "Amount",
            &[entry(2024, 1, 150.0), entry(2024, 2, 30.25)],
        )
        .unwrap();
        let text = String::from_utf8(bytes).unwrap();
        assert_eq!(text, "Month,Amount\n2024-01,150\n2024-02,30.25\n");
    }

    #[test]
    fn quotes_measure_names_with_commas() {
        let bytes = monthly_csv_bytes("Amount, USD", &[]).unwrap();
        assert_eq!(String::from_utf8(bytes).unwrap(), "Month,\"Amount, USD\"\n");
    }

    #[test]
    fn round_trips_through_reader() {
        let monthly = vec![
            entry(2023, 12, -12.5),
            entry(2024, 1, 0.1 + 0.2),
            entry(2024, 2, 1e20),
        ];
        let bytes = monthly_csv_bytes("Net", &monthly).unwrap();
        let (measure, parsed) = read_monthly_csv(bytes.as_slice()).unwrap();
        assert_eq!(measure, "Net");
        assert_eq!(parsed, monthly);
    }

    #[test]
    fn reader_rejects_foreign_headers() {
        let err = read_monthly_csv("Period,Amount\n2024-01,1\n".as_bytes()).unwrap_err();
        assert!(err.to_string().contains("Summary header"));
    }
}
