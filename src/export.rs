//! CSV export and console rendering of ranked records.
//!
//! Monetary columns are written as plain decimal BTC with exactly eight
//! fractional digits, computed from integer satoshis so the file reads back
//! to the same values.

use crate::schemas::{AddressRecord, SATOSHIS_PER_BTC};
use serde::{Deserialize, Serialize};
use std::io::Write;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::info;

/// Header row of every export
pub const EXPORT_HEADER: [&str; 5] = [
    "Address",
    "n_tx",
    "total_received",
    "total_sent",
    "final_balance",
];

/// Suffix used on screen only; never persisted
pub const DISPLAY_UNIT: &str = "BTC";

#[derive(Error, Debug)]
pub enum ExportError {
    #[error("Cannot write to {path:?}: {source}")]
    Destination {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("Unexpected header: {0:?}")]
    Header(Vec<String>),

    #[error("Invalid amount {0:?}")]
    InvalidAmount(String),
}

/// One persisted row
#[derive(Debug, Serialize, Deserialize)]
struct ExportRow {
    #[serde(rename = "Address")]
    address: String,
    n_tx: u64,
    total_received: String,
    total_sent: String,
    final_balance: String,
}

impl From<&AddressRecord> for ExportRow {
    fn from(record: &AddressRecord) -> Self {
        Self {
            address: record.address.clone(),
            n_tx: record.n_tx,
            total_received: format_btc(record.total_received.into()),
            total_sent: format_btc(record.total_sent.into()),
            final_balance: format_btc(record.final_balance.into()),
        }
    }
}

impl TryFrom<ExportRow> for AddressRecord {
    type Error = ExportError;

    fn try_from(row: ExportRow) -> Result<Self, Self::Error> {
        let unsigned = |value: &str| -> Result<u64, ExportError> {
            u64::try_from(parse_btc(value)?)
                .map_err(|_| ExportError::InvalidAmount(value.to_string()))
        };

        Ok(Self {
            total_received: unsigned(&row.total_received)?,
            total_sent: unsigned(&row.total_sent)?,
            final_balance: i64::try_from(parse_btc(&row.final_balance)?)
                .map_err(|_| ExportError::InvalidAmount(row.final_balance.clone()))?,
            address: row.address,
            n_tx: row.n_tx,
        })
    }
}

/// Satoshis to a fixed-point BTC string, e.g. `150000000` -> `1.50000000`
pub fn format_btc(satoshis: i128) -> String {
    let sign = if satoshis < 0 { "-" } else { "" };
    let abs = satoshis.unsigned_abs();
    let scale = SATOSHIS_PER_BTC as u128;
    format!("{}{}.{:08}", sign, abs / scale, abs % scale)
}

/// Inverse of [`format_btc`]; accepts up to eight fractional digits
pub fn parse_btc(value: &str) -> Result<i128, ExportError> {
    let invalid = || ExportError::InvalidAmount(value.to_string());

    let trimmed = value.trim();
    let (negative, digits) = match trimmed.strip_prefix('-') {
        Some(rest) => (true, rest),
        None => (false, trimmed),
    };
    let (whole, frac) = digits.split_once('.').unwrap_or((digits, ""));

    let all_digits = |s: &str| s.chars().all(|c| c.is_ascii_digit());
    if whole.is_empty() || frac.len() > 8 || !all_digits(whole) || !all_digits(frac) {
        return Err(invalid());
    }

    let whole: i128 = whole.parse().map_err(|_| invalid())?;
    let frac: i128 = if frac.is_empty() {
        0
    } else {
        format!("{:0<8}", frac).parse().map_err(|_| invalid())?
    };

    let satoshis = whole
        .checked_mul(SATOSHIS_PER_BTC as i128)
        .and_then(|w| w.checked_add(frac))
        .ok_or_else(invalid)?;

    Ok(if negative { -satoshis } else { satoshis })
}

/// Write the header and one row per record to `writer`.
///
/// Returns the number of data rows written.
pub fn write_records_csv<W: Write>(
    records: &[AddressRecord],
    writer: W,
) -> Result<usize, ExportError> {
    let mut wtr = csv::WriterBuilder::new()
        .has_headers(false)
        .from_writer(writer);

    wtr.write_record(EXPORT_HEADER)?;
    for record in records {
        wtr.serialize(ExportRow::from(record))?;
    }
    wtr.flush()?;

    Ok(records.len())
}

/// Export records to a CSV file at `path`
pub fn export_csv(records: &[AddressRecord], path: &Path) -> Result<usize, ExportError> {
    info!("Writing {} records to {:?}", records.len(), path);

    let file = std::fs::File::create(path).map_err(|source| ExportError::Destination {
        path: path.to_path_buf(),
        source,
    })?;
    let written = write_records_csv(records, std::io::BufWriter::new(file))?;

    info!("Exported results to {:?}", path);
    Ok(written)
}

/// Read an export back into records
pub fn read_records_csv(path: &Path) -> Result<Vec<AddressRecord>, ExportError> {
    let mut rdr = csv::ReaderBuilder::new().has_headers(true).from_path(path)?;

    let headers = rdr.headers()?;
    if headers.iter().ne(EXPORT_HEADER.iter().copied()) {
        return Err(ExportError::Header(
            headers.iter().map(str::to_string).collect(),
        ));
    }

    rdr.deserialize::<ExportRow>()
        .map(|row| AddressRecord::try_from(row?))
        .collect()
}

/// Default export path next to the input: `<stem> processed.csv`
pub fn default_output_path(input: &Path) -> PathBuf {
    let name = match input.file_stem().and_then(|s| s.to_str()) {
        Some(stem) if !stem.is_empty() => format!("{} processed.csv", stem),
        _ => "export.csv".to_string(),
    };
    input.with_file_name(name)
}

/// Render records as an aligned text table, amounts suffixed with BTC.
/// `limit` caps the number of rows shown.
pub fn format_table(records: &[AddressRecord], limit: Option<usize>) -> String {
    let shown = &records[..limit.unwrap_or(records.len()).min(records.len())];

    let rows: Vec<[String; 5]> = shown
        .iter()
        .map(|r| {
            [
                r.address.clone(),
                r.n_tx.to_string(),
                format!("{} {}", format_btc(r.total_received.into()), DISPLAY_UNIT),
                format!("{} {}", format_btc(r.total_sent.into()), DISPLAY_UNIT),
                format!("{} {}", format_btc(r.final_balance.into()), DISPLAY_UNIT),
            ]
        })
        .collect();

    let mut widths = EXPORT_HEADER.map(str::len);
    for row in &rows {
        for (width, cell) in widths.iter_mut().zip(row) {
            *width = (*width).max(cell.len());
        }
    }

    let mut out = String::new();
    let mut push_line = |cells: [&str; 5]| {
        let line: Vec<String> = cells
            .iter()
            .zip(widths)
            .enumerate()
            .map(|(i, (cell, width))| {
                if i == 0 {
                    format!("{:<width$}", cell)
                } else {
                    format!("{:>width$}", cell)
                }
            })
            .collect();
        out.push_str(line.join("  ").trim_end());
        out.push('\n');
    };

    push_line(EXPORT_HEADER);
    for row in &rows {
        push_line([
            row[0].as_str(),
            row[1].as_str(),
            row[2].as_str(),
            row[3].as_str(),
            row[4].as_str(),
        ]);
    }

    if shown.len() < records.len() {
        out.push_str(&format!("... {} more\n", records.len() - shown.len()));
    }
    out
}
