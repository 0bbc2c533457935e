//! ZIP/CSV archive decoding into typed tables.
//!
//! Every archive holds exactly one CSV member, laid out by position according
//! to the kind's [`TableSchema`]. Newer files start with a header line and
//! older ones do not, so the first row is dropped only when its timestamp
//! cell does not parse.

use std::io::{Cursor, Read};

use chrono::NaiveDateTime;
use polars::prelude::*;
use ::zip::ZipArchive;

use super::provider::FetchError;
use super::schema::{ColumnType, TableSchema, TimeEncoding, DATETIME_COLUMN};
use crate::domain::DataKind;

/// Upper bound on the buffer reserved from a member's declared size.
const MAX_PREALLOC: u64 = 64 * 1024 * 1024;

/// Epoch values at or above this are microseconds, not milliseconds.
const MICROS_THRESHOLD: i64 = 1_000_000_000_000_000;

/// Decode one archive payload into a table labelled with `tz`.
pub fn decode(kind: DataKind, tz: &str, bytes: &[u8]) -> Result<DataFrame, FetchError> {
    let csv = extract_first_member(bytes)?;
    decode_csv(kind.schema(), tz, &csv)
}

fn extract_first_member(bytes: &[u8]) -> Result<Vec<u8>, FetchError> {
    let mut archive = ZipArchive::new(Cursor::new(bytes))
        .map_err(|e| FetchError::Decode(format!("failed to read ZIP: {e}")))?;
    if archive.is_empty() {
        return Err(FetchError::Decode("ZIP archive has no members".into()));
    }
    let mut member = archive
        .by_index(0)
        .map_err(|e| FetchError::Decode(format!("failed to open ZIP member: {e}")))?;
    let mut buf = Vec::with_capacity(reserve_hint(member.size()));
    member
        .read_to_end(&mut buf)
        .map_err(|e| FetchError::Decode(format!("failed to inflate ZIP member: {e}")))?;
    Ok(buf)
}

/// Initial buffer size for a member. The declared size is not trusted.
fn reserve_hint(declared: u64) -> usize {
    usize::try_from(declared.min(MAX_PREALLOC)).unwrap_or(0)
}

/// Decode a raw CSV payload laid out as `schema`.
pub fn decode_csv(schema: &TableSchema, tz: &str, csv: &[u8]) -> Result<DataFrame, FetchError> {
    let mut reader = ::csv::ReaderBuilder::new()
        .has_headers(false)
        .flexible(true)
        .trim(::csv::Trim::All)
        .from_reader(csv);

    let mut buffers: Vec<ColumnBuffer> = schema
        .columns
        .iter()
        .map(|(_, ty)| ColumnBuffer::new(*ty))
        .collect();
    let mut instants: Vec<Option<i64>> = Vec::new();

    for (row, record) in reader.records().enumerate() {
        let record =
            record.map_err(|e| FetchError::Decode(format!("malformed CSV at row {row}: {e}")))?;

        let time_cell = record.get(schema.time_column).unwrap_or("");
        let instant = parse_instant(schema.time_encoding, time_cell);
        if row == 0 && instant.is_err() {
            continue;
        }

        if record.len() < schema.columns.len() {
            return Err(FetchError::Decode(format!(
                "row {row} has {} fields, expected {}",
                record.len(),
                schema.columns.len()
            )));
        }

        for (i, buffer) in buffers.iter_mut().enumerate() {
            buffer
                .push(&record[i])
                .map_err(|msg| FetchError::Decode(format!("row {row}, column '{}': {msg}", schema.columns[i].0)))?;
        }
        instants.push(instant.map_err(|msg| FetchError::Decode(format!("row {row}: {msg}")))?);
    }

    let mut columns: Vec<Column> = schema
        .columns
        .iter()
        .zip(buffers)
        .map(|((name, _), buffer)| buffer.into_column(name))
        .collect();
    columns.push(datetime_column(instants, tz));

    DataFrame::new(columns).map_err(|e| FetchError::Decode(format!("dataframe creation: {e}")))
}

/// Build the `datetime` column from epoch milliseconds.
pub(crate) fn datetime_column(millis: Vec<Option<i64>>, tz: &str) -> Column {
    let ca = Int64Chunked::from_iter_options(DATETIME_COLUMN.into(), millis.into_iter());
    ca.into_datetime(TimeUnit::Milliseconds, Some(tz.into()))
        .into_series()
        .into()
}

/// Parse the timestamp cell into epoch milliseconds. Empty cells are null.
fn parse_instant(encoding: TimeEncoding, cell: &str) -> Result<Option<i64>, String> {
    if cell.is_empty() {
        return Ok(None);
    }
    match encoding {
        TimeEncoding::EpochMillis => {
            let value: i64 = cell
                .parse()
                .map_err(|_| format!("'{cell}' is not an epoch timestamp"))?;
            if value.abs() >= MICROS_THRESHOLD {
                Ok(Some(value / 1000))
            } else {
                Ok(Some(value))
            }
        }
        TimeEncoding::Formatted(fmt) => NaiveDateTime::parse_from_str(cell, fmt)
            .map(|dt| Some(dt.and_utc().timestamp_millis()))
            .map_err(|_| format!("'{cell}' does not match {fmt}")),
    }
}

enum ColumnBuffer {
    Int(Vec<Option<i64>>),
    Float(Vec<Option<f64>>),
    Bool(Vec<Option<bool>>),
    Text(Vec<Option<String>>),
}

impl ColumnBuffer {
    fn new(ty: ColumnType) -> Self {
        match ty {
            ColumnType::Int64 => ColumnBuffer::Int(Vec::new()),
            ColumnType::Float64 => ColumnBuffer::Float(Vec::new()),
            ColumnType::Boolean => ColumnBuffer::Bool(Vec::new()),
            ColumnType::Utf8 => ColumnBuffer::Text(Vec::new()),
        }
    }

    fn push(&mut self, cell: &str) -> Result<(), String> {
        if cell.is_empty() {
            match self {
                ColumnBuffer::Int(v) => v.push(None),
                ColumnBuffer::Float(v) => v.push(None),
                ColumnBuffer::Bool(v) => v.push(None),
                ColumnBuffer::Text(v) => v.push(None),
            }
            return Ok(());
        }
        match self {
            ColumnBuffer::Int(v) => v.push(Some(parse_int(cell)?)),
            ColumnBuffer::Float(v) => v.push(Some(
                cell.parse()
                    .map_err(|_| format!("'{cell}' is not a number"))?,
            )),
            ColumnBuffer::Bool(v) => v.push(Some(parse_bool(cell)?)),
            ColumnBuffer::Text(v) => v.push(Some(cell.to_string())),
        }
        Ok(())
    }

    fn into_column(self, name: &str) -> Column {
        match self {
            ColumnBuffer::Int(v) => Column::new(name.into(), v),
            ColumnBuffer::Float(v) => Column::new(name.into(), v),
            ColumnBuffer::Bool(v) => Column::new(name.into(), v),
            ColumnBuffer::Text(v) => Column::new(name.into(), v),
        }
    }
}

/// Integers occasionally arrive as `12.0`.
fn parse_int(cell: &str) -> Result<i64, String> {
    if let Ok(v) = cell.parse::<i64>() {
        return Ok(v);
    }
    match cell.parse::<f64>() {
        Ok(f) if f.is_finite() && f.fract() == 0.0 => Ok(f as i64),
        _ => Err(format!("'{cell}' is not an integer")),
    }
}

fn parse_bool(cell: &str) -> Result<bool, String> {
    if cell.eq_ignore_ascii_case("true") {
        Ok(true)
    } else if cell.eq_ignore_ascii_case("false") {
        Ok(false)
    } else {
        Err(format!("'{cell}' is not a boolean"))
    }
}
