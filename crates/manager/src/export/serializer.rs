//! Export document encoding.
//!
//! JSON documents are a single array of objects; CSV documents are an
//! optional header line followed by one positional line per row. Both are
//! written incrementally so rows never accumulate in memory.

use std::fmt;
use std::str::FromStr;

use async_stream::try_stream;
use axum::body::Bytes;
use futures_core::Stream;
use serde::ser::SerializeMap;
use tokio_stream::StreamExt;

use super::error::ExportResult;
use super::format::ExportFormat;
use super::rows::{ExportRow, ExportValue, TIMESTAMP_FORMAT, visible_columns};
use super::types::ApiVersion;
use crate::config::ExportConfig;

/// Bytes buffered before a chunk is handed to the response body.
const CHUNK_SIZE: usize = 16 * 1024;

/// Record separator for CSV documents.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum LineTerminator {
    #[default]
    Lf,
    Crlf,
}

impl LineTerminator {
    pub fn as_str(&self) -> &'static str {
        match self {
            LineTerminator::Lf => "\n",
            LineTerminator::Crlf => "\r\n",
        }
    }
}

impl FromStr for LineTerminator {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "lf" => Ok(LineTerminator::Lf),
            "crlf" => Ok(LineTerminator::Crlf),
            other => Err(format!("unknown line terminator '{other}'")),
        }
    }
}

impl fmt::Display for LineTerminator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LineTerminator::Lf => f.write_str("lf"),
            LineTerminator::Crlf => f.write_str("crlf"),
        }
    }
}

/// Renders rows of one resource for one API version.
#[derive(Debug, Clone, Copy)]
pub struct ExportEncoder {
    format: ExportFormat,
    version: ApiVersion,
    csv_header: bool,
    line_terminator: LineTerminator,
}

impl ExportEncoder {
    pub fn new(format: ExportFormat, version: ApiVersion, config: &ExportConfig) -> Self {
        Self {
            format,
            version,
            csv_header: config.csv_header,
            line_terminator: config.line_terminator,
        }
    }

    /// Write the document prefix.
    pub fn open<R: ExportRow>(&self, out: &mut Vec<u8>) {
        match self.format {
            ExportFormat::Json => out.push(b'['),
            ExportFormat::Csv if self.csv_header => {
                for (i, name) in visible_columns::<R>(self.version).enumerate() {
                    if i > 0 {
                        out.push(b',');
                    }
                    write_csv_field(out, name);
                }
                out.extend_from_slice(self.line_terminator.as_str().as_bytes());
            }
            ExportFormat::Csv => {}
        }
    }

    /// Write one row. `first` suppresses the JSON element separator.
    pub fn write_row<R: ExportRow>(
        &self,
        row: &R,
        first: bool,
        out: &mut Vec<u8>,
    ) -> ExportResult<()> {
        match self.format {
            ExportFormat::Json => {
                if !first {
                    out.push(b',');
                }
                let json = JsonRow {
                    row,
                    version: self.version,
                };
                serde_json::to_writer(&mut *out, &json)?;
            }
            ExportFormat::Csv => {
                let mut sep = false;
                for (column, value) in R::COLUMNS.iter().zip(row.values()) {
                    if !column.visible_in(self.version) {
                        continue;
                    }
                    if sep {
                        out.push(b',');
                    }
                    sep = true;
                    write_csv_value(out, &value);
                }
                out.extend_from_slice(self.line_terminator.as_str().as_bytes());
            }
        }
        Ok(())
    }

    /// Write the document suffix.
    pub fn close(&self, out: &mut Vec<u8>) {
        if self.format == ExportFormat::Json {
            out.push(b']');
        }
    }

    /// Encode a complete in-memory document.
    pub fn encode<R: ExportRow>(&self, rows: &[R]) -> ExportResult<Vec<u8>> {
        let mut out = Vec::new();
        self.open::<R>(&mut out);
        for (i, row) in rows.iter().enumerate() {
            self.write_row(row, i == 0, &mut out)?;
        }
        self.close(&mut out);
        Ok(out)
    }

    /// Encode a row stream into body chunks.
    ///
    /// `first` is the row already pulled from `rest` by the caller. A failing
    /// row ends the stream with that error and no document suffix, so a client
    /// never sees a well-formed but truncated export.
    pub fn stream<R, S>(
        self,
        first: Option<R>,
        mut rest: S,
    ) -> impl Stream<Item = ExportResult<Bytes>> + Send
    where
        R: ExportRow,
        S: Stream<Item = ExportResult<R>> + Send + Unpin,
    {
        try_stream! {
            let mut buf = Vec::with_capacity(CHUNK_SIZE);
            self.open::<R>(&mut buf);
            if let Some(first) = first {
                self.write_row(&first, true, &mut buf)?;
                while let Some(row) = rest.next().await {
                    let row = row?;
                    self.write_row(&row, false, &mut buf)?;
                    if buf.len() >= CHUNK_SIZE {
                        let chunk = std::mem::replace(&mut buf, Vec::with_capacity(CHUNK_SIZE));
                        yield Bytes::from(chunk);
                    }
                }
            }
            self.close(&mut buf);
            yield Bytes::from(buf);
        }
    }
}

/// Serializes one row as a JSON object with columns in declaration order.
struct JsonRow<'a, R> {
    row: &'a R,
    version: ApiVersion,
}

impl<R: ExportRow> serde::Serialize for JsonRow<'_, R> {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(None)?;
        for (column, value) in R::COLUMNS.iter().zip(self.row.values()) {
            if column.visible_in(self.version) {
                map.serialize_entry(column.name, &value)?;
            }
        }
        map.end()
    }
}

fn write_csv_value(out: &mut Vec<u8>, value: &ExportValue<'_>) {
    match value {
        ExportValue::Text(s) => write_csv_field(out, s),
        ExportValue::Integer(i) => out.extend_from_slice(i.to_string().as_bytes()),
        ExportValue::Boolean(b) => {
            out.extend_from_slice(if *b { "true" } else { "false" }.as_bytes());
        }
        ExportValue::Timestamp(ts) => {
            out.extend_from_slice(ts.format(TIMESTAMP_FORMAT).to_string().as_bytes());
        }
        ExportValue::List(items) => write_csv_field(out, &items.join(",")),
        ExportValue::Null => {}
    }
}

/// Quote when the field holds a delimiter, quote, line break, or leading space.
fn write_csv_field(out: &mut Vec<u8>, field: &str) {
    let needs_quotes =
        field.starts_with([' ', '\t']) || field.contains([',', '"', '\r', '\n']);
    if !needs_quotes {
        out.extend_from_slice(field.as_bytes());
        return;
    }
    out.push(b'"');
    for part in field.split_inclusive('"') {
        out.extend_from_slice(part.as_bytes());
        if part.ends_with('"') {
            out.push(b'"');
        }
    }
    out.push(b'"');
}
