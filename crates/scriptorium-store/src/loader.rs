//! Tolerant JSON Lines loader
//!
//! A bulk scan must never abort on one bad record. Each line is parsed on its
//! own; failures are collected as `(line, error)` pairs and logged.

use crate::StoreError;
use serde::de::DeserializeOwned;
use std::fs::File;
use std::io::{BufRead, BufReader, Read};
use std::path::Path;

/// A record together with the byte offset of its line
#[derive(Debug, Clone)]
pub struct Located<T> {
    /// Byte offset of the first character of the line
    pub offset: u64,
    /// Parsed record
    pub record: T,
}

/// A line that failed to parse
#[derive(Debug, Clone, PartialEq)]
pub struct LineError {
    /// 1-based line number
    pub line: usize,
    /// Byte offset of the line
    pub offset: u64,
    /// Parser message
    pub message: String,
}

/// Result of loading a log: the good records and the skipped lines
#[derive(Debug, Clone)]
pub struct LoadReport<T> {
    /// Successfully parsed records, in file order
    pub records: Vec<T>,
    /// Lines that were skipped
    pub errors: Vec<LineError>,
}

impl<T> Default for LoadReport<T> {
    fn default() -> Self {
        Self {
            records: Vec::new(),
            errors: Vec::new(),
        }
    }
}

impl<T> LoadReport<T> {
    /// Transform every record, keeping the error list
    pub fn map<U, F: FnMut(T) -> U>(self, f: F) -> LoadReport<U> {
        LoadReport {
            records: self.records.into_iter().map(f).collect(),
            errors: self.errors,
        }
    }

    /// Whether every line parsed
    pub fn is_clean(&self) -> bool {
        self.errors.is_empty()
    }
}

/// Read a JSON Lines file, skipping blank and malformed lines
///
/// The file length is captured when the scan starts, so a writer appending
/// concurrently never hands the reader a half-written tail. A missing file
/// reads as empty.
pub fn read_jsonl<T: DeserializeOwned>(path: &Path) -> Result<LoadReport<Located<T>>, StoreError> {
    let file = match File::open(path) {
        Ok(file) => file,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(LoadReport::default()),
        Err(e) => return Err(e.into()),
    };
    let end = file.metadata()?.len();
    let mut reader = BufReader::new(file.take(end));

    let mut report = LoadReport::default();
    let mut offset = 0u64;
    let mut line_no = 0usize;
    let mut buf = Vec::new();

    loop {
        buf.clear();
        let read = reader.read_until(b'\n', &mut buf)?;
        if read == 0 {
            break;
        }
        line_no += 1;
        let line_offset = offset;
        offset += read as u64;

        // Bytes, not str: a line of invalid UTF-8 is one bad record.
        let trimmed = buf.trim_ascii();
        if trimmed.is_empty() {
            continue;
        }
        match serde_json::from_slice::<T>(trimmed) {
            Ok(record) => report.records.push(Located {
                offset: line_offset,
                record,
            }),
            Err(e) => {
                tracing::warn!(
                    "Skipping malformed record at {}:{}: {}",
                    path.display(),
                    line_no,
                    e
                );
                report.errors.push(LineError {
                    line: line_no,
                    offset: line_offset,
                    message: e.to_string(),
                });
            }
        }
    }

    Ok(report)
}
