use std::io::Read;

use camino::Utf8Path;

use crate::domain::GCS_SCHEME;
use crate::error::WaphlError;

pub const SAMPLE_COLUMN: &str = "sample";

/// A staged workspace table whose first column has been renamed to `sample`.
#[derive(Debug, Clone)]
pub struct WorkspaceTable {
    name: String,
    headers: Vec<String>,
    rows: Vec<Vec<String>>,
}

impl WorkspaceTable {
    pub fn read(name: &str, path: &Utf8Path) -> Result<Self, WaphlError> {
        let file = std::fs::File::open(path.as_std_path())
            .map_err(|err| WaphlError::Filesystem(format!("open {path}: {err}")))?;
        Self::from_reader(name, file)
    }

    pub fn from_reader<R: Read>(name: &str, reader: R) -> Result<Self, WaphlError> {
        let mut reader = csv::ReaderBuilder::new()
            .delimiter(b'\t')
            .flexible(true)
            .from_reader(reader);
        let mut headers = reader
            .headers()
            .map_err(|err| WaphlError::Table(format!("{name}: {err}")))?
            .iter()
            .map(str::to_string)
            .collect::<Vec<_>>();
        match headers.first_mut() {
            Some(first) if !first.is_empty() => *first = SAMPLE_COLUMN.to_string(),
            _ => return Err(WaphlError::Table(format!("{name}: table has no columns"))),
        }

        let mut rows = Vec::new();
        for record in reader.records() {
            let record = record.map_err(|err| WaphlError::Table(format!("{name}: {err}")))?;
            let mut row = record.iter().map(str::to_string).collect::<Vec<_>>();
            row.resize(headers.len(), String::new());
            rows.push(row);
        }

        Ok(Self {
            name: name.to_string(),
            headers,
            rows,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn headers(&self) -> &[String] {
        &self.headers
    }

    pub fn rows(&self) -> &[Vec<String>] {
        &self.rows
    }

    /// Indices of the columns, other than `sample`, holding at least one
    /// source-store path.
    pub fn candidate_columns(&self) -> Vec<usize> {
        (1..self.headers.len())
            .filter(|&column| self.rows.iter().any(|row| row[column].contains(GCS_SCHEME)))
            .collect()
    }
}
