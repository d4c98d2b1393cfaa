//! Parsing of job output into a table.
//!
//! Two text dialects are supported:
//!
//! * [`Dialect::KeyValue`]: MapReduce output, one `key<TAB>v1, v2, v3` line
//!   per row. The key becomes the row index.
//! * [`Dialect::HeaderCsv`]: Spark output, a plain CSV file whose first row
//!   names the columns.
//!
//! The dialect is always chosen by the caller, never guessed.

use std::fs::File;
use std::io;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tracing::{debug, info};

use crate::error::{EmrError, Result};
use crate::path::S3Path;
use crate::store::ObjectStore;

/// Prefix shared by the part files written by both Hadoop and Spark.
pub const RESULT_FILE_PREFIX: &str = "part-";

const INDEX_COLUMN: &str = "index";

/// Text format of a job's output files.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dialect {
    KeyValue,
    HeaderCsv,
}

/// How columns of a [`Dialect::KeyValue`] table are named.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum ColumnNames {
    /// `0..N`, where `N` is the number of values in the first row.
    #[default]
    Positional,

    /// Caller supplied names.
    Named(Vec<String>),
}

/// A single table row.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Row {
    /// Row label, present for key/value output only. Not unique.
    pub index: Option<String>,
    pub values: Vec<String>,
}

/// Parsed job output. Every row has exactly one value per column.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResultTable {
    columns: Vec<String>,
    rows: Vec<Row>,

    /// Rows are labelled, even if there are none yet.
    indexed: bool,
}

impl ResultTable {
    pub fn new(columns: Vec<String>) -> Self {
        Self {
            columns,
            rows: vec![],
            indexed: false,
        }
    }

    /// A table whose rows carry an index label.
    pub fn with_index(columns: Vec<String>) -> Self {
        Self {
            indexed: true,
            ..Self::new(columns)
        }
    }

    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    pub fn rows(&self) -> &[Row] {
        &self.rows
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Row labels, in row order.
    pub fn index(&self) -> Vec<Option<&str>> {
        self.rows.iter().map(|row| row.index.as_deref()).collect()
    }

    pub fn has_index(&self) -> bool {
        self.indexed
    }

    /// Append a row. `line` is only used to report a width mismatch.
    pub fn push_row(&mut self, line: usize, index: Option<String>, values: Vec<String>) -> Result<()> {
        if values.len() != self.columns.len() {
            return Err(EmrError::MalformedResult {
                line,
                reason: format!(
                    "expected {} values, found {}",
                    self.columns.len(),
                    values.len()
                ),
            });
        }

        self.rows.push(Row { index, values });
        Ok(())
    }

    /// Write the table as CSV with a header row. Indexed tables get a leading
    /// `index` column.
    pub fn write_csv<W: io::Write>(&self, writer: W) -> Result<()> {
        let indexed = self.indexed;
        let mut writer = csv::Writer::from_writer(writer);

        let mut header: Vec<&str> = vec![];
        if indexed {
            header.push(INDEX_COLUMN);
        }
        header.extend(self.columns.iter().map(String::as_str));
        writer.write_record(&header)?;

        for row in &self.rows {
            let mut record: Vec<&str> = vec![];
            if indexed {
                record.push(row.index.as_deref().unwrap_or_default());
            }
            record.extend(row.values.iter().map(String::as_str));
            writer.write_record(&record)?;
        }

        writer.flush()?;
        Ok(())
    }

    /// Write the table to a local CSV file.
    pub fn save_csv(&self, path: &Path) -> Result<()> {
        let file = File::create(path)?;
        self.write_csv(file)?;
        info!("Saved {} rows to {}", self.rows.len(), path.display());
        Ok(())
    }
}

/// Parse MapReduce `key<TAB>v1, v2` output.
pub fn parse_key_value(data: &str, columns: &ColumnNames) -> Result<ResultTable> {
    let mut lines = data
        .lines()
        .enumerate()
        .filter(|(_, line)| !line.trim().is_empty())
        .map(|(n, line)| split_key_value(n + 1, line));

    let first = match lines.next() {
        Some(first) => first?,
        None => {
            let names = match columns {
                ColumnNames::Positional => vec![],
                ColumnNames::Named(names) => names.clone(),
            };
            return Ok(ResultTable::with_index(names));
        }
    };

    let names = match columns {
        ColumnNames::Positional => (0..first.2.len()).map(|i| i.to_string()).collect(),
        ColumnNames::Named(names) => names.clone(),
    };

    let mut table = ResultTable::with_index(names);
    let (line, key, values) = first;
    table.push_row(line, Some(key), values)?;
    for parsed in lines {
        let (line, key, values) = parsed?;
        table.push_row(line, Some(key), values)?;
    }

    Ok(table)
}

fn split_key_value(line_no: usize, line: &str) -> Result<(usize, String, Vec<String>)> {
    let (key, rest) = line.split_once('\t').ok_or_else(|| EmrError::MalformedResult {
        line: line_no,
        reason: "missing tab between key and values".to_string(),
    })?;

    let values = rest.split(',').map(|value| value.trim().to_string()).collect();
    Ok((line_no, key.trim().to_string(), values))
}

/// Parse header-first CSV output.
///
/// Spark repeats the header at the top of every part file, so once the
/// parts are joined any later row equal to the header is dropped. A data row
/// that happens to equal the header is dropped as well.
pub fn parse_header_csv(data: &str) -> Result<ResultTable> {
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(true)
        .flexible(true)
        .from_reader(data.as_bytes());

    let header = reader.headers()?.clone();
    let columns: Vec<String> = header.iter().map(str::to_string).collect();
    let mut table = ResultTable::new(columns);

    for record in reader.records() {
        let record = record?;
        if record.iter().eq(header.iter()) {
            debug!("Skipping repeated header");
            continue;
        }
        let line = record.position().map(|pos| pos.line() as usize).unwrap_or_default();
        table.push_row(line, None, record.iter().map(str::to_string).collect())?;
    }

    Ok(table)
}

/// Join the raw blobs with newlines and parse them in the given dialect.
pub fn parse_blobs<S: AsRef<str>>(blobs: &[S], dialect: Dialect, columns: &ColumnNames) -> Result<ResultTable> {
    let data = blobs
        .iter()
        .map(|blob| blob.as_ref())
        .collect::<Vec<&str>>()
        .join("\n");

    match dialect {
        Dialect::KeyValue => parse_key_value(&data, columns),
        Dialect::HeaderCsv => parse_header_csv(&data),
    }
}

/// Download and parse every part file under `output`.
///
/// Keys are sorted before their contents are joined, so row order follows
/// part file order.
pub async fn fetch_results(
    store: &dyn ObjectStore,
    output: &S3Path,
    dialect: Dialect,
    columns: &ColumnNames,
) -> Result<ResultTable> {
    let prefix = output.join(RESULT_FILE_PREFIX)?;

    let mut keys = store
        .list_objects(output)
        .await
        .map_err(|e| EmrError::ObjectStore(format!("listing {output}: {e:#}")))?;
    keys.retain(|key| key.starts_with(prefix.key()));
    keys.sort();

    if keys.is_empty() {
        return Err(EmrError::EmptyResult {
            path: prefix.to_string(),
        });
    }

    let mut blobs = Vec::with_capacity(keys.len());
    for key in &keys {
        let path = output.with_key(key);
        let data = store
            .read_object(&path)
            .await
            .map_err(|e| EmrError::ObjectStore(format!("reading {path}: {e:#}")))?;
        let text = String::from_utf8(data.to_vec()).map_err(|e| {
            EmrError::ObjectStore(format!("{path} is not valid UTF-8: {e}"))
        })?;
        debug!("Fetched {}", path);
        blobs.push(text);
    }

    parse_blobs(blobs.as_slice(), dialect, columns)
}

/// Something to do with a finished job's output.
#[async_trait]
pub trait ResultFetcher: Send + Sync {
    async fn fetch(&self, output: &S3Path) -> Result<()>;
}

/// Fetches a job's output and saves it as a local CSV file.
pub struct CsvResultFetcher<S> {
    store: S,
    dialect: Dialect,
    columns: ColumnNames,
    destination: PathBuf,
}

impl<S: ObjectStore> CsvResultFetcher<S> {
    pub fn new(store: S, dialect: Dialect, destination: impl Into<PathBuf>) -> Self {
        Self {
            store,
            dialect,
            columns: ColumnNames::default(),
            destination: destination.into(),
        }
    }

    pub fn columns(mut self, columns: ColumnNames) -> Self {
        self.columns = columns;
        self
    }

    pub fn destination(&self) -> &Path {
        &self.destination
    }
}

#[async_trait]
impl<S: ObjectStore> ResultFetcher for CsvResultFetcher<S> {
    async fn fetch(&self, output: &S3Path) -> Result<()> {
        let table = fetch_results(&self.store, output, self.dialect, &self.columns).await?;
        table.save_csv(&self.destination)
    }
}
