use std::collections::{BTreeSet, HashMap};
use std::fs::{self, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use tracing::{debug, info, warn};

use crate::ast::{ColumnType, CreateStatement, TableSchema, TypedValue};
use crate::config::Config;
use crate::error::{Error, Result};
use crate::lock::with_table_lock;

pub const BUCKET_COUNT: u64 = 4096;
pub const FORMAT_VERSION: &str = "v1";

/// Table name to the directory of the row currently bound to that table.
pub type RowPaths = HashMap<String, PathBuf>;

pub fn bucket_name(roid: u64) -> String {
    format!("{:04}", roid % BUCKET_COUNT)
}

/// Leading-integer conversion: optional whitespace and sign, then digits. Anything else
/// ends the number; text without digits reads as 0. Out-of-range values saturate.
pub fn parse_leading_integer(text: &str) -> i64 {
    let s = text.trim_start();
    let (negative, digits) = match s.as_bytes().first() {
        Some(b'-') => (true, &s[1..]),
        Some(b'+') => (false, &s[1..]),
        _ => (false, s),
    };
    let mut value: i64 = 0;
    for b in digits.bytes().take_while(u8::is_ascii_digit) {
        let d = i64::from(b - b'0');
        value = if negative {
            value.saturating_mul(10).saturating_sub(d)
        } else {
            value.saturating_mul(10).saturating_add(d)
        };
    }
    value
}

/// Removes one pair of surrounding single quotes, if present.
pub fn strip_quotes(text: &str) -> &str {
    if text.len() >= 2 && text.starts_with('\'') && text.ends_with('\'') {
        &text[1..text.len() - 1]
    } else {
        text
    }
}

/// One row found by a table scan.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RowEntry {
    pub roid: u64,
    pub path: PathBuf,
}

/// Filesystem-backed schema and row store rooted at `Config::root`.
#[derive(Debug, Clone)]
pub struct Storage {
    config: Config,
}

impl Storage {
    pub fn new(config: Config) -> Self {
        Self { config }
    }

    /// Creates `data/schema` and `data/tables` under the root if they are missing.
    pub fn bootstrap(&self) -> Result<()> {
        for dir in [self.config.schema_dir(), self.config.tables_dir()] {
            fs::create_dir_all(&dir).map_err(|e| Error::io_at(&dir, e))?;
        }
        debug!(root = %self.config.root.display(), "storage root ready");
        Ok(())
    }

    pub fn schema_dir(&self, table: &str) -> PathBuf {
        self.config.schema_dir().join(table)
    }

    pub fn table_dir(&self, table: &str) -> PathBuf {
        self.config.tables_dir().join(table)
    }

    fn rows_dir(&self, table: &str) -> PathBuf {
        self.table_dir(table).join("rows")
    }

    fn metadata_dir(&self, table: &str) -> PathBuf {
        self.table_dir(table).join("metadata")
    }

    pub fn row_path(&self, table: &str, roid: u64) -> PathBuf {
        self.rows_dir(table).join(bucket_name(roid)).join(roid.to_string())
    }

    pub fn purgatory_dir(&self, table: &str) -> PathBuf {
        self.config.purgatory_dir().join(table)
    }

    /// Allocates the schema and table storage for a new table. Fails without writing
    /// anything if either directory already exists.
    pub fn create_table(&self, stmt: &CreateStatement) -> Result<()> {
        let mut seen = BTreeSet::new();
        for (column, _) in &stmt.columns {
            if !seen.insert(column.as_str()) {
                return Err(Error::schema(format!(
                    "duplicate column '{}' in table '{}'",
                    column, stmt.table
                )));
            }
        }

        let schema_dir = self.schema_dir(&stmt.table);
        let table_dir = self.table_dir(&stmt.table);
        if schema_dir.exists() || table_dir.exists() {
            return Err(Error::schema(format!("table '{}' already exists", stmt.table)));
        }

        fs::create_dir(&schema_dir).map_err(|e| Error::io_at(&schema_dir, e))?;
        for (column, type_text) in &stmt.columns {
            write_file(&schema_dir.join(column), type_text)?;
        }

        let rows_dir = self.rows_dir(&stmt.table);
        let serial_dir = self.metadata_dir(&stmt.table).join("serial");
        fs::create_dir_all(&rows_dir).map_err(|e| Error::io_at(&rows_dir, e))?;
        fs::create_dir_all(&serial_dir).map_err(|e| Error::io_at(&serial_dir, e))?;
        for bucket in 0..BUCKET_COUNT {
            let path = rows_dir.join(bucket_name(bucket));
            fs::create_dir(&path).map_err(|e| Error::io_at(&path, e))?;
        }

        let metadata = self.metadata_dir(&stmt.table);
        write_file(&metadata.join("version"), FORMAT_VERSION)?;
        write_file(&metadata.join("roid"), "0")?;
        for (column, type_text) in &stmt.columns {
            if ColumnType::classify(type_text) == ColumnType::Serial {
                write_file(&serial_dir.join(column), "0")?;
            }
        }

        info!(table = %stmt.table, columns = stmt.columns.len(), "created table");
        Ok(())
    }

    pub fn load_schema(&self, table: &str) -> Result<TableSchema> {
        let dir = self.schema_dir(table);
        let entries = match fs::read_dir(&dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                return Err(Error::schema(format!("table '{}' does not exist", table)));
            }
            Err(e) => return Err(Error::io_at(&dir, e)),
        };

        let mut schema = TableSchema {
            name: table.to_string(),
            ..TableSchema::default()
        };
        for entry in entries {
            let entry = entry.map_err(|e| Error::io_at(&dir, e))?;
            let column = entry.file_name().to_string_lossy().into_owned();
            let type_text = fs::read_to_string(entry.path())
                .map_err(|e| Error::io_at(entry.path(), e))?;
            schema.columns.insert(column, ColumnType::classify(&type_text));
        }
        Ok(schema)
    }

    /// Reads, increments and persists a counter file under the table lock.
    fn next_counter(&self, table: &str, counter: &Path) -> Result<u64> {
        with_table_lock(&self.table_dir(table), &self.config, || {
            let text = fs::read_to_string(counter).map_err(|e| Error::io_at(counter, e))?;
            let current: u64 = text.trim().parse().map_err(|_| {
                Error::Internal(format!(
                    "corrupt counter {}: {:?}",
                    counter.display(),
                    text.trim()
                ))
            })?;
            let next = current + 1;
            write_file(counter, &next.to_string())?;
            Ok(next)
        })
    }

    pub fn next_roid(&self, table: &str) -> Result<u64> {
        let roid = self.next_counter(table, &self.metadata_dir(table).join("roid"))?;
        debug!(table, roid, "allocated roid");
        Ok(roid)
    }

    pub fn next_serial(&self, table: &str, column: &str) -> Result<u64> {
        let path = self.metadata_dir(table).join("serial").join(column);
        let value = self.next_counter(table, &path)?;
        debug!(table, column, value, "allocated serial value");
        Ok(value)
    }

    /// Inserts one row and returns its roid. Serial columns given the literal `0` or
    /// left out receive the next serial value; other omitted columns hold `NULL`.
    pub fn insert_row(
        &self,
        schema: &TableSchema,
        columns: &[String],
        values: &[String],
    ) -> Result<u64> {
        let table = schema.name.as_str();
        let roid = self.next_roid(table)?;
        let row = self.row_path(table, roid);
        fs::create_dir(&row).map_err(|e| Error::io_at(&row, e))?;

        let given: HashMap<&str, &str> = columns
            .iter()
            .map(String::as_str)
            .zip(values.iter().map(String::as_str))
            .collect();

        for (column, ty) in &schema.columns {
            let value = match (given.get(column.as_str()), ty) {
                (Some(&"0"), ColumnType::Serial) | (None, ColumnType::Serial) => {
                    self.next_serial(table, column)?.to_string()
                }
                (Some(literal), _) => literal.to_string(),
                (None, _) => "NULL".to_string(),
            };
            write_file(&row.join(column), &value)?;
        }
        Ok(roid)
    }

    /// First line of a column file, or `None` if the file is absent.
    pub fn read_column(&self, row: &Path, column: &str) -> Result<Option<String>> {
        let path = row.join(column);
        match fs::read_to_string(&path) {
            Ok(text) => Ok(Some(text.lines().next().unwrap_or("").to_string())),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(Error::io_at(&path, e)),
        }
    }

    /// Reads a column and converts it according to the column type.
    pub fn load_value(&self, row: &Path, column: &str, ty: ColumnType) -> Result<TypedValue> {
        let value = match self.read_column(row, column)? {
            None => TypedValue::Stale,
            Some(text) if ty.is_numeric() => TypedValue::Integer(parse_leading_integer(&text)),
            Some(text) => TypedValue::Text(strip_quotes(&text).to_string()),
        };
        Ok(value)
    }

    /// Overwrites an existing column file. Returns `false` if the file or its row is
    /// gone; a missing file is never recreated.
    pub fn write_column(&self, row: &Path, column: &str, value: &str) -> Result<bool> {
        let path = row.join(column);
        let mut file = match OpenOptions::new().write(true).truncate(true).open(&path) {
            Ok(file) => file,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(false),
            Err(e) => return Err(Error::io_at(&path, e)),
        };
        file.write_all(value.as_bytes()).map_err(|e| Error::io_at(&path, e))?;
        Ok(true)
    }

    /// Rows of `table` in bucket order, then roid order within a bucket.
    pub fn scan(&self, table: &str) -> TableScan {
        TableScan {
            rows_dir: self.rows_dir(table),
            next_bucket: 0,
            pending: Vec::new().into_iter(),
        }
    }

    /// Moves a row into `purgatory/<table>/<roid>`. Returns `None` if the row vanished.
    pub fn soft_delete(&self, table: &str, entry: &RowEntry) -> Result<Option<PathBuf>> {
        let staging = self.purgatory_dir(table);
        fs::create_dir_all(&staging).map_err(|e| Error::io_at(&staging, e))?;
        let target = staging.join(entry.roid.to_string());
        match fs::rename(&entry.path, &target) {
            Ok(()) => Ok(Some(target)),
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                debug!(table, roid = entry.roid, "row vanished before delete");
                Ok(None)
            }
            Err(e) => Err(Error::io_at(&entry.path, e)),
        }
    }

    /// Removes staged rows: their schema column files, then the entry directories. The
    /// table's purgatory directory goes too once it is empty.
    pub fn reap(&self, schema: &TableSchema, staged: &[PathBuf]) -> Result<usize> {
        for entry in staged {
            for column in schema.column_names() {
                let path = entry.join(column);
                match fs::remove_file(&path) {
                    Ok(()) => {}
                    Err(e) if e.kind() == io::ErrorKind::NotFound => {}
                    Err(e) => return Err(Error::io_at(&path, e)),
                }
            }
            fs::remove_dir(entry).map_err(|e| Error::io_at(entry, e))?;
        }

        if !staged.is_empty() {
            let staging = self.purgatory_dir(&schema.name);
            let empty = match fs::read_dir(&staging) {
                Ok(mut entries) => entries.next().is_none(),
                Err(_) => false,
            };
            if empty {
                if let Err(e) = fs::remove_dir(&staging) {
                    warn!(path = %staging.display(), error = %e, "could not remove purgatory directory");
                }
            }
        }
        Ok(staged.len())
    }
}

fn write_file(path: &Path, contents: &str) -> Result<()> {
    fs::write(path, contents).map_err(|e| Error::io_at(path, e))
}

/// Lazily lists one bucket at a time.
pub struct TableScan {
    rows_dir: PathBuf,
    next_bucket: u64,
    pending: std::vec::IntoIter<u64>,
}

impl TableScan {
    fn load_bucket(&mut self, bucket: u64) -> Result<()> {
        let dir = self.rows_dir.join(bucket_name(bucket));
        let entries = match fs::read_dir(&dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(()),
            Err(e) => return Err(Error::io_at(&dir, e)),
        };
        let mut roids = Vec::new();
        for entry in entries {
            let entry = entry.map_err(|e| Error::io_at(&dir, e))?;
            match entry.file_name().to_string_lossy().parse::<u64>() {
                Ok(roid) => roids.push(roid),
                Err(_) => debug!(path = %entry.path().display(), "skipping non-row entry"),
            }
        }
        roids.sort_unstable();
        self.pending = roids.into_iter();
        Ok(())
    }
}

impl Iterator for TableScan {
    type Item = Result<RowEntry>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if let Some(roid) = self.pending.next() {
                let path = self.rows_dir.join(bucket_name(roid)).join(roid.to_string());
                return Some(Ok(RowEntry { roid, path }));
            }
            if self.next_bucket >= BUCKET_COUNT {
                return None;
            }
            let bucket = self.next_bucket;
            self.next_bucket += 1;
            if let Err(e) = self.load_bucket(bucket) {
                return Some(Err(e));
            }
        }
    }
}
