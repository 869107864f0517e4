///
/// CSV bulk loading.
///
/// `table_new` hands out a `TableLoader` naming the target table;
/// `load_csv_file` reads a CSV file through it and inserts every record in
/// one transaction into the connection's current database. Cells are typed
/// by `Value::infer`, so empty cells load as NULL.
///

use std::path::Path;

use tracing::info;

use crate::backend::embedded::create_table_sql;
use crate::connection::Connection;
use crate::error::{DriverError, Result};
use crate::value::Value;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableLoader {
    table: String,
    delimiter: u8,
    has_header: bool,
    create_if_missing: bool,
    rows_loaded: u64,
}

impl TableLoader {
    pub fn new(table: &str) -> Result<Self> {
        let table = table.trim();
        if table.is_empty() {
            return Err(DriverError::InvalidArgs("table name is empty".to_string()));
        }
        Ok(Self {
            table: table.to_string(),
            delimiter: b',',
            has_header: true,
            create_if_missing: true,
            rows_loaded: 0,
        })
    }

    pub fn with_delimiter(mut self, delimiter: u8) -> Self {
        self.delimiter = delimiter;
        self
    }

    /// Without a header, columns are named `c1`, `c2`, ...
    pub fn with_header(mut self, has_header: bool) -> Self {
        self.has_header = has_header;
        self
    }

    pub fn create_if_missing(mut self, create: bool) -> Self {
        self.create_if_missing = create;
        self
    }

    pub fn table(&self) -> &str {
        &self.table
    }

    /// Rows inserted through this loader so far.
    pub fn rows_loaded(&self) -> u64 {
        self.rows_loaded
    }
}

impl Connection {
    pub fn table_new(&self, table_type: &str) -> Result<TableLoader> {
        TableLoader::new(table_type)
    }

    /// Loads `path` into the loader's table and returns the inserted count.
    pub fn load_csv_file(&mut self, path: &Path, loader: &mut TableLoader) -> Result<u64> {
        let mut reader = csv::ReaderBuilder::new()
            .delimiter(loader.delimiter)
            .has_headers(loader.has_header)
            .from_path(path)?;

        let mut columns: Vec<String> = if loader.has_header {
            reader.headers()?.iter().map(|h| h.trim().to_string()).collect()
        } else {
            Vec::new()
        };

        let mut rows: Vec<Vec<Value>> = Vec::new();
        for record in reader.records() {
            let record = record?;
            rows.push(record.iter().map(Value::infer).collect());
        }
        if columns.is_empty() {
            let width = rows.first().map(Vec::len).unwrap_or(0);
            columns = (1..=width).map(|i| format!("c{}", i)).collect();
        }
        if rows.is_empty() {
            return Ok(0);
        }

        let database = self.db_current().to_string();
        let timeout = self.query_timeout();
        let backend = self.backend_mut()?;
        if loader.create_if_missing {
            let sample = rows.first().map(Vec::as_slice);
            backend.execute(&database, &create_table_sql(&loader.table, &columns, sample), timeout)?;
        }
        let inserted = backend.bulk_insert(&database, &loader.table, &columns, &rows)?;
        loader.rows_loaded += inserted;
        self.affected_rows = inserted;
        info!(
            path = %path.display(),
            table = %loader.table,
            rows = inserted,
            "loaded csv file"
        );
        Ok(inserted)
    }
}
