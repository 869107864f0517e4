///
/// Result Sets
///
/// The unit of query output: field descriptors plus a row store, with
/// `field_count == fields.len()` and `row_count == rows.len()` held by
/// construction.
///
/// A query's pending output can be taken in one of two shapes, both carried
/// by `StoredResult`:
/// - `Materialized`: a fully owned `ResultSet`
/// - `Reader`: a `StreamingReader` handing rows out one at a time
///
/// Both are released the same way (`Connection::free_result`), so there is
/// one ownership path regardless of which shape the caller picked.
///

use crate::backend::ColumnMeta;
use crate::error::{DriverError, Result};
use crate::field::{declared_length, DataType, FieldDescriptor, V3Field};
use crate::rows::{Row, RowCursor, RowStore};
use crate::value::{render_datetime, widen, DatetimeMode, Value};

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ResultSet {
    fields: Vec<FieldDescriptor>,
    rows: RowStore,
}

impl ResultSet {
    /// Empty set with no fields and no rows.
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn new(fields: Vec<FieldDescriptor>, rows: RowStore) -> Result<Self> {
        if fields.len() > u16::MAX as usize + 1 {
            return Err(DriverError::InvalidArgs(format!("too many fields: {}", fields.len())));
        }
        for (position, field) in fields.iter().enumerate() {
            if field.field_index as usize != position {
                return Err(DriverError::InvalidArgs(format!(
                    "field '{}' has index {} at position {}",
                    field.name, field.field_index, position
                )));
            }
        }
        if let Some((n, row)) = rows.iter().enumerate().find(|(_, r)| r.len() != fields.len()) {
            return Err(DriverError::InvalidArgs(format!(
                "row {} has {} values, expected {}",
                n,
                row.len(),
                fields.len()
            )));
        }
        Ok(Self { fields, rows })
    }

    /// Builds a result set from raw store output, resolving each column's
    /// type and coercing every cell to it. A column is widened past its
    /// declared or first-seen type when a later value does not fit.
    pub fn from_columns(columns: Vec<ColumnMeta>, raw_rows: Vec<Vec<Value>>) -> Result<Self> {
        let types: Vec<DataType> = columns
            .iter()
            .enumerate()
            .map(|(i, column)| resolve_type(column, &raw_rows, i))
            .collect();

        let mut rows = RowStore::with_capacity(raw_rows.len());
        let mut nullable = vec![false; columns.len()];
        let mut longest = vec![0usize; columns.len()];
        for raw in raw_rows {
            if raw.len() != columns.len() {
                return Err(DriverError::query(format!(
                    "store returned {} values for {} columns",
                    raw.len(),
                    columns.len()
                )));
            }
            let mut values = Vec::with_capacity(raw.len());
            for (i, value) in raw.into_iter().enumerate() {
                let found = value.data_type();
                let value = value.coerce(types[i]).ok_or_else(|| {
                    DriverError::query(format!("column {} cannot hold a {:?} value as {:?}", i, found, types[i]))
                })?;
                nullable[i] |= value.is_null();
                longest[i] = longest[i].max(value.byte_len());
                values.push(value);
            }
            rows.push(Row::new(values));
        }

        let fields = columns
            .into_iter()
            .enumerate()
            .map(|(i, column)| {
                let data_type = types[i];
                let mut field = FieldDescriptor::new(i as u16, column.name, data_type)
                    .with_nullable(nullable[i])
                    .with_flags(column.unique, column.has_index, column.is_ref);
                if data_type.is_variable_length() {
                    let declared = column
                        .declared_type
                        .as_deref()
                        .and_then(declared_length)
                        .unwrap_or(0);
                    field = field
                        .with_length(declared)
                        .with_real_length(longest[i].min(u8::MAX as usize) as u8);
                }
                field
            })
            .collect();

        Self::new(fields, rows)
    }

    /// Hands DATETIME columns back the way `mode` asks. In text mode they
    /// become STRING columns rendered at the mode's offset.
    pub fn with_datetimes(self, mode: DatetimeMode) -> Self {
        let DatetimeMode::Text(offset) = mode else {
            return self;
        };
        let columns: Vec<usize> = self
            .fields
            .iter()
            .enumerate()
            .filter(|(_, f)| f.data_type == DataType::Datetime)
            .map(|(i, _)| i)
            .collect();
        if columns.is_empty() {
            return self;
        }
        let Self { mut fields, rows } = self;
        let mut longest = vec![0usize; fields.len()];
        let rows = rows
            .into_iter()
            .map(|row| {
                let mut values = row.into_values();
                for &i in &columns {
                    if let Value::Datetime(ms) = values[i] {
                        let text = render_datetime(ms, offset).unwrap_or_else(|| ms.to_string());
                        longest[i] = longest[i].max(text.len());
                        values[i] = Value::String(text);
                    }
                }
                Row::new(values)
            })
            .collect();
        for &i in &columns {
            let field = &mut fields[i];
            field.data_type = DataType::String;
            field.real_length = longest[i].min(u8::MAX as usize) as u8;
        }
        Self { fields, rows }
    }

    pub fn row_count(&self) -> u64 {
        self.rows.len() as u64
    }

    pub fn field_count(&self) -> u32 {
        self.fields.len() as u32
    }

    pub fn fields(&self) -> &[FieldDescriptor] {
        &self.fields
    }

    pub fn v3_fields(&self) -> Vec<V3Field> {
        self.fields.iter().map(FieldDescriptor::to_v3).collect()
    }

    pub fn rows(&self) -> &RowStore {
        &self.rows
    }

    pub fn column_names(&self) -> Vec<&str> {
        self.fields.iter().map(|f| f.name.as_str()).collect()
    }

    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.fields.iter().position(|f| f.name == name)
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Row> {
        self.rows.iter()
    }

    pub fn into_parts(self) -> (Vec<FieldDescriptor>, RowStore) {
        (self.fields, self.rows)
    }

    pub fn into_reader(self) -> StreamingReader {
        StreamingReader {
            fields: self.fields,
            cursor: RowCursor::new(self.rows),
        }
    }
}

fn resolve_type(column: &ColumnMeta, rows: &[Vec<Value>], index: usize) -> DataType {
    let mut resolved = column
        .declared_type
        .as_deref()
        .and_then(DataType::from_declared)
        .unwrap_or(DataType::Null);
    for value in rows.iter().filter_map(|r| r.get(index)).filter(|v| !v.is_null()) {
        while !value.fits(resolved) {
            resolved = widen(resolved, value.data_type());
        }
    }
    resolved
}

/// Legacy incremental reader over one query's rows.
#[derive(Debug)]
pub struct StreamingReader {
    fields: Vec<FieldDescriptor>,
    cursor: RowCursor,
}

impl StreamingReader {
    pub fn fields(&self) -> &[FieldDescriptor] {
        &self.fields
    }

    pub fn next_row(&mut self) -> Option<Row> {
        self.cursor.next()
    }

    pub fn remaining(&self) -> usize {
        self.cursor.remaining()
    }

    pub fn is_done(&self) -> bool {
        self.cursor.is_done()
    }

    pub fn rows_read(&self) -> u64 {
        self.cursor.consumed()
    }
}

impl Iterator for StreamingReader {
    type Item = Row;

    fn next(&mut self) -> Option<Row> {
        self.next_row()
    }
}

/// Which shape to take a pending result in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreMode {
    Streaming,
    Materialized,
}

#[derive(Debug)]
pub enum StoredResult {
    Reader(StreamingReader),
    Materialized(ResultSet),
}

impl StoredResult {
    pub fn from_result_set(set: ResultSet, mode: StoreMode) -> Self {
        match mode {
            StoreMode::Streaming => StoredResult::Reader(set.into_reader()),
            StoreMode::Materialized => StoredResult::Materialized(set),
        }
    }

    pub fn fields(&self) -> &[FieldDescriptor] {
        match self {
            StoredResult::Reader(r) => r.fields(),
            StoredResult::Materialized(s) => s.fields(),
        }
    }

    pub fn into_result_set(self) -> Option<ResultSet> {
        match self {
            StoredResult::Materialized(s) => Some(s),
            StoredResult::Reader(_) => None,
        }
    }

    pub fn into_reader(self) -> StreamingReader {
        match self {
            StoredResult::Reader(r) => r,
            StoredResult::Materialized(s) => s.into_reader(),
        }
    }
}

impl From<ResultSet> for StoredResult {
    fn from(set: ResultSet) -> Self {
        StoredResult::Materialized(set)
    }
}

impl From<StreamingReader> for StoredResult {
    fn from(reader: StreamingReader) -> Self {
        StoredResult::Reader(reader)
    }
}
