///
/// Row Store
///
/// Rows are kept in one owned vector rather than a chain of heap nodes:
/// population only appends, consumption only walks forward, and the whole
/// store is released in one drop. The C shim rebuilds the linked
/// `tsdb_rows_t` chain from this when a foreign caller needs it.
///

use std::collections::VecDeque;
use std::ops::Index;

use crate::value::Value;

#[derive(Debug, Clone, PartialEq)]
pub struct Row {
    values: Vec<Value>,
}

impl Row {
    pub fn new(values: Vec<Value>) -> Self {
        Self { values }
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<&Value> {
        self.values.get(index)
    }

    pub fn values(&self) -> &[Value] {
        &self.values
    }

    pub fn into_values(self) -> Vec<Value> {
        self.values
    }
}

impl Index<usize> for Row {
    type Output = Value;

    fn index(&self, index: usize) -> &Value {
        &self.values[index]
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct RowStore {
    rows: Vec<Row>,
}

impl RowStore {
    pub fn new() -> Self {
        Self { rows: Vec::new() }
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            rows: Vec::with_capacity(capacity),
        }
    }

    pub fn push(&mut self, row: Row) {
        self.rows.push(row);
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// First row, or `None` for an empty store.
    pub fn head(&self) -> Option<&Row> {
        self.rows.first()
    }

    pub fn get(&self, index: usize) -> Option<&Row> {
        self.rows.get(index)
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Row> {
        self.rows.iter()
    }
}

impl IntoIterator for RowStore {
    type Item = Row;
    type IntoIter = std::vec::IntoIter<Row>;

    fn into_iter(self) -> Self::IntoIter {
        self.rows.into_iter()
    }
}

impl<'a> IntoIterator for &'a RowStore {
    type Item = &'a Row;
    type IntoIter = std::slice::Iter<'a, Row>;

    fn into_iter(self) -> Self::IntoIter {
        self.rows.iter()
    }
}

impl FromIterator<Row> for RowStore {
    fn from_iter<I: IntoIterator<Item = Row>>(iter: I) -> Self {
        Self {
            rows: iter.into_iter().collect(),
        }
    }
}

/// Forward-only cursor that hands rows out one at a time.
#[derive(Debug, Default)]
pub struct RowCursor {
    pending: VecDeque<Row>,
    consumed: u64,
}

impl RowCursor {
    pub fn new(store: RowStore) -> Self {
        Self {
            pending: store.rows.into(),
            consumed: 0,
        }
    }

    pub fn remaining(&self) -> usize {
        self.pending.len()
    }

    pub fn consumed(&self) -> u64 {
        self.consumed
    }

    pub fn is_done(&self) -> bool {
        self.pending.is_empty()
    }
}

impl Iterator for RowCursor {
    type Item = Row;

    fn next(&mut self) -> Option<Row> {
        let row = self.pending.pop_front()?;
        self.consumed += 1;
        Some(row)
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        (self.pending.len(), Some(self.pending.len()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn row(i: i64) -> Row {
        Row::new(vec![Value::Int64(i), Value::from(format!("r{}", i))])
    }

    #[test]
    fn test_store_append_and_walk() {
        let mut store = RowStore::new();
        assert!(store.head().is_none());
        store.push(row(1));
        store.push(row(2));
        assert_eq!(store.len(), 2);
        assert_eq!(store.head().unwrap()[0], Value::Int64(1));
        let ids: Vec<i64> = store.iter().filter_map(|r| r[0].as_i64()).collect();
        assert_eq!(ids, vec![1, 2]);
    }

    #[test]
    fn test_cursor_consumes_in_order() {
        let store: RowStore = (1..=3).map(row).collect();
        let mut cursor = RowCursor::new(store);
        assert_eq!(cursor.remaining(), 3);
        assert_eq!(cursor.next().unwrap()[0], Value::Int64(1));
        assert_eq!(cursor.consumed(), 1);
        assert_eq!(cursor.by_ref().count(), 2);
        assert!(cursor.is_done());
        assert!(cursor.next().is_none());
        assert_eq!(cursor.consumed(), 3);
    }
}
