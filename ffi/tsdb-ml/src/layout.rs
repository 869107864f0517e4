///
/// C layouts from `tsdb_ml.h` and conversion of driver results into them.
///
/// A result set handed to C is one allocation tree:
///
/// ```text
/// tsdb_result_set_t
///   fields -> [tsdb_v3_field_t*; field_count]
///   data   -> tsdb_rows_t -> tsdb_rows_t -> ... -> NULL
///               row -> [void*; len]   (one cell per field)
/// ```
///
/// A result with no rows has `data == NULL`. Cells point at one value of
/// the field's type, or are NULL for SQL NULL:
///
/// | data type          | cell points to                       |
/// |--------------------|--------------------------------------|
/// | STRING             | session-charset text ending in a NUL code unit |
/// | INT                | `int`                                |
/// | INT64, DATETIME    | `int64_t` (datetime: epoch millis)   |
/// | FLOAT / DOUBLE     | `float` / `double`                   |
/// | BOOL               | `byte_t` (0 or 1)                    |
/// | BINARY             | `tsdb_binary_t`                      |
///
/// Everything is released by `free_result_set`, which walks the same tree
/// using the field types to know what each cell points at.
///

use std::ffi::{c_char, c_int, c_void};
use std::ptr;

use tsdb_driver::{Charset, DataType, FieldDescriptor, ResultSet, V3Field, Value};

#[repr(C)]
pub struct TsdbMlField {
    pub name: *const c_char,
    pub field_index: u16,
    pub data_type: u8,
    pub unique: u8,
    pub has_index: u8,
    pub is_ref: u8,
    pub is_null: u8,
    pub length: u8,
    pub field_id: u8,
    pub real_length: u8,
    pub _reserved: [c_char; 2],
}

#[repr(C)]
pub struct TsdbV3Field {
    pub name: *const c_char,
    pub length: u32,
    pub field_index: u16,
    pub data_type: u8,
    pub _reserved: u8,
}

#[repr(C)]
pub struct TsdbRows {
    pub next: *mut TsdbRows,
    pub row: *mut *mut c_void,
    pub len: u64,
}

#[repr(C)]
pub struct TsdbResultSet {
    pub row_count: u64,
    pub field_count: u32,
    pub fields: *mut *mut TsdbV3Field,
    pub data: *mut TsdbRows,
}

/// Cell payload for BINARY values.
#[repr(C)]
pub struct TsdbBinary {
    pub len: u64,
    pub data: *mut u8,
}

impl TsdbResultSet {
    pub fn empty() -> Self {
        Self {
            row_count: 0,
            field_count: 0,
            fields: ptr::null_mut(),
            data: ptr::null_mut(),
        }
    }
}

/// Session-charset text in a `malloc` buffer ending in one NUL code unit,
/// which is two bytes wide for UCS-2. Text stops at the first NUL unit.
/// Release with `free_c_text`.
pub fn c_text(text: &str, charset: Charset) -> *mut c_char {
    let width = charset.unit_width();
    let encoded = charset.encode(text);
    let end = encoded
        .chunks_exact(width)
        .position(|unit| unit.iter().all(|&b| b == 0))
        .map(|n| n * width)
        .unwrap_or(encoded.len());
    let buf = unsafe { libc::malloc(end + width) }.cast::<u8>();
    if buf.is_null() {
        return ptr::null_mut();
    }
    unsafe {
        ptr::copy_nonoverlapping(encoded.as_ptr(), buf, end);
        ptr::write_bytes(buf.add(end), 0, width);
    }
    buf.cast()
}

pub unsafe fn free_c_text(s: *const c_char) {
    if !s.is_null() {
        unsafe { libc::free(s as *mut c_void) };
    }
}

/// An owned `c_text` buffer.
pub struct CText(*mut c_char);

// The buffer is uniquely owned and never aliased mutably.
unsafe impl Send for CText {}

impl CText {
    pub fn new(text: &str, charset: Charset) -> Self {
        Self(c_text(text, charset))
    }

    pub fn as_ptr(&self) -> *const c_char {
        self.0
    }
}

impl Drop for CText {
    fn drop(&mut self) {
        unsafe { free_c_text(self.0) };
    }
}

fn boxed<T>(value: T) -> *mut c_void {
    Box::into_raw(Box::new(value)).cast()
}

fn boxed_slice<T>(items: Vec<T>) -> *mut T {
    Box::into_raw(items.into_boxed_slice()).cast()
}

unsafe fn unbox_slice<T>(ptr: *mut T, len: usize) -> Box<[T]> {
    unsafe { Box::from_raw(ptr::slice_from_raw_parts_mut(ptr, len)) }
}

fn cell_into_raw(value: &Value, data_type: DataType, charset: Charset) -> *mut c_void {
    if matches!(data_type, DataType::Null | DataType::Unknown) {
        return ptr::null_mut();
    }
    // result sets hold only values of their field's type
    let Some(value) = value.clone().coerce(data_type) else {
        return ptr::null_mut();
    };
    match value {
        Value::Null => ptr::null_mut(),
        Value::Bool(b) => boxed(b as u8),
        Value::Int(i) => boxed(i as c_int),
        Value::Int64(i) | Value::Datetime(i) => boxed(i),
        Value::Float(f) => boxed(f),
        Value::Double(f) => boxed(f),
        Value::String(s) => c_text(&s, charset).cast(),
        Value::Binary(bytes) => {
            let len = bytes.len() as u64;
            boxed(TsdbBinary {
                len,
                data: boxed_slice(bytes),
            })
        }
    }
}

unsafe fn free_cell(cell: *mut c_void, data_type: DataType) {
    if cell.is_null() {
        return;
    }
    unsafe {
        match data_type {
            DataType::Bool => drop(Box::from_raw(cell.cast::<u8>())),
            DataType::Int => drop(Box::from_raw(cell.cast::<c_int>())),
            DataType::Int64 | DataType::Datetime => drop(Box::from_raw(cell.cast::<i64>())),
            DataType::Float => drop(Box::from_raw(cell.cast::<f32>())),
            DataType::Double => drop(Box::from_raw(cell.cast::<f64>())),
            DataType::String => free_c_text(cell.cast::<c_char>()),
            DataType::Binary => {
                let binary = Box::from_raw(cell.cast::<TsdbBinary>());
                drop(unbox_slice(binary.data, binary.len as usize));
            }
            // never allocated
            DataType::Null | DataType::Unknown => {}
        }
    }
}

pub fn v3_field_into_raw(field: &V3Field, charset: Charset) -> *mut TsdbV3Field {
    Box::into_raw(Box::new(TsdbV3Field {
        name: c_text(&field.name, charset),
        length: field.length,
        field_index: field.field_index,
        data_type: field.data_type.as_u8(),
        _reserved: 0,
    }))
}

pub unsafe fn free_v3_field(field: *mut TsdbV3Field) {
    if field.is_null() {
        return;
    }
    let field = unsafe { Box::from_raw(field) };
    unsafe { free_c_text(field.name) };
}

pub fn ml_field_into_raw(field: &FieldDescriptor, charset: Charset) -> *mut TsdbMlField {
    Box::into_raw(Box::new(TsdbMlField {
        name: c_text(&field.name, charset),
        field_index: field.field_index,
        data_type: field.data_type.as_u8(),
        unique: field.unique as u8,
        has_index: field.has_index as u8,
        is_ref: field.is_ref as u8,
        is_null: field.is_nullable as u8,
        length: field.length,
        field_id: field.field_id,
        real_length: field.real_length,
        _reserved: [0; 2],
    }))
}

/// Caller-owned array of `fields.len()` field pointers, released with
/// `free_ml_fields`.
pub fn ml_fields_into_raw(fields: &[FieldDescriptor], charset: Charset) -> *mut *mut TsdbMlField {
    if fields.is_empty() {
        return ptr::null_mut();
    }
    boxed_slice(fields.iter().map(|f| ml_field_into_raw(f, charset)).collect())
}

pub unsafe fn free_ml_fields(fields: *mut *mut TsdbMlField, count: usize) {
    if fields.is_null() {
        return;
    }
    let fields = unsafe { unbox_slice(fields, count) };
    for &field in fields.iter() {
        if !field.is_null() {
            let field = unsafe { Box::from_raw(field) };
            unsafe { free_c_text(field.name) };
        }
    }
}

/// NULL-terminated `tsdb_v3_field_t*` array, owned by the instance that
/// handed it out.
pub struct V3FieldArray {
    ptrs: Box<[*mut TsdbV3Field]>,
}

// Only the owning instance, behind its mutex, touches the pointers.
unsafe impl Send for V3FieldArray {}

impl V3FieldArray {
    pub fn new(fields: &[V3Field], charset: Charset) -> Self {
        let mut ptrs: Vec<*mut TsdbV3Field> = fields.iter().map(|f| v3_field_into_raw(f, charset)).collect();
        ptrs.push(ptr::null_mut());
        Self {
            ptrs: ptrs.into_boxed_slice(),
        }
    }

    pub fn as_ptr(&mut self) -> *mut *mut TsdbV3Field {
        self.ptrs.as_mut_ptr()
    }

    pub fn len(&self) -> usize {
        self.ptrs.len() - 1
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Drop for V3FieldArray {
    fn drop(&mut self) {
        for &field in self.ptrs.iter() {
            unsafe { free_v3_field(field) };
        }
    }
}

/// Moves `set` into a C allocation tree. Release with `free_result_set`.
pub fn result_set_into_raw(set: ResultSet, charset: Charset) -> *mut TsdbResultSet {
    let row_count = set.row_count();
    let field_count = set.field_count();
    let (fields, rows) = set.into_parts();
    let types: Vec<DataType> = fields.iter().map(|f| f.data_type).collect();

    let field_ptrs: Vec<*mut TsdbV3Field> = fields
        .iter()
        .map(|f| v3_field_into_raw(&f.to_v3(), charset))
        .collect();

    let rows: Vec<_> = rows.into_iter().collect();
    let mut head: *mut TsdbRows = ptr::null_mut();
    for row in rows.into_iter().rev() {
        let cells: Vec<*mut c_void> = row
            .values()
            .iter()
            .zip(&types)
            .map(|(value, &data_type)| cell_into_raw(value, data_type, charset))
            .collect();
        let len = cells.len() as u64;
        head = Box::into_raw(Box::new(TsdbRows {
            next: head,
            row: boxed_slice(cells),
            len,
        }));
    }

    Box::into_raw(Box::new(TsdbResultSet {
        row_count,
        field_count,
        fields: if field_ptrs.is_empty() {
            ptr::null_mut()
        } else {
            boxed_slice(field_ptrs)
        },
        data: head,
    }))
}

/// Releases a set built by `result_set_into_raw` or `TsdbResultSet::empty`.
pub unsafe fn free_result_set(set: *mut TsdbResultSet) {
    if set.is_null() {
        return;
    }
    let set = unsafe { Box::from_raw(set) };
    let fields: Box<[*mut TsdbV3Field]> = if set.fields.is_null() {
        Box::new([])
    } else {
        unsafe { unbox_slice(set.fields, set.field_count as usize) }
    };
    let types: Vec<DataType> = fields
        .iter()
        .map(|&f| {
            if f.is_null() {
                DataType::Unknown
            } else {
                DataType::from_u8(unsafe { (*f).data_type })
            }
        })
        .collect();

    let mut node = set.data;
    while !node.is_null() {
        let rows = unsafe { Box::from_raw(node) };
        node = rows.next;
        if !rows.row.is_null() {
            let cells = unsafe { unbox_slice(rows.row, rows.len as usize) };
            for (i, &cell) in cells.iter().enumerate() {
                let data_type = types.get(i).copied().unwrap_or(DataType::Unknown);
                unsafe { free_cell(cell, data_type) };
            }
        }
    }

    for &field in fields.iter() {
        unsafe { free_v3_field(field) };
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::ffi::CStr;
    use tsdb_driver::{Row, RowStore};

    fn sample() -> ResultSet {
        let fields = vec![
            FieldDescriptor::new(0, "id", DataType::Int64),
            FieldDescriptor::new(1, "name", DataType::String).with_nullable(true),
            FieldDescriptor::new(2, "ok", DataType::Bool),
            FieldDescriptor::new(3, "raw", DataType::Binary),
        ];
        let rows: RowStore = vec![
            Row::new(vec![
                Value::Int64(7),
                Value::from("seven"),
                Value::Bool(true),
                Value::Binary(vec![1, 2]),
            ]),
            Row::new(vec![Value::Int64(8), Value::Null, Value::Bool(false), Value::Binary(vec![])]),
        ]
        .into_iter()
        .collect();
        ResultSet::new(fields, rows).unwrap()
    }

    #[test]
    fn test_result_set_layout() {
        let raw = result_set_into_raw(sample(), Charset::Utf8);
        unsafe {
            assert_eq!((*raw).row_count, 2);
            assert_eq!((*raw).field_count, 4);
            let name_field = *(*raw).fields.add(1);
            assert_eq!(CStr::from_ptr((*name_field).name).to_str().unwrap(), "name");
            assert_eq!((*name_field).data_type, DataType::String.as_u8());

            let first = (*raw).data;
            assert_eq!((*first).len, 4);
            assert_eq!(*(*(*first).row).cast::<i64>(), 7);
            let name = *(*first).row.add(1);
            assert_eq!(CStr::from_ptr(name.cast()).to_str().unwrap(), "seven");
            assert_eq!(*(*(*first).row.add(2)).cast::<u8>(), 1);
            let binary = &*(*(*first).row.add(3)).cast::<TsdbBinary>();
            assert_eq!(std::slice::from_raw_parts(binary.data, binary.len as usize), &[1u8, 2][..]);

            let second = (*first).next;
            assert!((*(*second).row.add(1)).is_null());
            assert!((*second).next.is_null());
            free_result_set(raw);
        }
    }

    #[test]
    fn test_empty_result_set() {
        let raw = result_set_into_raw(ResultSet::empty(), Charset::default());
        unsafe {
            assert_eq!((*raw).row_count, 0);
            assert!((*raw).data.is_null());
            assert!((*raw).fields.is_null());
            free_result_set(raw);
            free_result_set(Box::into_raw(Box::new(TsdbResultSet::empty())));
        }
    }

    #[test]
    fn test_field_arrays() {
        let set = sample();
        let ml = ml_fields_into_raw(set.fields(), Charset::Gbk);
        unsafe {
            let second = &**ml.add(1);
            assert_eq!(second.field_index, 1);
            assert_eq!(second.is_null, 1);
            free_ml_fields(ml, set.fields().len());
        }

        let mut v3 = V3FieldArray::new(&set.v3_fields(), Charset::Utf8);
        assert_eq!(v3.len(), 4);
        unsafe {
            assert!((*v3.as_ptr().add(4)).is_null());
        }
    }

    #[test]
    fn test_c_text_charset() {
        let latin = CText::new("é", Charset::Iso8859_1);
        let cut = CText::new("a\0b", Charset::Utf8);
        unsafe {
            assert_eq!(CStr::from_ptr(latin.as_ptr()).to_bytes(), &[0xe9]);
            assert_eq!(CStr::from_ptr(cut.as_ptr()).to_bytes(), b"a");
        }
    }

    #[test]
    fn test_c_text_ucs2_keeps_every_unit() {
        let le = CText::new("hi", Charset::Ucs2Le);
        let be = CText::new("hi", Charset::Ucs2Be);
        let cut = CText::new("a\0b", Charset::Ucs2Le);
        unsafe {
            let read = |p: *const c_char, n: usize| std::slice::from_raw_parts(p.cast::<u8>(), n).to_vec();
            assert_eq!(read(le.as_ptr(), 6), vec![b'h', 0, b'i', 0, 0, 0]);
            assert_eq!(read(be.as_ptr(), 6), vec![0, b'h', 0, b'i', 0, 0]);
            assert_eq!(read(cut.as_ptr(), 4), vec![b'a', 0, 0, 0]);
        }
    }

    #[test]
    fn test_ucs2_result_set_cells() {
        let raw = result_set_into_raw(sample(), Charset::Ucs2Le);
        unsafe {
            let name_field = *(*raw).fields.add(1);
            let name = std::slice::from_raw_parts((*name_field).name.cast::<u8>(), 10);
            assert_eq!(name, &[b'n', 0, b'a', 0, b'm', 0, b'e', 0, 0, 0]);
            let cell = *(*(*raw).data).row.add(1);
            let seven = std::slice::from_raw_parts(cell.cast::<u8>(), 12);
            assert_eq!(Charset::Ucs2Le.decode(&seven[..10]).unwrap(), "seven");
            assert_eq!(&seven[10..], &[0, 0]);
            free_result_set(raw);
        }
    }
}
