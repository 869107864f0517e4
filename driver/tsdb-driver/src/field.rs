///
/// Field Descriptors
///
/// Immutable metadata for one result column. A result set owns its
/// descriptors and releases them together with its rows.
///
/// Two views exist for compatibility with older consumers:
/// - `FieldDescriptor` carries the full flag set (`fetch_ml_fields`)
/// - `V3Field` is the reduced legacy shape (`fetch_fields`)
///
/// ## Data types
///
/// Type tags are byte-sized and stable; they cross the C boundary as-is.
///
/// | Tag | Type     | Declared length |
/// |-----|----------|-----------------|
/// | 0   | Unknown  | 0               |
/// | 1   | Bool     | 1               |
/// | 2   | Int      | 4               |
/// | 3   | Int64    | 8               |
/// | 4   | Float    | 4               |
/// | 5   | Double   | 8               |
/// | 6   | Binary   | declared or 0   |
/// | 7   | String   | declared or 0   |
/// | 8   | Datetime | 8               |
/// | 9   | Null     | 0               |
///

use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum DataType {
    Unknown = 0,
    Bool = 1,
    Int = 2,
    Int64 = 3,
    Float = 4,
    Double = 5,
    Binary = 6,
    String = 7,
    Datetime = 8,
    Null = 9,
}

impl DataType {
    pub fn from_u8(tag: u8) -> Self {
        match tag {
            1 => DataType::Bool,
            2 => DataType::Int,
            3 => DataType::Int64,
            4 => DataType::Float,
            5 => DataType::Double,
            6 => DataType::Binary,
            7 => DataType::String,
            8 => DataType::Datetime,
            9 => DataType::Null,
            _ => DataType::Unknown,
        }
    }

    pub fn as_u8(self) -> u8 {
        self as u8
    }

    /// Maps a declared column type such as `CHAR(100)` or `BIGINT`.
    /// Returns `None` for an empty or unrecognised declaration.
    pub fn from_declared(decl: &str) -> Option<Self> {
        let upper = decl.trim().to_ascii_uppercase();
        let base = upper.split('(').next().unwrap_or("").trim();
        let data_type = match base {
            "BOOL" | "BOOLEAN" => DataType::Bool,
            "INT" | "SMALLINT" | "TINYINT" | "MEDIUMINT" | "INT32" => DataType::Int,
            "BIGINT" | "INT64" | "INTEGER" => DataType::Int64,
            "FLOAT" => DataType::Float,
            "DOUBLE" | "DOUBLE PRECISION" | "REAL" | "NUMERIC" | "DECIMAL" => DataType::Double,
            "CHAR" | "VARCHAR" | "NCHAR" | "NVARCHAR" | "TEXT" | "STRING" | "CLOB" => {
                DataType::String
            }
            "BLOB" | "BINARY" | "VARBINARY" | "BYTES" => DataType::Binary,
            "DATETIME" | "TIMESTAMP" | "DATE" => DataType::Datetime,
            _ => return None,
        };
        Some(data_type)
    }

    /// Width in bytes of fixed-width types, `None` for variable-length ones.
    pub fn fixed_width(self) -> Option<u8> {
        match self {
            DataType::Bool => Some(1),
            DataType::Int | DataType::Float => Some(4),
            DataType::Int64 | DataType::Double | DataType::Datetime => Some(8),
            DataType::Null | DataType::Unknown => Some(0),
            DataType::Binary | DataType::String => None,
        }
    }

    pub fn type_name(self) -> &'static str {
        match self {
            DataType::Bool => "BOOL",
            DataType::Int => "INT",
            DataType::Int64 => "INT64",
            DataType::Float => "FLOAT",
            DataType::Double => "DOUBLE",
            DataType::Binary => "BINARY",
            DataType::String => "STRING",
            DataType::Datetime => "DATETIME",
            DataType::Null => "NULL",
            DataType::Unknown => "",
        }
    }

    pub fn is_variable_length(self) -> bool {
        self.fixed_width().is_none()
    }
}

impl fmt::Display for DataType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.type_name())
    }
}

/// Length argument of a declaration like `CHAR(100)`, saturated to a byte.
pub fn declared_length(decl: &str) -> Option<u8> {
    let open = decl.find('(')?;
    let close = decl[open..].find(')')? + open;
    let first = decl[open + 1..close].split(',').next()?.trim();
    let n: u64 = first.parse().ok()?;
    Some(n.min(u8::MAX as u64) as u8)
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldDescriptor {
    pub name: String,
    pub field_index: u16,
    pub data_type: DataType,
    pub unique: bool,
    pub has_index: bool,
    pub is_ref: bool,
    pub is_nullable: bool,
    /// Declared length.
    pub length: u8,
    pub field_id: u8,
    /// Longest value actually observed, for variable-length columns.
    pub real_length: u8,
}

impl FieldDescriptor {
    pub fn new(field_index: u16, name: impl Into<String>, data_type: DataType) -> Self {
        Self {
            name: name.into(),
            field_index,
            data_type,
            unique: false,
            has_index: false,
            is_ref: false,
            is_nullable: false,
            length: data_type.fixed_width().unwrap_or(0),
            field_id: (field_index & 0xFF) as u8,
            real_length: data_type.fixed_width().unwrap_or(0),
        }
    }

    pub fn with_length(mut self, length: u8) -> Self {
        self.length = length;
        self
    }

    pub fn with_real_length(mut self, real_length: u8) -> Self {
        self.real_length = real_length;
        self
    }

    pub fn with_nullable(mut self, is_nullable: bool) -> Self {
        self.is_nullable = is_nullable;
        self
    }

    pub fn with_flags(mut self, unique: bool, has_index: bool, is_ref: bool) -> Self {
        self.unique = unique;
        self.has_index = has_index;
        self.is_ref = is_ref;
        self
    }

    pub fn to_v3(&self) -> V3Field {
        V3Field {
            name: self.name.clone(),
            field_index: self.field_index,
            data_type: self.data_type,
            length: self.length as u32,
        }
    }
}

/// Legacy field shape returned by `fetch_fields`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct V3Field {
    pub name: String,
    pub field_index: u16,
    pub data_type: DataType,
    pub length: u32,
}
