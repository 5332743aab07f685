use serde::Serialize;

/// ODBC SQL data type codes (`SQL_*` in `sql.h` / `sqlext.h`).
pub mod sql_type {
    pub const UNKNOWN: i16 = 0;
    pub const CHAR: i16 = 1;
    pub const NUMERIC: i16 = 2;
    pub const DECIMAL: i16 = 3;
    pub const INTEGER: i16 = 4;
    pub const SMALLINT: i16 = 5;
    pub const FLOAT: i16 = 6;
    pub const REAL: i16 = 7;
    pub const DOUBLE: i16 = 8;
    pub const DATETIME: i16 = 9;
    pub const VARCHAR: i16 = 12;
    pub const TYPE_DATE: i16 = 91;
    pub const TYPE_TIME: i16 = 92;
    pub const TYPE_TIMESTAMP: i16 = 93;
    pub const LONGVARCHAR: i16 = -1;
    pub const BINARY: i16 = -2;
    pub const VARBINARY: i16 = -3;
    pub const LONGVARBINARY: i16 = -4;
    pub const BIGINT: i16 = -5;
    pub const TINYINT: i16 = -6;
    pub const BIT: i16 = -7;
    pub const WCHAR: i16 = -8;
    pub const WVARCHAR: i16 = -9;
    pub const WLONGVARCHAR: i16 = -10;
    pub const GUID: i16 = -11;
}

/// C buffer types a parameter or fetched cell is exchanged as.
#[repr(i16)]
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub enum CType {
    Char = 1,
    WChar = -8,
    SBigInt = -25,
    Double = 8,
    Bit = -7,
    Binary = -2,
    Default = 99,
}

/// Coarse classification of a column's SQL type, used to decide how a cell is
/// read back and which [`Value`](super::Value) variant it becomes.
#[repr(u16)]
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub enum OdbcType {
    Varchar = 1,
    Integer = 2,
    BigInt = 3,
    Decimal = 4,
    Date = 5,
    Timestamp = 6,
    Binary = 7,
    Double = 8,
    Bit = 9,
}

impl OdbcType {
    pub fn from_odbc_sql_type(sql_type: i16) -> Self {
        match sql_type {
            sql_type::INTEGER | sql_type::SMALLINT | sql_type::TINYINT => Self::Integer,
            sql_type::BIGINT => Self::BigInt,
            sql_type::NUMERIC | sql_type::DECIMAL => Self::Decimal,
            sql_type::FLOAT | sql_type::REAL | sql_type::DOUBLE => Self::Double,
            sql_type::BIT => Self::Bit,
            sql_type::DATETIME | sql_type::TYPE_DATE => Self::Date,
            sql_type::TYPE_TIMESTAMP => Self::Timestamp,
            sql_type::BINARY | sql_type::VARBINARY | sql_type::LONGVARBINARY => Self::Binary,
            _ => Self::Varchar,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub enum Nullability {
    NoNulls,
    Nullable,
    Unknown,
}

impl Nullability {
    pub fn from_code(code: i16) -> Self {
        match code {
            0 => Self::NoNulls,
            1 => Self::Nullable,
            _ => Self::Unknown,
        }
    }
}

/// Column metadata as reported by `SQLDescribeCol`.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct ColumnInfo {
    pub name: String,
    pub sql_type: i16,
    pub column_size: u64,
    pub decimal_digits: i16,
    pub nullable: Nullability,
}

impl ColumnInfo {
    pub fn new(name: impl Into<String>, sql_type: i16) -> Self {
        Self {
            name: name.into(),
            sql_type,
            column_size: 0,
            decimal_digits: 0,
            nullable: Nullability::Unknown,
        }
    }

    pub fn odbc_type(&self) -> OdbcType {
        OdbcType::from_odbc_sql_type(self.sql_type)
    }
}
