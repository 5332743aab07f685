use crate::protocol::{ColumnInfo, OdbcType, Value};

/// How a column's cell should be fetched from the driver.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CellFormat {
    Text,
    Binary,
}

pub fn cell_format(column: &ColumnInfo) -> CellFormat {
    match column.odbc_type() {
        OdbcType::Binary => CellFormat::Binary,
        _ => CellFormat::Text,
    }
}

/// Converts raw cell bytes (`None` for SQL NULL) into a [`Value`].
///
/// Numeric and bit columns arrive as text and are parsed; text that does not
/// parse is kept as text.
pub fn decode_cell(column: &ColumnInfo, bytes: Option<Vec<u8>>) -> Value {
    let Some(bytes) = bytes else {
        return Value::Null;
    };
    if cell_format(column) == CellFormat::Binary {
        return Value::Binary(bytes);
    }

    let text = match String::from_utf8(bytes) {
        Ok(text) => text,
        Err(e) => String::from_utf8_lossy(e.as_bytes()).into_owned(),
    };
    let trimmed = text.trim();
    match column.odbc_type() {
        OdbcType::Integer | OdbcType::BigInt => trimmed
            .parse::<i64>()
            .map(Value::Integer)
            .unwrap_or(Value::Text(text)),
        OdbcType::Double => trimmed
            .parse::<f64>()
            .map(Value::Double)
            .unwrap_or(Value::Text(text)),
        OdbcType::Bit => match trimmed {
            "1" => Value::Bool(true),
            "0" => Value::Bool(false),
            _ => Value::Text(text),
        },
        _ => Value::Text(text),
    }
}
