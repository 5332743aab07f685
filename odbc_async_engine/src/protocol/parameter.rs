//! Driver-facing parameter buffers.
//!
//! A [`Parameter`] owns the value buffer and the length/indicator cell that
//! `SQLBindParameter` points the driver at. Both live on the heap behind
//! boxes, so the addresses handed out by [`Parameter::value_ptr`] and
//! [`Parameter::indicator_ptr`] stay valid while the `Parameter` itself is
//! moved between threads. Buffers are released exactly once, by `Drop`.
//!
//! Text is bound with its byte length in the indicator rather than as a
//! NUL-terminated string, so embedded `\0` characters reach the driver.

use super::types::{sql_type, CType};
use super::{ParamValue, Value};
use crate::observability::metrics::{Gauge, GaugeGuard};
use odbc_api::sys::NULL_DATA;
use std::ffi::c_void;

#[derive(Debug)]
enum ParamBuffer {
    Null,
    Narrow(Box<[u8]>),
    Wide(Box<[u16]>),
    Integer(Box<i64>),
    Double(Box<f64>),
    Bit(Box<u8>),
}

#[derive(Debug)]
pub struct Parameter {
    c_type: CType,
    sql_type: i16,
    column_size: u64,
    decimal_digits: i16,
    buffer: ParamBuffer,
    indicator: Box<isize>,
    _live: GaugeGuard,
}

impl Parameter {
    pub fn from_value(value: &ParamValue) -> Self {
        let (c_type, sql_type, column_size, decimal_digits, buffer, indicator) = match value {
            ParamValue::Null => (
                CType::Default,
                sql_type::VARCHAR,
                1,
                0,
                ParamBuffer::Null,
                NULL_DATA,
            ),
            ParamValue::Bool(b) => (
                CType::Bit,
                sql_type::BIT,
                1,
                0,
                ParamBuffer::Bit(Box::new(u8::from(*b))),
                0,
            ),
            ParamValue::Integer(n) => (
                CType::SBigInt,
                sql_type::BIGINT,
                0,
                0,
                ParamBuffer::Integer(Box::new(*n)),
                0,
            ),
            ParamValue::Double(f) => (
                CType::Double,
                sql_type::DOUBLE,
                15,
                0,
                ParamBuffer::Double(Box::new(*f)),
                0,
            ),
            ParamValue::Text(s) => {
                let mut bytes = Vec::with_capacity(s.len() + 1);
                bytes.extend_from_slice(s.as_bytes());
                bytes.push(0);
                (
                    CType::Char,
                    sql_type::VARCHAR,
                    s.len().max(1) as u64,
                    0,
                    ParamBuffer::Narrow(bytes.into_boxed_slice()),
                    s.len() as isize,
                )
            }
            ParamValue::WideText(s) => {
                let mut units: Vec<u16> = s.encode_utf16().collect();
                let chars = units.len();
                units.push(0);
                (
                    CType::WChar,
                    sql_type::WVARCHAR,
                    chars.max(1) as u64,
                    0,
                    ParamBuffer::Wide(units.into_boxed_slice()),
                    (chars * std::mem::size_of::<u16>()) as isize,
                )
            }
        };

        Self {
            c_type,
            sql_type,
            column_size,
            decimal_digits,
            buffer,
            indicator: Box::new(indicator),
            _live: GaugeGuard::acquire(Gauge::ParamBuffers),
        }
    }

    pub fn c_type(&self) -> CType {
        self.c_type
    }

    pub fn sql_type(&self) -> i16 {
        self.sql_type
    }

    pub fn column_size(&self) -> u64 {
        self.column_size
    }

    pub fn decimal_digits(&self) -> i16 {
        self.decimal_digits
    }

    /// Size of the value buffer in bytes, terminator included.
    pub fn buffer_length(&self) -> isize {
        let bytes = match &self.buffer {
            ParamBuffer::Null => 0,
            ParamBuffer::Narrow(b) => b.len(),
            ParamBuffer::Wide(w) => w.len() * std::mem::size_of::<u16>(),
            ParamBuffer::Integer(_) => std::mem::size_of::<i64>(),
            ParamBuffer::Double(_) => std::mem::size_of::<f64>(),
            ParamBuffer::Bit(_) => 1,
        };
        bytes as isize
    }

    pub fn is_null(&self) -> bool {
        *self.indicator == NULL_DATA
    }

    /// Octet length the driver reads from the value buffer, or `NULL_DATA`.
    pub fn indicator(&self) -> isize {
        *self.indicator
    }

    pub fn value_ptr(&mut self) -> *mut c_void {
        match &mut self.buffer {
            ParamBuffer::Null => std::ptr::null_mut(),
            ParamBuffer::Narrow(b) => b.as_mut_ptr().cast(),
            ParamBuffer::Wide(w) => w.as_mut_ptr().cast(),
            ParamBuffer::Integer(n) => (&mut **n as *mut i64).cast(),
            ParamBuffer::Double(f) => (&mut **f as *mut f64).cast(),
            ParamBuffer::Bit(b) => (&mut **b as *mut u8).cast(),
        }
    }

    pub fn indicator_ptr(&mut self) -> *mut isize {
        &mut *self.indicator
    }

    /// Reads the bound value back out of the buffer.
    pub fn to_value(&self) -> Value {
        if self.is_null() {
            return Value::Null;
        }
        match &self.buffer {
            ParamBuffer::Null => Value::Null,
            ParamBuffer::Narrow(b) => {
                let len = self.data_len().min(b.len());
                Value::Text(String::from_utf8_lossy(&b[..len]).into_owned())
            }
            ParamBuffer::Wide(w) => {
                let len = (self.data_len() / std::mem::size_of::<u16>()).min(w.len());
                Value::Text(String::from_utf16_lossy(&w[..len]))
            }
            ParamBuffer::Integer(n) => Value::Integer(**n),
            ParamBuffer::Double(f) => Value::Double(**f),
            ParamBuffer::Bit(b) => Value::Bool(**b != 0),
        }
    }

    fn data_len(&self) -> usize {
        usize::try_from(*self.indicator).unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_null_parameter_uses_null_indicator() {
        let mut p = Parameter::from_value(&ParamValue::Null);
        assert!(p.is_null());
        assert_eq!(p.c_type(), CType::Default);
        assert!(p.value_ptr().is_null());
        assert_eq!(p.to_value(), Value::Null);
    }

    #[test]
    fn test_text_parameter_carries_byte_length() {
        let p = Parameter::from_value(&ParamValue::Text("abc".to_string()));
        assert_eq!(p.c_type(), CType::Char);
        assert_eq!(p.sql_type(), sql_type::VARCHAR);
        assert_eq!(p.buffer_length(), 4);
        assert_eq!(p.indicator(), 3);
        assert_eq!(p.column_size(), 3);
        assert_eq!(p.to_value(), Value::Text("abc".to_string()));
    }

    #[test]
    fn test_wide_text_parameter_is_utf16() {
        let p = Parameter::from_value(&ParamValue::WideText("héllo".to_string()));
        assert_eq!(p.c_type(), CType::WChar);
        assert_eq!(p.sql_type(), sql_type::WVARCHAR);
        assert_eq!(p.column_size(), 5);
        assert_eq!(p.buffer_length(), 12);
        assert_eq!(p.indicator(), 10);
        assert_eq!(p.to_value(), Value::Text("héllo".to_string()));
    }

    #[test]
    fn test_interior_nul_is_kept_in_bound_length() {
        let p = Parameter::from_value(&ParamValue::Text("ab\0cd".to_string()));
        assert_eq!(p.indicator(), 5);
        assert_eq!(p.column_size(), 5);
        assert_eq!(p.to_value(), Value::Text("ab\0cd".to_string()));

        let p = Parameter::from_value(&ParamValue::WideText("x\0y".to_string()));
        assert_eq!(p.indicator(), 6);
        assert_eq!(p.to_value(), Value::Text("x\0y".to_string()));
    }

    #[test]
    fn test_empty_text_keeps_nonzero_column_size() {
        let p = Parameter::from_value(&ParamValue::Text(String::new()));
        assert_eq!(p.column_size(), 1);
        assert_eq!(p.buffer_length(), 1);
        assert_eq!(p.indicator(), 0);
        assert_eq!(p.to_value(), Value::Text(String::new()));
    }

    #[test]
    fn test_numeric_and_bit_parameters() {
        let p = Parameter::from_value(&ParamValue::Integer(-9));
        assert_eq!(p.c_type(), CType::SBigInt);
        assert_eq!(p.buffer_length(), 8);
        assert_eq!(p.to_value(), Value::Integer(-9));

        let p = Parameter::from_value(&ParamValue::Double(0.25));
        assert_eq!(p.c_type(), CType::Double);
        assert_eq!(p.to_value(), Value::Double(0.25));

        let p = Parameter::from_value(&ParamValue::Bool(true));
        assert_eq!(p.c_type(), CType::Bit);
        assert_eq!(p.to_value(), Value::Bool(true));
    }

    #[test]
    fn test_value_ptr_survives_move() {
        let mut p = Parameter::from_value(&ParamValue::Integer(77));
        let before = p.value_ptr();
        let mut moved = p;
        assert_eq!(before, moved.value_ptr());
    }
}
