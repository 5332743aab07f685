//! Turns the diagnostic records a driver stacks on a handle into
//! [`OdbcError::Diagnostics`](super::OdbcError::Diagnostics).

use super::OdbcError;
use crate::driver::{Driver, HandleRef};
use serde::{Serialize, Serializer};
use std::fmt;

/// Upper bound on records read from one handle. Drivers report `NoData` well
/// before this; the cap only guards against a driver that never does.
const MAX_DIAG_RECORDS: i16 = 64;

/// Five-character SQLSTATE code (`"42S02"`, `"08001"`, ...). Always ASCII.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct SqlState([u8; 5]);

fn ascii_or_placeholder(byte: u8) -> u8 {
    if byte.is_ascii() && !byte.is_ascii_control() {
        byte
    } else {
        b'?'
    }
}

impl SqlState {
    pub const GENERAL_ERROR: SqlState = SqlState(*b"HY000");

    /// Builds a state from the first five characters of `code`, padding with
    /// `0`. Characters outside printable ASCII become `?`.
    pub fn new(code: &str) -> Self {
        let mut state = [b'0'; 5];
        for (slot, ch) in state.iter_mut().zip(code.chars()) {
            *slot = u8::try_from(ch).map_or(b'?', ascii_or_placeholder);
        }
        Self(state)
    }

    pub fn from_bytes(bytes: [u8; 5]) -> Self {
        Self(bytes.map(ascii_or_placeholder))
    }

    pub fn as_bytes(&self) -> &[u8; 5] {
        &self.0
    }

    pub fn as_str(&self) -> &str {
        std::str::from_utf8(&self.0).unwrap_or("HY000")
    }

    /// Two-character class, e.g. `08` for connection exceptions.
    pub fn class(&self) -> &str {
        self.as_str().get(..2).unwrap_or("HY")
    }
}

impl Default for SqlState {
    fn default() -> Self {
        Self(*b"00000")
    }
}

impl fmt::Display for SqlState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl fmt::Debug for SqlState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SqlState({})", self.as_str())
    }
}

impl PartialEq<str> for SqlState {
    fn eq(&self, other: &str) -> bool {
        self.as_str() == other
    }
}

impl PartialEq<&str> for SqlState {
    fn eq(&self, other: &&str) -> bool {
        self.as_str() == *other
    }
}

impl Serialize for SqlState {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

/// One `(SQLSTATE, native error, message)` triple.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DiagnosticRecord {
    pub sqlstate: SqlState,
    pub native_code: i32,
    pub message: String,
}

impl DiagnosticRecord {
    pub fn new(sqlstate: &str, native_code: i32, message: impl Into<String>) -> Self {
        Self {
            sqlstate: SqlState::new(sqlstate),
            native_code,
            message: message.into(),
        }
    }
}

impl fmt::Display for DiagnosticRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "[{}] {} (native error {})",
            self.sqlstate, self.message, self.native_code
        )
    }
}

pub(crate) fn display_records(records: &[DiagnosticRecord]) -> String {
    match records {
        [] => "ODBC error without diagnostics".to_string(),
        [only] => only.to_string(),
        [first, rest @ ..] => {
            let mut out = first.to_string();
            for record in rest {
                out.push_str("; ");
                out.push_str(&record.to_string());
            }
            out
        }
    }
}

/// Reads every diagnostic record attached to `handle`, in driver order.
pub fn collect(driver: &dyn Driver, handle: HandleRef) -> Vec<DiagnosticRecord> {
    (1..=MAX_DIAG_RECORDS)
        .map_while(|rec_number| driver.get_diag_rec(handle, rec_number))
        .collect()
}

/// Builds the error for a failed call on `handle`. When the driver attached
/// no records, a single `HY000` record carrying `fallback` stands in.
pub fn translate(driver: &dyn Driver, handle: HandleRef, fallback: &str) -> OdbcError {
    let mut records = collect(driver, handle);
    if records.is_empty() {
        records.push(DiagnosticRecord {
            sqlstate: SqlState::GENERAL_ERROR,
            native_code: 0,
            message: fallback.to_string(),
        });
    }
    log::debug!("{:?} failed: {}", handle, display_records(&records));
    OdbcError::Diagnostics { records }
}
