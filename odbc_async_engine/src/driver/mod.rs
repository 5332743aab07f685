//! The call-level interface the engine drives.
//!
//! [`Driver`] mirrors the handful of ODBC CLI calls the engine needs, one
//! method per call, operating on opaque handle values. Every method returns
//! [`DriverResult`]: a non-success [`SqlReturn`] leaves its diagnostics on
//! the handle, to be read with [`Driver::get_diag_rec`].
//!
//! Implementations must be callable from any thread. The engine serializes
//! handle allocation, release, attribute changes and connect itself (see
//! [`crate::handles::DriverManager`]); everything else may run concurrently
//! on different handles.

#[cfg(any(test, feature = "test-helpers"))]
pub mod memory;
pub mod odbc;

use crate::engine::transaction::IsolationLevel;
use crate::error::DiagnosticRecord;
use crate::protocol::{ColumnInfo, Parameter, Value};
use std::fmt;

/// Non-success return codes of a CLI call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SqlReturn {
    Error,
    InvalidHandle,
    NoData,
    NeedData,
    StillExecuting,
}

pub type DriverResult<T> = std::result::Result<T, SqlReturn>;

macro_rules! handle_type {
    ($name:ident, $label:literal) => {
        #[derive(Clone, Copy, PartialEq, Eq, Hash)]
        pub struct $name(pub u64);

        impl fmt::Debug for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, concat!($label, "({:#x})"), self.0)
            }
        }
    };
}

handle_type!(EnvHandle, "Env");
handle_type!(DbcHandle, "Dbc");
handle_type!(StmtHandle, "Stmt");

/// A handle of any level, for calls that accept more than one kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandleRef {
    Env(EnvHandle),
    Dbc(DbcHandle),
    Stmt(StmtHandle),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectAttr {
    /// Seconds; `SQL_ATTR_CONNECTION_TIMEOUT`.
    ConnectionTimeout(u32),
    /// Seconds; `SQL_ATTR_LOGIN_TIMEOUT`.
    LoginTimeout(u32),
    AutoCommit(bool),
    TxnIsolation(IsolationLevel),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompletionType {
    Commit,
    Rollback,
}

/// Functions checked with `SQLGetFunctions`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FunctionId {
    MoreResults,
}

/// Search arguments for `SQLTables`. `None` passes a null pointer, which the
/// driver reads as "no restriction".
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TableFilter<'a> {
    pub catalog: Option<&'a str>,
    pub schema: Option<&'a str>,
    pub table: Option<&'a str>,
    pub table_type: Option<&'a str>,
}

/// Search arguments for `SQLColumns`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ColumnFilter<'a> {
    pub catalog: Option<&'a str>,
    pub schema: Option<&'a str>,
    pub table: Option<&'a str>,
    pub column: Option<&'a str>,
}

pub trait Driver: Send + Sync {
    fn alloc_env(&self) -> DriverResult<EnvHandle>;
    fn free_env(&self, env: EnvHandle) -> DriverResult<()>;

    fn alloc_connection(&self, env: EnvHandle) -> DriverResult<DbcHandle>;
    fn free_connection(&self, dbc: DbcHandle) -> DriverResult<()>;
    fn set_connect_attr(&self, dbc: DbcHandle, attr: ConnectAttr) -> DriverResult<()>;
    fn driver_connect(&self, dbc: DbcHandle, connection_string: &str) -> DriverResult<()>;
    fn disconnect(&self, dbc: DbcHandle) -> DriverResult<()>;
    fn supports_function(&self, dbc: DbcHandle, function: FunctionId) -> DriverResult<bool>;
    fn end_tran(&self, dbc: DbcHandle, completion: CompletionType) -> DriverResult<()>;

    fn alloc_statement(&self, dbc: DbcHandle) -> DriverResult<StmtHandle>;
    fn free_statement(&self, stmt: StmtHandle) -> DriverResult<()>;

    /// Binds `param` at 1-based position `number`. The driver keeps the
    /// buffer addresses until [`Driver::reset_parameters`] or the statement
    /// is freed, so the caller must keep `param` alive and unmoved in memory
    /// for that long.
    fn bind_parameter(&self, stmt: StmtHandle, number: u16, param: &mut Parameter)
        -> DriverResult<()>;
    fn reset_parameters(&self, stmt: StmtHandle) -> DriverResult<()>;
    fn prepare(&self, stmt: StmtHandle, sql: &str) -> DriverResult<()>;
    fn execute(&self, stmt: StmtHandle) -> DriverResult<()>;
    fn exec_direct(&self, stmt: StmtHandle, sql: &str) -> DriverResult<()>;
    fn tables(&self, stmt: StmtHandle, filter: &TableFilter<'_>) -> DriverResult<()>;
    fn columns(&self, stmt: StmtHandle, filter: &ColumnFilter<'_>) -> DriverResult<()>;

    fn num_result_cols(&self, stmt: StmtHandle) -> DriverResult<u16>;
    fn describe_col(&self, stmt: StmtHandle, column: u16) -> DriverResult<ColumnInfo>;
    /// Advances the cursor. `Ok(false)` once the rows are exhausted.
    fn fetch(&self, stmt: StmtHandle) -> DriverResult<bool>;
    fn get_data(&self, stmt: StmtHandle, column: u16, info: &ColumnInfo) -> DriverResult<Value>;
    /// Moves to the next result set. `Ok(false)` when there is none.
    fn more_results(&self, stmt: StmtHandle) -> DriverResult<bool>;
    fn row_count(&self, stmt: StmtHandle) -> DriverResult<i64>;
    fn close_cursor(&self, stmt: StmtHandle) -> DriverResult<()>;

    /// Diagnostic record `rec_number` (1-based) of the last call on `handle`.
    fn get_diag_rec(&self, handle: HandleRef, rec_number: i16) -> Option<DiagnosticRecord>;
}
