//! [`Driver`] over the system ODBC driver manager.
//!
//! Calls go straight through odbc-api's `sys` bindings (narrow/ANSI entry
//! points). Handles travel through the engine as integers and are turned
//! back into typed `HEnv`/`HDbc`/`HStmt` pointers at the call site.

use super::{
    ColumnFilter, CompletionType, ConnectAttr, DbcHandle, Driver, DriverResult, EnvHandle,
    FunctionId, HandleRef, SqlReturn, StmtHandle, TableFilter,
};
use crate::engine::cell_reader::{self, CellFormat};
use crate::error::DiagnosticRecord;
use crate::protocol::{CType, ColumnInfo, Nullability, Parameter, Value};
use odbc_api::sys::{
    self, AttrOdbcVersion, CDataType, ConnectionAttribute, DriverConnectOption,
    EnvironmentAttribute, FreeStmtOption, HDbc, HEnv, HStmt, Handle, HandleType, ParamType,
    Pointer, SqlDataType, NO_TOTAL, NULL_DATA,
};
use std::ptr;
use std::sync::{Arc, OnceLock};

const SQL_API_SQLMORERESULTS: u16 = 61;

const NAME_BUFFER: usize = 256;
const MESSAGE_BUFFER: usize = 1024;
const CHUNK: usize = 4096;

// odbc-sys does not bind SQLGetFunctions; the symbol comes from the driver
// manager it already links.
extern "system" {
    fn SQLGetFunctions(dbc: HDbc, function_id: u16, supported: *mut u16) -> sys::SqlReturn;
}

/// Maps a raw `SQLRETURN` to the engine's result type.
fn check(rc: sys::SqlReturn) -> DriverResult<()> {
    match rc {
        sys::SqlReturn::SUCCESS | sys::SqlReturn::SUCCESS_WITH_INFO => Ok(()),
        sys::SqlReturn::NO_DATA => Err(SqlReturn::NoData),
        sys::SqlReturn::NEED_DATA => Err(SqlReturn::NeedData),
        sys::SqlReturn::STILL_EXECUTING => Err(SqlReturn::StillExecuting),
        sys::SqlReturn::INVALID_HANDLE => Err(SqlReturn::InvalidHandle),
        _ => Err(SqlReturn::Error),
    }
}

fn raw<T>(id: u64) -> *mut T {
    id as usize as *mut T
}

fn id<T>(handle: *mut T) -> u64 {
    handle as usize as u64
}

fn env(handle: EnvHandle) -> HEnv {
    HEnv(raw(handle.0))
}

fn dbc(handle: DbcHandle) -> HDbc {
    HDbc(raw(handle.0))
}

fn stmt(handle: StmtHandle) -> HStmt {
    HStmt(raw(handle.0))
}

fn c_data_type(c_type: CType) -> CDataType {
    match c_type {
        CType::Char => CDataType::Char,
        CType::WChar => CDataType::WChar,
        CType::SBigInt => CDataType::SBigInt,
        CType::Double => CDataType::Double,
        CType::Bit => CDataType::Bit,
        CType::Binary => CDataType::Binary,
        CType::Default => CDataType::Default,
    }
}

fn text_arg(value: Option<&str>) -> DriverResult<(*const u8, i16)> {
    match value {
        None => Ok((ptr::null(), 0)),
        Some(s) => {
            let len = i16::try_from(s.len()).map_err(|_| SqlReturn::Error)?;
            Ok((s.as_ptr(), len))
        }
    }
}

fn sql_arg(sql: &str) -> DriverResult<(*const u8, i32)> {
    let len = i32::try_from(sql.len()).map_err(|_| SqlReturn::Error)?;
    Ok((sql.as_ptr(), len))
}

#[derive(Debug, Default)]
pub struct OdbcDriver;

static SHARED: OnceLock<Arc<OdbcDriver>> = OnceLock::new();

impl OdbcDriver {
    /// The process-wide instance. The driver manager is process-global, so
    /// every environment shares one.
    pub fn shared() -> Arc<dyn Driver> {
        SHARED.get_or_init(|| Arc::new(OdbcDriver)).clone()
    }

    fn alloc(&self, handle_type: HandleType, parent: Handle) -> DriverResult<u64> {
        let mut out: Handle = Handle::null();
        check(unsafe { sys::SQLAllocHandle(handle_type, parent, &mut out) })?;
        Ok(id(out.0))
    }

    fn set_uint_attr(
        &self,
        handle: DbcHandle,
        attribute: ConnectionAttribute,
        value: usize,
    ) -> DriverResult<()> {
        // String length is ignored for integer attributes.
        check(unsafe { sys::SQLSetConnectAttr(dbc(handle), attribute, value as Pointer, 0) })
    }

    fn read_cell(
        &self,
        handle: StmtHandle,
        column: u16,
        format: CellFormat,
    ) -> DriverResult<Option<Vec<u8>>> {
        let (c_type, terminator) = match format {
            CellFormat::Text => (CDataType::Char, 1),
            CellFormat::Binary => (CDataType::Binary, 0),
        };
        let mut out = Vec::new();
        let mut chunk = vec![0u8; CHUNK];
        loop {
            let mut indicator: isize = 0;
            let rc = unsafe {
                sys::SQLGetData(
                    stmt(handle),
                    column,
                    c_type,
                    chunk.as_mut_ptr() as Pointer,
                    CHUNK as isize,
                    &mut indicator,
                )
            };
            match check(rc) {
                Ok(()) => {}
                Err(SqlReturn::NoData) => return Ok(Some(out)),
                Err(e) => return Err(e),
            }
            if indicator == NULL_DATA {
                return Ok(None);
            }
            let truncated = indicator == NO_TOTAL || indicator as usize > CHUNK - terminator;
            let read = if truncated {
                CHUNK - terminator
            } else {
                indicator as usize
            };
            out.extend_from_slice(&chunk[..read]);
            if rc == sys::SqlReturn::SUCCESS || !truncated {
                return Ok(Some(out));
            }
        }
    }
}

impl Driver for OdbcDriver {
    fn alloc_env(&self) -> DriverResult<EnvHandle> {
        let handle = EnvHandle(self.alloc(HandleType::Env, Handle::null())?);
        let version = AttrOdbcVersion::Odbc3 as usize as Pointer;
        let versioned = check(unsafe {
            sys::SQLSetEnvAttr(env(handle), EnvironmentAttribute::OdbcVersion, version, 0)
        });
        if let Err(e) = versioned {
            unsafe { sys::SQLFreeHandle(HandleType::Env, env(handle).as_handle()) };
            return Err(e);
        }
        Ok(handle)
    }

    fn free_env(&self, handle: EnvHandle) -> DriverResult<()> {
        check(unsafe { sys::SQLFreeHandle(HandleType::Env, env(handle).as_handle()) })
    }

    fn alloc_connection(&self, handle: EnvHandle) -> DriverResult<DbcHandle> {
        self.alloc(HandleType::Dbc, env(handle).as_handle())
            .map(DbcHandle)
    }

    fn free_connection(&self, handle: DbcHandle) -> DriverResult<()> {
        check(unsafe { sys::SQLFreeHandle(HandleType::Dbc, dbc(handle).as_handle()) })
    }

    fn set_connect_attr(&self, handle: DbcHandle, attr: ConnectAttr) -> DriverResult<()> {
        match attr {
            ConnectAttr::ConnectionTimeout(secs) => {
                self.set_uint_attr(handle, ConnectionAttribute::CONNECTION_TIMEOUT, secs as usize)
            }
            ConnectAttr::LoginTimeout(secs) => {
                self.set_uint_attr(handle, ConnectionAttribute::LOGIN_TIMEOUT, secs as usize)
            }
            ConnectAttr::AutoCommit(on) => {
                self.set_uint_attr(handle, ConnectionAttribute::AUTOCOMMIT, usize::from(on))
            }
            ConnectAttr::TxnIsolation(level) => self.set_uint_attr(
                handle,
                ConnectionAttribute::TXN_ISOLATION,
                level.attr_value() as usize,
            ),
        }
    }

    fn driver_connect(&self, handle: DbcHandle, connection_string: &str) -> DriverResult<()> {
        let len = i16::try_from(connection_string.len()).map_err(|_| SqlReturn::Error)?;
        let mut out_len: i16 = 0;
        check(unsafe {
            sys::SQLDriverConnect(
                dbc(handle),
                ptr::null_mut(),
                connection_string.as_ptr(),
                len,
                ptr::null_mut(),
                0,
                &mut out_len,
                DriverConnectOption::NoPrompt,
            )
        })
    }

    fn disconnect(&self, handle: DbcHandle) -> DriverResult<()> {
        check(unsafe { sys::SQLDisconnect(dbc(handle)) })
    }

    fn supports_function(&self, handle: DbcHandle, function: FunctionId) -> DriverResult<bool> {
        let code = match function {
            FunctionId::MoreResults => SQL_API_SQLMORERESULTS,
        };
        let mut supported: u16 = 0;
        check(unsafe { SQLGetFunctions(dbc(handle), code, &mut supported) })?;
        Ok(supported != 0)
    }

    fn end_tran(&self, handle: DbcHandle, completion: CompletionType) -> DriverResult<()> {
        let completion = match completion {
            CompletionType::Commit => sys::CompletionType::Commit,
            CompletionType::Rollback => sys::CompletionType::Rollback,
        };
        check(unsafe { sys::SQLEndTran(HandleType::Dbc, dbc(handle).as_handle(), completion) })
    }

    fn alloc_statement(&self, handle: DbcHandle) -> DriverResult<StmtHandle> {
        self.alloc(HandleType::Stmt, dbc(handle).as_handle())
            .map(StmtHandle)
    }

    fn free_statement(&self, handle: StmtHandle) -> DriverResult<()> {
        check(unsafe { sys::SQLFreeHandle(HandleType::Stmt, stmt(handle).as_handle()) })
    }

    fn bind_parameter(
        &self,
        handle: StmtHandle,
        number: u16,
        param: &mut Parameter,
    ) -> DriverResult<()> {
        let column_size = usize::try_from(param.column_size()).map_err(|_| SqlReturn::Error)?;
        check(unsafe {
            sys::SQLBindParameter(
                stmt(handle),
                number,
                ParamType::Input,
                c_data_type(param.c_type()),
                SqlDataType(param.sql_type()),
                column_size,
                param.decimal_digits(),
                param.value_ptr(),
                param.buffer_length(),
                param.indicator_ptr(),
            )
        })
    }

    fn reset_parameters(&self, handle: StmtHandle) -> DriverResult<()> {
        check(unsafe { sys::SQLFreeStmt(stmt(handle), FreeStmtOption::ResetParams) })
    }

    fn prepare(&self, handle: StmtHandle, sql: &str) -> DriverResult<()> {
        let (text, len) = sql_arg(sql)?;
        check(unsafe { sys::SQLPrepare(stmt(handle), text, len) })
    }

    fn execute(&self, handle: StmtHandle) -> DriverResult<()> {
        check(unsafe { sys::SQLExecute(stmt(handle)) })
    }

    fn exec_direct(&self, handle: StmtHandle, sql: &str) -> DriverResult<()> {
        let (text, len) = sql_arg(sql)?;
        check(unsafe { sys::SQLExecDirect(stmt(handle), text, len) })
    }

    fn tables(&self, handle: StmtHandle, filter: &TableFilter<'_>) -> DriverResult<()> {
        let (cat, cat_len) = text_arg(filter.catalog)?;
        let (sch, sch_len) = text_arg(filter.schema)?;
        let (tab, tab_len) = text_arg(filter.table)?;
        let (typ, typ_len) = text_arg(filter.table_type)?;
        check(unsafe {
            sys::SQLTables(stmt(handle), cat, cat_len, sch, sch_len, tab, tab_len, typ, typ_len)
        })
    }

    fn columns(&self, handle: StmtHandle, filter: &ColumnFilter<'_>) -> DriverResult<()> {
        let (cat, cat_len) = text_arg(filter.catalog)?;
        let (sch, sch_len) = text_arg(filter.schema)?;
        let (tab, tab_len) = text_arg(filter.table)?;
        let (col, col_len) = text_arg(filter.column)?;
        check(unsafe {
            sys::SQLColumns(stmt(handle), cat, cat_len, sch, sch_len, tab, tab_len, col, col_len)
        })
    }

    fn num_result_cols(&self, handle: StmtHandle) -> DriverResult<u16> {
        let mut count: i16 = 0;
        check(unsafe { sys::SQLNumResultCols(stmt(handle), &mut count) })?;
        Ok(u16::try_from(count).unwrap_or(0))
    }

    fn describe_col(&self, handle: StmtHandle, column: u16) -> DriverResult<ColumnInfo> {
        let mut name = [0u8; NAME_BUFFER];
        let mut name_len: i16 = 0;
        let mut data_type = SqlDataType::UNKNOWN_TYPE;
        let mut column_size: usize = 0;
        let mut decimal_digits: i16 = 0;
        let mut nullable = sys::Nullability::UNKNOWN;
        check(unsafe {
            sys::SQLDescribeCol(
                stmt(handle),
                column,
                name.as_mut_ptr(),
                NAME_BUFFER as i16,
                &mut name_len,
                &mut data_type,
                &mut column_size,
                &mut decimal_digits,
                &mut nullable,
            )
        })?;
        let len = usize::try_from(name_len).unwrap_or(0).min(NAME_BUFFER - 1);
        Ok(ColumnInfo {
            name: String::from_utf8_lossy(&name[..len]).into_owned(),
            sql_type: data_type.0,
            column_size: column_size as u64,
            decimal_digits,
            nullable: Nullability::from_code(nullable.0),
        })
    }

    fn fetch(&self, handle: StmtHandle) -> DriverResult<bool> {
        match check(unsafe { sys::SQLFetch(stmt(handle)) }) {
            Ok(()) => Ok(true),
            Err(SqlReturn::NoData) => Ok(false),
            Err(e) => Err(e),
        }
    }

    fn get_data(&self, handle: StmtHandle, column: u16, info: &ColumnInfo) -> DriverResult<Value> {
        let bytes = self.read_cell(handle, column, cell_reader::cell_format(info))?;
        Ok(cell_reader::decode_cell(info, bytes))
    }

    fn more_results(&self, handle: StmtHandle) -> DriverResult<bool> {
        match check(unsafe { sys::SQLMoreResults(stmt(handle)) }) {
            Ok(()) => Ok(true),
            Err(SqlReturn::NoData) => Ok(false),
            Err(e) => Err(e),
        }
    }

    fn row_count(&self, handle: StmtHandle) -> DriverResult<i64> {
        let mut count: isize = 0;
        check(unsafe { sys::SQLRowCount(stmt(handle), &mut count) })?;
        Ok(count as i64)
    }

    fn close_cursor(&self, handle: StmtHandle) -> DriverResult<()> {
        // SQL_CLOSE tolerates a statement without an open cursor.
        check(unsafe { sys::SQLFreeStmt(stmt(handle), FreeStmtOption::Close) })
    }

    fn get_diag_rec(&self, handle: HandleRef, rec_number: i16) -> Option<DiagnosticRecord> {
        let (handle_type, handle): (HandleType, Handle) = match handle {
            HandleRef::Env(h) => (HandleType::Env, env(h).as_handle()),
            HandleRef::Dbc(h) => (HandleType::Dbc, dbc(h).as_handle()),
            HandleRef::Stmt(h) => (HandleType::Stmt, stmt(h).as_handle()),
        };
        let mut state = [0u8; 6];
        let mut native: i32 = 0;
        let mut message = [0u8; MESSAGE_BUFFER];
        let mut message_len: i16 = 0;
        let rc = unsafe {
            sys::SQLGetDiagRec(
                handle_type,
                handle,
                rec_number,
                state.as_mut_ptr(),
                &mut native,
                message.as_mut_ptr(),
                MESSAGE_BUFFER as i16,
                &mut message_len,
            )
        };
        check(rc).ok()?;
        let len = usize::try_from(message_len)
            .unwrap_or(0)
            .min(MESSAGE_BUFFER - 1);
        let sqlstate = String::from_utf8_lossy(&state[..5]).into_owned();
        Some(DiagnosticRecord::new(
            &sqlstate,
            native,
            String::from_utf8_lossy(&message[..len]).into_owned(),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_return_code_mapping() {
        assert_eq!(check(sys::SqlReturn::SUCCESS), Ok(()));
        assert_eq!(check(sys::SqlReturn::SUCCESS_WITH_INFO), Ok(()));
        assert_eq!(check(sys::SqlReturn::NO_DATA), Err(SqlReturn::NoData));
        assert_eq!(check(sys::SqlReturn::NEED_DATA), Err(SqlReturn::NeedData));
        assert_eq!(check(sys::SqlReturn::INVALID_HANDLE), Err(SqlReturn::InvalidHandle));
        assert_eq!(check(sys::SqlReturn::ERROR), Err(SqlReturn::Error));
    }

    #[test]
    fn test_null_filter_passes_null_pointer() {
        let (p, len) = text_arg(None).unwrap();
        assert!(p.is_null());
        assert_eq!(len, 0);
        let (p, len) = text_arg(Some("")).unwrap();
        assert!(!p.is_null());
        assert_eq!(len, 0);
    }

    #[test]
    fn test_handle_round_trips_through_id() {
        let handle = StmtHandle(0x1234);
        assert_eq!(id(stmt(handle).0), 0x1234);
        assert_eq!(id(dbc(DbcHandle(7)).0), 7);
    }

    #[test]
    fn test_parameter_c_types_map_to_sys_enum() {
        assert_eq!(c_data_type(CType::Char), CDataType::Char);
        assert_eq!(c_data_type(CType::WChar), CDataType::WChar);
        assert_eq!(c_data_type(CType::Default), CDataType::Default);
    }
}
