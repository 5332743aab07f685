//! `SQLTables` / `SQLColumns` on a fresh statement.

use super::connection::{Connection, ConnectionInner};
use super::query::QueryFailure;
use super::result::OdbcResult;
use crate::driver::{ColumnFilter, Driver, DriverResult, HandleRef, StmtHandle, TableFilter};
use crate::error::{OdbcError, Result};
use crate::handles::OwnedStatement;
use std::sync::Arc;

/// Host-side sentinel meaning "do not filter on this argument".
pub const NO_FILTER_SENTINEL: &str = "null";

/// One catalog search argument. `Any` reaches the driver as a null pointer;
/// `Value("")` is a real (empty) filter.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum CatalogFilter {
    #[default]
    Any,
    Value(String),
}

impl CatalogFilter {
    /// The literal `"null"` disables the filter; anything else, including
    /// the empty string, filters.
    pub fn parse(raw: &str) -> Self {
        if raw == NO_FILTER_SENTINEL {
            Self::Any
        } else {
            Self::Value(raw.to_string())
        }
    }

    pub fn as_deref(&self) -> Option<&str> {
        match self {
            Self::Any => None,
            Self::Value(v) => Some(v.as_str()),
        }
    }
}

impl From<&str> for CatalogFilter {
    fn from(raw: &str) -> Self {
        Self::parse(raw)
    }
}

impl From<String> for CatalogFilter {
    fn from(raw: String) -> Self {
        if raw == NO_FILTER_SENTINEL {
            Self::Any
        } else {
            Self::Value(raw)
        }
    }
}

impl From<Option<&str>> for CatalogFilter {
    fn from(raw: Option<&str>) -> Self {
        raw.map(Self::parse).unwrap_or_default()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TablesRequest {
    pub catalog: CatalogFilter,
    pub schema: CatalogFilter,
    pub table: CatalogFilter,
    /// Comma-separated table types, e.g. `'TABLE','VIEW'`.
    pub table_type: CatalogFilter,
}

impl TablesRequest {
    pub fn new(
        catalog: impl Into<CatalogFilter>,
        schema: impl Into<CatalogFilter>,
        table: impl Into<CatalogFilter>,
        table_type: impl Into<CatalogFilter>,
    ) -> Self {
        Self {
            catalog: catalog.into(),
            schema: schema.into(),
            table: table.into(),
            table_type: table_type.into(),
        }
    }

    /// Every table visible to the connection.
    pub fn all() -> Self {
        Self::default()
    }

    fn filter(&self) -> TableFilter<'_> {
        TableFilter {
            catalog: self.catalog.as_deref(),
            schema: self.schema.as_deref(),
            table: self.table.as_deref(),
            table_type: self.table_type.as_deref(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ColumnsRequest {
    pub catalog: CatalogFilter,
    pub schema: CatalogFilter,
    pub table: CatalogFilter,
    pub column: CatalogFilter,
}

impl ColumnsRequest {
    pub fn new(
        catalog: impl Into<CatalogFilter>,
        schema: impl Into<CatalogFilter>,
        table: impl Into<CatalogFilter>,
        column: impl Into<CatalogFilter>,
    ) -> Self {
        Self {
            catalog: catalog.into(),
            schema: schema.into(),
            table: table.into(),
            column: column.into(),
        }
    }

    fn filter(&self) -> ColumnFilter<'_> {
        ColumnFilter {
            catalog: self.catalog.as_deref(),
            schema: self.schema.as_deref(),
            table: self.table.as_deref(),
            column: self.column.as_deref(),
        }
    }
}

pub(crate) enum CatalogExecution {
    Cursor(Arc<OwnedStatement>),
    Failed(OdbcError, Arc<OwnedStatement>),
}

pub(crate) fn tables(conn: &ConnectionInner, request: &TablesRequest) -> Result<CatalogExecution> {
    run(conn, "SQLTables", |driver, stmt| {
        driver.tables(stmt, &request.filter())
    })
}

pub(crate) fn columns(conn: &ConnectionInner, request: &ColumnsRequest) -> Result<CatalogExecution> {
    run(conn, "SQLColumns", |driver, stmt| {
        driver.columns(stmt, &request.filter())
    })
}

fn run<F>(conn: &ConnectionInner, call: &str, f: F) -> Result<CatalogExecution>
where
    F: FnOnce(&dyn Driver, StmtHandle) -> DriverResult<()>,
{
    let stmt = conn.alloc_statement()?;
    let manager = conn.manager();
    match f(manager.driver(), stmt.handle()) {
        Ok(()) => Ok(CatalogExecution::Cursor(stmt)),
        Err(_) => {
            let err = manager.translate(
                HandleRef::Stmt(stmt.handle()),
                &format!("[odbc_async_engine] {} failed", call),
            );
            Ok(CatalogExecution::Failed(err, stmt))
        }
    }
}

pub(crate) fn settle(
    conn: &Connection,
    executed: Result<CatalogExecution>,
) -> std::result::Result<OdbcResult, QueryFailure> {
    match executed {
        Ok(CatalogExecution::Cursor(stmt)) => Ok(OdbcResult::new(conn.clone(), stmt, true)),
        Ok(CatalogExecution::Failed(error, stmt)) => Err(QueryFailure {
            error,
            result: Some(OdbcResult::new(conn.clone(), stmt, true)),
        }),
        Err(error) => Err(error.into()),
    }
}
