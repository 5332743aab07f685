use super::connection::Connection;
use crate::driver::{HandleRef, SqlReturn};
use crate::error::{OdbcError, Result};
use crate::handles::OwnedStatement;
use crate::protocol::{ColumnInfo, Value};
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard};

/// One row read from a cursor.
#[derive(Debug, Clone, PartialEq)]
pub struct Row {
    columns: Arc<[ColumnInfo]>,
    values: Vec<Value>,
}

impl Row {
    pub fn new(columns: Arc<[ColumnInfo]>, values: Vec<Value>) -> Self {
        Self { columns, values }
    }

    pub fn get(&self, index: usize) -> Option<&Value> {
        self.values.get(index)
    }

    /// First column whose name matches, ignoring ASCII case.
    pub fn get_by_name(&self, name: &str) -> Option<&Value> {
        self.columns
            .iter()
            .position(|c| c.name.eq_ignore_ascii_case(name))
            .and_then(|i| self.values.get(i))
    }

    pub fn columns(&self) -> &[ColumnInfo] {
        &self.columns
    }

    pub fn values(&self) -> &[Value] {
        &self.values
    }

    pub fn into_values(self) -> Vec<Value> {
        self.values
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// `{ column name: value }`. Later duplicates of a name win.
    pub fn to_json(&self) -> serde_json::Value {
        let object = self
            .columns
            .iter()
            .zip(&self.values)
            .map(|(c, v)| (c.name.clone(), v.to_json()))
            .collect();
        serde_json::Value::Object(object)
    }
}

/// A cursor over an executed statement.
///
/// When `can_free` is set the result owns the statement handle and `close`
/// frees it; otherwise the handle belongs to a [`super::Statement`] and
/// `close` only closes the cursor.
#[derive(Clone)]
pub struct OdbcResult {
    inner: Arc<ResultInner>,
}

// `stmt` is declared before `conn` so the statement is released before the
// connection it belongs to.
pub(crate) struct ResultInner {
    stmt: Mutex<Option<Arc<OwnedStatement>>>,
    can_free: bool,
    columns: Mutex<Option<Arc<[ColumnInfo]>>>,
    current_row: Mutex<Option<Row>>,
    conn: Connection,
}

impl fmt::Debug for OdbcResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let stmt = self
            .inner
            .stmt
            .lock()
            .ok()
            .and_then(|s| s.as_ref().map(|s| s.handle()));
        f.debug_struct("OdbcResult")
            .field("stmt", &stmt)
            .field("can_free", &self.inner.can_free)
            .finish()
    }
}

impl OdbcResult {
    pub(crate) fn new(conn: Connection, stmt: Arc<OwnedStatement>, can_free: bool) -> Self {
        Self {
            inner: Arc::new(ResultInner {
                conn,
                stmt: Mutex::new(Some(stmt)),
                can_free,
                columns: Mutex::new(None),
                current_row: Mutex::new(None),
            }),
        }
    }

    pub fn connection(&self) -> &Connection {
        &self.inner.conn
    }

    pub fn can_free(&self) -> bool {
        self.inner.can_free
    }

    pub fn is_closed(&self) -> bool {
        self.inner.stmt.lock().map(|s| s.is_none()).unwrap_or(true)
    }

    /// The row most recently returned by `fetch`.
    pub fn current_row(&self) -> Option<Row> {
        self.inner.current_row.lock().ok().and_then(|r| r.clone())
    }

    pub fn columns_sync(&self) -> Result<Vec<ColumnInfo>> {
        Ok(self.inner.columns()?.to_vec())
    }

    pub fn columns<C>(&self, callback: C) -> Result<()>
    where
        C: FnOnce(Result<Vec<ColumnInfo>>) + Send + 'static,
    {
        self.dispatch(|r| r.columns().map(|c| c.to_vec()), callback)
    }

    /// The next row, or `None` once the current result set is exhausted.
    pub fn fetch_sync(&self) -> Result<Option<Row>> {
        self.inner.fetch()
    }

    pub fn fetch<C>(&self, callback: C) -> Result<()>
    where
        C: FnOnce(Result<Option<Row>>) + Send + 'static,
    {
        self.dispatch(ResultInner::fetch, callback)
    }

    /// Every remaining row of the current result set.
    pub fn fetch_all_sync(&self) -> Result<Vec<Row>> {
        self.inner.fetch_all()
    }

    pub fn fetch_all<C>(&self, callback: C) -> Result<()>
    where
        C: FnOnce(Result<Vec<Row>>) + Send + 'static,
    {
        self.dispatch(ResultInner::fetch_all, callback)
    }

    /// Advances to the next result set. `false` when there is none.
    pub fn more_results_sync(&self) -> Result<bool> {
        self.inner.more_results()
    }

    pub fn more_results<C>(&self, callback: C) -> Result<()>
    where
        C: FnOnce(Result<bool>) + Send + 'static,
    {
        self.dispatch(ResultInner::more_results, callback)
    }

    /// Rows affected by the statement, `-1` when the driver cannot tell.
    pub fn row_count_sync(&self) -> Result<i64> {
        self.inner.row_count()
    }

    pub fn row_count<C>(&self, callback: C) -> Result<()>
    where
        C: FnOnce(Result<i64>) + Send + 'static,
    {
        self.dispatch(ResultInner::row_count, callback)
    }

    pub fn close_sync(&self) -> Result<()> {
        self.inner.close()
    }

    pub fn close<C>(&self, callback: C) -> Result<()>
    where
        C: FnOnce(Result<()>) + Send + 'static,
    {
        self.dispatch(ResultInner::close, callback)
    }

    fn dispatch<T, W, C>(&self, work: W, callback: C) -> Result<()>
    where
        T: Send + 'static,
        W: FnOnce(&ResultInner) -> Result<T> + Send + 'static,
        C: FnOnce(Result<T>) + Send + 'static,
    {
        self.inner.conn.inner().dispatch(
            Arc::clone(&self.inner),
            (),
            move |result, _| work(result),
            |_, outcome| outcome,
            callback,
        )
    }
}

impl ResultInner {
    fn lock<T>(slot: &Mutex<T>) -> Result<MutexGuard<'_, T>> {
        slot.lock()
            .map_err(|_| OdbcError::InternalError("Failed to lock result state".to_string()))
    }

    fn stmt(&self) -> Result<Arc<OwnedStatement>> {
        Self::lock(&self.stmt)?
            .clone()
            .ok_or_else(|| OdbcError::InvalidHandle("result is closed".to_string()))
    }

    fn fail(stmt: &OwnedStatement, fallback: &str) -> OdbcError {
        stmt.manager()
            .translate(HandleRef::Stmt(stmt.handle()), fallback)
    }

    fn columns(&self) -> Result<Arc<[ColumnInfo]>> {
        if let Some(columns) = Self::lock(&self.columns)?.as_ref() {
            return Ok(Arc::clone(columns));
        }
        let stmt = self.stmt()?;
        let driver = stmt.manager().driver();
        let count = driver
            .num_result_cols(stmt.handle())
            .map_err(|_| Self::fail(&stmt, "[odbc_async_engine] SQLNumResultCols failed"))?;
        let columns = (1..=count)
            .map(|i| {
                driver
                    .describe_col(stmt.handle(), i)
                    .map_err(|_| Self::fail(&stmt, "[odbc_async_engine] SQLDescribeCol failed"))
            })
            .collect::<Result<Vec<_>>>()?;
        let columns: Arc<[ColumnInfo]> = columns.into();
        *Self::lock(&self.columns)? = Some(Arc::clone(&columns));
        Ok(columns)
    }

    fn fetch(&self) -> Result<Option<Row>> {
        let stmt = self.stmt()?;
        let columns = self.columns()?;
        if columns.is_empty() {
            return Ok(None);
        }
        let driver = stmt.manager().driver();
        let row = match driver.fetch(stmt.handle()) {
            Ok(true) => {
                let values = columns
                    .iter()
                    .zip(1u16..)
                    .map(|(column, number)| {
                        driver
                            .get_data(stmt.handle(), number, column)
                            .map_err(|_| Self::fail(&stmt, "[odbc_async_engine] SQLGetData failed"))
                    })
                    .collect::<Result<Vec<_>>>()?;
                Some(Row::new(Arc::clone(&columns), values))
            }
            Ok(false) | Err(SqlReturn::NoData) => None,
            Err(_) => return Err(Self::fail(&stmt, "[odbc_async_engine] SQLFetch failed")),
        };
        *Self::lock(&self.current_row)? = row.clone();
        Ok(row)
    }

    fn fetch_all(&self) -> Result<Vec<Row>> {
        let mut rows = Vec::new();
        while let Some(row) = self.fetch()? {
            rows.push(row);
        }
        Ok(rows)
    }

    fn more_results(&self) -> Result<bool> {
        let stmt = self.stmt()?;
        let advanced = match stmt.manager().driver().more_results(stmt.handle()) {
            Ok(advanced) => advanced,
            Err(SqlReturn::NoData) => false,
            Err(_) => {
                return Err(Self::fail(&stmt, "[odbc_async_engine] SQLMoreResults failed"))
            }
        };
        *Self::lock(&self.columns)? = None;
        *Self::lock(&self.current_row)? = None;
        Ok(advanced)
    }

    fn row_count(&self) -> Result<i64> {
        let stmt = self.stmt()?;
        stmt.manager()
            .driver()
            .row_count(stmt.handle())
            .map_err(|_| Self::fail(&stmt, "[odbc_async_engine] SQLRowCount failed"))
    }

    fn close(&self) -> Result<()> {
        let Some(stmt) = Self::lock(&self.stmt)?.take() else {
            return Ok(());
        };
        *Self::lock(&self.current_row)? = None;
        if self.can_free {
            return stmt.free();
        }
        if stmt.is_freed() {
            return Ok(());
        }
        match stmt.manager().driver().close_cursor(stmt.handle()) {
            Ok(()) => Ok(()),
            Err(_) => Err(Self::fail(&stmt, "[odbc_async_engine] SQLCloseCursor failed")),
        }
    }
}
