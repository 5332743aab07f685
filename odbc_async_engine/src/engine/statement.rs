use super::connection::Connection;
use super::result::OdbcResult;
use crate::driver::{Driver, DriverResult, HandleRef, SqlReturn, StmtHandle};
use crate::error::{OdbcError, Result};
use crate::handles::OwnedStatement;
use crate::protocol::{ParamValue, Parameter};
use std::sync::{Arc, Mutex};

/// A statement handle plus the parameters bound to it.
///
/// `execute` leaves the handle with the statement and hands the result a
/// shared reference (the result may not free it). `execute_direct` moves the
/// handle into the result; the statement is spent afterwards.
#[derive(Clone)]
pub struct Statement {
    inner: Arc<StatementInner>,
}

pub(crate) struct StatementInner {
    conn: Connection,
    handle: Mutex<Option<Arc<OwnedStatement>>>,
    params: Mutex<Vec<Parameter>>,
}

impl Statement {
    pub(crate) fn new(conn: Connection, handle: Arc<OwnedStatement>) -> Self {
        conn.inner().statement_opened();
        Self {
            inner: Arc::new(StatementInner {
                conn,
                handle: Mutex::new(Some(handle)),
                params: Mutex::new(Vec::new()),
            }),
        }
    }

    pub fn connection(&self) -> &Connection {
        &self.inner.conn
    }

    /// `false` once the handle was moved into a result or freed.
    pub fn is_open(&self) -> bool {
        self.inner
            .handle
            .lock()
            .map(|h| h.is_some())
            .unwrap_or(false)
    }

    pub fn bound_parameters(&self) -> usize {
        self.inner.params.lock().map(|p| p.len()).unwrap_or(0)
    }

    /// Replaces the bound parameters, numbering them from 1.
    pub fn bind_sync(&self, values: &[ParamValue]) -> Result<()> {
        let mut params = to_parameters(values);
        self.inner.bind(&mut params)
    }

    pub fn bind<C>(&self, values: &[ParamValue], callback: C) -> Result<()>
    where
        C: FnOnce(Result<()>) + Send + 'static,
    {
        self.inner.conn.inner().dispatch(
            Arc::clone(&self.inner),
            to_parameters(values),
            |stmt, params| stmt.bind(params),
            |_, bound| bound,
            callback,
        )
    }

    pub fn prepare_sync(&self, sql: &str) -> Result<()> {
        self.inner.prepare(sql)
    }

    pub fn prepare<C>(&self, sql: &str, callback: C) -> Result<()>
    where
        C: FnOnce(Result<()>) + Send + 'static,
    {
        self.inner.conn.inner().dispatch(
            Arc::clone(&self.inner),
            sql.to_string(),
            |stmt, sql| stmt.prepare(sql),
            |_, prepared| prepared,
            callback,
        )
    }

    /// Executes the prepared SQL with the bound parameters.
    pub fn execute_sync(&self) -> Result<OdbcResult> {
        let executed = self.inner.execute();
        self.inner.wrap(executed, false)
    }

    pub fn execute<C>(&self, callback: C) -> Result<()>
    where
        C: FnOnce(Result<OdbcResult>) + Send + 'static,
    {
        self.inner.conn.inner().dispatch(
            Arc::clone(&self.inner),
            (),
            |stmt, _| stmt.execute(),
            |stmt, executed| stmt.wrap(executed, false),
            callback,
        )
    }

    /// Executes `sql` and moves the handle into the returned result. On
    /// failure the handle stays with the statement.
    pub fn execute_direct_sync(&self, sql: &str) -> Result<OdbcResult> {
        let executed = self.inner.execute_direct(sql);
        self.inner.wrap(executed, true)
    }

    pub fn execute_direct<C>(&self, sql: &str, callback: C) -> Result<()>
    where
        C: FnOnce(Result<OdbcResult>) + Send + 'static,
    {
        self.inner.conn.inner().dispatch(
            Arc::clone(&self.inner),
            sql.to_string(),
            |stmt, sql| stmt.execute_direct(sql),
            |stmt, executed| stmt.wrap(executed, true),
            callback,
        )
    }

    /// Releases the handle. A result created by `execute` keeps it alive
    /// until that result goes away. Idempotent.
    pub fn close_sync(&self) -> Result<()> {
        self.inner.close()
    }

    pub fn close<C>(&self, callback: C) -> Result<()>
    where
        C: FnOnce(Result<()>) + Send + 'static,
    {
        self.inner.conn.inner().dispatch(
            Arc::clone(&self.inner),
            (),
            |stmt, _| stmt.close(),
            |_, closed| closed,
            callback,
        )
    }
}

fn to_parameters(values: &[ParamValue]) -> Vec<Parameter> {
    values.iter().map(Parameter::from_value).collect()
}

impl StatementInner {
    fn current(&self) -> Result<Arc<OwnedStatement>> {
        self.lock_handle()?
            .clone()
            .ok_or_else(|| OdbcError::InvalidHandle("statement handle has been released".to_string()))
    }

    fn lock_handle(&self) -> Result<std::sync::MutexGuard<'_, Option<Arc<OwnedStatement>>>> {
        self.handle
            .lock()
            .map_err(|_| OdbcError::InternalError("Failed to lock statement handle".to_string()))
    }

    fn lock_params(&self) -> Result<std::sync::MutexGuard<'_, Vec<Parameter>>> {
        self.params
            .lock()
            .map_err(|_| OdbcError::InternalError("Failed to lock statement parameters".to_string()))
    }

    fn bind(&self, params: &mut Vec<Parameter>) -> Result<()> {
        let stmt = self.current()?;
        let manager = stmt.manager();
        let driver = manager.driver();
        let handle = stmt.handle();
        let fail = |fallback: &str| manager.translate(HandleRef::Stmt(handle), fallback);

        let mut bound = self.lock_params()?;
        driver
            .reset_parameters(handle)
            .map_err(|_| fail("[odbc_async_engine] Error resetting parameters"))?;
        bound.clear();

        for (i, param) in params.iter_mut().enumerate() {
            let number = u16::try_from(i + 1)
                .map_err(|_| OdbcError::ValidationError("Too many parameters".to_string()))?;
            if driver.bind_parameter(handle, number, param).is_err() {
                let err = fail("[odbc_async_engine] Error binding parameters");
                // Earlier positions point into `params`, which is dropped.
                if driver.reset_parameters(handle).is_err() {
                    log::warn!("Failed to reset parameters on {:?}", handle);
                }
                return Err(err);
            }
        }
        *bound = std::mem::take(params);
        Ok(())
    }

    fn prepare(&self, sql: &str) -> Result<()> {
        let stmt = self.current()?;
        let manager = stmt.manager();
        manager.driver().prepare(stmt.handle(), sql).map_err(|_| {
            manager.translate(
                HandleRef::Stmt(stmt.handle()),
                "[odbc_async_engine] Error preparing the sql statement",
            )
        })
    }

    fn execute(&self) -> Result<Arc<OwnedStatement>> {
        let stmt = self.current()?;
        run(&stmt, |driver, handle| driver.execute(handle))?;
        Ok(stmt)
    }

    fn execute_direct(&self, sql: &str) -> Result<Arc<OwnedStatement>> {
        let mut slot = self.lock_handle()?;
        let stmt = slot
            .clone()
            .ok_or_else(|| OdbcError::InvalidHandle("statement handle has been released".to_string()))?;
        run(&stmt, |driver, handle| driver.exec_direct(handle, sql))?;
        slot.take();
        drop(slot);
        self.release_params(&stmt);
        Ok(stmt)
    }

    fn wrap(&self, executed: Result<Arc<OwnedStatement>>, can_free: bool) -> Result<OdbcResult> {
        executed.map(|stmt| OdbcResult::new(self.conn.clone(), stmt, can_free))
    }

    fn close(&self) -> Result<()> {
        let Some(stmt) = self.lock_handle()?.take() else {
            return Ok(());
        };
        self.release_params(&stmt);
        match Arc::try_unwrap(stmt) {
            Ok(owned) => owned.free(),
            // A result from `execute` still reads from this handle.
            Err(_shared) => Ok(()),
        }
    }

    /// Unbinds parameters so their buffers can be dropped while the handle
    /// lives on elsewhere.
    fn release_params(&self, stmt: &OwnedStatement) {
        let Ok(mut params) = self.params.lock() else {
            return;
        };
        if params.is_empty() {
            return;
        }
        if !stmt.is_freed() && stmt.manager().driver().reset_parameters(stmt.handle()).is_err() {
            log::warn!("Failed to reset parameters on {:?}", stmt.handle());
        }
        params.clear();
    }
}

fn run<F>(stmt: &OwnedStatement, call: F) -> Result<()>
where
    F: FnOnce(&dyn Driver, StmtHandle) -> DriverResult<()>,
{
    let manager = stmt.manager();
    match call(manager.driver(), stmt.handle()) {
        Ok(()) | Err(SqlReturn::NoData) => Ok(()),
        Err(_) => Err(manager.translate(
            HandleRef::Stmt(stmt.handle()),
            "[odbc_async_engine] Error executing the sql statement",
        )),
    }
}

impl Drop for StatementInner {
    fn drop(&mut self) {
        let handle = match self.handle.get_mut() {
            Ok(handle) => handle.take(),
            Err(poisoned) => poisoned.into_inner().take(),
        };
        if let Some(stmt) = handle {
            self.release_params(&stmt);
        }
        self.conn.inner().statement_closed();
    }
}
