//! Access to the driver, split by whether a call needs the process-wide
//! driver lock.
//!
//! Handle allocation and release, connection attributes, connect and
//! disconnect all go through [`DriverGuard`], which only exists while the
//! single process-wide mutex is held. Execution, fetching, catalog calls,
//! transaction completion and diagnostics go straight to the driver.

use crate::driver::{
    ConnectAttr, DbcHandle, Driver, DriverResult, EnvHandle, FunctionId, HandleRef, StmtHandle,
};
use crate::error::{diagnostics, OdbcError, Result};
use crate::observability::metrics::{Gauge, GaugeGuard};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

static DRIVER_MUTEX: Mutex<()> = Mutex::new(());

pub struct DriverManager {
    driver: Arc<dyn Driver>,
}

pub type SharedDriverManager = Arc<DriverManager>;

impl DriverManager {
    pub fn new(driver: Arc<dyn Driver>) -> Self {
        Self { driver }
    }

    /// Takes the process-wide driver lock.
    pub fn lock(&self) -> Result<DriverGuard<'_>> {
        let guard = DRIVER_MUTEX
            .lock()
            .map_err(|_| OdbcError::InternalError("Failed to lock driver".to_string()))?;
        Ok(DriverGuard {
            driver: self.driver.as_ref(),
            _guard: guard,
        })
    }

    /// The driver, for calls that run without the global lock.
    pub fn driver(&self) -> &dyn Driver {
        self.driver.as_ref()
    }

    pub fn translate(&self, handle: HandleRef, fallback: &str) -> OdbcError {
        diagnostics::translate(self.driver.as_ref(), handle, fallback)
    }
}

pub struct DriverGuard<'a> {
    driver: &'a dyn Driver,
    _guard: MutexGuard<'static, ()>,
}

impl DriverGuard<'_> {
    pub fn alloc_env(&self) -> DriverResult<EnvHandle> {
        self.driver.alloc_env()
    }

    pub fn free_env(&self, env: EnvHandle) -> DriverResult<()> {
        self.driver.free_env(env)
    }

    pub fn alloc_connection(&self, env: EnvHandle) -> DriverResult<DbcHandle> {
        self.driver.alloc_connection(env)
    }

    pub fn free_connection(&self, dbc: DbcHandle) -> DriverResult<()> {
        self.driver.free_connection(dbc)
    }

    pub fn set_connect_attr(&self, dbc: DbcHandle, attr: ConnectAttr) -> DriverResult<()> {
        self.driver.set_connect_attr(dbc, attr)
    }

    pub fn driver_connect(&self, dbc: DbcHandle, connection_string: &str) -> DriverResult<()> {
        self.driver.driver_connect(dbc, connection_string)
    }

    pub fn disconnect(&self, dbc: DbcHandle) -> DriverResult<()> {
        self.driver.disconnect(dbc)
    }

    pub fn supports_function(&self, dbc: DbcHandle, function: FunctionId) -> DriverResult<bool> {
        self.driver.supports_function(dbc, function)
    }

    pub fn alloc_statement(&self, dbc: DbcHandle) -> DriverResult<StmtHandle> {
        self.driver.alloc_statement(dbc)
    }

    pub fn free_statement(&self, stmt: StmtHandle) -> DriverResult<()> {
        self.driver.free_statement(stmt)
    }
}

/// Tracks whether the statements allocated on one connection handle still
/// exist in the driver. Disconnecting or freeing the connection releases
/// them all, so it is cleared under the driver lock right before either.
#[derive(Clone, Debug)]
pub struct StatementScope(Arc<AtomicBool>);

impl StatementScope {
    pub fn new() -> Self {
        Self(Arc::new(AtomicBool::new(true)))
    }

    pub fn is_open(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }

    pub fn release(&self, _guard: &DriverGuard<'_>) {
        self.0.store(false, Ordering::SeqCst);
    }
}

impl Default for StatementScope {
    fn default() -> Self {
        Self::new()
    }
}

/// A statement handle that is released exactly once: by [`free`](Self::free),
/// on drop, or implicitly with its connection.
pub struct OwnedStatement {
    manager: SharedDriverManager,
    handle: StmtHandle,
    scope: StatementScope,
    freed: AtomicBool,
    _live: GaugeGuard,
}

impl OwnedStatement {
    pub fn alloc(
        manager: &SharedDriverManager,
        dbc: DbcHandle,
        scope: &StatementScope,
    ) -> Result<Arc<Self>> {
        let allocated = manager.lock()?.alloc_statement(dbc);
        let handle = allocated.map_err(|_| {
            manager.translate(HandleRef::Dbc(dbc), "[odbc_async_engine] SQLAllocHandle failed")
        })?;
        Ok(Arc::new(Self {
            manager: Arc::clone(manager),
            handle,
            scope: scope.clone(),
            freed: AtomicBool::new(false),
            _live: GaugeGuard::acquire(Gauge::Statements),
        }))
    }

    pub fn handle(&self) -> StmtHandle {
        self.handle
    }

    pub fn manager(&self) -> &SharedDriverManager {
        &self.manager
    }

    /// True once the handle is gone from the driver, freed here or released
    /// along with its connection.
    pub fn is_freed(&self) -> bool {
        self.freed.load(Ordering::SeqCst) || !self.scope.is_open()
    }

    /// Frees the handle under the driver lock. Later calls are no-ops, and so
    /// is a call after the connection went away.
    pub fn free(&self) -> Result<()> {
        if self.freed.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        let guard = self.manager.lock()?;
        if !self.scope.is_open() {
            log::debug!("Statement {:?} already released with its connection", self.handle);
            return Ok(());
        }
        let released = guard.free_statement(self.handle);
        drop(guard);
        released.map_err(|_| {
            self.manager.translate(
                HandleRef::Stmt(self.handle),
                "[odbc_async_engine] SQLFreeHandle failed",
            )
        })
    }
}

impl Drop for OwnedStatement {
    fn drop(&mut self) {
        if let Err(e) = self.free() {
            log::warn!("Failed to free statement {:?}: {}", self.handle, e);
        }
    }
}
