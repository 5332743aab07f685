//! A single physical database connection.
//!
//! Every operation exists in two forms. The `_sync` form runs on the calling
//! thread and returns its outcome. The other form validates its input on the
//! calling thread, queues the blocking part on this connection's lane and
//! returns; the callback later runs on the event-loop thread with the same
//! outcome the `_sync` form would have returned. Operations issued on one
//! connection (including its statements and results) complete in the order
//! they were issued.

use super::catalog::{self, ColumnsRequest, TablesRequest};
use super::environment::Environment;
use super::query::{self, QueryFailure, QueryOutcome, QueryRequest};
use super::result::OdbcResult;
use super::statement::Statement;
use super::transaction::{IsolationLevel, Transaction};
use crate::config::ConnectionOptions;
use crate::dispatch::{self, KeepAlive, SerialQueue};
use crate::driver::{CompletionType, ConnectAttr, DbcHandle, FunctionId, HandleRef};
use crate::error::{OdbcError, Result};
use crate::handles::{DriverGuard, OwnedStatement, SharedDriverManager, StatementScope};
use crate::observability::{global_metrics, StructuredLogger};
use log::Level;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use zeroize::Zeroizing;

#[derive(Clone)]
pub struct Connection {
    inner: Arc<ConnectionInner>,
}

pub(crate) struct ConnectionInner {
    env: Environment,
    dbc: Mutex<Option<DbcHandle>>,
    connected: AtomicBool,
    connect_timeout: AtomicU32,
    login_timeout: AtomicU32,
    can_have_more_results: AtomicBool,
    keepalive: Mutex<Option<KeepAlive>>,
    queue: SerialQueue,
    in_flight: AtomicUsize,
    open_statements: AtomicUsize,
    statements: StatementScope,
    logger: StructuredLogger,
}

impl Connection {
    /// Wraps a connection handle already allocated on `env`'s driver.
    pub fn from_handles(env: Environment, dbc: DbcHandle) -> Self {
        let ConnectionOptions {
            connect_timeout_secs,
            login_timeout_secs,
        } = env.config().connection;
        Self {
            inner: Arc::new(ConnectionInner {
                env,
                dbc: Mutex::new(Some(dbc)),
                connected: AtomicBool::new(false),
                connect_timeout: AtomicU32::new(connect_timeout_secs),
                login_timeout: AtomicU32::new(login_timeout_secs),
                can_have_more_results: AtomicBool::new(false),
                keepalive: Mutex::new(None),
                queue: SerialQueue::new(),
                in_flight: AtomicUsize::new(0),
                open_statements: AtomicUsize::new(0),
                statements: StatementScope::new(),
                logger: StructuredLogger::default(),
            }),
        }
    }

    pub fn environment(&self) -> &Environment {
        &self.inner.env
    }

    pub fn connected(&self) -> bool {
        self.inner.connected.load(Ordering::SeqCst)
    }

    pub fn connect_timeout(&self) -> u32 {
        self.inner.connect_timeout.load(Ordering::SeqCst)
    }

    /// Takes effect at the next open.
    pub fn set_connect_timeout(&self, secs: u32) {
        self.inner.connect_timeout.store(secs, Ordering::SeqCst);
    }

    pub fn login_timeout(&self) -> u32 {
        self.inner.login_timeout.load(Ordering::SeqCst)
    }

    /// Takes effect at the next open.
    pub fn set_login_timeout(&self, secs: u32) {
        self.inner.login_timeout.store(secs, Ordering::SeqCst);
    }

    /// Whether the driver reported `SQLMoreResults` support at open.
    pub fn can_have_more_results(&self) -> bool {
        self.inner.can_have_more_results.load(Ordering::SeqCst)
    }

    /// Async operations submitted on this connection whose completion has
    /// not run yet.
    pub fn in_flight(&self) -> usize {
        self.inner.in_flight.load(Ordering::SeqCst)
    }

    pub fn open_statements(&self) -> usize {
        self.inner.open_statements.load(Ordering::SeqCst)
    }

    pub fn handle(&self) -> Option<DbcHandle> {
        self.inner.dbc.lock().ok().and_then(|dbc| *dbc)
    }

    // -- open / close -----------------------------------------------------

    pub fn open_sync(&self, connection_string: &str) -> Result<()> {
        let connection_string = validate_connection_string(connection_string)?;
        let opened = self.inner.open_blocking(&connection_string);
        self.inner.after_open(opened)
    }

    pub fn open<C>(&self, connection_string: &str, callback: C) -> Result<()>
    where
        C: FnOnce(Result<()>) + Send + 'static,
    {
        let connection_string = validate_connection_string(connection_string)?;
        self.inner.dispatch(
            Arc::clone(&self.inner),
            connection_string,
            |conn, connection_string| conn.open_blocking(connection_string),
            |conn, opened| conn.after_open(opened),
            callback,
        )
    }

    /// Disconnects and frees the connection handle. Calling it again is a
    /// no-op.
    pub fn close_sync(&self) -> Result<()> {
        let closed = self.inner.close_blocking();
        self.inner.after_close();
        closed
    }

    pub fn close<C>(&self, callback: C) -> Result<()>
    where
        C: FnOnce(Result<()>) + Send + 'static,
    {
        self.inner.dispatch(
            Arc::clone(&self.inner),
            (),
            |conn, _| conn.close_blocking(),
            |conn, closed| {
                conn.after_close();
                closed
            },
            callback,
        )
    }

    // -- statements and queries -------------------------------------------

    pub fn create_statement_sync(&self) -> Result<Statement> {
        let owned = self.inner.alloc_statement()?;
        Ok(Statement::new(self.clone(), owned))
    }

    pub fn create_statement<C>(&self, callback: C) -> Result<()>
    where
        C: FnOnce(Result<Statement>) + Send + 'static,
    {
        let conn = self.clone();
        self.inner.dispatch(
            Arc::clone(&self.inner),
            (),
            |inner, _| inner.alloc_statement(),
            move |_, owned| owned.map(|owned| Statement::new(conn, owned)),
            callback,
        )
    }

    pub fn query_sync(
        &self,
        request: QueryRequest,
    ) -> std::result::Result<QueryOutcome, QueryFailure> {
        let mut payload = request.into_payload();
        let executed = query::execute(&self.inner, &mut payload);
        query::settle(self, &payload.sql, executed)
    }

    pub fn query<C>(&self, request: QueryRequest, callback: C) -> Result<()>
    where
        C: FnOnce(std::result::Result<QueryOutcome, QueryFailure>) + Send + 'static,
    {
        let conn = self.clone();
        let sql = request.sql.clone();
        self.inner.dispatch(
            Arc::clone(&self.inner),
            request.into_payload(),
            query::execute,
            move |_, executed| query::settle(&conn, &sql, executed),
            callback,
        )
    }

    pub fn tables_sync(
        &self,
        request: TablesRequest,
    ) -> std::result::Result<OdbcResult, QueryFailure> {
        let executed = catalog::tables(&self.inner, &request);
        catalog::settle(self, executed)
    }

    pub fn tables<C>(&self, request: TablesRequest, callback: C) -> Result<()>
    where
        C: FnOnce(std::result::Result<OdbcResult, QueryFailure>) + Send + 'static,
    {
        let conn = self.clone();
        self.inner.dispatch(
            Arc::clone(&self.inner),
            request,
            |inner, request| catalog::tables(inner, request),
            move |_, executed| catalog::settle(&conn, executed),
            callback,
        )
    }

    pub fn columns_sync(
        &self,
        request: ColumnsRequest,
    ) -> std::result::Result<OdbcResult, QueryFailure> {
        let executed = catalog::columns(&self.inner, &request);
        catalog::settle(self, executed)
    }

    pub fn columns<C>(&self, request: ColumnsRequest, callback: C) -> Result<()>
    where
        C: FnOnce(std::result::Result<OdbcResult, QueryFailure>) + Send + 'static,
    {
        let conn = self.clone();
        self.inner.dispatch(
            Arc::clone(&self.inner),
            request,
            |inner, request| catalog::columns(inner, request),
            move |_, executed| catalog::settle(&conn, executed),
            callback,
        )
    }

    // -- transactions -----------------------------------------------------

    /// Turns autocommit off.
    pub fn begin_transaction_sync(&self) -> Result<()> {
        self.inner.begin_transaction_blocking(None)
    }

    /// Sets the isolation level, then turns autocommit off.
    pub fn begin_transaction_with_sync(&self, isolation: IsolationLevel) -> Result<()> {
        self.inner.begin_transaction_blocking(Some(isolation))
    }

    pub fn begin_transaction<C>(&self, callback: C) -> Result<()>
    where
        C: FnOnce(Result<()>) + Send + 'static,
    {
        self.begin_transaction_inner(None, callback)
    }

    pub fn begin_transaction_with<C>(&self, isolation: IsolationLevel, callback: C) -> Result<()>
    where
        C: FnOnce(Result<()>) + Send + 'static,
    {
        self.begin_transaction_inner(Some(isolation), callback)
    }

    fn begin_transaction_inner<C>(&self, isolation: Option<IsolationLevel>, callback: C) -> Result<()>
    where
        C: FnOnce(Result<()>) + Send + 'static,
    {
        self.inner.dispatch(
            Arc::clone(&self.inner),
            isolation,
            |conn, isolation| conn.begin_transaction_blocking(*isolation),
            |_, begun| begun,
            callback,
        )
    }

    /// Commits (or rolls back), then turns autocommit back on whatever the
    /// outcome. A completion failure is reported in preference to a failure
    /// to restore autocommit.
    pub fn end_transaction_sync(&self, rollback: bool) -> Result<()> {
        self.inner.end_transaction_blocking(rollback)
    }

    pub fn end_transaction<C>(&self, rollback: bool, callback: C) -> Result<()>
    where
        C: FnOnce(Result<()>) + Send + 'static,
    {
        self.inner.dispatch(
            Arc::clone(&self.inner),
            rollback,
            |conn, rollback| conn.end_transaction_blocking(*rollback),
            |_, ended| ended,
            callback,
        )
    }

    /// Runs `f` in a transaction, committing on `Ok` and rolling back on
    /// `Err`.
    pub fn with_transaction_sync<F, T>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&Transaction<'_>) -> Result<T>,
    {
        Transaction::execute(self, None, f)
    }

    pub(crate) fn inner(&self) -> &Arc<ConnectionInner> {
        &self.inner
    }
}

fn validate_connection_string(connection_string: &str) -> Result<Zeroizing<String>> {
    if connection_string.trim().is_empty() {
        return Err(OdbcError::EmptyConnectionString);
    }
    Ok(Zeroizing::new(connection_string.to_string()))
}

impl ConnectionInner {
    pub(crate) fn manager(&self) -> &SharedDriverManager {
        self.env.manager()
    }

    pub(crate) fn dbc(&self) -> Result<DbcHandle> {
        self.dbc
            .lock()
            .map_err(|_| OdbcError::InternalError("Failed to lock connection handle".to_string()))?
            .ok_or_else(|| OdbcError::InvalidHandle("connection is closed".to_string()))
    }

    pub(crate) fn log_queries(&self) -> bool {
        self.env.config().log_queries
    }

    pub(crate) fn logger(&self) -> &StructuredLogger {
        &self.logger
    }

    pub(crate) fn statement_opened(&self) {
        self.open_statements.fetch_add(1, Ordering::SeqCst);
    }

    pub(crate) fn statement_closed(&self) {
        self.open_statements.fetch_sub(1, Ordering::SeqCst);
    }

    /// Queues work on this connection's lane, counting it as in flight until
    /// its completion has settled.
    pub(crate) fn dispatch<H, P, T, R, W, S, C>(
        self: &Arc<Self>,
        handle: Arc<H>,
        payload: P,
        work: W,
        settle: S,
        callback: C,
    ) -> Result<()>
    where
        H: Send + Sync + 'static,
        P: Send + 'static,
        T: Send + 'static,
        W: FnOnce(&H, &mut P) -> Result<T> + Send + 'static,
        S: FnOnce(&H, Result<T>) -> R + Send + 'static,
        C: FnOnce(R) + Send + 'static,
    {
        let tracker = InFlight::enter(self);
        dispatch::submit(
            self.env.dispatcher(),
            &self.queue,
            handle,
            payload,
            work,
            move |h, outcome| {
                drop(tracker);
                settle(h, outcome)
            },
            callback,
        )
    }

    fn open_blocking(&self, connection_string: &str) -> Result<()> {
        let dbc = self.dbc()?;
        let manager = self.manager();
        let guard = manager.lock()?;

        let connect_timeout = self.connect_timeout.load(Ordering::SeqCst);
        let login_timeout = self.login_timeout.load(Ordering::SeqCst);
        self.apply_timeout(&guard, dbc, ConnectAttr::ConnectionTimeout(connect_timeout));
        self.apply_timeout(&guard, dbc, ConnectAttr::LoginTimeout(login_timeout));

        if guard.driver_connect(dbc, connection_string).is_err() {
            let err = manager.translate(HandleRef::Dbc(dbc), "[odbc_async_engine] Error connecting");
            self.logger
                .log_connection(Level::Warn, connection_string, "open failed");
            return Err(err);
        }

        // SQLGetFunctions needs a fully connected handle; a throwaway
        // statement makes sure the driver has finished connecting.
        let more_results = match guard.alloc_statement(dbc) {
            Ok(scratch) => {
                let supported = guard
                    .supports_function(dbc, FunctionId::MoreResults)
                    .unwrap_or(false);
                if guard.free_statement(scratch).is_err() {
                    log::warn!("Failed to free scratch statement on {:?}", dbc);
                }
                supported
            }
            Err(_) => false,
        };
        self.can_have_more_results
            .store(more_results, Ordering::SeqCst);
        self.logger
            .log_connection(Level::Info, connection_string, "open");
        Ok(())
    }

    fn apply_timeout(&self, guard: &DriverGuard<'_>, dbc: DbcHandle, attr: ConnectAttr) {
        let secs = match attr {
            ConnectAttr::ConnectionTimeout(secs) | ConnectAttr::LoginTimeout(secs) => secs,
            _ => return,
        };
        if secs == 0 {
            return;
        }
        if guard.set_connect_attr(dbc, attr).is_err() {
            log::warn!(
                "Ignoring {:?} on {:?}: {}",
                attr,
                dbc,
                self.manager().translate(HandleRef::Dbc(dbc), "SQLSetConnectAttr failed")
            );
        }
    }

    fn after_open(&self, opened: Result<()>) -> Result<()> {
        global_metrics().record_open(opened.is_ok());
        opened?;
        self.connected.store(true, Ordering::SeqCst);
        if let Ok(mut keepalive) = self.keepalive.lock() {
            if keepalive.is_none() {
                *keepalive = Some(self.env.dispatcher().keep_alive());
            }
        }
        Ok(())
    }

    fn close_blocking(&self) -> Result<()> {
        let open = self.open_statements.load(Ordering::SeqCst);
        if open > 0 {
            log::warn!("Closing connection with {} statement(s) still open", open);
        }

        let manager = self.manager();
        let guard = manager.lock()?;
        let dbc = match self
            .dbc
            .lock()
            .map_err(|_| OdbcError::InternalError("Failed to lock connection handle".to_string()))?
            .take()
        {
            Some(dbc) => dbc,
            None => return Ok(()),
        };
        self.statements.release(&guard);

        let mut first_error = None;
        if self.connected.swap(false, Ordering::SeqCst) && guard.disconnect(dbc).is_err() {
            first_error = Some(
                manager.translate(HandleRef::Dbc(dbc), "[odbc_async_engine] SQLDisconnect failed"),
            );
        }
        if guard.free_connection(dbc).is_err() {
            let err =
                manager.translate(HandleRef::Dbc(dbc), "[odbc_async_engine] SQLFreeHandle failed");
            first_error.get_or_insert(err);
        }
        global_metrics().record_close();
        match first_error {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    fn after_close(&self) {
        self.connected.store(false, Ordering::SeqCst);
        if let Ok(mut keepalive) = self.keepalive.lock() {
            keepalive.take();
        }
    }

    pub(crate) fn alloc_statement(&self) -> Result<Arc<OwnedStatement>> {
        OwnedStatement::alloc(self.manager(), self.dbc()?, &self.statements)
    }

    fn begin_transaction_blocking(&self, isolation: Option<IsolationLevel>) -> Result<()> {
        let dbc = self.dbc()?;
        let manager = self.manager();
        let guard = manager.lock()?;
        if let Some(level) = isolation {
            guard
                .set_connect_attr(dbc, ConnectAttr::TxnIsolation(level))
                .map_err(|_| {
                    manager.translate(
                        HandleRef::Dbc(dbc),
                        "[odbc_async_engine] Error setting isolation level",
                    )
                })?;
        }
        guard
            .set_connect_attr(dbc, ConnectAttr::AutoCommit(false))
            .map_err(|_| {
                manager.translate(
                    HandleRef::Dbc(dbc),
                    "[odbc_async_engine] Error disabling autocommit",
                )
            })
    }

    fn end_transaction_blocking(&self, rollback: bool) -> Result<()> {
        let dbc = self.dbc()?;
        let manager = self.manager();
        let completion = if rollback {
            CompletionType::Rollback
        } else {
            CompletionType::Commit
        };

        let completed = manager
            .driver()
            .end_tran(dbc, completion)
            .map_err(|_| {
                manager.translate(HandleRef::Dbc(dbc), "[odbc_async_engine] Error ending transaction")
            });
        let restored = manager
            .lock()?
            .set_connect_attr(dbc, ConnectAttr::AutoCommit(true))
            .map_err(|_| {
                manager.translate(HandleRef::Dbc(dbc), "[odbc_async_engine] Error enabling autocommit")
            });

        if let (Err(e), Err(reset)) = (&completed, &restored) {
            log::warn!(
                "{:?} failed ({}) and autocommit reset also failed: {}",
                completion,
                e,
                reset
            );
        }
        completed.and(restored)
    }
}

/// Counts one task in a connection's `in_flight` until dropped.
struct InFlight(Arc<ConnectionInner>);

impl InFlight {
    fn enter(conn: &Arc<ConnectionInner>) -> Self {
        conn.in_flight.fetch_add(1, Ordering::SeqCst);
        Self(Arc::clone(conn))
    }
}

impl Drop for InFlight {
    fn drop(&mut self) {
        self.0.in_flight.fetch_sub(1, Ordering::SeqCst);
    }
}

impl Drop for ConnectionInner {
    fn drop(&mut self) {
        let dbc = match self.dbc.get_mut() {
            Ok(dbc) => dbc.take(),
            Err(poisoned) => poisoned.into_inner().take(),
        };
        let Some(dbc) = dbc else { return };
        let manager = self.env.manager();
        let released = manager.lock().map(|guard| {
            self.statements.release(&guard);
            if self.connected.load(Ordering::SeqCst) && guard.disconnect(dbc).is_err() {
                log::warn!("Failed to disconnect {:?} on drop", dbc);
            }
            guard.free_connection(dbc)
        });
        match released {
            Ok(Ok(())) => log::debug!("Released connection {:?} on drop", dbc),
            Ok(Err(_)) => log::warn!(
                "Failed to free connection {:?}: {}",
                dbc,
                manager.translate(HandleRef::Dbc(dbc), "SQLFreeHandle failed")
            ),
            Err(e) => log::warn!("Failed to free connection {:?}: {}", dbc, e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dispatch::EventLoop;
    use crate::driver::memory::MemoryDriver;
    use crate::error::DiagnosticRecord;

    fn setup() -> (Arc<MemoryDriver>, EventLoop, Connection) {
        let driver = Arc::new(MemoryDriver::new());
        let event_loop = EventLoop::new();
        let env = Environment::new(driver.clone(), event_loop.dispatcher()).unwrap();
        let conn = env.create_connection_sync().unwrap();
        (driver, event_loop, conn)
    }

    #[test]
    fn test_open_and_close_toggle_keepalive_once() {
        let (driver, event_loop, conn) = setup();
        conn.open_sync("DSN=memory").unwrap();
        assert!(conn.connected());
        assert_eq!(event_loop.active_handles(), 1);
        assert_eq!(driver.connected_count(), 1);

        conn.close_sync().unwrap();
        conn.close_sync().unwrap();
        assert!(!conn.connected());
        assert_eq!(event_loop.active_handles(), 0);
        assert_eq!(driver.live_connections(), 0);
        assert_eq!(driver.invalid_handle_calls(), 0);
    }

    #[test]
    fn test_open_empty_string_fails_before_dispatch() {
        let (_driver, event_loop, conn) = setup();
        let err = conn.open("  ", |_| panic!("callback must not run")).unwrap_err();
        assert!(matches!(err, OdbcError::EmptyConnectionString));
        assert_eq!(event_loop.pending_tasks(), 0);
    }

    #[test]
    fn test_open_failure_translates_connection_diagnostics() {
        let (driver, event_loop, conn) = setup();
        driver.fail_connect(vec![
            DiagnosticRecord::new("28000", 18456, "Login failed"),
            DiagnosticRecord::new("01S00", 0, "Invalid connection string attribute"),
        ]);
        let err = conn.open_sync("DSN=memory;UID=sa;PWD=secret").unwrap_err();
        assert_eq!(err.sqlstate(), "28000");
        assert_eq!(err.records().len(), 2);
        assert!(!conn.connected());
        assert_eq!(event_loop.active_handles(), 0);
    }

    #[test]
    fn test_timeouts_applied_only_when_positive() {
        let (driver, _loop, conn) = setup();
        conn.set_connect_timeout(0);
        conn.set_login_timeout(7);
        conn.open_sync("DSN=memory").unwrap();
        let dbc = conn.handle().unwrap();
        assert_eq!(driver.timeouts(dbc), Some((0, 7)));
    }

    #[test]
    fn test_rejected_timeouts_do_not_fail_open() {
        let (driver, _loop, conn) = setup();
        driver.reject_timeouts();
        conn.set_connect_timeout(3);
        conn.open_sync("DSN=memory").unwrap();
        assert!(conn.connected());
    }

    #[test]
    fn test_more_results_support_detected() {
        let (driver, _loop, conn) = setup();
        driver.set_supports_more_results(true);
        conn.open_sync("DSN=memory").unwrap();
        assert!(conn.can_have_more_results());
        assert_eq!(driver.live_statements(), 0);
    }

    #[test]
    fn test_reopen_after_close_is_invalid_handle() {
        let (_driver, _loop, conn) = setup();
        conn.open_sync("DSN=memory").unwrap();
        conn.close_sync().unwrap();
        let err = conn.open_sync("DSN=memory").unwrap_err();
        assert!(matches!(err, OdbcError::InvalidHandle(_)));
    }

    #[test]
    fn test_async_open_registers_keepalive_on_loop_thread() {
        let (_driver, mut event_loop, conn) = setup();
        let done = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&done);
        conn.open("DSN=memory", move |opened| {
            opened.unwrap();
            flag.store(true, Ordering::SeqCst);
        })
        .unwrap();
        assert_eq!(conn.in_flight(), 1);
        assert_eq!(event_loop.run(), 1);
        assert!(done.load(Ordering::SeqCst));
        assert_eq!(conn.in_flight(), 0);
        assert_eq!(event_loop.active_handles(), 1);
    }

    #[test]
    fn test_end_transaction_restores_autocommit_after_failed_commit() {
        let (driver, _loop, conn) = setup();
        conn.open_sync("DSN=memory").unwrap();
        let dbc = conn.handle().unwrap();

        conn.begin_transaction_sync().unwrap();
        assert_eq!(driver.autocommit(dbc), Some(false));

        driver.fail_end_tran(vec![DiagnosticRecord::new("40001", 1205, "Deadlock victim")]);
        let err = conn.end_transaction_sync(false).unwrap_err();
        assert_eq!(err.sqlstate(), "40001");
        assert_eq!(driver.autocommit(dbc), Some(true));
    }

    #[test]
    fn test_completion_error_wins_over_reset_error() {
        let (driver, _loop, conn) = setup();
        conn.open_sync("DSN=memory").unwrap();
        conn.begin_transaction_sync().unwrap();
        driver.fail_end_tran(vec![DiagnosticRecord::new("40001", 1, "commit failed")]);
        driver.fail_autocommit_reset(vec![DiagnosticRecord::new("HY000", 2, "reset failed")]);
        let err = conn.end_transaction_sync(true).unwrap_err();
        assert_eq!(err.sqlstate(), "40001");
    }

    #[test]
    fn test_reset_error_surfaces_when_completion_succeeds() {
        let (driver, _loop, conn) = setup();
        conn.open_sync("DSN=memory").unwrap();
        conn.begin_transaction_sync().unwrap();
        driver.fail_autocommit_reset(vec![DiagnosticRecord::new("HY000", 2, "reset failed")]);
        let err = conn.end_transaction_sync(false).unwrap_err();
        assert_eq!(err.native_code(), 2);
    }

    #[test]
    fn test_begin_with_isolation_sets_level_first() {
        let (driver, _loop, conn) = setup();
        conn.open_sync("DSN=memory").unwrap();
        let dbc = conn.handle().unwrap();
        conn.begin_transaction_with_sync(IsolationLevel::Serializable)
            .unwrap();
        assert_eq!(driver.isolation(dbc), Some(IsolationLevel::Serializable));
        assert_eq!(driver.autocommit(dbc), Some(false));
        conn.end_transaction_sync(true).unwrap();
        assert_eq!(
            driver.end_tran_log(),
            vec![(dbc, CompletionType::Rollback)]
        );
    }

    #[test]
    fn test_with_transaction_commits_or_rolls_back() {
        let (driver, _loop, conn) = setup();
        conn.open_sync("DSN=memory").unwrap();
        let dbc = conn.handle().unwrap();

        let value = conn.with_transaction_sync(|_| Ok(5)).unwrap();
        assert_eq!(value, 5);
        let failed: Result<()> =
            conn.with_transaction_sync(|_| Err(OdbcError::ValidationError("no".to_string())));
        assert!(failed.is_err());

        assert_eq!(
            driver.end_tran_log(),
            vec![(dbc, CompletionType::Commit), (dbc, CompletionType::Rollback)]
        );
        assert_eq!(driver.autocommit(dbc), Some(true));
    }

    #[test]
    fn test_dropped_transaction_rolls_back() {
        let (driver, _loop, conn) = setup();
        conn.open_sync("DSN=memory").unwrap();
        let dbc = conn.handle().unwrap();
        {
            let txn = Transaction::begin(&conn, None).unwrap();
            assert!(txn.is_active());
        }
        assert_eq!(driver.end_tran_log(), vec![(dbc, CompletionType::Rollback)]);
    }

    #[test]
    fn test_close_with_open_statement_keeps_caller_contract() {
        let (driver, _loop, conn) = setup();
        conn.open_sync("DSN=memory").unwrap();
        let stmt = conn.create_statement_sync().unwrap();
        assert_eq!(conn.open_statements(), 1);
        conn.close_sync().unwrap();
        assert!(!conn.connected());
        drop(stmt);
        assert_eq!(conn.open_statements(), 0);
        assert_eq!(driver.live_statements(), 0);
        assert_eq!(driver.invalid_handle_calls(), 0);
    }

    #[test]
    fn test_handles_outliving_close_are_not_released_twice() {
        use crate::engine::QueryRequest;
        use crate::protocol::ParamValue;

        let (driver, _loop, conn) = setup();
        conn.open_sync("DSN=memory").unwrap();

        let bound = conn.create_statement_sync().unwrap();
        bound.prepare_sync("SELECT ?").unwrap();
        bound.bind_sync(&[ParamValue::Integer(1)]).unwrap();

        let executed = conn.create_statement_sync().unwrap();
        executed.prepare_sync("SELECT ?").unwrap();
        executed.bind_sync(&[ParamValue::Integer(2)]).unwrap();
        let shared_result = executed.execute_sync().unwrap();

        let owned_result = conn
            .query_sync(QueryRequest::new("SELECT ?").with_params(vec![ParamValue::Integer(3)]))
            .unwrap()
            .into_result()
            .unwrap();
        assert_eq!(driver.live_statements(), 3);

        conn.close_sync().unwrap();
        assert_eq!(driver.live_statements(), 0);

        shared_result.close_sync().unwrap();
        drop(shared_result);
        drop(owned_result);
        drop(executed);
        drop(bound);

        assert_eq!(conn.open_statements(), 0);
        assert_eq!(driver.invalid_handle_calls(), 0);
    }

    #[test]
    fn test_dropping_open_connection_releases_handle() {
        let (driver, event_loop, conn) = setup();
        conn.open_sync("DSN=memory").unwrap();
        drop(conn);
        assert_eq!(driver.live_connections(), 0);
        assert_eq!(event_loop.active_handles(), 0);
    }
}
