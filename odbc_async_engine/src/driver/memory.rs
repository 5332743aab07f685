//! An in-process [`Driver`] backed by scripted result sets.
//!
//! `MemoryDriver` follows CLI handle rules closely enough to exercise the
//! engine without a driver manager: handles must be allocated before use,
//! double frees report `SQL_INVALID_HANDLE`, diagnostics are replaced on
//! every call against a handle, and a disconnect drops the connection's
//! statements. Responses are scripted per SQL text; faults can be injected
//! at the connect, transaction and allocation steps.
//!
//! It also counts what a test needs to see from outside: live handles,
//! invalid-handle calls, and overlapping handle mutations (calls the engine
//! is supposed to serialize that were observed running at the same time).

use super::{
    ColumnFilter, CompletionType, ConnectAttr, DbcHandle, Driver, DriverResult, EnvHandle,
    FunctionId, HandleRef, SqlReturn, StmtHandle, TableFilter,
};
use crate::engine::transaction::IsolationLevel;
use crate::error::DiagnosticRecord;
use crate::protocol::{sql_type, ColumnInfo, Nullability, Parameter, Value};
use std::collections::{BTreeMap, HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

/// One scripted result set.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ResultSet {
    pub columns: Vec<ColumnInfo>,
    pub rows: Vec<Vec<Value>>,
    pub row_count: i64,
}

impl ResultSet {
    /// A result set with `VARCHAR` columns named `names`.
    pub fn new(names: &[&str]) -> Self {
        Self {
            columns: names
                .iter()
                .map(|name| ColumnInfo::new(*name, sql_type::VARCHAR))
                .collect(),
            ..Self::default()
        }
    }

    pub fn with_columns(columns: Vec<ColumnInfo>) -> Self {
        Self {
            columns,
            ..Self::default()
        }
    }

    /// A statement that returns no rows and affects `count` of them.
    pub fn affected(count: i64) -> Self {
        Self {
            row_count: count,
            ..Self::default()
        }
    }

    pub fn row(mut self, values: Vec<Value>) -> Self {
        self.rows.push(values);
        self
    }
}

#[derive(Debug, Clone)]
struct TableDef {
    catalog: String,
    schema: String,
    name: String,
    table_type: String,
    columns: Vec<ColumnInfo>,
}

#[derive(Debug, Default)]
struct Faults {
    connect: Option<Vec<DiagnosticRecord>>,
    end_tran: Option<Vec<DiagnosticRecord>>,
    autocommit_reset: Option<Vec<DiagnosticRecord>>,
    alloc_statement: Option<Vec<DiagnosticRecord>>,
    bind: Option<Vec<DiagnosticRecord>>,
    timeouts: Option<Vec<DiagnosticRecord>>,
}

#[derive(Debug)]
struct DbcState {
    env: u64,
    connected: bool,
    autocommit: bool,
    connection_timeout: u32,
    login_timeout: u32,
    isolation: Option<IsolationLevel>,
}

#[derive(Debug)]
struct Cursor {
    set: ResultSet,
    position: Option<usize>,
}

#[derive(Debug, Default)]
struct StmtState {
    dbc: u64,
    params: BTreeMap<u16, Value>,
    prepared: Option<String>,
    pending: VecDeque<ResultSet>,
    cursor: Option<Cursor>,
    row_count: i64,
}

#[derive(Debug)]
struct State {
    next_id: u64,
    envs: HashSet<u64>,
    dbcs: HashMap<u64, DbcState>,
    stmts: HashMap<u64, StmtState>,
    diags: HashMap<u64, Vec<DiagnosticRecord>>,
    scripts: HashMap<String, Vec<ResultSet>>,
    failures: HashMap<String, Vec<DiagnosticRecord>>,
    tables: Vec<TableDef>,
    faults: Faults,
    supports_more_results: bool,
    exec_log: HashMap<u64, Vec<String>>,
    end_tran_log: Vec<(DbcHandle, CompletionType)>,
    invalid_handle_calls: usize,
}

impl Default for State {
    fn default() -> Self {
        Self {
            next_id: 0x1000,
            envs: HashSet::new(),
            dbcs: HashMap::new(),
            stmts: HashMap::new(),
            diags: HashMap::new(),
            scripts: HashMap::new(),
            failures: HashMap::new(),
            tables: Vec::new(),
            faults: Faults::default(),
            supports_more_results: true,
            exec_log: HashMap::new(),
            end_tran_log: Vec::new(),
            invalid_handle_calls: 0,
        }
    }
}

impl State {
    fn next_handle(&mut self) -> u64 {
        self.next_id += 1;
        self.next_id
    }

    fn begin(&mut self, id: u64) {
        self.diags.remove(&id);
    }

    fn fail(&mut self, id: u64, records: Vec<DiagnosticRecord>) -> SqlReturn {
        self.diags.insert(id, records);
        SqlReturn::Error
    }

    fn fail_with(&mut self, id: u64, state: &str, message: &str) -> SqlReturn {
        self.fail(id, vec![DiagnosticRecord::new(state, 0, message)])
    }

    fn invalid(&mut self) -> SqlReturn {
        self.invalid_handle_calls += 1;
        SqlReturn::InvalidHandle
    }

    fn stmt(&mut self, stmt: StmtHandle) -> DriverResult<&mut StmtState> {
        if !self.stmts.contains_key(&stmt.0) {
            return Err(self.invalid());
        }
        self.begin(stmt.0);
        self.stmts.get_mut(&stmt.0).ok_or(SqlReturn::InvalidHandle)
    }

    fn connected_dbc(&mut self, dbc: DbcHandle) -> DriverResult<&mut DbcState> {
        match self.dbcs.get(&dbc.0).map(|d| d.connected) {
            None => Err(self.invalid()),
            Some(false) => {
                self.begin(dbc.0);
                Err(self.fail_with(dbc.0, "08003", "Connection not open"))
            }
            Some(true) => {
                self.begin(dbc.0);
                self.dbcs.get_mut(&dbc.0).ok_or(SqlReturn::InvalidHandle)
            }
        }
    }
}

/// Tracks calls that must never overlap. Entering while another call is
/// still inside counts one violation.
struct MutationWatch<'a> {
    active: &'a AtomicUsize,
}

impl<'a> MutationWatch<'a> {
    fn enter(driver: &'a MemoryDriver) -> Self {
        if driver.mutating.fetch_add(1, Ordering::SeqCst) > 0 {
            driver.violations.fetch_add(1, Ordering::SeqCst);
        }
        let delay = driver.handle_delay();
        if !delay.is_zero() {
            std::thread::sleep(delay);
        }
        Self {
            active: &driver.mutating,
        }
    }
}

impl Drop for MutationWatch<'_> {
    fn drop(&mut self) {
        self.active.fetch_sub(1, Ordering::SeqCst);
    }
}

#[derive(Debug, Default)]
pub struct MemoryDriver {
    state: Mutex<State>,
    delays: Mutex<(Duration, Duration)>,
    mutating: AtomicUsize,
    violations: AtomicUsize,
}

impl MemoryDriver {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn delays(&self) -> MutexGuard<'_, (Duration, Duration)> {
        self.delays.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn handle_delay(&self) -> Duration {
        self.delays().0
    }

    fn exec_delay(&self) -> Duration {
        self.delays().1
    }

    // -- scripting --------------------------------------------------------

    /// Queues `sets` as the results of executing exactly `sql`.
    pub fn script(&self, sql: &str, sets: Vec<ResultSet>) {
        self.state().scripts.insert(sql.to_string(), sets);
    }

    /// Makes executing `sql` fail with `records`.
    pub fn fail_sql(&self, sql: &str, records: Vec<DiagnosticRecord>) {
        self.state().failures.insert(sql.to_string(), records);
    }

    pub fn add_table(
        &self,
        catalog: &str,
        schema: &str,
        name: &str,
        table_type: &str,
        columns: &[(&str, i16)],
    ) {
        self.state().tables.push(TableDef {
            catalog: catalog.to_string(),
            schema: schema.to_string(),
            name: name.to_string(),
            table_type: table_type.to_string(),
            columns: columns
                .iter()
                .map(|(column, ty)| ColumnInfo {
                    nullable: Nullability::Nullable,
                    ..ColumnInfo::new(*column, *ty)
                })
                .collect(),
        });
    }

    pub fn fail_connect(&self, records: Vec<DiagnosticRecord>) {
        self.state().faults.connect = Some(records);
    }

    pub fn fail_end_tran(&self, records: Vec<DiagnosticRecord>) {
        self.state().faults.end_tran = Some(records);
    }

    /// Fails every attempt to switch autocommit back on.
    pub fn fail_autocommit_reset(&self, records: Vec<DiagnosticRecord>) {
        self.state().faults.autocommit_reset = Some(records);
    }

    pub fn fail_alloc_statement(&self, records: Vec<DiagnosticRecord>) {
        self.state().faults.alloc_statement = Some(records);
    }

    pub fn fail_bind(&self, records: Vec<DiagnosticRecord>) {
        self.state().faults.bind = Some(records);
    }

    /// Rejects the connection and login timeout attributes.
    pub fn reject_timeouts(&self) {
        self.state().faults.timeouts = Some(vec![DiagnosticRecord::new(
            "HYC00",
            0,
            "Optional feature not implemented",
        )]);
    }

    pub fn clear_faults(&self) {
        self.state().faults = Faults::default();
    }

    pub fn set_supports_more_results(&self, supported: bool) {
        self.state().supports_more_results = supported;
    }

    /// Sleeps inside every allocate/free/attribute/connect call, widening
    /// the window in which an unserialized caller would overlap.
    pub fn set_handle_delay(&self, delay: Duration) {
        self.delays().0 = delay;
    }

    /// Sleeps before every execution, outside the driver's own lock.
    pub fn set_exec_delay(&self, delay: Duration) {
        self.delays().1 = delay;
    }

    // -- observation ------------------------------------------------------

    pub fn live_connections(&self) -> usize {
        self.state().dbcs.len()
    }

    pub fn connected_count(&self) -> usize {
        self.state().dbcs.values().filter(|d| d.connected).count()
    }

    pub fn live_statements(&self) -> usize {
        self.state().stmts.len()
    }

    pub fn invalid_handle_calls(&self) -> usize {
        self.state().invalid_handle_calls
    }

    pub fn mutation_violations(&self) -> usize {
        self.violations.load(Ordering::SeqCst)
    }

    pub fn autocommit(&self, dbc: DbcHandle) -> Option<bool> {
        self.state().dbcs.get(&dbc.0).map(|d| d.autocommit)
    }

    pub fn isolation(&self, dbc: DbcHandle) -> Option<IsolationLevel> {
        self.state().dbcs.get(&dbc.0).and_then(|d| d.isolation)
    }

    /// `(connection timeout, login timeout)` as last set on `dbc`.
    pub fn timeouts(&self, dbc: DbcHandle) -> Option<(u32, u32)> {
        self.state()
            .dbcs
            .get(&dbc.0)
            .map(|d| (d.connection_timeout, d.login_timeout))
    }

    pub fn end_tran_log(&self) -> Vec<(DbcHandle, CompletionType)> {
        self.state().end_tran_log.clone()
    }

    /// SQL executed on statements of `dbc`, in execution order.
    pub fn executed_sql(&self, dbc: DbcHandle) -> Vec<String> {
        self.state().exec_log.get(&dbc.0).cloned().unwrap_or_default()
    }

    // -- execution --------------------------------------------------------

    fn run_sql(&self, stmt: StmtHandle, sql: Option<&str>) -> DriverResult<()> {
        let delay = self.exec_delay();
        if !delay.is_zero() {
            std::thread::sleep(delay);
        }

        let mut state = self.state();
        let st = state.stmt(stmt)?;
        st.cursor = None;
        st.pending.clear();
        st.row_count = -1;
        let dbc = st.dbc;
        let params: Vec<Value> = st.params.values().cloned().collect();
        let sql = match sql.map(str::to_string).or_else(|| st.prepared.clone()) {
            Some(sql) => sql,
            None => return Err(state.fail_with(stmt.0, "HY010", "Function sequence error")),
        };
        state.exec_log.entry(dbc).or_default().push(sql.clone());

        if sql.trim().is_empty() {
            return Err(state.fail_with(stmt.0, "42000", "Syntax error or access violation"));
        }
        if let Some(records) = state.failures.get(&sql).cloned() {
            return Err(state.fail(stmt.0, records));
        }

        let scripted = state.scripts.get(&sql).cloned();
        let mut sets: VecDeque<ResultSet> = match scripted {
            Some(sets) => sets.into_iter().collect(),
            None => {
                let markers = sql.matches('?').count();
                if markers != params.len() {
                    return Err(state.fail_with(stmt.0, "07002", "COUNT field incorrect"));
                }
                let mut set = if markers > 0 && sql.trim_start().to_uppercase().starts_with("SELECT")
                {
                    let names: Vec<String> = (1..=markers).map(|i| format!("p{}", i)).collect();
                    let names: Vec<&str> = names.iter().map(String::as_str).collect();
                    ResultSet::new(&names).row(params)
                } else {
                    ResultSet::affected(0)
                };
                if !set.columns.is_empty() {
                    set.row_count = -1;
                }
                VecDeque::from([set])
            }
        };

        let st = state.stmt(stmt)?;
        if let Some(first) = sets.pop_front() {
            st.row_count = first.row_count;
            st.cursor = Some(Cursor {
                set: first,
                position: None,
            });
        }
        st.pending = sets;
        Ok(())
    }

    fn open_cursor(&self, stmt: StmtHandle, set: ResultSet) -> DriverResult<()> {
        let mut state = self.state();
        let st = state.stmt(stmt)?;
        st.pending.clear();
        st.row_count = -1;
        st.cursor = Some(Cursor {
            set,
            position: None,
        });
        Ok(())
    }
}

impl Driver for MemoryDriver {
    fn alloc_env(&self) -> DriverResult<EnvHandle> {
        let _watch = MutationWatch::enter(self);
        let mut state = self.state();
        let id = state.next_handle();
        state.envs.insert(id);
        Ok(EnvHandle(id))
    }

    fn free_env(&self, env: EnvHandle) -> DriverResult<()> {
        let _watch = MutationWatch::enter(self);
        let mut state = self.state();
        if !state.envs.contains(&env.0) {
            return Err(state.invalid());
        }
        state.begin(env.0);
        if state.dbcs.values().any(|d| d.env == env.0) {
            return Err(state.fail_with(env.0, "HY010", "Function sequence error"));
        }
        state.envs.remove(&env.0);
        Ok(())
    }

    fn alloc_connection(&self, env: EnvHandle) -> DriverResult<DbcHandle> {
        let _watch = MutationWatch::enter(self);
        let mut state = self.state();
        if !state.envs.contains(&env.0) {
            return Err(state.invalid());
        }
        state.begin(env.0);
        let id = state.next_handle();
        state.dbcs.insert(
            id,
            DbcState {
                env: env.0,
                connected: false,
                autocommit: true,
                connection_timeout: 0,
                login_timeout: 0,
                isolation: None,
            },
        );
        Ok(DbcHandle(id))
    }

    fn free_connection(&self, dbc: DbcHandle) -> DriverResult<()> {
        let _watch = MutationWatch::enter(self);
        let mut state = self.state();
        match state.dbcs.get(&dbc.0).map(|d| d.connected) {
            None => Err(state.invalid()),
            Some(true) => {
                state.begin(dbc.0);
                Err(state.fail_with(dbc.0, "HY010", "Function sequence error"))
            }
            Some(false) => {
                state.dbcs.remove(&dbc.0);
                state.diags.remove(&dbc.0);
                Ok(())
            }
        }
    }

    fn set_connect_attr(&self, dbc: DbcHandle, attr: ConnectAttr) -> DriverResult<()> {
        let _watch = MutationWatch::enter(self);
        let mut state = self.state();
        if !state.dbcs.contains_key(&dbc.0) {
            return Err(state.invalid());
        }
        state.begin(dbc.0);
        let fault = match attr {
            ConnectAttr::ConnectionTimeout(_) | ConnectAttr::LoginTimeout(_) => {
                state.faults.timeouts.clone()
            }
            ConnectAttr::AutoCommit(true) => state.faults.autocommit_reset.clone(),
            _ => None,
        };
        if let Some(records) = fault {
            return Err(state.fail(dbc.0, records));
        }
        let d = state.dbcs.get_mut(&dbc.0).ok_or(SqlReturn::InvalidHandle)?;
        match attr {
            ConnectAttr::ConnectionTimeout(secs) => d.connection_timeout = secs,
            ConnectAttr::LoginTimeout(secs) => d.login_timeout = secs,
            ConnectAttr::AutoCommit(on) => d.autocommit = on,
            ConnectAttr::TxnIsolation(level) => d.isolation = Some(level),
        }
        Ok(())
    }

    fn driver_connect(&self, dbc: DbcHandle, connection_string: &str) -> DriverResult<()> {
        let _watch = MutationWatch::enter(self);
        let mut state = self.state();
        let connected = match state.dbcs.get(&dbc.0) {
            Some(d) => d.connected,
            None => return Err(state.invalid()),
        };
        state.begin(dbc.0);
        if connected {
            return Err(state.fail_with(dbc.0, "08002", "Connection name in use"));
        }
        if connection_string.trim().is_empty() {
            return Err(state.fail_with(
                dbc.0,
                "IM002",
                "Data source name not found and no default driver specified",
            ));
        }
        if let Some(records) = state.faults.connect.clone() {
            return Err(state.fail(dbc.0, records));
        }
        if let Some(d) = state.dbcs.get_mut(&dbc.0) {
            d.connected = true;
        }
        Ok(())
    }

    fn disconnect(&self, dbc: DbcHandle) -> DriverResult<()> {
        let _watch = MutationWatch::enter(self);
        let mut state = self.state();
        state.connected_dbc(dbc)?.connected = false;
        state.stmts.retain(|_, st| st.dbc != dbc.0);
        Ok(())
    }

    fn supports_function(&self, dbc: DbcHandle, function: FunctionId) -> DriverResult<bool> {
        let mut state = self.state();
        state.connected_dbc(dbc)?;
        match function {
            FunctionId::MoreResults => Ok(state.supports_more_results),
        }
    }

    fn end_tran(&self, dbc: DbcHandle, completion: CompletionType) -> DriverResult<()> {
        let mut state = self.state();
        state.connected_dbc(dbc)?;
        if let Some(records) = state.faults.end_tran.clone() {
            return Err(state.fail(dbc.0, records));
        }
        state.end_tran_log.push((dbc, completion));
        Ok(())
    }

    fn alloc_statement(&self, dbc: DbcHandle) -> DriverResult<StmtHandle> {
        let _watch = MutationWatch::enter(self);
        let mut state = self.state();
        state.connected_dbc(dbc)?;
        if let Some(records) = state.faults.alloc_statement.clone() {
            return Err(state.fail(dbc.0, records));
        }
        let id = state.next_handle();
        state.stmts.insert(
            id,
            StmtState {
                dbc: dbc.0,
                row_count: -1,
                ..StmtState::default()
            },
        );
        Ok(StmtHandle(id))
    }

    fn free_statement(&self, stmt: StmtHandle) -> DriverResult<()> {
        let _watch = MutationWatch::enter(self);
        let mut state = self.state();
        if state.stmts.remove(&stmt.0).is_none() {
            return Err(state.invalid());
        }
        state.diags.remove(&stmt.0);
        Ok(())
    }

    fn bind_parameter(
        &self,
        stmt: StmtHandle,
        number: u16,
        param: &mut Parameter,
    ) -> DriverResult<()> {
        let mut state = self.state();
        state.stmt(stmt)?;
        if number == 0 {
            return Err(state.fail_with(stmt.0, "07009", "Invalid descriptor index"));
        }
        if let Some(records) = state.faults.bind.clone() {
            return Err(state.fail(stmt.0, records));
        }
        let value = param.to_value();
        state.stmt(stmt)?.params.insert(number, value);
        Ok(())
    }

    fn reset_parameters(&self, stmt: StmtHandle) -> DriverResult<()> {
        self.state().stmt(stmt)?.params.clear();
        Ok(())
    }

    fn prepare(&self, stmt: StmtHandle, sql: &str) -> DriverResult<()> {
        let mut state = self.state();
        state.stmt(stmt)?;
        if sql.trim().is_empty() {
            return Err(state.fail_with(stmt.0, "42000", "Syntax error or access violation"));
        }
        state.stmt(stmt)?.prepared = Some(sql.to_string());
        Ok(())
    }

    fn execute(&self, stmt: StmtHandle) -> DriverResult<()> {
        self.run_sql(stmt, None)
    }

    fn exec_direct(&self, stmt: StmtHandle, sql: &str) -> DriverResult<()> {
        self.run_sql(stmt, Some(sql))
    }

    fn tables(&self, stmt: StmtHandle, filter: &TableFilter<'_>) -> DriverResult<()> {
        let set = {
            let mut state = self.state();
            state.stmt(stmt)?;
            let types: Option<Vec<String>> = filter.table_type.map(|list| {
                list.split(',')
                    .map(|t| t.trim().trim_matches('\'').to_uppercase())
                    .filter(|t| !t.is_empty())
                    .collect()
            });
            let mut set = ResultSet::new(&[
                "TABLE_CAT",
                "TABLE_SCHEM",
                "TABLE_NAME",
                "TABLE_TYPE",
                "REMARKS",
            ]);
            for t in &state.tables {
                let type_ok = match &types {
                    Some(types) if !types.is_empty() => types.contains(&t.table_type.to_uppercase()),
                    _ => true,
                };
                if exact_match(filter.catalog, &t.catalog)
                    && like_filter(filter.schema, &t.schema)
                    && like_filter(filter.table, &t.name)
                    && type_ok
                {
                    set = set.row(vec![
                        Value::from(t.catalog.as_str()),
                        Value::from(t.schema.as_str()),
                        Value::from(t.name.as_str()),
                        Value::from(t.table_type.as_str()),
                        Value::Null,
                    ]);
                }
            }
            set
        };
        self.open_cursor(stmt, set)
    }

    fn columns(&self, stmt: StmtHandle, filter: &ColumnFilter<'_>) -> DriverResult<()> {
        let set = {
            let mut state = self.state();
            state.stmt(stmt)?;
            let mut columns: Vec<ColumnInfo> = [
                "TABLE_CAT",
                "TABLE_SCHEM",
                "TABLE_NAME",
                "COLUMN_NAME",
            ]
            .iter()
            .map(|name| ColumnInfo::new(*name, sql_type::VARCHAR))
            .collect();
            columns.push(ColumnInfo::new("DATA_TYPE", sql_type::SMALLINT));
            columns.push(ColumnInfo::new("TYPE_NAME", sql_type::VARCHAR));
            columns.push(ColumnInfo::new("COLUMN_SIZE", sql_type::INTEGER));
            columns.push(ColumnInfo::new("NULLABLE", sql_type::SMALLINT));
            columns.push(ColumnInfo::new("ORDINAL_POSITION", sql_type::INTEGER));
            let mut set = ResultSet::with_columns(columns);
            for t in &state.tables {
                if !(exact_match(filter.catalog, &t.catalog)
                    && like_filter(filter.schema, &t.schema)
                    && like_filter(filter.table, &t.name))
                {
                    continue;
                }
                for (ordinal, c) in t.columns.iter().enumerate() {
                    if !like_filter(filter.column, &c.name) {
                        continue;
                    }
                    set = set.row(vec![
                        Value::from(t.catalog.as_str()),
                        Value::from(t.schema.as_str()),
                        Value::from(t.name.as_str()),
                        Value::from(c.name.as_str()),
                        Value::Integer(i64::from(c.sql_type)),
                        Value::from(type_name(c.sql_type)),
                        Value::Integer(c.column_size as i64),
                        Value::Integer(1),
                        Value::Integer(ordinal as i64 + 1),
                    ]);
                }
            }
            set
        };
        self.open_cursor(stmt, set)
    }

    fn num_result_cols(&self, stmt: StmtHandle) -> DriverResult<u16> {
        let mut state = self.state();
        let st = state.stmt(stmt)?;
        Ok(st
            .cursor
            .as_ref()
            .map(|c| c.set.columns.len() as u16)
            .unwrap_or(0))
    }

    fn describe_col(&self, stmt: StmtHandle, column: u16) -> DriverResult<ColumnInfo> {
        let mut state = self.state();
        let found = state.stmt(stmt)?.cursor.as_ref().and_then(|c| {
            usize::from(column)
                .checked_sub(1)
                .and_then(|i| c.set.columns.get(i))
                .cloned()
        });
        found.ok_or_else(|| state.fail_with(stmt.0, "07009", "Invalid descriptor index"))
    }

    fn fetch(&self, stmt: StmtHandle) -> DriverResult<bool> {
        let mut state = self.state();
        let st = state.stmt(stmt)?;
        let Some(cursor) = st.cursor.as_mut() else {
            return Err(state.fail_with(stmt.0, "24000", "Invalid cursor state"));
        };
        let next = cursor.position.map(|p| p + 1).unwrap_or(0);
        if next < cursor.set.rows.len() {
            cursor.position = Some(next);
            Ok(true)
        } else {
            cursor.position = Some(cursor.set.rows.len());
            Ok(false)
        }
    }

    fn get_data(&self, stmt: StmtHandle, column: u16, _info: &ColumnInfo) -> DriverResult<Value> {
        let mut state = self.state();
        let st = state.stmt(stmt)?;
        let row = st
            .cursor
            .as_ref()
            .and_then(|c| c.position.and_then(|p| c.set.rows.get(p)));
        let Some(row) = row else {
            return Err(state.fail_with(stmt.0, "24000", "Invalid cursor state"));
        };
        match usize::from(column).checked_sub(1).and_then(|i| row.get(i)) {
            Some(value) => Ok(value.clone()),
            None => Err(state.fail_with(stmt.0, "07009", "Invalid descriptor index")),
        }
    }

    fn more_results(&self, stmt: StmtHandle) -> DriverResult<bool> {
        let mut state = self.state();
        let st = state.stmt(stmt)?;
        match st.pending.pop_front() {
            Some(set) => {
                st.row_count = set.row_count;
                st.cursor = Some(Cursor {
                    set,
                    position: None,
                });
                Ok(true)
            }
            None => {
                st.cursor = None;
                Ok(false)
            }
        }
    }

    fn row_count(&self, stmt: StmtHandle) -> DriverResult<i64> {
        Ok(self.state().stmt(stmt)?.row_count)
    }

    fn close_cursor(&self, stmt: StmtHandle) -> DriverResult<()> {
        let mut state = self.state();
        let st = state.stmt(stmt)?;
        st.cursor = None;
        st.pending.clear();
        Ok(())
    }

    fn get_diag_rec(&self, handle: HandleRef, rec_number: i16) -> Option<DiagnosticRecord> {
        let id = match handle {
            HandleRef::Env(h) => h.0,
            HandleRef::Dbc(h) => h.0,
            HandleRef::Stmt(h) => h.0,
        };
        let index = usize::try_from(rec_number).ok()?.checked_sub(1)?;
        self.state().diags.get(&id)?.get(index).cloned()
    }
}

fn exact_match(filter: Option<&str>, value: &str) -> bool {
    filter.map_or(true, |f| f == value)
}

fn like_filter(pattern: Option<&str>, value: &str) -> bool {
    match pattern {
        None => true,
        Some(p) => {
            let p: Vec<char> = p.chars().collect();
            let v: Vec<char> = value.chars().collect();
            like_match(&p, &v)
        }
    }
}

/// Search-pattern match: `%` any run, `_` any one character, `\` escapes.
fn like_match(pattern: &[char], value: &[char]) -> bool {
    match pattern.split_first() {
        None => value.is_empty(),
        Some((&'%', rest)) => (0..=value.len()).any(|i| like_match(rest, &value[i..])),
        Some((&'_', rest)) => !value.is_empty() && like_match(rest, &value[1..]),
        Some((&'\\', rest)) if !rest.is_empty() => {
            value.first() == Some(&rest[0]) && like_match(&rest[1..], &value[1..])
        }
        Some((c, rest)) => {
            value.first().is_some_and(|v| v.eq_ignore_ascii_case(c))
                && like_match(rest, &value[1..])
        }
    }
}

fn type_name(code: i16) -> &'static str {
    match code {
        sql_type::INTEGER => "INTEGER",
        sql_type::SMALLINT => "SMALLINT",
        sql_type::BIGINT => "BIGINT",
        sql_type::DOUBLE | sql_type::FLOAT => "DOUBLE",
        sql_type::DECIMAL | sql_type::NUMERIC => "DECIMAL",
        sql_type::BIT => "BIT",
        sql_type::TYPE_DATE => "DATE",
        sql_type::TYPE_TIMESTAMP => "TIMESTAMP",
        sql_type::WVARCHAR => "NVARCHAR",
        _ => "VARCHAR",
    }
}
