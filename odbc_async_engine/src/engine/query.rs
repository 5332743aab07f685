use super::connection::{Connection, ConnectionInner};
use super::result::OdbcResult;
use crate::driver::{HandleRef, SqlReturn};
use crate::error::{OdbcError, Result};
use crate::handles::OwnedStatement;
use crate::observability::global_metrics;
use crate::protocol::{ParamValue, Parameter};
use log::Level;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::time::Instant;

/// One single-shot query: SQL text, positional parameters and whether the
/// caller wants a result object back.
#[derive(Debug, Clone, PartialEq)]
pub struct QueryRequest {
    pub sql: String,
    pub params: Vec<ParamValue>,
    pub no_results: bool,
}

impl QueryRequest {
    pub fn new(sql: impl Into<String>) -> Self {
        Self {
            sql: sql.into(),
            params: Vec::new(),
            no_results: false,
        }
    }

    pub fn with_params(mut self, params: Vec<ParamValue>) -> Self {
        self.params = params;
        self
    }

    /// Frees the statement as soon as it has executed; the query then
    /// completes with [`QueryOutcome::Done`].
    pub fn no_results(mut self) -> Self {
        self.no_results = true;
        self
    }

    /// Validates host call arguments (callback excluded). Accepted shapes:
    /// `(sql)`, `(sql, params)` and `({ sql, params?, noResults? })`.
    pub fn from_args(args: &[serde_json::Value]) -> Result<Self> {
        use serde_json::Value as Json;

        match args {
            [Json::String(sql)] => Ok(Self::new(sql.as_str())),
            [Json::String(sql), Json::Array(params)] => {
                Ok(Self::new(sql.as_str()).with_params(ParamValue::from_json_array(params)?))
            }
            [Json::String(_), _] => Err(OdbcError::ValidationError(
                "Argument 1 must be an Array.".to_string(),
            )),
            [Json::Object(options)] => Self::from_options(options),
            [Json::Object(_), _] => Err(OdbcError::ValidationError(
                "Argument 1 is not allowed after an options Object.".to_string(),
            )),
            [_] | [_, _] => Err(OdbcError::ValidationError(
                "Argument 0 must be a String or an Object.".to_string(),
            )),
            _ => Err(OdbcError::ValidationError(format!(
                "Expected 1 or 2 arguments, got {}.",
                args.len()
            ))),
        }
    }

    fn from_options(options: &serde_json::Map<String, serde_json::Value>) -> Result<Self> {
        let sql = options
            .get("sql")
            .and_then(|v| v.as_str())
            .ok_or_else(|| {
                OdbcError::ValidationError("Options must have a String 'sql' property.".to_string())
            })?;
        let params = match options.get("params") {
            None | Some(serde_json::Value::Null) => Vec::new(),
            Some(serde_json::Value::Array(values)) => ParamValue::from_json_array(values)?,
            Some(_) => {
                return Err(OdbcError::ValidationError(
                    "Option 'params' must be an Array.".to_string(),
                ))
            }
        };
        let no_results = match options.get("noResults") {
            None | Some(serde_json::Value::Null) => false,
            Some(serde_json::Value::Bool(flag)) => *flag,
            Some(_) => {
                return Err(OdbcError::ValidationError(
                    "Option 'noResults' must be a Boolean.".to_string(),
                ))
            }
        };
        Ok(Self {
            sql: sql.to_string(),
            params,
            no_results,
        })
    }

    /// Converts the parameters into driver buffers. Called on the caller
    /// thread; the buffers then belong to the task until it completes.
    pub(crate) fn into_payload(self) -> QueryPayload {
        QueryPayload {
            params: self.params.iter().map(Parameter::from_value).collect(),
            sql: self.sql,
            no_results: self.no_results,
        }
    }
}

pub(crate) struct QueryPayload {
    pub(crate) sql: String,
    params: Vec<Parameter>,
    no_results: bool,
}

/// What a successful query produced.
#[derive(Debug)]
pub enum QueryOutcome {
    Result(OdbcResult),
    /// The query ran with `no_results` set; nothing is left to release.
    Done,
}

impl QueryOutcome {
    pub fn into_result(self) -> Option<OdbcResult> {
        match self {
            Self::Result(result) => Some(result),
            Self::Done => None,
        }
    }
}

/// A failed query. When execution failed after a result object was
/// requested, `result` still holds that (failed) result so its statement
/// stays inspectable.
pub struct QueryFailure {
    pub error: OdbcError,
    pub result: Option<OdbcResult>,
}

impl QueryFailure {
    pub fn into_parts(self) -> (OdbcError, Option<OdbcResult>) {
        (self.error, self.result)
    }
}

impl fmt::Debug for QueryFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("QueryFailure")
            .field("error", &self.error)
            .field("has_result", &self.result.is_some())
            .finish()
    }
}

impl fmt::Display for QueryFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.error.fmt(f)
    }
}

impl std::error::Error for QueryFailure {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        Some(&self.error)
    }
}

impl From<OdbcError> for QueryFailure {
    fn from(error: OdbcError) -> Self {
        Self {
            error,
            result: None,
        }
    }
}

impl From<QueryFailure> for OdbcError {
    fn from(failure: QueryFailure) -> Self {
        failure.error
    }
}

pub(crate) enum QueryExecution {
    NoResults,
    Cursor(Arc<OwnedStatement>),
    Failed(OdbcError, Arc<OwnedStatement>),
}

/// Allocate, bind, execute. Runs on a worker (or the caller thread for the
/// sync form).
pub(crate) fn execute(conn: &ConnectionInner, payload: &mut QueryPayload) -> Result<QueryExecution> {
    let started = Instant::now();
    let stmt = conn.alloc_statement()?;
    let manager = conn.manager();
    let driver = manager.driver();
    let handle = stmt.handle();

    let count = payload.params.len();
    for (i, param) in payload.params.iter_mut().enumerate() {
        let number = u16::try_from(i + 1)
            .map_err(|_| OdbcError::ValidationError(format!("Too many parameters: {}", count)))?;
        if driver.bind_parameter(handle, number, param).is_err() {
            let err = manager.translate(HandleRef::Stmt(handle), "[odbc_async_engine] Error binding parameters");
            release(&stmt);
            global_metrics().record_error();
            return Err(err);
        }
    }

    let failure = match driver.exec_direct(handle, &payload.sql) {
        Ok(()) | Err(SqlReturn::NoData) => None,
        Err(_) => Some(manager.translate(
            HandleRef::Stmt(handle),
            "[odbc_async_engine] Error executing the sql statement",
        )),
    };
    if !payload.params.is_empty() && driver.reset_parameters(handle).is_err() {
        log::warn!("Failed to reset parameters on {:?}", handle);
    }

    let elapsed = started.elapsed();
    if conn.log_queries() {
        let mut metadata = HashMap::new();
        metadata.insert("params".to_string(), payload.params.len().to_string());
        metadata.insert("elapsed_ms".to_string(), elapsed.as_millis().to_string());
        conn.logger().log_query(Level::Debug, &payload.sql, &metadata);
    }

    match failure {
        Some(err) => {
            global_metrics().record_error();
            // A no-results caller gets the error alone.
            if payload.no_results {
                release(&stmt);
                Err(err)
            } else {
                Ok(QueryExecution::Failed(err, stmt))
            }
        }
        None => {
            global_metrics().record_query(elapsed);
            if payload.no_results {
                stmt.free()?;
                Ok(QueryExecution::NoResults)
            } else {
                Ok(QueryExecution::Cursor(stmt))
            }
        }
    }
}

/// Runs on the caller thread: wraps the executed statement for the caller.
pub(crate) fn settle(
    conn: &Connection,
    sql: &str,
    executed: Result<QueryExecution>,
) -> std::result::Result<QueryOutcome, QueryFailure> {
    match executed {
        Ok(QueryExecution::NoResults) => Ok(QueryOutcome::Done),
        Ok(QueryExecution::Cursor(stmt)) => Ok(QueryOutcome::Result(OdbcResult::new(
            conn.clone(),
            stmt,
            true,
        ))),
        Ok(QueryExecution::Failed(error, stmt)) => {
            log_failure(conn, sql, &error);
            Err(QueryFailure {
                error,
                result: Some(OdbcResult::new(conn.clone(), stmt, true)),
            })
        }
        Err(error) => {
            log_failure(conn, sql, &error);
            Err(error.into())
        }
    }
}

fn log_failure(conn: &Connection, sql: &str, error: &OdbcError) {
    if !conn.inner().log_queries() {
        return;
    }
    let mut metadata = HashMap::new();
    metadata.insert("sql".to_string(), sql.to_string());
    metadata.insert("sqlstate".to_string(), error.sqlstate().to_string());
    conn.inner().logger().log_error(&error.to_string(), &metadata);
}

fn release(stmt: &OwnedStatement) {
    if let Err(e) = stmt.free() {
        log::warn!("Failed to free statement {:?}: {}", stmt.handle(), e);
    }
}
