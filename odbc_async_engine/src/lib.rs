//! Ordered, leak-free async wrapper around the ODBC call-level interface.
//!
//! Handles form a tree: [`Environment`] → [`Connection`] → [`Statement`] →
//! [`OdbcResult`]. Blocking driver calls run on a worker pool; completions
//! are delivered on the thread that drives the [`EventLoop`].

mod async_bridge;
pub mod config;
pub mod dispatch;
pub mod driver;
pub mod engine;
mod error;
mod handles;
pub mod observability;
pub mod protocol;
#[cfg(feature = "test-helpers")]
pub mod test_helpers;

pub use config::{ConnectionOptions, EngineConfig};
pub use dispatch::{Dispatcher, EventLoop, KeepAlive};
#[cfg(any(test, feature = "test-helpers"))]
pub use driver::memory::MemoryDriver;
pub use driver::odbc::OdbcDriver;
pub use driver::Driver;
pub use engine::{
    CatalogFilter, ColumnsRequest, Connection, Environment, IsolationLevel, OdbcResult,
    QueryFailure, QueryOutcome, QueryRequest, Row, Statement, TablesRequest, Transaction,
};
pub use error::{DiagnosticRecord, ErrorCategory, OdbcError, Result, SqlState};
pub use protocol::{ColumnInfo, ParamValue, Value};

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn test_environment_creation() {
        let event_loop = EventLoop::new();
        let env = Environment::new(Arc::new(MemoryDriver::new()), event_loop.dispatcher());
        assert!(env.is_ok());
    }

    #[test]
    fn test_real_driver_is_part_of_default_build() {
        let first = OdbcDriver::shared();
        let second = OdbcDriver::shared();
        assert!(Arc::ptr_eq(&first, &second));
    }

    #[test]
    fn test_connection_empty_string() {
        let event_loop = EventLoop::new();
        let env = Environment::new(Arc::new(MemoryDriver::new()), event_loop.dispatcher()).unwrap();
        let conn = env.create_connection_sync().unwrap();

        let result = conn.open_sync("");
        match result {
            Err(OdbcError::EmptyConnectionString) => (),
            _ => panic!("Expected EmptyConnectionString error"),
        }
        assert!(!conn.connected());
    }
}
