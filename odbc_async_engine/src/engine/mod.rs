pub mod catalog;
pub mod cell_reader;
pub mod connection;
pub mod environment;
pub mod query;
pub mod result;
pub mod statement;
pub mod transaction;

pub use catalog::{CatalogFilter, ColumnsRequest, TablesRequest};
pub use connection::Connection;
pub use environment::Environment;
pub use query::{QueryFailure, QueryOutcome, QueryRequest};
pub use result::{OdbcResult, Row};
pub use statement::Statement;
pub use transaction::{IsolationLevel, Transaction, TransactionState};
