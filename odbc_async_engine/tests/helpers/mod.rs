pub mod env;
pub mod memory;

#[allow(unused_imports)]
pub use env::{get_test_dsn, init_logger, should_run_live_tests};
#[allow(unused_imports)]
pub use memory::{open_connection, Fixture};
