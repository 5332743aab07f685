//! Helper functions for reading environment variables in tests

use odbc_async_engine::test_helpers::load_dotenv;

/// Get the ODBC_TEST_DSN connection string from environment (after loading
/// `.env`). Returns None if not set; live tests skip in that case.
pub fn get_test_dsn() -> Option<String> {
    load_dotenv();
    std::env::var("ODBC_TEST_DSN")
        .ok()
        .filter(|s| !s.trim().is_empty())
}

pub fn should_run_live_tests() -> bool {
    get_test_dsn().is_some()
}

/// Routes `log` output through env_logger; `RUST_LOG=debug` shows engine
/// traces. Safe to call from every test.
pub fn init_logger() {
    let _ = env_logger::builder().is_test(true).try_init();
}
