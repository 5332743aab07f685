//! Test-only helpers. Enabled by the `test-helpers` feature.

/// Loads `.env` from the current or a parent directory, if present. Live
/// driver tests read `ODBC_TEST_DSN` from it.
pub fn load_dotenv() {
    if let Err(e) = dotenvy::dotenv() {
        log::debug!("No .env loaded: {}", e);
    }
}
