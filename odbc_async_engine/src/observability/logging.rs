use log::Level;
use std::collections::HashMap;

const SECRET_KEYS: [&str; 3] = ["PWD", "PASSWORD", "PASS"];

/// Log front-end for connections and queries. Connection strings are
/// always masked before they reach the log.
#[derive(Debug, Clone)]
pub struct StructuredLogger {
    enabled: bool,
}

impl StructuredLogger {
    pub fn new(enabled: bool) -> Self {
        Self { enabled }
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    pub fn log_query(&self, level: Level, query: &str, metadata: &HashMap<String, String>) {
        if !self.enabled {
            return;
        }

        let mut message = format!("Query: {}", query);
        for (key, value) in metadata {
            message.push_str(&format!(", {}={}", key, value));
        }

        log::log!(level, "{}", message);
    }

    pub fn log_connection(&self, level: Level, connection_string: &str, action: &str) {
        if !self.enabled {
            return;
        }

        log::log!(
            level,
            "Connection {}: {}",
            action,
            mask_connection_string(connection_string)
        );
    }

    pub fn log_error(&self, error: &str, metadata: &HashMap<String, String>) {
        if !self.enabled {
            return;
        }

        let mut message = format!("Error: {}", error);
        for (key, value) in metadata {
            message.push_str(&format!(", {}={}", key, value));
        }

        log::error!("{}", message);
    }
}

impl Default for StructuredLogger {
    fn default() -> Self {
        Self::new(true)
    }
}

/// Splits on `;` outside of `{...}` quoting.
pub(crate) fn split_connection_string_parts(connection_string: &str) -> Vec<&str> {
    let mut parts = Vec::new();
    let mut start = 0usize;
    let mut brace_depth = 0u32;

    for (idx, ch) in connection_string.char_indices() {
        match ch {
            '{' => brace_depth = brace_depth.saturating_add(1),
            '}' => brace_depth = brace_depth.saturating_sub(1),
            ';' if brace_depth == 0 => {
                parts.push(&connection_string[start..idx]);
                start = idx + ch.len_utf8();
            }
            _ => {}
        }
    }
    parts.push(&connection_string[start..]);
    parts
}

/// Replaces password values with `***`.
pub fn mask_connection_string(connection_string: &str) -> String {
    split_connection_string_parts(connection_string)
        .into_iter()
        .map(|part| match part.split_once('=') {
            Some((key, _))
                if SECRET_KEYS
                    .iter()
                    .any(|secret| key.trim().eq_ignore_ascii_case(secret)) =>
            {
                format!("{}=***", key)
            }
            _ => part.to_string(),
        })
        .collect::<Vec<_>>()
        .join(";")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_structured_logger_default() {
        assert!(StructuredLogger::default().is_enabled());
        assert!(!StructuredLogger::new(false).is_enabled());
    }

    #[test]
    fn test_log_calls_do_not_panic_when_disabled() {
        let logger = StructuredLogger::new(false);
        let metadata = HashMap::new();
        logger.log_query(Level::Info, "SELECT 1", &metadata);
        logger.log_connection(Level::Info, "DSN=test;PWD=secret", "open");
        logger.log_error("Connection failed", &metadata);
    }

    #[test]
    fn test_log_query_with_metadata() {
        let logger = StructuredLogger::new(true);
        let mut metadata = HashMap::new();
        metadata.insert("sqlstate".to_string(), "42S02".to_string());
        logger.log_query(Level::Debug, "SELECT * FROM users", &metadata);
    }

    #[test]
    fn test_mask_connection_string_hides_passwords() {
        let masked = mask_connection_string("DSN=prod;UID=sa;PWD=hunter2;Password=x");
        assert_eq!(masked, "DSN=prod;UID=sa;PWD=***;Password=***");
    }

    #[test]
    fn test_mask_connection_string_respects_braces() {
        let masked = mask_connection_string("Driver={My;Driver};pwd={a;b}");
        assert_eq!(masked, "Driver={My;Driver};pwd=***");
    }

    #[test]
    fn test_split_keeps_trailing_empty_part() {
        assert_eq!(split_connection_string_parts("A=1;B=2;"), vec!["A=1", "B=2", ""]);
    }
}
