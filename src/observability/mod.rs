//! Observability for the lifecycle core
//!
//! Structured JSON logging only:
//! - One log line = one event
//! - Deterministic key ordering
//! - Synchronous, no buffering
//! - Logging failure must never fail an operation

mod logger;

pub use logger::{Logger, Severity};

use crate::error::CoreError;

/// Log a core error at its own severity, with the code attached.
pub fn log_core_error(event: &str, err: &CoreError) {
    let status = err.status().to_string();
    let fields = [
        ("code", err.code().name()),
        ("status", status.as_str()),
        ("message", err.message()),
    ];
    match err.severity() {
        crate::error::Severity::Fatal => Logger::fatal(event, &fields),
        crate::error::Severity::Error => Logger::error(event, &fields),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::CoreErrorCode;

    #[test]
    fn test_log_core_error_does_not_panic() {
        let err = CoreError::new(CoreErrorCode::HierarchyError, "no eligible replica");
        log_core_error("resolve_failed", &err);
    }
}
