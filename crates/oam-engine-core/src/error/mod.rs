//! Error taxonomy for the rendering and workflow execution core.
//!
//! All failures surfaced by `oam-engine-core`, `oam-engine-render`, and
//! `oam-engine-workflow` are variants of [`CoreError`]. Each variant carries an
//! [`ErrorKind`] so callers can branch on category (recoverable vs. fatal, retryable
//! vs. not) without resorting to substring matching on the display string.

mod types;

pub use types::{CoreError, ErrorKind};

/// Result type alias used throughout the workspace.
pub type Result<T> = std::result::Result<T, CoreError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn not_found_is_not_retryable() {
        let err = CoreError::not_found("component-type", "worker");
        assert_eq!(err.kind(), ErrorKind::NotFound);
        assert!(!err.kind().is_retryable());
    }

    #[test]
    fn store_errors_are_retryable() {
        let err = CoreError::store("commit workflow context failed");
        assert!(err.kind().is_retryable());
    }
}
