//! Error types for the KT Cloud operator

use thiserror::Error;

/// Main error type for operator operations
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum Error {
    /// Kubernetes API error
    #[error("kubernetes error: {0}")]
    Kube(#[from] kube::Error),

    /// A write lost an optimistic concurrency race (HTTP 409)
    #[error("conflict: {0}")]
    Conflict(String),

    /// Validation error for resource specs
    #[error("validation error: {0}")]
    Validation(String),

    /// Cloud provider rejected or failed a request
    #[error("provider error: {0}")]
    Provider(String),

    /// Transport-level failure talking to the cloud API (includes timeouts)
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    /// Serialization/deserialization error
    #[error("serialization error: {0}")]
    Serialization(String),

    /// Invalid operator configuration
    #[error("configuration error: {0}")]
    Config(String),
}

impl Error {
    /// Create a validation error with the given message
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    /// Create a provider error with the given message
    pub fn provider(msg: impl Into<String>) -> Self {
        Self::Provider(msg.into())
    }

    /// Create a serialization error with the given message
    pub fn serialization(msg: impl Into<String>) -> Self {
        Self::Serialization(msg.into())
    }

    /// Create a configuration error with the given message
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Create a conflict error with the given message
    pub fn conflict(msg: impl Into<String>) -> Self {
        Self::Conflict(msg.into())
    }

    /// Classify a kube error returned by a write
    ///
    /// A 409 means the object changed since it was read, which callers
    /// handle by re-reading instead of backing off.
    pub fn from_write(err: kube::Error) -> Self {
        match err {
            kube::Error::Api(ae) if ae.code == 409 => Self::Conflict(ae.message),
            other => Self::Kube(other),
        }
    }

    /// Returns true if the error is an optimistic concurrency conflict
    pub fn is_conflict(&self) -> bool {
        matches!(self, Self::Conflict(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn api_error(code: u16, message: &str) -> kube::Error {
        kube::Error::Api(kube::core::ErrorResponse {
            status: "Failure".to_string(),
            message: message.to_string(),
            reason: "Conflict".to_string(),
            code,
        })
    }

    // ==========================================================================
    // Story Tests: Error Propagation in Reconciliation
    // ==========================================================================

    /// Story: A stale write is recognized as a conflict, not a generic API failure
    ///
    /// Two reconcilers touching the same object race on resourceVersion. The
    /// loser must re-read and retry, so the 409 is lifted into its own variant.
    #[test]
    fn story_stale_write_becomes_conflict() {
        let err = Error::from_write(api_error(
            409,
            "the object has been modified; please apply your changes to the latest version",
        ));
        assert!(err.is_conflict());
        assert!(err.to_string().contains("latest version"));
    }

    /// Story: Other API failures keep their kubernetes classification
    #[test]
    fn story_non_conflict_write_failure_stays_kube_error() {
        let err = Error::from_write(api_error(500, "etcdserver: request timed out"));
        assert!(!err.is_conflict());
        assert!(matches!(err, Error::Kube(_)));
        assert!(err.to_string().contains("kubernetes error"));
    }

    /// Story: Provider errors carry the cloud's own explanation verbatim
    #[test]
    fn story_provider_error_keeps_display_text() {
        let err = Error::provider("The IP address is already in use");
        assert_eq!(
            err.to_string(),
            "provider error: The IP address is already in use"
        );

        match Error::provider("any provider issue") {
            Error::Provider(msg) => assert_eq!(msg, "any provider issue"),
            _ => panic!("Expected Provider variant"),
        }
    }

    /// Story: Bad configuration is reported before any controller starts
    #[test]
    fn story_config_errors_are_descriptive() {
        let err = Error::config(format!("invalid API base URL '{}'", "not a url"));
        assert!(err.to_string().contains("configuration error"));
        assert!(err.to_string().contains("not a url"));
    }

    /// Story: Errors are categorized for proper handling in controllers
    #[test]
    fn story_error_categorization_for_controller_handling() {
        fn categorize_error(err: &Error) -> &'static str {
            match err {
                Error::Conflict(_) => "reread_and_retry",
                Error::Kube(_) | Error::Provider(_) | Error::Http(_) => "retry_with_backoff",
                Error::Validation(_) | Error::Serialization(_) => "retry_with_backoff",
                Error::Config(_) => "fatal",
            }
        }

        assert_eq!(
            categorize_error(&Error::conflict("stale")),
            "reread_and_retry"
        );
        assert_eq!(
            categorize_error(&Error::provider("timeout")),
            "retry_with_backoff"
        );
        assert_eq!(categorize_error(&Error::config("bad zone")), "fatal");
    }
}
