use std::io;

use thiserror::Error;

/// Terminal error for anything that goes wrong before the pipeline starts creating.
///
/// Nothing has been mutated on the platform when one of these is returned, so callers
/// render it as a single fatal message and stop.
#[derive(Debug, Error)]
pub enum UsageError {
    #[error("{0}")]
    Configuration(String),
    #[error("Check your configfile. {0}")]
    UserDocument(String),
    #[error("Check your private key file. Access failed. {0}")]
    Authentication(#[from] AuthError),
    #[error("Network name mismatch! Expected '{expected}', credentials belong to '{actual}'.")]
    NetworkMismatch { expected: String, actual: String },
    #[error("Access denied to ad platform account. {0}")]
    AccessDenied(PlatformError),
    #[error("Validation errors:\n{}", format_violations(.0))]
    SchemaValidation(Vec<String>),
    #[error("{0}")]
    BidderMap(String),
}

impl UsageError {
    pub fn configuration<T: Into<String>>(message: T) -> Self {
        UsageError::Configuration(message.into())
    }
}

fn format_violations(violations: &[String]) -> String {
    violations
        .iter()
        .map(|violation| format!("  - {violation}"))
        .collect::<Vec<_>>()
        .join("\n")
}

/// Failure to construct an authenticated platform handle.
#[derive(Debug, Error)]
pub enum AuthError {
    #[error("unable to read credential file {path}: {source}")]
    Unreadable { path: String, source: io::Error },
    #[error("malformed credential file: {0}")]
    Malformed(String),
    #[error("handle construction failed: {0}")]
    Handle(String),
}

/// Error surfaced by the external ad platform collaborator.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum PlatformError {
    #[error("{0}")]
    NotActive(String),
    #[error("{0}")]
    NotFound(String),
    #[error("{0}")]
    Service(String),
}

impl PlatformError {
    /// Prefix the message with what was being attempted, keeping the category.
    pub fn context(self, context: impl std::fmt::Display) -> Self {
        match self {
            PlatformError::NotActive(msg) => PlatformError::NotActive(format!("{context}: {msg}")),
            PlatformError::NotFound(msg) => PlatformError::NotFound(format!("{context}: {msg}")),
            PlatformError::Service(msg) => PlatformError::Service(format!("{context}: {msg}")),
        }
    }
}

/// A failure recorded during creation or cleanup. Never returned, only collected.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum CreationFailure {
    #[error("Resource is not active: {0}")]
    NotActive(String),
    #[error("Resource not found: {0}")]
    NotFound(String),
    #[error("External service error: {0}")]
    ExternalService(String),
    #[error("User Interrupt")]
    UserInterrupt,
    #[error("Cleanup: {0}")]
    Cleanup(String),
}

impl From<PlatformError> for CreationFailure {
    fn from(value: PlatformError) -> Self {
        match value {
            PlatformError::NotActive(msg) => CreationFailure::NotActive(msg),
            PlatformError::NotFound(msg) => CreationFailure::NotFound(msg),
            PlatformError::Service(msg) => CreationFailure::ExternalService(msg),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn schema_violations_render_one_per_line() {
        let err = UsageError::SchemaValidation(vec![
            "order.name: required field".to_string(),
            "rate: required field".to_string(),
        ]);
        assert_eq!(
            err.to_string(),
            "Validation errors:\n  - order.name: required field\n  - rate: required field"
        );
    }

    #[test]
    fn platform_errors_keep_their_category() {
        let failure: CreationFailure = PlatformError::NotFound("advertiser 'Prebid'".into()).into();
        assert_eq!(failure.to_string(), "Resource not found: advertiser 'Prebid'");

        let failure: CreationFailure = PlatformError::Service("timeout".into()).into();
        assert!(matches!(failure, CreationFailure::ExternalService(_)));
    }

    #[test]
    fn context_prefixes_without_changing_category() {
        let err = PlatformError::NotActive("advertiser disabled".into()).context("order for 'ix'");
        assert_eq!(
            err,
            PlatformError::NotActive("order for 'ix': advertiser disabled".into())
        );
    }
}
