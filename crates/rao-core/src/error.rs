//! Unified error types for the RAO data model
//!
//! [`RaoError`] covers everything that can go wrong while assembling or
//! querying a CRAC and its parameters. The optimization engine has its own
//! leaf-level taxonomy and converts into this type at API boundaries.
//!
//! # Example
//!
//! ```ignore
//! use rao_core::{RaoError, RaoResult};
//!
//! fn build() -> RaoResult<Crac> {
//!     let crac = CracBuilder::new("crac").build()?;
//!     Ok(crac)
//! }
//! ```

use thiserror::Error;

/// Unified error type for all data-model operations.
#[derive(Error, Debug)]
pub enum RaoError {
    /// I/O errors (file access)
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Parsing/deserialization errors
    #[error("Parse error: {0}")]
    Parse(String),

    /// Data validation errors (inconsistent CRAC, invalid thresholds, ...)
    #[error("Validation error: {0}")]
    Validation(String),

    /// Lookup of an element that does not exist
    #[error("Unknown {kind} '{id}'")]
    NotFound { kind: &'static str, id: String },

    /// Configuration errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// Solver/algorithm errors surfaced at the API boundary
    #[error("Optimization error: {0}")]
    Optimization(String),

    /// Generic errors (for wrapping external errors)
    #[error("{0}")]
    Other(String),
}

/// Convenience type alias for Results using RaoError.
pub type RaoResult<T> = Result<T, RaoError>;

impl RaoError {
    pub fn not_found(kind: &'static str, id: impl Into<String>) -> Self {
        RaoError::NotFound {
            kind,
            id: id.into(),
        }
    }
}

impl From<anyhow::Error> for RaoError {
    fn from(err: anyhow::Error) -> Self {
        RaoError::Other(err.to_string())
    }
}

impl From<String> for RaoError {
    fn from(s: String) -> Self {
        RaoError::Other(s)
    }
}

impl From<&str> for RaoError {
    fn from(s: &str) -> Self {
        RaoError::Other(s.to_string())
    }
}

impl From<serde_json::Error> for RaoError {
    fn from(err: serde_json::Error) -> Self {
        RaoError::Parse(err.to_string())
    }
}

impl From<toml::de::Error> for RaoError {
    fn from(err: toml::de::Error) -> Self {
        RaoError::Parse(err.to_string())
    }
}

impl From<toml::ser::Error> for RaoError {
    fn from(err: toml::ser::Error) -> Self {
        RaoError::Other(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = RaoError::Validation("cnec without threshold".into());
        assert!(err.to_string().contains("Validation error"));
        assert!(err.to_string().contains("cnec without threshold"));

        let err = RaoError::not_found("state", "co1 - curative");
        assert_eq!(err.to_string(), "Unknown state 'co1 - curative'");
    }

    #[test]
    fn test_io_error_conversion() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "file not found");
        let rao_err: RaoError = io_err.into();
        assert!(matches!(rao_err, RaoError::Io(_)));
    }

    #[test]
    fn test_toml_error_conversion() {
        let err = toml::from_str::<toml::Value>("a = = 1").unwrap_err();
        let rao_err: RaoError = err.into();
        assert!(matches!(rao_err, RaoError::Parse(_)));
    }

    #[test]
    fn test_question_mark_operator() {
        fn inner() -> RaoResult<()> {
            Err(RaoError::Validation("test".into()))
        }

        fn outer() -> RaoResult<()> {
            inner()?;
            Ok(())
        }

        assert!(outer().is_err());
    }
}
