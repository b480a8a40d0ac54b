use std::fmt;

use serde::Serialize;
use thiserror::Error;

/// Position of an event in the input document, when the tokenizer could
/// determine one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Location {
    pub line: u64,
    pub column: u64,
}

impl Location {
    pub fn new(line: u64, column: u64) -> Self {
        Self { line, column }
    }
}

impl fmt::Display for Location {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "line {}, column {}", self.line, self.column)
    }
}

fn location_note(location: &Option<Location>) -> String {
    match location {
        Some(loc) => format!(" at {}", loc),
        None => String::new(),
    }
}

fn join_causes(causes: &[String]) -> String {
    causes.join("; ")
}

/// Main error type covering all failure modes of the streaming read path
#[derive(Error, Debug)]
pub enum ReadError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("malformed input{}: {details}", location_note(.location))]
    Malformed {
        location: Option<Location>,
        details: String,
    },

    #[error("validation failed{}: {}", location_note(.location), join_causes(.causes))]
    Validation {
        location: Option<Location>,
        causes: Vec<String>,
    },

    #[error("schema compilation failed: {details}")]
    SchemaCompile { details: String },

    #[error("failed to release byte source: {details}")]
    ResourceRelease { details: String },

    #[error("internal error: {details}")]
    Internal { details: String },
}

impl ReadError {
    /// Construct a well-formedness error at a known position.
    pub fn malformed(location: Location, details: impl Into<String>) -> Self {
        ReadError::Malformed {
            location: Some(location),
            details: details.into(),
        }
    }

    /// Construct a validation error with a single cause.
    pub fn violation(location: Option<Location>, cause: impl Into<String>) -> Self {
        ReadError::Validation {
            location,
            causes: vec![cause.into()],
        }
    }

    /// True for errors that leave the cursor unusable (the document can no
    /// longer be parsed; the byte source itself may still be closed).
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            ReadError::Io(_) | ReadError::Malformed { .. } | ReadError::Internal { .. }
        )
    }
}

/// Result type alias for convenience
pub type Result<T> = std::result::Result<T, ReadError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_malformed_display() {
        let err = ReadError::malformed(Location::new(3, 17), "unterminated start tag");
        let text = err.to_string();
        assert!(text.contains("malformed input"));
        assert!(text.contains("line 3, column 17"));
        assert!(text.contains("unterminated start tag"));
    }

    #[test]
    fn test_malformed_display_without_location() {
        let err = ReadError::Malformed {
            location: None,
            details: "document does not start with markup".to_string(),
        };
        let text = err.to_string();
        assert!(text.contains("malformed input: document does not start with markup"));
        assert!(!text.contains("line"));
    }

    #[test]
    fn test_validation_display_joins_causes() {
        let err = ReadError::Validation {
            location: Some(Location::new(5, 2)),
            causes: vec![
                "unexpected element {http://example.com}extra".to_string(),
                "missing required element {http://example.com}id".to_string(),
            ],
        };
        let text = err.to_string();
        assert!(text.contains("validation failed at line 5, column 2"));
        assert!(text.contains("unexpected element"));
        assert!(text.contains("; missing required element"));
    }

    #[test]
    fn test_io_error_conversion() {
        let io_error = std::io::Error::new(std::io::ErrorKind::PermissionDenied, "Access denied");
        let err: ReadError = io_error.into();

        match err {
            ReadError::Io(_) => (),
            _ => panic!("Expected ReadError::Io"),
        }
    }

    #[test]
    fn test_error_source_chain() {
        use std::error::Error;

        let io_error = std::io::Error::new(std::io::ErrorKind::NotFound, "stream gone");
        let err = ReadError::Io(io_error);

        let source = err.source().expect("source preserved");
        assert_eq!(source.to_string(), "stream gone");
    }

    #[test]
    fn test_fatality() {
        assert!(ReadError::malformed(Location::new(1, 1), "bad ref").is_fatal());
        assert!(!ReadError::violation(None, "wrong element").is_fatal());
        assert!(
            !ReadError::ResourceRelease {
                details: "close failed".to_string()
            }
            .is_fatal()
        );
    }

    #[test]
    fn test_result_type_alias() {
        let success: Result<u32> = Ok(7);
        assert!(success.is_ok());

        let failure: Result<u32> = Err(ReadError::Internal {
            details: "test".to_string(),
        });
        assert!(failure.is_err());
    }
}
