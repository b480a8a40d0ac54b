//! The caller-visible failure surface.
//!
//! Every failure inside the read path — well-formedness, schema violation,
//! resource release, unexpected internals — crosses the reader boundary as a
//! [`Fault`]. Internal error types never escape.

use std::error::Error as StdError;
use std::fmt;

use serde::Serialize;

use crate::error::{Location, ReadError};

/// Stable classification of a fault.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum FaultCode {
    /// Input is not well-formed; the read aborted and cannot be retried on
    /// the same source.
    MalformedInput,
    /// Input is well-formed but violates the schema. The process stays
    /// healthy for independent reads.
    SchemaViolation,
    /// The byte source failed to release on close.
    ResourceRelease,
    /// Anything unexpected, including I/O unrelated to parsing.
    Internal,
}

/// Caller-visible failure object with a human-readable cause chain.
#[derive(Debug, Clone, Serialize)]
pub struct Fault {
    pub code: FaultCode,
    pub message: String,
    pub location: Option<Location>,
    pub causes: Vec<String>,
}

impl Fault {
    pub fn is_malformed_input(&self) -> bool {
        self.code == FaultCode::MalformedInput
    }

    pub fn is_schema_violation(&self) -> bool {
        self.code == FaultCode::SchemaViolation
    }

    pub fn is_resource_release(&self) -> bool {
        self.code == FaultCode::ResourceRelease
    }

    pub fn is_internal(&self) -> bool {
        self.code == FaultCode::Internal
    }
}

impl fmt::Display for Fault {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let code = match self.code {
            FaultCode::MalformedInput => "malformed input",
            FaultCode::SchemaViolation => "schema violation",
            FaultCode::ResourceRelease => "resource release failure",
            FaultCode::Internal => "internal error",
        };
        write!(f, "{}: {}", code, self.message)
    }
}

impl StdError for Fault {}

/// The translator: every internal error maps to exactly one fault code.
impl From<ReadError> for Fault {
    fn from(err: ReadError) -> Self {
        match err {
            ReadError::Malformed { location, details } => Fault {
                code: FaultCode::MalformedInput,
                message: format!("malformed input: {}", details),
                location,
                causes: vec![details],
            },
            ReadError::Validation { location, causes } => Fault {
                code: FaultCode::SchemaViolation,
                message: format!("validation failed: {}", causes.join("; ")),
                location,
                causes,
            },
            ReadError::ResourceRelease { details } => Fault {
                code: FaultCode::ResourceRelease,
                message: format!("failed to release byte source: {}", details),
                location: None,
                causes: vec![details],
            },
            other => {
                let message = other.to_string();
                Fault {
                    code: FaultCode::Internal,
                    message: message.clone(),
                    location: None,
                    causes: vec![message],
                }
            }
        }
    }
}
