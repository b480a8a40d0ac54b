//! The reading façade on the wire-to-object boundary.
//!
//! [`StreamDataReader`] selects a plain or validating cursor based on whether
//! a grammar is associated with the read, drives the read, and returns either
//! a pass-through cursor bound to the originating byte source or a decoded
//! element value. All failures cross this boundary as [`Fault`]s; internal
//! error types never escape.
//!
//! Each read consumes its cursor: the cursor moves into the call, so no
//! further reads from the same cursor instance are possible afterwards.

use std::fmt;
use std::sync::Arc;

use tracing::debug;

use crate::cursor::TokenCursor;
use crate::element::Element;
use crate::error::ReadError;
use crate::exchange::{ExchangeContext, PartDescriptor};
use crate::fault::Fault;
use crate::grammar::SchemaGrammar;
use crate::name::QName;
use crate::source::{BoundCursor, EventCursor};
use crate::validate::{ValidatingCursor, ValidationOptions, ValidationWarning};

/// What the caller wants back from a read.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadTarget {
    /// Return the live cursor; the caller drives further reading and must
    /// eventually close it.
    Cursor,
    /// Drive the read to completion and decode an element value.
    Value,
}

/// Outcome of one read call.
pub enum ReadResult {
    Cursor(BoundCursor),
    Value(Element),
}

impl ReadResult {
    pub fn is_cursor(&self) -> bool {
        matches!(self, ReadResult::Cursor(_))
    }

    pub fn is_value(&self) -> bool {
        matches!(self, ReadResult::Value(_))
    }

    pub fn into_cursor(self) -> Option<BoundCursor> {
        match self {
            ReadResult::Cursor(cursor) => Some(cursor),
            ReadResult::Value(_) => None,
        }
    }

    pub fn into_value(self) -> Option<Element> {
        match self {
            ReadResult::Value(value) => Some(value),
            ReadResult::Cursor(_) => None,
        }
    }
}

impl fmt::Debug for ReadResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ReadResult::Cursor(_) => f.write_str("ReadResult::Cursor"),
            ReadResult::Value(value) => write!(f, "ReadResult::Value({})", value.name),
        }
    }
}

/// Schema-aware streaming reader for message parts.
pub struct StreamDataReader {
    schema: Option<Arc<SchemaGrammar>>,
    options: ValidationOptions,
    exchange: Option<ExchangeContext>,
    warnings: Vec<ValidationWarning>,
}

impl Default for StreamDataReader {
    fn default() -> Self {
        Self::new()
    }
}

impl StreamDataReader {
    pub fn new() -> Self {
        Self {
            schema: None,
            options: ValidationOptions::default(),
            exchange: None,
            warnings: Vec::new(),
        }
    }

    /// Install a grammar for all subsequent reads through this reader. A
    /// reader-attached grammar takes precedence over one discovered through
    /// the exchange's schema provider.
    pub fn set_schema(&mut self, grammar: Arc<SchemaGrammar>) {
        self.schema = Some(grammar);
    }

    pub fn set_validation_options(&mut self, options: ValidationOptions) {
        self.options = options;
    }

    /// Associate the current message exchange with this reader.
    pub fn attach_exchange(&mut self, exchange: ExchangeContext) {
        self.exchange = Some(exchange);
    }

    pub fn exchange(&self) -> Option<&ExchangeContext> {
        self.exchange.as_ref()
    }

    /// Warnings collected by the most recent value-mode read (populated only
    /// when warning escalation is off).
    pub fn warnings(&self) -> &[ValidationWarning] {
        &self.warnings
    }

    /// Read the message part rooted at `expected`.
    ///
    /// With [`ReadTarget::Cursor`] the (possibly validating) cursor is bound
    /// to the originating byte source and returned without consuming events;
    /// the expected name is not enforced, since the caller drives the read.
    /// With [`ReadTarget::Value`] the document is decoded and its element
    /// checked against `expected`.
    pub fn read(
        &mut self,
        expected: &QName,
        cursor: TokenCursor,
        target: ReadTarget,
    ) -> Result<ReadResult, Fault> {
        match target {
            ReadTarget::Cursor => self.do_read(None, cursor, target),
            ReadTarget::Value => self.do_read(Some(expected), cursor, target),
        }
    }

    /// Read a described message part into a value. Strict name matching
    /// applies only when the part declares an element; a bare-type part
    /// degrades to accepting any document element.
    pub fn read_part(
        &mut self,
        part: &PartDescriptor,
        cursor: TokenCursor,
    ) -> Result<ReadResult, Fault> {
        let expected = if part.is_element() {
            Some(part.name().clone())
        } else {
            None
        };
        self.do_read(expected.as_ref(), cursor, ReadTarget::Value)
    }

    /// Reader-attached schema first, then the exchange's provider.
    fn resolve_grammar(&self) -> Option<Arc<SchemaGrammar>> {
        if let Some(schema) = &self.schema {
            return Some(Arc::clone(schema));
        }
        self.exchange.as_ref()?.schema_provider()?.grammar()
    }

    fn do_read(
        &mut self,
        expected: Option<&QName>,
        cursor: TokenCursor,
        target: ReadTarget,
    ) -> Result<ReadResult, Fault> {
        self.warnings.clear();
        let grammar = self.resolve_grammar();
        debug!(
            validating = grammar.is_some(),
            ?target,
            expected = expected.map(|n| n.to_string()),
            "starting read"
        );

        // The close duty cascades to the exchange's message source; a cursor
        // over a source the exchange does not know about falls back to its
        // own handle.
        let origin = self
            .exchange
            .as_ref()
            .and_then(|e| e.content().cloned())
            .unwrap_or_else(|| cursor.source());

        match target {
            ReadTarget::Cursor => {
                let inner: Box<dyn EventCursor> = match grammar {
                    Some(grammar) => {
                        Box::new(ValidatingCursor::new(cursor, grammar, self.options))
                    }
                    None => Box::new(cursor),
                };
                Ok(ReadResult::Cursor(BoundCursor::bind(inner, origin)))
            }
            ReadTarget::Value => match grammar {
                Some(grammar) => {
                    let mut validating = ValidatingCursor::new(cursor, grammar, self.options);
                    let decoded = Element::decode(&mut validating);
                    self.warnings = validating.warnings().to_vec();
                    let close_result = validating.close();
                    finish_value(decoded, close_result, expected)
                }
                None => {
                    let mut cursor = cursor;
                    let decoded = Element::decode(&mut cursor);
                    let close_result = cursor.close();
                    finish_value(decoded, close_result, expected)
                }
            },
        }
    }
}

/// Value mode drove the source to completion, so the reader also closes it;
/// a release failure surfaces as a fault without masking a decode failure.
fn finish_value(
    decoded: crate::error::Result<Option<Element>>,
    close_result: crate::error::Result<()>,
    expected: Option<&QName>,
) -> Result<ReadResult, Fault> {
    let root = decoded.map_err(Fault::from)?;
    close_result.map_err(Fault::from)?;
    let root = root.ok_or_else(|| {
        Fault::from(ReadError::Malformed {
            location: None,
            details: "document contains no element".to_string(),
        })
    })?;
    if let Some(expected) = expected {
        if &root.name != expected {
            return Err(Fault::from(ReadError::violation(
                None,
                format!(
                    "unexpected document element {}; expected {}",
                    root.name, expected
                ),
            )));
        }
    }
    Ok(ReadResult::Value(root))
}
