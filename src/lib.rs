//! # xmlwire Library
//!
//! A streaming, schema-validating XML reader for the wire-to-object boundary
//! of a message-processing pipeline. Tokens are pulled incrementally from a
//! byte source, optionally checked against a compiled W3C XML Schema while
//! streaming, and handed to the caller either as a decoded element value or
//! as a live pass-through cursor whose `close()` cascades to the original
//! byte source exactly once.

pub mod cli;
pub mod cursor;
pub mod element;
pub mod error;
pub mod exchange;
pub mod fault;
pub mod grammar;
pub mod locate;
pub mod name;
pub mod output;
pub mod reader;
pub mod source;
pub mod validate;

pub use cli::{Cli, Config, OutputFormat, VerbosityLevel};
pub use cursor::{Attribute, NamespaceDecl, TokenCursor, TokenEvent};
pub use element::{Element, XmlNode};
pub use error::{Location, ReadError};
pub use exchange::{ExchangeContext, PartDescriptor, SchemaProvider, StaticSchemaProvider};
pub use fault::{Fault, FaultCode};
pub use grammar::SchemaGrammar;
pub use locate::{SchemaLocator, SchemaReference, SchemaSourceType};
pub use name::QName;
pub use output::{Output, ReadReport, ReadStatus};
pub use reader::{ReadResult, ReadTarget, StreamDataReader};
pub use source::{BoundCursor, ByteSource, EventCursor, SourceHandle};
pub use validate::{ValidatingCursor, ValidationOptions, ValidationWarning};
