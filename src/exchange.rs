//! Per-exchange scope consulted by the reader.
//!
//! An [`ExchangeContext`] is created for one inbound or outbound message and
//! discarded when the exchange completes. It carries the message byte source,
//! a typed-key property map, and an optional [`SchemaProvider`] standing in
//! for endpoint configuration. The provider is a deliberately narrow
//! capability interface: tests implement it directly instead of standing up
//! an endpoint (or reaching for a mocking framework).

use std::any::{Any, TypeId};
use std::collections::HashMap;
use std::sync::Arc;

use crate::grammar::SchemaGrammar;
use crate::name::QName;
use crate::source::SourceHandle;

/// Capability for discovering a compiled grammar from endpoint-scoped
/// configuration.
pub trait SchemaProvider: Send + Sync {
    fn grammar(&self) -> Option<Arc<SchemaGrammar>>;
}

/// Provider returning one fixed grammar.
pub struct StaticSchemaProvider {
    grammar: Arc<SchemaGrammar>,
}

impl StaticSchemaProvider {
    pub fn new(grammar: Arc<SchemaGrammar>) -> Self {
        Self { grammar }
    }
}

impl SchemaProvider for StaticSchemaProvider {
    fn grammar(&self) -> Option<Arc<SchemaGrammar>> {
        Some(Arc::clone(&self.grammar))
    }
}

/// Scope for one message exchange.
#[derive(Default)]
pub struct ExchangeContext {
    properties: HashMap<TypeId, Box<dyn Any + Send>>,
    content: Option<SourceHandle>,
    schema_provider: Option<Arc<dyn SchemaProvider>>,
}

impl ExchangeContext {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record the byte source carrying the message content.
    pub fn set_content(&mut self, source: SourceHandle) {
        self.content = Some(source);
    }

    pub fn content(&self) -> Option<&SourceHandle> {
        self.content.as_ref()
    }

    pub fn set_schema_provider(&mut self, provider: Arc<dyn SchemaProvider>) {
        self.schema_provider = Some(provider);
    }

    pub fn schema_provider(&self) -> Option<&Arc<dyn SchemaProvider>> {
        self.schema_provider.as_ref()
    }

    /// Store a property under its type. One value per type.
    pub fn put<T: Any + Send>(&mut self, value: T) {
        self.properties.insert(TypeId::of::<T>(), Box::new(value));
    }

    pub fn get<T: Any + Send>(&self) -> Option<&T> {
        self.properties
            .get(&TypeId::of::<T>())
            .and_then(|boxed| boxed.downcast_ref::<T>())
    }

    pub fn remove<T: Any + Send>(&mut self) -> Option<T> {
        self.properties
            .remove(&TypeId::of::<T>())
            .and_then(|boxed| boxed.downcast::<T>().ok())
            .map(|boxed| *boxed)
    }
}

/// Expected element of one message part. Immutable, constructed once per
/// message definition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PartDescriptor {
    name: QName,
    is_element: bool,
    operation: Option<QName>,
}

impl PartDescriptor {
    /// A part declared as an element; reads match the document element
    /// strictly against `name`.
    pub fn element(name: QName) -> Self {
        Self {
            name,
            is_element: true,
            operation: None,
        }
    }

    /// A part declared as a bare type; reads degrade to lax matching.
    pub fn typed(name: QName) -> Self {
        Self {
            name,
            is_element: false,
            operation: None,
        }
    }

    pub fn with_operation(mut self, operation: QName) -> Self {
        self.operation = Some(operation);
        self
    }

    pub fn name(&self) -> &QName {
        &self.name
    }

    pub fn is_element(&self) -> bool {
        self.is_element
    }

    pub fn operation(&self) -> Option<&QName> {
        self.operation.as_ref()
    }
}
