//! Compiled schema grammars.
//!
//! A [`SchemaGrammar`] is the immutable, pre-compiled form of a W3C XML
//! Schema document: global element declarations, named types, content models
//! and attribute uses. Compile once, share behind `Arc` across any number of
//! reads. The compiler is strict: a construct it does not model is a
//! [`ReadError::SchemaCompile`], never silently accepted.
//!
//! Modeled subset: global `xs:element`, named and inline `xs:complexType` /
//! `xs:simpleType`, flat `xs:sequence` / `xs:choice` / `xs:all` groups with
//! particle occurrence bounds, element references, `xs:any` wildcards,
//! attribute uses, the built-in atomic types, and `xs:enumeration` facets.

use std::collections::HashMap;
use std::path::Path;
use std::sync::OnceLock;

use regex::Regex;
use tracing::debug;

use crate::cursor::{Attribute, NamespaceDecl, TokenCursor, TokenEvent};
use crate::error::{ReadError, Result};
use crate::name::{QName, XSD_NAMESPACE};
use crate::source::SourceHandle;

pub(crate) type TypeId = usize;

static DATE_REGEX: OnceLock<Regex> = OnceLock::new();
static TIME_REGEX: OnceLock<Regex> = OnceLock::new();
static DATE_TIME_REGEX: OnceLock<Regex> = OnceLock::new();
static DECIMAL_REGEX: OnceLock<Regex> = OnceLock::new();
static QNAME_REGEX: OnceLock<Regex> = OnceLock::new();

fn date_regex() -> &'static Regex {
    DATE_REGEX.get_or_init(|| {
        Regex::new(r"^-?\d{4,}-\d{2}-\d{2}(Z|[+-]\d{2}:\d{2})?$")
            .expect("Failed to compile date regex")
    })
}

fn time_regex() -> &'static Regex {
    TIME_REGEX.get_or_init(|| {
        Regex::new(r"^\d{2}:\d{2}:\d{2}(\.\d+)?(Z|[+-]\d{2}:\d{2})?$")
            .expect("Failed to compile time regex")
    })
}

fn date_time_regex() -> &'static Regex {
    DATE_TIME_REGEX.get_or_init(|| {
        Regex::new(r"^-?\d{4,}-\d{2}-\d{2}T\d{2}:\d{2}:\d{2}(\.\d+)?(Z|[+-]\d{2}:\d{2})?$")
            .expect("Failed to compile dateTime regex")
    })
}

fn decimal_regex() -> &'static Regex {
    DECIMAL_REGEX.get_or_init(|| {
        Regex::new(r"^[+-]?(\d+(\.\d*)?|\.\d+)$").expect("Failed to compile decimal regex")
    })
}

fn qname_regex() -> &'static Regex {
    QNAME_REGEX.get_or_init(|| {
        Regex::new(r"^[A-Za-z_][\w.\-]*(:[A-Za-z_][\w.\-]*)?$")
            .expect("Failed to compile QName regex")
    })
}

/// Built-in atomic simple types.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Builtin {
    String,
    NormalizedString,
    Token,
    Boolean,
    Decimal,
    Double,
    Float,
    Integer,
    Long,
    Int,
    Short,
    Byte,
    NonNegativeInteger,
    PositiveInteger,
    UnsignedLong,
    UnsignedInt,
    UnsignedShort,
    UnsignedByte,
    Date,
    Time,
    DateTime,
    AnyUri,
    QNameType,
    AnySimple,
}

impl Builtin {
    fn from_local(local: &str) -> Option<Builtin> {
        Some(match local {
            "string" => Builtin::String,
            "normalizedString" => Builtin::NormalizedString,
            "token" | "NMTOKEN" | "Name" | "NCName" | "ID" | "IDREF" => Builtin::Token,
            "boolean" => Builtin::Boolean,
            "decimal" => Builtin::Decimal,
            "double" => Builtin::Double,
            "float" => Builtin::Float,
            "integer" => Builtin::Integer,
            "long" => Builtin::Long,
            "int" => Builtin::Int,
            "short" => Builtin::Short,
            "byte" => Builtin::Byte,
            "nonNegativeInteger" => Builtin::NonNegativeInteger,
            "positiveInteger" => Builtin::PositiveInteger,
            "unsignedLong" => Builtin::UnsignedLong,
            "unsignedInt" => Builtin::UnsignedInt,
            "unsignedShort" => Builtin::UnsignedShort,
            "unsignedByte" => Builtin::UnsignedByte,
            "date" => Builtin::Date,
            "time" => Builtin::Time,
            "dateTime" => Builtin::DateTime,
            "anyURI" => Builtin::AnyUri,
            "QName" => Builtin::QNameType,
            "anySimpleType" => Builtin::AnySimple,
            _ => return None,
        })
    }

    pub(crate) fn name(&self) -> &'static str {
        match self {
            Builtin::String => "xs:string",
            Builtin::NormalizedString => "xs:normalizedString",
            Builtin::Token => "xs:token",
            Builtin::Boolean => "xs:boolean",
            Builtin::Decimal => "xs:decimal",
            Builtin::Double => "xs:double",
            Builtin::Float => "xs:float",
            Builtin::Integer => "xs:integer",
            Builtin::Long => "xs:long",
            Builtin::Int => "xs:int",
            Builtin::Short => "xs:short",
            Builtin::Byte => "xs:byte",
            Builtin::NonNegativeInteger => "xs:nonNegativeInteger",
            Builtin::PositiveInteger => "xs:positiveInteger",
            Builtin::UnsignedLong => "xs:unsignedLong",
            Builtin::UnsignedInt => "xs:unsignedInt",
            Builtin::UnsignedShort => "xs:unsignedShort",
            Builtin::UnsignedByte => "xs:unsignedByte",
            Builtin::Date => "xs:date",
            Builtin::Time => "xs:time",
            Builtin::DateTime => "xs:dateTime",
            Builtin::AnyUri => "xs:anyURI",
            Builtin::QNameType => "xs:QName",
            Builtin::AnySimple => "xs:anySimpleType",
        }
    }

    fn accepts_integer(value: &str, min: i128, max: i128) -> bool {
        value.parse::<i128>().map(|v| v >= min && v <= max).unwrap_or(false)
    }

    pub(crate) fn accepts(&self, value: &str) -> bool {
        let trimmed = value.trim();
        match self {
            Builtin::String
            | Builtin::NormalizedString
            | Builtin::Token
            | Builtin::AnyUri
            | Builtin::AnySimple => true,
            Builtin::Boolean => matches!(trimmed, "true" | "false" | "1" | "0"),
            Builtin::Decimal => decimal_regex().is_match(trimmed),
            Builtin::Double | Builtin::Float => {
                matches!(trimmed, "INF" | "-INF" | "NaN") || trimmed.parse::<f64>().is_ok()
            }
            Builtin::Integer => Self::accepts_integer(trimmed, i128::MIN, i128::MAX),
            Builtin::Long => Self::accepts_integer(trimmed, i64::MIN as i128, i64::MAX as i128),
            Builtin::Int => Self::accepts_integer(trimmed, i32::MIN as i128, i32::MAX as i128),
            Builtin::Short => Self::accepts_integer(trimmed, i16::MIN as i128, i16::MAX as i128),
            Builtin::Byte => Self::accepts_integer(trimmed, i8::MIN as i128, i8::MAX as i128),
            Builtin::NonNegativeInteger => Self::accepts_integer(trimmed, 0, i128::MAX),
            Builtin::PositiveInteger => Self::accepts_integer(trimmed, 1, i128::MAX),
            Builtin::UnsignedLong => Self::accepts_integer(trimmed, 0, u64::MAX as i128),
            Builtin::UnsignedInt => Self::accepts_integer(trimmed, 0, u32::MAX as i128),
            Builtin::UnsignedShort => Self::accepts_integer(trimmed, 0, u16::MAX as i128),
            Builtin::UnsignedByte => Self::accepts_integer(trimmed, 0, u8::MAX as i128),
            Builtin::Date => date_regex().is_match(trimmed),
            Builtin::Time => time_regex().is_match(trimmed),
            Builtin::DateTime => date_time_regex().is_match(trimmed),
            Builtin::QNameType => qname_regex().is_match(trimmed),
        }
    }
}

/// A simple type: a built-in, optionally restricted by an enumeration.
#[derive(Debug, Clone, PartialEq)]
pub(crate) enum SimpleType {
    Builtin(Builtin),
    Enumeration { base: Builtin, values: Vec<String> },
}

impl SimpleType {
    pub(crate) fn accepts(&self, value: &str) -> bool {
        match self {
            SimpleType::Builtin(b) => b.accepts(value),
            SimpleType::Enumeration { base, values } => {
                base.accepts(value) && values.iter().any(|v| v == value.trim())
            }
        }
    }

    pub(crate) fn describe(&self) -> String {
        match self {
            SimpleType::Builtin(b) => b.name().to_string(),
            SimpleType::Enumeration { base, .. } => format!("enumeration of {}", base.name()),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Occurs {
    Bounded(u32),
    Unbounded,
}

impl Occurs {
    /// Whether one more repetition is allowed after `reps` so far.
    pub(crate) fn admits(&self, reps: u32) -> bool {
        match self {
            Occurs::Bounded(n) => reps < *n,
            Occurs::Unbounded => true,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Compositor {
    Sequence,
    Choice,
    All,
}

#[derive(Debug, Clone)]
pub(crate) enum Term {
    Element { name: QName, type_id: TypeId },
    /// An `xs:any` wildcard; matched content is skipped, not validated.
    Wildcard,
}

#[derive(Debug, Clone)]
pub(crate) struct Particle {
    pub term: Term,
    pub min: u32,
    pub max: Occurs,
}

#[derive(Debug, Clone)]
pub(crate) struct Group {
    pub compositor: Compositor,
    pub particles: Vec<Particle>,
}

#[derive(Debug, Clone)]
pub(crate) struct AttributeUse {
    pub name: QName,
    pub required: bool,
    pub ty: SimpleType,
}

#[derive(Debug, Clone)]
pub(crate) enum ContentModel {
    Empty,
    Group(Group),
}

#[derive(Debug, Clone)]
pub(crate) struct ComplexType {
    pub content: ContentModel,
    pub attributes: Vec<AttributeUse>,
    pub mixed: bool,
}

#[derive(Debug, Clone)]
pub(crate) enum TypeDef {
    Complex(ComplexType),
    Simple(SimpleType),
    /// `xs:anyType`: any well-formed content.
    Any,
}

#[derive(Debug, Clone)]
pub(crate) struct ElementDecl {
    pub name: QName,
    pub type_id: TypeId,
}

/// Immutable compiled schema, shared read-only across reads.
#[derive(Debug)]
pub struct SchemaGrammar {
    target_namespace: Option<String>,
    elements: HashMap<QName, ElementDecl>,
    types: Vec<TypeDef>,
}

impl SchemaGrammar {
    /// Compile a schema document pulled from `source`. The source is closed
    /// when compilation finishes, successfully or not.
    pub fn compile(source: SourceHandle) -> Result<SchemaGrammar> {
        let result = Self::compile_inner(source.clone());
        // Best effort close; a release failure must not mask a compile error.
        let close_result = source.close();
        let grammar = result?;
        close_result?;
        Ok(grammar)
    }

    /// Convenience for in-memory schema text.
    pub fn compile_bytes(xsd: &[u8]) -> Result<SchemaGrammar> {
        Self::compile(SourceHandle::new(std::io::Cursor::new(xsd.to_vec())))
    }

    /// Compile a schema from a local file.
    pub fn compile_file(path: &Path) -> Result<SchemaGrammar> {
        let file = std::fs::File::open(path)?;
        Self::compile(SourceHandle::new(file))
    }

    fn compile_inner(source: SourceHandle) -> Result<SchemaGrammar> {
        let cursor = TokenCursor::open(source).map_err(as_compile_error)?;
        let raw = RawSchema::parse(cursor)?;
        let grammar = Resolver::new(&raw).resolve(&raw)?;
        debug!(
            target_namespace = ?grammar.target_namespace,
            elements = grammar.elements.len(),
            "compiled schema grammar"
        );
        Ok(grammar)
    }

    pub fn target_namespace(&self) -> Option<&str> {
        self.target_namespace.as_deref()
    }

    /// Names of the global element declarations, for diagnostics.
    pub fn element_names(&self) -> Vec<QName> {
        self.elements.keys().cloned().collect()
    }

    pub(crate) fn global_element(&self, name: &QName) -> Option<&ElementDecl> {
        self.elements.get(name)
    }

    pub(crate) fn type_def(&self, id: TypeId) -> &TypeDef {
        &self.types[id]
    }
}

fn compile_error(details: impl Into<String>) -> ReadError {
    ReadError::SchemaCompile {
        details: details.into(),
    }
}

fn as_compile_error(err: ReadError) -> ReadError {
    compile_error(format!("schema document: {}", err))
}

// ---------------------------------------------------------------------------
// Raw (unresolved) schema model, straight off the token stream.
// ---------------------------------------------------------------------------

type RawQName = (Option<String>, String);

#[derive(Debug)]
struct RawElementDecl {
    name: Option<String>,
    ref_name: Option<RawQName>,
    type_name: Option<RawQName>,
    inline_complex: Option<RawComplex>,
    inline_simple: Option<RawSimple>,
    min: u32,
    max: Occurs,
}

impl RawElementDecl {
    fn empty() -> Self {
        Self {
            name: None,
            ref_name: None,
            type_name: None,
            inline_complex: None,
            inline_simple: None,
            min: 1,
            max: Occurs::Bounded(1),
        }
    }
}

#[derive(Debug)]
struct RawComplex {
    mixed: bool,
    group: Option<(Compositor, Vec<RawParticle>)>,
    attributes: Vec<RawAttribute>,
}

#[derive(Debug)]
enum RawParticle {
    Element(RawElementDecl),
    Wildcard { min: u32, max: Occurs },
}

#[derive(Debug)]
struct RawSimple {
    base: RawQName,
    enumerations: Vec<String>,
}

#[derive(Debug)]
struct RawAttribute {
    name: String,
    type_name: Option<RawQName>,
    inline_simple: Option<RawSimple>,
    required: bool,
}

#[derive(Debug)]
struct RawSchema {
    target_namespace: Option<String>,
    qualified_locals: bool,
    elements: Vec<RawElementDecl>,
    complex_types: Vec<(String, RawComplex)>,
    simple_types: Vec<(String, RawSimple)>,
}

/// Streaming parser for schema documents. Maintains its own prefix scope
/// stack (attribute values like `type="tns:Item"` are QNames, which the
/// tokenizer does not resolve).
struct SchemaDocParser {
    cursor: TokenCursor,
    scopes: Vec<Vec<NamespaceDecl>>,
}

enum Construct {
    Start { name: QName, attributes: Vec<Attribute> },
    End,
}

impl SchemaDocParser {
    /// Next start or end element, skipping whitespace text. Non-whitespace
    /// text inside a schema document is rejected.
    fn next_construct(&mut self) -> Result<Construct> {
        loop {
            match self.cursor.next_event().map_err(as_compile_error)? {
                TokenEvent::StartElement {
                    name,
                    attributes,
                    namespaces,
                } => {
                    self.scopes.push(namespaces);
                    return Ok(Construct::Start { name, attributes });
                }
                TokenEvent::EndElement { .. } => {
                    self.scopes.pop();
                    return Ok(Construct::End);
                }
                TokenEvent::Text { content } => {
                    if !content.trim().is_empty() {
                        return Err(compile_error(format!(
                            "unexpected text in schema document: '{}'",
                            content.trim()
                        )));
                    }
                }
                TokenEvent::EndDocument => {
                    return Err(compile_error("unexpected end of schema document"));
                }
            }
        }
    }

    /// Consume everything up to and including the end of the current element.
    fn skip_subtree(&mut self) -> Result<()> {
        let mut depth = 0usize;
        loop {
            match self.next_construct()? {
                Construct::Start { .. } => depth += 1,
                Construct::End => {
                    if depth == 0 {
                        return Ok(());
                    }
                    depth -= 1;
                }
            }
        }
    }

    /// Resolve a QName-valued attribute (e.g. `type="xs:string"`) against the
    /// in-scope prefix bindings of the schema document.
    fn resolve_value_qname(&self, raw: &str) -> Result<RawQName> {
        let raw = raw.trim();
        match raw.split_once(':') {
            Some((prefix, local)) => {
                for scope in self.scopes.iter().rev() {
                    for decl in scope.iter().rev() {
                        if decl.prefix.as_deref() == Some(prefix) {
                            return Ok((Some(decl.uri.clone()), local.to_string()));
                        }
                    }
                }
                Err(compile_error(format!(
                    "unbound prefix '{}' in reference '{}'",
                    prefix, raw
                )))
            }
            None => {
                for scope in self.scopes.iter().rev() {
                    for decl in scope.iter().rev() {
                        if decl.prefix.is_none() {
                            let ns = if decl.uri.is_empty() {
                                None
                            } else {
                                Some(decl.uri.clone())
                            };
                            return Ok((ns, raw.to_string()));
                        }
                    }
                }
                Ok((None, raw.to_string()))
            }
        }
    }
}

fn attr<'a>(attributes: &'a [Attribute], local: &str) -> Option<&'a str> {
    attributes
        .iter()
        .find(|a| a.name.namespace.is_none() && a.name.local == local)
        .map(|a| a.value.as_str())
}

fn is_xsd(name: &QName, local: &str) -> bool {
    name.namespace.as_deref() == Some(XSD_NAMESPACE) && name.local == local
}

fn parse_occurs(attributes: &[Attribute]) -> Result<(u32, Occurs)> {
    let min = match attr(attributes, "minOccurs") {
        Some(v) => v
            .parse::<u32>()
            .map_err(|_| compile_error(format!("invalid minOccurs '{}'", v)))?,
        None => 1,
    };
    let max = match attr(attributes, "maxOccurs") {
        Some("unbounded") => Occurs::Unbounded,
        Some(v) => Occurs::Bounded(
            v.parse::<u32>()
                .map_err(|_| compile_error(format!("invalid maxOccurs '{}'", v)))?,
        ),
        None => Occurs::Bounded(1),
    };
    if let Occurs::Bounded(n) = max {
        if n < min {
            return Err(compile_error(format!(
                "maxOccurs {} is less than minOccurs {}",
                n, min
            )));
        }
    }
    Ok((min, max))
}

impl RawSchema {
    fn parse(cursor: TokenCursor) -> Result<RawSchema> {
        let mut parser = SchemaDocParser {
            cursor,
            scopes: Vec::new(),
        };

        let (name, attributes) = match parser.next_construct()? {
            Construct::Start { name, attributes } => (name, attributes),
            Construct::End => return Err(compile_error("empty schema document")),
        };
        if !is_xsd(&name, "schema") {
            return Err(compile_error(format!(
                "document element is {}, expected {{{}}}schema",
                name, XSD_NAMESPACE
            )));
        }

        let target_namespace = attr(&attributes, "targetNamespace").map(str::to_string);
        let qualified_locals = attr(&attributes, "elementFormDefault") == Some("qualified");

        let mut schema = RawSchema {
            target_namespace,
            qualified_locals,
            elements: Vec::new(),
            complex_types: Vec::new(),
            simple_types: Vec::new(),
        };

        loop {
            match parser.next_construct()? {
                Construct::End => break,
                Construct::Start { name, attributes } => {
                    if is_xsd(&name, "element") {
                        let decl = Self::parse_element(&mut parser, &attributes, false)?;
                        schema.elements.push(decl);
                    } else if is_xsd(&name, "complexType") {
                        let type_name = attr(&attributes, "name")
                            .ok_or_else(|| compile_error("top-level complexType without a name"))?
                            .to_string();
                        let complex = Self::parse_complex(&mut parser, &attributes)?;
                        schema.complex_types.push((type_name, complex));
                    } else if is_xsd(&name, "simpleType") {
                        let type_name = attr(&attributes, "name")
                            .ok_or_else(|| compile_error("top-level simpleType without a name"))?
                            .to_string();
                        let simple = Self::parse_simple(&mut parser)?;
                        schema.simple_types.push((type_name, simple));
                    } else if is_xsd(&name, "annotation") {
                        parser.skip_subtree()?;
                    } else if is_xsd(&name, "import") || is_xsd(&name, "include") {
                        return Err(compile_error(format!(
                            "xs:{} is not supported; compile a self-contained schema",
                            name.local
                        )));
                    } else {
                        return Err(compile_error(format!(
                            "unsupported schema construct {}",
                            name
                        )));
                    }
                }
            }
        }
        Ok(schema)
    }

    fn parse_element(
        parser: &mut SchemaDocParser,
        attributes: &[Attribute],
        local: bool,
    ) -> Result<RawElementDecl> {
        let mut decl = RawElementDecl::empty();
        decl.name = attr(attributes, "name").map(str::to_string);
        if let Some(raw_ref) = attr(attributes, "ref") {
            if !local {
                return Err(compile_error("top-level element cannot use 'ref'"));
            }
            decl.ref_name = Some(parser.resolve_value_qname(raw_ref)?);
        }
        if decl.name.is_none() && decl.ref_name.is_none() {
            return Err(compile_error("element needs either 'name' or 'ref'"));
        }
        if let Some(raw_type) = attr(attributes, "type") {
            decl.type_name = Some(parser.resolve_value_qname(raw_type)?);
        }
        if local {
            let (min, max) = parse_occurs(attributes)?;
            decl.min = min;
            decl.max = max;
        }

        loop {
            match parser.next_construct()? {
                Construct::End => break,
                Construct::Start { name, attributes } => {
                    if is_xsd(&name, "complexType") {
                        decl.inline_complex = Some(Self::parse_complex(parser, &attributes)?);
                    } else if is_xsd(&name, "simpleType") {
                        decl.inline_simple = Some(Self::parse_simple(parser)?);
                    } else if is_xsd(&name, "annotation") {
                        parser.skip_subtree()?;
                    } else {
                        return Err(compile_error(format!(
                            "unsupported construct {} inside xs:element",
                            name
                        )));
                    }
                }
            }
        }

        if decl.type_name.is_some() && (decl.inline_complex.is_some() || decl.inline_simple.is_some())
        {
            return Err(compile_error(
                "element has both a 'type' reference and an inline type",
            ));
        }
        Ok(decl)
    }

    fn parse_complex(
        parser: &mut SchemaDocParser,
        attributes: &[Attribute],
    ) -> Result<RawComplex> {
        let mut complex = RawComplex {
            mixed: attr(attributes, "mixed") == Some("true"),
            group: None,
            attributes: Vec::new(),
        };

        loop {
            match parser.next_construct()? {
                Construct::End => break,
                Construct::Start { name, attributes } => {
                    let compositor = if is_xsd(&name, "sequence") {
                        Some(Compositor::Sequence)
                    } else if is_xsd(&name, "choice") {
                        Some(Compositor::Choice)
                    } else if is_xsd(&name, "all") {
                        Some(Compositor::All)
                    } else {
                        None
                    };
                    if let Some(compositor) = compositor {
                        if complex.group.is_some() {
                            return Err(compile_error("complexType with two model groups"));
                        }
                        if attr(&attributes, "minOccurs").is_some()
                            || attr(&attributes, "maxOccurs").is_some()
                        {
                            return Err(compile_error(
                                "occurrence bounds on a model group are not supported",
                            ));
                        }
                        let particles = Self::parse_group(parser)?;
                        complex.group = Some((compositor, particles));
                    } else if is_xsd(&name, "attribute") {
                        complex
                            .attributes
                            .push(Self::parse_attribute(parser, &attributes)?);
                    } else if is_xsd(&name, "annotation") {
                        parser.skip_subtree()?;
                    } else if is_xsd(&name, "simpleContent") || is_xsd(&name, "complexContent") {
                        return Err(compile_error(format!(
                            "xs:{} is not supported",
                            name.local
                        )));
                    } else {
                        return Err(compile_error(format!(
                            "unsupported construct {} inside xs:complexType",
                            name
                        )));
                    }
                }
            }
        }
        Ok(complex)
    }

    fn parse_group(parser: &mut SchemaDocParser) -> Result<Vec<RawParticle>> {
        let mut particles = Vec::new();
        loop {
            match parser.next_construct()? {
                Construct::End => break,
                Construct::Start { name, attributes } => {
                    if is_xsd(&name, "element") {
                        particles.push(RawParticle::Element(Self::parse_element(
                            parser,
                            &attributes,
                            true,
                        )?));
                    } else if is_xsd(&name, "any") {
                        let (min, max) = parse_occurs(&attributes)?;
                        parser.skip_subtree()?;
                        particles.push(RawParticle::Wildcard { min, max });
                    } else if is_xsd(&name, "annotation") {
                        parser.skip_subtree()?;
                    } else if is_xsd(&name, "sequence")
                        || is_xsd(&name, "choice")
                        || is_xsd(&name, "all")
                    {
                        return Err(compile_error("nested model groups are not supported"));
                    } else {
                        return Err(compile_error(format!(
                            "unsupported construct {} inside a model group",
                            name
                        )));
                    }
                }
            }
        }
        Ok(particles)
    }

    fn parse_simple(parser: &mut SchemaDocParser) -> Result<RawSimple> {
        let mut simple: Option<RawSimple> = None;
        loop {
            match parser.next_construct()? {
                Construct::End => break,
                Construct::Start { name, attributes } => {
                    if is_xsd(&name, "restriction") {
                        let base_raw = attr(&attributes, "base")
                            .ok_or_else(|| compile_error("xs:restriction without a base"))?;
                        let base = parser.resolve_value_qname(base_raw)?;
                        let mut enumerations = Vec::new();
                        loop {
                            match parser.next_construct()? {
                                Construct::End => break,
                                Construct::Start { name, attributes } => {
                                    if is_xsd(&name, "enumeration") {
                                        let value = attr(&attributes, "value").ok_or_else(|| {
                                            compile_error("xs:enumeration without a value")
                                        })?;
                                        enumerations.push(value.to_string());
                                        parser.skip_subtree()?;
                                    } else if is_xsd(&name, "annotation")
                                        || is_xsd(&name, "whiteSpace")
                                    {
                                        parser.skip_subtree()?;
                                    } else {
                                        return Err(compile_error(format!(
                                            "unsupported facet {} (only xs:enumeration is modeled)",
                                            name
                                        )));
                                    }
                                }
                            }
                        }
                        simple = Some(RawSimple { base, enumerations });
                    } else if is_xsd(&name, "annotation") {
                        parser.skip_subtree()?;
                    } else if is_xsd(&name, "list") || is_xsd(&name, "union") {
                        return Err(compile_error(format!(
                            "xs:{} simple types are not supported",
                            name.local
                        )));
                    } else {
                        return Err(compile_error(format!(
                            "unsupported construct {} inside xs:simpleType",
                            name
                        )));
                    }
                }
            }
        }
        simple.ok_or_else(|| compile_error("simpleType without a restriction"))
    }

    fn parse_attribute(
        parser: &mut SchemaDocParser,
        attributes: &[Attribute],
    ) -> Result<RawAttribute> {
        let name = attr(attributes, "name")
            .ok_or_else(|| compile_error("xs:attribute without a name"))?
            .to_string();
        let type_name = match attr(attributes, "type") {
            Some(raw) => Some(parser.resolve_value_qname(raw)?),
            None => None,
        };
        let required = attr(attributes, "use") == Some("required");

        let mut inline_simple = None;
        loop {
            match parser.next_construct()? {
                Construct::End => break,
                Construct::Start { name, .. } => {
                    if is_xsd(&name, "simpleType") {
                        inline_simple = Some(Self::parse_simple(parser)?);
                    } else if is_xsd(&name, "annotation") {
                        parser.skip_subtree()?;
                    } else {
                        return Err(compile_error(format!(
                            "unsupported construct {} inside xs:attribute",
                            name
                        )));
                    }
                }
            }
        }
        Ok(RawAttribute {
            name,
            type_name,
            inline_simple,
            required,
        })
    }
}

// ---------------------------------------------------------------------------
// Resolution: raw model -> arena of TypeDefs + element table.
// ---------------------------------------------------------------------------

struct Resolver {
    target_namespace: Option<String>,
    qualified_locals: bool,
    types: Vec<TypeDef>,
    named_types: HashMap<String, TypeId>,
    any_type: TypeId,
    elements: HashMap<QName, ElementDecl>,
}

impl Resolver {
    fn new(raw: &RawSchema) -> Resolver {
        let mut types = vec![TypeDef::Any];
        let any_type = 0;
        let mut named_types = HashMap::new();
        for (name, _) in &raw.complex_types {
            named_types.insert(name.clone(), reserve(&mut types));
        }
        for (name, _) in &raw.simple_types {
            named_types.insert(name.clone(), reserve(&mut types));
        }
        Resolver {
            target_namespace: raw.target_namespace.clone(),
            qualified_locals: raw.qualified_locals,
            types,
            named_types,
            any_type,
            elements: HashMap::new(),
        }
    }

    fn resolve(mut self, raw: &RawSchema) -> Result<SchemaGrammar> {
        // Register global element names first so that `ref` can point forward.
        let mut global_slots = Vec::new();
        for decl in &raw.elements {
            let local = decl
                .name
                .clone()
                .ok_or_else(|| compile_error("top-level element without a name"))?;
            let name = self.global_name(&local);
            let type_id = match &decl.type_name {
                Some(reference) => self.resolve_type_ref(reference)?,
                None if decl.inline_complex.is_some() || decl.inline_simple.is_some() => {
                    reserve(&mut self.types)
                }
                None => self.any_type,
            };
            if self
                .elements
                .insert(name.clone(), ElementDecl {
                    name: name.clone(),
                    type_id,
                })
                .is_some()
            {
                return Err(compile_error(format!(
                    "duplicate global element {}",
                    name
                )));
            }
            global_slots.push((decl, type_id));
        }

        // Fill named simple types first (complex-type attribute uses refer to
        // them). They may reference each other forward, so iterate to a fixed
        // point; a round without progress means a broken or cyclic reference.
        let mut pending: Vec<&(String, RawSimple)> = raw.simple_types.iter().collect();
        while !pending.is_empty() {
            let mut deferred = Vec::new();
            let mut last_error = None;
            let round_size = pending.len();
            for entry in pending {
                let (type_name, simple) = entry;
                let id = self.named_types[type_name];
                match self.compile_simple(simple) {
                    Ok(compiled) => self.types[id] = TypeDef::Simple(compiled),
                    Err(e) => {
                        last_error = Some(e);
                        deferred.push(entry);
                    }
                }
            }
            if deferred.len() == round_size {
                return Err(last_error.unwrap_or_else(|| {
                    compile_error("unresolvable simple type references")
                }));
            }
            pending = deferred;
        }

        // Fill named complex type bodies.
        for (type_name, complex) in &raw.complex_types {
            let id = self.named_types[type_name];
            let compiled = self.compile_complex(complex)?;
            self.types[id] = TypeDef::Complex(compiled);
        }

        // Fill inline types of global elements.
        for (decl, type_id) in global_slots {
            if let Some(complex) = &decl.inline_complex {
                let compiled = self.compile_complex(complex)?;
                self.types[type_id] = TypeDef::Complex(compiled);
            } else if let Some(simple) = &decl.inline_simple {
                let compiled = self.compile_simple(simple)?;
                self.types[type_id] = TypeDef::Simple(compiled);
            }
        }

        Ok(SchemaGrammar {
            target_namespace: self.target_namespace,
            elements: self.elements,
            types: self.types,
        })
    }

    fn global_name(&self, local: &str) -> QName {
        match &self.target_namespace {
            Some(ns) => QName::new(ns.clone(), local),
            None => QName::unqualified(local),
        }
    }

    fn local_name(&self, local: &str) -> QName {
        if self.qualified_locals {
            self.global_name(local)
        } else {
            QName::unqualified(local)
        }
    }

    /// Resolve a `type="..."` reference to a type id.
    fn resolve_type_ref(&mut self, reference: &RawQName) -> Result<TypeId> {
        let (ns, local) = reference;
        if ns.as_deref() == Some(XSD_NAMESPACE) {
            if local == "anyType" {
                return Ok(self.any_type);
            }
            let builtin = Builtin::from_local(local).ok_or_else(|| {
                compile_error(format!("unknown built-in type xs:{}", local))
            })?;
            self.types.push(TypeDef::Simple(SimpleType::Builtin(builtin)));
            return Ok(self.types.len() - 1);
        }
        let is_local_ref = ns.is_none() || ns == &self.target_namespace;
        if is_local_ref {
            if let Some(id) = self.named_types.get(local.as_str()) {
                return Ok(*id);
            }
        }
        Err(compile_error(format!(
            "reference to undeclared type {}",
            display_raw(reference)
        )))
    }

    fn resolve_simple_ref(&mut self, reference: &RawQName) -> Result<SimpleType> {
        let id = self.resolve_type_ref(reference)?;
        match &self.types[id] {
            TypeDef::Simple(simple) => Ok(simple.clone()),
            _ => Err(compile_error(format!(
                "{} is not a simple type",
                display_raw(reference)
            ))),
        }
    }

    fn compile_complex(&mut self, raw: &RawComplex) -> Result<ComplexType> {
        let content = match &raw.group {
            None => ContentModel::Empty,
            Some((compositor, raw_particles)) => {
                let mut particles = Vec::with_capacity(raw_particles.len());
                for particle in raw_particles {
                    particles.push(self.compile_particle(particle, *compositor)?);
                }
                ContentModel::Group(Group {
                    compositor: *compositor,
                    particles,
                })
            }
        };
        let mut attributes = Vec::with_capacity(raw.attributes.len());
        for attribute in &raw.attributes {
            attributes.push(self.compile_attribute(attribute)?);
        }
        Ok(ComplexType {
            content,
            attributes,
            mixed: raw.mixed,
        })
    }

    fn compile_particle(
        &mut self,
        raw: &RawParticle,
        compositor: Compositor,
    ) -> Result<Particle> {
        match raw {
            RawParticle::Wildcard { min, max } => Ok(Particle {
                term: Term::Wildcard,
                min: *min,
                max: *max,
            }),
            RawParticle::Element(decl) => {
                if compositor == Compositor::All {
                    if let Occurs::Bounded(n) = decl.max {
                        if n > 1 {
                            return Err(compile_error(
                                "maxOccurs > 1 inside xs:all is not supported",
                            ));
                        }
                    } else {
                        return Err(compile_error(
                            "maxOccurs > 1 inside xs:all is not supported",
                        ));
                    }
                }
                let (name, type_id) = if let Some(reference) = &decl.ref_name {
                    let referenced = self.resolve_element_ref(reference)?;
                    (referenced.name.clone(), referenced.type_id)
                } else {
                    let local = decl
                        .name
                        .clone()
                        .ok_or_else(|| compile_error("local element without a name"))?;
                    let type_id = match &decl.type_name {
                        Some(reference) => self.resolve_type_ref(reference)?,
                        None => {
                            if let Some(complex) = &decl.inline_complex {
                                let compiled = self.compile_complex(complex)?;
                                self.types.push(TypeDef::Complex(compiled));
                                self.types.len() - 1
                            } else if let Some(simple) = &decl.inline_simple {
                                let compiled = self.compile_simple(simple)?;
                                self.types.push(TypeDef::Simple(compiled));
                                self.types.len() - 1
                            } else {
                                self.any_type
                            }
                        }
                    };
                    (self.local_name(&local), type_id)
                };
                Ok(Particle {
                    term: Term::Element { name, type_id },
                    min: decl.min,
                    max: decl.max,
                })
            }
        }
    }

    fn resolve_element_ref(&self, reference: &RawQName) -> Result<&ElementDecl> {
        let (ns, local) = reference;
        let name = match ns {
            Some(ns) => QName::new(ns.clone(), local.clone()),
            None => match &self.target_namespace {
                Some(target) => QName::new(target.clone(), local.clone()),
                None => QName::unqualified(local.clone()),
            },
        };
        self.elements.get(&name).ok_or_else(|| {
            compile_error(format!("reference to undeclared element {}", name))
        })
    }

    fn compile_attribute(&mut self, raw: &RawAttribute) -> Result<AttributeUse> {
        let ty = match (&raw.type_name, &raw.inline_simple) {
            (Some(reference), None) => self.resolve_simple_ref(reference)?,
            (None, Some(inline)) => self.compile_simple(inline)?,
            (None, None) => SimpleType::Builtin(Builtin::AnySimple),
            (Some(_), Some(_)) => {
                return Err(compile_error(
                    "attribute has both a 'type' reference and an inline type",
                ));
            }
        };
        Ok(AttributeUse {
            name: QName::unqualified(raw.name.clone()),
            required: raw.required,
            ty,
        })
    }

    fn compile_simple(&mut self, raw: &RawSimple) -> Result<SimpleType> {
        let base = match self.resolve_simple_ref(&raw.base)? {
            SimpleType::Builtin(b) => b,
            SimpleType::Enumeration { base, .. } => base,
        };
        if raw.enumerations.is_empty() {
            Ok(SimpleType::Builtin(base))
        } else {
            Ok(SimpleType::Enumeration {
                base,
                values: raw.enumerations.clone(),
            })
        }
    }
}

fn reserve(types: &mut Vec<TypeDef>) -> TypeId {
    types.push(TypeDef::Any);
    types.len() - 1
}

fn display_raw(reference: &RawQName) -> String {
    match &reference.0 {
        Some(ns) => format!("{{{}}}{}", ns, reference.1),
        None => reference.1.clone(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const ORDER_SCHEMA: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<xs:schema xmlns:xs="http://www.w3.org/2001/XMLSchema"
           xmlns:tns="http://example.com/orders"
           targetNamespace="http://example.com/orders"
           elementFormDefault="qualified">
    <xs:element name="order" type="tns:OrderType"/>
    <xs:complexType name="OrderType">
        <xs:sequence>
            <xs:element name="id" type="xs:int"/>
            <xs:element name="note" type="xs:string" minOccurs="0"/>
            <xs:element name="item" type="tns:ItemType" maxOccurs="unbounded"/>
        </xs:sequence>
        <xs:attribute name="priority" type="xs:int" use="required"/>
    </xs:complexType>
    <xs:complexType name="ItemType">
        <xs:sequence>
            <xs:element name="sku" type="tns:Sku"/>
        </xs:sequence>
    </xs:complexType>
    <xs:simpleType name="Sku">
        <xs:restriction base="xs:string">
            <xs:enumeration value="widget"/>
            <xs:enumeration value="gadget"/>
        </xs:restriction>
    </xs:simpleType>
</xs:schema>"#;

    #[test]
    fn test_compile_order_schema() {
        let grammar = SchemaGrammar::compile_bytes(ORDER_SCHEMA.as_bytes()).unwrap();

        assert_eq!(grammar.target_namespace(), Some("http://example.com/orders"));
        let root = grammar
            .global_element(&QName::new("http://example.com/orders", "order"))
            .expect("order declared");
        match grammar.type_def(root.type_id) {
            TypeDef::Complex(complex) => {
                assert!(!complex.mixed);
                assert_eq!(complex.attributes.len(), 1);
                assert!(complex.attributes[0].required);
                match &complex.content {
                    ContentModel::Group(group) => {
                        assert_eq!(group.compositor, Compositor::Sequence);
                        assert_eq!(group.particles.len(), 3);
                        assert_eq!(group.particles[1].min, 0);
                        assert_eq!(group.particles[2].max, Occurs::Unbounded);
                    }
                    other => panic!("expected group content, got {:?}", other),
                }
            }
            other => panic!("expected complex type, got {:?}", other),
        }
    }

    #[test]
    fn test_inline_types_and_default_form() {
        let xsd = r#"<xs:schema xmlns:xs="http://www.w3.org/2001/XMLSchema">
            <xs:element name="root">
                <xs:complexType>
                    <xs:sequence>
                        <xs:element name="element" type="xs:string"/>
                    </xs:sequence>
                </xs:complexType>
            </xs:element>
        </xs:schema>"#;

        let grammar = SchemaGrammar::compile_bytes(xsd.as_bytes()).unwrap();
        let root = grammar
            .global_element(&QName::unqualified("root"))
            .expect("root declared");
        match grammar.type_def(root.type_id) {
            TypeDef::Complex(complex) => match &complex.content {
                ContentModel::Group(group) => match &group.particles[0].term {
                    Term::Element { name, .. } => {
                        // elementFormDefault defaults to unqualified.
                        assert_eq!(name, &QName::unqualified("element"));
                    }
                    other => panic!("expected element term, got {:?}", other),
                },
                other => panic!("expected group content, got {:?}", other),
            },
            other => panic!("expected complex type, got {:?}", other),
        }
    }

    #[test]
    fn test_element_ref_resolution() {
        let xsd = r#"<xs:schema xmlns:xs="http://www.w3.org/2001/XMLSchema">
            <xs:element name="wrapper">
                <xs:complexType>
                    <xs:sequence>
                        <xs:element ref="leaf" maxOccurs="unbounded"/>
                    </xs:sequence>
                </xs:complexType>
            </xs:element>
            <xs:element name="leaf" type="xs:string"/>
        </xs:schema>"#;

        let grammar = SchemaGrammar::compile_bytes(xsd.as_bytes()).unwrap();
        assert!(grammar.global_element(&QName::unqualified("leaf")).is_some());
        assert!(grammar.global_element(&QName::unqualified("wrapper")).is_some());
    }

    #[test]
    fn test_undeclared_type_reference_fails() {
        let xsd = r#"<xs:schema xmlns:xs="http://www.w3.org/2001/XMLSchema">
            <xs:element name="root" type="Missing"/>
        </xs:schema>"#;

        let err = SchemaGrammar::compile_bytes(xsd.as_bytes()).unwrap_err();
        match err {
            ReadError::SchemaCompile { details } => {
                assert!(details.contains("undeclared type"));
            }
            other => panic!("expected SchemaCompile, got {:?}", other),
        }
    }

    #[test]
    fn test_unsupported_construct_fails() {
        let xsd = r#"<xs:schema xmlns:xs="http://www.w3.org/2001/XMLSchema">
            <xs:import namespace="urn:other" schemaLocation="other.xsd"/>
        </xs:schema>"#;

        assert!(matches!(
            SchemaGrammar::compile_bytes(xsd.as_bytes()).unwrap_err(),
            ReadError::SchemaCompile { .. }
        ));
    }

    #[test]
    fn test_malformed_schema_document_fails_compile() {
        let err = SchemaGrammar::compile_bytes(b"<xs:schema").unwrap_err();
        assert!(matches!(err, ReadError::SchemaCompile { .. }));
    }

    #[test]
    fn test_builtin_value_spaces() {
        assert!(Builtin::Boolean.accepts(" true "));
        assert!(Builtin::Boolean.accepts("0"));
        assert!(!Builtin::Boolean.accepts("yes"));

        assert!(Builtin::Int.accepts("-42"));
        assert!(!Builtin::Int.accepts("2147483648"));
        assert!(Builtin::Long.accepts("2147483648"));
        assert!(!Builtin::Int.accepts("4.2"));

        assert!(Builtin::NonNegativeInteger.accepts("0"));
        assert!(!Builtin::NonNegativeInteger.accepts("-1"));
        assert!(!Builtin::PositiveInteger.accepts("0"));

        assert!(Builtin::Decimal.accepts("3.14"));
        assert!(Builtin::Decimal.accepts("-.5"));
        assert!(!Builtin::Decimal.accepts("1e3"));
        assert!(Builtin::Double.accepts("1e3"));
        assert!(Builtin::Double.accepts("INF"));

        assert!(Builtin::Date.accepts("2024-02-29"));
        assert!(Builtin::Date.accepts("2024-02-29Z"));
        assert!(!Builtin::Date.accepts("02/29/2024"));
        assert!(Builtin::DateTime.accepts("2024-02-29T12:30:00Z"));
        assert!(Builtin::Time.accepts("12:30:00.5"));

        assert!(Builtin::QNameType.accepts("ns:dummy"));
        assert!(!Builtin::QNameType.accepts("not a qname"));
    }

    #[test]
    fn test_enumeration_accepts() {
        let sku = SimpleType::Enumeration {
            base: Builtin::String,
            values: vec!["widget".to_string(), "gadget".to_string()],
        };
        assert!(sku.accepts("widget"));
        assert!(sku.accepts(" gadget "));
        assert!(!sku.accepts("gizmo"));
        assert_eq!(sku.describe(), "enumeration of xs:string");
    }
}
