//! Pull-based XML token cursor.
//!
//! [`TokenCursor`] produces structural events one at a time from a byte
//! source: start tags, end tags, character data, end of document. Namespace
//! prefixes are resolved to expanded [`QName`]s before events are surfaced.
//! Comments, processing instructions and DOCTYPE declarations are consumed
//! and skipped. A well-formedness failure poisons the cursor; no further
//! events can be pulled afterwards.

use std::collections::{HashSet, VecDeque};
use std::io::Read;

use memchr::{memchr, memchr2, memchr_iter};
use tracing::trace;

use crate::error::{Location, ReadError, Result};
use crate::name::{QName, XML_NAMESPACE};
use crate::source::{EventCursor, SourceHandle};

const READ_CHUNK: usize = 8 * 1024;
const COMPACT_THRESHOLD: usize = 64 * 1024;

/// A resolved attribute on a start tag. Namespace declarations are not
/// attributes; they surface in [`TokenEvent::StartElement::namespaces`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Attribute {
    pub name: QName,
    pub value: String,
}

/// One `xmlns` / `xmlns:prefix` declaration on a start tag.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NamespaceDecl {
    pub prefix: Option<String>,
    pub uri: String,
}

/// One structural event pulled from the document.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TokenEvent {
    StartElement {
        name: QName,
        attributes: Vec<Attribute>,
        namespaces: Vec<NamespaceDecl>,
    },
    EndElement {
        name: QName,
    },
    Text {
        content: String,
    },
    /// Terminal event. Pulling again after this returns it again.
    EndDocument,
}

fn is_name_start(b: u8) -> bool {
    b.is_ascii_alphabetic() || b == b'_' || b >= 0x80
}

fn is_name_char(b: u8) -> bool {
    is_name_start(b) || b.is_ascii_digit() || matches!(b, b'-' | b'.' | b':')
}

/// Expand a built-in entity or character reference (the text between `&`
/// and `;`).
fn expand_reference(raw: &str) -> Option<char> {
    match raw {
        "amp" => Some('&'),
        "lt" => Some('<'),
        "gt" => Some('>'),
        "apos" => Some('\''),
        "quot" => Some('"'),
        _ => {
            if let Some(hex) = raw.strip_prefix("#x").or_else(|| raw.strip_prefix("#X")) {
                u32::from_str_radix(hex, 16).ok().and_then(char::from_u32)
            } else if let Some(dec) = raw.strip_prefix('#') {
                dec.parse::<u32>().ok().and_then(char::from_u32)
            } else {
                None
            }
        }
    }
}

/// Buffered byte scanner with line/column tracking.
#[derive(Debug)]
struct ByteScanner {
    source: SourceHandle,
    buf: Vec<u8>,
    pos: usize,
    eof: bool,
    line: u64,
    column: u64,
}

impl ByteScanner {
    fn new(source: SourceHandle) -> Self {
        Self {
            source,
            buf: Vec::new(),
            pos: 0,
            eof: false,
            line: 1,
            column: 1,
        }
    }

    fn location(&self) -> Location {
        Location::new(self.line, self.column)
    }

    fn malformed_here(&self, details: impl Into<String>) -> ReadError {
        ReadError::malformed(self.location(), details)
    }

    /// Drop already-consumed bytes. Only safe between constructs: helpers
    /// hold indexes into `buf` while scanning.
    fn compact(&mut self) {
        if self.pos >= COMPACT_THRESHOLD {
            self.buf.drain(..self.pos);
            self.pos = 0;
        }
    }

    /// Pull one more chunk from the source. Returns false at end of stream.
    fn fill(&mut self) -> Result<bool> {
        if self.eof {
            return Ok(false);
        }
        let mut chunk = [0u8; READ_CHUNK];
        let n = self.source.read(&mut chunk)?;
        if n == 0 {
            self.eof = true;
            Ok(false)
        } else {
            self.buf.extend_from_slice(&chunk[..n]);
            Ok(true)
        }
    }

    fn peek(&mut self) -> Result<Option<u8>> {
        while self.pos >= self.buf.len() {
            if !self.fill()? {
                return Ok(None);
            }
        }
        Ok(Some(self.buf[self.pos]))
    }

    /// Consume `n` buffered bytes, updating line/column.
    fn advance(&mut self, n: usize) {
        let slice = &self.buf[self.pos..self.pos + n];
        let mut newlines = 0u64;
        let mut last = None;
        for i in memchr_iter(b'\n', slice) {
            newlines += 1;
            last = Some(i);
        }
        match last {
            Some(i) => {
                self.line += newlines;
                self.column = (n - i) as u64;
            }
            None => self.column += n as u64,
        }
        self.pos += n;
    }

    fn skip_whitespace(&mut self) -> Result<()> {
        while let Some(b) = self.peek()? {
            if b.is_ascii_whitespace() {
                self.advance(1);
            } else {
                break;
            }
        }
        Ok(())
    }

    /// Consume `pat` if the stream starts with it.
    fn try_consume(&mut self, pat: &[u8]) -> Result<bool> {
        while self.buf.len() - self.pos < pat.len() {
            if !self.fill()? {
                return Ok(false);
            }
        }
        if &self.buf[self.pos..self.pos + pat.len()] == pat {
            self.advance(pat.len());
            Ok(true)
        } else {
            Ok(false)
        }
    }

    fn consume_expect(&mut self, pat: &[u8], what: &str) -> Result<()> {
        if self.try_consume(pat)? {
            Ok(())
        } else {
            Err(self.malformed_here(format!("expected {}", what)))
        }
    }

    /// Bytes up to (not including) `delim`. The delimiter is left unconsumed.
    fn take_until_byte(&mut self, delim: u8, what: &str) -> Result<Vec<u8>> {
        let mut out = Vec::new();
        loop {
            if self.pos >= self.buf.len() && !self.fill()? {
                return Err(self.malformed_here(format!("unexpected end of stream in {}", what)));
            }
            match memchr(delim, &self.buf[self.pos..]) {
                Some(rel) => {
                    out.extend_from_slice(&self.buf[self.pos..self.pos + rel]);
                    self.advance(rel);
                    return Ok(out);
                }
                None => {
                    let end = self.buf.len();
                    out.extend_from_slice(&self.buf[self.pos..end]);
                    self.advance(end - self.pos);
                }
            }
        }
    }

    /// Bytes up to the first of two delimiters; returns which one stopped the
    /// scan, or `None` at end of stream. The delimiter is left unconsumed.
    fn take_until_either(&mut self, a: u8, b: u8) -> Result<(Vec<u8>, Option<u8>)> {
        let mut out = Vec::new();
        loop {
            if self.pos >= self.buf.len() && !self.fill()? {
                return Ok((out, None));
            }
            match memchr2(a, b, &self.buf[self.pos..]) {
                Some(rel) => {
                    let delim = self.buf[self.pos + rel];
                    out.extend_from_slice(&self.buf[self.pos..self.pos + rel]);
                    self.advance(rel);
                    return Ok((out, Some(delim)));
                }
                None => {
                    let end = self.buf.len();
                    out.extend_from_slice(&self.buf[self.pos..end]);
                    self.advance(end - self.pos);
                }
            }
        }
    }

    /// Bytes up to a multi-byte terminator, consuming the terminator.
    fn take_until_seq(&mut self, seq: &[u8], what: &str) -> Result<Vec<u8>> {
        let mut out = Vec::new();
        loop {
            if self.pos >= self.buf.len() && !self.fill()? {
                return Err(self.malformed_here(format!("unexpected end of stream in {}", what)));
            }
            let mut search_from = self.pos;
            loop {
                match memchr(seq[0], &self.buf[search_from..]) {
                    Some(rel) => {
                        let cand = search_from + rel;
                        while self.buf.len() - cand < seq.len() && self.fill()? {}
                        if self.buf.len() - cand < seq.len() {
                            return Err(self.malformed_here(format!(
                                "unexpected end of stream in {}",
                                what
                            )));
                        }
                        if &self.buf[cand..cand + seq.len()] == seq {
                            out.extend_from_slice(&self.buf[self.pos..cand]);
                            self.advance(cand - self.pos);
                            self.advance(seq.len());
                            return Ok(out);
                        }
                        search_from = cand + 1;
                    }
                    None => {
                        let end = self.buf.len();
                        out.extend_from_slice(&self.buf[self.pos..end]);
                        self.advance(end - self.pos);
                        break;
                    }
                }
            }
        }
    }

    /// Read a (possibly prefixed) XML name.
    fn read_name(&mut self) -> Result<String> {
        match self.peek()? {
            Some(b) if is_name_start(b) => {}
            _ => return Err(self.malformed_here("expected a name")),
        }
        let mut out = Vec::new();
        while let Some(b) = self.peek()? {
            if is_name_char(b) {
                out.push(b);
                self.advance(1);
            } else {
                break;
            }
        }
        String::from_utf8(out).map_err(|_| self.malformed_here("invalid UTF-8 in name"))
    }

    fn release(&mut self) {
        self.buf = Vec::new();
        self.pos = 0;
        self.eof = true;
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CursorState {
    /// Before the document element.
    Prolog,
    /// Inside the document element.
    Content,
    /// After the document element closed.
    Epilog,
    /// EndDocument delivered.
    Done,
}

#[derive(Debug)]
struct OpenElement {
    raw: String,
    name: QName,
}

/// Stateful pull cursor over one byte source. Restartable only by opening a
/// fresh instance over a fresh source.
#[derive(Debug)]
pub struct TokenCursor {
    scanner: ByteScanner,
    origin: SourceHandle,
    state: CursorState,
    open: Vec<OpenElement>,
    scopes: Vec<Vec<NamespaceDecl>>,
    pending: VecDeque<TokenEvent>,
    event_location: Location,
    poisoned: bool,
    closed: bool,
}

impl TokenCursor {
    /// Open a cursor over a byte source. Fails when the stream does not begin
    /// with a recognizable document prefix (optional BOM, whitespace, then
    /// markup). An entirely empty stream is accepted; the first event is then
    /// `EndDocument`.
    pub fn open(source: SourceHandle) -> Result<Self> {
        let mut scanner = ByteScanner::new(source.clone());
        scanner.try_consume(&[0xEF, 0xBB, 0xBF])?;
        scanner.skip_whitespace()?;
        match scanner.peek()? {
            None | Some(b'<') => {}
            Some(other) => {
                return Err(scanner.malformed_here(format!(
                    "document does not begin with markup (found byte 0x{:02x})",
                    other
                )));
            }
        }
        let event_location = scanner.location();
        Ok(Self {
            scanner,
            origin: source,
            state: CursorState::Prolog,
            open: Vec::new(),
            scopes: Vec::new(),
            pending: VecDeque::new(),
            event_location,
            poisoned: false,
            closed: false,
        })
    }

    /// Position of the most recently produced event.
    pub fn location(&self) -> Location {
        self.event_location
    }

    /// Handle to the byte source this cursor reads from.
    pub fn source(&self) -> SourceHandle {
        self.origin.clone()
    }

    /// Pull the next event. After a well-formedness failure the cursor is
    /// unusable and every subsequent call fails.
    pub fn next_event(&mut self) -> Result<TokenEvent> {
        if self.closed {
            return Err(ReadError::Internal {
                details: "next_event on a closed cursor".to_string(),
            });
        }
        if self.poisoned {
            return Err(ReadError::Internal {
                details: "cursor is unusable after a previous error".to_string(),
            });
        }
        if let Some(event) = self.pending.pop_front() {
            return Ok(event);
        }
        self.scanner.compact();
        let result = self.produce();
        match &result {
            Ok(event) => trace!(?event, "pulled token event"),
            Err(_) => self.poisoned = true,
        }
        result
    }

    /// Release parser buffers and close the underlying byte source.
    /// Idempotent.
    pub fn close(&mut self) -> Result<()> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;
        self.scanner.release();
        self.pending.clear();
        self.origin.close()
    }

    fn produce(&mut self) -> Result<TokenEvent> {
        loop {
            match self.state {
                CursorState::Done => return Ok(TokenEvent::EndDocument),
                CursorState::Prolog | CursorState::Epilog => {
                    self.scanner.skip_whitespace()?;
                    self.event_location = self.scanner.location();
                    match self.scanner.peek()? {
                        None => {
                            self.state = CursorState::Done;
                            return Ok(TokenEvent::EndDocument);
                        }
                        Some(b'<') => {
                            if self.scanner.try_consume(b"<!--")? {
                                self.scanner.take_until_seq(b"-->", "comment")?;
                                continue;
                            }
                            if self.scanner.try_consume(b"<?")? {
                                self.scanner
                                    .take_until_seq(b"?>", "processing instruction")?;
                                continue;
                            }
                            if self.state == CursorState::Epilog {
                                return Err(self
                                    .scanner
                                    .malformed_here("content after the document element"));
                            }
                            if self.scanner.try_consume(b"<!DOCTYPE")? {
                                self.skip_doctype()?;
                                continue;
                            }
                            self.scanner.consume_expect(b"<", "start tag")?;
                            return self.parse_start_tag();
                        }
                        Some(_) => {
                            return Err(self
                                .scanner
                                .malformed_here("text outside the document element"));
                        }
                    }
                }
                CursorState::Content => {
                    self.event_location = self.scanner.location();
                    match self.scanner.peek()? {
                        None => {
                            let open = self
                                .open
                                .last()
                                .map(|e| e.name.to_string())
                                .unwrap_or_default();
                            return Err(self.scanner.malformed_here(format!(
                                "unexpected end of stream inside element {}",
                                open
                            )));
                        }
                        Some(b'<') => {
                            if self.scanner.try_consume(b"<![CDATA[")? {
                                let bytes =
                                    self.scanner.take_until_seq(b"]]>", "CDATA section")?;
                                let content = String::from_utf8(bytes).map_err(|_| {
                                    self.scanner.malformed_here("invalid UTF-8 in CDATA section")
                                })?;
                                return Ok(TokenEvent::Text { content });
                            }
                            if self.scanner.try_consume(b"<!--")? {
                                self.scanner.take_until_seq(b"-->", "comment")?;
                                continue;
                            }
                            if self.scanner.try_consume(b"<?")? {
                                self.scanner
                                    .take_until_seq(b"?>", "processing instruction")?;
                                continue;
                            }
                            if self.scanner.try_consume(b"</")? {
                                return self.parse_end_tag();
                            }
                            if self.scanner.try_consume(b"<!")? {
                                return Err(self
                                    .scanner
                                    .malformed_here("unexpected markup declaration in content"));
                            }
                            self.scanner.consume_expect(b"<", "start tag")?;
                            return self.parse_start_tag();
                        }
                        Some(_) => return self.parse_text(),
                    }
                }
            }
        }
    }

    fn parse_start_tag(&mut self) -> Result<TokenEvent> {
        let raw_name = self.scanner.read_name()?;
        let mut raw_attrs: Vec<(String, String)> = Vec::new();
        let self_closing;
        loop {
            self.scanner.skip_whitespace()?;
            match self.scanner.peek()? {
                Some(b'>') => {
                    self.scanner.advance(1);
                    self_closing = false;
                    break;
                }
                Some(b'/') => {
                    self.scanner.advance(1);
                    self.scanner.consume_expect(b">", "'>' after '/'")?;
                    self_closing = true;
                    break;
                }
                Some(_) => {
                    let attr_name = self.scanner.read_name()?;
                    self.scanner.skip_whitespace()?;
                    self.scanner
                        .consume_expect(b"=", "'=' after attribute name")?;
                    self.scanner.skip_whitespace()?;
                    let quote = match self.scanner.peek()? {
                        Some(q @ (b'"' | b'\'')) => {
                            self.scanner.advance(1);
                            q
                        }
                        _ => {
                            return Err(self
                                .scanner
                                .malformed_here("attribute value must be quoted"));
                        }
                    };
                    let raw_value = self.scanner.take_until_byte(quote, "attribute value")?;
                    self.scanner.advance(1);
                    let value = self.decode_attribute_value(&raw_value)?;
                    raw_attrs.push((attr_name, value));
                }
                None => {
                    return Err(self.scanner.malformed_here(format!(
                        "unterminated start tag <{}",
                        raw_name
                    )));
                }
            }
        }

        let mut namespaces: Vec<NamespaceDecl> = Vec::new();
        let mut plain_attrs: Vec<(String, String)> = Vec::new();
        for (name, value) in raw_attrs {
            if name == "xmlns" {
                namespaces.push(NamespaceDecl {
                    prefix: None,
                    uri: value,
                });
            } else if let Some(prefix) = name.strip_prefix("xmlns:") {
                if prefix.is_empty() {
                    return Err(self.scanner.malformed_here("empty namespace prefix"));
                }
                namespaces.push(NamespaceDecl {
                    prefix: Some(prefix.to_string()),
                    uri: value,
                });
            } else {
                plain_attrs.push((name, value));
            }
        }

        self.scopes.push(namespaces.clone());
        let name = match self.resolve(&raw_name, true) {
            Ok(name) => name,
            Err(e) => {
                self.scopes.pop();
                return Err(e);
            }
        };

        let mut attributes = Vec::with_capacity(plain_attrs.len());
        let mut seen: HashSet<QName> = HashSet::new();
        for (raw, value) in plain_attrs {
            let attr_name = match self.resolve(&raw, false) {
                Ok(n) => n,
                Err(e) => {
                    self.scopes.pop();
                    return Err(e);
                }
            };
            if !seen.insert(attr_name.clone()) {
                self.scopes.pop();
                return Err(self
                    .scanner
                    .malformed_here(format!("duplicate attribute {}", attr_name)));
            }
            attributes.push(Attribute {
                name: attr_name,
                value,
            });
        }

        if self_closing {
            self.scopes.pop();
            self.pending
                .push_back(TokenEvent::EndElement { name: name.clone() });
            if self.open.is_empty() {
                self.state = CursorState::Epilog;
            }
        } else {
            self.open.push(OpenElement {
                raw: raw_name,
                name: name.clone(),
            });
            self.state = CursorState::Content;
        }

        Ok(TokenEvent::StartElement {
            name,
            attributes,
            namespaces,
        })
    }

    fn parse_end_tag(&mut self) -> Result<TokenEvent> {
        let raw = self.scanner.read_name()?;
        self.scanner.skip_whitespace()?;
        self.scanner.consume_expect(b">", "'>' in end tag")?;

        let top = match self.open.pop() {
            Some(top) => top,
            None => {
                return Err(self
                    .scanner
                    .malformed_here(format!("end tag </{}> without open element", raw)));
            }
        };
        if top.raw != raw {
            return Err(self.scanner.malformed_here(format!(
                "mismatched end tag </{}>, expected </{}>",
                raw, top.raw
            )));
        }
        self.scopes.pop();
        if self.open.is_empty() {
            self.state = CursorState::Epilog;
        }
        Ok(TokenEvent::EndElement { name: top.name })
    }

    fn parse_text(&mut self) -> Result<TokenEvent> {
        let mut content = String::new();
        loop {
            let (chunk, delim) = self.scanner.take_until_either(b'<', b'&')?;
            if chunk.windows(3).any(|w| w == b"]]>") {
                return Err(self.scanner.malformed_here("']]>' in character data"));
            }
            content.push_str(
                std::str::from_utf8(&chunk)
                    .map_err(|_| self.scanner.malformed_here("invalid UTF-8 in character data"))?,
            );
            match delim {
                Some(b'&') => {
                    self.scanner.advance(1);
                    let raw = self.scanner.take_until_byte(b';', "entity reference")?;
                    self.scanner.advance(1);
                    let raw = String::from_utf8(raw).map_err(|_| {
                        self.scanner.malformed_here("invalid UTF-8 in entity reference")
                    })?;
                    match expand_reference(&raw) {
                        Some(c) => content.push(c),
                        None => {
                            return Err(self.scanner.malformed_here(format!(
                                "unknown or invalid reference '&{};'",
                                raw
                            )));
                        }
                    }
                }
                _ => break,
            }
        }
        Ok(TokenEvent::Text { content })
    }

    fn decode_attribute_value(&self, raw: &[u8]) -> Result<String> {
        let mut out = String::new();
        let mut rest = raw;
        loop {
            match memchr2(b'&', b'<', rest) {
                Some(i) if rest[i] == b'<' => {
                    return Err(self.scanner.malformed_here("'<' in attribute value"));
                }
                Some(i) => {
                    out.push_str(std::str::from_utf8(&rest[..i]).map_err(|_| {
                        self.scanner.malformed_here("invalid UTF-8 in attribute value")
                    })?);
                    let after = &rest[i + 1..];
                    let end = memchr(b';', after).ok_or_else(|| {
                        self.scanner
                            .malformed_here("unterminated reference in attribute value")
                    })?;
                    let name = std::str::from_utf8(&after[..end]).map_err(|_| {
                        self.scanner.malformed_here("invalid UTF-8 in attribute value")
                    })?;
                    match expand_reference(name) {
                        Some(c) => out.push(c),
                        None => {
                            return Err(self.scanner.malformed_here(format!(
                                "unknown or invalid reference '&{};'",
                                name
                            )));
                        }
                    }
                    rest = &after[end + 1..];
                }
                None => {
                    out.push_str(std::str::from_utf8(rest).map_err(|_| {
                        self.scanner.malformed_here("invalid UTF-8 in attribute value")
                    })?);
                    return Ok(out);
                }
            }
        }
    }

    /// Skip a DOCTYPE declaration, including a bracketed internal subset.
    fn skip_doctype(&mut self) -> Result<()> {
        let mut bracket_depth = 0usize;
        loop {
            match self.scanner.peek()? {
                None => {
                    return Err(self
                        .scanner
                        .malformed_here("unexpected end of stream in DOCTYPE"));
                }
                Some(b'[') => {
                    bracket_depth += 1;
                    self.scanner.advance(1);
                }
                Some(b']') => {
                    bracket_depth = bracket_depth.saturating_sub(1);
                    self.scanner.advance(1);
                }
                Some(b'>') if bracket_depth == 0 => {
                    self.scanner.advance(1);
                    return Ok(());
                }
                Some(_) => self.scanner.advance(1),
            }
        }
    }

    /// Resolve a raw prefixed name against the in-scope bindings. The default
    /// namespace applies to elements only.
    fn resolve(&self, raw: &str, use_default: bool) -> Result<QName> {
        match raw.split_once(':') {
            Some((prefix, local)) => {
                if prefix.is_empty() || local.is_empty() || local.contains(':') {
                    return Err(self
                        .scanner
                        .malformed_here(format!("invalid qualified name '{}'", raw)));
                }
                if prefix == "xml" {
                    return Ok(QName::new(XML_NAMESPACE, local));
                }
                for scope in self.scopes.iter().rev() {
                    for decl in scope.iter().rev() {
                        if decl.prefix.as_deref() == Some(prefix) {
                            return Ok(QName::new(decl.uri.clone(), local));
                        }
                    }
                }
                Err(self
                    .scanner
                    .malformed_here(format!("unbound namespace prefix '{}'", prefix)))
            }
            None => {
                if use_default {
                    for scope in self.scopes.iter().rev() {
                        for decl in scope.iter().rev() {
                            if decl.prefix.is_none() {
                                return Ok(if decl.uri.is_empty() {
                                    QName::unqualified(raw)
                                } else {
                                    QName::new(decl.uri.clone(), raw)
                                });
                            }
                        }
                    }
                }
                Ok(QName::unqualified(raw))
            }
        }
    }
}

impl EventCursor for TokenCursor {
    fn next_event(&mut self) -> Result<TokenEvent> {
        TokenCursor::next_event(self)
    }

    fn location(&self) -> Option<Location> {
        Some(TokenCursor::location(self))
    }

    fn close(&mut self) -> Result<()> {
        TokenCursor::close(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cursor_for(doc: &str) -> TokenCursor {
        TokenCursor::open(SourceHandle::new(std::io::Cursor::new(
            doc.as_bytes().to_vec(),
        )))
        .unwrap()
    }

    fn start_name(event: &TokenEvent) -> &QName {
        match event {
            TokenEvent::StartElement { name, .. } => name,
            other => panic!("expected StartElement, got {:?}", other),
        }
    }

    #[test]
    fn test_dummy_element() {
        let mut cursor = cursor_for("<ns:dummy xmlns:ns='http://www.apache.org/cxf'/>");

        let first = cursor.next_event().unwrap();
        assert_eq!(
            start_name(&first),
            &QName::new("http://www.apache.org/cxf", "dummy")
        );
        assert_eq!(
            cursor.next_event().unwrap(),
            TokenEvent::EndElement {
                name: QName::new("http://www.apache.org/cxf", "dummy")
            }
        );
        assert_eq!(cursor.next_event().unwrap(), TokenEvent::EndDocument);
        // Terminal event repeats.
        assert_eq!(cursor.next_event().unwrap(), TokenEvent::EndDocument);
    }

    #[test]
    fn test_nested_elements_and_text() {
        let mut cursor = cursor_for("<a><b>hi</b><c/></a>");

        assert_eq!(start_name(&cursor.next_event().unwrap()), &QName::unqualified("a"));
        assert_eq!(start_name(&cursor.next_event().unwrap()), &QName::unqualified("b"));
        assert_eq!(
            cursor.next_event().unwrap(),
            TokenEvent::Text {
                content: "hi".to_string()
            }
        );
        assert_eq!(
            cursor.next_event().unwrap(),
            TokenEvent::EndElement {
                name: QName::unqualified("b")
            }
        );
        assert_eq!(start_name(&cursor.next_event().unwrap()), &QName::unqualified("c"));
        assert_eq!(
            cursor.next_event().unwrap(),
            TokenEvent::EndElement {
                name: QName::unqualified("c")
            }
        );
        assert_eq!(
            cursor.next_event().unwrap(),
            TokenEvent::EndElement {
                name: QName::unqualified("a")
            }
        );
        assert_eq!(cursor.next_event().unwrap(), TokenEvent::EndDocument);
    }

    #[test]
    fn test_attributes_and_entity_decoding() {
        let mut cursor =
            cursor_for(r#"<a title="x &amp; y &#x41;">a &lt; b &gt; &#99;</a>"#);

        match cursor.next_event().unwrap() {
            TokenEvent::StartElement { attributes, .. } => {
                assert_eq!(attributes.len(), 1);
                assert_eq!(attributes[0].name, QName::unqualified("title"));
                assert_eq!(attributes[0].value, "x & y A");
            }
            other => panic!("expected StartElement, got {:?}", other),
        }
        assert_eq!(
            cursor.next_event().unwrap(),
            TokenEvent::Text {
                content: "a < b > c".to_string()
            }
        );
    }

    #[test]
    fn test_namespace_declarations_surface_on_start() {
        let mut cursor = cursor_for(
            r#"<root xmlns="urn:default" xmlns:p="urn:p"><p:child attr="1" p:other="2"/></root>"#,
        );

        match cursor.next_event().unwrap() {
            TokenEvent::StartElement {
                name, namespaces, ..
            } => {
                assert_eq!(name, QName::new("urn:default", "root"));
                assert_eq!(namespaces.len(), 2);
            }
            other => panic!("expected StartElement, got {:?}", other),
        }
        match cursor.next_event().unwrap() {
            TokenEvent::StartElement {
                name, attributes, ..
            } => {
                assert_eq!(name, QName::new("urn:p", "child"));
                // Unprefixed attributes stay unqualified, prefixed ones resolve.
                assert_eq!(attributes[0].name, QName::unqualified("attr"));
                assert_eq!(attributes[1].name, QName::new("urn:p", "other"));
            }
            other => panic!("expected StartElement, got {:?}", other),
        }
    }

    #[test]
    fn test_default_namespace_undeclaration() {
        let mut cursor = cursor_for(r#"<a xmlns="urn:a"><b xmlns=""/></a>"#);

        assert_eq!(start_name(&cursor.next_event().unwrap()), &QName::new("urn:a", "a"));
        assert_eq!(start_name(&cursor.next_event().unwrap()), &QName::unqualified("b"));
    }

    #[test]
    fn test_cdata_section() {
        let mut cursor = cursor_for("<a><![CDATA[1 < 2 & 3]]></a>");

        cursor.next_event().unwrap();
        assert_eq!(
            cursor.next_event().unwrap(),
            TokenEvent::Text {
                content: "1 < 2 & 3".to_string()
            }
        );
    }

    #[test]
    fn test_prolog_comments_and_pi_are_skipped() {
        let mut cursor = cursor_for(
            "<?xml version=\"1.0\" encoding=\"UTF-8\"?>\n<!-- header -->\n<?target data?>\n<root/>",
        );

        assert_eq!(start_name(&cursor.next_event().unwrap()), &QName::unqualified("root"));
    }

    #[test]
    fn test_doctype_is_skipped() {
        let mut cursor =
            cursor_for("<!DOCTYPE root [ <!ELEMENT root (#PCDATA)> ]>\n<root>x</root>");

        assert_eq!(start_name(&cursor.next_event().unwrap()), &QName::unqualified("root"));
    }

    #[test]
    fn test_open_rejects_non_markup() {
        let source = SourceHandle::new(std::io::Cursor::new(b"hello world".to_vec()));
        let err = TokenCursor::open(source).unwrap_err();
        match err {
            ReadError::Malformed { details, .. } => {
                assert!(details.contains("does not begin with markup"));
            }
            other => panic!("expected Malformed, got {:?}", other),
        }
    }

    #[test]
    fn test_empty_document_yields_end_document() {
        let mut cursor = cursor_for("");
        assert_eq!(cursor.next_event().unwrap(), TokenEvent::EndDocument);
    }

    #[test]
    fn test_mismatched_end_tag_poisons_cursor() {
        let mut cursor = cursor_for("<a><b></a></b>");

        cursor.next_event().unwrap();
        cursor.next_event().unwrap();
        let err = cursor.next_event().unwrap_err();
        assert!(matches!(err, ReadError::Malformed { .. }));

        // Cursor unusable afterwards.
        let err = cursor.next_event().unwrap_err();
        assert!(matches!(err, ReadError::Internal { .. }));
    }

    #[test]
    fn test_unterminated_tag_is_malformed() {
        let mut cursor = cursor_for("<a><b attr='1'");
        cursor.next_event().unwrap();
        let err = cursor.next_event().unwrap_err();
        assert!(matches!(err, ReadError::Malformed { .. }));
    }

    #[test]
    fn test_invalid_character_reference() {
        let mut cursor = cursor_for("<a>&#xD800;</a>");
        cursor.next_event().unwrap();
        let err = cursor.next_event().unwrap_err();
        match err {
            ReadError::Malformed { details, .. } => assert!(details.contains("reference")),
            other => panic!("expected Malformed, got {:?}", other),
        }
    }

    #[test]
    fn test_unknown_entity_is_malformed() {
        let mut cursor = cursor_for("<a>&nbsp;</a>");
        cursor.next_event().unwrap();
        assert!(matches!(
            cursor.next_event().unwrap_err(),
            ReadError::Malformed { .. }
        ));
    }

    #[test]
    fn test_unbound_prefix_is_malformed() {
        let mut cursor = cursor_for("<p:a/>");
        let err = cursor.next_event().unwrap_err();
        match err {
            ReadError::Malformed { details, .. } => {
                assert!(details.contains("unbound namespace prefix"));
            }
            other => panic!("expected Malformed, got {:?}", other),
        }
    }

    #[test]
    fn test_content_after_document_element() {
        let mut cursor = cursor_for("<a/><b/>");
        cursor.next_event().unwrap();
        cursor.next_event().unwrap();
        assert!(matches!(
            cursor.next_event().unwrap_err(),
            ReadError::Malformed { .. }
        ));
    }

    #[test]
    fn test_duplicate_attribute_is_malformed() {
        let mut cursor = cursor_for(r#"<a x="1" x="2"/>"#);
        assert!(matches!(
            cursor.next_event().unwrap_err(),
            ReadError::Malformed { .. }
        ));
    }

    #[test]
    fn test_error_location_is_tracked() {
        let mut cursor = cursor_for("<a>\n  <b>\n  <oops</b>\n</a>");
        cursor.next_event().unwrap(); // <a>
        cursor.next_event().unwrap(); // whitespace
        cursor.next_event().unwrap(); // <b>
        cursor.next_event().unwrap(); // whitespace
        let err = cursor.next_event().unwrap_err();
        match err {
            ReadError::Malformed { location, .. } => {
                assert_eq!(location.unwrap().line, 3);
            }
            other => panic!("expected Malformed, got {:?}", other),
        }
    }

    #[test]
    fn test_close_is_idempotent_and_closes_source() {
        let mut cursor = cursor_for("<a/>");
        let origin = cursor.origin.clone();

        assert!(!origin.is_closed());
        cursor.close().unwrap();
        assert!(origin.is_closed());
        cursor.close().unwrap();

        assert!(matches!(
            cursor.next_event().unwrap_err(),
            ReadError::Internal { .. }
        ));
    }

    #[test]
    fn test_whitespace_text_is_reported_in_content() {
        let mut cursor = cursor_for("<a>\n  <b/>\n</a>");
        cursor.next_event().unwrap();
        assert_eq!(
            cursor.next_event().unwrap(),
            TokenEvent::Text {
                content: "\n  ".to_string()
            }
        );
    }
}
