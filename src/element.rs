//! Owned element tree, the decoded form of a value-mode read.

use crate::cursor::{Attribute, NamespaceDecl, TokenEvent};
use crate::error::{ReadError, Result};
use crate::name::QName;
use crate::source::EventCursor;

#[derive(Debug, Clone, PartialEq)]
pub enum XmlNode {
    Element(Element),
    Text(String),
}

/// One decoded element with its attributes and children, built by driving a
/// cursor to end of document.
#[derive(Debug, Clone, PartialEq)]
pub struct Element {
    pub name: QName,
    pub attributes: Vec<Attribute>,
    pub namespaces: Vec<NamespaceDecl>,
    pub children: Vec<XmlNode>,
}

impl Element {
    /// Drive `cursor` to `EndDocument` and build the document element.
    /// Returns `None` for an empty document. Errors from the cursor (or a
    /// validating wrapper around it) propagate unchanged.
    pub fn decode(cursor: &mut dyn EventCursor) -> Result<Option<Element>> {
        let mut stack: Vec<Element> = Vec::new();
        let mut root: Option<Element> = None;

        loop {
            match cursor.next_event()? {
                TokenEvent::StartElement {
                    name,
                    attributes,
                    namespaces,
                } => {
                    stack.push(Element {
                        name,
                        attributes,
                        namespaces,
                        children: Vec::new(),
                    });
                }
                TokenEvent::EndElement { .. } => {
                    let finished = stack.pop().ok_or_else(|| ReadError::Internal {
                        details: "end element without matching start".to_string(),
                    })?;
                    match stack.last_mut() {
                        Some(parent) => parent.children.push(XmlNode::Element(finished)),
                        None => root = Some(finished),
                    }
                }
                TokenEvent::Text { content } => {
                    if let Some(open) = stack.last_mut() {
                        open.children.push(XmlNode::Text(content));
                    }
                }
                TokenEvent::EndDocument => return Ok(root),
            }
        }
    }

    /// Concatenated text of the direct children.
    pub fn text(&self) -> String {
        let mut out = String::new();
        for child in &self.children {
            if let XmlNode::Text(t) = child {
                out.push_str(t);
            }
        }
        out
    }

    pub fn attribute(&self, name: &QName) -> Option<&str> {
        self.attributes
            .iter()
            .find(|a| &a.name == name)
            .map(|a| a.value.as_str())
    }

    pub fn child_elements(&self) -> impl Iterator<Item = &Element> {
        self.children.iter().filter_map(|c| match c {
            XmlNode::Element(e) => Some(e),
            XmlNode::Text(_) => None,
        })
    }
}
