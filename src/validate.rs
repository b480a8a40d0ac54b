//! Streaming schema validation.
//!
//! [`ValidatingCursor`] wraps any event cursor and checks each event against
//! a compiled [`SchemaGrammar`] as it is pulled — state is carried forward
//! element by element, never by buffering the document. A violation raises
//! [`ReadError::Validation`] and makes the cursor unusable for the rest of
//! the read; the byte source underneath stays healthy for independent reads.
//!
//! Non-fatal findings (an undeclared attribute, content matched by a
//! wildcard) are warnings. By default warnings are escalated to hard errors;
//! [`ValidationOptions::fail_on_warning`] turns the escalation off for
//! grammars that use warnings as advisory notices.

use std::sync::Arc;

use serde::Serialize;
use tracing::debug;

use crate::cursor::{Attribute, TokenEvent};
use crate::error::{Location, ReadError, Result};
use crate::grammar::{
    Compositor, ContentModel, Group, SchemaGrammar, SimpleType, Term, TypeDef, TypeId,
};
use crate::name::{QName, XML_NAMESPACE, XSI_NAMESPACE};
use crate::source::EventCursor;

/// Validation policy knobs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ValidationOptions {
    /// Treat every schema warning as a hard validation failure.
    pub fail_on_warning: bool,
}

impl Default for ValidationOptions {
    fn default() -> Self {
        Self {
            fail_on_warning: true,
        }
    }
}

/// A non-fatal validation finding.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ValidationWarning {
    pub location: Option<Location>,
    pub message: String,
}

#[derive(Debug)]
enum GroupProgress {
    Sequence { index: usize, reps: u32 },
    Choice { chosen: Option<usize>, reps: u32 },
    All { seen: Vec<u32> },
}

#[derive(Debug)]
enum FrameKind {
    /// Unvalidated subtree: `xs:anyType` or wildcard-matched content.
    Open,
    /// Element-only or empty content with no children declared.
    Empty,
    /// Simple-typed content; text accumulates until the end tag.
    Text { ty: SimpleType, buf: String },
    /// Model-group content.
    Group {
        group: Group,
        progress: GroupProgress,
        mixed: bool,
    },
}

#[derive(Debug)]
struct Frame {
    element: QName,
    kind: FrameKind,
}

enum Step {
    Element(TypeId),
    Wildcard,
    Reject(String),
}

/// Event cursor wrapper performing incremental grammar checks.
pub struct ValidatingCursor<C: EventCursor> {
    inner: C,
    grammar: Arc<SchemaGrammar>,
    options: ValidationOptions,
    frames: Vec<Frame>,
    warnings: Vec<ValidationWarning>,
    seen_root: bool,
    failed: bool,
}

impl<C: EventCursor> ValidatingCursor<C> {
    pub fn new(inner: C, grammar: Arc<SchemaGrammar>, options: ValidationOptions) -> Self {
        Self {
            inner,
            grammar,
            options,
            frames: Vec::new(),
            warnings: Vec::new(),
            seen_root: false,
            failed: false,
        }
    }

    /// Pull the next event from the inner cursor and validate it. After a
    /// validation failure the cursor is unusable.
    pub fn next_event(&mut self) -> Result<TokenEvent> {
        if self.failed {
            return Err(ReadError::Internal {
                details: "validating cursor is unusable after a validation failure".to_string(),
            });
        }
        let event = self.inner.next_event()?;
        if let Err(e) = self.check(&event) {
            self.failed = true;
            debug!(error = %e, "validation failure");
            return Err(e);
        }
        Ok(event)
    }

    /// Warnings collected so far (only populated when escalation is off).
    pub fn warnings(&self) -> &[ValidationWarning] {
        &self.warnings
    }

    pub fn location(&self) -> Option<Location> {
        self.inner.location()
    }

    /// Close the inner cursor (and through it the byte source). Idempotent.
    pub fn close(&mut self) -> Result<()> {
        self.inner.close()
    }

    fn warn(&mut self, location: Option<Location>, message: String) -> Result<()> {
        if self.options.fail_on_warning {
            Err(ReadError::Validation {
                location,
                causes: vec![format!("warning escalated to error: {}", message)],
            })
        } else {
            debug!(%message, "schema warning");
            self.warnings.push(ValidationWarning { location, message });
            Ok(())
        }
    }

    fn check(&mut self, event: &TokenEvent) -> Result<()> {
        let grammar = Arc::clone(&self.grammar);
        let location = self.inner.location();
        match event {
            TokenEvent::StartElement {
                name, attributes, ..
            } => {
                enum Action {
                    Open,
                    OpenWithWarning,
                    Typed(TypeId),
                }
                let action = match self.frames.last_mut() {
                    None => match grammar.global_element(name) {
                        Some(decl) => Action::Typed(decl.type_id),
                        None => {
                            return Err(ReadError::violation(
                                location,
                                format!("element {} is not a declared document element", name),
                            ));
                        }
                    },
                    Some(frame) => match &mut frame.kind {
                        FrameKind::Open => Action::Open,
                        FrameKind::Text { .. } => {
                            return Err(ReadError::violation(
                                location,
                                format!(
                                    "element {} is not allowed inside the simple content of {}",
                                    name, frame.element
                                ),
                            ));
                        }
                        FrameKind::Empty => {
                            return Err(ReadError::violation(
                                location,
                                format!(
                                    "element {} is not allowed; {} has empty content",
                                    name, frame.element
                                ),
                            ));
                        }
                        FrameKind::Group {
                            group, progress, ..
                        } => match step_group(group, progress, name) {
                            Step::Element(type_id) => Action::Typed(type_id),
                            Step::Wildcard => Action::OpenWithWarning,
                            Step::Reject(reason) => {
                                return Err(ReadError::Validation {
                                    location,
                                    causes: vec![reason],
                                });
                            }
                        },
                    },
                };

                self.seen_root = true;
                match action {
                    Action::Open => self.frames.push(Frame {
                        element: name.clone(),
                        kind: FrameKind::Open,
                    }),
                    Action::OpenWithWarning => {
                        self.warn(
                            location,
                            format!("element {} matched a wildcard and was not validated", name),
                        )?;
                        self.frames.push(Frame {
                            element: name.clone(),
                            kind: FrameKind::Open,
                        });
                    }
                    Action::Typed(type_id) => {
                        self.check_attributes(&grammar, type_id, name, attributes, location)?;
                        let kind = frame_kind(&grammar, type_id);
                        self.frames.push(Frame {
                            element: name.clone(),
                            kind,
                        });
                    }
                }
                Ok(())
            }
            TokenEvent::EndElement { .. } => {
                let frame = self.frames.pop().ok_or_else(|| ReadError::Internal {
                    details: "end element without matching start".to_string(),
                })?;
                match frame.kind {
                    FrameKind::Open | FrameKind::Empty => Ok(()),
                    FrameKind::Text { ty, buf } => {
                        if ty.accepts(&buf) {
                            Ok(())
                        } else {
                            Err(ReadError::violation(
                                location,
                                format!(
                                    "value '{}' of element {} is not a valid {}",
                                    buf.trim(),
                                    frame.element,
                                    ty.describe()
                                ),
                            ))
                        }
                    }
                    FrameKind::Group {
                        group, progress, ..
                    } => {
                        let causes = finish_group(&group, &progress, &frame.element);
                        if causes.is_empty() {
                            Ok(())
                        } else {
                            Err(ReadError::Validation { location, causes })
                        }
                    }
                }
            }
            TokenEvent::Text { content } => match self.frames.last_mut() {
                None => Ok(()),
                Some(frame) => match &mut frame.kind {
                    FrameKind::Open => Ok(()),
                    FrameKind::Text { buf, .. } => {
                        buf.push_str(content);
                        Ok(())
                    }
                    FrameKind::Empty => {
                        if content.trim().is_empty() {
                            Ok(())
                        } else {
                            Err(ReadError::violation(
                                location,
                                format!(
                                    "character content is not allowed in element {}",
                                    frame.element
                                ),
                            ))
                        }
                    }
                    FrameKind::Group { mixed, .. } => {
                        if *mixed || content.trim().is_empty() {
                            Ok(())
                        } else {
                            Err(ReadError::violation(
                                location,
                                format!(
                                    "character content is not allowed in element {}",
                                    frame.element
                                ),
                            ))
                        }
                    }
                },
            },
            TokenEvent::EndDocument => {
                if self.seen_root {
                    Ok(())
                } else {
                    // A W3C schema always requires a document element, so an
                    // empty document can never conform.
                    Err(ReadError::violation(
                        location,
                        "document is empty; expected a declared document element",
                    ))
                }
            }
        }
    }

    fn check_attributes(
        &mut self,
        grammar: &SchemaGrammar,
        type_id: TypeId,
        element: &QName,
        attributes: &[Attribute],
        location: Option<Location>,
    ) -> Result<()> {
        let uses: &[crate::grammar::AttributeUse] = match grammar.type_def(type_id) {
            TypeDef::Any => return Ok(()),
            TypeDef::Simple(_) => &[],
            TypeDef::Complex(complex) => &complex.attributes,
        };

        let mut causes = Vec::new();
        for attr_use in uses {
            match attributes.iter().find(|a| a.name == attr_use.name) {
                Some(attr) => {
                    if !attr_use.ty.accepts(&attr.value) {
                        causes.push(format!(
                            "value '{}' of attribute {} on element {} is not a valid {}",
                            attr.value,
                            attr.name,
                            element,
                            attr_use.ty.describe()
                        ));
                    }
                }
                None => {
                    if attr_use.required {
                        causes.push(format!(
                            "required attribute {} is missing on element {}",
                            attr_use.name, element
                        ));
                    }
                }
            }
        }
        if !causes.is_empty() {
            return Err(ReadError::Validation { location, causes });
        }

        for attr in attributes {
            let ns = attr.name.namespace.as_deref();
            if ns == Some(XSI_NAMESPACE) || ns == Some(XML_NAMESPACE) {
                continue;
            }
            if !uses.iter().any(|u| u.name == attr.name) {
                self.warn(
                    location,
                    format!(
                        "attribute {} is not declared on element {}",
                        attr.name, element
                    ),
                )?;
            }
        }
        Ok(())
    }
}

fn frame_kind(grammar: &SchemaGrammar, type_id: TypeId) -> FrameKind {
    match grammar.type_def(type_id) {
        TypeDef::Any => FrameKind::Open,
        TypeDef::Simple(simple) => FrameKind::Text {
            ty: simple.clone(),
            buf: String::new(),
        },
        TypeDef::Complex(complex) => match &complex.content {
            ContentModel::Empty => FrameKind::Empty,
            ContentModel::Group(group) => FrameKind::Group {
                group: group.clone(),
                progress: initial_progress(group),
                mixed: complex.mixed,
            },
        },
    }
}

fn initial_progress(group: &Group) -> GroupProgress {
    match group.compositor {
        Compositor::Sequence => GroupProgress::Sequence { index: 0, reps: 0 },
        Compositor::Choice => GroupProgress::Choice {
            chosen: None,
            reps: 0,
        },
        Compositor::All => GroupProgress::All {
            seen: vec![0; group.particles.len()],
        },
    }
}

fn term_matches(term: &Term, name: &QName) -> bool {
    match term {
        Term::Element {
            name: declared, ..
        } => declared == name,
        Term::Wildcard => true,
    }
}

fn term_outcome(term: &Term) -> Step {
    match term {
        Term::Element { type_id, .. } => Step::Element(*type_id),
        Term::Wildcard => Step::Wildcard,
    }
}

fn describe_term(term: &Term) -> String {
    match term {
        Term::Element { name, .. } => name.to_string(),
        Term::Wildcard => "any element".to_string(),
    }
}

fn step_group(group: &Group, progress: &mut GroupProgress, name: &QName) -> Step {
    match progress {
        GroupProgress::Sequence { index, reps } => {
            while *index < group.particles.len() {
                let particle = &group.particles[*index];
                if term_matches(&particle.term, name) && particle.max.admits(*reps) {
                    *reps += 1;
                    return term_outcome(&particle.term);
                }
                if *reps >= particle.min {
                    *index += 1;
                    *reps = 0;
                    continue;
                }
                return Step::Reject(format!(
                    "unexpected element {}; expected {}",
                    name,
                    describe_term(&particle.term)
                ));
            }
            Step::Reject(format!("unexpected element {}", name))
        }
        GroupProgress::Choice { chosen, reps } => match chosen {
            None => {
                for (i, particle) in group.particles.iter().enumerate() {
                    if term_matches(&particle.term, name) && particle.max.admits(0) {
                        *chosen = Some(i);
                        *reps = 1;
                        return term_outcome(&particle.term);
                    }
                }
                let alternatives = group
                    .particles
                    .iter()
                    .map(|p| describe_term(&p.term))
                    .collect::<Vec<_>>()
                    .join(", ");
                Step::Reject(format!(
                    "unexpected element {}; expected one of: {}",
                    name, alternatives
                ))
            }
            Some(i) => {
                let particle = &group.particles[*i];
                if term_matches(&particle.term, name) && particle.max.admits(*reps) {
                    *reps += 1;
                    term_outcome(&particle.term)
                } else {
                    Step::Reject(format!(
                        "unexpected element {} after choosing {}",
                        name,
                        describe_term(&particle.term)
                    ))
                }
            }
        },
        GroupProgress::All { seen } => {
            for (i, particle) in group.particles.iter().enumerate() {
                if term_matches(&particle.term, name) {
                    if seen[i] >= 1 {
                        return Step::Reject(format!(
                            "element {} occurs more than once in an all group",
                            name
                        ));
                    }
                    seen[i] = 1;
                    return term_outcome(&particle.term);
                }
            }
            Step::Reject(format!("unexpected element {}", name))
        }
    }
}

fn finish_group(group: &Group, progress: &GroupProgress, element: &QName) -> Vec<String> {
    let mut causes = Vec::new();
    match progress {
        GroupProgress::Sequence { index, reps } => {
            for (i, particle) in group.particles.iter().enumerate().skip(*index) {
                let have = if i == *index { *reps } else { 0 };
                if have < particle.min {
                    causes.push(format!(
                        "required element {} is missing in element {} ({} of {} occurrences)",
                        describe_term(&particle.term),
                        element,
                        have,
                        particle.min
                    ));
                }
            }
        }
        GroupProgress::Choice { chosen, reps } => match chosen {
            None => {
                if !group.particles.iter().any(|p| p.min == 0) {
                    let alternatives = group
                        .particles
                        .iter()
                        .map(|p| describe_term(&p.term))
                        .collect::<Vec<_>>()
                        .join(", ");
                    causes.push(format!(
                        "element {} requires one of: {}",
                        element, alternatives
                    ));
                }
            }
            Some(i) => {
                let particle = &group.particles[*i];
                if *reps < particle.min {
                    causes.push(format!(
                        "element {} occurs {} times in element {}, minimum is {}",
                        describe_term(&particle.term),
                        reps,
                        element,
                        particle.min
                    ));
                }
            }
        },
        GroupProgress::All { seen } => {
            for (i, particle) in group.particles.iter().enumerate() {
                if particle.min > 0 && seen[i] == 0 {
                    causes.push(format!(
                        "required element {} is missing in element {}",
                        describe_term(&particle.term),
                        element
                    ));
                }
            }
        }
    }
    causes
}

impl<C: EventCursor> EventCursor for ValidatingCursor<C> {
    fn next_event(&mut self) -> Result<TokenEvent> {
        ValidatingCursor::next_event(self)
    }

    fn location(&self) -> Option<Location> {
        ValidatingCursor::location(self)
    }

    fn close(&mut self) -> Result<()> {
        ValidatingCursor::close(self)
    }
}
