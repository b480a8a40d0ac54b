//! Schema location discovery.
//!
//! Finds the schema a document points at via `xsi:schemaLocation` /
//! `xsi:noNamespaceSchemaLocation` hints in its head, and compiles a grammar
//! from a local `.xsd` file. Remote locations are reported as unsupported;
//! this subsystem never fetches over the network.

use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::{Path, PathBuf};
use std::sync::OnceLock;

use regex::Regex;
use tracing::debug;

use crate::error::{ReadError, Result};
use crate::grammar::SchemaGrammar;

/// Cached regex for xsi:schemaLocation extraction
static SCHEMA_LOCATION_REGEX: OnceLock<Regex> = OnceLock::new();

/// Cached regex for xsi:noNamespaceSchemaLocation extraction
static NO_NAMESPACE_REGEX: OnceLock<Regex> = OnceLock::new();

fn schema_location_regex() -> &'static Regex {
    SCHEMA_LOCATION_REGEX.get_or_init(|| {
        Regex::new(r#"xsi:schemaLocation="\S+\s+(.+?)""#)
            .expect("Failed to compile schemaLocation regex")
    })
}

fn no_namespace_regex() -> &'static Regex {
    NO_NAMESPACE_REGEX.get_or_init(|| {
        Regex::new(r#"xsi:noNamespaceSchemaLocation="(.+?)""#)
            .expect("Failed to compile noNamespaceSchemaLocation regex")
    })
}

/// One discovered schema hint.
#[derive(Debug, Clone)]
pub struct SchemaReference {
    pub location: String,
    pub source_type: SchemaSourceType,
}

/// Where a schema hint points.
#[derive(Debug, Clone, PartialEq)]
pub enum SchemaSourceType {
    Local(PathBuf),
    Remote(String),
}

/// Extracts schema hints from a document head and compiles local grammars.
///
/// Regexes are compiled once on first use and shared afterwards.
pub struct SchemaLocator;

impl Default for SchemaLocator {
    fn default() -> Self {
        Self::new()
    }
}

impl SchemaLocator {
    pub fn new() -> Self {
        Self
    }

    /// Scan the head of `document` for schema location hints. Scanning stops
    /// once the first end tag is seen; hints live on the document element.
    pub fn extract_schema_locations(&self, document: &Path) -> Result<Vec<SchemaReference>> {
        let file = File::open(document).map_err(ReadError::Io)?;
        let reader = BufReader::new(file);
        let mut references = Vec::new();

        for line in reader.lines() {
            let line = line.map_err(ReadError::Io)?;

            if let Some(caps) = schema_location_regex().captures(&line) {
                let location = caps[1].to_owned();
                let source_type = Self::determine_source_type(&location, document);
                references.push(SchemaReference {
                    location,
                    source_type,
                });
            }

            if let Some(caps) = no_namespace_regex().captures(&line) {
                let location = caps[1].to_owned();
                let source_type = Self::determine_source_type(&location, document);
                references.push(SchemaReference {
                    location,
                    source_type,
                });
            }

            if line.trim_start().starts_with("</") || line.contains("/>") {
                break;
            }
        }

        Ok(references)
    }

    /// Compile a grammar for `document` from its first schema hint.
    pub fn load_grammar_for_document(&self, document: &Path) -> Result<SchemaGrammar> {
        let references = self.extract_schema_locations(document)?;
        let reference = references.into_iter().next().ok_or_else(|| {
            ReadError::SchemaCompile {
                details: format!("no schema location found in {}", document.display()),
            }
        })?;
        debug!(location = %reference.location, "discovered schema location");

        match reference.source_type {
            SchemaSourceType::Local(path) => SchemaGrammar::compile_file(&path),
            SchemaSourceType::Remote(url) => Err(ReadError::SchemaCompile {
                details: format!(
                    "remote schema location {} is not supported; pass a local schema file",
                    url
                ),
            }),
        }
    }

    /// Relative paths resolve against the document's directory.
    fn determine_source_type(location: &str, document: &Path) -> SchemaSourceType {
        if location.starts_with("http://") || location.starts_with("https://") {
            SchemaSourceType::Remote(location.to_string())
        } else {
            let schema_path = if location.starts_with('/') {
                PathBuf::from(location)
            } else {
                document
                    .parent()
                    .unwrap_or(Path::new("."))
                    .join(location)
            };
            SchemaSourceType::Local(schema_path)
        }
    }
}
