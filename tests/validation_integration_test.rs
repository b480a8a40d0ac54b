//! Integration tests for grammar compilation plus streaming validation over
//! the fixture files: failures surface at the point of violation, not after
//! the stream has been consumed.

mod common;

use std::fs::File;
use std::sync::Arc;

use common::test_helpers::TestFixtures;
use xmlwire::{
    QName, ReadError, SchemaGrammar, SourceHandle, TokenCursor, TokenEvent, ValidatingCursor,
    ValidationOptions,
};

fn fixture_grammar(fixtures: &TestFixtures) -> Arc<SchemaGrammar> {
    Arc::new(SchemaGrammar::compile_file(&fixtures.schema()).unwrap())
}

fn validating_file(
    fixtures: &TestFixtures,
    name: &std::path::Path,
    options: ValidationOptions,
) -> ValidatingCursor<TokenCursor> {
    let handle = SourceHandle::new(File::open(name).unwrap());
    let cursor = TokenCursor::open(handle).unwrap();
    ValidatingCursor::new(cursor, fixture_grammar(fixtures), options)
}

#[test]
fn test_fixture_schema_compiles() {
    let fixtures = TestFixtures::new();
    let grammar = fixture_grammar(&fixtures);

    assert_eq!(
        grammar.target_namespace(),
        Some("http://www.test.org/services")
    );
    assert!(grammar.element_names().contains(&QName::new(
        "http://www.test.org/services",
        "NullTestOperationRequest"
    )));
}

#[test]
fn test_valid_fixture_streams_to_end() {
    let fixtures = TestFixtures::new();
    let mut cursor = validating_file(
        &fixtures,
        &fixtures.valid_xml(),
        ValidationOptions::default(),
    );

    let mut events = 0usize;
    loop {
        let event = cursor.next_event().unwrap();
        events += 1;
        if event == TokenEvent::EndDocument {
            break;
        }
    }
    // Root start/end, two children with text, whitespace runs, end document.
    assert!(events > 5);
    assert!(cursor.warnings().is_empty());
}

#[test]
fn test_invalid_fixture_fails_at_the_violation() {
    let fixtures = TestFixtures::new();
    let mut cursor = validating_file(
        &fixtures,
        &fixtures.invalid_xml(),
        ValidationOptions::default(),
    );

    let mut saw_end_document = false;
    let error = loop {
        match cursor.next_event() {
            Ok(TokenEvent::EndDocument) => {
                saw_end_document = true;
                break None;
            }
            Ok(_) => continue,
            Err(e) => break Some(e),
        }
    };

    // The violation surfaces before the stream is exhausted.
    assert!(!saw_end_document);
    match error.expect("validation failure") {
        ReadError::Validation { causes, .. } => {
            assert!(causes.iter().any(|c| c.contains("unexpected")));
        }
        other => panic!("expected Validation, got {:?}", other),
    }
}

#[test]
fn test_malformed_fixture_is_not_a_validation_failure() {
    let fixtures = TestFixtures::new();
    let mut cursor = validating_file(
        &fixtures,
        &fixtures.malformed_xml(),
        ValidationOptions::default(),
    );

    let error = loop {
        match cursor.next_event() {
            Ok(TokenEvent::EndDocument) => panic!("malformed fixture reached end of document"),
            Ok(_) => continue,
            Err(e) => break e,
        }
    };
    assert!(matches!(error, ReadError::Malformed { .. }));
}

#[test]
fn test_close_after_failure_releases_the_source() {
    let fixtures = TestFixtures::new();
    let handle = SourceHandle::new(File::open(fixtures.invalid_xml()).unwrap());
    let cursor = TokenCursor::open(handle.clone()).unwrap();
    let mut validating =
        ValidatingCursor::new(cursor, fixture_grammar(&fixtures), ValidationOptions::default());

    loop {
        match validating.next_event() {
            Ok(TokenEvent::EndDocument) => panic!("expected a violation"),
            Ok(_) => continue,
            Err(_) => break,
        }
    }

    assert!(!handle.is_closed());
    validating.close().unwrap();
    assert!(handle.is_closed());
    validating.close().unwrap();
}
