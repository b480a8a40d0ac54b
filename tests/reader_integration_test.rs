//! Integration tests for the streaming read façade: resource cascade,
//! validated reads against the fixture schema, and the no-schema bypass.

mod common;

use std::fs::File;
use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::Ordering;

use common::test_helpers::{RecordingSource, TestFixtures};
use xmlwire::{
    ExchangeContext, PartDescriptor, QName, ReadTarget, SchemaGrammar, SourceHandle,
    StaticSchemaProvider, StreamDataReader, TokenCursor, TokenEvent, ValidationOptions,
};

const DUMMY_DATA: &[u8] = b"<ns:dummy xmlns:ns='http://www.apache.org/cxf'/>";

fn request_part() -> PartDescriptor {
    PartDescriptor::element(QName::new(
        "http://www.test.org/services",
        "NullTestOperationRequest",
    ))
}

fn fixture_grammar(fixtures: &TestFixtures) -> Arc<SchemaGrammar> {
    Arc::new(SchemaGrammar::compile_file(&fixtures.schema()).unwrap())
}

fn handle_for_file(path: &Path) -> SourceHandle {
    SourceHandle::new(File::open(path).unwrap())
}

#[test]
fn test_close_original_byte_source() {
    let (source, closed, close_count) = RecordingSource::new(DUMMY_DATA);
    let handle = SourceHandle::new(source);

    let mut exchange = ExchangeContext::new();
    exchange.set_content(handle.clone());

    let mut reader = StreamDataReader::new();
    reader.attach_exchange(exchange);

    let cursor = TokenCursor::open(handle.clone()).unwrap();
    let result = reader
        .read(
            &QName::new("http://www.apache.org/cxf", "dummy"),
            cursor,
            ReadTarget::Cursor,
        )
        .unwrap();

    let mut bound = result.into_cursor().expect("pass-through cursor");

    // The first event is the dummy start element.
    match bound.next_event().unwrap() {
        TokenEvent::StartElement { name, .. } => {
            assert_eq!(name, QName::new("http://www.apache.org/cxf", "dummy"));
        }
        other => panic!("expected StartElement, got {:?}", other),
    }

    // Not closed before the caller closes the returned cursor.
    assert!(!closed.load(Ordering::SeqCst));

    bound.close().unwrap();
    assert!(closed.load(Ordering::SeqCst));

    // Repeated closes never double-release.
    bound.close().unwrap();
    bound.close().unwrap();
    assert_eq!(close_count.load(Ordering::SeqCst), 1);
}

#[test]
fn test_valid_document() {
    let fixtures = TestFixtures::new();
    let mut reader = StreamDataReader::new();
    reader.set_schema(fixture_grammar(&fixtures));

    let handle = handle_for_file(&fixtures.valid_xml());
    let cursor = TokenCursor::open(handle.clone()).unwrap();
    let result = reader.read_part(&request_part(), cursor).unwrap();

    let value = result.into_value().expect("value result");
    assert_eq!(value.name.local, "NullTestOperationRequest");
    assert_eq!(
        value.name.namespace(),
        Some("http://www.test.org/services")
    );
    // Value mode drives the source to completion and releases it.
    assert!(handle.is_closed());
}

#[test]
fn test_invalid_document() {
    let fixtures = TestFixtures::new();
    let mut reader = StreamDataReader::new();
    reader.set_schema(fixture_grammar(&fixtures));

    let cursor = TokenCursor::open(handle_for_file(&fixtures.invalid_xml())).unwrap();
    let fault = reader.read_part(&request_part(), cursor).unwrap_err();

    assert!(fault.is_schema_violation());
    assert!(
        fault
            .causes
            .iter()
            .any(|c| c.contains("unexpected"))
    );
}

#[test]
fn test_malformed_document() {
    let fixtures = TestFixtures::new();
    let mut reader = StreamDataReader::new();
    reader.set_schema(fixture_grammar(&fixtures));

    let cursor = TokenCursor::open(handle_for_file(&fixtures.malformed_xml())).unwrap();
    let fault = reader.read_part(&request_part(), cursor).unwrap_err();

    assert!(fault.is_malformed_input());
}

#[test]
fn test_no_schema_bypasses_validation() {
    let fixtures = TestFixtures::new();
    let mut reader = StreamDataReader::new();

    // Same schema-invalid document, no grammar anywhere: the read succeeds.
    let cursor = TokenCursor::open(handle_for_file(&fixtures.invalid_xml())).unwrap();
    let result = reader.read_part(&request_part(), cursor).unwrap();
    assert!(result.is_value());
}

#[test]
fn test_schema_discovered_through_exchange() {
    let fixtures = TestFixtures::new();
    let handle = handle_for_file(&fixtures.invalid_xml());

    let mut exchange = ExchangeContext::new();
    exchange.set_content(handle.clone());
    exchange.set_schema_provider(Arc::new(StaticSchemaProvider::new(fixture_grammar(
        &fixtures,
    ))));

    let mut reader = StreamDataReader::new();
    reader.attach_exchange(exchange);

    let cursor = TokenCursor::open(handle).unwrap();
    let fault = reader.read_part(&request_part(), cursor).unwrap_err();
    assert!(fault.is_schema_violation());
}

#[test]
fn test_validating_pass_through_cursor_still_cascades() {
    // Validation short-circuits the read; closing the outward cursor must
    // still release the original source exactly once.
    let (source, closed, close_count) =
        RecordingSource::new(b"<wrong xmlns='http://www.test.org/services'/>");
    let handle = SourceHandle::new(source);

    let fixtures = TestFixtures::new();
    let mut exchange = ExchangeContext::new();
    exchange.set_content(handle.clone());

    let mut reader = StreamDataReader::new();
    reader.set_schema(fixture_grammar(&fixtures));
    reader.attach_exchange(exchange);

    let cursor = TokenCursor::open(handle).unwrap();
    let result = reader
        .read(
            &QName::new("http://www.test.org/services", "NullTestOperationRequest"),
            cursor,
            ReadTarget::Cursor,
        )
        .unwrap();
    let mut bound = result.into_cursor().unwrap();

    // The undeclared root is rejected mid-stream.
    assert!(bound.next_event().is_err());

    bound.close().unwrap();
    bound.close().unwrap();
    assert!(closed.load(Ordering::SeqCst));
    assert_eq!(close_count.load(Ordering::SeqCst), 1);
}

#[test]
fn test_warnings_collected_when_escalation_off() {
    let doc = br#"<tns:NullTestOperationRequest xmlns:tns="http://www.test.org/services" extra="1">
        <tns:requestId>100</tns:requestId>
    </tns:NullTestOperationRequest>"#;

    let fixtures = TestFixtures::new();
    let mut reader = StreamDataReader::new();
    reader.set_schema(fixture_grammar(&fixtures));
    reader.set_validation_options(ValidationOptions {
        fail_on_warning: false,
    });

    let handle = SourceHandle::new(std::io::Cursor::new(doc.to_vec()));
    let cursor = TokenCursor::open(handle).unwrap();
    reader.read_part(&request_part(), cursor).unwrap();

    assert_eq!(reader.warnings().len(), 1);
    assert!(reader.warnings()[0].message.contains("extra"));
}
