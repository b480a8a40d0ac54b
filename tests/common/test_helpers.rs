#![allow(dead_code)]

use std::io::{self, Read};
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use xmlwire::ByteSource;

/// Test fixture paths
pub struct TestFixtures {
    pub fixtures_dir: PathBuf,
}

impl TestFixtures {
    pub fn new() -> Self {
        let fixtures_dir = PathBuf::from(env!("CARGO_MANIFEST_DIR"))
            .join("tests")
            .join("fixtures");

        Self { fixtures_dir }
    }

    pub fn schema(&self) -> PathBuf {
        self.fixtures_dir.join("schema.xsd")
    }

    pub fn valid_xml(&self) -> PathBuf {
        self.fixtures_dir.join("test-valid.xml")
    }

    pub fn invalid_xml(&self) -> PathBuf {
        self.fixtures_dir.join("test-invalid.xml")
    }

    pub fn malformed_xml(&self) -> PathBuf {
        self.fixtures_dir.join("test-malformed.xml")
    }

    pub fn hinted_xml(&self) -> PathBuf {
        self.fixtures_dir.join("test-with-hint.xml")
    }
}

/// In-memory byte source that records whether and how often it was closed,
/// the counterpart of a stream that knows its own closed state.
pub struct RecordingSource {
    data: io::Cursor<Vec<u8>>,
    closed: Arc<AtomicBool>,
    close_count: Arc<AtomicUsize>,
}

impl RecordingSource {
    pub fn new(data: &[u8]) -> (Self, Arc<AtomicBool>, Arc<AtomicUsize>) {
        let closed = Arc::new(AtomicBool::new(false));
        let close_count = Arc::new(AtomicUsize::new(0));
        (
            Self {
                data: io::Cursor::new(data.to_vec()),
                closed: Arc::clone(&closed),
                close_count: Arc::clone(&close_count),
            },
            closed,
            close_count,
        )
    }
}

impl Read for RecordingSource {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.data.read(buf)
    }
}

impl ByteSource for RecordingSource {
    fn close(&mut self) -> io::Result<()> {
        self.closed.store(true, Ordering::SeqCst);
        self.close_count.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}
