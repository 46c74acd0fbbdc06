//! Trace emission
//!
//! Records are fixed-width: an 8-byte tagged address followed by a 4-byte
//! signed size, both in native byte order, with no header, padding or
//! separators. The record count is the file length divided by
//! [`RECORD_SIZE`].

use crate::error::TracerError;
use crate::tag::{EventKind, TaggedAddress};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::{BufWriter, Read, Write};
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};

/// Size of one encoded record in bytes
pub const RECORD_SIZE: usize = 12;

/// One captured event
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TraceRecord {
    pub address: TaggedAddress,
    pub size: i32,
}

impl TraceRecord {
    pub fn new(address: TaggedAddress, size: i32) -> Self {
        Self { address, size }
    }

    /// Memory reference record for an untagged address
    pub fn mem_ref(addr: u64, size: i32) -> Self {
        Self::new(TaggedAddress::new(addr, EventKind::MemRef), size)
    }

    pub fn encode(&self) -> [u8; RECORD_SIZE] {
        let mut buf = [0u8; RECORD_SIZE];
        buf[..8].copy_from_slice(&self.address.raw().to_ne_bytes());
        buf[8..].copy_from_slice(&self.size.to_ne_bytes());
        buf
    }

    pub fn decode(buf: &[u8; RECORD_SIZE]) -> Self {
        let mut addr = [0u8; 8];
        let mut size = [0u8; 4];
        addr.copy_from_slice(&buf[..8]);
        size.copy_from_slice(&buf[8..]);
        Self {
            address: TaggedAddress::from_raw(u64::from_ne_bytes(addr)),
            size: i32::from_ne_bytes(size),
        }
    }
}

type BoxedWriter = Box<dyn Write + Send>;

struct Outputs {
    trace: BoxedWriter,
    debug: Option<BoxedWriter>,
}

/// Destination for trace records
///
/// Writes are serialised so records from concurrent callbacks never
/// interleave. Write errors are counted rather than returned, since emission
/// runs inside the traced program; the first one is logged.
pub struct TraceSink {
    outputs: Mutex<Option<Outputs>>,
    written: AtomicU64,
    failed: AtomicU64,
}

impl TraceSink {
    /// Sink writing to an arbitrary stream
    pub fn new(trace: impl Write + Send + 'static) -> Self {
        Self {
            outputs: Mutex::new(Some(Outputs {
                trace: Box::new(trace),
                debug: None,
            })),
            written: AtomicU64::new(0),
            failed: AtomicU64::new(0),
        }
    }

    /// Mirror every record as a text line `"{addr:#x} {size}"` to `debug`
    pub fn with_debug(self, debug: impl Write + Send + 'static) -> Self {
        if let Some(outputs) = self.outputs.lock().as_mut() {
            outputs.debug = Some(Box::new(debug));
        }
        self
    }

    /// Create the trace file (and optional debug mirror), truncating any
    /// existing contents
    pub fn create(path: &Path, debug_path: Option<&Path>) -> Result<Self, TracerError> {
        let sink = Self::new(BufWriter::new(create_file(path)?));
        match debug_path {
            Some(debug_path) => Ok(sink.with_debug(BufWriter::new(create_file(debug_path)?))),
            None => Ok(sink),
        }
    }

    /// Append one record
    pub fn emit(&self, record: TraceRecord) {
        let mut guard = self.outputs.lock();
        let Some(outputs) = guard.as_mut() else {
            return;
        };

        let mut result = outputs.trace.write_all(&record.encode());
        if let Some(debug) = outputs.debug.as_mut().filter(|_| result.is_ok()) {
            result = writeln!(debug, "{:#x} {}", record.address.address(), record.size);
        }

        match result {
            Ok(()) => {
                self.written.fetch_add(1, Ordering::Relaxed);
            }
            Err(err) => {
                if self.failed.fetch_add(1, Ordering::Relaxed) == 0 {
                    tracing::warn!("Failed to write trace record: {}", err);
                }
            }
        }
    }

    /// Flush and close the outputs; later records are dropped
    pub fn close(&self) -> Result<(), TracerError> {
        let Some(mut outputs) = self.outputs.lock().take() else {
            return Ok(());
        };
        outputs.trace.flush().map_err(TracerError::Flush)?;
        if let Some(debug) = outputs.debug.as_mut() {
            debug.flush().map_err(TracerError::Flush)?;
        }
        Ok(())
    }

    pub fn is_closed(&self) -> bool {
        self.outputs.lock().is_none()
    }

    /// Number of records successfully handed to the output
    pub fn records_written(&self) -> u64 {
        self.written.load(Ordering::Relaxed)
    }

    /// Number of records lost to write errors
    pub fn write_failures(&self) -> u64 {
        self.failed.load(Ordering::Relaxed)
    }
}

impl std::fmt::Debug for TraceSink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TraceSink")
            .field("closed", &self.is_closed())
            .field("written", &self.records_written())
            .field("failed", &self.write_failures())
            .finish()
    }
}

fn create_file(path: &Path) -> Result<File, TracerError> {
    File::create(path).map_err(|source| TracerError::OutputOpen {
        path: path.to_path_buf(),
        source,
    })
}

/// Decodes a binary trace stream back into records
pub struct TraceReader<R> {
    inner: R,
}

impl<R: Read> TraceReader<R> {
    pub fn new(inner: R) -> Self {
        Self { inner }
    }

    /// Read the next record, `Ok(None)` at a clean end of stream
    pub fn read_record(&mut self) -> Result<Option<TraceRecord>, TracerError> {
        let mut buf = [0u8; RECORD_SIZE];
        let mut filled = 0;
        while filled < RECORD_SIZE {
            match self.inner.read(&mut buf[filled..]) {
                Ok(0) => break,
                Ok(n) => filled += n,
                Err(err) if err.kind() == std::io::ErrorKind::Interrupted => continue,
                Err(err) => return Err(err.into()),
            }
        }
        match filled {
            0 => Ok(None),
            RECORD_SIZE => Ok(Some(TraceRecord::decode(&buf))),
            got => Err(TracerError::TruncatedRecord {
                got,
                expected: RECORD_SIZE,
            }),
        }
    }
}

impl TraceReader<std::io::BufReader<File>> {
    /// Open a trace file for reading
    pub fn open(path: &Path) -> Result<Self, TracerError> {
        Ok(Self::new(std::io::BufReader::new(File::open(path)?)))
    }
}

impl<R: Read> Iterator for TraceReader<R> {
    type Item = Result<TraceRecord, TracerError>;

    fn next(&mut self) -> Option<Self::Item> {
        self.read_record().transpose()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sim::SharedBuffer;

    struct BrokenPipe;

    impl Write for BrokenPipe {
        fn write(&mut self, _buf: &[u8]) -> std::io::Result<usize> {
            Err(std::io::ErrorKind::BrokenPipe.into())
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    #[test]
    fn test_record_layout() {
        let record = TraceRecord::new(TaggedAddress::new(0x1000, EventKind::Malloc), -4);
        let bytes = record.encode();

        assert_eq!(&bytes[..8], &0x8000_0000_0000_1000u64.to_ne_bytes());
        assert_eq!(&bytes[8..], &(-4i32).to_ne_bytes());
        assert_eq!(TraceRecord::decode(&bytes), record);
    }

    #[test]
    fn test_emit_appends_fixed_width_records() {
        let buffer = SharedBuffer::new();
        let sink = TraceSink::new(buffer.clone());

        sink.emit(TraceRecord::mem_ref(0x1000, 4));
        sink.emit(TraceRecord::mem_ref(0x2000, 8));
        sink.close().unwrap();

        let bytes = buffer.contents();
        assert_eq!(bytes.len(), 2 * RECORD_SIZE);
        assert_eq!(sink.records_written(), 2);

        let records: Vec<_> = TraceReader::new(bytes.as_slice())
            .collect::<Result<_, _>>()
            .unwrap();
        assert_eq!(
            records,
            vec![TraceRecord::mem_ref(0x1000, 4), TraceRecord::mem_ref(0x2000, 8)]
        );
    }

    #[test]
    fn test_debug_mirror() {
        let trace = SharedBuffer::new();
        let debug = SharedBuffer::new();
        let sink = TraceSink::new(trace).with_debug(debug.clone());

        sink.emit(TraceRecord::mem_ref(0x1000, 4));
        sink.emit(TraceRecord::mem_ref(0xabc, 1));
        sink.close().unwrap();

        assert_eq!(debug.text(), "0x1000 4\n0xabc 1\n");
    }

    #[test]
    fn test_write_errors_are_counted_not_raised() {
        let sink = TraceSink::new(BrokenPipe);
        sink.emit(TraceRecord::mem_ref(0x1000, 4));
        sink.emit(TraceRecord::mem_ref(0x1004, 4));

        assert_eq!(sink.records_written(), 0);
        assert_eq!(sink.write_failures(), 2);
    }

    #[test]
    fn test_emit_after_close_is_dropped() {
        let buffer = SharedBuffer::new();
        let sink = TraceSink::new(buffer.clone());
        sink.close().unwrap();
        assert!(sink.is_closed());

        sink.emit(TraceRecord::mem_ref(0x1000, 4));
        assert!(buffer.contents().is_empty());
        assert_eq!(sink.write_failures(), 0);
    }

    #[test]
    fn test_reader_rejects_partial_record() {
        let mut bytes = TraceRecord::mem_ref(0x10, 4).encode().to_vec();
        bytes.extend_from_slice(&[1, 2, 3]);

        let mut reader = TraceReader::new(bytes.as_slice());
        assert!(reader.read_record().unwrap().is_some());
        assert!(matches!(
            reader.read_record(),
            Err(TracerError::TruncatedRecord { got: 3, expected: RECORD_SIZE })
        ));
    }

    #[test]
    fn test_create_fails_for_missing_directory() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("no/such/dir/trace.out");
        assert!(matches!(
            TraceSink::create(&path, None),
            Err(TracerError::OutputOpen { .. })
        ));
    }
}
