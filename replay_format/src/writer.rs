//! Container writer with pluggable byte sinks.
//!
//! A writer emits the header exactly once, then framed records
//! (`varint(delta) ++ u8(id) ++ u32_le(len) ++ payload`), and finally the
//! metadata blob followed by its `u32_le` length suffix. The three sink
//! flavors (file, memory, streaming callback) share the framing code and
//! therefore produce byte-identical output for identical input.

use crate::codec;
use crate::metadata::ReplayMetadata;
use crate::packet::PacketRecord;
use crate::{varint, FormatError, FormatResult, FORMAT_VERSION, MAGIC};

use byteorder::{LittleEndian, WriteBytesExt};
use std::fs::File;
use std::io::{self, BufWriter, Write};
use std::path::Path;

/// Destination for the framed byte chunks of one replay file. Each call
/// receives exactly one frame: the header, one record, or the metadata
/// block.
pub trait RecordSink {
    fn write_chunk(&mut self, chunk: &[u8]) -> io::Result<()>;
    fn flush(&mut self) -> io::Result<()>;
}

pub struct FileSink {
    inner: BufWriter<File>,
}

impl FileSink {
    pub fn create(path: impl AsRef<Path>) -> io::Result<Self> {
        Ok(Self {
            inner: BufWriter::new(File::create(path)?),
        })
    }
}

impl RecordSink for FileSink {
    fn write_chunk(&mut self, chunk: &[u8]) -> io::Result<()> {
        self.inner.write_all(chunk)
    }
    fn flush(&mut self) -> io::Result<()> {
        self.inner.flush()
    }
}

#[derive(Default)]
pub struct MemorySink {
    buf: Vec<u8>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }
    pub fn bytes(&self) -> &[u8] {
        &self.buf
    }
    pub fn into_bytes(self) -> Vec<u8> {
        self.buf
    }
}

impl RecordSink for MemorySink {
    fn write_chunk(&mut self, chunk: &[u8]) -> io::Result<()> {
        self.buf.extend_from_slice(chunk);
        Ok(())
    }
    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

/// Collects the file like [`MemorySink`] and additionally hands every
/// chunk to a callback as it is produced.
pub struct StreamSink {
    buf: Vec<u8>,
    on_chunk: Box<dyn FnMut(&[u8]) + Send>,
}

impl StreamSink {
    pub fn new(on_chunk: impl FnMut(&[u8]) + Send + 'static) -> Self {
        Self {
            buf: Vec::new(),
            on_chunk: Box::new(on_chunk),
        }
    }
    pub fn into_bytes(self) -> Vec<u8> {
        self.buf
    }
}

impl RecordSink for StreamSink {
    fn write_chunk(&mut self, chunk: &[u8]) -> io::Result<()> {
        (self.on_chunk)(chunk);
        self.buf.extend_from_slice(chunk);
        Ok(())
    }
    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

pub struct ReplayWriter<S: RecordSink> {
    sink: S,
    last_timestamp: u64,
    header_written: bool,
    records_written: u64,
}

impl ReplayWriter<FileSink> {
    pub fn create(path: impl AsRef<Path>) -> FormatResult<Self> {
        Ok(Self::new(FileSink::create(path)?))
    }
}

impl ReplayWriter<MemorySink> {
    pub fn memory() -> Self {
        Self::new(MemorySink::new())
    }
}

impl ReplayWriter<StreamSink> {
    pub fn streaming(on_chunk: impl FnMut(&[u8]) + Send + 'static) -> Self {
        Self::new(StreamSink::new(on_chunk))
    }
}

impl<S: RecordSink> ReplayWriter<S> {
    pub fn new(sink: S) -> Self {
        Self {
            sink,
            last_timestamp: 0,
            header_written: false,
            records_written: 0,
        }
    }

    pub fn records_written(&self) -> u64 {
        self.records_written
    }

    /// Emits magic and version. Must be called exactly once, before any
    /// record.
    pub fn write_header(&mut self) -> FormatResult<()> {
        if self.header_written {
            return Err(FormatError::HeaderAlreadyWritten);
        }
        let mut frame = Vec::with_capacity(MAGIC.len() + 1);
        frame.extend_from_slice(MAGIC);
        frame.push(FORMAT_VERSION);
        self.sink.write_chunk(&frame)?;
        self.header_written = true;
        Ok(())
    }

    pub fn write_record(&mut self, record: &PacketRecord) -> FormatResult<()> {
        if !self.header_written {
            return Err(FormatError::HeaderNotWritten);
        }
        // Timestamps must not regress: the delta is unsigned on the wire.
        if record.timestamp < self.last_timestamp {
            return Err(FormatError::TimestampRegression {
                timestamp: record.timestamp,
                last: self.last_timestamp,
            });
        }
        let delta = record.timestamp - self.last_timestamp;

        let data = codec::encode_payload(&record.payload)?;
        if data.len() > u32::MAX as usize {
            return Err(FormatError::RecordTooLarge { len: data.len() });
        }

        let mut frame = Vec::with_capacity(data.len() + 10);
        varint::encode_into(delta, &mut frame);
        frame.push(record.name.id());
        frame.write_u32::<LittleEndian>(data.len() as u32)?;
        frame.extend_from_slice(&data);
        self.sink.write_chunk(&frame)?;

        self.last_timestamp = record.timestamp;
        self.records_written += 1;
        Ok(())
    }

    /// Emits the metadata blob and its length suffix, flushes, and returns
    /// the sink for callers that need the collected bytes.
    pub fn finish(mut self, metadata: &ReplayMetadata) -> FormatResult<S> {
        if !self.header_written {
            return Err(FormatError::HeaderNotWritten);
        }
        let blob = codec::encode_payload(&metadata.to_payload())?;
        if blob.len() > u32::MAX as usize {
            return Err(FormatError::RecordTooLarge { len: blob.len() });
        }
        let mut frame = Vec::with_capacity(blob.len() + 4);
        frame.extend_from_slice(&blob);
        frame.write_u32::<LittleEndian>(blob.len() as u32)?;
        self.sink.write_chunk(&frame)?;
        self.sink.flush()?;
        Ok(self.sink)
    }
}
