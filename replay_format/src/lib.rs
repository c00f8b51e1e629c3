//! On-disk container for recorded game packet streams.
//!
//! A replay file is a fixed header (magic + format version), a stream of
//! framed packet records with delta-encoded timestamps, and a trailing
//! metadata block addressed by a `u32` length stored in the last four bytes
//! of the file. Payloads are schema-less trees serialized through a
//! swappable binary codec (see [`codec`]).

pub mod codec;
pub mod metadata;
pub mod packet;
pub mod payload;
pub mod reader;
pub mod varint;
pub mod writer;

pub use metadata::ReplayMetadata;
pub use packet::{PacketName, PacketRecord};
pub use payload::{Payload, PayloadMap};
pub use reader::ReplayReader;
pub use writer::{FileSink, MemorySink, RecordSink, ReplayWriter, StreamSink};

use thiserror::Error;

/// Eight ASCII bytes at offset zero of every replay file.
pub const MAGIC: &[u8; 8] = b"MCREPLAY";
/// The only format version this crate reads and writes.
pub const FORMAT_VERSION: u8 = 0x01;

#[derive(Error, Debug)]
pub enum FormatError {
    #[error("{0}")]
    Io(#[from] std::io::Error),
    #[error("invalid magic bytes, not a replay file")]
    InvalidMagic,
    #[error("unsupported format version {found}")]
    UnsupportedVersion { found: u8 },
    #[error("unknown packet id {0}")]
    UnknownPacketId(u8),
    #[error("unknown packet name {0:?}")]
    UnknownPacketName(String),
    #[error("truncated file: {detail}")]
    Truncated { detail: String },
    #[error("varint did not terminate within {} bytes", varint::MAX_LEN)]
    VarIntTooLong,
    #[error("varint ran past the end of the buffer")]
    VarIntTruncated,
    #[error("timestamp {timestamp} is earlier than the previous record at {last}")]
    TimestampRegression { timestamp: u64, last: u64 },
    #[error("header has already been written")]
    HeaderAlreadyWritten,
    #[error("header must be written before records")]
    HeaderNotWritten,
    #[error("record payload of {len} bytes exceeds the frame length field")]
    RecordTooLarge { len: usize },
    #[error("payload codec: {0}")]
    Codec(#[from] bincode::Error),
    #[error("invalid byte-blob envelope: {detail}")]
    BlobEnvelope { detail: String },
    #[error("invalid metadata: {detail}")]
    Metadata { detail: String },
}

impl FormatError {
    pub fn truncated(detail: impl Into<String>) -> Self {
        Self::Truncated {
            detail: detail.into(),
        }
    }
    pub fn metadata(detail: impl Into<String>) -> Self {
        Self::Metadata {
            detail: detail.into(),
        }
    }
}

pub type FormatResult<T> = Result<T, FormatError>;
