//! Container reader.
//!
//! `open` pulls the whole file into memory, validates magic and version,
//! and locates the packet stream's bounds from the metadata length stored
//! in the last four bytes. The file descriptor is released immediately;
//! iteration happens over the in-memory buffer.

use crate::codec;
use crate::metadata::ReplayMetadata;
use crate::packet::{PacketName, PacketRecord};
use crate::{varint, FormatError, FormatResult, FORMAT_VERSION, MAGIC};

use byteorder::{ByteOrder, LittleEndian};
use log::debug;
use std::fs;
use std::path::Path;

const HEADER_LEN: usize = 9;

pub struct ReplayReader {
    data: Vec<u8>,
    data_start: usize,
    data_end: usize,
    metadata: ReplayMetadata,
}

impl ReplayReader {
    pub fn open(path: impl AsRef<Path>) -> FormatResult<Self> {
        Self::from_bytes(fs::read(path)?)
    }

    pub fn from_bytes(data: Vec<u8>) -> FormatResult<Self> {
        if data.len() < HEADER_LEN + 4 {
            return Err(FormatError::truncated(format!(
                "file of {} bytes cannot hold a header and metadata length",
                data.len()
            )));
        }
        if &data[..MAGIC.len()] != MAGIC {
            return Err(FormatError::InvalidMagic);
        }
        let version = data[MAGIC.len()];
        if version != FORMAT_VERSION {
            return Err(FormatError::UnsupportedVersion { found: version });
        }

        let len_offset = data.len() - 4;
        let metadata_len = LittleEndian::read_u32(&data[len_offset..]) as usize;
        let metadata_start = len_offset
            .checked_sub(metadata_len)
            .filter(|start| *start >= HEADER_LEN)
            .ok_or_else(|| {
                FormatError::truncated(format!(
                    "metadata length {} overruns the packet stream",
                    metadata_len
                ))
            })?;
        let metadata =
            ReplayMetadata::from_payload(&codec::decode_payload(&data[metadata_start..len_offset])?)?;
        debug!(
            "opened replay container: {} bytes of packet stream, {} ms of recording",
            metadata_start - HEADER_LEN,
            metadata.duration_ms()
        );

        Ok(Self {
            data,
            data_start: HEADER_LEN,
            data_end: metadata_start,
            metadata,
        })
    }

    pub fn metadata(&self) -> &ReplayMetadata {
        &self.metadata
    }

    /// Walks the packet stream in order, rebuilding absolute timestamps as
    /// the running sum of deltas. The iterator fuses after the first error.
    pub fn records(&self) -> Records<'_> {
        Records {
            data: &self.data[..self.data_end],
            pos: self.data_start,
            timestamp: 0,
            failed: false,
        }
    }

    pub fn read_all(&self) -> FormatResult<Vec<PacketRecord>> {
        self.records().collect()
    }
}

pub struct Records<'a> {
    data: &'a [u8],
    pos: usize,
    timestamp: u64,
    failed: bool,
}

impl<'a> Records<'a> {
    fn next_record(&mut self) -> FormatResult<PacketRecord> {
        let (delta, read) = varint::decode(&self.data[self.pos..]).map_err(|e| match e {
            FormatError::VarIntTruncated => FormatError::truncated("record delta ran past the stream"),
            other => other,
        })?;
        self.pos += read;

        let header_end = self.pos + 5;
        if header_end > self.data.len() {
            return Err(FormatError::truncated("record header ran past the stream"));
        }
        let id = self.data[self.pos];
        let name = PacketName::from_id(id).ok_or(FormatError::UnknownPacketId(id))?;
        let len = LittleEndian::read_u32(&self.data[self.pos + 1..header_end]) as usize;
        self.pos = header_end;

        let data_end = self.pos.checked_add(len).filter(|end| *end <= self.data.len());
        let data_end = data_end.ok_or_else(|| {
            FormatError::truncated(format!("record payload of {} bytes ran past the stream", len))
        })?;
        let payload = codec::decode_payload(&self.data[self.pos..data_end])?;
        self.pos = data_end;

        self.timestamp += delta;
        Ok(PacketRecord::new(self.timestamp, name, payload))
    }
}

impl<'a> Iterator for Records<'a> {
    type Item = FormatResult<PacketRecord>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.failed || self.pos >= self.data.len() {
            return None;
        }
        let result = self.next_record();
        if result.is_err() {
            self.failed = true;
        }
        Some(result)
    }
}
