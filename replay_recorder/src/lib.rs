//! Capture-side adapter: turns a bot session's packet callbacks into
//! records appended to a replay container.
//!
//! The recorder admits only the packet names of the container's id table,
//! stamps each record with milliseconds since recording start, and
//! fabricates one `named_entity_spawn` for the recording bot itself on the
//! first spawn signal so the viewpoint actor is visible in playback.

use replay_format::writer::{FileSink, MemorySink, StreamSink};
use replay_format::{
    payload_map, FormatResult, PacketName, PacketRecord, Payload, ReplayMetadata, ReplayWriter,
};

use log::*;
use std::path::PathBuf;
use std::time::{Instant, SystemTime, UNIX_EPOCH};

/// Where the container bytes go.
pub enum SaveMode {
    /// Write incrementally to a file.
    File { output_path: PathBuf },
    /// Collect in memory; bytes are returned by [`Recorder::finish`].
    Memory,
    /// Collect in memory and additionally hand every produced chunk to a
    /// callback as it is written.
    Stream {
        on_chunk: Box<dyn FnMut(&[u8]) + Send>,
    },
}

pub struct RecorderConfig {
    pub save_mode: SaveMode,
    /// Log every admitted and filtered packet.
    pub debug: bool,
}

/// Identity baked into the recording's metadata on finish.
pub struct BotIdentity {
    pub username: String,
    pub version_tag: String,
    pub spawn_position: Option<(i32, i32, i32)>,
}

/// Callbacks a packet source drives during a recording session. Errors are
/// swallowed and logged here; use the inherent [`Recorder`] methods to
/// observe them.
pub trait PacketObserver {
    fn packet(&mut self, name: &str, payload: Payload);
    fn bot_spawn(&mut self, entity_id: i64, position: (i32, i32, i32));
}

enum RecorderWriter {
    File(ReplayWriter<FileSink>),
    Memory(ReplayWriter<MemorySink>),
    Stream(ReplayWriter<StreamSink>),
}

impl RecorderWriter {
    fn write_record(&mut self, record: &PacketRecord) -> FormatResult<()> {
        match self {
            RecorderWriter::File(writer) => writer.write_record(record),
            RecorderWriter::Memory(writer) => writer.write_record(record),
            RecorderWriter::Stream(writer) => writer.write_record(record),
        }
    }

    fn finish(self, metadata: &ReplayMetadata) -> FormatResult<Option<Vec<u8>>> {
        match self {
            RecorderWriter::File(writer) => {
                writer.finish(metadata)?;
                Ok(None)
            }
            RecorderWriter::Memory(writer) => Ok(Some(writer.finish(metadata)?.into_bytes())),
            RecorderWriter::Stream(writer) => Ok(Some(writer.finish(metadata)?.into_bytes())),
        }
    }
}

pub struct Recorder {
    writer: RecorderWriter,
    started_at: Instant,
    start_epoch_ms: i64,
    bot_spawned: bool,
    records: u64,
    debug: bool,
}

impl Recorder {
    /// Opens the configured sink and writes the container header.
    pub fn start(config: RecorderConfig) -> FormatResult<Self> {
        let mut writer = match config.save_mode {
            SaveMode::File { output_path } => {
                RecorderWriter::File(ReplayWriter::create(output_path)?)
            }
            SaveMode::Memory => RecorderWriter::Memory(ReplayWriter::memory()),
            SaveMode::Stream { on_chunk } => {
                RecorderWriter::Stream(ReplayWriter::new(StreamSink::new(on_chunk)))
            }
        };
        match &mut writer {
            RecorderWriter::File(w) => w.write_header()?,
            RecorderWriter::Memory(w) => w.write_header()?,
            RecorderWriter::Stream(w) => w.write_header()?,
        }
        Ok(Self {
            writer,
            started_at: Instant::now(),
            start_epoch_ms: epoch_ms(),
            bot_spawned: false,
            records: 0,
            debug: config.debug,
        })
    }

    pub fn elapsed_ms(&self) -> u64 {
        self.started_at.elapsed().as_millis() as u64
    }

    pub fn record_count(&self) -> u64 {
        self.records
    }

    /// Admits one packet if its name is in the id table. Returns whether
    /// the packet was recorded.
    pub fn record(&mut self, name: &str, payload: Payload) -> FormatResult<bool> {
        let packet = match PacketName::from_name(name) {
            Some(packet) => packet,
            None => {
                if self.debug {
                    trace!("filtered packet {}", name);
                }
                return Ok(false);
            }
        };
        let record = PacketRecord::new(self.elapsed_ms(), packet, payload);
        self.writer.write_record(&record)?;
        self.records += 1;
        if self.debug {
            trace!("recorded {} at {} ms", name, record.timestamp);
        }
        Ok(true)
    }

    /// Fabricates the bot's own `named_entity_spawn` once, so the recorded
    /// viewpoint actor shows up for viewers.
    pub fn record_bot_spawn(
        &mut self,
        entity_id: i64,
        position: (i32, i32, i32),
    ) -> FormatResult<bool> {
        if self.bot_spawned {
            return Ok(false);
        }
        let (x, y, z) = position;
        let record = PacketRecord::new(
            self.elapsed_ms(),
            PacketName::NamedEntitySpawn,
            payload_map! {
                "entityId" => entity_id,
                "x" => x,
                "y" => y,
                "z" => z,
                "yaw" => 0,
                "pitch" => 0,
            },
        );
        self.writer.write_record(&record)?;
        self.records += 1;
        self.bot_spawned = true;
        info!("recorded bot spawn for entity {}", entity_id);
        Ok(true)
    }

    /// Closes the container with the session metadata. Returns the
    /// collected bytes for the memory and stream modes.
    pub fn finish(self, identity: BotIdentity) -> FormatResult<Option<Vec<u8>>> {
        let metadata = ReplayMetadata {
            spawn_position: identity.spawn_position,
            start_time: self.start_epoch_ms,
            end_time: epoch_ms(),
            bot_username: identity.username,
            version_tag: identity.version_tag,
        };
        info!(
            "finishing recording: {} records over {} ms",
            self.records,
            metadata.duration_ms()
        );
        self.writer.finish(&metadata)
    }
}

impl PacketObserver for Recorder {
    fn packet(&mut self, name: &str, payload: Payload) {
        if let Err(error) = self.record(name, payload) {
            error!("failed to record {}: {}", name, error);
        }
    }

    fn bot_spawn(&mut self, entity_id: i64, position: (i32, i32, i32)) {
        if let Err(error) = self.record_bot_spawn(entity_id, position) {
            error!("failed to record bot spawn: {}", error);
        }
    }
}

fn epoch_ms() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or(0)
}
