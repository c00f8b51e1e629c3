//! The trailing metadata block of a replay file.

use crate::payload::{Payload, PayloadMap};
use crate::{payload_map, FormatError, FormatResult};

const KEY_SPAWN_POSITION: &str = "spawnPosition";
const KEY_START_TIME: &str = "startTime";
const KEY_END_TIME: &str = "endTime";
const KEY_BOT_USERNAME: &str = "botUsername";
const KEY_VERSION_TAG: &str = "versionTag";

/// Session-level facts stored after the packet stream: the recording time
/// span, the recording bot's identity, and where viewers should spawn.
#[derive(Clone, Debug, PartialEq)]
pub struct ReplayMetadata {
    /// Absent only in recordings that were never meant to be served.
    pub spawn_position: Option<(i32, i32, i32)>,
    /// Epoch milliseconds.
    pub start_time: i64,
    /// Epoch milliseconds, never earlier than `start_time`.
    pub end_time: i64,
    pub bot_username: String,
    pub version_tag: String,
}

impl ReplayMetadata {
    pub fn duration_ms(&self) -> u64 {
        (self.end_time - self.start_time).max(0) as u64
    }

    pub fn to_payload(&self) -> Payload {
        let mut map = match payload_map! {
            KEY_START_TIME => self.start_time,
            KEY_END_TIME => self.end_time,
            KEY_BOT_USERNAME => self.bot_username.clone(),
            KEY_VERSION_TAG => self.version_tag.clone(),
        } {
            Payload::Map(map) => map,
            _ => unreachable!(),
        };
        if let Some((x, y, z)) = self.spawn_position {
            map.insert(
                KEY_SPAWN_POSITION.to_string(),
                Payload::List(vec![Payload::from(x), Payload::from(y), Payload::from(z)]),
            );
        }
        Payload::Map(map)
    }

    pub fn from_payload(payload: &Payload) -> FormatResult<Self> {
        let map = payload
            .as_map()
            .ok_or_else(|| FormatError::metadata("metadata block is not a map"))?;

        let metadata = Self {
            spawn_position: match map.get(KEY_SPAWN_POSITION) {
                None => None,
                Some(value) => Some(parse_position(value)?),
            },
            start_time: require_int(map, KEY_START_TIME)?,
            end_time: require_int(map, KEY_END_TIME)?,
            bot_username: require_str(map, KEY_BOT_USERNAME)?,
            version_tag: require_str(map, KEY_VERSION_TAG)?,
        };
        if metadata.end_time < metadata.start_time {
            return Err(FormatError::metadata(format!(
                "endTime {} precedes startTime {}",
                metadata.end_time, metadata.start_time
            )));
        }
        Ok(metadata)
    }
}

fn require_int(map: &PayloadMap, key: &str) -> FormatResult<i64> {
    map.get(key)
        .and_then(Payload::as_int)
        .ok_or_else(|| FormatError::metadata(format!("missing integer field {:?}", key)))
}

fn require_str(map: &PayloadMap, key: &str) -> FormatResult<String> {
    map.get(key)
        .and_then(Payload::as_str)
        .map(str::to_string)
        .ok_or_else(|| FormatError::metadata(format!("missing string field {:?}", key)))
}

fn parse_position(value: &Payload) -> FormatResult<(i32, i32, i32)> {
    let items = value
        .as_list()
        .filter(|items| items.len() == 3)
        .ok_or_else(|| FormatError::metadata("spawnPosition is not a 3-element list"))?;
    let mut coords = [0i32; 3];
    for (slot, item) in coords.iter_mut().zip(items) {
        *slot = item
            .as_int()
            .ok_or_else(|| FormatError::metadata("spawnPosition coordinate is not an integer"))?
            as i32;
    }
    Ok((coords[0], coords[1], coords[2]))
}
