//! The packet-name table and the record type stored in the container.

use crate::payload::Payload;

use num_derive::FromPrimitive;
use std::fmt;

/// The state-bearing packet types admitted into a recording, with their
/// stable one-byte container ids.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, FromPrimitive)]
#[repr(u8)]
pub enum PacketName {
    MapChunk = 1,
    MapChunkBulk = 2,
    BlockChange = 3,
    MultiBlockChange = 4,
    NamedEntitySpawn = 5,
    SpawnEntityLiving = 6,
    SpawnEntity = 7,
    EntityVelocity = 8,
    EntityTeleport = 9,
    EntityMoveLook = 10,
    RelEntityMove = 11,
    EntityLook = 12,
    EntityHeadRotation = 13,
    EntityDestroy = 14,
    Chat = 15,
    PlayerInfo = 16,
    UpdateSign = 17,
    Explosion = 18,
    EntityEquipment = 19,
    PlayerAbilities = 20,
    EntityMetadata = 21,
}

impl PacketName {
    pub const ALL: [PacketName; 21] = [
        PacketName::MapChunk,
        PacketName::MapChunkBulk,
        PacketName::BlockChange,
        PacketName::MultiBlockChange,
        PacketName::NamedEntitySpawn,
        PacketName::SpawnEntityLiving,
        PacketName::SpawnEntity,
        PacketName::EntityVelocity,
        PacketName::EntityTeleport,
        PacketName::EntityMoveLook,
        PacketName::RelEntityMove,
        PacketName::EntityLook,
        PacketName::EntityHeadRotation,
        PacketName::EntityDestroy,
        PacketName::Chat,
        PacketName::PlayerInfo,
        PacketName::UpdateSign,
        PacketName::Explosion,
        PacketName::EntityEquipment,
        PacketName::PlayerAbilities,
        PacketName::EntityMetadata,
    ];

    pub fn id(self) -> u8 {
        self as u8
    }

    pub fn from_id(id: u8) -> Option<Self> {
        num_traits::FromPrimitive::from_u8(id)
    }

    /// Protocol-level name as emitted by the packet source.
    pub fn as_str(self) -> &'static str {
        match self {
            PacketName::MapChunk => "map_chunk",
            PacketName::MapChunkBulk => "map_chunk_bulk",
            PacketName::BlockChange => "block_change",
            PacketName::MultiBlockChange => "multi_block_change",
            PacketName::NamedEntitySpawn => "named_entity_spawn",
            PacketName::SpawnEntityLiving => "spawn_entity_living",
            PacketName::SpawnEntity => "spawn_entity",
            PacketName::EntityVelocity => "entity_velocity",
            PacketName::EntityTeleport => "entity_teleport",
            PacketName::EntityMoveLook => "entity_move_look",
            PacketName::RelEntityMove => "rel_entity_move",
            PacketName::EntityLook => "entity_look",
            PacketName::EntityHeadRotation => "entity_head_rotation",
            PacketName::EntityDestroy => "entity_destroy",
            PacketName::Chat => "chat",
            PacketName::PlayerInfo => "player_info",
            PacketName::UpdateSign => "update_sign",
            PacketName::Explosion => "explosion",
            PacketName::EntityEquipment => "entity_equipment",
            PacketName::PlayerAbilities => "player_abilities",
            PacketName::EntityMetadata => "entity_metadata",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        PacketName::ALL.iter().copied().find(|p| p.as_str() == name)
    }
}

impl fmt::Display for PacketName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One `(timestamp, name, payload)` triple as stored in the container.
/// Timestamps are milliseconds from recording start and non-decreasing
/// across a well-formed stream.
#[derive(Clone, Debug, PartialEq)]
pub struct PacketRecord {
    pub timestamp: u64,
    pub name: PacketName,
    pub payload: Payload,
}

impl PacketRecord {
    pub fn new(timestamp: u64, name: PacketName, payload: Payload) -> Self {
        Self {
            timestamp,
            name,
            payload,
        }
    }
}
