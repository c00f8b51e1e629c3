//! World-state projection.
//!
//! The minimum derived state needed to bring a newly attached viewer up to
//! "what the world looks like right now": the freshest chunk per
//! coordinate, the bulk-chunk log, the live entity ids with the spawn
//! packets that produced them, the player-info log, and a bounded ring of
//! the most recent packets for post-join continuity.
//!
//! The projection is a pure function of the applied record prefix; seek
//! clears it and replays from the start.

use replay_format::{PacketName, PacketRecord, Payload};

use fxhash::{FxBuildHasher, FxHashSet};
use indexmap::IndexMap;
use std::collections::VecDeque;

type FxIndexMap<K, V> = IndexMap<K, V, FxBuildHasher>;

/// Capacity of the recent-packet ring.
pub const RECENT_RING_CAPACITY: usize = 1000;

#[derive(Default)]
pub struct WorldProjection {
    chunks: FxIndexMap<(i64, i64), PacketRecord>,
    bulk_chunks: Vec<PacketRecord>,
    entity_ids: FxHashSet<i64>,
    named_entity_spawns: Vec<PacketRecord>,
    living_entity_spawns: Vec<PacketRecord>,
    object_entity_spawns: Vec<PacketRecord>,
    player_info: Vec<PacketRecord>,
    recent: VecDeque<PacketRecord>,
}

impl WorldProjection {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn clear(&mut self) {
        self.chunks.clear();
        self.bulk_chunks.clear();
        self.entity_ids.clear();
        self.named_entity_spawns.clear();
        self.living_entity_spawns.clear();
        self.object_entity_spawns.clear();
        self.player_info.clear();
        self.recent.clear();
    }

    pub fn apply(&mut self, record: &PacketRecord) {
        match record.name {
            PacketName::MapChunk => {
                let x = record.payload.get("x").and_then(Payload::as_int);
                let z = record.payload.get("z").and_then(Payload::as_int);
                if let (Some(x), Some(z)) = (x, z) {
                    self.chunks.insert((x, z), record.clone());
                }
            }
            PacketName::MapChunkBulk => {
                self.bulk_chunks.push(record.clone());
            }
            PacketName::NamedEntitySpawn => {
                self.track_spawn(record);
                self.named_entity_spawns.push(record.clone());
            }
            PacketName::SpawnEntityLiving => {
                self.track_spawn(record);
                self.living_entity_spawns.push(record.clone());
            }
            PacketName::SpawnEntity => {
                self.track_spawn(record);
                self.object_entity_spawns.push(record.clone());
            }
            PacketName::EntityDestroy => {
                if let Some(ids) = record.payload.get("entityIds").and_then(Payload::as_list) {
                    for id in ids.iter().filter_map(Payload::as_int) {
                        self.entity_ids.remove(&id);
                    }
                }
            }
            PacketName::PlayerInfo => {
                self.player_info.push(record.clone());
            }
            _ => {}
        }

        self.recent.push_back(record.clone());
        if self.recent.len() > RECENT_RING_CAPACITY {
            self.recent.pop_front();
        }
    }

    fn track_spawn(&mut self, record: &PacketRecord) {
        if let Some(id) = record.payload.get("entityId").and_then(Payload::as_int) {
            self.entity_ids.insert(id);
        }
    }

    /// Freshest chunk packet per coordinate; iteration order among chunks
    /// is unspecified.
    pub fn chunks(&self) -> impl Iterator<Item = &PacketRecord> {
        self.chunks.values()
    }

    pub fn chunk_count(&self) -> usize {
        self.chunks.len()
    }

    pub fn bulk_chunks(&self) -> &[PacketRecord] {
        &self.bulk_chunks
    }

    pub fn player_info_log(&self) -> &[PacketRecord] {
        &self.player_info
    }

    /// Spawn packets of currently known entities, grouped by spawn kind in
    /// replay order.
    pub fn entity_spawn_log(&self) -> impl Iterator<Item = &PacketRecord> {
        self.named_entity_spawns
            .iter()
            .chain(self.living_entity_spawns.iter())
            .chain(self.object_entity_spawns.iter())
    }

    pub fn recent(&self) -> impl Iterator<Item = &PacketRecord> {
        self.recent.iter()
    }

    pub fn recent_len(&self) -> usize {
        self.recent.len()
    }

    pub fn contains_entity(&self, id: i64) -> bool {
        self.entity_ids.contains(&id)
    }

    pub fn entity_count(&self) -> usize {
        self.entity_ids.len()
    }
}
