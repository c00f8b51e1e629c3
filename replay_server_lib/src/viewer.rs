//! One connected viewer.

use crate::sink::PacketSink;

use replay_format::{payload_map, Payload};
use serde_json::json;
use uuid::Uuid;

/// Synchronization frames written outside the recorded stream. Their wire
/// encoding belongs to the protocol layer behind the sink.
pub mod frames {
    pub const LOGIN: &str = "login";
    pub const SPAWN_POSITION: &str = "spawn_position";
    pub const POSITION: &str = "position";
    pub const RESPAWN: &str = "respawn";
    pub const CHAT: &str = "chat";
}

/// Chat-message screen positions of the target protocol.
const CHAT_POSITION_CHAT: i64 = 0;
const CHAT_POSITION_ACTION_BAR: i64 = 2;

pub struct ViewerSession {
    pub id: i32,
    pub username: String,
    pub uuid: Uuid,
    sink: Box<dyn PacketSink>,
}

impl ViewerSession {
    pub fn new(id: i32, username: String, uuid: Uuid, sink: Box<dyn PacketSink>) -> Self {
        Self {
            id,
            username,
            uuid,
            sink,
        }
    }

    pub async fn write(&self, name: &str, payload: &Payload) -> anyhow::Result<()> {
        self.sink.write_packet(name, payload).await
    }

    pub async fn send_chat(&self, message: &str) -> anyhow::Result<()> {
        self.write(frames::CHAT, &chat_payload(message, CHAT_POSITION_CHAT))
            .await
    }

    pub async fn send_action_bar(&self, message: &str) -> anyhow::Result<()> {
        self.write(frames::CHAT, &chat_payload(message, CHAT_POSITION_ACTION_BAR))
            .await
    }

    pub async fn disconnect(&self, reason: &str) -> anyhow::Result<()> {
        self.sink.disconnect(reason).await
    }
}

fn chat_payload(message: &str, position: i64) -> Payload {
    payload_map! {
        "message" => json!({ "text": message }).to_string(),
        "position" => position,
    }
}
