//! The seams between the playback core and the wire protocol.

use replay_format::Payload;

use async_trait::async_trait;
use tokio::net::TcpStream;
use uuid::Uuid;

/// Write half of one connected viewer. Implementations own the protocol
/// serialization and the socket; writes are best-effort from the
/// scheduler's perspective and errors are reported, never fatal.
#[async_trait]
pub trait PacketSink: Send + Sync {
    async fn write_packet(&self, name: &str, payload: &Payload) -> anyhow::Result<()>;
    async fn disconnect(&self, reason: &str) -> anyhow::Result<()>;
}

/// A viewer whose protocol handshake completed.
pub struct AcceptedViewer {
    pub username: String,
    pub uuid: Uuid,
    pub sink: Box<dyn PacketSink>,
}

/// Snapshot handed to the handshake layer so server-list pings can be
/// answered without touching playback state.
#[derive(Clone, Debug)]
pub struct ServerStatus {
    pub motd: String,
    pub version: String,
    pub max_players: u32,
    pub online: usize,
}

/// Drives the protocol handshake on a fresh connection. Returns a sink
/// plus identity for viewers that log in, or `None` for connections that
/// only queried status.
#[async_trait]
pub trait ViewerAcceptor: Send + Sync {
    async fn accept(
        &self,
        stream: TcpStream,
        status: ServerStatus,
    ) -> anyhow::Result<Option<AcceptedViewer>>;
}
