//! Listener plumbing: load a real file, bind, accept a connection through a
//! stub handshake and watch the session come up.

use replay_server_lib::{
    AcceptedViewer, PacketSink, ReplayEvent, ReplayServer, ServerConfig, ServerStatus,
    ViewerAcceptor,
};

use async_trait::async_trait;
use replay_format::{payload_map, PacketName, PacketRecord, Payload, ReplayMetadata, ReplayWriter};
use std::sync::{Arc, Mutex};
use tokio::net::TcpStream;
use uuid::Uuid;

#[derive(Clone, Default)]
struct CollectingSink {
    written: Arc<Mutex<Vec<String>>>,
}

#[async_trait]
impl PacketSink for CollectingSink {
    async fn write_packet(&self, name: &str, _payload: &Payload) -> anyhow::Result<()> {
        self.written.lock().unwrap().push(name.to_string());
        Ok(())
    }

    async fn disconnect(&self, _reason: &str) -> anyhow::Result<()> {
        Ok(())
    }
}

struct StubAcceptor {
    sink: CollectingSink,
    seen_status: Arc<Mutex<Option<ServerStatus>>>,
}

#[async_trait]
impl ViewerAcceptor for StubAcceptor {
    async fn accept(
        &self,
        _stream: TcpStream,
        status: ServerStatus,
    ) -> anyhow::Result<Option<AcceptedViewer>> {
        *self.seen_status.lock().unwrap() = Some(status);
        Ok(Some(AcceptedViewer {
            username: "tester".to_string(),
            uuid: Uuid::new_v4(),
            sink: Box::new(self.sink.clone()),
        }))
    }
}

fn write_replay_file(path: &std::path::Path) {
    let mut writer = ReplayWriter::memory();
    writer.write_header().unwrap();
    writer
        .write_record(&PacketRecord::new(
            0,
            PacketName::Chat,
            payload_map! { "message" => "recorded" },
        ))
        .unwrap();
    let metadata = ReplayMetadata {
        spawn_position: Some((0, 64, 0)),
        start_time: 0,
        end_time: 65_000,
        bot_username: "bot".to_string(),
        version_tag: "1.8.9".to_string(),
    };
    let bytes = writer.finish(&metadata).unwrap().into_bytes();
    std::fs::write(path, bytes).unwrap();
}

#[tokio::test]
async fn initialize_serves_a_connecting_viewer() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("session.mcreplay");
    write_replay_file(&path);

    let mut config = ServerConfig::new(&path);
    config.host = "127.0.0.1".to_string();
    config.port = 0;

    let sink = CollectingSink::default();
    let seen_status = Arc::new(Mutex::new(None));
    let acceptor = Arc::new(StubAcceptor {
        sink: sink.clone(),
        seen_status: Arc::clone(&seen_status),
    });

    let (server, events) = ReplayServer::initialize(config, acceptor).await.unwrap();

    let mut addr = None;
    let mut loaded_packets = None;
    while addr.is_none() || loaded_packets.is_none() {
        match events.recv_async().await.unwrap() {
            ReplayEvent::Listening { addr: bound } => addr = Some(bound),
            ReplayEvent::ReplayLoaded { packet_count, .. } => loaded_packets = Some(packet_count),
            _ => {}
        }
    }
    assert_eq!(loaded_packets, Some(1));

    let _conn = TcpStream::connect(addr.unwrap()).await.unwrap();
    loop {
        if let ReplayEvent::ViewerJoined { username, .. } = events.recv_async().await.unwrap() {
            assert_eq!(username, "tester");
            break;
        }
    }

    // The handshake saw a generated banner with the replay duration.
    let status = seen_status.lock().unwrap().clone().unwrap();
    assert_eq!(status.motd, "Replay Viewer\nDuration: 1:05");
    assert_eq!(status.online, 0);

    // The session received its initial frames.
    let written = sink.written.lock().unwrap().clone();
    assert_eq!(written, vec!["login", "spawn_position", "position"]);

    server.close().await.unwrap();
}

#[tokio::test]
async fn initialize_rejects_missing_files() {
    let config = ServerConfig::new("/definitely/not/there.mcreplay");
    let acceptor = Arc::new(StubAcceptor {
        sink: CollectingSink::default(),
        seen_status: Arc::new(Mutex::new(None)),
    });
    let result = ReplayServer::initialize(config, acceptor).await;
    assert!(result.is_err());
}
