//! End-to-end playback behavior against in-memory viewer sinks.

use replay_server_lib::{
    AcceptedViewer, PacketSink, PlaybackState, ReplayEvent, ReplayServer, ServerConfig,
    ServerError,
};

use async_trait::async_trait;
use replay_format::{payload_map, PacketName, PacketRecord, Payload, ReplayMetadata};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use tokio::time::{Duration, Instant};
use uuid::Uuid;

#[derive(Clone, Default)]
struct RecordingSink {
    written: Arc<Mutex<Vec<(String, Payload)>>>,
    disconnect_reason: Arc<Mutex<Option<String>>>,
}

impl RecordingSink {
    fn names(&self) -> Vec<String> {
        self.written
            .lock()
            .unwrap()
            .iter()
            .map(|(name, ..)| name.clone())
            .collect()
    }

    fn take(&self) -> Vec<(String, Payload)> {
        std::mem::take(&mut *self.written.lock().unwrap())
    }
}

#[async_trait]
impl PacketSink for RecordingSink {
    async fn write_packet(&self, name: &str, payload: &Payload) -> anyhow::Result<()> {
        self.written
            .lock()
            .unwrap()
            .push((name.to_string(), payload.clone()));
        Ok(())
    }

    async fn disconnect(&self, reason: &str) -> anyhow::Result<()> {
        *self.disconnect_reason.lock().unwrap() = Some(reason.to_string());
        Ok(())
    }
}

/// Accepts handshake frames but fails every recorded-packet write.
#[derive(Clone, Default)]
struct FailingSink {
    failed: Arc<AtomicBool>,
}

#[async_trait]
impl PacketSink for FailingSink {
    async fn write_packet(&self, name: &str, _payload: &Payload) -> anyhow::Result<()> {
        if name == "chat" {
            self.failed.store(true, Ordering::SeqCst);
            return Err(anyhow::anyhow!("socket gone"));
        }
        Ok(())
    }

    async fn disconnect(&self, _reason: &str) -> anyhow::Result<()> {
        Ok(())
    }
}

fn meta(duration_ms: i64) -> ReplayMetadata {
    ReplayMetadata {
        spawn_position: Some((0, 64, 0)),
        start_time: 1_000_000,
        end_time: 1_000_000 + duration_ms,
        bot_username: "bot".to_string(),
        version_tag: "1.8.9".to_string(),
    }
}

fn chat(ts: u64, text: &str) -> PacketRecord {
    PacketRecord::new(ts, PacketName::Chat, payload_map! { "message" => text })
}

fn chunk(ts: u64, x: i64, z: i64) -> PacketRecord {
    PacketRecord::new(ts, PacketName::MapChunk, payload_map! { "x" => x, "z" => z })
}

fn spawn_living(ts: u64, id: i64) -> PacketRecord {
    PacketRecord::new(
        ts,
        PacketName::SpawnEntityLiving,
        payload_map! { "entityId" => id },
    )
}

fn named_spawn(ts: u64, id: i64) -> PacketRecord {
    PacketRecord::new(
        ts,
        PacketName::NamedEntitySpawn,
        payload_map! { "entityId" => id },
    )
}

fn destroy(ts: u64, id: i64) -> PacketRecord {
    PacketRecord::new(
        ts,
        PacketName::EntityDestroy,
        payload_map! { "entityIds" => vec![Payload::Int(id)] },
    )
}

fn server_with(
    duration_ms: i64,
    packets: Vec<PacketRecord>,
) -> (ReplayServer, flume::Receiver<ReplayEvent>) {
    ReplayServer::with_replay(
        ServerConfig::new("unused.mcreplay"),
        meta(duration_ms),
        packets,
    )
}

async fn attach(server: &ReplayServer, sink: RecordingSink) {
    server
        .attach_viewer(AcceptedViewer {
            username: "viewer".to_string(),
            uuid: Uuid::new_v4(),
            sink: Box::new(sink),
        })
        .unwrap();
    // A status round-trip guarantees the attach was processed.
    server.status().await.unwrap();
}

async fn wait_for_end(events: &flume::Receiver<ReplayEvent>) {
    loop {
        match events.recv_async().await.unwrap() {
            ReplayEvent::PlaybackEnded => return,
            _ => continue,
        }
    }
}

#[tokio::test(start_paused = true)]
async fn playback_emits_all_packets_in_order_then_ends() {
    let (server, events) = server_with(
        2_000,
        vec![chat(0, "a"), chat(500, "b"), chat(1_500, "c")],
    );
    let sink = RecordingSink::default();
    attach(&server, sink.clone()).await;
    sink.take();

    server.start_playback().unwrap();
    wait_for_end(&events).await;

    let names = sink.names();
    assert_eq!(names, vec!["chat", "chat", "chat"]);
    let texts: Vec<String> = sink
        .take()
        .iter()
        .filter_map(|(_, p)| p.get("message").and_then(Payload::as_str).map(String::from))
        .collect();
    assert_eq!(texts, vec!["a", "b", "c"]);

    let status = server.status().await.unwrap();
    assert_eq!(status.state, PlaybackState::Ended);
    assert_eq!(status.cursor, 3);
}

#[tokio::test(start_paused = true)]
async fn pacing_respects_speed() {
    let (server, events) = server_with(1_000, vec![chat(1_000, "end")]);
    server.set_playback_speed(2.0).unwrap();

    let begun = Instant::now();
    server.start_playback().unwrap();
    wait_for_end(&events).await;

    // 1000 virtual ms at double speed is 500 wall ms; the paused clock
    // advances exactly to each due instant.
    let elapsed = begun.elapsed();
    assert!(
        elapsed >= Duration::from_millis(500) && elapsed < Duration::from_millis(520),
        "elapsed {:?}",
        elapsed
    );
}

#[tokio::test(start_paused = true)]
async fn fresh_join_handshake_then_world_then_recent_ring() {
    let (server, _events) = server_with(
        10_000_000,
        vec![
            chunk(0, 0, 0),
            chunk(10, 0, 1),
            PacketRecord::new(20, PacketName::PlayerInfo, payload_map! { "action" => 0 }),
            named_spawn(30, 7),
            chat(40, "hi"),
            chat(9_999_999, "far future"),
        ],
    );

    server.start_playback().unwrap();
    // Let the early batch play out; the next record is hours away.
    tokio::time::sleep(Duration::from_millis(500)).await;

    let late = RecordingSink::default();
    attach(&server, late.clone()).await;

    let names = late.names();
    assert_eq!(
        names,
        vec![
            "login",
            "spawn_position",
            "position",
            "map_chunk",
            "map_chunk",
            "player_info",
            "named_entity_spawn",
            // recent ring, in emission order
            "map_chunk",
            "map_chunk",
            "player_info",
            "named_entity_spawn",
            "chat",
        ]
    );

    // The login frame carries the spectator placeholder identity.
    let writes = late.take();
    let login = &writes[0].1;
    assert_eq!(login.get("gameMode").and_then(Payload::as_int), Some(3));
    assert_eq!(login.get("dimension").and_then(Payload::as_int), Some(0));
}

#[tokio::test(start_paused = true)]
async fn idle_join_gets_handshake_but_no_resync() {
    let (server, _events) = server_with(1_000, vec![chat(100, "x")]);
    let sink = RecordingSink::default();
    attach(&server, sink.clone()).await;
    assert_eq!(sink.names(), vec!["login", "spawn_position", "position"]);

    let status = server.status().await.unwrap();
    assert_eq!(status.state, PlaybackState::Idle);
    assert_eq!(status.viewer_count, 1);
}

#[tokio::test(start_paused = true)]
async fn seek_clears_world_and_resyncs_viewers() {
    let (server, events) = server_with(
        2_000,
        vec![
            spawn_living(100, 42),
            destroy(500, 42),
            spawn_living(900, 99),
            chat(1_200, "later"),
        ],
    );
    let sink = RecordingSink::default();
    attach(&server, sink.clone()).await;
    sink.take();

    server.seek_to_time(600).unwrap();
    server.status().await.unwrap();

    // Dimension-switch pair, spawn frames, then the spawn log. The log
    // still carries entity 42's spawn packet; only the live-entity set
    // forgets destroyed ids.
    assert_eq!(
        sink.names(),
        vec![
            "respawn",
            "respawn",
            "spawn_position",
            "position",
            "spawn_entity_living",
        ]
    );
    let respawns: Vec<i64> = sink
        .take()
        .iter()
        .take(2)
        .filter_map(|(_, p)| p.get("dimension").and_then(Payload::as_int))
        .collect();
    assert_eq!(respawns, vec![-1, 0]);

    let seek_event = events.try_iter().find(|event| {
        matches!(event, ReplayEvent::PlaybackSeek { .. })
    });
    match seek_event {
        Some(ReplayEvent::PlaybackSeek { from_ms, to_ms }) => {
            assert_eq!(from_ms, 0);
            assert_eq!(to_ms, 600);
        }
        other => panic!("expected a seek event, got {:?}", other),
    }

    let status = server.status().await.unwrap();
    assert_eq!(status.cursor, 2);
    assert_eq!(status.current_time_ms, 600);
}

#[tokio::test(start_paused = true)]
async fn seek_is_idempotent() {
    let (server, _events) = server_with(
        2_000,
        vec![spawn_living(100, 42), destroy(500, 42), spawn_living(900, 99)],
    );
    let sink = RecordingSink::default();
    attach(&server, sink.clone()).await;
    sink.take();

    server.seek_to_time(950).unwrap();
    server.status().await.unwrap();
    let first = sink.take();

    server.seek_to_time(950).unwrap();
    let status = server.status().await.unwrap();
    let second = sink.take();

    assert_eq!(first, second);
    assert_eq!(status.cursor, 3);
    assert_eq!(status.current_time_ms, 950);
}

#[tokio::test(start_paused = true)]
async fn seek_clamps_to_replay_duration() {
    let (server, _events) = server_with(2_000, vec![chat(100, "x")]);
    server.seek_to_time(50_000).unwrap();
    let status = server.status().await.unwrap();
    assert_eq!(status.current_time_ms, 2_000);
}

#[tokio::test(start_paused = true)]
async fn speed_is_clamped_and_announced() {
    let (server, events) = server_with(1_000, Vec::new());
    server.set_playback_speed(0.0).unwrap();
    server.set_playback_speed(100.0).unwrap();
    let status = server.status().await.unwrap();
    assert_eq!(status.speed, 10.0);

    let changes: Vec<(f64, f64)> = events
        .try_iter()
        .filter_map(|event| match event {
            ReplayEvent::PlaybackSpeed { old, new } => Some((old, new)),
            _ => None,
        })
        .collect();
    assert_eq!(changes, vec![(1.0, 0.1), (0.1, 10.0)]);
}

#[tokio::test(start_paused = true)]
async fn playback_end_fires_exactly_once() {
    let (server, events) = server_with(500, vec![chat(100, "only")]);
    server.start_playback().unwrap();
    wait_for_end(&events).await;

    // Further control actions on an ended replay do not replay the end.
    server.start_playback().unwrap();
    server.pause_playback().unwrap();
    let status = server.status().await.unwrap();
    assert_eq!(status.state, PlaybackState::Ended);

    let extra_ends = events
        .try_iter()
        .filter(|event| matches!(event, ReplayEvent::PlaybackEnded))
        .count();
    assert_eq!(extra_ends, 0);
}

#[tokio::test(start_paused = true)]
async fn progress_fires_every_hundred_packets() {
    let packets: Vec<PacketRecord> = (0..250).map(|i| chat(i as u64, "tick")).collect();
    let (server, events) = server_with(250, packets);
    server.start_playback().unwrap();

    let mut cursors = Vec::new();
    loop {
        match events.recv_async().await.unwrap() {
            ReplayEvent::PlaybackProgress { cursor, total, .. } => {
                assert_eq!(total, 250);
                cursors.push(cursor);
            }
            ReplayEvent::PlaybackEnded => break,
            _ => {}
        }
    }
    assert_eq!(cursors, vec![100, 200]);
    drop(server);
}

#[tokio::test(start_paused = true)]
async fn failing_viewer_does_not_stall_playback() {
    let (server, events) = server_with(1_000, vec![chat(100, "a"), chat(200, "b")]);

    let broken = FailingSink::default();
    server
        .attach_viewer(AcceptedViewer {
            username: "broken".to_string(),
            uuid: Uuid::new_v4(),
            sink: Box::new(broken.clone()),
        })
        .unwrap();
    server.status().await.unwrap();

    let healthy = RecordingSink::default();
    attach(&server, healthy.clone()).await;
    healthy.take();

    server.start_playback().unwrap();
    wait_for_end(&events).await;

    assert_eq!(healthy.names(), vec!["chat", "chat"]);
    assert!(broken.failed.load(Ordering::SeqCst));

    let tags: Vec<String> = events
        .try_iter()
        .filter_map(|event| match event {
            ReplayEvent::EmitError { context, .. } => Some(context),
            _ => None,
        })
        .collect();
    assert!(tags.iter().any(|tag| tag == "packet_replay:chat"));
}

#[tokio::test(start_paused = true)]
async fn close_disconnects_viewers_and_rejects_further_commands() {
    let (server, _events) = server_with(1_000, vec![chat(100, "x")]);
    let sink = RecordingSink::default();
    attach(&server, sink.clone()).await;

    server.close().await.unwrap();
    assert_eq!(
        sink.disconnect_reason.lock().unwrap().as_deref(),
        Some("Server closing")
    );
    assert!(matches!(
        server.start_playback(),
        Err(ServerError::Closed)
    ));
}

#[tokio::test(start_paused = true)]
async fn viewer_chat_is_broadcast_with_username() {
    let (server, events) = server_with(1_000, Vec::new());
    let sink = RecordingSink::default();
    attach(&server, sink.clone()).await;
    sink.take();

    server.viewer_chat(1, "hello there").unwrap();
    server.status().await.unwrap();

    let writes = sink.take();
    assert_eq!(writes.len(), 1);
    assert_eq!(writes[0].0, "chat");
    let body = writes[0].1.get("message").and_then(Payload::as_str).unwrap();
    assert!(body.contains("<viewer> hello there"));

    let chat_event = events
        .try_iter()
        .find(|event| matches!(event, ReplayEvent::ViewerChat { .. }));
    assert!(chat_event.is_some());
}
