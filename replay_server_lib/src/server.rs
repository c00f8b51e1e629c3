//! The replay server: playback scheduler plus viewer session manager.
//!
//! All playback state lives inside a single actor task; the [`ReplayServer`]
//! handle turns every public operation into a message, so control actions,
//! scheduler ticks, viewer accepts and disconnects all execute serially and
//! no lock guards the projection or the cursor.

use crate::clock::{PlaybackClock, PlaybackState};
use crate::config::ServerConfig;
use crate::events::ReplayEvent;
use crate::projection::WorldProjection;
use crate::sink::{AcceptedViewer, ServerStatus, ViewerAcceptor};
use crate::viewer::{frames, ViewerSession};
use crate::{ServerError, ServerResult};

use replay_format::{payload_map, PacketRecord, Payload, ReplayMetadata, ReplayReader};

use fxhash::FxBuildHasher;
use indexmap::IndexMap;
use log::*;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::{self, Duration, Instant};

type FxIndexMap<K, V> = IndexMap<K, V, FxBuildHasher>;

/// A progress event fires every this many consumed packets.
const PROGRESS_INTERVAL: usize = 100;

const SPECTATOR_GAMEMODE: i64 = 3;
const CLOSE_REASON: &str = "Server closing";

#[derive(Clone, Debug)]
pub struct PlaybackStatus {
    pub state: PlaybackState,
    pub speed: f64,
    pub current_time_ms: u64,
    pub cursor: usize,
    pub packet_count: usize,
    pub viewer_count: usize,
}

enum Command {
    Start,
    Pause,
    SetSpeed(f64),
    Seek(u64),
    AttachViewer(AcceptedViewer),
    DetachViewer { id: i32 },
    ViewerChat { id: i32, message: String },
    SendChat { id: i32, message: String },
    BroadcastChat { message: String },
    SendActionBar { id: i32, message: String },
    BroadcastActionBar { message: String },
    Status { reply: oneshot::Sender<PlaybackStatus> },
    AdoptListener { task: JoinHandle<()>, addr: SocketAddr },
    ReportError { message: String },
    Close { done: oneshot::Sender<()> },
}

enum CommandOutcome {
    Continue,
    Shutdown(oneshot::Sender<()>),
}

/// Handle to a running replay server. Cheap to clone; every method is a
/// message to the scheduler task.
#[derive(Clone)]
pub struct ReplayServer {
    commands: mpsc::UnboundedSender<Command>,
}

impl ReplayServer {
    /// Loads the replay file named by the configuration, binds the
    /// listening socket and starts accepting viewers through `acceptor`.
    pub async fn initialize(
        config: ServerConfig,
        acceptor: Arc<dyn ViewerAcceptor>,
    ) -> ServerResult<(Self, flume::Receiver<ReplayEvent>)> {
        let reader = ReplayReader::open(&config.replay_path)?;
        let metadata = reader.metadata().clone();
        let packets = reader.read_all()?;
        drop(reader);
        info!(
            "loaded replay {:?}: {} packets, {} ms",
            config.replay_path,
            packets.len(),
            metadata.duration_ms()
        );

        let listener = TcpListener::bind((config.host.as_str(), config.port))
            .await
            .map_err(ServerError::Bind)?;
        let addr = listener.local_addr().map_err(ServerError::Bind)?;

        let status_seed = ServerStatus {
            motd: config.motd_for(&metadata),
            version: config.version.clone(),
            max_players: config.max_players,
            online: 0,
        };
        let (server, events) = Self::with_replay(config, metadata, packets);

        let task = tokio::spawn(accept_loop(
            listener,
            acceptor,
            server.clone(),
            status_seed,
        ));
        let _ = server.commands.send(Command::AdoptListener { task, addr });

        Ok((server, events))
    }

    /// Drives a pre-loaded replay without binding a socket; viewers are
    /// attached with [`ReplayServer::attach_viewer`].
    pub fn with_replay(
        config: ServerConfig,
        metadata: ReplayMetadata,
        packets: Vec<PacketRecord>,
    ) -> (Self, flume::Receiver<ReplayEvent>) {
        let (events_tx, events_rx) = flume::unbounded();
        let (commands_tx, commands_rx) = mpsc::unbounded_channel();
        let actor = ServerActor {
            config,
            metadata,
            packets,
            projection: WorldProjection::new(),
            clock: PlaybackClock::new(),
            cursor: 0,
            started: false,
            ended: false,
            viewers: FxIndexMap::default(),
            next_viewer_id: 1,
            accept_task: None,
            events: events_tx,
        };
        tokio::spawn(actor.run(commands_rx));
        (
            Self {
                commands: commands_tx,
            },
            events_rx,
        )
    }

    fn send(&self, command: Command) -> ServerResult<()> {
        self.commands.send(command).map_err(|_| ServerError::Closed)
    }

    pub fn start_playback(&self) -> ServerResult<()> {
        self.send(Command::Start)
    }

    pub fn pause_playback(&self) -> ServerResult<()> {
        self.send(Command::Pause)
    }

    pub fn set_playback_speed(&self, speed: f64) -> ServerResult<()> {
        self.send(Command::SetSpeed(speed))
    }

    pub fn seek_to_time(&self, time_ms: u64) -> ServerResult<()> {
        self.send(Command::Seek(time_ms))
    }

    /// Hands a handshaken viewer over to the session manager.
    pub fn attach_viewer(&self, viewer: AcceptedViewer) -> ServerResult<()> {
        self.send(Command::AttachViewer(viewer))
    }

    pub fn detach_viewer(&self, id: i32) -> ServerResult<()> {
        self.send(Command::DetachViewer { id })
    }

    /// Chat received from a viewer; broadcast to everyone.
    pub fn viewer_chat(&self, id: i32, message: impl Into<String>) -> ServerResult<()> {
        self.send(Command::ViewerChat {
            id,
            message: message.into(),
        })
    }

    pub fn send_chat(&self, id: i32, message: impl Into<String>) -> ServerResult<()> {
        self.send(Command::SendChat {
            id,
            message: message.into(),
        })
    }

    pub fn broadcast_chat(&self, message: impl Into<String>) -> ServerResult<()> {
        self.send(Command::BroadcastChat {
            message: message.into(),
        })
    }

    pub fn send_action_bar(&self, id: i32, message: impl Into<String>) -> ServerResult<()> {
        self.send(Command::SendActionBar {
            id,
            message: message.into(),
        })
    }

    pub fn broadcast_action_bar(&self, message: impl Into<String>) -> ServerResult<()> {
        self.send(Command::BroadcastActionBar {
            message: message.into(),
        })
    }

    fn report_error(&self, message: String) -> ServerResult<()> {
        self.send(Command::ReportError { message })
    }

    pub async fn status(&self) -> ServerResult<PlaybackStatus> {
        let (reply, rx) = oneshot::channel();
        self.send(Command::Status { reply })?;
        rx.await.map_err(|_| ServerError::Closed)
    }

    /// Pauses playback, disconnects every viewer and releases the socket.
    pub async fn close(&self) -> ServerResult<()> {
        let (done, rx) = oneshot::channel();
        self.send(Command::Close { done })?;
        let _ = rx.await;
        Ok(())
    }
}

struct ServerActor {
    config: ServerConfig,
    metadata: ReplayMetadata,
    packets: Vec<PacketRecord>,
    projection: WorldProjection,
    clock: PlaybackClock,
    cursor: usize,
    started: bool,
    ended: bool,
    viewers: FxIndexMap<i32, ViewerSession>,
    next_viewer_id: i32,
    accept_task: Option<JoinHandle<()>>,
    events: flume::Sender<ReplayEvent>,
}

impl ServerActor {
    async fn run(mut self, mut commands: mpsc::UnboundedReceiver<Command>) {
        self.emit(ReplayEvent::ReplayLoaded {
            metadata: self.metadata.clone(),
            packet_count: self.packets.len(),
        });

        let mut close_ack = None;
        loop {
            let tick_delay = self.next_due_delay();
            let sleep_for = tick_delay.unwrap_or_else(|| Duration::from_secs(3600));
            tokio::select! {
                command = commands.recv() => match command {
                    Some(command) => match self.handle_command(command).await {
                        CommandOutcome::Continue => {}
                        CommandOutcome::Shutdown(done) => {
                            close_ack = Some(done);
                            break;
                        }
                    },
                    None => break,
                },
                _ = time::sleep(sleep_for), if tick_delay.is_some() => {
                    self.tick().await;
                }
            }
        }
        // Drop the command channel before acknowledging so callers that
        // observed the close cannot enqueue further work.
        drop(commands);
        if let Some(done) = close_ack {
            let _ = done.send(());
        }
        debug!("replay scheduler stopped");
    }

    fn emit(&self, event: ReplayEvent) {
        let _ = self.events.send(event);
    }

    fn state(&self) -> PlaybackState {
        if self.ended {
            PlaybackState::Ended
        } else if self.clock.is_playing() {
            PlaybackState::Playing
        } else if self.started {
            PlaybackState::Paused
        } else {
            PlaybackState::Idle
        }
    }

    /// Wall-clock wait until the next record is due, `None` while paused or
    /// drained.
    fn next_due_delay(&self) -> Option<Duration> {
        if !self.clock.is_playing() || self.cursor >= self.packets.len() {
            return None;
        }
        let current = self.clock.current_time(Instant::now());
        let next = self.packets[self.cursor].timestamp as f64;
        let wall_ms = (next - current).max(0.0) / self.clock.speed();
        Some(Duration::from_secs_f64(wall_ms / 1000.0))
    }

    async fn tick(&mut self) {
        if !self.clock.is_playing() {
            return;
        }
        let now = Instant::now();
        let current = self.clock.current_time(now);

        while self.cursor < self.packets.len()
            && (self.packets[self.cursor].timestamp as f64) <= current
        {
            let record = self.packets[self.cursor].clone();
            self.emit_to_all(&record).await;
            self.projection.apply(&record);
            self.cursor += 1;
            if self.cursor % PROGRESS_INTERVAL == 0 {
                self.emit(ReplayEvent::PlaybackProgress {
                    cursor: self.cursor,
                    total: self.packets.len(),
                    time_ms: record.timestamp,
                });
            }
        }

        if self.cursor >= self.packets.len() {
            self.finish_playback(now);
        }
    }

    fn finish_playback(&mut self, now: Instant) {
        self.clock.pause(now);
        self.ended = true;
        info!("replay finished after {} packets", self.packets.len());
        self.emit(ReplayEvent::PlaybackEnded);
    }

    async fn handle_command(&mut self, command: Command) -> CommandOutcome {
        match command {
            Command::Start => {
                let now = Instant::now();
                if self.ended || self.clock.is_playing() {
                    return CommandOutcome::Continue;
                }
                self.clock.start(now);
                self.started = true;
                self.emit(ReplayEvent::PlaybackStarted);
                if self.cursor >= self.packets.len() {
                    self.finish_playback(now);
                }
            }
            Command::Pause => {
                if self.clock.is_playing() {
                    self.clock.pause(Instant::now());
                    self.emit(ReplayEvent::PlaybackPaused);
                }
            }
            Command::SetSpeed(speed) => {
                let (old, new) = self.clock.set_speed(Instant::now(), speed);
                debug!("playback speed {} -> {}", old, new);
                self.emit(ReplayEvent::PlaybackSpeed { old, new });
            }
            Command::Seek(time_ms) => {
                self.seek_to(time_ms).await;
            }
            Command::AttachViewer(viewer) => {
                self.attach_viewer(viewer).await;
            }
            Command::DetachViewer { id } => {
                if let Some(session) = self.viewers.remove(&id) {
                    info!("viewer {} left", session.username);
                    self.emit(ReplayEvent::ViewerLeft {
                        id,
                        username: session.username,
                    });
                }
            }
            Command::ViewerChat { id, message } => {
                if let Some(session) = self.viewers.get(&id) {
                    let username = session.username.clone();
                    let line = format!("<{}> {}", username, message);
                    for target in self.viewers.values() {
                        if let Err(error) = target.send_chat(&line).await {
                            self.emit_error("sync", frames::CHAT, &error);
                        }
                    }
                    self.emit(ReplayEvent::ViewerChat {
                        id,
                        username,
                        message,
                    });
                }
            }
            Command::SendChat { id, message } => {
                if let Some(session) = self.viewers.get(&id) {
                    if let Err(error) = session.send_chat(&message).await {
                        self.emit_error("sync", frames::CHAT, &error);
                    }
                }
            }
            Command::BroadcastChat { message } => {
                for session in self.viewers.values() {
                    if let Err(error) = session.send_chat(&message).await {
                        self.emit_error("sync", frames::CHAT, &error);
                    }
                }
            }
            Command::SendActionBar { id, message } => {
                if let Some(session) = self.viewers.get(&id) {
                    if let Err(error) = session.send_action_bar(&message).await {
                        self.emit_error("sync", frames::CHAT, &error);
                    }
                }
            }
            Command::BroadcastActionBar { message } => {
                for session in self.viewers.values() {
                    if let Err(error) = session.send_action_bar(&message).await {
                        self.emit_error("sync", frames::CHAT, &error);
                    }
                }
            }
            Command::Status { reply } => {
                let status = PlaybackStatus {
                    state: self.state(),
                    speed: self.clock.speed(),
                    current_time_ms: self.clock.current_time(Instant::now()).max(0.0) as u64,
                    cursor: self.cursor,
                    packet_count: self.packets.len(),
                    viewer_count: self.viewers.len(),
                };
                let _ = reply.send(status);
            }
            Command::AdoptListener { task, addr } => {
                self.accept_task = Some(task);
                info!("listening on {}", addr);
                self.emit(ReplayEvent::Listening { addr });
            }
            Command::ReportError { message } => {
                error!("{}", message);
                self.emit(ReplayEvent::ServerError { message });
            }
            Command::Close { done } => {
                self.clock.pause(Instant::now());
                if let Some(task) = self.accept_task.take() {
                    task.abort();
                }
                for session in self.viewers.values() {
                    if let Err(error) = session.disconnect(CLOSE_REASON).await {
                        debug!("disconnect of {} failed: {}", session.username, error);
                    }
                }
                self.viewers.clear();
                return CommandOutcome::Shutdown(done);
            }
        }
        CommandOutcome::Continue
    }

    async fn seek_to(&mut self, time_ms: u64) {
        let now = Instant::now();
        let was_playing = self.clock.is_playing();
        let from_ms = self.clock.current_time(now).max(0.0) as u64;
        self.clock.pause(now);

        let target = time_ms.min(self.metadata.duration_ms());
        debug!("seek {} -> {} ms", from_ms, target);

        // Rebuild the projection from scratch; nothing is emitted while
        // scanning.
        self.projection.clear();
        self.cursor = 0;
        while self.cursor < self.packets.len() && self.packets[self.cursor].timestamp <= target {
            self.projection.apply(&self.packets[self.cursor]);
            self.cursor += 1;
        }
        self.clock.set_time(now, target as f64);
        self.ended = false;

        for session in self.viewers.values() {
            self.resync_viewer(session, true).await;
        }

        if was_playing {
            self.clock.start(now);
        }
        self.emit(ReplayEvent::PlaybackSeek {
            from_ms,
            to_ms: target,
        });
    }

    async fn attach_viewer(&mut self, viewer: AcceptedViewer) {
        let id = self.next_viewer_id;
        self.next_viewer_id += 1;
        let session = ViewerSession::new(id, viewer.username, viewer.uuid, viewer.sink);
        info!("viewer {} joined with id {}", session.username, id);

        // The session id doubles as the viewer's entity id.
        let login = payload_map! {
            "entityId" => id,
            "gameMode" => SPECTATOR_GAMEMODE,
            "dimension" => 0,
            "difficulty" => 0,
            "maxPlayers" => self.config.max_players,
            "levelType" => "default",
            "reducedDebugInfo" => false,
        };
        if let Err(error) = session.write(frames::LOGIN, &login).await {
            // A failed handshake ends this session only.
            self.emit_error("sync", frames::LOGIN, &error);
            return;
        }
        self.send_spawn_frames(&session).await;
        if self.clock.is_playing() {
            self.resync_viewer(&session, false).await;
        }

        let username = session.username.clone();
        self.viewers.insert(id, session);
        self.emit(ReplayEvent::ViewerJoined { id, username });
    }

    /// Brings one viewer in line with the projection. `clear_entities`
    /// forces the client to drop its loaded world first; it is set on seek
    /// and unset on fresh joins, where the recent ring is replayed instead.
    async fn resync_viewer(&self, session: &ViewerSession, clear_entities: bool) {
        if clear_entities {
            // Dimension-switch pair: two respawns to opposing dimensions
            // make this protocol version's client discard all chunks and
            // entities without closing the connection.
            self.sync_write(session, frames::RESPAWN, &respawn_payload(-1)).await;
            self.sync_write(session, frames::RESPAWN, &respawn_payload(0)).await;
            self.send_spawn_frames(session).await;
        }

        for record in self.projection.chunks() {
            self.sync_write(session, record.name.as_str(), &record.payload)
                .await;
        }
        for record in self.projection.bulk_chunks() {
            self.sync_write(session, record.name.as_str(), &record.payload)
                .await;
        }
        for record in self.projection.player_info_log() {
            self.sync_write(session, record.name.as_str(), &record.payload)
                .await;
        }
        for record in self.projection.entity_spawn_log() {
            self.sync_write(session, record.name.as_str(), &record.payload)
                .await;
        }

        if !clear_entities {
            // After a seek these packets were already folded into the
            // rebuilt projection; replaying them would be stale.
            for record in self.projection.recent() {
                if let Err(error) = session.write(record.name.as_str(), &record.payload).await {
                    self.emit_error("packet_replay", record.name.as_str(), &error);
                }
            }
        }
    }

    async fn send_spawn_frames(&self, session: &ViewerSession) {
        if let Some((x, y, z)) = self.metadata.spawn_position {
            let spawn = payload_map! { "x" => x, "y" => y, "z" => z };
            self.sync_write(session, frames::SPAWN_POSITION, &spawn).await;
            let position = payload_map! {
                "x" => x as f64,
                "y" => y as f64,
                "z" => z as f64,
                "yaw" => 0.0,
                "pitch" => 0.0,
                "flags" => 0,
            };
            self.sync_write(session, frames::POSITION, &position).await;
        }
    }

    async fn sync_write(&self, session: &ViewerSession, name: &str, payload: &Payload) {
        if let Err(error) = session.write(name, payload).await {
            self.emit_error("sync", name, &error);
        }
    }

    async fn emit_to_all(&self, record: &PacketRecord) {
        for session in self.viewers.values() {
            if let Err(error) = session.write(record.name.as_str(), &record.payload).await {
                self.emit_error("packet_replay", record.name.as_str(), &error);
            }
        }
    }

    fn emit_error(&self, kind: &str, name: &str, error: &anyhow::Error) {
        let context = format!("{}:{}", kind, name);
        warn!("emission failed ({}): {}", context, error);
        self.emit(ReplayEvent::EmitError {
            context,
            message: error.to_string(),
        });
    }
}

fn respawn_payload(dimension: i64) -> Payload {
    payload_map! {
        "dimension" => dimension,
        "difficulty" => 0,
        "gamemode" => SPECTATOR_GAMEMODE,
        "levelType" => "default",
    }
}

async fn accept_loop(
    listener: TcpListener,
    acceptor: Arc<dyn ViewerAcceptor>,
    server: ReplayServer,
    status_seed: ServerStatus,
) {
    loop {
        match listener.accept().await {
            Ok((stream, remote)) => {
                debug!("connection from {}", remote);
                let acceptor = Arc::clone(&acceptor);
                let server = server.clone();
                let status_seed = status_seed.clone();
                tokio::spawn(async move {
                    let online = match server.status().await {
                        Ok(status) => status.viewer_count,
                        Err(..) => return,
                    };
                    let status = ServerStatus {
                        online,
                        ..status_seed
                    };
                    match acceptor.accept(stream, status).await {
                        Ok(Some(viewer)) => {
                            let _ = server.attach_viewer(viewer);
                        }
                        Ok(None) => {}
                        Err(error) => {
                            let _ = server
                                .report_error(format!("handshake with {} failed: {}", remote, error));
                        }
                    }
                });
            }
            Err(error) => {
                let _ = server.report_error(format!("accept failed: {}", error));
                time::sleep(Duration::from_millis(250)).await;
            }
        }
    }
}
