use replay_format::ReplayMetadata;

use std::net::SocketAddr;

/// Everything observable about a running replay server, delivered on the
/// channel handed out at construction. Subscribers run outside the
/// scheduler; nothing here feeds back into playback state.
#[derive(Clone, Debug)]
pub enum ReplayEvent {
    Listening {
        addr: SocketAddr,
    },
    ReplayLoaded {
        metadata: ReplayMetadata,
        packet_count: usize,
    },
    ViewerJoined {
        id: i32,
        username: String,
    },
    ViewerLeft {
        id: i32,
        username: String,
    },
    ViewerChat {
        id: i32,
        username: String,
        message: String,
    },
    PlaybackStarted,
    PlaybackPaused,
    PlaybackSeek {
        from_ms: u64,
        to_ms: u64,
    },
    PlaybackSpeed {
        old: f64,
        new: f64,
    },
    PlaybackProgress {
        cursor: usize,
        total: usize,
        time_ms: u64,
    },
    PlaybackEnded,
    /// A single emission failed; the context tag is `packet_replay:<name>`
    /// for recorded packets and `sync:<name>` for synchronization frames.
    EmitError {
        context: String,
        message: String,
    },
    ServerError {
        message: String,
    },
}
