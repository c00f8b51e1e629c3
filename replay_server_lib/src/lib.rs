//! Replay playback server.
//!
//! Loads a recorded packet stream from a replay container and serves it to
//! connected viewers in real time, acting as a minimal protocol-speaking
//! server: a single scheduler task paces the packets, a world-state
//! projection tracks what a late joiner needs, and every viewer session is
//! kept coherent across seeks and speed changes.
//!
//! The wire protocol itself is out of scope: viewers reach the core as
//! [`PacketSink`]s produced by a pluggable [`ViewerAcceptor`] once their
//! handshake is done.

pub mod clock;
pub mod config;
pub mod events;
pub mod projection;
pub mod server;
pub mod sink;
pub mod viewer;

pub use clock::{PlaybackClock, PlaybackState, MAX_SPEED, MIN_SPEED};
pub use config::ServerConfig;
pub use events::ReplayEvent;
pub use projection::WorldProjection;
pub use server::{PlaybackStatus, ReplayServer};
pub use sink::{AcceptedViewer, PacketSink, ServerStatus, ViewerAcceptor};
pub use viewer::ViewerSession;

use replay_format::FormatError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ServerError {
    #[error("replay file: {0}")]
    Format(#[from] FormatError),
    #[error("could not bind listener: {0}")]
    Bind(std::io::Error),
    #[error("server is closed")]
    Closed,
}

pub type ServerResult<T> = Result<T, ServerError>;
