//! Virtual playback time.
//!
//! While playing, the reading advances from the snapshot taken at the last
//! control action by `(now − wall_anchor) × speed`; every control action
//! re-snapshots and re-anchors, so pause/resume and speed changes never
//! produce a discontinuity.

use tokio::time::Instant;

pub const MIN_SPEED: f64 = 0.1;
pub const MAX_SPEED: f64 = 10.0;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PlaybackState {
    Idle,
    Playing,
    Paused,
    Ended,
}

#[derive(Clone, Debug)]
pub struct PlaybackClock {
    playing: bool,
    speed: f64,
    /// Snapshot of virtual time in milliseconds, authoritative while not
    /// playing.
    current_ms: f64,
    anchor: Option<Instant>,
}

impl PlaybackClock {
    pub fn new() -> Self {
        Self {
            playing: false,
            speed: 1.0,
            current_ms: 0.0,
            anchor: None,
        }
    }

    pub fn is_playing(&self) -> bool {
        self.playing
    }

    pub fn speed(&self) -> f64 {
        self.speed
    }

    pub fn current_time(&self, now: Instant) -> f64 {
        match self.anchor {
            Some(anchor) if self.playing => {
                self.current_ms
                    + now.saturating_duration_since(anchor).as_secs_f64() * 1000.0 * self.speed
            }
            _ => self.current_ms,
        }
    }

    pub fn start(&mut self, now: Instant) {
        if self.playing {
            return;
        }
        self.anchor = Some(now);
        self.playing = true;
    }

    pub fn pause(&mut self, now: Instant) {
        if !self.playing {
            return;
        }
        self.current_ms = self.current_time(now);
        self.playing = false;
        self.anchor = None;
    }

    /// Clamps to `[MIN_SPEED, MAX_SPEED]` and re-anchors so the current
    /// reading is unchanged. Returns `(old, new)`.
    pub fn set_speed(&mut self, now: Instant, speed: f64) -> (f64, f64) {
        let old = self.speed;
        let new = if speed.is_finite() {
            speed.max(MIN_SPEED).min(MAX_SPEED)
        } else {
            old
        };
        let was_playing = self.playing;
        self.pause(now);
        self.speed = new;
        if was_playing {
            self.start(now);
        }
        (old, new)
    }

    /// Jumps the reading to `time_ms`, keeping the playing/paused polarity.
    pub fn set_time(&mut self, now: Instant, time_ms: f64) {
        let was_playing = self.playing;
        self.pause(now);
        self.current_ms = time_ms;
        if was_playing {
            self.start(now);
        }
    }
}

impl Default for PlaybackClock {
    fn default() -> Self {
        Self::new()
    }
}
