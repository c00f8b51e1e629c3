use replay_format::ReplayMetadata;

use std::path::PathBuf;

/// Listener and viewer-facing settings for one replay server.
#[derive(Clone, Debug)]
pub struct ServerConfig {
    pub replay_path: PathBuf,
    pub host: String,
    pub port: u16,
    /// Version string advertised to server-list pings.
    pub version: String,
    /// When false, the handshake layer skips authentication.
    pub online_mode: bool,
    /// Server-list banner; generated from the replay duration when unset.
    pub motd: Option<String>,
    pub max_players: u32,
}

impl ServerConfig {
    pub fn new(replay_path: impl Into<PathBuf>) -> Self {
        Self {
            replay_path: replay_path.into(),
            host: "0.0.0.0".to_string(),
            port: 25565,
            version: "1.8.9".to_string(),
            online_mode: false,
            motd: None,
            max_players: 20,
        }
    }

    pub fn motd_for(&self, metadata: &ReplayMetadata) -> String {
        match &self.motd {
            Some(motd) => motd.clone(),
            None => {
                let seconds = metadata.duration_ms() / 1000;
                format!("Replay Viewer\nDuration: {}:{:02}", seconds / 60, seconds % 60)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn meta(duration_ms: i64) -> ReplayMetadata {
        ReplayMetadata {
            spawn_position: Some((0, 64, 0)),
            start_time: 0,
            end_time: duration_ms,
            bot_username: "b".to_string(),
            version_tag: "1.8.9".to_string(),
        }
    }

    #[test]
    fn generated_motd_formats_duration() {
        let config = ServerConfig::new("r.mcreplay");
        assert_eq!(
            config.motd_for(&meta(95_000)),
            "Replay Viewer\nDuration: 1:35"
        );
        assert_eq!(
            config.motd_for(&meta(3_000)),
            "Replay Viewer\nDuration: 0:03"
        );
    }

    #[test]
    fn explicit_motd_wins() {
        let mut config = ServerConfig::new("r.mcreplay");
        config.motd = Some("custom".to_string());
        assert_eq!(config.motd_for(&meta(95_000)), "custom");
    }
}
