// Spectator configuration, loaded from JSON.
//
// Everything a spectator client needs to find and follow a match. The room
// id also seeds the session (see `volley_prng::SessionSeed`), so a mistyped
// room id does not just fail to find the match; it would replay it wrong.
// Missing fields take their defaults.

use serde::{Deserialize, Serialize};

use crate::playback::PlaybackSpeed;

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SpectatorConfig {
    /// Relay address as `host:port`.
    pub relay_addr: String,
    pub room: String,
    pub playback: PlaybackSpeed,
    /// After the history batch, jump straight to the newest frame instead of
    /// replaying the match from the start at playback speed.
    pub join_at_live_edge: bool,
}

impl Default for SpectatorConfig {
    fn default() -> Self {
        Self {
            relay_addr: "127.0.0.1:7878".into(),
            room: String::new(),
            playback: PlaybackSpeed::default(),
            join_at_live_edge: true,
        }
    }
}

impl SpectatorConfig {
    pub fn from_json(json: &str) -> serde_json::Result<Self> {
        serde_json::from_str(json)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_fields_take_defaults() {
        let config = SpectatorConfig::from_json(r#"{"room":"-Nabc"}"#).unwrap();
        assert_eq!(config.room, "-Nabc");
        assert_eq!(config.relay_addr, "127.0.0.1:7878");
        assert_eq!(config.playback, PlaybackSpeed::Times(1.0));
        assert!(config.join_at_live_edge);
    }

    #[test]
    fn full_config() {
        let config = SpectatorConfig::from_json(
            r#"{
                "relay_addr": "relay.example:9000",
                "room": "r1",
                "playback": {"mode": "fps", "value": 60},
                "join_at_live_edge": false
            }"#,
        )
        .unwrap();
        assert_eq!(config.playback, PlaybackSpeed::Fps(60));
        assert!(!config.join_at_live_edge);
    }

    #[test]
    fn roundtrip() {
        let config = SpectatorConfig {
            room: "x".into(),
            ..Default::default()
        };
        let json = serde_json::to_string(&config).unwrap();
        assert_eq!(SpectatorConfig::from_json(&json).unwrap(), config);
    }
}
