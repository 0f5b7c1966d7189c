#![forbid(unsafe_code)]

// Server-wide room settings and per-room creation options

use crate::config::Config;
use crate::media::{AudioObserverConfig, CodecPreference, RouterConfig};
use serde::Deserialize;
use std::time::Duration;

/// Settings shared by every room the server creates
#[derive(Debug, Clone)]
pub struct RoomSettings {
    pub router_config: RouterConfig,
    pub empty_room_grace: Duration,
    pub max_incoming_bitrate: Option<u32>,
    pub audio_observer: AudioObserverConfig,
}

impl Default for RoomSettings {
    fn default() -> Self {
        Self {
            router_config: RouterConfig::default(),
            empty_room_grace: Duration::from_secs(60),
            max_incoming_bitrate: Some(1_500_000),
            audio_observer: AudioObserverConfig::default(),
        }
    }
}

impl From<&Config> for RoomSettings {
    fn from(config: &Config) -> Self {
        Self {
            router_config: config.media.router_config.clone(),
            empty_room_grace: config.empty_room_grace,
            max_incoming_bitrate: config.max_incoming_bitrate,
            audio_observer: AudioObserverConfig::default(),
        }
    }
}

/// Parameters only consulted when a room is first created
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RoomOptions {
    pub codec_preference: CodecPreference,
}

/// `forceH264` / `forceVP9` query flags as sent by clients
#[derive(Debug, Clone, Copy, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CodecFlags {
    #[serde(default, rename = "forceH264")]
    pub force_h264: bool,
    #[serde(default, rename = "forceVP9")]
    pub force_vp9: bool,
}

impl From<CodecFlags> for RoomOptions {
    fn from(flags: CodecFlags) -> Self {
        // H264 wins when both are set
        let codec_preference = if flags.force_h264 {
            CodecPreference::H264
        } else if flags.force_vp9 {
            CodecPreference::Vp9
        } else {
            CodecPreference::Any
        };
        Self { codec_preference }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_codec_flags() {
        let flags: CodecFlags = serde_json::from_str(r#"{"forceH264":true}"#).unwrap();
        assert_eq!(RoomOptions::from(flags).codec_preference, CodecPreference::H264);

        let flags: CodecFlags = serde_json::from_str(r#"{"forceVP9":true}"#).unwrap();
        assert_eq!(RoomOptions::from(flags).codec_preference, CodecPreference::Vp9);

        let flags: CodecFlags = serde_json::from_str("{}").unwrap();
        assert_eq!(RoomOptions::from(flags).codec_preference, CodecPreference::Any);
    }
}
