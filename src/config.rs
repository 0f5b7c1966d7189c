#![forbid(unsafe_code)]

// Process configuration read once from the environment

use crate::media::MediaConfig;
use std::net::IpAddr;
use std::str::FromStr;
use std::time::Duration;
use tracing::{info, warn};

const DEFAULT_PORT: u16 = 4443;
const DEFAULT_MAX_CONNECTIONS: usize = 10_000;
const DEFAULT_GRACE_SECS: u64 = 60;

#[derive(Debug, Clone)]
pub struct Config {
    pub port: u16,
    pub max_connections: usize,
    /// How long an empty room survives before it closes
    pub empty_room_grace: Duration,
    /// Applied to every peer transport; `None` leaves transports unlimited
    pub max_incoming_bitrate: Option<u32>,
    pub media: MediaConfig,
}

impl Config {
    /// Reads the configuration from process environment variables.
    ///
    /// # Errors
    /// Returns an error if `ANNOUNCE_IP` is not a valid IP address
    pub fn from_env() -> anyhow::Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> anyhow::Result<Self> {
        let parsed = |key: &str| -> Option<u64> {
            let raw = lookup(key)?;
            match raw.parse() {
                Ok(v) => Some(v),
                Err(_) => {
                    warn!("Ignoring invalid {}={}", key, raw);
                    None
                }
            }
        };

        let mut media = MediaConfig::default();

        let announce_ip = lookup("ANNOUNCE_IP").unwrap_or_else(|| "127.0.0.1".to_string());
        let announce_ip = IpAddr::from_str(&announce_ip)
            .map_err(|_| anyhow::anyhow!("Invalid ANNOUNCE_IP: {announce_ip}"))?;
        info!("Announcing {} in ICE candidates", announce_ip);
        media.webrtc_transport_config = media.webrtc_transport_config.with_public_ip(announce_ip);

        if let Some(n) = parsed("MEDIASOUP_NUM_WORKERS") {
            media.worker_config.num_workers = (n as usize).max(1);
        }
        if let Some(port) = parsed("RTC_MIN_PORT").and_then(|p| u16::try_from(p).ok()) {
            media.worker_config.rtc_min_port = port;
        }
        if let Some(port) = parsed("RTC_MAX_PORT").and_then(|p| u16::try_from(p).ok()) {
            media.worker_config.rtc_max_port = port;
        }
        if media.worker_config.rtc_min_port > media.worker_config.rtc_max_port {
            anyhow::bail!(
                "RTC_MIN_PORT {} is above RTC_MAX_PORT {}",
                media.worker_config.rtc_min_port,
                media.worker_config.rtc_max_port
            );
        }

        if let Some(bitrate) = parsed("MAX_INCOMING_BITRATE") {
            media.webrtc_transport_config.max_incoming_bitrate =
                u32::try_from(bitrate).ok().filter(|b| *b > 0);
        }

        let mut max_connections = parsed("MAX_CONNECTIONS")
            .map(|v| v as usize)
            .unwrap_or(DEFAULT_MAX_CONNECTIONS);
        if max_connections == 0 {
            warn!("MAX_CONNECTIONS=0 would reject all connections, using default {}", DEFAULT_MAX_CONNECTIONS);
            max_connections = DEFAULT_MAX_CONNECTIONS;
        }

        let port = parsed("PORT")
            .and_then(|p| u16::try_from(p).ok())
            .unwrap_or(DEFAULT_PORT);

        let empty_room_grace =
            Duration::from_secs(parsed("EMPTY_ROOM_GRACE_SECS").unwrap_or(DEFAULT_GRACE_SECS));

        Ok(Self {
            port,
            max_connections,
            empty_room_grace,
            max_incoming_bitrate: media.webrtc_transport_config.max_incoming_bitrate,
            media,
        })
    }
}
