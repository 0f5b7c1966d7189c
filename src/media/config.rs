#![forbid(unsafe_code)]

// Configuration for mediasoup workers, routers, and transports

use mediasoup::prelude::*;
use mediasoup::worker::{WorkerLogLevel, WorkerLogTag};
use serde::Deserialize;
use std::net::{IpAddr, Ipv4Addr};
use std::num::{NonZeroU32, NonZeroU8};

/// Main media server configuration
#[derive(Debug, Clone, Default)]
pub struct MediaConfig {
    pub worker_config: WorkerConfig,
    pub router_config: RouterConfig,
    pub webrtc_transport_config: WebRtcTransportConfig,
}

/// Worker configuration
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    pub num_workers: usize,
    pub log_level: WorkerLogLevel,
    pub log_tags: Vec<WorkerLogTag>,
    pub rtc_min_port: u16,
    pub rtc_max_port: u16,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            num_workers: num_cpus::get(),
            log_level: WorkerLogLevel::Warn,
            log_tags: vec![
                WorkerLogTag::Info,
                WorkerLogTag::Ice,
                WorkerLogTag::Dtls,
                WorkerLogTag::Rtp,
                WorkerLogTag::Srtp,
                WorkerLogTag::Rtcp,
            ],
            rtc_min_port: 40000,
            rtc_max_port: 49999,
        }
    }
}

impl WorkerConfig {
    /// Converts to mediasoup WorkerSettings
    pub fn to_worker_settings(&self) -> WorkerSettings {
        let mut settings = WorkerSettings::default();

        settings.log_level = self.log_level;
        settings.log_tags = self.log_tags.clone();
        settings.rtc_port_range = self.rtc_min_port..=self.rtc_max_port;

        settings
    }
}

/// Video codec restriction applied when a room is created
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
pub enum CodecPreference {
    #[default]
    Any,
    H264,
    Vp9,
}

/// Router configuration with codec capabilities
#[derive(Debug, Clone)]
pub struct RouterConfig {
    pub media_codecs: Vec<RtpCodecCapability>,
}

impl Default for RouterConfig {
    fn default() -> Self {
        Self {
            media_codecs: Self::default_codecs(),
        }
    }
}

impl RouterConfig {
    /// Returns default codec capabilities for audio and video
    pub fn default_codecs() -> Vec<RtpCodecCapability> {
        let video_feedback = || {
            vec![
                RtcpFeedback::Nack,
                RtcpFeedback::NackPli,
                RtcpFeedback::CcmFir,
                RtcpFeedback::GoogRemb,
                RtcpFeedback::TransportCc,
            ]
        };

        vec![
            RtpCodecCapability::Audio {
                mime_type: MimeTypeAudio::Opus,
                preferred_payload_type: None,
                clock_rate: NonZeroU32::new(48000).unwrap_or(NonZeroU32::MIN),
                channels: NonZeroU8::new(2).unwrap_or(NonZeroU8::MIN),
                parameters: RtpCodecParametersParameters::from([
                    ("minptime", 10_u32.into()),
                    ("useinbandfec", 1_u32.into()),
                ]),
                rtcp_feedback: vec![RtcpFeedback::TransportCc],
            },
            RtpCodecCapability::Video {
                mime_type: MimeTypeVideo::Vp8,
                preferred_payload_type: None,
                clock_rate: NonZeroU32::new(90000).unwrap_or(NonZeroU32::MIN),
                parameters: RtpCodecParametersParameters::default(),
                rtcp_feedback: video_feedback(),
            },
            RtpCodecCapability::Video {
                mime_type: MimeTypeVideo::Vp9,
                preferred_payload_type: None,
                clock_rate: NonZeroU32::new(90000).unwrap_or(NonZeroU32::MIN),
                parameters: RtpCodecParametersParameters::from([("profile-id", 2_u32.into())]),
                rtcp_feedback: video_feedback(),
            },
            RtpCodecCapability::Video {
                mime_type: MimeTypeVideo::H264,
                preferred_payload_type: None,
                clock_rate: NonZeroU32::new(90000).unwrap_or(NonZeroU32::MIN),
                parameters: RtpCodecParametersParameters::from([
                    ("level-asymmetry-allowed", 1_u32.into()),
                    ("packetization-mode", 1_u32.into()),
                    ("profile-level-id", "4d0032".into()),
                ]),
                rtcp_feedback: video_feedback(),
            },
            RtpCodecCapability::Video {
                mime_type: MimeTypeVideo::H264,
                preferred_payload_type: None,
                clock_rate: NonZeroU32::new(90000).unwrap_or(NonZeroU32::MIN),
                parameters: RtpCodecParametersParameters::from([
                    ("level-asymmetry-allowed", 1_u32.into()),
                    ("packetization-mode", 1_u32.into()),
                    ("profile-level-id", "42e01f".into()),
                ]),
                rtcp_feedback: video_feedback(),
            },
        ]
    }

    /// Codec list for a room: every audio codec, plus either every video codec
    /// or only the video codecs of the preferred family.
    pub fn codecs_for(&self, preference: CodecPreference) -> Vec<RtpCodecCapability> {
        self.media_codecs
            .iter()
            .filter(|codec| match (codec, preference) {
                (RtpCodecCapability::Audio { .. }, _) => true,
                (RtpCodecCapability::Video { .. }, CodecPreference::Any) => true,
                (RtpCodecCapability::Video { mime_type, .. }, CodecPreference::H264) => {
                    *mime_type == MimeTypeVideo::H264
                }
                (RtpCodecCapability::Video { mime_type, .. }, CodecPreference::Vp9) => {
                    *mime_type == MimeTypeVideo::Vp9
                }
            })
            .cloned()
            .collect()
    }
}

/// WebRTC and plain transport configuration
#[derive(Debug, Clone)]
pub struct WebRtcTransportConfig {
    pub listen_ip: IpAddr,
    pub announced_address: Option<String>,
    pub initial_available_outgoing_bitrate: u32,
    pub max_incoming_bitrate: Option<u32>,
}

impl Default for WebRtcTransportConfig {
    fn default() -> Self {
        Self {
            listen_ip: IpAddr::V4(Ipv4Addr::new(0, 0, 0, 0)),
            announced_address: None,
            initial_available_outgoing_bitrate: 1_000_000,
            max_incoming_bitrate: Some(1_500_000),
        }
    }
}

impl WebRtcTransportConfig {
    /// Sets the public IP address announced in candidates and tuples
    pub fn with_public_ip(mut self, public_ip: IpAddr) -> Self {
        self.announced_address = Some(public_ip.to_string());
        self
    }

    fn listen_info(&self, protocol: Protocol) -> ListenInfo {
        ListenInfo {
            protocol,
            ip: self.listen_ip,
            announced_address: self.announced_address.clone(),
            port: None,
            port_range: None,
            flags: None,
            send_buffer_size: None,
            recv_buffer_size: None,
            expose_internal_ip: false,
        }
    }

    /// Converts to WebRtcTransportOptions; `force_tcp` drops the UDP listener
    pub fn to_transport_options(&self, force_tcp: bool) -> WebRtcTransportOptions {
        let listen_infos = if force_tcp {
            WebRtcTransportListenInfos::new(self.listen_info(Protocol::Tcp))
        } else {
            WebRtcTransportListenInfos::new(self.listen_info(Protocol::Udp))
                .insert(self.listen_info(Protocol::Tcp))
        };
        let mut options = WebRtcTransportOptions::new(listen_infos);
        options.initial_available_outgoing_bitrate = self.initial_available_outgoing_bitrate;
        options
    }

    /// Converts to PlainTransportOptions
    pub fn to_plain_options(&self, rtcp_mux: bool, comedia: bool) -> PlainTransportOptions {
        let mut options = PlainTransportOptions::new(self.listen_info(Protocol::Udp));
        options.rtcp_mux = rtcp_mux;
        options.comedia = comedia;
        options
    }
}
