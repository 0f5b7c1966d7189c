#![forbid(unsafe_code)]

// roomrelay library - multi-party room orchestration over a mediasoup SFU

pub mod config;
pub mod error;
pub mod media;
pub mod metrics;
pub mod room;
pub mod signaling;

#[cfg(test)]
pub(crate) mod testing;
