//! Live IPTV relay into a publish/subscribe object transport
//!
//! An external encoder (normally `ffmpeg`) turns a channel into a fragmented
//! MP4 byte stream. This crate reads that stream box by box, works out which
//! track every `moof`/`mdat` pair belongs to and publishes each unit as an
//! object on the channel's `video` or `audio` track. Only one encoder runs
//! per channel no matter how many subscribers there are.
//!
//! # Architecture
//!
//! ```text
//!   encoder stdout ──► BoxReader ──► relay task ──► LocalTrack("video") ──► TrackReader
//!                         │              │      └─► LocalTrack("audio") ──► TrackReader
//!                         ▼              ▼
//!                    ftyp + moov    classify(moof, TrackIndex)
//!                    (cached, replayed to every new subscriber)
//! ```
//!
//! - [`media`]: box codec, track index and fragment classifier
//! - [`relay`]: encoder processes, the bootstrap probe and the relay loop
//! - [`registry`]: channels and the registry that starts/restarts relays
//! - [`transport`]: the in-process pub/sub contract the relay publishes to

pub mod error;
pub mod media;
pub mod registry;
pub mod relay;
pub mod transport;

#[cfg(test)]
pub(crate) mod testutil;

pub use error::{Error, Result};
pub use registry::{ChannelRegistry, RegistryConfig, SubscribeError, SubscriptionRequest};
pub use relay::{EncoderConfig, FfmpegEncoder};
pub use transport::{LocalTrack, Object, Session, TrackReader};
