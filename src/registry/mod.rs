//! Channel registry for subscription routing
//!
//! The registry maps channel ids to live channels, starts an encoder for a
//! channel on its first subscription and restarts it when a subscriber
//! arrives after the relay stopped. Fan-out to subscribers goes through the
//! channel's two [`LocalTrack`](crate::transport::LocalTrack)s.
//!
//! # Architecture
//!
//! ```text
//!                        Arc<ChannelRegistry>
//!                   ┌──────────────────────────┐
//!                   │ channels: HashMap<Id,    │
//!                   │   Slot(Option<Channel {  │
//!                   │     init cache,          │
//!                   │     video, audio tracks, │
//!                   │     relay state,         │
//!                   │   }>)                    │
//!                   │ >                        │
//!                   └────────────┬─────────────┘
//!                                │
//!        ┌───────────────────────┼───────────────────────┐
//!        │                       │                       │
//!        ▼                       ▼                       ▼
//!   [Relay task]           [Subscriber]            [Subscriber]
//!   read_box()             init objects 0, 1       init objects 0, 1
//!        │                 read_object()           read_object()
//!        └──► channel.publish() ──► broadcast ──► transport
//! ```
//!
//! The map lock only guards membership. Probing a new channel happens under
//! that channel's slot lock, so a slow encoder delays subscribers of its own
//! channel and nobody else.

pub mod channel;
pub mod config;
pub mod error;
pub mod request;
pub mod store;

pub use channel::{Channel, ChannelStats, RelayStatus, GROUP_ID, INIT_OBJECT_COUNT};
pub use config::{RegistryConfig, DEFAULT_NAMESPACE_PREFIX};
pub use error::SubscribeError;
pub use request::{ChannelId, SubscriptionRequest, TrackName};
pub use store::ChannelRegistry;
