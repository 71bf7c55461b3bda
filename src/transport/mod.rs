//! In-process publish/subscribe transport
//!
//! The relay only needs a narrow contract from the object transport:
//! publish a numbered object on a named track, report how many subscribers
//! a track has, and let a subscriber read objects back in order. This module
//! implements that contract inside the process, so the relay can be driven
//! by any session front-end (a MoQ server, the CLI, tests).
//!
//! # Fan-out
//!
//! ```text
//!   relay task                LocalTrack                   TrackReader
//!   write_object() ──► broadcast::Sender<Object> ──┬──► pending + rx ──► read_object()
//!                                                 └──► pending + rx ──► read_object()
//! ```
//!
//! Payloads are `bytes::Bytes`, so every subscriber shares one allocation
//! per object. Objects meant for a single subscriber (the cached
//! initialization segment) are queued on that subscriber's reader with
//! [`TrackReader::deliver`] instead of being broadcast.

pub mod error;
pub mod session;
pub mod track;

pub use error::TransportError;
pub use session::Session;
pub use track::{LocalTrack, Object, TrackReader};
