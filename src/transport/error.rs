//! Transport error types

/// Error type for transport operations
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TransportError {
    /// An object was written to a track nobody subscribes to
    #[error("no subscribers for track {0}")]
    NoSubscribers(String),

    /// The session already subscribed to this track
    #[error("session {session} is already subscribed to {track}")]
    DuplicateTrack { session: u64, track: String },

    /// The session was closed
    #[error("session {0} is closed")]
    SessionClosed(u64),

    /// The subscriber fell behind and missed objects
    #[error("subscriber lagged behind by {0} objects")]
    Lagged(u64),

    /// The track's publisher went away
    #[error("track {0} closed")]
    TrackClosed(String),
}
