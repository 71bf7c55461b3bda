//! Crate-level error type

use std::time::Duration;

use crate::media::{BoxType, MediaError};
use crate::transport::TransportError;

/// Result alias used throughout the crate
pub type Result<T> = std::result::Result<T, Error>;

/// Errors raised while probing encoders and relaying channels
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Reading the encoder output failed
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The encoder output could not be parsed or classified
    #[error(transparent)]
    Media(#[from] MediaError),

    /// Boxes arrived in an order the encoder contract forbids, such as a
    /// `moof` not immediately followed by its `mdat`
    #[error("protocol violation: expected {expected}, got {found}")]
    ProtocolViolation {
        /// Box type that had to follow
        expected: BoxType,
        /// Box type that was read instead
        found: BoxType,
    },

    /// Publishing to the transport failed
    #[error(transparent)]
    Transport(#[from] TransportError),

    /// The encoder process could not be started
    #[error("failed to start encoder: {0}")]
    EncoderStart(String),

    /// The encoder did not produce an initialization segment in time
    #[error("encoder produced no initialization segment within {0:?}")]
    ProbeTimeout(Duration),

    /// The encoder exited before emitting both ftyp and moov
    #[error("encoder ended before the initialization segment was complete")]
    IncompleteInit,
}

impl Error {
    /// Whether this error means the channel metadata can no longer be trusted
    ///
    /// Channels failing this way are re-probed on the next subscription
    /// instead of restarting with the cached track index.
    pub fn invalidates_metadata(&self) -> bool {
        matches!(
            self,
            Error::Media(
                MediaError::Structure { .. }
                    | MediaError::FieldOutOfBounds { .. }
                    | MediaError::UnknownTrack(_)
            )
        )
    }
}
