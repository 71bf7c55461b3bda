//! Media parsing error types

use super::boxes::FourCc;

/// Error raised while parsing boxes or classifying fragments
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum MediaError {
    /// Input ended inside a box
    #[error("truncated box: needed {needed} bytes, only {available} available")]
    Truncated {
        /// Bytes the box still required
        needed: usize,
        /// Bytes that were actually available
        available: usize,
    },

    /// Box size field is smaller than its own header (or zero)
    #[error("invalid size {size} for {fourcc} box")]
    InvalidSize { fourcc: FourCc, size: u64 },

    /// Box is larger than the configured limit
    #[error("{fourcc} box of {size} bytes exceeds the {limit} byte limit")]
    TooLarge { fourcc: FourCc, size: u64, limit: usize },

    /// No child box of this type exists
    #[error("{0} box not found")]
    NotFound(FourCc),

    /// A required child box is missing from its container
    #[error("{container} box has no {missing} child")]
    Structure { container: FourCc, missing: FourCc },

    /// A fixed-offset field lies outside the box payload
    #[error("{fourcc} box too short: field at offset {offset} beyond payload of {len} bytes")]
    FieldOutOfBounds {
        fourcc: FourCc,
        offset: usize,
        len: usize,
    },

    /// A fragment references a track id missing from the track index
    #[error("fragment references unknown track id {0}")]
    UnknownTrack(u32),
}
