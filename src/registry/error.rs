//! Subscription rejection reasons
//!
//! Every rejection carries a numeric code for the wire and a human
//! readable reason.

use crate::transport::TransportError;

/// Reason a subscription was rejected
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SubscribeError {
    /// Namespace is not `<prefix>/<channel id>`
    #[error("invalid namespace: {0}")]
    InvalidNamespace(String),

    /// Track name is neither `video` nor `audio`
    #[error("invalid track: {0}")]
    InvalidTrack(String),

    /// The channel could not be started or demuxed
    #[error("internal error: {0}")]
    Internal(String),

    /// The session refused the track
    #[error("transport error: {0}")]
    Transport(#[from] TransportError),
}

impl SubscribeError {
    pub const INVALID_NAMESPACE: u64 = 1;
    pub const INTERNAL: u64 = 2;
    pub const INVALID_TRACK: u64 = 3;

    /// Code sent to the subscriber with the rejection
    pub fn code(&self) -> u64 {
        match self {
            SubscribeError::InvalidNamespace(_) => Self::INVALID_NAMESPACE,
            SubscribeError::InvalidTrack(_) => Self::INVALID_TRACK,
            SubscribeError::Internal(_) | SubscribeError::Transport(_) => Self::INTERNAL,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_codes() {
        assert_eq!(SubscribeError::InvalidNamespace(String::new()).code(), 1);
        assert_eq!(SubscribeError::Internal(String::new()).code(), 2);
        assert_eq!(SubscribeError::InvalidTrack(String::new()).code(), 3);
        assert_eq!(
            SubscribeError::from(TransportError::SessionClosed(1)).code(),
            SubscribeError::INTERNAL
        );
    }

    #[test]
    fn test_display() {
        let err = SubscribeError::InvalidNamespace("namespace must contain at least one '/'".into());
        assert_eq!(
            err.to_string(),
            "invalid namespace: namespace must contain at least one '/'"
        );
    }
}
