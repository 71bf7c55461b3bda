//! Subscription requests and the names they carry
//!
//! A subscriber addresses a channel through the track namespace
//! `<prefix>/<channel id>` and picks one of its tracks by name. The channel
//! id is the encoder input (usually a URL), so everything after the first
//! `/` belongs to it.

use std::fmt;
use std::str::FromStr;

use crate::media::MediaKind;

use super::error::SubscribeError;

/// Identifier of a channel, the input handed to its encoder
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ChannelId(String);

impl ChannelId {
    /// Create a channel id
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// The id as a string
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ChannelId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ChannelId {
    fn from(id: &str) -> Self {
        Self::new(id)
    }
}

/// Output track of a channel
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TrackName {
    Video,
    Audio,
}

impl TrackName {
    pub fn as_str(&self) -> &'static str {
        match self {
            TrackName::Video => "video",
            TrackName::Audio => "audio",
        }
    }

    /// Track carrying fragments of the given kind, if any
    pub fn for_kind(kind: MediaKind) -> Option<Self> {
        match kind {
            MediaKind::Video => Some(TrackName::Video),
            MediaKind::Audio => Some(TrackName::Audio),
            MediaKind::Other => None,
        }
    }
}

impl fmt::Display for TrackName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TrackName {
    type Err = SubscribeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "video" => Ok(TrackName::Video),
            "audio" => Ok(TrackName::Audio),
            other => Err(SubscribeError::InvalidTrack(format!(
                "track name must be 'video' or 'audio', got '{}'",
                other
            ))),
        }
    }
}

/// A subscriber's request for one track of one channel
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubscriptionRequest {
    /// `<prefix>/<channel id>`
    pub namespace: String,
    /// `video` or `audio`
    pub track_name: String,
}

impl SubscriptionRequest {
    /// Create a request
    pub fn new(namespace: impl Into<String>, track_name: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            track_name: track_name.into(),
        }
    }

    /// Request for `track` of `channel` under `prefix`
    pub fn for_channel(prefix: &str, channel: &ChannelId, track: TrackName) -> Self {
        Self::new(format!("{}/{}", prefix, channel), track.as_str())
    }

    /// Validate the request against the expected namespace prefix
    ///
    /// The namespace is checked before the track name.
    pub fn parse(&self, prefix: &str) -> Result<(ChannelId, TrackName), SubscribeError> {
        let (head, id) = self.namespace.split_once('/').ok_or_else(|| {
            SubscribeError::InvalidNamespace("namespace must contain at least one '/'".into())
        })?;

        if head != prefix {
            return Err(SubscribeError::InvalidNamespace(format!(
                "first part of namespace must equal '{}'",
                prefix
            )));
        }
        if id.is_empty() {
            return Err(SubscribeError::InvalidNamespace(
                "channel id must not be empty".into(),
            ));
        }

        let track = self.track_name.parse()?;
        Ok((ChannelId::new(id), track))
    }
}

impl fmt::Display for SubscriptionRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.namespace, self.track_name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(namespace: &str, track: &str) -> Result<(ChannelId, TrackName), SubscribeError> {
        SubscriptionRequest::new(namespace, track).parse("iptv-moq")
    }

    #[test]
    fn test_parse_valid() {
        let (id, track) = parse("iptv-moq/abc", "video").unwrap();
        assert_eq!(id.as_str(), "abc");
        assert_eq!(track, TrackName::Video);
    }

    #[test]
    fn test_channel_id_keeps_slashes() {
        let (id, track) = parse("iptv-moq/https://example.com/live/ch1.m3u8", "audio").unwrap();
        assert_eq!(id.as_str(), "https://example.com/live/ch1.m3u8");
        assert_eq!(track, TrackName::Audio);
    }

    #[test]
    fn test_missing_slash() {
        let err = parse("iptv-moq", "video").unwrap_err();
        assert_eq!(err.code(), SubscribeError::INVALID_NAMESPACE);
    }

    #[test]
    fn test_wrong_prefix() {
        let err = parse("other/abc", "video").unwrap_err();
        assert!(matches!(err, SubscribeError::InvalidNamespace(_)));
    }

    #[test]
    fn test_empty_channel_id() {
        assert!(matches!(
            parse("iptv-moq/", "video").unwrap_err(),
            SubscribeError::InvalidNamespace(_)
        ));
    }

    #[test]
    fn test_invalid_track() {
        let err = parse("iptv-moq/abc", "subtitles").unwrap_err();
        assert_eq!(err.code(), SubscribeError::INVALID_TRACK);
    }

    #[test]
    fn test_namespace_checked_first() {
        let err = parse("badnamespace", "subtitles").unwrap_err();
        assert!(matches!(err, SubscribeError::InvalidNamespace(_)));
    }

    #[test]
    fn test_custom_prefix() {
        let request = SubscriptionRequest::for_channel("tv", &ChannelId::new("x"), TrackName::Audio);
        assert_eq!(request.namespace, "tv/x");
        assert_eq!(request.track_name, "audio");
        assert!(request.parse("tv").is_ok());
        assert!(request.parse("iptv-moq").is_err());
    }

    #[test]
    fn test_track_for_kind() {
        assert_eq!(TrackName::for_kind(MediaKind::Video), Some(TrackName::Video));
        assert_eq!(TrackName::for_kind(MediaKind::Audio), Some(TrackName::Audio));
        assert_eq!(TrackName::for_kind(MediaKind::Other), None);
    }
}
