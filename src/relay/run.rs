//! The relay loop
//!
//! One task per running relay reads the encoder output box by box:
//!
//! - `ftyp` / `moov` refresh the channel's cached init segment and are not
//!   broadcast; a new `moov` also replaces the track index.
//! - `moof` must be followed by `mdat`. The pair is classified through the
//!   track index and published as one object on the video or audio track.
//! - Anything else is skipped.
//!
//! The loop ends on end of stream, on the first read, parse or protocol
//! error, or when neither track has subscribers left.

use std::sync::Arc;

use tokio::io::AsyncRead;

use crate::error::{Error, Result};
use crate::media::{classify, BoxReader, BoxType, Fragment, MediaError, MediaKind, TrackIndex, HEADER_LEN};
use crate::registry::{Channel, TrackName};
use crate::transport::TransportError;

use super::encoder::EncoderOutput;

/// Why a relay loop ended without error
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RelayExit {
    /// The encoder closed its output on a box boundary
    EndOfStream,
    /// Nobody subscribes to the channel anymore
    Idle,
}

/// Reads one encoder output and publishes its fragments to a channel
pub struct RelayLoop<R> {
    channel: Arc<Channel>,
    reader: BoxReader<R>,
    tracks: Arc<TrackIndex>,
    generation: u64,
    published: u64,
    dropped: u64,
}

impl<R: AsyncRead + Unpin> RelayLoop<R> {
    /// Create a loop feeding `channel` as relay `generation`
    pub async fn new(channel: Arc<Channel>, reader: BoxReader<R>, generation: u64) -> Self {
        let tracks = channel.tracks().await;
        Self {
            channel,
            reader,
            tracks,
            generation,
            published: 0,
            dropped: 0,
        }
    }

    /// Objects published so far
    pub fn published(&self) -> u64 {
        self.published
    }

    /// Fragments read but not delivered to any track
    pub fn dropped(&self) -> u64 {
        self.dropped
    }

    /// Run until the stream ends, fails or goes idle
    pub async fn run(&mut self) -> Result<RelayExit> {
        loop {
            let Some(mp4) = self.reader.read_box().await? else {
                return Ok(RelayExit::EndOfStream);
            };

            match mp4.box_type() {
                BoxType::FileType | BoxType::Movie => {
                    self.tracks = self.channel.replace_init_box(mp4).await?;
                }
                BoxType::MovieFragment => {
                    let data = self.reader.read_box().await?.ok_or(MediaError::Truncated {
                        needed: HEADER_LEN,
                        available: 0,
                    })?;
                    let fragment = Fragment::pair(mp4, data)?;

                    if let Some(exit) = self.route(fragment).await? {
                        return Ok(exit);
                    }
                }
                other => {
                    tracing::trace!(channel = %self.channel.id(), box_type = %other, "Skipping box");
                }
            }
        }
    }

    async fn route(&mut self, fragment: Fragment) -> Result<Option<RelayExit>> {
        let kind = classify(fragment.header(), &self.tracks)?;
        let Some(track) = TrackName::for_kind(kind) else {
            self.dropped += 1;
            tracing::debug!(
                channel = %self.channel.id(),
                kind = %MediaKind::Other,
                size = fragment.size(),
                "Dropping fragment of unrouted track"
            );
            return Ok(None);
        };

        match self.channel.publish(track, fragment.payload()) {
            Ok(object_id) => {
                self.published += 1;
                tracing::trace!(
                    channel = %self.channel.id(),
                    track = %track,
                    object_id = object_id,
                    size = fragment.size(),
                    "Published fragment"
                );
                Ok(None)
            }
            Err(TransportError::NoSubscribers(_)) => {
                self.dropped += 1;
                if self.channel.stop_if_idle(self.generation).await {
                    return Ok(Some(RelayExit::Idle));
                }
                Ok(None)
            }
            Err(e) => Err(Error::Transport(e)),
        }
    }
}

/// Relay task body: run the loop, log its exit, report it to the channel
pub(crate) async fn run_relay(
    channel: Arc<Channel>,
    reader: BoxReader<EncoderOutput>,
    generation: u64,
) {
    tracing::info!(channel = %channel.id(), generation = generation, "Relay started");

    let mut relay = RelayLoop::new(Arc::clone(&channel), reader, generation).await;
    let result = relay.run().await;

    match &result {
        Ok(RelayExit::EndOfStream) => tracing::info!(
            channel = %channel.id(),
            generation = generation,
            published = relay.published(),
            "Relay finished, encoder output ended"
        ),
        Ok(RelayExit::Idle) => tracing::info!(
            channel = %channel.id(),
            generation = generation,
            published = relay.published(),
            "Relay stopped, no subscribers"
        ),
        Err(e) => tracing::warn!(
            channel = %channel.id(),
            generation = generation,
            published = relay.published(),
            error = %e,
            "Relay failed"
        ),
    }

    channel.relay_finished(generation, &result).await;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::{ChannelId, RegistryConfig, RelayStatus, GROUP_ID};
    use crate::relay::{read_init_segment, Probe};
    use crate::testutil::{self, ScriptedEncoder};
    use crate::transport::{Session, TrackReader};

    /// Channel probed from `init`, with a relay loop over `stream`
    async fn setup(init: Vec<u8>, stream: Vec<u8>) -> (Arc<Channel>, RelayLoop<std::io::Cursor<Vec<u8>>>) {
        let mut probe_reader = BoxReader::new(EncoderOutput::from_reader(std::io::Cursor::new(init)));
        let init = read_init_segment(&mut probe_reader).await.unwrap();
        let channel = Channel::new(
            ChannelId::new("ch"),
            Probe {
                init,
                reader: probe_reader,
            },
            &RegistryConfig::default(),
        );
        let relay = RelayLoop::new(Arc::clone(&channel), BoxReader::new(std::io::Cursor::new(stream)), 1).await;
        (channel, relay)
    }

    fn subscribe(session: &Session, channel: &Channel, track: TrackName) -> TrackReader {
        session.add_local_track(channel.track(track)).unwrap()
    }

    #[tokio::test]
    async fn test_routes_by_track() {
        let mut stream = testutil::fragment(2, 10);
        stream.extend(testutil::fragment(1, 20));
        stream.extend(testutil::fragment(1, 30));
        let (channel, mut relay) = setup(testutil::av_init(), stream.clone()).await;

        let session = Session::new(1);
        let mut video = subscribe(&session, &channel, TrackName::Video);
        let mut audio = subscribe(&session, &channel, TrackName::Audio);

        assert_eq!(relay.run().await.unwrap(), RelayExit::EndOfStream);
        assert_eq!(relay.published(), 3);

        let a = audio.read_object().await.unwrap();
        assert_eq!((a.group_id, a.object_id), (GROUP_ID, 2));
        assert_eq!(a.payload.as_ref(), testutil::fragment(2, 10).as_slice());

        let v1 = video.read_object().await.unwrap();
        let v2 = video.read_object().await.unwrap();
        assert_eq!((v1.object_id, v2.object_id), (2, 3));
        assert_eq!(v2.payload.as_ref(), testutil::fragment(1, 30).as_slice());
    }

    #[tokio::test]
    async fn test_new_moov_is_cached_not_published() {
        let mut stream = testutil::ftyp();
        stream.extend(testutil::moov(&[(7, b"vide")]));
        stream.extend(testutil::fragment(7, 4));
        let (channel, mut relay) = setup(testutil::av_init(), stream).await;

        let session = Session::new(1);
        let mut video = subscribe(&session, &channel, TrackName::Video);

        assert_eq!(relay.run().await.unwrap(), RelayExit::EndOfStream);
        let object = video.read_object().await.unwrap();
        assert_eq!(object.object_id, 2);
        assert_eq!(object.payload.as_ref(), testutil::fragment(7, 4).as_slice());
        assert_eq!(channel.tracks().await.get(7), Some(MediaKind::Video));
    }

    #[tokio::test]
    async fn test_moof_without_mdat() {
        let mut stream = testutil::moof(1);
        stream.extend(testutil::moof(1));
        let (channel, mut relay) = setup(testutil::av_init(), stream).await;
        let session = Session::new(1);
        let _video = subscribe(&session, &channel, TrackName::Video);

        let err = relay.run().await.unwrap_err();
        assert!(matches!(
            err,
            Error::ProtocolViolation {
                expected: BoxType::MediaData,
                found: BoxType::MovieFragment
            }
        ));
        assert_eq!(channel.next_object_id(TrackName::Video), 2);
    }

    #[tokio::test]
    async fn test_stream_ends_after_moof() {
        let (channel, mut relay) = setup(testutil::av_init(), testutil::moof(1)).await;
        let session = Session::new(1);
        let _video = subscribe(&session, &channel, TrackName::Video);

        assert!(matches!(
            relay.run().await.unwrap_err(),
            Error::Media(MediaError::Truncated { .. })
        ));
    }

    #[tokio::test]
    async fn test_unknown_track_fails() {
        let (channel, mut relay) = setup(testutil::av_init(), testutil::fragment(9, 4)).await;
        let session = Session::new(1);
        let _video = subscribe(&session, &channel, TrackName::Video);

        let err = relay.run().await.unwrap_err();
        assert!(matches!(err, Error::Media(MediaError::UnknownTrack(9))));
        assert!(err.invalidates_metadata());
    }

    #[tokio::test]
    async fn test_other_tracks_dropped() {
        let mut init = testutil::ftyp();
        init.extend(testutil::moov(&[(1, b"vide"), (3, b"subt")]));
        let mut stream = testutil::fragment(3, 4);
        stream.extend(testutil::mp4_box(b"free", &[0u8; 4]));
        stream.extend(testutil::fragment(1, 4));
        let (channel, mut relay) = setup(init, stream).await;

        let session = Session::new(1);
        let mut video = subscribe(&session, &channel, TrackName::Video);

        assert_eq!(relay.run().await.unwrap(), RelayExit::EndOfStream);
        assert_eq!(relay.published(), 1);
        assert_eq!(relay.dropped(), 1);
        assert_eq!(video.read_object().await.unwrap().object_id, 2);
    }

    #[tokio::test]
    async fn test_unwatched_track_skipped_while_sibling_watched() {
        let mut data = testutil::av_init();
        data.extend(testutil::fragment(1, 4));
        data.extend(testutil::fragment(2, 4));
        data.extend(testutil::fragment(1, 4));
        let (channel, _) = setup(data, Vec::new()).await;

        let session = Session::new(1);
        let mut audio = subscribe(&session, &channel, TrackName::Audio);
        assert!(channel.ensure_relay(&ScriptedEncoder::new()).await.unwrap());

        let object = audio.read_object().await.unwrap();
        assert_eq!(object.object_id, 2);
        assert_eq!(object.payload.as_ref(), testutil::fragment(2, 4).as_slice());

        testutil::wait_for_relay(&channel, RelayStatus::Stopped).await;
        assert_eq!(channel.next_object_id(TrackName::Video), 2);
        assert_eq!(channel.next_object_id(TrackName::Audio), 3);
    }

    #[tokio::test]
    async fn test_stale_generation_exits_when_idle() {
        let (channel, mut relay) = setup(testutil::av_init(), testutil::fragment(1, 4)).await;
        assert_eq!(relay.run().await.unwrap(), RelayExit::Idle);
        assert_eq!(relay.dropped(), 1);
        assert_eq!(channel.next_object_id(TrackName::Video), 2);
    }
}
