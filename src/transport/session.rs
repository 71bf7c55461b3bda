//! Subscriber sessions

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use super::error::TransportError;
use super::track::{LocalTrack, TrackReader};

type TrackSet = Arc<Mutex<HashSet<String>>>;

fn lock(tracks: &TrackSet) -> MutexGuard<'_, HashSet<String>> {
    tracks.lock().unwrap_or_else(|e| e.into_inner())
}

/// One subscriber connection
///
/// A session may read any number of tracks, but each track at most once.
#[derive(Debug)]
pub struct Session {
    id: u64,
    tracks: TrackSet,
    closed: AtomicBool,
}

impl Session {
    /// Create a session
    pub fn new(id: u64) -> Self {
        Self {
            id,
            tracks: Arc::new(Mutex::new(HashSet::new())),
            closed: AtomicBool::new(false),
        }
    }

    /// Session identifier
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Subscribe this session to a track
    ///
    /// The returned reader sees every object written after this call.
    pub fn add_local_track(&self, track: &LocalTrack) -> Result<TrackReader, TransportError> {
        if self.is_closed() {
            return Err(TransportError::SessionClosed(self.id));
        }

        let key = track.to_string();
        if !lock(&self.tracks).insert(key.clone()) {
            return Err(TransportError::DuplicateTrack {
                session: self.id,
                track: key,
            });
        }

        tracing::debug!(session = self.id, track = %key, "Track added to session");

        let registration = Registration {
            tracks: Arc::clone(&self.tracks),
            key,
        };
        Ok(TrackReader::new(track, registration))
    }

    /// Number of tracks this session currently reads
    pub fn track_count(&self) -> usize {
        lock(&self.tracks).len()
    }

    /// Refuse further subscriptions
    ///
    /// Readers already handed out keep working until dropped.
    pub fn close(&self) {
        if !self.closed.swap(true, Ordering::AcqRel) {
            tracing::debug!(session = self.id, "Session closed");
        }
    }

    /// Whether [`close`](Self::close) was called
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }
}

/// Removes a track from its session when the reader is dropped
pub(super) struct Registration {
    tracks: TrackSet,
    key: String,
}

impl Drop for Registration {
    fn drop(&mut self) {
        lock(&self.tracks).remove(&self.key);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_duplicate_track() {
        let track = LocalTrack::new("iptv-moq/news", "video", 4);
        let session = Session::new(9);

        let _reader = session.add_local_track(&track).unwrap();
        let err = session.add_local_track(&track).unwrap_err();
        assert_eq!(
            err,
            TransportError::DuplicateTrack {
                session: 9,
                track: "iptv-moq/news:video".into()
            }
        );
        assert_eq!(track.subscriber_count(), 1);
    }

    #[test]
    fn test_resubscribe_after_drop() {
        let track = LocalTrack::new("iptv-moq/news", "video", 4);
        let session = Session::new(1);

        let reader = session.add_local_track(&track).unwrap();
        assert_eq!(session.track_count(), 1);
        drop(reader);
        assert_eq!(session.track_count(), 0);

        assert!(session.add_local_track(&track).is_ok());
    }

    #[test]
    fn test_both_tracks_one_session() {
        let video = LocalTrack::new("iptv-moq/news", "video", 4);
        let audio = LocalTrack::new("iptv-moq/news", "audio", 4);
        let session = Session::new(1);

        let _v = session.add_local_track(&video).unwrap();
        let _a = session.add_local_track(&audio).unwrap();
        assert_eq!(session.track_count(), 2);
    }

    #[test]
    fn test_closed_session() {
        let track = LocalTrack::new("iptv-moq/news", "video", 4);
        let session = Session::new(3);
        session.close();

        assert!(session.is_closed());
        assert_eq!(
            session.add_local_track(&track).unwrap_err(),
            TransportError::SessionClosed(3)
        );
        assert_eq!(track.subscriber_count(), 0);
    }
}
