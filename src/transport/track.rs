//! Published tracks and their readers

use std::collections::VecDeque;
use std::fmt;
use std::sync::Arc;

use bytes::Bytes;
use tokio::sync::broadcast;

use super::error::TransportError;
use super::session::Registration;

/// One unit published on a track
///
/// Cheap to clone: the payload is reference counted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Object {
    /// Group the object belongs to
    pub group_id: u64,
    /// Position of the object within the track
    pub object_id: u64,
    /// Object bytes
    pub payload: Bytes,
}

impl Object {
    /// Create an object
    pub fn new(group_id: u64, object_id: u64, payload: Bytes) -> Self {
        Self {
            group_id,
            object_id,
            payload,
        }
    }
}

struct TrackInner {
    namespace: String,
    name: String,
    tx: broadcast::Sender<Object>,
}

/// A track published by this process
///
/// Clones share the same underlying broadcast channel.
#[derive(Clone)]
pub struct LocalTrack {
    inner: Arc<TrackInner>,
}

impl LocalTrack {
    /// Create a track buffering up to `capacity` objects per slow subscriber
    pub fn new(namespace: impl Into<String>, name: impl Into<String>, capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self {
            inner: Arc::new(TrackInner {
                namespace: namespace.into(),
                name: name.into(),
                tx,
            }),
        }
    }

    /// Track namespace
    pub fn namespace(&self) -> &str {
        &self.inner.namespace
    }

    /// Track name within the namespace
    pub fn name(&self) -> &str {
        &self.inner.name
    }

    /// Number of live subscribers
    pub fn subscriber_count(&self) -> usize {
        self.inner.tx.receiver_count()
    }

    /// Publish an object to every current subscriber
    ///
    /// Returns the number of subscribers reached, or
    /// [`TransportError::NoSubscribers`] if there are none.
    pub fn write_object(&self, object: Object) -> Result<usize, TransportError> {
        self.inner
            .tx
            .send(object)
            .map_err(|_| TransportError::NoSubscribers(self.to_string()))
    }

    pub(super) fn subscribe(&self) -> broadcast::Receiver<Object> {
        self.inner.tx.subscribe()
    }
}

impl fmt::Display for LocalTrack {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.inner.namespace, self.inner.name)
    }
}

impl fmt::Debug for LocalTrack {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LocalTrack")
            .field("namespace", &self.inner.namespace)
            .field("name", &self.inner.name)
            .field("subscribers", &self.subscriber_count())
            .finish()
    }
}

/// A subscriber's view of a track
///
/// Objects queued with [`deliver`](Self::deliver) are read before anything
/// broadcast on the track. Dropping the reader unsubscribes.
pub struct TrackReader {
    track: String,
    rx: broadcast::Receiver<Object>,
    pending: VecDeque<Object>,
    _registration: Registration,
}

impl TrackReader {
    pub(super) fn new(track: &LocalTrack, registration: Registration) -> Self {
        Self {
            track: track.to_string(),
            rx: track.subscribe(),
            pending: VecDeque::new(),
            _registration: registration,
        }
    }

    /// Full name of the track being read, `namespace:name`
    pub fn track_name(&self) -> &str {
        &self.track
    }

    /// Queue an object for this subscriber only
    pub fn deliver(&mut self, object: Object) {
        self.pending.push_back(object);
    }

    /// Number of objects queued with [`deliver`](Self::deliver) and not yet read
    pub fn pending(&self) -> usize {
        self.pending.len()
    }

    /// Read the next object
    ///
    /// Waits until the publisher writes one. A subscriber that fell more
    /// than the track capacity behind gets [`TransportError::Lagged`] once
    /// and then continues with the oldest object still buffered. Once every
    /// [`LocalTrack`] handle is dropped the reader drains what is buffered
    /// and then returns [`TransportError::TrackClosed`].
    pub async fn read_object(&mut self) -> Result<Object, TransportError> {
        if let Some(object) = self.pending.pop_front() {
            return Ok(object);
        }

        match self.rx.recv().await {
            Ok(object) => Ok(object),
            Err(broadcast::error::RecvError::Lagged(skipped)) => {
                tracing::debug!(track = %self.track, skipped, "Subscriber lagged");
                Err(TransportError::Lagged(skipped))
            }
            Err(broadcast::error::RecvError::Closed) => {
                Err(TransportError::TrackClosed(self.track.clone()))
            }
        }
    }
}

impl fmt::Debug for TrackReader {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TrackReader")
            .field("track", &self.track)
            .field("pending", &self.pending.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::Session;

    fn object(id: u64) -> Object {
        Object::new(0, id, Bytes::from(vec![id as u8; 4]))
    }

    #[test]
    fn test_write_without_subscribers() {
        let track = LocalTrack::new("iptv-moq/news", "video", 16);
        assert_eq!(track.subscriber_count(), 0);
        assert_eq!(
            track.write_object(object(0)),
            Err(TransportError::NoSubscribers("iptv-moq/news:video".into()))
        );
    }

    #[tokio::test]
    async fn test_fan_out() {
        let track = LocalTrack::new("iptv-moq/news", "video", 16);
        let a = Session::new(1);
        let b = Session::new(2);
        let mut ra = a.add_local_track(&track).unwrap();
        let mut rb = b.add_local_track(&track).unwrap();
        assert_eq!(track.subscriber_count(), 2);

        assert_eq!(track.write_object(object(5)).unwrap(), 2);
        assert_eq!(ra.read_object().await.unwrap().object_id, 5);
        assert_eq!(rb.read_object().await.unwrap().object_id, 5);
    }

    #[tokio::test]
    async fn test_delivered_objects_come_first() {
        let track = LocalTrack::new("iptv-moq/news", "audio", 16);
        let session = Session::new(1);
        let mut reader = session.add_local_track(&track).unwrap();

        track.write_object(object(7)).unwrap();
        reader.deliver(object(0));
        reader.deliver(object(1));
        assert_eq!(reader.pending(), 2);

        let ids = [
            reader.read_object().await.unwrap().object_id,
            reader.read_object().await.unwrap().object_id,
            reader.read_object().await.unwrap().object_id,
        ];
        assert_eq!(ids, [0, 1, 7]);
    }

    #[tokio::test]
    async fn test_drop_reader_unsubscribes() {
        let track = LocalTrack::new("iptv-moq/news", "video", 16);
        let session = Session::new(1);
        let reader = session.add_local_track(&track).unwrap();
        assert_eq!(track.subscriber_count(), 1);

        drop(reader);
        assert_eq!(track.subscriber_count(), 0);
        assert!(track.write_object(object(0)).is_err());
    }

    #[tokio::test]
    async fn test_lagged_reader_recovers() {
        let track = LocalTrack::new("iptv-moq/news", "video", 2);
        let session = Session::new(1);
        let mut reader = session.add_local_track(&track).unwrap();

        for id in 0..5 {
            track.write_object(object(id)).unwrap();
        }

        assert_eq!(reader.read_object().await, Err(TransportError::Lagged(3)));
        assert_eq!(reader.read_object().await.unwrap().object_id, 3);
        assert_eq!(reader.read_object().await.unwrap().object_id, 4);
    }

    #[tokio::test]
    async fn test_closed_track() {
        let track = LocalTrack::new("iptv-moq/news", "video", 2);
        let session = Session::new(1);
        let mut reader = session.add_local_track(&track).unwrap();
        assert_eq!(reader.track_name(), "iptv-moq/news:video");

        track.write_object(object(1)).unwrap();
        drop(track);

        assert_eq!(reader.read_object().await.unwrap().object_id, 1);
        assert_eq!(
            reader.read_object().await,
            Err(TransportError::TrackClosed("iptv-moq/news:video".into()))
        );
    }
}
