//! Per-channel state
//!
//! A channel owns the two output tracks, the cached initialization segment
//! every new subscriber is primed with, the per-track object counters and
//! the supervised relay task feeding the tracks.
//!
//! # Relay supervision
//!
//! ```text
//!   probe ──► Primed(reader) ──ensure_relay──► Running{generation}
//!                                                 │         ▲
//!                      end of stream, error, idle │         │ ensure_relay
//!                                                 ▼         │ (new encoder)
//!                                               Stopped ────┘
//! ```
//!
//! Transitions happen under the state lock. Subscribers register their
//! reader before calling [`Channel::ensure_relay`], and the relay only stops
//! for lack of subscribers after re-checking under the same lock, so a new
//! subscriber either keeps the running relay alive or restarts it.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use bytes::Bytes;
use tokio::sync::{Mutex, RwLock};
use tokio::task::JoinHandle;

use crate::error::Result;
use crate::media::{BoxReader, BoxType, InitSegment, MediaError, Mp4Box, TrackIndex};
use crate::relay::{run_relay, Encoder, EncoderOutput, Probe, RelayExit};
use crate::transport::{LocalTrack, Object, TransportError};

use super::config::RegistryConfig;
use super::request::{ChannelId, TrackName};

/// Group every object of a channel is published in
pub const GROUP_ID: u64 = 0;

/// Object ids taken by the initialization segment (`ftyp` = 0, `moov` = 1)
pub const INIT_OBJECT_COUNT: u64 = 2;

enum RelayState {
    /// Probe finished; its reader is positioned after the init segment
    Primed(BoxReader<EncoderOutput>),
    /// A relay task owns the encoder output
    Running {
        generation: u64,
        handle: JoinHandle<()>,
    },
    /// No encoder is running
    Stopped,
}

impl RelayState {
    fn status(&self) -> RelayStatus {
        match self {
            RelayState::Primed(_) => RelayStatus::Primed,
            RelayState::Running { .. } => RelayStatus::Running,
            RelayState::Stopped => RelayStatus::Stopped,
        }
    }
}

/// Observable state of a channel's relay
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RelayStatus {
    /// Probed, relay not started yet
    Primed,
    /// Relay task running
    Running,
    /// No relay; the next subscription starts a new encoder
    Stopped,
}

/// One live channel
pub struct Channel {
    id: ChannelId,
    video: LocalTrack,
    audio: LocalTrack,
    init: RwLock<InitSegment>,

    /// Next object id per track
    ///
    /// Ids carry over when the relay restarts, so every id is used at most
    /// once for the lifetime of the channel.
    next_video_id: AtomicU64,
    next_audio_id: AtomicU64,

    video_subscriptions: AtomicU64,
    audio_subscriptions: AtomicU64,

    relay: Mutex<RelayState>,
    generation: AtomicU64,
    restarts: AtomicU64,
    invalidated: AtomicBool,
    max_box_size: usize,
    created_at: Instant,
}

impl Channel {
    /// Create a channel from a finished probe
    pub(crate) fn new(id: ChannelId, probe: Probe, config: &RegistryConfig) -> Arc<Self> {
        let namespace = format!("{}/{}", config.namespace_prefix, id);
        let Probe { init, reader } = probe;

        Arc::new(Self {
            video: LocalTrack::new(namespace.clone(), TrackName::Video.as_str(), config.track_capacity),
            audio: LocalTrack::new(namespace, TrackName::Audio.as_str(), config.track_capacity),
            id,
            init: RwLock::new(init),
            next_video_id: AtomicU64::new(INIT_OBJECT_COUNT),
            next_audio_id: AtomicU64::new(INIT_OBJECT_COUNT),
            video_subscriptions: AtomicU64::new(0),
            audio_subscriptions: AtomicU64::new(0),
            relay: Mutex::new(RelayState::Primed(reader)),
            generation: AtomicU64::new(0),
            restarts: AtomicU64::new(0),
            invalidated: AtomicBool::new(false),
            max_box_size: config.max_box_size,
            created_at: Instant::now(),
        })
    }

    pub fn id(&self) -> &ChannelId {
        &self.id
    }

    /// Output track for `name`
    pub fn track(&self, name: TrackName) -> &LocalTrack {
        match name {
            TrackName::Video => &self.video,
            TrackName::Audio => &self.audio,
        }
    }

    fn counter(&self, name: TrackName) -> &AtomicU64 {
        match name {
            TrackName::Video => &self.next_video_id,
            TrackName::Audio => &self.next_audio_id,
        }
    }

    fn subscriptions(&self, name: TrackName) -> &AtomicU64 {
        match name {
            TrackName::Video => &self.video_subscriptions,
            TrackName::Audio => &self.audio_subscriptions,
        }
    }

    /// Snapshot of the cached initialization segment
    pub async fn init_segment(&self) -> InitSegment {
        self.init.read().await.clone()
    }

    /// Track index of the cached `moov`
    pub async fn tracks(&self) -> Arc<TrackIndex> {
        Arc::clone(self.init.read().await.tracks())
    }

    /// The cached initialization segment as objects 0 (`ftyp`) and 1 (`moov`)
    pub async fn init_objects(&self) -> [Object; 2] {
        let init = self.init.read().await;
        [
            Object::new(GROUP_ID, 0, init.file_type().as_bytes().clone()),
            Object::new(GROUP_ID, 1, init.movie().as_bytes().clone()),
        ]
    }

    /// Replace the cached `ftyp` or `moov` with one read from the encoder
    ///
    /// Returns the track index in effect afterwards. A `moov` that cannot be
    /// indexed leaves the cache untouched and invalidates the channel.
    pub(crate) async fn replace_init_box(
        &self,
        mp4: Mp4Box,
    ) -> std::result::Result<Arc<TrackIndex>, MediaError> {
        let mut init = self.init.write().await;
        match mp4.box_type() {
            BoxType::FileType => init.set_file_type(mp4),
            BoxType::Movie => {
                if let Err(e) = init.set_movie(mp4) {
                    self.invalidated.store(true, Ordering::Release);
                    return Err(e);
                }
                tracing::debug!(channel = %self.id, tracks = init.tracks().len(), "Track index rebuilt");
            }
            _ => {}
        }
        Ok(Arc::clone(init.tracks()))
    }

    /// Publish one object on `name` under that track's next id
    ///
    /// The counter only advances when the object reached a subscriber.
    pub(crate) fn publish(
        &self,
        name: TrackName,
        payload: Bytes,
    ) -> std::result::Result<u64, TransportError> {
        let counter = self.counter(name);
        let object_id = counter.load(Ordering::Acquire);
        self.track(name)
            .write_object(Object::new(GROUP_ID, object_id, payload))?;
        counter.store(object_id + 1, Ordering::Release);
        Ok(object_id)
    }

    /// Next object id `name` will publish
    pub fn next_object_id(&self, name: TrackName) -> u64 {
        self.counter(name).load(Ordering::Acquire)
    }

    pub(crate) fn record_subscription(&self, name: TrackName) -> u64 {
        self.subscriptions(name).fetch_add(1, Ordering::Relaxed) + 1
    }

    /// Whether either track has a live subscriber
    pub fn has_subscribers(&self) -> bool {
        self.video.subscriber_count() > 0 || self.audio.subscriber_count() > 0
    }

    /// Make sure a relay task feeds this channel
    ///
    /// Starts the primed probe stream on first use, or a new encoder
    /// instance when the previous relay stopped. Returns whether a relay was
    /// started by this call.
    pub(crate) async fn ensure_relay<E: Encoder>(self: &Arc<Self>, encoder: &E) -> Result<bool> {
        let mut state = self.relay.lock().await;

        let reader = match std::mem::replace(&mut *state, RelayState::Stopped) {
            running @ RelayState::Running { .. } => {
                *state = running;
                return Ok(false);
            }
            RelayState::Primed(reader) => reader,
            RelayState::Stopped => {
                let output = encoder.start(&self.id)?;
                let restarts = self.restarts.fetch_add(1, Ordering::Relaxed) + 1;
                tracing::info!(channel = %self.id, restarts = restarts, "Restarting encoder");
                BoxReader::with_max_box_size(output, self.max_box_size)
            }
        };

        let generation = self.generation.fetch_add(1, Ordering::Relaxed) + 1;
        let handle = tokio::spawn(run_relay(Arc::clone(self), reader, generation));
        *state = RelayState::Running { generation, handle };
        Ok(true)
    }

    /// Stop relay `generation` if nobody subscribes to either track
    ///
    /// Returns whether the relay should exit. A relay that is no longer the
    /// current generation always exits.
    pub(crate) async fn stop_if_idle(&self, generation: u64) -> bool {
        let mut state = self.relay.lock().await;

        match &*state {
            RelayState::Running { generation: current, .. } if *current == generation => {
                if self.has_subscribers() {
                    return false;
                }
                *state = RelayState::Stopped;
                true
            }
            _ => true,
        }
    }

    /// Record the exit of relay `generation`
    ///
    /// Only the current generation changes the channel; a relay replaced in
    /// the meantime has nothing left to report.
    pub(crate) async fn relay_finished(&self, generation: u64, result: &Result<RelayExit>) {
        {
            let mut state = self.relay.lock().await;
            if !matches!(&*state, RelayState::Running { generation: current, .. } if *current == generation)
            {
                return;
            }

            if let Err(e) = result {
                if e.invalidates_metadata() {
                    self.invalidated.store(true, Ordering::Release);
                    tracing::warn!(channel = %self.id, error = %e, "Channel metadata invalidated");
                }
            }
            *state = RelayState::Stopped;
        }

        if self.has_subscribers() {
            tracing::debug!(
                channel = %self.id,
                "Relay stopped with subscribers attached, next subscription restarts it"
            );
        }
    }

    /// Adopt a fresh probe after the metadata became unusable
    ///
    /// The cached init segment and track index are replaced and the next
    /// [`ensure_relay`](Self::ensure_relay) continues from the probe's
    /// reader. Tracks, their subscribers and the object counters stay, so
    /// readers attached before the failure keep receiving.
    pub(crate) async fn reset_from_probe(&self, probe: Probe) {
        let Probe { init, reader } = probe;
        let mut state = self.relay.lock().await;

        if let RelayState::Running { generation, handle } =
            std::mem::replace(&mut *state, RelayState::Primed(reader))
        {
            handle.abort();
            tracing::debug!(channel = %self.id, generation = generation, "Relay aborted");
        }

        let tracks = {
            let mut cached = self.init.write().await;
            *cached = init;
            self.invalidated.store(false, Ordering::Release);
            cached.tracks().len()
        };

        let restarts = self.restarts.fetch_add(1, Ordering::Relaxed) + 1;
        tracing::info!(
            channel = %self.id,
            tracks = tracks,
            restarts = restarts,
            "Channel metadata replaced"
        );
    }

    /// Whether the channel's metadata can no longer be used
    pub fn is_invalidated(&self) -> bool {
        self.invalidated.load(Ordering::Acquire)
    }

    /// Abort the relay task and release the encoder
    pub async fn stop_relay(&self) {
        let previous = std::mem::replace(&mut *self.relay.lock().await, RelayState::Stopped);
        if let RelayState::Running { generation, handle } = previous {
            handle.abort();
            tracing::debug!(channel = %self.id, generation = generation, "Relay aborted");
        }
    }

    /// Current relay state
    pub async fn relay_status(&self) -> RelayStatus {
        self.relay.lock().await.status()
    }

    /// Channel statistics
    pub async fn stats(&self) -> ChannelStats {
        let (init_size, track_count) = {
            let init = self.init.read().await;
            (init.size(), init.tracks().len())
        };

        ChannelStats {
            video_subscribers: self.video.subscriber_count(),
            audio_subscribers: self.audio.subscriber_count(),
            video_subscriptions: self.video_subscriptions.load(Ordering::Relaxed),
            audio_subscriptions: self.audio_subscriptions.load(Ordering::Relaxed),
            next_video_id: self.next_object_id(TrackName::Video),
            next_audio_id: self.next_object_id(TrackName::Audio),
            relay: self.relay_status().await,
            restarts: self.restarts.load(Ordering::Relaxed),
            invalidated: self.is_invalidated(),
            track_count,
            init_size,
            uptime: self.created_at.elapsed(),
        }
    }
}

impl std::fmt::Debug for Channel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Channel")
            .field("id", &self.id)
            .field("next_video_id", &self.next_object_id(TrackName::Video))
            .field("next_audio_id", &self.next_object_id(TrackName::Audio))
            .finish()
    }
}

/// Statistics for a channel
#[derive(Debug, Clone)]
pub struct ChannelStats {
    /// Live subscribers on the video track
    pub video_subscribers: usize,
    /// Live subscribers on the audio track
    pub audio_subscribers: usize,
    /// Subscriptions accepted on the video track so far
    pub video_subscriptions: u64,
    /// Subscriptions accepted on the audio track so far
    pub audio_subscriptions: u64,
    pub next_video_id: u64,
    pub next_audio_id: u64,
    pub relay: RelayStatus,
    /// Encoder instances started after the first
    pub restarts: u64,
    pub invalidated: bool,
    /// Tracks in the cached `moov`
    pub track_count: usize,
    /// Bytes of the cached initialization segment
    pub init_size: usize,
    pub uptime: Duration,
}
