//! Channel registry implementation
//!
//! The central registry that owns every channel, probes new ones and routes
//! subscriptions to their tracks.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::{Mutex, RwLock};

use crate::relay::{self, Encoder, FfmpegEncoder, Probe};
use crate::transport::{Session, TrackReader};

use super::channel::{Channel, ChannelStats};
use super::config::RegistryConfig;
use super::error::SubscribeError;
use super::request::{ChannelId, SubscriptionRequest, TrackName};

/// Holds a channel once its probe succeeded
///
/// Subscriptions to a channel that is still being probed wait on the slot
/// lock and share the result.
#[derive(Default)]
struct ChannelSlot {
    channel: Mutex<Option<Arc<Channel>>>,
}

/// Central registry for all channels
///
/// Thread-safe; share it as `Arc<ChannelRegistry>` between the sessions
/// that call [`handle_subscription`](Self::handle_subscription).
pub struct ChannelRegistry<E: Encoder = FfmpegEncoder> {
    /// Map of channel id to channel slot
    channels: RwLock<HashMap<ChannelId, Arc<ChannelSlot>>>,

    encoder: E,

    /// Configuration
    config: RegistryConfig,
}

impl ChannelRegistry<FfmpegEncoder> {
    /// Create a registry running `ffmpeg` with default configuration
    pub fn new() -> Self {
        Self::with_config(RegistryConfig::default())
    }

    /// Create a registry running `ffmpeg` with custom configuration
    pub fn with_config(config: RegistryConfig) -> Self {
        Self::with_encoder(FfmpegEncoder::new(), config)
    }
}

impl Default for ChannelRegistry<FfmpegEncoder> {
    fn default() -> Self {
        Self::new()
    }
}

impl<E: Encoder> ChannelRegistry<E> {
    /// Create a registry starting channels with `encoder`
    pub fn with_encoder(encoder: E, config: RegistryConfig) -> Self {
        Self {
            channels: RwLock::new(HashMap::new()),
            encoder,
            config,
        }
    }

    /// Get the registry configuration
    pub fn config(&self) -> &RegistryConfig {
        &self.config
    }

    /// Accept or reject a subscription
    ///
    /// On success the returned reader first yields the channel's cached
    /// `ftyp` (object 0) and `moov` (object 1), then live fragments. The
    /// channel's relay is running when this returns.
    pub async fn handle_subscription(
        &self,
        session: &Session,
        request: &SubscriptionRequest,
    ) -> Result<TrackReader, SubscribeError> {
        let result = self.subscribe(session, request).await;

        if let Err(ref e) = result {
            tracing::info!(
                session = session.id(),
                namespace = %request.namespace,
                track = %request.track_name,
                code = e.code(),
                reason = %e,
                "Subscription rejected"
            );
        }

        result
    }

    async fn subscribe(
        &self,
        session: &Session,
        request: &SubscriptionRequest,
    ) -> Result<TrackReader, SubscribeError> {
        let (id, track) = request.parse(&self.config.namespace_prefix)?;
        let channel = self.open_channel(&id).await?;

        let mut reader = session.add_local_track(channel.track(track))?;
        for object in channel.init_objects().await {
            reader.deliver(object);
        }

        // The reader is registered first, so a relay deciding whether to go
        // idle already counts this subscriber.
        if let Err(e) = channel.ensure_relay(&self.encoder).await {
            drop(reader);
            return Err(SubscribeError::Internal(format!(
                "failed to start channel {}: {}",
                id, e
            )));
        }

        let subscriptions = channel.record_subscription(track);
        tracing::info!(
            channel = %id,
            track = %track,
            session = session.id(),
            subscribers = channel.track(track).subscriber_count(),
            subscriptions = subscriptions,
            "Subscriber added"
        );

        Ok(reader)
    }

    /// Get the channel for `id`, probing it first if needed
    async fn open_channel(&self, id: &ChannelId) -> Result<Arc<Channel>, SubscribeError> {
        let slot = self.slot(id).await;
        let mut guard = slot.channel.lock().await;

        if let Some(channel) = guard.as_ref() {
            if channel.is_invalidated() {
                tracing::info!(channel = %id, "Channel metadata unusable, probing again");
                let probe = self.probe(id).await?;
                channel.reset_from_probe(probe).await;
            }
            return Ok(Arc::clone(channel));
        }

        let probe = self.probe(id).await?;
        let tracks = probe.init.tracks().len();
        let channel = Channel::new(id.clone(), probe, &self.config);
        *guard = Some(Arc::clone(&channel));

        tracing::info!(channel = %id, tracks = tracks, "Channel created");

        Ok(channel)
    }

    async fn probe(&self, id: &ChannelId) -> Result<Probe, SubscribeError> {
        relay::probe(&self.encoder, id, &self.config)
            .await
            .map_err(|e| {
                tracing::warn!(channel = %id, error = %e, "Channel probe failed");
                SubscribeError::Internal(format!("failed to demux channel {}: {}", id, e))
            })
    }

    async fn slot(&self, id: &ChannelId) -> Arc<ChannelSlot> {
        let existing = self.channels.read().await.get(id).cloned();
        match existing {
            Some(slot) => slot,
            None => Arc::clone(self.channels.write().await.entry(id.clone()).or_default()),
        }
    }

    async fn slots(&self) -> Vec<(ChannelId, Arc<ChannelSlot>)> {
        self.channels
            .read()
            .await
            .iter()
            .map(|(id, slot)| (id.clone(), Arc::clone(slot)))
            .collect()
    }

    /// Get a probed channel
    ///
    /// Waits if the channel is being probed right now.
    pub async fn channel(&self, id: &ChannelId) -> Option<Arc<Channel>> {
        let slot = self.channels.read().await.get(id).cloned()?;
        let channel = slot.channel.lock().await.clone();
        channel
    }

    /// Get channel statistics
    pub async fn channel_stats(&self, id: &ChannelId) -> Option<ChannelStats> {
        match self.channel(id).await {
            Some(channel) => Some(channel.stats().await),
            None => None,
        }
    }

    /// Get the ids of all probed channels
    pub async fn channel_ids(&self) -> Vec<ChannelId> {
        let mut ids = Vec::new();
        for (id, slot) in self.slots().await {
            if slot.channel.lock().await.is_some() {
                ids.push(id);
            }
        }
        ids.sort();
        ids
    }

    /// Get total number of probed channels
    pub async fn channel_count(&self) -> usize {
        self.channel_ids().await.len()
    }

    /// Stop every relay and drop every channel
    ///
    /// Readers handed out earlier drain what they buffered and then report
    /// their track closed.
    pub async fn shutdown(&self) {
        let slots: Vec<_> = self.channels.write().await.drain().collect();

        for (id, slot) in slots {
            if let Some(channel) = slot.channel.lock().await.take() {
                channel.stop_relay().await;
                tracing::debug!(channel = %id, "Channel closed");
            }
        }

        tracing::info!("Channel registry shut down");
    }
}

impl TrackName {
    /// Request for this track of `channel` using the registry's prefix
    pub fn request<E: Encoder>(
        &self,
        registry: &ChannelRegistry<E>,
        channel: &ChannelId,
    ) -> SubscriptionRequest {
        SubscriptionRequest::for_channel(&registry.config.namespace_prefix, channel, *self)
    }
}
