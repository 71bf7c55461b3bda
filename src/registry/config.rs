//! Registry configuration

use std::time::Duration;

use crate::media::DEFAULT_MAX_BOX_SIZE;

/// Namespace prefix subscribers must use by default
pub const DEFAULT_NAMESPACE_PREFIX: &str = "iptv-moq";

/// Channel registry configuration options
#[derive(Debug, Clone)]
pub struct RegistryConfig {
    /// First namespace component every subscription must carry
    pub namespace_prefix: String,

    /// Time the encoder gets to emit its initialization segment
    pub probe_timeout: Duration,

    /// Objects buffered per track for subscribers that fall behind
    pub track_capacity: usize,

    /// Largest box accepted from an encoder
    pub max_box_size: usize,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            namespace_prefix: DEFAULT_NAMESPACE_PREFIX.to_string(),
            probe_timeout: Duration::from_secs(10),
            track_capacity: 256,
            max_box_size: DEFAULT_MAX_BOX_SIZE,
        }
    }
}

impl RegistryConfig {
    /// Set the namespace prefix
    pub fn namespace_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.namespace_prefix = prefix.into();
        self
    }

    /// Set the probe timeout
    pub fn probe_timeout(mut self, timeout: Duration) -> Self {
        self.probe_timeout = timeout;
        self
    }

    /// Set the per-track buffer (at least one object)
    pub fn track_capacity(mut self, capacity: usize) -> Self {
        self.track_capacity = capacity.max(1);
        self
    }

    /// Set the largest accepted box
    pub fn max_box_size(mut self, size: usize) -> Self {
        self.max_box_size = size;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = RegistryConfig::default();

        assert_eq!(config.namespace_prefix, "iptv-moq");
        assert_eq!(config.probe_timeout, Duration::from_secs(10));
        assert_eq!(config.track_capacity, 256);
        assert_eq!(config.max_box_size, 64 * 1024 * 1024);
    }

    #[test]
    fn test_builder_chain() {
        let config = RegistryConfig::default()
            .namespace_prefix("tv")
            .probe_timeout(Duration::from_millis(500))
            .track_capacity(0)
            .max_box_size(1024);

        assert_eq!(config.namespace_prefix, "tv");
        assert_eq!(config.probe_timeout, Duration::from_millis(500));
        assert_eq!(config.track_capacity, 1);
        assert_eq!(config.max_box_size, 1024);
    }
}
