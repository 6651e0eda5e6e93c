//! Streaming Configuration

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Streaming scheduler configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StreamingConfig {
    /// Most resources processed by a single tick
    pub max_resources_per_update: usize,

    /// Minimum time between two updates of the same resource
    pub update_interval: Duration,
}

impl Default for StreamingConfig {
    fn default() -> Self {
        Self {
            max_resources_per_update: 64,
            update_interval: Duration::from_millis(100),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_streaming_config_defaults() {
        let config = StreamingConfig::default();
        assert_eq!(config.max_resources_per_update, 64);
        assert_eq!(config.update_interval, Duration::from_millis(100));
    }

    #[test]
    fn test_streaming_config_partial_json() {
        let config: StreamingConfig =
            serde_json::from_str(r#"{ "max_resources_per_update": 16 }"#).unwrap();

        assert_eq!(config.max_resources_per_update, 16);
        assert_eq!(config.update_interval, Duration::from_millis(100));
    }

    #[test]
    fn test_streaming_config_interval_json() {
        let config: StreamingConfig =
            serde_json::from_str(r#"{ "update_interval": { "secs": 0, "nanos": 50000000 } }"#)
                .unwrap();

        assert_eq!(config.update_interval, Duration::from_millis(50));
    }
}
