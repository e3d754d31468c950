//! Process-wide publisher configuration, read from environment variables
//! with sensible defaults — command-channel negotiation of any of these
//! per connection is out of scope here.

#[derive(Debug, Clone, Copy)]
pub struct PublisherConfig {
    pub port: u16,
    pub supports_temporal_subscriptions: bool,
    pub include_time: bool,
    pub use_millisecond_resolution: bool,
    pub use_compact_measurement_format: bool,
}

impl Default for PublisherConfig {
    fn default() -> Self {
        PublisherConfig {
            port: std::env::var("STTP_PUBLISHER_PORT")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(7165),
            supports_temporal_subscriptions: std::env::var("STTP_SUPPORTS_TEMPORAL")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(true),
            include_time: std::env::var("STTP_INCLUDE_TIME")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(true),
            use_millisecond_resolution: std::env::var("STTP_USE_MS_RESOLUTION")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(false),
            use_compact_measurement_format: std::env::var("STTP_USE_COMPACT_FORMAT")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(true),
        }
    }
}

impl PublisherConfig {
    pub fn codec_options(&self) -> crate::compact_measurement::CodecOptions {
        crate::compact_measurement::CodecOptions {
            include_time: self.include_time,
            use_millisecond_resolution: self.use_millisecond_resolution,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_spec_defaults_when_env_unset() {
        std::env::remove_var("STTP_PUBLISHER_PORT");
        std::env::remove_var("STTP_INCLUDE_TIME");
        std::env::remove_var("STTP_USE_MS_RESOLUTION");
        std::env::remove_var("STTP_USE_COMPACT_FORMAT");
        let config = PublisherConfig::default();
        assert!(config.include_time);
        assert!(!config.use_millisecond_resolution);
        assert!(config.use_compact_measurement_format);
    }
}
