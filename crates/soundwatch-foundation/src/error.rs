use thiserror::Error;

#[derive(Error, Debug)]
pub enum AppError {
    #[error("Audio subsystem error: {0}")]
    Audio(#[from] AudioError),

    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Shutdown requested")]
    ShutdownRequested,

    #[error("Fatal error, cannot recover: {0}")]
    Fatal(String),
}

#[derive(Error, Debug)]
pub enum AudioError {
    #[error("Device not found: {name:?}")]
    DeviceNotFound { name: Option<String> },

    #[error("Device disconnected")]
    DeviceDisconnected,

    #[error("Format not supported: {format}")]
    FormatNotSupported { format: String },

    #[error("Device delivers {actual} Hz, pipeline requires {required} Hz")]
    SampleRateMismatch { required: u32, actual: u32 },

    #[error("Frame pool exhausted after {slots} slots")]
    PoolExhausted { slots: usize },

    #[error("No audio data for {duration:?}")]
    NoDataTimeout { duration: std::time::Duration },

    #[error("Capture source closed")]
    SourceClosed,

    #[error("CPAL error: {0}")]
    Cpal(#[from] cpal::StreamError),

    #[error("Build stream error: {0}")]
    BuildStream(#[from] cpal::BuildStreamError),

    #[error("Play stream error: {0}")]
    PlayStream(#[from] cpal::PlayStreamError),

    #[error("Supported stream configs error: {0}")]
    SupportedStreamConfigs(#[from] cpal::SupportedStreamConfigsError),

    #[error("Fatal error, cannot recover: {0}")]
    Fatal(String),
}

impl AudioError {
    /// Whether the capture loop should give up rather than skip the cycle.
    /// Pool exhaustion and empty polls are counted and skipped; everything
    /// else means the source is gone or was never usable.
    pub fn is_fatal(&self) -> bool {
        !matches!(
            self,
            AudioError::PoolExhausted { .. } | AudioError::NoDataTimeout { .. }
        )
    }
}

/// Configuration validation failure. Raised before any resource is
/// allocated; carries the offending field so the operator can fix the file
/// instead of guessing.
#[derive(Error, Debug)]
#[error("invalid config: {field}: {reason}")]
pub struct ConfigError {
    pub field: &'static str,
    pub reason: String,
}

impl ConfigError {
    pub fn new(field: &'static str, reason: impl Into<String>) -> Self {
        Self {
            field,
            reason: reason.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn config_error_names_the_field() {
        let err = ConfigError::new("detection.ema_alpha", "must be in (0, 1]");
        let msg = err.to_string();
        assert!(msg.contains("detection.ema_alpha"));
        assert!(msg.contains("(0, 1]"));
    }

    #[test]
    fn disconnect_is_fatal_for_the_capture_loop() {
        assert!(AudioError::DeviceDisconnected.is_fatal());
        assert!(AudioError::SourceClosed.is_fatal());
        assert!(!AudioError::PoolExhausted { slots: 8 }.is_fatal());
        assert!(!AudioError::NoDataTimeout {
            duration: std::time::Duration::from_millis(250)
        }
        .is_fatal());
    }
}
