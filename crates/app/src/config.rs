//! Application configuration.
//!
//! One TOML file drives every stage; each section deserializes into the
//! owning crate's config struct. Validation is fail-fast at startup:
//! anything inconsistent aborts before a thread or stream is created.

use serde::{Deserialize, Serialize};
use soundwatch_codec::StreamConfig;
use soundwatch_detect::DetectionConfig;
use soundwatch_dsp::{FeatureConfig, PrepConfig};
use soundwatch_foundation::ConfigError;
use std::path::{Path, PathBuf};

/// Capture geometry: what the microphone thread produces and how much
/// history the ring keeps.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CaptureConfig {
    pub sample_rate_hz: u32,
    /// Samples per capture frame. 320 at 16 kHz is one frame every 20 ms.
    pub frame_samples: usize,
    /// Ring buffer depth in seconds of audio.
    pub ring_seconds: f32,
    /// Preallocated capture frame slots.
    pub pool_slots: usize,
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            sample_rate_hz: 16_000,
            frame_samples: 320,
            ring_seconds: 2.0,
            pool_slots: 16,
        }
    }
}

impl CaptureConfig {
    pub fn ring_samples(&self) -> usize {
        (self.sample_rate_hz as f32 * self.ring_seconds) as usize
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.sample_rate_hz == 0 {
            return Err(ConfigError::new("sample_rate_hz", "must be positive"));
        }
        if self.frame_samples == 0 {
            return Err(ConfigError::new("frame_samples", "must be positive"));
        }
        if self.ring_seconds <= 0.0 {
            return Err(ConfigError::new(
                "ring_seconds",
                format!("must be positive, got {}", self.ring_seconds),
            ));
        }
        if self.pool_slots < 2 {
            return Err(ConfigError::new(
                "pool_slots",
                format!("need at least 2 slots, got {}", self.pool_slots),
            ));
        }
        Ok(())
    }
}

/// Top-level configuration, one section per pipeline stage.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// Identifier stamped into event notifications.
    pub device_id: String,
    /// Optional JSON-lines file detection events are appended to.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub events_file: Option<PathBuf>,
    pub capture: CaptureConfig,
    pub prep: PrepConfig,
    pub features: FeatureConfig,
    pub detection: DetectionConfig,
    pub stream: StreamConfig,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            device_id: "soundwatch".into(),
            events_file: None,
            capture: CaptureConfig::default(),
            prep: PrepConfig::default(),
            features: FeatureConfig::default(),
            detection: DetectionConfig::default(),
            stream: StreamConfig::default(),
        }
    }
}

impl AppConfig {
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path)
            .map_err(|e| ConfigError::new("config_file", format!("{}: {e}", path.display())))?;
        toml::from_str(&text)
            .map_err(|e| ConfigError::new("config_file", format!("{}: {e}", path.display())))
    }

    /// Per-section validation followed by the cross-stage constraints no
    /// single section can see.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.device_id.is_empty() {
            return Err(ConfigError::new("device_id", "must not be empty"));
        }
        self.capture.validate()?;
        self.prep.validate()?;
        self.features.validate(self.capture.sample_rate_hz)?;
        self.detection.validate()?;
        self.stream.validate()?;

        let ring = self.capture.ring_samples();
        let lookback = self.features.required_samples() + self.capture.frame_samples;
        if ring < lookback {
            return Err(ConfigError::new(
                "ring_seconds",
                format!(
                    "ring holds {ring} samples but the analysis window needs {lookback}"
                ),
            ));
        }
        if ring < self.stream.frame_samples {
            return Err(ConfigError::new(
                "ring_seconds",
                format!(
                    "ring holds {ring} samples but one stream packet needs {}",
                    self.stream.frame_samples
                ),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn default_config_is_valid() {
        let config = AppConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.capture.ring_samples(), 32_000);
    }

    #[test]
    fn ring_must_cover_analysis_lookback() {
        let config = AppConfig {
            capture: CaptureConfig {
                ring_seconds: 0.25,
                ..Default::default()
            },
            ..Default::default()
        };
        let err = config.validate().unwrap_err();
        assert_eq!(err.field, "ring_seconds");
    }

    #[test]
    fn empty_device_id_is_rejected() {
        let config = AppConfig {
            device_id: String::new(),
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn partial_toml_fills_in_defaults() {
        let toml = r#"
            device_id = "porch-unit"

            [detection]
            threshold = 0.9

            [capture]
            ring_seconds = 3.0
        "#;
        let config: AppConfig = toml::from_str(toml).unwrap();
        assert_eq!(config.device_id, "porch-unit");
        assert_eq!(config.detection.threshold, 0.9);
        assert_eq!(config.capture.ring_samples(), 48_000);
        // Untouched sections keep their defaults.
        assert_eq!(config.features.mel_bands, 40);
        assert_eq!(config.stream.payload_type, 8);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn load_round_trips_through_a_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        let config = AppConfig {
            device_id: "kitchen".into(),
            ..Default::default()
        };
        write!(file, "{}", toml::to_string(&config).unwrap()).unwrap();

        let loaded = AppConfig::load(file.path()).unwrap();
        assert_eq!(loaded.device_id, "kitchen");
        assert_eq!(loaded.capture.sample_rate_hz, 16_000);
    }

    #[test]
    fn load_reports_missing_file() {
        let err = AppConfig::load(Path::new("/nonexistent/soundwatch.toml")).unwrap_err();
        assert_eq!(err.field, "config_file");
    }

    #[test]
    fn malformed_toml_is_an_error() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, "device_id = [broken").unwrap();
        assert!(AppConfig::load(file.path()).is_err());
    }
}
