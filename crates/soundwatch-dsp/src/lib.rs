pub mod features;
pub mod fft;
pub mod mel;
pub mod prep;
pub mod window;

pub use features::{FeatureConfig, FeatureError, FeatureExtractor, FeatureMatrix};
pub use mel::{hz_to_mel, mel_to_hz, MelFilterbank, LOG_EPSILON};
pub use prep::{pcm_to_f32, FrameMeasures, PrepConfig, Preprocessor};
pub use window::WindowKind;
